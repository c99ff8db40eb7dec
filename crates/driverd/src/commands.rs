//! The fixed demo command table: `echo`, `add`, `uptime` (SPEC_FULL.md §4.7
//! expansion). Each command is a descriptor paired with an executor; the
//! executor receives already-validated argument bytes (arity checked by the
//! shell side's `dispatch`, spec.md §4.6.5) and returns the response payload.

use std::time::Instant;

use odd_protocol::CommandDescriptor;

pub struct Command {
    pub descriptor: CommandDescriptor,
    pub exec: Box<dyn Fn(&[Vec<u8>]) -> Vec<u8>>,
}

/// Holds the fixed command table in dispatch order; `cmd_idx` on the wire
/// is an index into this vector (spec.md §4.6.3).
pub struct Commands {
    commands: Vec<Command>,
}

impl Commands {
    pub fn descriptors(&self) -> Vec<CommandDescriptor> {
        self.commands.iter().map(|c| c.descriptor.clone()).collect()
    }

    pub fn execute(&self, cmd_idx: u32, args: &[Vec<u8>]) -> Option<Vec<u8>> {
        self.commands.get(cmd_idx as usize).map(|c| (c.exec)(args))
    }
}

fn echo(args: &[Vec<u8>]) -> Vec<u8> {
    args.first().cloned().unwrap_or_default()
}

fn add(args: &[Vec<u8>]) -> Vec<u8> {
    let parse = |a: &[u8]| std::str::from_utf8(a).ok()?.trim().parse::<i64>().ok();
    let sum = match (args.first().and_then(|a| parse(a)), args.get(1).and_then(|a| parse(a))) {
        (Some(a), Some(b)) => a + b,
        _ => return b"error: add takes two integers".to_vec(),
    };
    sum.to_string().into_bytes()
}

fn build_uptime(started_at: Instant) -> impl Fn(&[Vec<u8>]) -> Vec<u8> {
    move |_args| started_at.elapsed().as_secs().to_string().into_bytes()
}

/// Builds the reference driver's command table. `started_at` anchors the
/// `uptime` command; callers pass `Instant::now()` taken at process start.
pub fn build(started_at: Instant) -> Commands {
    let commands = vec![
        Command {
            descriptor: CommandDescriptor {
                name: "echo".to_string(),
                arity: 1,
                descr: "echo back the first argument".to_string(),
            },
            exec: Box::new(echo),
        },
        Command {
            descriptor: CommandDescriptor {
                name: "add".to_string(),
                arity: 2,
                descr: "sum two integer arguments".to_string(),
            },
            exec: Box::new(add),
        },
        Command {
            descriptor: CommandDescriptor {
                name: "uptime".to_string(),
                arity: 0,
                descr: "seconds since driver start".to_string(),
            },
            exec: Box::new(build_uptime(started_at)),
        },
    ];
    Commands { commands }
}
