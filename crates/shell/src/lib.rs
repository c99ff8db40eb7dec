//! odd-shell: the interactive line frontend (spec.md §6, C8). The
//! tokenizer and renderers here are the "external collaborator" spec.md
//! §1 excludes from the core's contract — this crate is that collaborator,
//! built the way the core expects it to behave (spec.md §6: "a function
//! `dispatch`... and `list()`/`help()`/`invalid()` renderers").

pub mod stdin;

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use odd_core::Config;
use odd_discovery::{watch, WatchError, WatchEvent, Watcher};
use odd_io::Reactor;
use odd_protocol::{dispatch, DispatchOutcome, DriverRegistry, RegistryError, Sink};
use tracing::warn;

use crate::stdin::StdinEvent;

pub mod exit_codes {
    /// Orderly EOF on stdin (spec.md §8 S6: must differ from self-delete).
    pub const ORDERLY: i32 = 0;
    /// Base directory was removed out from under the shell (spec.md §8 S6).
    pub const SELF_DELETE: i32 = 1;
    /// Unrecoverable I/O or invariant violation (duplicate driver, cannot
    /// watch/bind/scan).
    pub const FATAL: i32 = 2;
}

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error(transparent)]
    IoService(#[from] odd_io::IoServiceError),
    #[error(transparent)]
    Watch(#[from] WatchError),
}

/// One tokenized line of interactive input (spec.md §6's `list`/`help`/
/// `cmd drv slot name args…` grammar; no quoting, plain whitespace split).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Empty,
    List,
    Help,
    Cmd { drv: String, slot: u32, name: String, args: Vec<Vec<u8>> },
    Unknown,
}

pub fn tokenize(line: &str) -> Line {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        [] => Line::Empty,
        ["list"] => Line::List,
        ["help"] => Line::Help,
        ["cmd", drv, slot, name, args @ ..] => match slot.parse::<u32>() {
            Ok(slot) => Line::Cmd {
                drv: drv.to_string(),
                slot,
                name: name.to_string(),
                args: args.iter().map(|a| a.as_bytes().to_vec()).collect(),
            },
            Err(_) => Line::Unknown,
        },
        _ => Line::Unknown,
    }
}

pub fn render_help() -> String {
    "commands: list, help, cmd <driver> <slot> <name> [args...]\n> ".to_string()
}

/// Renders every known driver's command table, one line per command
/// (spec.md §8 S1: `Driver: printer / Slot: 3 / p <arity: 1> --- print`).
/// A driver that hasn't sent `DRV_INFO` yet is reported as "connecting"
/// while within `info_wait` of its `connected_at`, else as having never
/// answered.
pub fn render_list(registry: &DriverRegistry, info_wait: Duration) -> String {
    let mut out = String::new();
    for record in registry.iter() {
        match record.commands_if_ready() {
            Some(commands) if !commands.is_empty() => {
                for cmd in commands {
                    out.push_str(&format!(
                        "Driver: {} / Slot: {} / {} <arity: {}> --- {}\n",
                        record.name, record.slot, cmd.name, cmd.arity, cmd.descr
                    ));
                }
            }
            Some(_) => {
                out.push_str(&format!("Driver: {} / Slot: {} / (no commands)\n", record.name, record.slot));
            }
            None => {
                let status = if record.connected_at.elapsed() < info_wait { "connecting" } else { "(no DRV_INFO received)" };
                out.push_str(&format!("Driver: {} / Slot: {} / {}\n", record.name, record.slot, status));
            }
        }
    }
    out.push_str("> ");
    out
}

/// Owns the reactor, the driver registry, and the directory watch; drives
/// one interactive session until stdin hits EOF, a duplicate driver is
/// discovered, or the base directory is removed.
pub struct Shell {
    registry: Rc<RefCell<DriverRegistry>>,
    reactor: Reactor,
    _watcher: Watcher,
    sink: Sink,
    info_wait: Duration,
    exit_code: Rc<RefCell<Option<i32>>>,
    base_dir: PathBuf,
}

impl Shell {
    /// Builds the registry and reactor, then installs the directory watch,
    /// which performs its bootstrap scan synchronously — a duplicate
    /// driver discovered during that scan sets `exit_code` and requests a
    /// stop before this function even returns. Callers can check
    /// `exit_code()` right away to skip the interactive prompt entirely in
    /// that case; `run()` itself still terminates correctly either way,
    /// since a pre-armed `stop()` is honored on its very first iteration.
    pub fn new(config: &Config, sink: Sink) -> Result<Self, ShellError> {
        let registry = Rc::new(RefCell::new(DriverRegistry::new(config.socket_suffix.clone())));
        let mut reactor = Reactor::new()?;
        let exit_code = Rc::new(RefCell::new(None));

        let registry2 = registry.clone();
        let sink2 = sink.clone();
        let exit_code2 = exit_code.clone();
        let base_dir2 = config.base_dir.clone();
        let watcher = watch(&config.base_dir, &mut reactor, move |reactor, event| {
            on_watch_event(&registry2, reactor, &base_dir2, event, sink2.clone(), &exit_code2);
        })?;

        Ok(Self {
            registry,
            reactor,
            _watcher: watcher,
            sink,
            info_wait: config.info_wait,
            exit_code,
            base_dir: config.base_dir.clone(),
        })
    }

    /// The closure to hand to `stdin::arm`: decoupled from `&mut self` so
    /// it can live as a 'static reactor callback alongside the directory
    /// watch's own callback.
    pub fn line_handler(&self) -> impl FnMut(&mut Reactor, StdinEvent) + 'static {
        let registry = self.registry.clone();
        let sink = self.sink.clone();
        let info_wait = self.info_wait;
        let exit_code = self.exit_code.clone();
        move |reactor: &mut Reactor, event: StdinEvent| match event {
            StdinEvent::Line(text) => handle_line(&registry, reactor, &sink, info_wait, &text),
            StdinEvent::Eof => {
                if exit_code.borrow().is_none() {
                    *exit_code.borrow_mut() = Some(exit_codes::ORDERLY);
                }
                reactor.stop(false);
            }
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_code.borrow()
    }

    pub fn reactor_mut(&mut self) -> &mut Reactor {
        &mut self.reactor
    }

    pub fn base_dir(&self) -> &std::path::Path {
        &self.base_dir
    }

    /// Drives the reactor until something calls `stop` (EOF, self-delete,
    /// or a fatal registry error). A single call suffices: `Reactor::run`
    /// blocks with no timeout until a callback requests a stop.
    pub fn run(&mut self) -> Result<(), ShellError> {
        self.reactor.run()?;
        Ok(())
    }
}

fn on_watch_event(
    registry: &Rc<RefCell<DriverRegistry>>,
    reactor: &mut Reactor,
    base_dir: &std::path::Path,
    event: WatchEvent,
    sink: Sink,
    exit_code: &Rc<RefCell<Option<i32>>>,
) {
    match event {
        WatchEvent::Created(name) => {
            let result = registry.borrow_mut().on_created(reactor, base_dir, &name, sink.clone());
            if let Err(e) = result {
                fail_fatal(reactor, exit_code, &e);
            }
        }
        WatchEvent::Deleted(name) => {
            if let Err(e) = registry.borrow_mut().on_deleted(reactor, &name) {
                fail_fatal(reactor, exit_code, &e);
            }
        }
        WatchEvent::SelfDeleted => {
            registry.borrow().on_self_deleted(reactor);
            exit_code.borrow_mut().get_or_insert(exit_codes::SELF_DELETE);
        }
    }
}

fn fail_fatal(reactor: &mut Reactor, exit_code: &Rc<RefCell<Option<i32>>>, e: &RegistryError) {
    warn!("fatal registry error: {e}");
    exit_code.borrow_mut().get_or_insert(exit_codes::FATAL);
    reactor.stop(false);
}

fn handle_line(registry: &Rc<RefCell<DriverRegistry>>, reactor: &mut Reactor, sink: &Sink, info_wait: Duration, text: &str) {
    match tokenize(text) {
        Line::Empty => (*sink)("> "),
        Line::Help => (*sink)(&render_help()),
        Line::List => {
            let rendered = render_list(&registry.borrow(), info_wait);
            (*sink)(&rendered);
        }
        Line::Cmd { drv, slot, name, args } => {
            let outcome = dispatch(&registry.borrow(), reactor, &drv, slot, &name, &args, sink.clone());
            if outcome == DispatchOutcome::Invalid {
                (*sink)("Invalid command\n> ");
            }
        }
        Line::Unknown => (*sink)("Invalid command\n> "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_recognizes_list_and_help() {
        assert_eq!(tokenize("list"), Line::List);
        assert_eq!(tokenize("help"), Line::Help);
        assert_eq!(tokenize(""), Line::Empty);
        assert_eq!(tokenize("   "), Line::Empty);
    }

    #[test]
    fn tokenize_parses_cmd_with_args() {
        let parsed = tokenize("cmd printer 3 p hello world");
        assert_eq!(
            parsed,
            Line::Cmd {
                drv: "printer".to_string(),
                slot: 3,
                name: "p".to_string(),
                args: vec![b"hello".to_vec(), b"world".to_vec()],
            }
        );
    }

    #[test]
    fn tokenize_parses_cmd_with_no_args() {
        assert_eq!(
            tokenize("cmd printer 3 uptime"),
            Line::Cmd { drv: "printer".to_string(), slot: 3, name: "uptime".to_string(), args: vec![] }
        );
    }

    #[test]
    fn tokenize_rejects_non_numeric_slot() {
        assert_eq!(tokenize("cmd printer abc p"), Line::Unknown);
    }

    #[test]
    fn tokenize_rejects_short_cmd() {
        assert_eq!(tokenize("cmd printer 3"), Line::Unknown);
    }

    #[test]
    fn tokenize_rejects_garbage() {
        assert_eq!(tokenize("frobnicate"), Line::Unknown);
    }

    #[test]
    fn render_list_formats_one_line_per_command() {
        let mut reactor = Reactor::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("printer.3.sock");
        let listener = std::os::unix::net::UnixListener::bind(&path).unwrap();
        let mut registry = DriverRegistry::new("sock");
        let sink: Sink = Rc::new(|_s: &str| {});
        registry
            .on_created(&mut reactor, dir.path(), std::ffi::OsStr::new("printer.3.sock"), sink)
            .unwrap();
        for _ in 0..20 {
            reactor.stop(true);
            reactor.run().unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let (server_side, _addr) = listener.accept().unwrap();
        let commands = vec![odd_protocol::CommandDescriptor {
            name: "p".to_string(),
            arity: 1,
            descr: "print".to_string(),
        }];
        std::io::Write::write_all(&mut (&server_side), &odd_protocol::wire::encode_drv_info(&commands).unwrap())
            .unwrap();
        for _ in 0..20 {
            reactor.stop(true);
            reactor.run().unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let rendered = render_list(&registry, Duration::from_millis(500));
        assert_eq!(rendered, "Driver: printer / Slot: 3 / p <arity: 1> --- print\n> ");
    }

    #[test]
    fn render_list_reports_connecting_before_info_wait_elapses() {
        let mut reactor = Reactor::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("printer.3.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&path).unwrap();
        let mut registry = DriverRegistry::new("sock");
        let sink: Sink = Rc::new(|_s: &str| {});
        registry
            .on_created(&mut reactor, dir.path(), std::ffi::OsStr::new("printer.3.sock"), sink)
            .unwrap();
        for _ in 0..20 {
            reactor.stop(true);
            reactor.run().unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let rendered = render_list(&registry, Duration::from_secs(60));
        assert_eq!(rendered, "Driver: printer / Slot: 3 / connecting\n> ");
    }
}
