//! `oddsh`: the interactive shell binary. Wires `odd_shell::Shell` to real
//! stdin/stdout; the CLI surface itself only governs process startup
//! (spec.md §6's external-collaborator boundary covers the interactive
//! line language, not how the process is launched).

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use clap::Parser;
use odd_shell::{exit_codes, Shell};
use tracing::error;

#[derive(Parser)]
#[command(version, about = "Interactive shell for the odd-control protocol")]
struct Cli {
    /// Base directory to watch for driver sockets. Defaults to
    /// `ODD_BASE_DIR`, then `.`.
    #[arg(long)]
    base_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    odd_core::logging::init();
    let cli = Cli::parse();
    let mut config = odd_core::Config::load();
    if let Some(base_dir) = cli.base_dir {
        config = config.with_base_dir(base_dir);
    }

    let sink: odd_protocol::Sink = Rc::new(|s: &str| {
        print!("{s}");
        let _ = std::io::stdout().flush();
    });

    let mut shell = match Shell::new(&config, sink) {
        Ok(shell) => shell,
        Err(e) => {
            error!("failed to start shell: {e}");
            return ExitCode::from(exit_codes::FATAL as u8);
        }
    };

    // A duplicate driver found during the watch's bootstrap scan already
    // requested a stop before `Shell::new` returned; check first so the
    // interactive prompt and stdin loop aren't started for no reason.
    if let Some(code) = shell.exit_code() {
        return ExitCode::from(code as u8);
    }

    print!("> ");
    let _ = std::io::stdout().flush();

    let handler = shell.line_handler();
    odd_shell::stdin::arm(shell.reactor_mut(), handler);

    if let Err(e) = shell.run() {
        error!("shell loop failed: {e}");
        return ExitCode::from(exit_codes::FATAL as u8);
    }

    ExitCode::from(shell.exit_code().unwrap_or(exit_codes::ORDERLY) as u8)
}
