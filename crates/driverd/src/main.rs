//! `odd-driverd`: the reference driver binary. Binds `<name>.<slot>.sock`
//! under a base directory, answers `DRV_COMMAND` with a small fixed table
//! (`echo`, `add`, `uptime`), and exists so discovery → connect → command →
//! response is exercisable end-to-end (spec.md §8's S1/S2 scenarios).

mod commands;
mod server_fsm;

use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Instant;

use clap::Parser;
use odd_io::{Reactor, UnixSocketServer};
use tracing::{error, info};

#[derive(Parser)]
#[command(version, about = "Reference driver for the odd-control protocol")]
struct Cli {
    /// Driver name, the first filename component (`<name>.<slot>.sock`).
    #[arg(long, default_value = "printer")]
    name: String,

    /// Driver slot, the second filename component.
    #[arg(long, default_value_t = 0)]
    slot: u32,

    /// Base directory to bind the socket in. Defaults to `ODD_BASE_DIR`,
    /// then `.`.
    #[arg(long)]
    base_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    odd_core::logging::init();
    let cli = Cli::parse();
    let config = odd_core::Config::load();
    let base_dir = cli.base_dir.unwrap_or(config.base_dir);

    match run(&cli.name, cli.slot, &base_dir, &config.socket_suffix) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(name: &str, slot: u32, base_dir: &std::path::Path, suffix: &str) -> Result<(), DriverdError> {
    std::fs::create_dir_all(base_dir).map_err(DriverdError::CreateDir)?;
    let filename = odd_protocol::filename::format(name, slot, suffix);
    let path = base_dir.join(&filename);
    if path.exists() {
        std::fs::remove_file(&path).map_err(DriverdError::RemoveStale)?;
    }

    let mut reactor = Reactor::new().map_err(DriverdError::IoService)?;
    let commands = Rc::new(commands::build(Instant::now()));

    let _server =
        UnixSocketServer::bind(&path, &mut reactor, move |server, fd, reactor| {
            info!(fd, "shell connected");
            server_fsm::on_accept(server, reactor, fd, commands.clone());
            true
        })
        .map_err(DriverdError::Bind)?;

    info!(path = %path.display(), name, slot, "listening");
    reactor.run().map_err(DriverdError::IoService)?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
enum DriverdError {
    #[error("failed to create base directory")]
    CreateDir(#[source] std::io::Error),
    #[error("failed to remove stale socket")]
    RemoveStale(#[source] std::io::Error),
    #[error("failed to bind socket")]
    Bind(#[source] odd_io::ConnectionError),
    #[error(transparent)]
    IoService(#[from] odd_io::IoServiceError),
}
