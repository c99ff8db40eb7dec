//! odd-core: shared types and environment glue for the odd-control workspace.
//!
//! Every other crate (`odd-io`, `odd-discovery`, `odd-protocol`, `odd-shell`,
//! `odd-driverd`) depends on this one for configuration lookups, the wire
//! protocol's fixed size limits, and logging bootstrap.

pub mod env;
pub mod limits;
pub mod logging;

pub use env::Config;
pub use limits::{MAX_COMMAND_ARGS, MAX_COMMAND_ARG_LEN, MAX_COMMAND_DESCRIPTION_LEN, MAX_COMMAND_NAME_LEN};
