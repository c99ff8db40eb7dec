//! odd-protocol: C7, the driver registry and protocol engine (spec.md
//! §4.6–§4.7). Built on `odd-io`'s connection layer and `odd-core`'s
//! shared wire-format constants.

pub mod client_fsm;
pub mod dispatch;
pub mod error;
pub mod filename;
pub mod pearson;
pub mod registry;
pub mod wire;

pub use dispatch::{dispatch, DispatchOutcome};
pub use error::{ProtocolError, RegistryError};
pub use registry::{CommandDescriptor, DriverRecord, DriverRegistry, DriverState, Sink};
