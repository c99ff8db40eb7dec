//! odd-io: the event-driven socket broker core (spec.md §2, C1–C5).
//!
//! `reactor` is the single-threaded readiness multiplexor (C3); `server`
//! and `client` are the non-blocking UNIX-socket connection layer built on
//! top of it (C4, C5); `buffer` is the growable byte buffer both use (C1).

pub mod buffer;
pub mod client;
pub mod error;
pub mod raw;
pub mod reactor;
pub mod server;
pub mod task;

pub use buffer::{Buffer, ShrinkPolicy};
pub use client::UnixSocketClient;
pub use error::{ConnectionError, IoServiceError};
pub use reactor::{JobMode, Reactor};
pub use server::{Connection, UnixSocketServer};
pub use task::{Op, RecvOutcome, SendOutcome};
