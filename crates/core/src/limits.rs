//! Fixed size limits for the `DRV_INFO`/`DRV_COMMAND`/`DRV_RESPONSE` wire protocol.
//!
//! These are protocol constants, not arbitrary tuning knobs: changing them
//! changes the wire format (see `odd-protocol::wire`).

/// Maximum length of a command name, not counting the trailing NUL the wire
/// format reserves for it.
pub const MAX_COMMAND_NAME_LEN: usize = 31;

/// Maximum length of a command description, not counting the trailing NUL.
pub const MAX_COMMAND_DESCRIPTION_LEN: usize = 127;

/// Maximum bytes in a single `DRV_COMMAND` argument (the wire `len` field is
/// a `u8`).
pub const MAX_COMMAND_ARG_LEN: usize = u8::MAX as usize;

/// Sanity cap on the number of arguments the shell will encode into one
/// command frame. The wire format itself allows up to `u32::MAX`; this is a
/// local guard against a malformed or hostile command line, not a protocol
/// limit.
pub const MAX_COMMAND_ARGS: usize = 64;
