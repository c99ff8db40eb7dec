use std::io;

/// Errors from `filename` and `wire` (spec.md §4.6.1, §4.6.3).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("filename is not of the form <name>.<slot>.<suffix>")]
    MalformedFilename,
    #[error("filename has an empty driver name")]
    EmptyName,
    #[error("filename slot is not a non-empty digit string")]
    InvalidSlot,
    #[error("filename suffix does not match the configured protocol suffix")]
    WrongSuffix,
    #[error("command name exceeds MAX_COMMAND_NAME_LEN")]
    NameTooLong,
    #[error("command description exceeds MAX_COMMAND_DESCRIPTION_LEN")]
    DescriptionTooLong,
    #[error("argument exceeds MAX_COMMAND_ARG_LEN")]
    ArgumentTooLong,
    #[error("too many arguments in one command frame")]
    TooManyArguments,
    #[error("message truncated: needed {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("unknown protocol signature byte {0:#x}")]
    UnknownSignature(u8),
}

/// Errors from `registry` mutation (spec.md §4.6.2).
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate driver record for ({name}, {slot}): filenames are authoritative")]
    DuplicateDriver { name: String, slot: u32 },
    #[error(transparent)]
    Connection(#[from] odd_io::error::ConnectionError),
    #[error(transparent)]
    Io(#[from] io::Error),
}
