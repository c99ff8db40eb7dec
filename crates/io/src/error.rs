use std::io;

/// Errors from the reactor (C3: post_job/remove_job/run/stop).
#[derive(Debug, thiserror::Error)]
pub enum IoServiceError {
    #[error("failed to register fd with the reactor")]
    Register(#[source] io::Error),
    #[error("poll failed")]
    Poll(#[source] io::Error),
}

/// Errors from the connection layer (C4 server, C5 client).
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("unknown connection")]
    NotFound,

    #[error("a send is already in flight on this connection")]
    SendInFlight,

    #[error("a recv is already in flight on this connection")]
    RecvInFlight,

    #[error("socket operation failed")]
    Io(#[source] io::Error),

    #[error(transparent)]
    IoService(#[from] IoServiceError),
}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        ConnectionError::Io(e)
    }
}
