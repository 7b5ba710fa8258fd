/// Errors produced by the STOMP codec and client.
///
/// `Clone` so a single connection failure can be handed to every live
/// subscription.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StompError {
    #[error("io: {0}")]
    Io(String),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("frame exceeds {0} bytes")]
    FrameTooLarge(usize),

    /// The server sent an ERROR frame.
    #[error("server error: {0}")]
    Server(String),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("connection closed")]
    Closed,
}

impl From<std::io::Error> for StompError {
    fn from(e: std::io::Error) -> Self {
        StompError::Io(e.to_string())
    }
}
