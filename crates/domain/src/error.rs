/// Coarse classification of an [`Error`].
///
/// Callers branch on the kind rather than on individual variants: the
/// dispatcher only advances to the next node on [`ErrorKind::Transport`],
/// while everything else is returned as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid configuration. Never retried.
    Configuration,
    /// No hosts, no nodes, unknown node, missing property.
    Discovery,
    /// DNS, TLS, connect, timeout, WebSocket failures.
    Transport,
    /// A remote answered with a status the caller did not accept.
    Application,
    /// A response or message arrived but could not be parsed.
    Decode,
    /// A node secret could not be provisioned.
    Secret,
    /// The caller's cancellation token fired.
    Cancelled,
}

/// Shared error type used across all pxGrid crates.
///
/// Variants carry rendered messages rather than source errors so the type
/// stays `Clone`: a call built with a fatal error hands out the same error
/// from every execution mode.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("config: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no hosts available")]
    NoHostsAvailable,

    #[error("no nodes available")]
    NoNodesAvailable,

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("invalid node index {0}")]
    InvalidNodeIndex(usize),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("property {0} not found")]
    PropertyNotFound(String),

    #[error("property {0} is not a string")]
    PropertyNotString(String),

    #[error("all nodes failed to {0}")]
    AllNodesFailed(String),

    #[error("failed to parse URL: {0}")]
    UrlParse(String),

    #[error("failed to resolve host: {0}")]
    Resolve(String),

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("TLS: {0}")]
    Tls(String),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("websocket: {0}")]
    WebSocket(String),

    #[error("STOMP: {0}")]
    Stomp(String),

    #[error("unexpected status code: {0}")]
    UnexpectedStatus(u16),

    #[error("create account forbidden")]
    CreateForbidden,

    #[error("create account conflict")]
    CreateConflict,

    #[error("activate account unauthorized")]
    ActivateUnauthorized,

    #[error("decode: {0}")]
    Decode(String),

    #[error("failed to get secret for node {node}: {message}")]
    Secret { node: String, message: String },

    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::InvalidInput(_) => ErrorKind::Configuration,

            Error::NoHostsAvailable
            | Error::NoNodesAvailable
            | Error::NodeNotFound(_)
            | Error::InvalidNodeIndex(_)
            | Error::ServiceUnavailable(_)
            | Error::PropertyNotFound(_)
            | Error::PropertyNotString(_)
            | Error::AllNodesFailed(_) => ErrorKind::Discovery,

            Error::UrlParse(_)
            | Error::Resolve(_)
            | Error::InvalidPort(_)
            | Error::Tls(_)
            | Error::Http(_)
            | Error::Timeout(_)
            | Error::WebSocket(_)
            | Error::Stomp(_) => ErrorKind::Transport,

            Error::UnexpectedStatus(_)
            | Error::CreateForbidden
            | Error::CreateConflict
            | Error::ActivateUnauthorized => ErrorKind::Application,

            Error::Decode(_) => ErrorKind::Decode,
            Error::Secret { .. } => ErrorKind::Secret,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether this failure should advance a failover loop to the next
    /// candidate.
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
