use thiserror::Error;

/// Errors produced by the Ganymede client protocol layer.
#[derive(Debug, Error)]
pub enum GanymedeError {
    /// The remote call could not complete (network or transport failure).
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// The server rejected the credentials.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// An operation was attempted on a dead session or an unresolved node.
    #[error("protocol state error: {0}")]
    ProtocolState(String),

    /// The server understood the request but refused it.
    #[error("{title}: {message}")]
    RemoteBusiness { title: String, message: String },

    /// A local invariant the operation depends on is broken.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GanymedeError {
    /// Whether this error means the peer could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::Timeout)
    }
}

impl From<ciborium::de::Error<std::io::Error>> for GanymedeError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        GanymedeError::Codec(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for GanymedeError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        GanymedeError::Codec(e.to_string())
    }
}

pub type GResult<T> = Result<T, GanymedeError>;
