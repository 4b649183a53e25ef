use thiserror::Error;

/// Failure talking to a remote collaborator (document store, auth service).
///
/// Cloneable so a single write outcome can be delivered both to the caller's
/// ticket and to the synchronizer's reconciliation step.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("remote returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("not signed in")]
    Unauthenticated,

    #[error("subscription closed")]
    Closed,
}

impl From<hyper::Error> for TransportError {
    fn from(e: hyper::Error) -> Self {
        TransportError::Request(e.to_string())
    }
}

impl From<hyper::http::Error> for TransportError {
    fn from(e: hyper::http::Error) -> Self {
        TransportError::Request(e.to_string())
    }
}

impl From<hyper::http::uri::InvalidUri> for TransportError {
    fn from(e: hyper::http::uri::InvalidUri) -> Self {
        TransportError::Request(format!("invalid uri: {e}"))
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Decode(e.to_string())
    }
}

impl From<serde_path_to_error::Error<serde_json::Error>> for TransportError {
    fn from(e: serde_path_to_error::Error<serde_json::Error>) -> Self {
        TransportError::Decode(e.to_string())
    }
}

/// Reason a local intent was refused before anything was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("device is in automatic mode")]
    AutoModeActive,

    #[error("value is already current")]
    NoChange,

    #[error("brightness {0} is outside 0..=100")]
    OutOfRange(i64),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("an account with this email already exists")]
    EmailInUse,

    #[error("password is too weak: {0}")]
    WeakPassword(String),

    #[error("auth service unreachable: {0}")]
    Network(#[from] TransportError),

    #[error("auth service refused the request: {0}")]
    Unexpected(String),
}
