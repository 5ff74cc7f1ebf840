use thiserror::Error;

/// Failure modes of remote service calls, kept distinct so callers can
/// branch: transport problems are retryable at the caller's discretion,
/// structured rejections and credential failures are not.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network/HTTP failure, including non-success status codes without a
    /// structured error body.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with a structured error body.
    #[error("remote service rejected the request: {0}")]
    Rejection(String),

    /// The credential was refused. Fatal to the run: no further call may be
    /// attempted with this token.
    #[error("remote token rejected: {0}")]
    InvalidToken(String),

    /// The referenced remote object does not exist.
    #[error("remote object not found")]
    NotFound,

    /// A payload could not be serialized for upload.
    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}
