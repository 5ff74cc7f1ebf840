use larder_db::StoreError;
use larder_remote::RemoteError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A concurrent run committed the same `(account, uid)` first. The
    /// caller must re-run; the engine never retries on its own.
    #[error("concurrent sync of the same account")]
    Conflict,

    #[error("storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => SyncError::Conflict,
            other => SyncError::Store(other),
        }
    }
}

impl SyncError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Remote(RemoteError::InvalidToken(_)) => "remote_token_invalid",
            SyncError::Remote(_) => "remote_error",
            SyncError::Conflict => "sync_conflict",
            SyncError::Store(_) => "internal_error",
        }
    }
}
