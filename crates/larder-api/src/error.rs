use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use larder_db::StoreError;
use larder_remote::RemoteError;
use larder_sync::SyncError;
use larder_sync::account::AccountError;
use larder_sync::partners::PartnerError;

/// Every rejected operation maps to a stable machine-readable code so
/// clients can branch on it instead of parsing messages.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    detail: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str) -> Self {
        Self {
            status,
            code,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn not_found(code: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, code)
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match &self.detail {
            Some(detail) => json!({"error": self.code, "detail": detail}),
            None => json!({"error": self.code}),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => ApiError::new(StatusCode::CONFLICT, "sync_conflict"),
            other => {
                error!("Storage failure: {}", other);
                ApiError::internal()
            }
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        let code = err.code();
        match err {
            SyncError::Conflict => ApiError::new(StatusCode::CONFLICT, code),
            SyncError::Remote(remote) => {
                error!("Remote service failure: {}", remote);
                ApiError::new(StatusCode::BAD_GATEWAY, code)
            }
            SyncError::Store(store) => {
                error!("Storage failure: {}", store);
                ApiError::internal()
            }
        }
    }
}

impl From<PartnerError> for ApiError {
    fn from(err: PartnerError) -> Self {
        let code = err.code();
        match &err {
            PartnerError::NoSuchUser | PartnerError::NoSuchPartner | PartnerError::NoSuchRequest => {
                ApiError::new(StatusCode::NOT_FOUND, code)
            }
            PartnerError::CannotPartnerSelf => ApiError::new(StatusCode::BAD_REQUEST, code),
            PartnerError::AlreadyRequested
            | PartnerError::AlreadyPartners
            | PartnerError::AlreadyApproved
            | PartnerError::StillPending => ApiError::new(StatusCode::CONFLICT, code),
            PartnerError::Store(store) => {
                error!("Storage failure: {}", store);
                ApiError::internal()
            }
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        let code = err.code();
        match err {
            AccountError::InvalidPassword => ApiError::new(StatusCode::UNAUTHORIZED, code),
            AccountError::RemoteLogin(detail) => {
                ApiError::new(StatusCode::UNAUTHORIZED, code).with_detail(detail)
            }
            AccountError::Remote(remote) => {
                error!("Remote service failure: {}", remote);
                ApiError::new(StatusCode::BAD_GATEWAY, code)
            }
            AccountError::Store(store) => {
                error!("Storage failure: {}", store);
                ApiError::internal()
            }
            AccountError::Hash => {
                error!("Password hashing failure");
                ApiError::internal()
            }
        }
    }
}

impl From<RemoteError> for ApiError {
    fn from(err: RemoteError) -> Self {
        ApiError::from(SyncError::Remote(err))
    }
}
