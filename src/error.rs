use thiserror::Error;

use crate::license::DenyReason;
use crate::store::StoreError;

/// Application-level failures surfaced to the user as inline messages.
///
/// Every variant is terminal for the current action; nothing is retried.
#[derive(Error, Debug)]
pub enum AppError {
    /// The document store could not be reached or rejected the call
    #[error("Document store unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The document store has no space left
    #[error("Drive storage full. Contact admin.")]
    QuotaExceeded,

    /// License gate refused access
    #[error("{reason}")]
    ValidationDenied { reason: DenyReason },

    /// Save attempted without a photo or a product name
    #[error("Add image and name")]
    InputIncomplete,

    /// Form values out of range
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Action requires a licensed session
    #[error("Not authorised")]
    Unauthorised,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::QuotaExceeded => AppError::QuotaExceeded,
            other => AppError::UpstreamUnavailable(other.to_string()),
        }
    }
}

impl AppError {
    /// Warnings leave the form as it is; everything else is an error message.
    pub fn is_warning(&self) -> bool {
        matches!(self, AppError::InputIncomplete | AppError::InvalidInput(_))
    }
}

#[cfg(feature = "web")]
mod response {
    use super::AppError;
    use axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    };
    use serde_json::json;

    impl IntoResponse for AppError {
        fn into_response(self) -> Response {
            let status = match &self {
                AppError::UpstreamUnavailable(msg) => {
                    log::error!("Upstream error: {}", msg);
                    StatusCode::BAD_GATEWAY
                }
                AppError::QuotaExceeded => StatusCode::INSUFFICIENT_STORAGE,
                AppError::ValidationDenied { .. } | AppError::Unauthorised => {
                    StatusCode::UNAUTHORIZED
                }
                AppError::InputIncomplete | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                AppError::Config(msg) => {
                    log::error!("Configuration error: {}", msg);
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                AppError::Io(e) => {
                    log::error!("IO error: {:?}", e);
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };

            let level = if self.is_warning() { "warning" } else { "error" };
            let body = Json(json!({
                "status": level,
                "message": self.to_string(),
            }));

            (status, body).into_response()
        }
    }
}
