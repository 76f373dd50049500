use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use relay_channel::ChannelError;
use relay_core::HttpError;
use relay_ledger::LedgerError;
use relay_pipeline::PipelineError;
use relay_reconcile::ReconcileError;

/// Errors returned by route handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid admin secret")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    /// A fault inside the gateway rather than in the request
    #[error("{0}")]
    Internal(String),

    #[error("asynchronous job reconciliation is disabled")]
    ReconcilerDisabled,

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

impl ApiError {
    fn inner(&self) -> Option<&dyn HttpError> {
        match self {
            Self::Channel(e) => Some(e),
            Self::Ledger(e) => Some(e),
            Self::Pipeline(e) => Some(e),
            Self::Reconcile(e) => Some(e),
            Self::Unauthorized | Self::BadRequest(_) | Self::Internal(_) | Self::ReconcilerDisabled => None,
        }
    }
}

impl HttpError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ReconcilerDisabled => StatusCode::NOT_FOUND,
            _ => self.inner().map_or(StatusCode::INTERNAL_SERVER_ERROR, HttpError::status_code),
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::Unauthorized => "authentication_error",
            Self::BadRequest(_) => "invalid_request_error",
            Self::Internal(_) => "internal_error",
            Self::ReconcilerDisabled => "not_found_error",
            _ => self.inner().map_or("internal_error", HttpError::error_type),
        }
    }

    fn client_message(&self) -> String {
        self.inner().map_or_else(|| self.to_string(), HttpError::client_message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error_response(&self)
    }
}

/// JSON error body shared by every route
pub fn error_response(error: &dyn HttpError) -> Response {
    let status = error.status_code();
    if status.is_server_error() {
        tracing::error!(error = %error, "request failed");
    }

    let body = serde_json::json!({
        "error": {
            "type": error.error_type(),
            "message": error.client_message(),
        }
    });

    (status, Json(body)).into_response()
}
