use http::StatusCode;
use relay_channel::{ChannelError, ChannelId};
use relay_core::HttpError;
use relay_ledger::{Amount, LedgerError};
use thiserror::Error;

use crate::Stage;

/// Failure of a single upstream attempt
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// Transport failure before a response arrived
    #[error("request failed: {0}")]
    Request(String),

    /// Upstream answered with a non-success status
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body could not be decoded
    #[error("malformed upstream response: {0}")]
    Decode(String),

    /// Stream ended without a completion marker
    #[error("stream ended before completion")]
    Truncated,

    /// No chunk arrived within the configured window
    #[error("no output for {0:?}")]
    Timeout(std::time::Duration),
}

/// Errors that end a request lifecycle
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Request is malformed
    #[error("invalid request: {0}")]
    Admission(String),

    /// No channel can serve the request
    #[error(transparent)]
    Capacity(ChannelError),

    /// Balance cannot cover the reservation
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Amount, available: Amount },

    /// Upstream channel failed and retries were exhausted
    #[error("channel {channel_id} failed: {source}")]
    Channel {
        channel_id: ChannelId,
        #[source]
        source: UpstreamError,
    },

    /// Client went away before generation started
    #[error("client disconnected during {0}")]
    Disconnected(Stage),

    /// Hold could not be committed; a recovery obligation was raised
    #[error("settlement failed, {amount} owed: {reason}")]
    Settlement { amount: Amount, reason: String },

    /// Tenant has an unresolved recovery obligation
    #[error("tenant '{0}' has an unresolved recovery obligation")]
    RecoveryPending(String),

    /// Ledger rejected an operation
    #[error(transparent)]
    Ledger(LedgerError),

    /// Stage machine rejected a transition
    #[error("invalid stage transition {from} -> {to}")]
    InvalidTransition { from: Stage, to: Stage },
}

impl PipelineError {
    /// Whether another channel might succeed where this one failed
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Channel { .. })
    }
}

impl From<LedgerError> for PipelineError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::InsufficientBalance { requested, available } => {
                Self::InsufficientBalance { requested, available }
            }
            other => Self::Ledger(other),
        }
    }
}

impl HttpError for PipelineError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Admission(_) => StatusCode::BAD_REQUEST,
            Self::Capacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::Channel { .. } => StatusCode::BAD_GATEWAY,
            // Nobody is listening; 499 mirrors the nginx convention
            Self::Disconnected(_) => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            Self::RecoveryPending(_) => StatusCode::CONFLICT,
            Self::Settlement { .. } | Self::Ledger(_) | Self::InvalidTransition { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::Admission(_) => "invalid_request_error",
            Self::Capacity(_) => "no_available_channel",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::Channel { .. } => "upstream_error",
            Self::Disconnected(_) => "client_disconnected",
            Self::RecoveryPending(_) => "recovery_pending",
            Self::Settlement { .. } | Self::Ledger(_) | Self::InvalidTransition { .. } => "internal_error",
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Settlement { .. } | Self::Ledger(_) | Self::InvalidTransition { .. } => {
                "an internal error occurred".to_owned()
            }
            Self::Channel { .. } => "upstream channel failed".to_owned(),
            other => other.to_string(),
        }
    }
}
