use http::StatusCode;
use relay_core::HttpError;
use thiserror::Error;

use crate::{Amount, HoldId};

/// Errors returned by ledger operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Tenant balance cannot cover the requested reservation
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Amount, available: Amount },

    /// Amount is negative
    #[error("invalid amount: {0}")]
    InvalidAmount(Amount),

    /// Hold is not known to this ledger
    #[error("unknown hold {0}")]
    UnknownHold(HoldId),

    /// Commit attempted on a hold that was already released
    #[error("hold {0} was already released")]
    HoldReleased(HoldId),

    /// Release attempted on a hold that was already committed
    #[error("hold {0} was already committed")]
    HoldCommitted(HoldId),

    /// Same transaction id delivered with a different tenant or amount
    #[error("transaction '{0}' was already applied with different parameters")]
    IdempotencyConflict(String),

    /// Applying the amount would overflow a tenant's balance or totals
    #[error("amount would overflow the account of tenant '{0}'")]
    Overflow(String),

    /// Backing store could not be reached
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

impl HttpError for LedgerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::InvalidAmount(_) | Self::Overflow(_) => StatusCode::BAD_REQUEST,
            Self::IdempotencyConflict(_) => StatusCode::CONFLICT,
            Self::UnknownHold(_) | Self::HoldReleased(_) | Self::HoldCommitted(_) | Self::Unavailable(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::InvalidAmount(_) | Self::Overflow(_) => "invalid_request_error",
            Self::IdempotencyConflict(_) => "idempotency_conflict",
            Self::UnknownHold(_) | Self::HoldReleased(_) | Self::HoldCommitted(_) | Self::Unavailable(_) => {
                "internal_error"
            }
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::InsufficientBalance { .. }
            | Self::InvalidAmount(_)
            | Self::Overflow(_)
            | Self::IdempotencyConflict(_) => {
                self.to_string()
            }
            _ => "an internal error occurred".to_owned(),
        }
    }
}
