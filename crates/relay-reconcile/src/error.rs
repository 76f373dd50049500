use http::StatusCode;
use relay_channel::ChannelId;
use relay_core::HttpError;
use relay_ledger::LedgerError;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("job {0} is already tracked")]
    DuplicateJob(String),

    #[error("job {0} is not tracked")]
    UnknownJob(String),

    #[error("provisional charge must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("channel {0} does not exist")]
    UnknownChannel(ChannelId),

    #[error("status poll failed: {0}")]
    Poll(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl HttpError for ReconcileError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::DuplicateJob(_) => StatusCode::CONFLICT,
            Self::UnknownJob(_) | Self::UnknownChannel(_) => StatusCode::NOT_FOUND,
            Self::InvalidAmount(_) => StatusCode::BAD_REQUEST,
            Self::Poll(_) => StatusCode::BAD_GATEWAY,
            Self::Ledger(e) => e.status_code(),
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::DuplicateJob(_) => "duplicate_job",
            Self::UnknownJob(_) | Self::UnknownChannel(_) => "not_found_error",
            Self::InvalidAmount(_) => "invalid_request_error",
            Self::Poll(_) => "upstream_error",
            Self::Ledger(e) => e.error_type(),
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Ledger(e) => e.client_message(),
            _ => self.to_string(),
        }
    }
}
