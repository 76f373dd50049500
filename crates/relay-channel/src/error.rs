use http::StatusCode;
use relay_core::HttpError;
use thiserror::Error;

use crate::ChannelId;

/// Errors raised by the channel registry and selector
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// No enabled, healthy channel serves the requested group and model
    #[error("no available channel for model '{model}' in group '{group}'")]
    NotFound { group: String, model: String },

    /// Referenced channel does not exist in the registry
    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),

    /// No channel carries the referenced tag
    #[error("no channels tagged '{0}'")]
    UnknownTag(String),
}

impl HttpError for ChannelError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::UnknownChannel(_) | Self::UnknownTag(_) => StatusCode::NOT_FOUND,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::NotFound { .. } => "no_available_channel",
            Self::UnknownChannel(_) | Self::UnknownTag(_) => "not_found_error",
        }
    }

    fn client_message(&self) -> String {
        self.to_string()
    }
}
