//! Upstream generation backends

mod openai;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use relay_channel::Channel;
use serde::Serialize;
use serde_json::Value;

pub use self::openai::HttpUpstream;
use crate::UpstreamError;

/// Request forwarded to an upstream channel
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub request_id: String,
    pub model: String,
    /// Client payload, forwarded as-is apart from streaming fields
    pub payload: Value,
}

/// One output increment
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Generated text carried by this increment
    pub text: String,
    /// Upstream chunk as received, relayed to streaming clients
    pub raw: Value,
}

/// Token usage reported by the upstream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Event produced while consuming an upstream stream
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Chunk(Chunk),
    Usage(Usage),
    /// Explicit completion marker
    Done,
}

pub type UpstreamStream = Pin<Box<dyn Stream<Item = Result<UpstreamEvent, UpstreamError>> + Send>>;

/// A backend able to run a generation against a channel
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Start a generation and return its event stream
    ///
    /// # Errors
    ///
    /// Returns an error if the channel rejects the request or is unreachable
    async fn generate(&self, channel: &Channel, request: &GenerateRequest) -> Result<UpstreamStream, UpstreamError>;
}
