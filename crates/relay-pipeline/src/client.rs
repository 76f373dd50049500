use tokio::sync::mpsc;

use crate::{
    PipelineError,
    upstream::{Chunk, Usage},
};

/// Output delivered to the requesting client
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// One generated increment
    Chunk(Chunk),
    /// Generation finished; `interrupted` is set when the upstream failed
    /// after producing partial output that was still settled
    Completed { usage: Usage, interrupted: bool },
    /// Request ended in failure
    Failed(PipelineError),
}

/// Sending half of the connection to the client
///
/// The client is considered gone once the receiving half is dropped.
#[derive(Debug, Clone)]
pub struct ClientLink {
    tx: mpsc::Sender<ClientEvent>,
}

impl ClientLink {
    /// Create a link and the receiver the transport layer drains
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Deliver an event, returning `false` if the client has gone away
    pub(crate) async fn deliver(&self, event: ClientEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}
