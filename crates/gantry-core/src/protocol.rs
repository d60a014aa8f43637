//! Capability traits between a transport and the protocol core.
//!
//! A transport hands the core a [`PushSink`] (its server-to-client half) and
//! receives a [`Connection`] it feeds client-to-server messages into. The
//! network transport does this once per channel session; the stdio
//! transport does it once for the whole process.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::errors::CoreError;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    #[error("push queue full")]
    Full,
    #[error("push channel closed")]
    Closed,
}

/// One-way channel from the server to a single client.
pub trait PushSink: Send + Sync {
    /// Queue one serialized protocol message. Never blocks.
    fn push(&self, message: String) -> Result<(), PushError>;
}

/// `PushSink` backed by a bounded `mpsc` queue drained by the transport.
#[derive(Clone, Debug)]
pub struct QueueSink {
    tx: mpsc::Sender<String>,
}

impl QueueSink {
    /// Create a sink together with the receiver the transport drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl PushSink for QueueSink {
    fn push(&self, message: String) -> Result<(), PushError> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }
}

/// Synchronous acknowledgement for one inbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Ack {
    /// A reply was queued on the push sink.
    Queued,
    /// Message accepted; nothing to reply (notification or client response).
    Accepted,
}

/// The request-dispatch engine the gateway hands payloads to.
#[async_trait]
pub trait ProtocolCore: Send + Sync {
    /// Bind a new logical connection to `sink`. May suspend.
    async fn establish(&self, sink: Arc<dyn PushSink>) -> Result<Arc<dyn Connection>, CoreError>;
}

/// One established protocol connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Process one raw inbound message. Replies go out through the push sink.
    async fn handle_inbound(&self, raw: &str) -> Result<Ack, CoreError>;

    /// Tear the connection down. Further inbound messages fail with
    /// [`CoreError::Closed`]. Calling twice is harmless.
    fn close(&self) -> Result<(), CoreError>;
}
