//! Per-connection outbound queue.
//!
//! The relay never writes to a socket directly. Each connection gets an
//! unbounded channel whose receiving end is drained by the socket's writer
//! task, so a send is a non-blocking enqueue that fails only once the writer
//! is gone.

use tokio::sync::mpsc;

use crate::error::DeliveryError;
use crate::registry::ConnectionId;

/// A frame queued for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    /// Ask the writer to close the socket.
    Close,
}

/// Sending half of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl Outbound {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send_text(&self, id: ConnectionId, text: String) -> Result<(), DeliveryError> {
        self.tx
            .send(OutboundFrame::Text(text))
            .map_err(|_| DeliveryError::Closed(id))
    }

    /// Queues a close request. A writer that is already gone is fine.
    pub fn close(&self) {
        let _ = self.tx.send(OutboundFrame::Close);
    }
}
