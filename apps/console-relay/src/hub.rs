//! Single-task event loop around [`RelayServer`].
//!
//! Socket tasks never touch relay state. They post [`RelayEvent`]s through a
//! [`RelayHandle`] and one hub task applies them in arrival order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use relay_proto::Role;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::RelayError;
use crate::outbound::Outbound;
use crate::registry::ConnectionId;
use crate::relay::{RelayConfig, RelayServer, RelayStats};

pub enum RelayEvent {
    Attach {
        id: ConnectionId,
        role: Role,
        outbound: Outbound,
    },
    Frame {
        id: ConnectionId,
        text: String,
    },
    TransportError {
        id: ConnectionId,
        error: String,
    },
    Detach {
        id: ConnectionId,
    },
    Stats {
        reply: oneshot::Sender<RelayStats>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Cloneable entry point into a running hub.
#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::UnboundedSender<RelayEvent>,
    next_id: Arc<AtomicU64>,
}

impl RelayHandle {
    /// Starts a hub task owning a fresh relay.
    pub fn spawn(config: RelayConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_hub(RelayServer::new(config), rx));
        let handle = Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (handle, task)
    }

    /// Registers a connection and returns the id to tag its later events with.
    pub fn attach(&self, role: Role, outbound: Outbound) -> Result<ConnectionId, RelayError> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.post(RelayEvent::Attach { id, role, outbound })?;
        Ok(id)
    }

    pub fn frame(&self, id: ConnectionId, text: String) -> Result<(), RelayError> {
        self.post(RelayEvent::Frame { id, text })
    }

    pub fn transport_error(&self, id: ConnectionId, error: String) -> Result<(), RelayError> {
        self.post(RelayEvent::TransportError { id, error })
    }

    pub fn detach(&self, id: ConnectionId) -> Result<(), RelayError> {
        self.post(RelayEvent::Detach { id })
    }

    pub async fn stats(&self) -> Result<RelayStats, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.post(RelayEvent::Stats { reply })?;
        rx.await.map_err(|_| RelayError::Stopped)
    }

    /// Tears the relay down and stops the hub. Returns once every connection
    /// has been asked to close; later calls return immediately.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.post(RelayEvent::Shutdown { done }).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    fn post(&self, event: RelayEvent) -> Result<(), RelayError> {
        self.tx.send(event).map_err(|_| RelayError::Stopped)
    }
}

async fn run_hub(mut relay: RelayServer, mut rx: mpsc::UnboundedReceiver<RelayEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            RelayEvent::Attach { id, role, outbound } => relay.attach(id, role, outbound),
            RelayEvent::Frame { id, text } => {
                let routed = relay.handle_text(id, &text);
                debug!(connection = %id, ?routed, "frame routed");
            }
            RelayEvent::TransportError { id, error } => relay.transport_error(id, &error),
            RelayEvent::Detach { id } => relay.detach(id),
            RelayEvent::Stats { reply } => {
                let _ = reply.send(relay.stats());
            }
            RelayEvent::Shutdown { done } => {
                relay.teardown();
                rx.close();
                let _ = done.send(());
                break;
            }
        }
    }
    relay.teardown();
    info!("console relay hub stopped");
}
