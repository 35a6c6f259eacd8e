//! The relay's composition root.
//!
//! [`RelayServer`] owns the connection registry, the replay buffer and the
//! pending execute requests. It is a plain state machine: every method is a
//! reaction to one connection event and runs to completion, so it needs no
//! locking. [`crate::hub`] drives it from a single task.

use std::collections::BTreeSet;

use relay_proto::{LogRecord, RelayMessage, Role, MAX_BUFFER_SIZE};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::buffer::ReplayBuffer;
use crate::directory::PageDirectory;
use crate::error::DeliveryError;
use crate::execute::PendingRequests;
use crate::outbound::Outbound;
use crate::registry::{ConnectionId, ConnectionRegistry, PageState};

/// Where execution results go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ResultDelivery {
    /// Every viewer sees every result.
    #[default]
    Broadcast,
    /// A result echoing a known `requestId` goes only to the viewer that asked
    /// for it; anything else is broadcast.
    Requester,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub buffer_capacity: usize,
    pub result_delivery: ResultDelivery,
    pub disambiguator_len: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: MAX_BUFFER_SIZE,
            result_delivery: ResultDelivery::Broadcast,
            disambiguator_len: 8,
        }
    }
}

/// Outcome of a fan-out to many connections.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: Vec<ConnectionId>,
}

/// Point-in-time view of the relay, served on `/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub pages: Vec<String>,
    pub page_connections: usize,
    pub viewer_connections: usize,
    pub buffered_records: usize,
}

pub struct RelayServer {
    pub(crate) config: RelayConfig,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) buffer: ReplayBuffer,
    pub(crate) pending: PendingRequests,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(config.disambiguator_len),
            buffer: ReplayBuffer::new(config.buffer_capacity),
            pending: PendingRequests::new(config.buffer_capacity),
            config,
        }
    }

    /// Registers a new connection. A viewer is immediately sent the replay
    /// buffer, oldest first, followed by the current page directory.
    pub fn attach(&mut self, id: ConnectionId, role: Role, outbound: Outbound) {
        self.registry.register(id, role, outbound);
        match role {
            Role::Page => info!(connection = %id, "logger client connected"),
            Role::Viewer => {
                info!(
                    connection = %id,
                    buffered = self.buffer.len(),
                    "log viewer connected"
                );
                self.backfill(id);
            }
        }
    }

    /// Forgets a connection. Calling it again for the same id does nothing.
    pub fn detach(&mut self, id: ConnectionId) {
        let Some(conn) = self.registry.unregister(id) else {
            debug!(connection = %id, "detach for unknown connection");
            return;
        };
        self.pending.forget_connection(id);
        match conn.page() {
            None => info!(connection = %id, "log viewer disconnected"),
            Some(page) => {
                info!(
                    connection = %id,
                    identity = page.identity().unwrap_or_default(),
                    "logger client disconnected"
                );
                if page.identity().is_some() {
                    self.broadcast_directory();
                }
            }
        }
    }

    /// A transport-level error on one connection. The close that follows is
    /// reported separately.
    pub fn transport_error(&mut self, id: ConnectionId, error: &str) {
        warn!(connection = %id, %error, "websocket connection error");
    }

    /// Closes every connection and clears all state. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        let connections = self.registry.drain();
        if connections.is_empty() && self.buffer.is_empty() {
            return;
        }
        for conn in &connections {
            conn.outbound().close();
        }
        self.buffer.clear();
        self.pending.clear();
        info!(closed = connections.len(), "console relay torn down");
    }

    pub fn stats(&self) -> RelayStats {
        let page_connections = self.registry.all_pages().count();
        RelayStats {
            pages: self.directory().into_iter().collect(),
            page_connections,
            viewer_connections: self.registry.len() - page_connections,
            buffered_records: self.buffer.len(),
        }
    }

    pub fn directory(&self) -> BTreeSet<String> {
        PageDirectory::compute(&self.registry)
    }

    pub fn page(&self, id: ConnectionId) -> Option<&PageState> {
        self.registry.get(id).and_then(|conn| conn.page())
    }

    pub fn replay(&self) -> impl ExactSizeIterator<Item = &LogRecord> {
        self.buffer.snapshot()
    }

    pub(crate) fn send_to(
        &self,
        id: ConnectionId,
        message: &RelayMessage,
    ) -> Result<(), DeliveryError> {
        let conn = self.registry.get(id).ok_or(DeliveryError::Unknown(id))?;
        conn.outbound().send_text(id, message.to_frame()?)
    }

    /// Sends a pre-encoded frame to every viewer. A failing viewer is skipped
    /// and reported; the rest still receive the frame.
    pub(crate) fn broadcast_to_viewers(&self, frame: &str) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for viewer in self.registry.all_viewers() {
            match viewer.outbound().send_text(viewer.id(), frame.to_string()) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!(connection = %viewer.id(), error = %err, "failed to send to viewer");
                    report.failed.push(viewer.id());
                }
            }
        }
        report
    }

    pub(crate) fn broadcast_directory(&self) -> BroadcastReport {
        let message = self.directory_message();
        match message.to_frame() {
            Ok(frame) => self.broadcast_to_viewers(&frame),
            Err(err) => {
                warn!(error = %err, "failed to encode page list");
                BroadcastReport::default()
            }
        }
    }

    fn directory_message(&self) -> RelayMessage {
        RelayMessage::Pages {
            pages: self.directory().into_iter().collect(),
        }
    }

    fn backfill(&self, viewer: ConnectionId) {
        for record in self.buffer.snapshot() {
            if let Err(err) = self.send_to(viewer, &RelayMessage::Log(record.clone())) {
                warn!(connection = %viewer, error = %err, "error sending buffered log to viewer");
                return;
            }
        }
        if let Err(err) = self.send_to(viewer, &self.directory_message()) {
            warn!(connection = %viewer, error = %err, "error sending page list");
        }
    }
}
