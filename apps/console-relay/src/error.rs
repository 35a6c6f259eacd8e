use thiserror::Error;

use crate::registry::ConnectionId;

/// An outbound frame that could not be handed to its connection.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
    #[error("connection {0} is not registered")]
    Unknown(ConnectionId),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors surfaced by [`crate::hub::RelayHandle`].
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay hub has stopped")]
    Stopped,
}
