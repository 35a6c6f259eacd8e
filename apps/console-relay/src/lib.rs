//! Development console relay.
//!
//! Browser pages open a socket under the configured prefix and stream their
//! console output; viewers attach at `<prefix>/viewer`, receive a replay of
//! recent records plus the live feed, and can run code on any listed page.

pub mod app;
pub mod buffer;
pub mod cli;
pub mod config;
pub mod console;
pub mod directory;
pub mod error;
pub mod execute;
pub mod handlers;
pub mod hub;
pub mod outbound;
pub mod registry;
pub mod relay;
pub mod router;
pub mod websocket;

pub use config::ServerConfig;
pub use error::{DeliveryError, RelayError};
pub use hub::RelayHandle;
pub use relay::{RelayConfig, RelayServer, ResultDelivery};
