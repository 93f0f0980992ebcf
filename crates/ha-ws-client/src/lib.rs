//! Home Assistant WebSocket client for ha-multi-click
//!
//! Speaks the subset of the WebSocket API a button bridge needs: service
//! calls, trigger subscriptions, fired events and pings.
//!
//! - [`Connector`] opens an authenticated [`Transport`]; [`WsConnector`] is
//!   the real one.
//! - [`Connection`] is a handle to the actor owning that transport.
//! - [`ConnectionManager`] retries connecting and runs the readiness probe.
//!
//! # Example
//!
//! ```ignore
//! use ha_ws_client::{ConnectMode, ConnectionManager, WsConnector};
//!
//! let manager = ConnectionManager::new(WsConnector::new(url, token));
//! let (connection, events) = manager.connect(ConnectMode::Initial).await?;
//! connection.call_service(action).await?;
//! ```

mod connection;
mod error;
mod manager;
mod transport;
mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use connection::{
    Connection, ConnectionEvent, ConnectionOptions, ReconnectPolicy, SubscribeOptions,
    SubscriptionHandle, SubscriptionKey,
};
pub use error::{ClientError, ClientResult};
pub use manager::{ConnectMode, ConnectionManager, ConnectionSettings};
pub use transport::{websocket_url, Connector, Transport, WsConnector, CHANNEL_CAPACITY};
pub use types::{
    AuthMessage, ErrorInfo, IncomingMessage, OutgoingMessage, Request, SubscriptionEvent,
};
