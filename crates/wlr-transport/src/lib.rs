//! Transport layer for the wallet link relay.
//!
//! The session core only sees [`RelayTransport`]: connect, send a frame,
//! write session metadata, disconnect, plus a stream of
//! [`ConnectionEvent`]s. [`RelayConnection`] implements it on top of any
//! text [`Channel`] (WebSocket in production, in-memory in tests) and
//! drives the `Disconnected → Connecting → Connected → Authenticated`
//! state machine, reconnecting with backoff when the channel drops.

pub mod config;
pub mod connection;
pub mod relay;
pub mod testing;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use config::*;
pub use connection::*;
pub use relay::*;
pub use testing::*;
pub use traits::*;

#[cfg(feature = "websocket")]
pub use websocket::*;
