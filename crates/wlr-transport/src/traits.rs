//! Transport traits and the events pushed up to the session.

use async_trait::async_trait;
use bytes::Bytes;

use wlr_proto::ResponseEnvelope;

use crate::connection::ConnectionState;

/// Server push delivered to the session, in arrival order.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionEvent {
    /// The counterpart joined (`true`) or the bridge reports no link (`false`).
    Linked(bool),
    AccountUpdated(String),
    ChainUpdated { chain_id: u64, json_rpc_url: String },
    MetadataUpdated { key: String, value: String },
    ResponseMessage(ResponseEnvelope),
    /// The session was destroyed, by us in another tab or by the wallet.
    Destroyed,
    /// The channel dropped; a reconnect may follow.
    ConnectionLost,
}

/// Duplex channel used by the session core.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Open and authenticate; a no-op when already authenticated.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Publish one serialized request envelope; resolves once the bridge acks.
    async fn send(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Write a session metadata entry on the bridge.
    async fn set_metadata(&self, key: &str, value: &str) -> Result<(), TransportError>;

    /// Close for good; no reconnect follows.
    async fn disconnect(&self);

    fn state(&self) -> ConnectionState;
}

/// Raw text channel to the bridge (a WebSocket in production).
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    async fn open(&self) -> Result<(), TransportError>;

    async fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Next inbound frame; `Ok(None)` once the peer closed.
    async fn recv_text(&self) -> Result<Option<String>, TransportError>;

    async fn close(&self);
}

/// Common transport error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Transport disconnected")]
    Disconnected,

    #[error("Operation timed out")]
    Timeout,

    #[error("Session is not authenticated with the bridge")]
    NotAuthenticated,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Bridge rejected the message: {0}")]
    Rejected(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Codec(e.to_string())
    }
}
