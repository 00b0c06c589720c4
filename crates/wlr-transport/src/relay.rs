//! Bridge connection: authenticates a session on the relay server and maps
//! its pushes into [`ConnectionEvent`]s.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use wlr_proto::relay::{metadata, ClientMessage, ServerMessage, EVENT_WEB3_REQUEST, EVENT_WEB3_RESPONSE};
use wlr_proto::ResponseEnvelope;

use crate::config::{RelayConfig, SessionCredentials};
use crate::connection::{ConnectionManager, ConnectionState, ConnectionStats, ReconnectionManager};
use crate::traits::{Channel, ConnectionEvent, RelayTransport, TransportError};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// [`RelayTransport`] over a raw text [`Channel`].
pub struct RelayConnection<C: Channel> {
    inner: Arc<Inner<C>>,
}

struct Inner<C: Channel> {
    channel: C,
    credentials: SessionCredentials,
    config: RelayConfig,
    manager: ConnectionManager,
    reconnect: ReconnectionManager,
    next_id: AtomicU32,
    replies: DashMap<u32, oneshot::Sender<ServerMessage>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    connect_lock: tokio::sync::Mutex<()>,
}

impl<C: Channel> RelayConnection<C> {
    /// Returns the connection and the receiver for its pushes.
    pub fn new(
        channel: C,
        credentials: SessionCredentials,
        config: RelayConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let reconnect = ReconnectionManager::new(
            config.max_reconnect_attempts,
            config.base_backoff(),
            config.max_backoff(),
        );
        let inner = Arc::new(Inner {
            channel,
            credentials,
            config,
            manager: ConnectionManager::new(),
            reconnect,
            next_id: AtomicU32::new(1),
            replies: DashMap::new(),
            events,
            reader: Mutex::new(None),
            closed: AtomicBool::new(false),
            connect_lock: tokio::sync::Mutex::new(()),
        });
        (Self { inner }, rx)
    }

    pub fn session_id(&self) -> &str {
        &self.inner.credentials.session_id
    }

    pub fn stats(&self) -> ConnectionStats {
        self.inner.manager.stats()
    }
}

#[async_trait]
impl<C: Channel> RelayTransport for RelayConnection<C> {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.inner.manager.state().is_authenticated() {
            return Ok(());
        }
        self.inner.closed.store(false, Ordering::SeqCst);
        self.inner.reconnect.reset();
        establish(&self.inner).await
    }

    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        let inner = &self.inner;
        if !inner.manager.state().is_authenticated() {
            return Err(TransportError::NotAuthenticated);
        }
        let data = String::from_utf8(frame.to_vec())
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        let msg = ClientMessage::PublishEvent {
            id: inner.next_id(),
            session_id: inner.credentials.session_id.clone(),
            event: EVENT_WEB3_REQUEST.to_string(),
            data,
            call_webhook: true,
        };
        match inner.request(msg).await? {
            ServerMessage::PublishEventOk { .. } => Ok(()),
            ServerMessage::Fail { error, .. } => Err(TransportError::Rejected(error)),
            other => Err(TransportError::Codec(format!("unexpected reply: {other:?}"))),
        }
    }

    async fn set_metadata(&self, key: &str, value: &str) -> Result<(), TransportError> {
        let inner = &self.inner;
        if !inner.manager.state().is_authenticated() {
            return Err(TransportError::NotAuthenticated);
        }
        let mut metadata = BTreeMap::new();
        metadata.insert(key.to_string(), value.to_string());
        let msg = ClientMessage::SetSessionConfig {
            id: inner.next_id(),
            session_id: inner.credentials.session_id.clone(),
            metadata,
        };
        match inner.request(msg).await? {
            ServerMessage::Ok { .. } => Ok(()),
            ServerMessage::Fail { error, .. } => Err(TransportError::Rejected(error)),
            other => Err(TransportError::Codec(format!("unexpected reply: {other:?}"))),
        }
    }

    async fn disconnect(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.reconnect.cancel();
        inner.channel.close().await;
        if let Some(reader) = inner.reader.lock().take() {
            reader.abort();
        }
        inner.replies.clear();
        inner.manager.transition(ConnectionState::Disconnected);
        tracing::debug!(session_id = %inner.credentials.session_id, "bridge connection closed");
    }

    fn state(&self) -> ConnectionState {
        self.inner.manager.state()
    }
}

impl<C: Channel> Drop for RelayConnection<C> {
    fn drop(&mut self) {
        self.inner.reconnect.cancel();
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Some(reader) = self.inner.reader.lock().take() {
            reader.abort();
        }
    }
}

impl<C: Channel> Inner<C> {
    fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn write(&self, msg: &ClientMessage) -> Result<(), TransportError> {
        let text = serde_json::to_string(msg)?;
        self.channel.send_text(text).await?;
        self.manager.record_sent();
        Ok(())
    }

    /// Send and wait for the reply carrying the same id.
    async fn request(&self, msg: ClientMessage) -> Result<ServerMessage, TransportError> {
        let id = msg.id();
        let (tx, rx) = oneshot::channel();
        self.replies.insert(id, tx);

        if let Err(e) = self.write(&msg).await {
            self.replies.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.config.reply_timeout(), rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TransportError::Disconnected),
            Err(_) => {
                self.replies.remove(&id);
                Err(TransportError::Timeout)
            }
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }

    fn dispatch(&self, text: &str) {
        let msg: ServerMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable bridge frame");
                return;
            }
        };

        if let Some(id) = msg.reply_to() {
            match self.replies.remove(&id) {
                Some((_, tx)) => {
                    let _ = tx.send(msg);
                }
                None => tracing::debug!(id, "reply for unknown bridge request"),
            }
            return;
        }

        match msg {
            ServerMessage::Linked { online_guests, .. } => {
                tracing::debug!(online_guests, "counterpart linked");
                self.emit(ConnectionEvent::Linked(true));
            }
            ServerMessage::Event { event, data, .. } if event == EVENT_WEB3_RESPONSE => {
                match serde_json::from_str::<ResponseEnvelope>(&data) {
                    Ok(envelope) => self.emit(ConnectionEvent::ResponseMessage(envelope)),
                    Err(e) => tracing::warn!(error = %e, "malformed response envelope"),
                }
            }
            ServerMessage::Event { event, .. } => {
                tracing::debug!(%event, "ignoring bridge event");
            }
            ServerMessage::SessionConfigUpdated { metadata, .. } => {
                for event in metadata_events(metadata) {
                    self.emit(event);
                }
            }
            _ => {}
        }
    }
}

/// Translate a metadata update into session events.
fn metadata_events(mut entries: BTreeMap<String, String>) -> Vec<ConnectionEvent> {
    let mut events = Vec::new();

    if let Some(flag) = entries.remove(metadata::DESTROYED) {
        if flag == "1" {
            events.push(ConnectionEvent::Destroyed);
            return events;
        }
    }

    if let Some(address) = entries.remove(metadata::ETHEREUM_ADDRESS) {
        events.push(ConnectionEvent::AccountUpdated(address));
    }

    let chain_id = entries.remove(metadata::CHAIN_ID);
    let json_rpc_url = entries.remove(metadata::JSON_RPC_URL);
    if let (Some(raw), Some(json_rpc_url)) = (chain_id, json_rpc_url) {
        match parse_chain_id(&raw) {
            Some(chain_id) => events.push(ConnectionEvent::ChainUpdated {
                chain_id,
                json_rpc_url,
            }),
            None => tracing::warn!(chain_id = %raw, "unparseable chain id"),
        }
    }

    for (key, value) in entries {
        events.push(ConnectionEvent::MetadataUpdated { key, value });
    }
    events
}

/// Decimal or `0x`-prefixed hex.
pub fn parse_chain_id(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

async fn establish<C: Channel>(inner: &Arc<Inner<C>>) -> Result<(), TransportError> {
    let _guard = inner.connect_lock.lock().await;
    if inner.manager.state().is_authenticated() {
        return Ok(());
    }

    inner.manager.transition(ConnectionState::Connecting);
    if let Err(e) = inner.channel.open().await {
        inner.manager.transition(ConnectionState::Disconnected);
        return Err(e);
    }
    inner.manager.transition(ConnectionState::Connected);
    spawn_reader(inner.clone());

    let session_id = inner.credentials.session_id.clone();
    let host = ClientMessage::HostSession {
        id: inner.next_id(),
        session_id: session_id.clone(),
        session_key: inner.credentials.session_key.clone(),
    };
    let failure = match inner.request(host).await {
        Ok(ServerMessage::Ok { .. }) => None,
        Ok(ServerMessage::Fail { error, .. }) => Some(TransportError::Rejected(error)),
        Ok(other) => Some(TransportError::Codec(format!("unexpected reply: {other:?}"))),
        Err(e) => Some(e),
    };
    if let Some(e) = failure {
        abandon_attempt(inner).await;
        return Err(e);
    }
    inner.manager.transition(ConnectionState::Authenticated);
    tracing::info!(%session_id, "session hosted on bridge");

    let is_linked = ClientMessage::IsLinked {
        id: inner.next_id(),
        session_id,
    };
    match inner.request(is_linked).await {
        Ok(ServerMessage::IsLinkedOk { linked, .. }) => inner.emit(ConnectionEvent::Linked(linked)),
        Ok(other) => tracing::debug!(?other, "unexpected IsLinked reply"),
        Err(e) => tracing::warn!(error = %e, "IsLinked query failed"),
    }
    Ok(())
}

/// Stop the reader first so closing the channel is not seen as a drop.
async fn abandon_attempt<C: Channel>(inner: &Arc<Inner<C>>) {
    if let Some(reader) = inner.reader.lock().take() {
        reader.abort();
    }
    inner.channel.close().await;
    inner.replies.clear();
    inner.manager.transition(ConnectionState::Disconnected);
}

fn spawn_reader<C: Channel>(inner: Arc<Inner<C>>) {
    let task_inner = inner.clone();
    let handle = tokio::spawn(read_loop(task_inner));
    if let Some(previous) = inner.reader.lock().replace(handle) {
        previous.abort();
    }
}

async fn read_loop<C: Channel>(inner: Arc<Inner<C>>) {
    loop {
        match inner.channel.recv_text().await {
            Ok(Some(text)) => {
                inner.manager.record_received();
                inner.dispatch(&text);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "bridge read failed");
                break;
            }
        }
    }

    // Dropping the reply senders fails any waiter with Disconnected.
    inner.replies.clear();
    if inner.closed.load(Ordering::SeqCst) {
        return;
    }

    tracing::warn!(session_id = %inner.credentials.session_id, "bridge connection lost");
    inner.emit(ConnectionEvent::ConnectionLost);

    if inner.config.auto_reconnect && !inner.reconnect.is_cancelled() {
        inner.manager.transition(ConnectionState::Reconnecting);
        tokio::spawn(reconnect(inner));
    } else {
        inner.manager.transition(ConnectionState::Disconnected);
    }
}

fn reconnect<C: Channel>(inner: Arc<Inner<C>>) -> BoxFuture {
    Box::pin(async move {
        let result = inner
            .reconnect
            .reconnect(|| {
                let inner = inner.clone();
                async move { establish(&inner).await }
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "giving up on bridge reconnect");
            inner.manager.transition(ConnectionState::Disconnected);
        }
    })
}
