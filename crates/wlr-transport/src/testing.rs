//! Testing utilities for transport implementations.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use wlr_proto::relay::{ClientMessage, ServerMessage};
use wlr_proto::RequestEnvelope;

use crate::connection::ConnectionState;
use crate::traits::{Channel, ConnectionEvent, RelayTransport, TransportError};

/// Mock transport for testing the session core without a bridge.
pub struct MockTransport {
    sent: Mutex<Vec<Bytes>>,
    metadata: Mutex<Vec<(String, String)>>,
    state: Mutex<ConnectionState>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    sent_notify: Notify,
    fail_sends: AtomicBool,
    hang_metadata: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl MockTransport {
    /// Create a new mock transport and the receiver for injected events
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            sent: Mutex::new(Vec::new()),
            metadata: Mutex::new(Vec::new()),
            state: Mutex::new(ConnectionState::Disconnected),
            events,
            sent_notify: Notify::new(),
            fail_sends: AtomicBool::new(false),
            hang_metadata: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        };
        (transport, rx)
    }

    /// Push an event as if the bridge had sent it
    pub fn inject(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    /// Make every subsequent `send` fail with `Disconnected`
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make `set_metadata` never complete
    pub fn hang_metadata(&self, hang: bool) {
        self.hang_metadata.store(hang, Ordering::SeqCst);
    }

    /// Get sent frames
    pub fn sent_frames(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    /// Sent frames decoded as request envelopes
    pub fn sent_requests(&self) -> Vec<RequestEnvelope> {
        self.sent
            .lock()
            .iter()
            .filter_map(|frame| serde_json::from_slice(frame).ok())
            .collect()
    }

    /// Wait until at least `n` frames were sent, returning them
    pub async fn wait_for_sent(&self, n: usize) -> Vec<RequestEnvelope> {
        loop {
            let notified = self.sent_notify.notified();
            if self.sent.lock().len() >= n {
                return self.sent_requests();
            }
            notified.await;
        }
    }

    pub fn metadata_writes(&self) -> Vec<(String, String)> {
        self.metadata.lock().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayTransport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = ConnectionState::Authenticated;
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        self.sent.lock().push(frame);
        self.sent_notify.notify_waiters();
        Ok(())
    }

    async fn set_metadata(&self, key: &str, value: &str) -> Result<(), TransportError> {
        if self.hang_metadata.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.metadata.lock().push((key.to_string(), value.to_string()));
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = ConnectionState::Disconnected;
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }
}

/// In-memory [`Channel`] whose far end is a scriptable bridge.
pub struct MockChannel {
    bridge: Arc<BridgeState>,
    inbound: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

/// Server side of a [`MockChannel`].
#[derive(Clone)]
pub struct BridgeHandle {
    bridge: Arc<BridgeState>,
}

struct BridgeState {
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    received: Mutex<Vec<ClientMessage>>,
    auto_reply: AtomicBool,
    linked: AtomicBool,
    fail_next_open: AtomicBool,
    host_rejection: Mutex<Option<String>>,
    opens: AtomicUsize,
}

impl MockChannel {
    /// Create a channel and the handle that plays the bridge
    pub fn pair() -> (Self, BridgeHandle) {
        let bridge = Arc::new(BridgeState {
            outbound: Mutex::new(None),
            received: Mutex::new(Vec::new()),
            auto_reply: AtomicBool::new(false),
            linked: AtomicBool::new(false),
            fail_next_open: AtomicBool::new(false),
            host_rejection: Mutex::new(None),
            opens: AtomicUsize::new(0),
        });
        let channel = Self {
            bridge: bridge.clone(),
            inbound: tokio::sync::Mutex::new(None),
        };
        (channel, BridgeHandle { bridge })
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn open(&self) -> Result<(), TransportError> {
        if self.bridge.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed("refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound.lock().await = Some(rx);
        *self.bridge.outbound.lock() = Some(tx);
        self.bridge.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.bridge.outbound.lock().is_none() {
            return Err(TransportError::Disconnected);
        }
        let msg: ClientMessage = serde_json::from_str(&text)?;
        self.bridge.received.lock().push(msg.clone());
        if self.bridge.auto_reply.load(Ordering::SeqCst) {
            let reply = self.bridge.reply_for(&msg);
            self.bridge.deliver(reply);
        }
        Ok(())
    }

    async fn recv_text(&self) -> Result<Option<String>, TransportError> {
        let mut inbound = self.inbound.lock().await;
        match inbound.as_mut() {
            Some(rx) => Ok(rx.recv().await),
            None => Ok(None),
        }
    }

    async fn close(&self) {
        self.bridge.outbound.lock().take();
    }
}

impl BridgeState {
    fn deliver(&self, msg: ServerMessage) {
        let text = match serde_json::to_string(&msg) {
            Ok(text) => text,
            Err(_) => return,
        };
        if let Some(tx) = self.outbound.lock().as_ref() {
            let _ = tx.send(text);
        }
    }

    fn reply_for(&self, msg: &ClientMessage) -> ServerMessage {
        match msg {
            ClientMessage::HostSession { id, session_id, .. } => {
                match self.host_rejection.lock().clone() {
                    Some(error) => ServerMessage::Fail {
                        id: *id,
                        session_id: session_id.clone(),
                        error,
                    },
                    None => ServerMessage::Ok {
                        id: *id,
                        session_id: session_id.clone(),
                    },
                }
            }
            ClientMessage::IsLinked { id, session_id } => ServerMessage::IsLinkedOk {
                id: *id,
                session_id: session_id.clone(),
                linked: self.linked.load(Ordering::SeqCst),
                online_guests: 0,
            },
            ClientMessage::SetSessionConfig { id, session_id, .. } => ServerMessage::Ok {
                id: *id,
                session_id: session_id.clone(),
            },
            ClientMessage::PublishEvent { id, session_id, .. } => ServerMessage::PublishEventOk {
                id: *id,
                session_id: session_id.clone(),
                event_id: format!("evt-{id}"),
            },
        }
    }
}

impl BridgeHandle {
    /// Answer every client message the way a healthy bridge would
    pub fn auto_reply(&self, enabled: bool) {
        self.bridge.auto_reply.store(enabled, Ordering::SeqCst);
    }

    pub fn reject_host_session(&self, error: &str) {
        *self.bridge.host_rejection.lock() = Some(error.to_string());
    }

    /// Value reported in `IsLinkedOK`
    pub fn set_linked(&self, linked: bool) {
        self.bridge.linked.store(linked, Ordering::SeqCst);
    }

    pub fn fail_next_open(&self) {
        self.bridge.fail_next_open.store(true, Ordering::SeqCst);
    }

    /// Push a server message to the client
    pub fn push(&self, msg: ServerMessage) {
        self.bridge.deliver(msg);
    }

    /// Close the connection from the server side
    pub fn drop_connection(&self) {
        self.bridge.outbound.lock().take();
    }

    /// Everything the client sent so far
    pub fn client_messages(&self) -> Vec<ClientMessage> {
        self.bridge.received.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.bridge.opens.load(Ordering::SeqCst)
    }
}
