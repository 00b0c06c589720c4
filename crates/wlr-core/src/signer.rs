//! Signer session: handshake, encrypted requests and the receive path.
//!
//! ```text
//! Idle ──handshake()──▶ Handshaking ──value──▶ Authenticated
//!  ▲                        │                      │
//!  └──failure / error arm───┘                      │
//!                                                  ▼
//!                      Disconnected ◀──disconnect() / Destroyed
//! ```
//!
//! Requests run concurrently while `Authenticated`. Every request is
//! registered in the [`PendingRequestTable`] before it is sent; the
//! receive path removes the entry, decrypts, applies side effects and only
//! then completes the caller, so side-channel updates land in arrival order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use wlr_crypto::{
    decrypt_content, encrypt_content, export_key_to_hex, import_key_from_hex, random_id,
    PublicKey,
};
use wlr_proto::relay::metadata;
use wlr_proto::validation::validate_response_envelope;
use wlr_proto::{
    AppMetadata, DecryptedPayload, EncryptedData, EncryptedRequest, HandshakePayload,
    RequestContent, RequestEnvelope, ResponseContent, ResponseEnvelope, RpcRequest, RpcResult,
    SideChannelData,
};
use wlr_transport::{parse_chain_id, ConnectionEvent, RelayTransport};

use crate::config::SessionConfig;
use crate::errors::SignerError;
use crate::keystore::KeyStore;
use crate::pending::{PendingEntry, PendingOutcome, PendingRequestTable};
use crate::session_store::{SessionIdentity, SessionStore};
use crate::storage::{keys, ScopedStorage, Storage};

/// Pending-table method name for the handshake, kept apart from
/// `eth_requestAccounts` so account pushes never complete it.
const HANDSHAKE_ENTRY: &str = "__handshake";

const EVENT_CAPACITY: usize = 64;

pub mod methods {
    pub const ETH_ACCOUNTS: &str = "eth_accounts";
    pub const ETH_CHAIN_ID: &str = "eth_chainId";
    pub const ETH_REQUEST_ACCOUNTS: &str = "eth_requestAccounts";
    pub const WALLET_SWITCH_CHAIN: &str = "wallet_switchEthereumChain";
    pub const WALLET_GET_CAPABILITIES: &str = "wallet_getCapabilities";
}

/// Signer session state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignerState {
    Idle,
    Handshaking,
    Authenticated,
    Disconnected,
}

impl std::fmt::Display for SignerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignerState::Idle => write!(f, "Idle"),
            SignerState::Handshaking => write!(f, "Handshaking"),
            SignerState::Authenticated => write!(f, "Authenticated"),
            SignerState::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Notifications for the embedding page.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    AccountsChanged(Vec<String>),
    ChainChanged {
        chain_id: u64,
        json_rpc_url: Option<String>,
    },
    Disconnected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveChain {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
}

#[derive(Debug)]
struct SessionCache {
    accounts: Vec<String>,
    chain: ActiveChain,
    chains: BTreeMap<u64, String>,
    capabilities: Option<Value>,
    linked: bool,
    unlinked_error: bool,
}

/// A request that has been sent (or answered locally) but not awaited.
pub struct RequestHandle {
    id: Option<String>,
    inner: HandleInner,
}

enum HandleInner {
    Ready(PendingOutcome),
    Waiting {
        rx: oneshot::Receiver<PendingOutcome>,
        table: Arc<PendingRequestTable>,
        timeout: Option<Duration>,
    },
}

impl RequestHandle {
    fn ready(outcome: PendingOutcome) -> Self {
        Self {
            id: None,
            inner: HandleInner::Ready(outcome),
        }
    }

    /// Correlation id; `None` when the request was answered locally.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Wait for the response.
    pub async fn response(self) -> Result<Value, SignerError> {
        match self.inner {
            HandleInner::Ready(outcome) => outcome,
            HandleInner::Waiting { rx, table, timeout } => {
                let id = self.id.unwrap_or_default();
                wait_outcome(rx, &table, &id, timeout).await
            }
        }
    }
}

async fn wait_outcome(
    mut rx: oneshot::Receiver<PendingOutcome>,
    table: &PendingRequestTable,
    id: &str,
    timeout: Option<Duration>,
) -> PendingOutcome {
    let received = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut rx).await {
            Ok(received) => received,
            Err(_) => {
                if table.take(id).is_some() {
                    tracing::debug!(request_id = %id, "request timed out");
                    return Err(SignerError::Timeout);
                }
                // The entry was already taken; its outcome is on the way.
                rx.await
            }
        },
        None => rx.await,
    };
    received.unwrap_or_else(|_| Err(SignerError::disconnected()))
}

/// One page-side session with a remote signer.
pub struct SignerSession {
    config: SessionConfig,
    identity: SessionIdentity,
    storage: ScopedStorage,
    keystore: KeyStore,
    session_store: SessionStore,
    pending: Arc<PendingRequestTable>,
    transport: Arc<dyn RelayTransport>,
    state: Mutex<SignerState>,
    cache: Mutex<SessionCache>,
    events: broadcast::Sender<SessionEvent>,
    torn_down: AtomicBool,
}

impl SignerSession {
    /// Load the stored identity for `config.storage_scope`, creating one
    /// if none exists. The bridge credentials derive from it.
    pub fn resume_identity(
        config: &SessionConfig,
        backend: Arc<dyn Storage>,
    ) -> Result<SessionIdentity, SignerError> {
        let storage = ScopedStorage::new(config.storage_scope.clone(), backend);
        Ok(SessionStore::new(storage).load_or_create()?)
    }

    /// Build a session. Cached accounts, chain and keys are restored from
    /// storage; with a usable shared secret the session starts
    /// `Authenticated` and no new handshake is needed.
    pub fn new(
        config: SessionConfig,
        backend: Arc<dyn Storage>,
        identity: SessionIdentity,
        transport: Arc<dyn RelayTransport>,
    ) -> Result<Arc<Self>, SignerError> {
        let storage = ScopedStorage::new(config.storage_scope.clone(), backend);
        let keystore = KeyStore::new(storage.clone(), config.degenerate_secret_policy);
        let session_store = SessionStore::new(storage.clone());

        let accounts: Vec<String> = storage.get_json(keys::ADDRESSES)?.unwrap_or_default();
        let chain = storage
            .get_json::<ActiveChain>(keys::ACTIVE_CHAIN)?
            .unwrap_or(ActiveChain {
                id: config.default_chain_id,
                rpc_url: None,
            });
        let chains: BTreeMap<u64, String> =
            storage.get_json(keys::WALLET_CHAINS)?.unwrap_or_default();
        let capabilities: Option<Value> = storage.get_json(keys::WALLET_CAPABILITIES)?;

        let state = match keystore.shared_secret() {
            Ok(Some(_)) => SignerState::Authenticated,
            Ok(None) => SignerState::Idle,
            Err(e) => {
                tracing::warn!(error = %e, "stored keys unusable, a new handshake is required");
                SignerState::Idle
            }
        };
        tracing::info!(session_id = %identity.id, %state, "signer session ready");

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let linked = identity.linked;
        Ok(Arc::new(Self {
            config,
            identity,
            storage,
            keystore,
            session_store,
            pending: Arc::new(PendingRequestTable::new()),
            transport,
            state: Mutex::new(state),
            cache: Mutex::new(SessionCache {
                accounts,
                chain,
                chains,
                capabilities,
                linked,
                unlinked_error: false,
            }),
            events,
            torn_down: AtomicBool::new(false),
        }))
    }

    // ------------------------------------------------------------------------
    // Getters
    // ------------------------------------------------------------------------

    pub fn state(&self) -> SignerState {
        *self.state.lock()
    }

    pub fn session_id(&self) -> &str {
        &self.identity.id
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn accounts(&self) -> Vec<String> {
        self.cache.lock().accounts.clone()
    }

    pub fn active_chain(&self) -> ActiveChain {
        self.cache.lock().chain.clone()
    }

    pub fn is_linked(&self) -> bool {
        self.cache.lock().linked
    }

    /// Cached accounts exist but the bridge reports the session unlinked.
    pub fn unlinked_error_state(&self) -> bool {
        self.cache.lock().unlinked_error
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn own_public_key(&self) -> Result<PublicKey, SignerError> {
        Ok(self.keystore.own_public_key()?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Open the transport without a handshake, for a session resumed
    /// from storage.
    pub async fn connect(&self) -> Result<(), SignerError> {
        self.transport.connect().await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Handshake
    // ------------------------------------------------------------------------

    /// Exchange public keys with the signer and obtain its accounts,
    /// announcing the configured app metadata.
    pub async fn handshake(&self) -> Result<Vec<String>, SignerError> {
        self.handshake_with(self.config.app_metadata()).await
    }

    pub async fn handshake_with(&self, metadata: AppMetadata) -> Result<Vec<String>, SignerError> {
        let resumed = {
            let mut state = self.state.lock();
            match *state {
                SignerState::Idle => {
                    *state = SignerState::Handshaking;
                    false
                }
                SignerState::Handshaking => {
                    return Err(SignerError::InvalidState(
                        "handshake already in progress".to_string(),
                    ));
                }
                // The identity was destroyed with the session; a new one
                // needs a new SignerSession.
                SignerState::Disconnected => {
                    return Err(SignerError::InvalidState(
                        "session was disconnected".to_string(),
                    ));
                }
                SignerState::Authenticated => true,
            }
        };
        if resumed {
            // A session restored from storage has keys but no open transport.
            self.transport.connect().await?;
            return Ok(self.accounts());
        }

        let result = self.run_handshake(metadata).await;
        match &result {
            Ok(accounts) => {
                let mut state = self.state.lock();
                if *state != SignerState::Handshaking {
                    return Err(SignerError::disconnected());
                }
                *state = SignerState::Authenticated;
                tracing::info!(accounts = accounts.len(), "handshake complete");
            }
            Err(e) => {
                let mut state = self.state.lock();
                if *state == SignerState::Handshaking {
                    *state = SignerState::Idle;
                }
                tracing::warn!(error = %e, "handshake failed");
            }
        }
        result
    }

    async fn run_handshake(&self, metadata: AppMetadata) -> Result<Vec<String>, SignerError> {
        self.transport.connect().await?;

        let own = self.keystore.own_public_key()?;
        let envelope = RequestEnvelope {
            id: random_id()?,
            sender: export_key_to_hex(&own),
            content: RequestContent::Handshake(HandshakePayload::new(metadata)),
            timestamp: now_millis(),
        };

        let handle = self.post_request(envelope, HANDSHAKE_ENTRY, Value::Null)?;
        let value = handle.response().await?;
        accounts_from_value(&value).ok_or_else(|| {
            SignerError::Decode(format!("handshake result is not an account list: {value}"))
        })
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Issue one RPC call and wait for its result.
    pub async fn request(&self, request: RpcRequest) -> Result<Value, SignerError> {
        self.send_request(request).await?.response().await
    }

    /// Issue one RPC call; the returned handle carries the id needed for
    /// [`cancel`](Self::cancel).
    pub async fn send_request(&self, request: RpcRequest) -> Result<RequestHandle, SignerError> {
        if let Some(outcome) = self.answer_locally(&request) {
            tracing::debug!(method = %request.method, "answered locally");
            return Ok(RequestHandle::ready(outcome));
        }

        let secret = self
            .keystore
            .shared_secret()?
            .ok_or(SignerError::Unauthorized)?;
        let own = self.keystore.own_public_key()?;

        let chain_id = self.cache.lock().chain.id;
        let method = request.method.clone();
        let params = request.params.clone();
        let sealed = encrypt_content(
            &EncryptedRequest {
                action: request,
                chain_id,
            },
            &secret,
        )?;

        let envelope = RequestEnvelope {
            id: random_id()?,
            sender: export_key_to_hex(&own),
            content: RequestContent::Encrypted(sealed),
            timestamp: now_millis(),
        };
        tracing::debug!(request_id = %envelope.id, %method, "sending request");
        let handle = self.post_request(envelope, &method, params)?;
        Ok(handle)
    }

    /// Register, then send. A failed send resolves the entry with the
    /// transport error instead of leaving it pending.
    fn post_request(
        &self,
        envelope: RequestEnvelope,
        method: &str,
        params: Value,
    ) -> Result<RequestHandle, SignerError> {
        let frame = Bytes::from(serde_json::to_vec(&envelope)?);
        let rx = self.pending.register(&envelope.id, method, params)?;

        let transport = self.transport.clone();
        let table = self.pending.clone();
        let id = envelope.id.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.send(frame).await {
                tracing::warn!(request_id = %id, error = %e, "send failed");
                table.resolve(&id, Err(SignerError::Transport(e)));
            }
        });

        Ok(RequestHandle {
            id: Some(envelope.id),
            inner: HandleInner::Waiting {
                rx,
                table: self.pending.clone(),
                timeout: self.config.request_timeout(),
            },
        })
    }

    fn answer_locally(&self, request: &RpcRequest) -> Option<PendingOutcome> {
        match request.method.as_str() {
            methods::WALLET_SWITCH_CHAIN => {
                let chain_id = requested_chain_id(&request.params)?;
                let known = {
                    let cache = self.cache.lock();
                    match cache.chains.get(&chain_id) {
                        Some(url) => Some(Some(url.clone())),
                        None if cache.chain.id == chain_id => Some(cache.chain.rpc_url.clone()),
                        None => None,
                    }
                };
                let url = known?;
                self.update_chain(chain_id, url);
                Some(Ok(Value::Null))
            }
            methods::WALLET_GET_CAPABILITIES => {
                self.cache.lock().capabilities.clone().map(Ok)
            }
            _ if self.state() != SignerState::Authenticated => None,
            methods::ETH_CHAIN_ID => Some(Ok(json!(format!("0x{:x}", self.cache.lock().chain.id)))),
            methods::ETH_ACCOUNTS => Some(Ok(json!(self.cache.lock().accounts))),
            // With no cached account the wallet is asked, and an account
            // push may answer first.
            methods::ETH_REQUEST_ACCOUNTS => {
                let cache = self.cache.lock();
                (!cache.accounts.is_empty()).then(|| Ok(json!(cache.accounts)))
            }
            _ => None,
        }
    }

    /// Fail one outstanding request locally. The signer is not told and a
    /// late response is dropped as unmatched.
    pub fn cancel(&self, id: &str) -> bool {
        self.pending.cancel(id)
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Tear the session down. Safe to call more than once.
    pub async fn disconnect(&self) {
        self.teardown(true).await;
    }

    async fn teardown(&self, notify_bridge: bool) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let cancelled = self.pending.cancel_all(SignerError::disconnected());
        *self.state.lock() = SignerState::Disconnected;
        tracing::info!(session_id = %self.identity.id, cancelled, "tearing down session");

        // Another tab may already own a newer session in the shared scope.
        let current = match self.session_store.clear_if_current(&self.identity.id) {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!(error = %e, "failed to clear session storage");
                false
            }
        };
        if current {
            if let Err(e) = self.keystore.clear() {
                tracing::warn!(error = %e, "failed to clear key store");
            }
        } else {
            self.keystore.discard();
        }

        {
            let mut cache = self.cache.lock();
            cache.accounts.clear();
            cache.capabilities = None;
            cache.linked = false;
            cache.unlinked_error = false;
        }

        if notify_bridge {
            let notify = self.transport.set_metadata(metadata::DESTROYED, "1");
            match tokio::time::timeout(self.config.destroy_notify_timeout(), notify).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "destroy notification failed"),
                Err(_) => tracing::debug!("destroy notification timed out"),
            }
        }
        self.transport.disconnect().await;
        let _ = self.events.send(SessionEvent::Disconnected);
    }

    // ------------------------------------------------------------------------
    // Receive path
    // ------------------------------------------------------------------------

    /// Apply one transport push.
    pub async fn handle_event(&self, event: ConnectionEvent) {
        // Teardown already cleared the scope; late pushes must not refill it.
        if self.is_torn_down() {
            tracing::debug!(?event, "ignoring event after teardown");
            return;
        }
        match event {
            ConnectionEvent::Linked(linked) => self.on_linked(linked),
            ConnectionEvent::AccountUpdated(address) => self.on_account(address),
            ConnectionEvent::ChainUpdated {
                chain_id,
                json_rpc_url,
            } => {
                self.update_chain(chain_id, Some(json_rpc_url));
            }
            ConnectionEvent::MetadataUpdated { key, value } => {
                if let Err(e) = self.storage.set(&key, &value) {
                    tracing::warn!(%key, error = %e, "failed to store metadata");
                }
            }
            ConnectionEvent::ResponseMessage(envelope) => self.on_response(envelope),
            ConnectionEvent::Destroyed => {
                tracing::info!(session_id = %self.identity.id, "session destroyed remotely");
                self.teardown(false).await;
            }
            ConnectionEvent::ConnectionLost => {
                let cancelled = self
                    .pending
                    .cancel_all(SignerError::Disconnected("connection lost".to_string()));
                tracing::warn!(cancelled, "connection lost");
            }
        }
    }

    /// Drive [`handle_event`](Self::handle_event) until the transport's
    /// event stream ends.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        tracing::debug!("transport event stream ended");
    }

    pub fn spawn(
        self: &Arc<Self>,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.clone().run(events))
    }

    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    fn on_linked(&self, linked: bool) {
        if linked {
            if let Err(e) = self.session_store.mark_linked(true) {
                tracing::warn!(error = %e, "failed to persist link state");
            }
        }
        let mut cache = self.cache.lock();
        let was_linked = cache.linked;
        if linked {
            cache.linked = true;
        }
        cache.unlinked_error = !linked && was_linked && !cache.accounts.is_empty();
        if cache.unlinked_error {
            tracing::warn!("bridge reports session unlinked while accounts are cached");
        }
    }

    fn on_account(&self, address: String) {
        self.set_accounts(vec![address.clone()]);
        let resolved = self
            .pending
            .resolve_method(methods::ETH_REQUEST_ACCOUNTS, json!([address]));
        if resolved > 0 {
            tracing::debug!(resolved, "account push fulfilled pending account requests");
        }
    }

    fn on_response(&self, envelope: ResponseEnvelope) {
        let request_id = envelope.request_id.clone();

        if let Err(e) = validate_response_envelope(&envelope) {
            if self.pending.contains(&request_id) {
                self.pending
                    .resolve(&request_id, Err(SignerError::Decode(e.to_string())));
            } else {
                tracing::debug!(%request_id, error = %e, "dropping malformed response");
            }
            return;
        }

        let Some(entry) = self.pending.take(&request_id) else {
            tracing::debug!(%request_id, "unmatched response");
            return;
        };

        let outcome = if entry.method == HANDSHAKE_ENTRY {
            self.complete_handshake(envelope)
        } else {
            self.complete_request(&entry, envelope)
        };
        if !entry.complete(outcome) {
            tracing::debug!(%request_id, "caller stopped waiting");
        }
    }

    fn complete_handshake(&self, envelope: ResponseEnvelope) -> PendingOutcome {
        let data = match envelope.content {
            ResponseContent::Failure(e) => return Err(SignerError::Protocol(e)),
            ResponseContent::Encrypted(data) => data,
        };

        let peer: PublicKey = import_key_from_hex(&envelope.sender)?;
        self.keystore.set_peer_public_key(peer)?;
        let payload = match self.decrypt_payload(&data) {
            Ok(payload) => payload,
            Err(e) => {
                self.forget_peer();
                return Err(e);
            }
        };

        match payload.result {
            RpcResult::Error(e) => {
                self.forget_peer();
                Err(SignerError::Rpc(e))
            }
            RpcResult::Value(value) => {
                if let Some(accounts) = accounts_from_value(&value) {
                    self.set_accounts(accounts);
                }
                Ok(value)
            }
        }
    }

    fn complete_request(&self, entry: &PendingEntry, envelope: ResponseEnvelope) -> PendingOutcome {
        let data = match envelope.content {
            ResponseContent::Failure(e) => return Err(SignerError::Protocol(e)),
            ResponseContent::Encrypted(data) => data,
        };
        let payload = self.decrypt_payload(&data)?;

        match payload.result {
            RpcResult::Error(e) => Err(SignerError::Rpc(e)),
            RpcResult::Value(value) => {
                self.apply_result(&entry.method, &entry.params, &value);
                Ok(value)
            }
        }
    }

    /// Decrypt and merge side-channel data, whatever the result arm.
    fn decrypt_payload(&self, data: &EncryptedData) -> Result<DecryptedPayload, SignerError> {
        let secret = self
            .keystore
            .shared_secret()?
            .ok_or(SignerError::Unauthorized)?;
        let payload: DecryptedPayload = decrypt_content(data, &secret)?;
        if let Some(side) = &payload.data {
            self.merge_side_channel(side);
        }
        Ok(payload)
    }

    fn forget_peer(&self) {
        if let Err(e) = self.keystore.forget_peer() {
            tracing::warn!(error = %e, "failed to forget peer key");
        }
    }

    fn apply_result(&self, method: &str, params: &Value, value: &Value) {
        match method {
            methods::ETH_REQUEST_ACCOUNTS => {
                if let Some(accounts) = accounts_from_value(value) {
                    self.set_accounts(accounts);
                }
            }
            // `null` is success for a chain switch.
            methods::WALLET_SWITCH_CHAIN if value.is_null() => {
                if let Some(chain_id) = requested_chain_id(params) {
                    let url = self.cache.lock().chains.get(&chain_id).cloned();
                    self.update_chain(chain_id, url);
                }
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------------
    // Cache updates
    // ------------------------------------------------------------------------

    fn merge_side_channel(&self, side: &SideChannelData) {
        let mut cache = self.cache.lock();
        if let Some(chains) = &side.chains {
            cache.chains = chains.clone();
            if let Err(e) = self.storage.set_json(keys::WALLET_CHAINS, chains) {
                tracing::warn!(error = %e, "failed to store wallet chains");
            }
        }
        if let Some(capabilities) = &side.capabilities {
            cache.capabilities = Some(capabilities.clone());
            if let Err(e) = self.storage.set_json(keys::WALLET_CAPABILITIES, capabilities) {
                tracing::warn!(error = %e, "failed to store wallet capabilities");
            }
        }
    }

    fn set_accounts(&self, accounts: Vec<String>) {
        if self.is_torn_down() {
            return;
        }
        {
            let mut cache = self.cache.lock();
            if cache.accounts == accounts {
                return;
            }
            cache.accounts = accounts.clone();
        }
        if let Err(e) = self.storage.set_json(keys::ADDRESSES, &accounts) {
            tracing::warn!(error = %e, "failed to store accounts");
        }
        let _ = self.events.send(SessionEvent::AccountsChanged(accounts));
    }

    /// Distinct-until-changed on `(id, url)`.
    fn update_chain(&self, chain_id: u64, rpc_url: Option<String>) {
        let chain = ActiveChain {
            id: chain_id,
            rpc_url,
        };
        if self.is_torn_down() {
            return;
        }
        {
            let mut cache = self.cache.lock();
            if cache.chain == chain {
                return;
            }
            cache.chain = chain.clone();
        }
        if let Err(e) = self.storage.set_json(keys::ACTIVE_CHAIN, &chain) {
            tracing::warn!(error = %e, "failed to store active chain");
        }
        tracing::debug!(chain_id, "active chain changed");
        let _ = self.events.send(SessionEvent::ChainChanged {
            chain_id: chain.id,
            json_rpc_url: chain.rpc_url,
        });
    }
}

impl std::fmt::Debug for SignerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerSession")
            .field("session_id", &self.identity.id)
            .field("state", &self.state())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn accounts_from_value(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// `params[0].chainId`, as a hex/decimal string or a number.
/// `chainId` of the first param, as a hex/decimal string or a number.
pub(crate) fn requested_chain_id(params: &Value) -> Option<u64> {
    let raw = params.get(0)?.get("chainId")?;
    match raw {
        Value::String(s) => parse_chain_id(s),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use wlr_transport::MockTransport;

    fn session() -> (Arc<SignerSession>, Arc<MockTransport>) {
        let backend: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let config = SessionConfig::default();
        let identity = SignerSession::resume_identity(&config, backend.clone()).unwrap();
        let (transport, _events) = MockTransport::new();
        let transport = Arc::new(transport);
        let session =
            SignerSession::new(config, backend, identity, transport.clone()).unwrap();
        (session, transport)
    }

    #[test]
    fn test_requested_chain_id() {
        assert_eq!(requested_chain_id(&json!([{ "chainId": "0x89" }])), Some(137));
        assert_eq!(requested_chain_id(&json!([{ "chainId": 10 }])), Some(10));
        assert_eq!(requested_chain_id(&json!([])), None);
    }

    #[test]
    fn test_accounts_from_value() {
        assert_eq!(
            accounts_from_value(&json!(["0xa", "0xb"])),
            Some(vec!["0xa".to_string(), "0xb".to_string()])
        );
        assert_eq!(accounts_from_value(&json!([1])), None);
        assert_eq!(accounts_from_value(&json!("0xa")), None);
    }

    #[tokio::test]
    async fn test_request_before_handshake_is_unauthorized() {
        let (session, transport) = session();
        assert_eq!(session.state(), SignerState::Idle);

        let err = session
            .request(RpcRequest::new("personal_sign", json!(["0xdead", "0xabc"])))
            .await
            .unwrap_err();
        assert!(matches!(err, SignerError::Unauthorized));
        assert_eq!(err.to_rpc_error().code, wlr_proto::codes::UNAUTHORIZED);
        assert!(transport.sent_frames().is_empty());
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_linked_transitions() {
        let (session, _transport) = session();
        session.handle_event(ConnectionEvent::Linked(true)).await;
        assert!(session.is_linked());

        // No cached accounts, so an unlink is not an error state.
        session.handle_event(ConnectionEvent::Linked(false)).await;
        assert!(session.is_linked());
        assert!(!session.unlinked_error_state());

        session.set_accounts(vec!["0xabc".into()]);
        session.handle_event(ConnectionEvent::Linked(false)).await;
        assert!(session.unlinked_error_state());

        session.handle_event(ConnectionEvent::Linked(true)).await;
        assert!(!session.unlinked_error_state());
    }

    #[tokio::test]
    async fn test_chain_updates_are_distinct() {
        let (session, _transport) = session();
        let mut events = session.subscribe();

        let update = ConnectionEvent::ChainUpdated {
            chain_id: 8453,
            json_rpc_url: "https://base".into(),
        };
        session.handle_event(update.clone()).await;
        session.handle_event(update).await;

        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::ChainChanged {
                chain_id: 8453,
                json_rpc_url: Some("https://base".into())
            }
        );
        assert!(events.try_recv().is_err());
        assert_eq!(session.active_chain().id, 8453);
    }

    #[tokio::test]
    async fn test_metadata_written_to_storage() {
        let (session, _transport) = session();
        session
            .handle_event(ConnectionEvent::MetadataUpdated {
                key: "WalletUsername".into(),
                value: "alice".into(),
            })
            .await;
        assert_eq!(session.storage.get("WalletUsername").unwrap(), Some("alice".into()));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (session, transport) = session();
        let mut events = session.subscribe();

        session.disconnect().await;
        session.disconnect().await;

        assert_eq!(session.state(), SignerState::Disconnected);
        assert_eq!(transport.disconnect_count(), 1);
        assert_eq!(
            transport.metadata_writes(),
            vec![(metadata::DESTROYED.to_string(), "1".to_string())]
        );
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Disconnected);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_notification_is_bounded() {
        let (session, transport) = session();
        transport.hang_metadata(true);

        session.disconnect().await;
        assert_eq!(session.state(), SignerState::Disconnected);
        assert_eq!(transport.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_remote_destroy_skips_notification() {
        let (session, transport) = session();
        session.handle_event(ConnectionEvent::Destroyed).await;
        assert_eq!(session.state(), SignerState::Disconnected);
        assert!(transport.metadata_writes().is_empty());
        assert_eq!(transport.disconnect_count(), 1);
    }
}
