//! In-process wallet counterpart.
//!
//! [`SimulatedWallet`] stands in for bridge and signer at once: frames the
//! session sends are decoded, answered with real X25519/AEAD responses and
//! pushed back as [`ConnectionEvent`]s. Used by the demo binary and the
//! integration tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use wlr_crypto::{
    decrypt_content, derive_shared_secret, encrypt_content, export_key_to_hex,
    generate_key_pair, import_key_from_hex, DegenerateSecretPolicy, KeyPair, PublicKey,
    SymmetricKey,
};
use wlr_proto::{
    DecryptedPayload, EncryptedRequest, RequestContent, RequestEnvelope, ResponseContent,
    ResponseEnvelope, RpcError, RpcRequest, RpcResult, SideChannelData,
};
use wlr_transport::{ConnectionEvent, ConnectionState, RelayTransport, TransportError};

use crate::config::SessionConfig;
use crate::errors::SignerError;
use crate::signer::{methods, requested_chain_id, SignerSession};
use crate::storage::Storage;

/// How the wallet answers the handshake.
#[derive(Clone, Debug)]
pub enum HandshakeBehavior {
    Approve,
    /// Plaintext `failure` envelope.
    Fail(RpcError),
    /// Encrypted `error` result.
    Reject(RpcError),
}

struct WalletState {
    accounts: Vec<String>,
    chain_id: u64,
    chains: BTreeMap<u64, String>,
    capabilities: Option<Value>,
    handshake: HandshakeBehavior,
    scripted: HashMap<String, RpcResult>,
    secret: Option<SymmetricKey>,
    held: VecDeque<ResponseEnvelope>,
    received: Vec<EncryptedRequest>,
    metadata: Vec<(String, String)>,
    connection: ConnectionState,
}

pub struct SimulatedWallet {
    keys: KeyPair,
    state: Mutex<WalletState>,
    events: Mutex<mpsc::UnboundedSender<ConnectionEvent>>,
    received_notify: Notify,
    hold: AtomicBool,
    fail_sends: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl SimulatedWallet {
    /// A wallet holding `accounts`, plus the event stream to hand to
    /// [`SignerSession::spawn`](SignerSession::spawn).
    pub fn new(accounts: Vec<String>) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let wallet = Self {
            keys: generate_key_pair(),
            state: Mutex::new(WalletState {
                accounts,
                chain_id: 1,
                chains: BTreeMap::from([(1, "https://mainnet.example.org".to_string())]),
                capabilities: None,
                handshake: HandshakeBehavior::Approve,
                scripted: HashMap::new(),
                secret: None,
                held: VecDeque::new(),
                received: Vec::new(),
                metadata: Vec::new(),
                connection: ConnectionState::Disconnected,
            }),
            events: Mutex::new(events),
            received_notify: Notify::new(),
            hold: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        };
        (wallet, rx)
    }

    pub fn public_key(&self) -> PublicKey {
        self.keys.public
    }

    // ------------------------------------------------------------------------
    // Scripting
    // ------------------------------------------------------------------------

    pub fn set_handshake(&self, behavior: HandshakeBehavior) {
        self.state.lock().handshake = behavior;
    }

    /// Answer every later `method` call with `result`.
    pub fn respond_with(&self, method: &str, result: RpcResult) {
        self.state.lock().scripted.insert(method.to_string(), result);
    }

    /// Chain map sent as side-channel data with every response.
    pub fn set_chains(&self, chains: BTreeMap<u64, String>) {
        self.state.lock().chains = chains;
    }

    pub fn set_capabilities(&self, capabilities: Value) {
        self.state.lock().capabilities = Some(capabilities);
    }

    /// Queue responses instead of delivering them.
    pub fn hold_responses(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    /// Deliver queued responses, newest first.
    pub fn release_held_reversed(&self) -> usize {
        let held: Vec<ResponseEnvelope> = self.state.lock().held.drain(..).rev().collect();
        let count = held.len();
        for envelope in held {
            self.push(ConnectionEvent::ResponseMessage(envelope));
        }
        count
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Push an arbitrary bridge event.
    pub fn push(&self, event: ConnectionEvent) {
        let _ = self.events.lock().send(event);
    }

    /// Replace the event stream, as when a reloaded page reconnects.
    pub fn reattach(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (events, rx) = mpsc::unbounded_channel();
        *self.events.lock() = events;
        rx
    }

    /// Switch account and tell the session, as the wallet UI would.
    pub fn announce_account(&self, address: &str) {
        self.state.lock().accounts = vec![address.to_string()];
        self.push(ConnectionEvent::AccountUpdated(address.to_string()));
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Decrypted requests received so far.
    pub fn received_requests(&self) -> Vec<EncryptedRequest> {
        self.state.lock().received.clone()
    }

    pub async fn wait_for_requests(&self, n: usize) -> Vec<EncryptedRequest> {
        loop {
            let notified = self.received_notify.notified();
            if self.state.lock().received.len() >= n {
                return self.received_requests();
            }
            notified.await;
        }
    }

    pub fn held_count(&self) -> usize {
        self.state.lock().held.len()
    }

    pub fn metadata_writes(&self) -> Vec<(String, String)> {
        self.state.lock().metadata.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Wallet side of the protocol
    // ------------------------------------------------------------------------

    fn answer(&self, request: RequestEnvelope) -> Result<ResponseEnvelope, TransportError> {
        let content = match request.content {
            RequestContent::Handshake(_) => self.answer_handshake(&request.sender)?,
            RequestContent::Encrypted(data) => {
                let mut state = self.state.lock();
                let secret = state
                    .secret
                    .clone()
                    .ok_or_else(|| TransportError::Other("no handshake yet".to_string()))?;
                let call: EncryptedRequest = decrypt_content(&data, &secret)
                    .map_err(|e| TransportError::Codec(e.to_string()))?;
                let result = Self::execute(&mut state, &call);
                state.received.push(call);
                let payload = Self::with_side_channel(&state, result);
                drop(state);
                self.received_notify.notify_waiters();
                seal(&payload, &secret)?
            }
        };
        Ok(ResponseEnvelope {
            request_id: request.id,
            sender: export_key_to_hex(&self.keys.public),
            content,
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }

    fn answer_handshake(&self, sender: &str) -> Result<ResponseContent, TransportError> {
        let mut state = self.state.lock();
        let result = match state.handshake.clone() {
            HandshakeBehavior::Fail(error) => return Ok(ResponseContent::Failure(error)),
            HandshakeBehavior::Reject(error) => RpcResult::Error(error),
            HandshakeBehavior::Approve => RpcResult::Value(json!(state.accounts)),
        };

        let peer: PublicKey =
            import_key_from_hex(sender).map_err(|e| TransportError::Codec(e.to_string()))?;
        let secret = derive_shared_secret(&self.keys.private, &peer, DegenerateSecretPolicy::Reject)
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        state.secret = Some(secret.clone());

        let payload = Self::with_side_channel(&state, result);
        seal(&payload, &secret)
    }

    fn execute(state: &mut WalletState, call: &EncryptedRequest) -> RpcResult {
        let method = call.action.method.as_str();
        if let Some(result) = state.scripted.get(method) {
            return result.clone();
        }
        match method {
            methods::ETH_REQUEST_ACCOUNTS | methods::ETH_ACCOUNTS => {
                RpcResult::Value(json!(state.accounts))
            }
            methods::ETH_CHAIN_ID => RpcResult::Value(json!(format!("0x{:x}", state.chain_id))),
            methods::WALLET_SWITCH_CHAIN => {
                match requested_chain_id(&call.action.params) {
                    Some(id) if state.chains.contains_key(&id) => {
                        state.chain_id = id;
                        RpcResult::Value(Value::Null)
                    }
                    Some(id) => RpcResult::Error(RpcError::unsupported_chain(id)),
                    None => RpcResult::Error(RpcError::invalid_params("missing chainId")),
                }
            }
            "personal_sign" | "eth_signTypedData_v4" | "eth_sendTransaction" => {
                RpcResult::Value(json!(format!("0x{}", "5a".repeat(65))))
            }
            other => RpcResult::Error(RpcError::unsupported_method(other)),
        }
    }

    fn with_side_channel(state: &WalletState, result: RpcResult) -> DecryptedPayload {
        DecryptedPayload {
            result,
            data: Some(SideChannelData {
                chains: Some(state.chains.clone()),
                capabilities: state.capabilities.clone(),
            }),
        }
    }
}

fn seal(payload: &DecryptedPayload, secret: &SymmetricKey) -> Result<ResponseContent, TransportError> {
    encrypt_content(payload, secret)
        .map(ResponseContent::Encrypted)
        .map_err(|e| TransportError::Codec(e.to_string()))
}

#[async_trait]
impl RelayTransport for SimulatedWallet {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.state.lock().connection = ConnectionState::Authenticated;
        self.push(ConnectionEvent::Linked(true));
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        if !self.state.lock().connection.is_authenticated() {
            return Err(TransportError::NotAuthenticated);
        }
        let request: RequestEnvelope =
            serde_json::from_slice(&frame).map_err(|e| TransportError::Codec(e.to_string()))?;
        tracing::debug!(request_id = %request.id, handshake = request.is_handshake(), "wallet received request");

        let response = self.answer(request)?;
        if self.hold.load(Ordering::SeqCst) {
            self.state.lock().held.push_back(response);
        } else {
            self.push(ConnectionEvent::ResponseMessage(response));
        }
        Ok(())
    }

    async fn set_metadata(&self, key: &str, value: &str) -> Result<(), TransportError> {
        self.state
            .lock()
            .metadata
            .push((key.to_string(), value.to_string()));
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.state.lock().connection = ConnectionState::Disconnected;
    }

    fn state(&self) -> ConnectionState {
        self.state.lock().connection
    }
}

/// Handshake with a fresh simulated wallet and sign one message.
///
/// Returns the accounts from the handshake and the signature.
pub async fn run_signing_flow(
    config: SessionConfig,
    backend: Arc<dyn Storage>,
    accounts: Vec<String>,
) -> Result<(Vec<String>, Value), SignerError> {
    let (wallet, events) = SimulatedWallet::new(accounts);
    let wallet = Arc::new(wallet);
    let identity = SignerSession::resume_identity(&config, backend.clone())?;
    let session = SignerSession::new(config, backend, identity, wallet.clone())?;
    let task = session.spawn(events);

    let result = async {
        let accounts = session.handshake().await?;
        let from = accounts.first().cloned().unwrap_or_default();
        let signature = session
            .request(RpcRequest::new(
                "personal_sign",
                json!(["0x48656c6c6f", from]),
            ))
            .await?;
        Ok::<_, SignerError>((accounts, signature))
    }
    .await;

    session.disconnect().await;
    task.abort();
    result
}
