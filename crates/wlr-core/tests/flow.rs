//! Integration tests for the signer session against a simulated wallet.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;

use wlr_core::{
    methods, HandshakeBehavior, MemoryStorage, ScopedStorage, SessionConfig, SessionEvent,
    SessionStore, SignerError, SignerSession, SignerState, SimulatedWallet, Storage,
};
use wlr_proto::{codes, RpcError, RpcRequest, RpcResult};
use wlr_transport::{ConnectionEvent, RelayTransport, TransportError};

const ALICE: &str = "0x00000000000000000000000000000000000a11ce";

struct Fixture {
    session: Arc<SignerSession>,
    wallet: Arc<SimulatedWallet>,
    backend: Arc<MemoryStorage>,
    task: JoinHandle<()>,
}

impl Fixture {
    fn new(accounts: Vec<String>) -> Self {
        Self::with_config(SessionConfig::default(), accounts)
    }

    fn with_config(config: SessionConfig, accounts: Vec<String>) -> Self {
        let backend = Arc::new(MemoryStorage::new());
        let (wallet, events) = SimulatedWallet::new(accounts);
        let wallet = Arc::new(wallet);
        let identity = SignerSession::resume_identity(&config, backend.clone()).unwrap();
        let session = SignerSession::new(config, backend.clone(), identity, wallet.clone()).unwrap();
        let task = session.spawn(events);
        Self {
            session,
            wallet,
            backend,
            task,
        }
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn sign(message: &str) -> RpcRequest {
    RpcRequest::new("personal_sign", json!([message, ALICE]))
}

#[tokio::test]
async fn test_handshake_then_request() {
    let f = Fixture::new(vec![ALICE.into()]);
    assert_eq!(f.session.state(), SignerState::Idle);

    let accounts = f.session.handshake().await.unwrap();
    assert_eq!(accounts, vec![ALICE.to_string()]);
    assert_eq!(f.session.state(), SignerState::Authenticated);
    assert_eq!(f.session.accounts(), vec![ALICE.to_string()]);

    let signature = f.session.request(sign("0x68656c6c6f")).await.unwrap();
    assert!(signature.as_str().unwrap().starts_with("0x5a5a"));

    let received = f.wallet.received_requests();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].action.method, "personal_sign");
    assert_eq!(received[0].chain_id, 1);
    assert_eq!(f.session.pending_count(), 0);
}

#[tokio::test]
async fn test_cached_answers_skip_the_wallet() {
    let f = Fixture::new(vec![ALICE.into()]);
    f.wallet.set_capabilities(json!({ "0x1": { "atomic": "supported" } }));
    f.session.handshake().await.unwrap();

    let chain = f
        .session
        .request(RpcRequest::new(methods::ETH_CHAIN_ID, Value::Null))
        .await
        .unwrap();
    assert_eq!(chain, json!("0x1"));

    let accounts = f
        .session
        .request(RpcRequest::new(methods::ETH_REQUEST_ACCOUNTS, json!([])))
        .await
        .unwrap();
    assert_eq!(accounts, json!([ALICE]));

    let capabilities = f
        .session
        .request(RpcRequest::new(methods::WALLET_GET_CAPABILITIES, json!([])))
        .await
        .unwrap();
    assert_eq!(capabilities["0x1"]["atomic"], "supported");

    assert!(f.wallet.received_requests().is_empty());
}

#[tokio::test]
async fn test_handshake_failure_envelope() {
    let f = Fixture::new(vec![ALICE.into()]);
    f.wallet
        .set_handshake(HandshakeBehavior::Fail(RpcError::unauthorized("session unknown")));

    let err = f.session.handshake().await.unwrap_err();
    match &err {
        SignerError::Protocol(e) => assert_eq!(e.code, codes::UNAUTHORIZED),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(f.session.state(), SignerState::Idle);

    // No peer key was learned, so nothing can be encrypted.
    let err = f.session.request(sign("0x00")).await.unwrap_err();
    assert!(matches!(err, SignerError::Unauthorized));
}

#[tokio::test]
async fn test_handshake_error_result_drops_peer_key() {
    let f = Fixture::new(vec![ALICE.into()]);
    f.wallet
        .set_handshake(HandshakeBehavior::Reject(RpcError::user_rejected()));

    let err = f.session.handshake().await.unwrap_err();
    match &err {
        SignerError::Rpc(e) => assert_eq!(e.code, codes::USER_REJECTED),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(f.session.state(), SignerState::Idle);
    assert!(f.session.accounts().is_empty());

    let err = f.session.request(sign("0x00")).await.unwrap_err();
    assert!(matches!(err, SignerError::Unauthorized));

    // A retry after the user approves succeeds.
    f.wallet.set_handshake(HandshakeBehavior::Approve);
    assert_eq!(f.session.handshake().await.unwrap(), vec![ALICE.to_string()]);
}

#[tokio::test]
async fn test_switch_to_known_chain_is_local() {
    let f = Fixture::new(vec![ALICE.into()]);
    f.wallet.set_chains(BTreeMap::from([
        (1, "https://mainnet.example.org".to_string()),
        (8453, "https://base.example.org".to_string()),
    ]));
    f.session.handshake().await.unwrap();
    let mut events = f.session.subscribe();

    let result = f
        .session
        .request(RpcRequest::new(
            methods::WALLET_SWITCH_CHAIN,
            json!([{ "chainId": "0x2105" }]),
        ))
        .await
        .unwrap();
    assert_eq!(result, Value::Null);
    assert!(f.wallet.received_requests().is_empty());

    let active = f.session.active_chain();
    assert_eq!(active.id, 8453);
    assert_eq!(active.rpc_url.as_deref(), Some("https://base.example.org"));
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::ChainChanged {
            chain_id: 8453,
            json_rpc_url: Some("https://base.example.org".into())
        }
    );

    // Later requests carry the new chain.
    f.session.request(sign("0x01")).await.unwrap();
    assert_eq!(f.wallet.received_requests()[0].chain_id, 8453);
}

#[tokio::test]
async fn test_switch_chain_null_result_is_success() {
    let f = Fixture::new(vec![ALICE.into()]);
    f.session.handshake().await.unwrap();
    f.wallet
        .respond_with(methods::WALLET_SWITCH_CHAIN, RpcResult::Value(Value::Null));

    let result = f
        .session
        .request(RpcRequest::new(
            methods::WALLET_SWITCH_CHAIN,
            json!([{ "chainId": "0x89" }]),
        ))
        .await
        .unwrap();
    assert_eq!(result, Value::Null);
    assert_eq!(f.wallet.received_requests().len(), 1);
    assert_eq!(f.session.active_chain().id, 137);
}

#[tokio::test]
async fn test_switch_to_unknown_chain_error() {
    let f = Fixture::new(vec![ALICE.into()]);
    f.session.handshake().await.unwrap();

    let err = f
        .session
        .request(RpcRequest::new(
            methods::WALLET_SWITCH_CHAIN,
            json!([{ "chainId": "0xa" }]),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.to_rpc_error().code, codes::UNSUPPORTED_CHAIN);
    assert_eq!(f.session.active_chain().id, 1);
}

#[tokio::test]
async fn test_switch_to_numeric_chain_id() {
    let f = Fixture::new(vec![ALICE.into()]);
    f.session.handshake().await.unwrap();
    // The wallet learns the chain after the handshake, so the session
    // has to ask.
    f.wallet.set_chains(BTreeMap::from([
        (1, "https://mainnet.example.org".to_string()),
        (10, "https://optimism.example.org".to_string()),
    ]));

    let result = f
        .session
        .request(RpcRequest::new(
            methods::WALLET_SWITCH_CHAIN,
            json!([{ "chainId": 10 }]),
        ))
        .await
        .unwrap();
    assert_eq!(result, Value::Null);
    assert_eq!(f.wallet.received_requests().len(), 1);

    let active = f.session.active_chain();
    assert_eq!(active.id, 10);
    assert_eq!(active.rpc_url.as_deref(), Some("https://optimism.example.org"));
}

#[tokio::test]
async fn test_out_of_order_responses_correlate() {
    let f = Fixture::new(vec![ALICE.into()]);
    f.session.handshake().await.unwrap();
    for (method, value) in [("m_a", "a"), ("m_b", "b"), ("m_c", "c")] {
        f.wallet.respond_with(method, RpcResult::Value(json!(value)));
    }
    f.wallet.hold_responses(true);

    let a = f.session.send_request(RpcRequest::new("m_a", json!([]))).await.unwrap();
    let b = f.session.send_request(RpcRequest::new("m_b", json!([]))).await.unwrap();
    let c = f.session.send_request(RpcRequest::new("m_c", json!([]))).await.unwrap();
    let wallet = f.wallet.clone();
    eventually(move || wallet.held_count() == 3).await;

    assert_eq!(f.wallet.release_held_reversed(), 3);
    assert_eq!(c.response().await.unwrap(), json!("c"));
    assert_eq!(b.response().await.unwrap(), json!("b"));
    assert_eq!(a.response().await.unwrap(), json!("a"));
    assert_eq!(f.session.pending_count(), 0);
}

#[tokio::test]
async fn test_disconnect_drains_pending_and_clears_storage() {
    let f = Fixture::new(vec![ALICE.into()]);
    f.session.handshake().await.unwrap();
    let mut events = f.session.subscribe();
    f.wallet.hold_responses(true);

    let first = f.session.send_request(sign("0x01")).await.unwrap();
    let second = f.session.send_request(sign("0x02")).await.unwrap();
    let wallet = f.wallet.clone();
    eventually(move || wallet.held_count() == 2).await;

    f.session.disconnect().await;

    for handle in [first, second] {
        let err = handle.response().await.unwrap_err();
        assert!(matches!(err, SignerError::Disconnected(_)));
        assert_eq!(err.to_rpc_error().code, codes::DISCONNECTED);
    }
    assert_eq!(f.session.state(), SignerState::Disconnected);
    assert_eq!(f.session.pending_count(), 0);
    assert!(f.session.accounts().is_empty());
    assert!(f.backend.is_empty());
    assert_eq!(
        f.wallet.metadata_writes(),
        vec![("__destroyed".to_string(), "1".to_string())]
    );
    assert_eq!(f.wallet.disconnect_count(), 1);
    assert_eq!(events.recv().await.unwrap(), SessionEvent::Disconnected);

    // Late responses find nothing to complete.
    f.wallet.release_held_reversed();
    tokio::task::yield_now().await;
    assert_eq!(f.session.pending_count(), 0);

    // Requests after teardown have no session.
    let err = f.session.request(sign("0x03")).await.unwrap_err();
    assert!(matches!(err, SignerError::Unauthorized));
}

#[tokio::test]
async fn test_disconnect_keeps_newer_session_of_another_tab() {
    let config = SessionConfig::default();
    let f = Fixture::with_config(config.clone(), vec![ALICE.into()]);
    f.session.handshake().await.unwrap();

    // Another tab replaced the shared session meanwhile.
    let backend: Arc<dyn Storage> = f.backend.clone();
    let other_tab = SessionStore::new(ScopedStorage::new(config.storage_scope.clone(), backend));
    let newer = other_tab.create_and_persist().unwrap();

    f.session.disconnect().await;

    assert_eq!(other_tab.load().unwrap(), Some(newer));
    assert!(!f.backend.is_empty());
}

#[tokio::test]
async fn test_send_failure_resolves_request() {
    let f = Fixture::new(vec![ALICE.into()]);
    f.session.handshake().await.unwrap();
    f.wallet.fail_sends(true);

    let err = f.session.request(sign("0x01")).await.unwrap_err();
    assert!(matches!(
        err,
        SignerError::Transport(TransportError::Disconnected)
    ));
    assert!(err.suggests_reconnect());
    assert_eq!(f.session.pending_count(), 0);
}

#[tokio::test]
async fn test_request_before_handshake_is_unauthorized() {
    let f = Fixture::new(vec![ALICE.into()]);
    let err = f.session.request(sign("0x01")).await.unwrap_err();
    assert!(matches!(err, SignerError::Unauthorized));
    assert_eq!(err.to_rpc_error().code, codes::UNAUTHORIZED);
    assert!(f.wallet.received_requests().is_empty());
}

#[tokio::test]
async fn test_account_push_answers_pending_account_request() {
    let f = Fixture::new(vec![]);
    assert!(f.session.handshake().await.unwrap().is_empty());
    f.wallet.hold_responses(true);

    let handle = f
        .session
        .send_request(RpcRequest::new(methods::ETH_REQUEST_ACCOUNTS, json!([])))
        .await
        .unwrap();
    let wallet = f.wallet.clone();
    eventually(move || wallet.held_count() == 1).await;

    f.wallet.announce_account(ALICE);
    assert_eq!(handle.response().await.unwrap(), json!([ALICE]));
    assert_eq!(f.session.accounts(), vec![ALICE.to_string()]);

    // The wallet's own reply arrives after and is dropped.
    f.wallet.release_held_reversed();
    tokio::task::yield_now().await;
    assert_eq!(f.session.pending_count(), 0);
}

#[tokio::test]
async fn test_remote_destroy_tears_down() {
    let f = Fixture::new(vec![ALICE.into()]);
    f.session.handshake().await.unwrap();
    let mut events = f.session.subscribe();

    f.wallet.push(ConnectionEvent::Destroyed);
    assert_eq!(events.recv().await.unwrap(), SessionEvent::Disconnected);
    assert_eq!(f.session.state(), SignerState::Disconnected);
    // Nothing to tell the bridge it already knows.
    assert!(f.wallet.metadata_writes().is_empty());
    assert!(f.backend.is_empty());
}

#[tokio::test]
async fn test_pushes_after_destroy_leave_storage_empty() {
    let f = Fixture::new(vec![ALICE.into()]);
    f.session.handshake().await.unwrap();
    let mut events = f.session.subscribe();

    f.wallet.push(ConnectionEvent::Destroyed);
    assert_eq!(events.recv().await.unwrap(), SessionEvent::Disconnected);

    f.wallet.push(ConnectionEvent::AccountUpdated(ALICE.into()));
    f.wallet.push(ConnectionEvent::Linked(true));
    f.wallet.push(ConnectionEvent::ChainUpdated {
        chain_id: 137,
        json_rpc_url: "https://polygon.example.org".into(),
    });
    f.wallet.push(ConnectionEvent::MetadataUpdated {
        key: "ChainId".into(),
        value: "137".into(),
    });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert!(f.backend.is_empty());
    assert!(f.session.accounts().is_empty());
    assert!(!f.session.is_linked());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_connection_lost_fails_pending_but_keeps_keys() {
    let f = Fixture::new(vec![ALICE.into()]);
    f.session.handshake().await.unwrap();
    f.wallet.hold_responses(true);

    let handle = f.session.send_request(sign("0x01")).await.unwrap();
    let wallet = f.wallet.clone();
    eventually(move || wallet.held_count() == 1).await;

    f.wallet.push(ConnectionEvent::ConnectionLost);
    let err = handle.response().await.unwrap_err();
    assert!(matches!(err, SignerError::Disconnected(_)));
    assert_eq!(f.session.state(), SignerState::Authenticated);

    f.wallet.hold_responses(false);
    f.session.request(sign("0x02")).await.unwrap();
}

#[tokio::test]
async fn test_unlinked_with_cached_accounts() {
    let f = Fixture::new(vec![ALICE.into()]);
    f.session.handshake().await.unwrap();
    let session = f.session.clone();
    eventually(move || session.is_linked()).await;

    f.wallet.push(ConnectionEvent::Linked(false));
    let session = f.session.clone();
    eventually(move || session.unlinked_error_state()).await;
    // Linking is never undone.
    assert!(f.session.is_linked());
}

#[tokio::test]
async fn test_reload_resumes_without_handshake() {
    let f = Fixture::new(vec![ALICE.into()]);
    f.session.handshake().await.unwrap();
    f.task.abort();

    let config = SessionConfig::default();
    let backend: Arc<dyn Storage> = f.backend.clone();
    let identity = SignerSession::resume_identity(&config, backend.clone()).unwrap();
    assert_eq!(identity.id, f.session.session_id());
    assert!(identity.linked);

    let reloaded = SignerSession::new(config, backend, identity, f.wallet.clone()).unwrap();
    assert_eq!(reloaded.state(), SignerState::Authenticated);
    assert_eq!(reloaded.accounts(), vec![ALICE.to_string()]);
    let _task = reloaded.spawn(f.wallet.reattach());

    reloaded.connect().await.unwrap();
    reloaded.request(sign("0x01")).await.unwrap();
    assert_eq!(f.wallet.received_requests().len(), 1);
}

#[tokio::test]
async fn test_handshake_on_resumed_session_reconnects() {
    let f = Fixture::new(vec![ALICE.into()]);
    f.session.handshake().await.unwrap();
    f.task.abort();
    // Page reload: the transport goes away with the old page.
    f.wallet.disconnect().await;

    let config = SessionConfig::default();
    let backend: Arc<dyn Storage> = f.backend.clone();
    let identity = SignerSession::resume_identity(&config, backend.clone()).unwrap();
    let reloaded = SignerSession::new(config, backend, identity, f.wallet.clone()).unwrap();
    assert_eq!(reloaded.state(), SignerState::Authenticated);
    let _task = reloaded.spawn(f.wallet.reattach());

    let accounts = reloaded.handshake().await.unwrap();
    assert_eq!(accounts, vec![ALICE.to_string()]);
    assert_eq!(f.wallet.connect_count(), 2);

    reloaded.request(sign("0x01")).await.unwrap();
    assert_eq!(f.wallet.received_requests().len(), 1);
}

#[tokio::test]
async fn test_handshake_after_disconnect_is_refused() {
    let f = Fixture::new(vec![ALICE.into()]);
    f.session.handshake().await.unwrap();
    f.session.disconnect().await;
    assert!(f.backend.is_empty());

    let err = f.session.handshake().await.unwrap_err();
    assert!(matches!(err, SignerError::InvalidState(_)));
    assert_eq!(f.session.state(), SignerState::Disconnected);
    f.session.disconnect().await;
    assert!(f.backend.is_empty());
    assert_eq!(f.wallet.connect_count(), 1);

    // A fresh session under a fresh identity links again.
    let config = SessionConfig::default();
    let backend: Arc<dyn Storage> = f.backend.clone();
    let identity = SignerSession::resume_identity(&config, backend.clone()).unwrap();
    assert_ne!(identity.id, f.session.session_id());
    let next = SignerSession::new(config, backend, identity, f.wallet.clone()).unwrap();
    assert_eq!(next.state(), SignerState::Idle);
    let _task = next.spawn(f.wallet.reattach());
    assert_eq!(next.handshake().await.unwrap(), vec![ALICE.to_string()]);
    next.disconnect().await;
    assert!(f.backend.is_empty());
}

#[tokio::test]
async fn test_cancel_one_request() {
    let f = Fixture::new(vec![ALICE.into()]);
    f.session.handshake().await.unwrap();
    f.wallet.hold_responses(true);

    let cancelled = f.session.send_request(sign("0x01")).await.unwrap();
    let kept = f.session.send_request(sign("0x02")).await.unwrap();
    let id = cancelled.id().unwrap().to_string();

    assert!(f.session.cancel(&id));
    assert!(!f.session.cancel(&id));
    let err = cancelled.response().await.unwrap_err();
    assert_eq!(err.to_rpc_error().code, codes::USER_REJECTED);

    let wallet = f.wallet.clone();
    eventually(move || wallet.held_count() == 2).await;
    f.wallet.release_held_reversed();
    assert!(kept.response().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout() {
    let config = SessionConfig {
        request_timeout_ms: Some(50),
        ..SessionConfig::default()
    };
    let f = Fixture::with_config(config, vec![ALICE.into()]);
    f.session.handshake().await.unwrap();
    f.wallet.hold_responses(true);

    let err = f.session.request(sign("0x01")).await.unwrap_err();
    assert!(matches!(err, SignerError::Timeout));
    assert_eq!(f.session.pending_count(), 0);
}
