//! Command implementations

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::{json, Value};

use wlr_core::{
    methods, FileStorage, HandshakeBehavior, MemoryStorage, ScopedStorage, SessionEvent,
    SignerError, SignerSession, SimulatedWallet, Storage,
};
use wlr_proto::{RpcError, RpcRequest};
use wlr_transport::{RelayConnection, SessionCredentials, WebSocketChannel};

use crate::cli::{HostArgs, OutputFormat, SimulateArgs};
use crate::config::Config;
use crate::ExitCode;

fn open_storage(config: &Config) -> anyhow::Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match &config.storage.path {
        Some(path) => {
            let file = FileStorage::open(path)
                .with_context(|| format!("opening storage {}", path.display()))?;
            tracing::debug!(path = %path.display(), "using file storage");
            Arc::new(file)
        }
        None => Arc::new(MemoryStorage::new()),
    };
    Ok(storage)
}

fn emit(format: OutputFormat, label: &str, value: &Value) {
    match format {
        OutputFormat::Text => match value {
            Value::String(s) => println!("{label}: {s}"),
            other => println!("{label}: {other}"),
        },
        OutputFormat::Json => {
            let mut line = serde_json::Map::new();
            line.insert(label.to_string(), value.clone());
            println!("{}", Value::Object(line));
        }
    }
}

fn fail(format: OutputFormat, step: &str, e: &SignerError) -> ExitCode {
    let code = ExitCode::from(e);
    let rpc = e.to_rpc_error();
    match format {
        OutputFormat::Text => eprintln!("{step} failed: {e} (code {})", rpc.code),
        OutputFormat::Json => println!(
            "{}",
            json!({ "step": step, "error": rpc, "exit": code.name() })
        ),
    }
    code
}

/// Handshake and a few requests against an in-process wallet.
pub async fn simulate(
    config: &Config,
    args: &SimulateArgs,
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    let backend = open_storage(config)?;
    let (wallet, events) = SimulatedWallet::new(args.accounts.clone());
    if args.reject {
        wallet.set_handshake(HandshakeBehavior::Reject(RpcError::user_rejected()));
    }
    let wallet = Arc::new(wallet);

    let identity = SignerSession::resume_identity(&config.session, backend.clone())?;
    emit(format, "session", &json!(identity.id));
    let session = SignerSession::new(config.session.clone(), backend, identity, wallet.clone())?;
    let task = session.spawn(events);

    let code = run_simulation(&session, args, format).await;

    if args.keep {
        tracing::info!("keeping session in storage");
    } else {
        session.disconnect().await;
        emit(format, "state", &json!(session.state().to_string()));
    }
    task.abort();
    Ok(code)
}

async fn run_simulation(
    session: &SignerSession,
    args: &SimulateArgs,
    format: OutputFormat,
) -> ExitCode {
    let accounts = match session.handshake().await {
        Ok(accounts) => accounts,
        Err(e) => return fail(format, "handshake", &e),
    };
    emit(format, "accounts", &json!(accounts));

    let from = accounts.first().cloned().unwrap_or_default();
    let mut calls = vec![
        ("chain", RpcRequest::new(methods::ETH_CHAIN_ID, Value::Null)),
        (
            "signature",
            RpcRequest::new("personal_sign", json!([args.message, from])),
        ),
    ];
    if let Some(chain) = &args.switch_chain {
        calls.push((
            "switch",
            RpcRequest::new(methods::WALLET_SWITCH_CHAIN, json!([{ "chainId": chain }])),
        ));
    }

    for (label, request) in calls {
        match session.request(request).await {
            Ok(value) => emit(format, label, &value),
            Err(e) => return fail(format, label, &e),
        }
    }
    let chain = session.active_chain();
    emit(format, "active_chain", &json!(chain));
    ExitCode::Success
}

/// Open a session on a real bridge and wait for the wallet.
pub async fn host(config: &Config, args: &HostArgs, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let backend = open_storage(config)?;
    let identity = SignerSession::resume_identity(&config.session, backend.clone())?;
    let credentials = SessionCredentials::new(identity.id.clone(), identity.key());

    let channel = WebSocketChannel::new(config.relay.url.clone());
    let (connection, events) = RelayConnection::new(channel, credentials, config.relay.clone());
    let connection = Arc::new(connection);

    // The wallet needs id and secret to join; they never reach the bridge.
    emit(format, "session", &json!(identity.id));
    emit(format, "secret", &json!(identity.secret));
    emit(format, "server", &json!(config.relay.url));

    let session = SignerSession::new(config.session.clone(), backend, identity, connection)?;
    let task = session.spawn(events);
    let mut updates = session.subscribe();
    let watcher = tokio::spawn(async move {
        while let Ok(event) = updates.recv().await {
            match event {
                SessionEvent::AccountsChanged(accounts) => {
                    tracing::info!(?accounts, "accounts changed")
                }
                SessionEvent::ChainChanged { chain_id, .. } => {
                    tracing::info!(chain_id, "chain changed")
                }
                SessionEvent::Disconnected => break,
            }
        }
    });

    let wait = Duration::from_secs(args.wait_secs);
    let code = match tokio::time::timeout(wait, session.handshake()).await {
        Err(_) => fail(format, "handshake", &SignerError::Timeout),
        Ok(Err(e)) => fail(format, "handshake", &e),
        Ok(Ok(accounts)) => {
            emit(format, "accounts", &json!(accounts));
            match &args.sign {
                Some(message) => {
                    let from = accounts.first().cloned().unwrap_or_default();
                    let request = RpcRequest::new("personal_sign", json!([message, from]));
                    match session.request(request).await {
                        Ok(signature) => {
                            emit(format, "signature", &signature);
                            ExitCode::Success
                        }
                        Err(e) => fail(format, "personal_sign", &e),
                    }
                }
                None => ExitCode::Success,
            }
        }
    };

    if args.disconnect {
        session.disconnect().await;
    }
    task.abort();
    watcher.abort();
    Ok(code)
}

/// Forget whatever session is stored.
pub fn reset(config: &Config, format: OutputFormat) -> anyhow::Result<ExitCode> {
    if config.storage.path.is_none() {
        anyhow::bail!("reset needs --storage or a [storage] path; in-memory sessions do not persist");
    }
    let backend = open_storage(config)?;
    let storage = ScopedStorage::new(config.session.storage_scope.clone(), backend);
    storage.clear()?;
    emit(format, "reset", &json!(storage.scope()));
    Ok(ExitCode::Success)
}

pub fn init_config(
    config: &Config,
    path: Option<PathBuf>,
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    let path = path
        .or_else(Config::default_path)
        .context("no config directory on this platform; pass a path")?;
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    config.save(&path)?;
    emit(format, "config", &json!(path.display().to_string()));
    Ok(ExitCode::Success)
}
