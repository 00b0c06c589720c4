//! Session core for the wallet link relay.
//!
//! A [`SignerSession`] pairs a page with a remote signer over an untrusted
//! bridge. It owns the key store, the session identity, the table of
//! in-flight requests and the cached wallet state, and talks to the bridge
//! only through a [`RelayTransport`](wlr_transport::RelayTransport).

pub mod config;
pub mod errors;
pub mod harness;
pub mod keystore;
pub mod pending;
pub mod session_store;
pub mod signer;
pub mod storage;

pub use config::{ConfigError, SessionConfig};
pub use errors::{KeyStoreError, PendingError, SignerError, StoreError};
pub use harness::{HandshakeBehavior, SimulatedWallet};
pub use keystore::KeyStore;
pub use pending::{PendingEntry, PendingOutcome, PendingRequestTable};
pub use session_store::{SessionIdentity, SessionStore};
pub use signer::{methods, ActiveChain, RequestHandle, SessionEvent, SignerSession, SignerState};
pub use storage::{FileStorage, MemoryStorage, ScopedStorage, Storage};
