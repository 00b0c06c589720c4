//! Error types for the session core.
//!
//! Every failure a caller can observe maps onto the single
//! `{code, message, data?}` shape via [`SignerError::to_rpc_error`].

use thiserror::Error;

use wlr_crypto::CryptoError;
use wlr_proto::{codes, RpcError};
use wlr_transport::TransportError;

/// Message returned when a request is made before the handshake completed.
pub const NO_SESSION_MESSAGE: &str = "no valid session, do handshake first";

// ============================================================================
// Component Errors
// ============================================================================

/// Errors raised by a [`Storage`](crate::storage::Storage) backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    #[error("key storage failed: {0}")]
    Storage(#[from] StoreError),

    /// Stored key bytes could not be parsed.
    #[error("stored {role} key is corrupted: {source}")]
    Corrupted {
        role: &'static str,
        #[source]
        source: CryptoError,
    },

    /// Key agreement failed (degenerate output or derivation error).
    #[error("shared secret derivation failed: {0}")]
    Derivation(CryptoError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PendingError {
    #[error("request id already registered: {0}")]
    DuplicateId(String),
}

// ============================================================================
// Signer Error
// ============================================================================

/// Outcome of a failed handshake or request.
#[derive(Debug, Error, Clone)]
pub enum SignerError {
    /// `failure` envelope from the counterpart, verbatim. Never retried.
    #[error("protocol failure: {0}")]
    Protocol(RpcError),

    /// Decrypted `error` result.
    #[error("rpc error: {0}")]
    Rpc(RpcError),

    /// Encryption or decryption failed; the session should be re-established.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("no valid session, do handshake first")]
    Unauthorized,

    #[error("disconnected: {0}")]
    Disconnected(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("key store error: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl From<PendingError> for SignerError {
    fn from(e: PendingError) -> Self {
        SignerError::InvalidState(e.to_string())
    }
}

impl From<serde_json::Error> for SignerError {
    fn from(e: serde_json::Error) -> Self {
        SignerError::Decode(e.to_string())
    }
}

impl SignerError {
    pub fn disconnected() -> Self {
        SignerError::Disconnected("session disconnected".to_string())
    }

    /// Map onto the wire error shape.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            SignerError::Protocol(e) | SignerError::Rpc(e) => e.clone(),
            SignerError::Crypto(e) => RpcError::internal(format!("session crypto failed: {e}")),
            SignerError::Unauthorized => RpcError::unauthorized(NO_SESSION_MESSAGE),
            SignerError::Disconnected(reason) => RpcError::disconnected(reason.clone()),
            SignerError::Cancelled => RpcError::user_rejected(),
            SignerError::Timeout => RpcError::internal("request timed out"),
            SignerError::Transport(TransportError::Disconnected)
            | SignerError::Transport(TransportError::NotAuthenticated) => {
                RpcError::disconnected(self.to_string())
            }
            SignerError::Transport(_) => RpcError::internal(self.to_string()),
            SignerError::Storage(_) | SignerError::KeyStore(_) => {
                RpcError::internal(self.to_string())
            }
            SignerError::InvalidState(_) => RpcError::new(codes::INVALID_REQUEST, self.to_string()),
            SignerError::Decode(_) => RpcError::new(codes::PARSE_ERROR, self.to_string()),
        }
    }

    /// Whether the UI should offer to reconnect rather than retry.
    pub fn suggests_reconnect(&self) -> bool {
        matches!(
            self,
            SignerError::Crypto(_)
                | SignerError::Unauthorized
                | SignerError::Disconnected(_)
                | SignerError::KeyStore(_)
                | SignerError::Transport(TransportError::Disconnected)
                | SignerError::Transport(TransportError::NotAuthenticated)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_failure_is_verbatim() {
        let original = RpcError::new(4001, "nope").with_data(serde_json::json!({ "x": 1 }));
        assert_eq!(SignerError::Protocol(original.clone()).to_rpc_error(), original);
    }

    #[test]
    fn test_unauthorized_code() {
        let e = SignerError::Unauthorized.to_rpc_error();
        assert_eq!(e.code, codes::UNAUTHORIZED);
        assert_eq!(e.message, NO_SESSION_MESSAGE);
    }

    #[test]
    fn test_disconnect_maps_to_4900() {
        assert_eq!(SignerError::disconnected().to_rpc_error().code, codes::DISCONNECTED);
        assert_eq!(
            SignerError::Transport(TransportError::Disconnected).to_rpc_error().code,
            codes::DISCONNECTED
        );
    }

    #[test]
    fn test_reconnect_classification() {
        assert!(SignerError::Crypto(CryptoError::AuthenticationFailed).suggests_reconnect());
        assert!(!SignerError::Rpc(RpcError::user_rejected()).suggests_reconnect());
        assert!(!SignerError::Cancelled.suggests_reconnect());
    }
}
