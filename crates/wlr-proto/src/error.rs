//! The one error shape callers ever see.
//!
//! RPC-layer errors (JSON-RPC code range) and provider-layer errors
//! (EIP-1193 code range) share the same `{code, message, data?}` layout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standardized error codes.
pub mod codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;

    /// The user rejected the request.
    pub const USER_REJECTED: i64 = 4001;
    /// The requested method and/or account has not been authorized.
    pub const UNAUTHORIZED: i64 = 4100;
    /// The provider does not support the requested method.
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    /// The provider is disconnected from all chains.
    pub const DISCONNECTED: i64 = 4900;
    /// The provider is not connected to the requested chain.
    pub const CHAIN_DISCONNECTED: i64 = 4901;
    /// The requested chain has not been added.
    pub const UNSUPPORTED_CHAIN: i64 = 4902;
}

/// Structured error carried in `failure` envelopes and in decrypted `error` results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("method not found: {method}"))
    }

    pub fn user_rejected() -> Self {
        Self::new(codes::USER_REJECTED, "user rejected the request")
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(codes::UNAUTHORIZED, message)
    }

    pub fn unsupported_method(method: &str) -> Self {
        Self::new(codes::UNSUPPORTED_METHOD, format!("unsupported method: {method}"))
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(codes::DISCONNECTED, message)
    }

    pub fn unsupported_chain(chain_id: u64) -> Self {
        Self::new(
            codes::UNSUPPORTED_CHAIN,
            format!("unrecognized chain id {chain_id}, add the chain first"),
        )
    }

    /// JSON-RPC reserved range (-32768..=-32000).
    pub fn is_rpc_error(&self) -> bool {
        (-32768..=-32000).contains(&self.code)
    }

    /// EIP-1193 provider range (1000..=4999).
    pub fn is_provider_error(&self) -> bool {
        (1000..=4999).contains(&self.code)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for RpcError {}
