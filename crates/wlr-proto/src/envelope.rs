//! Request/response envelopes and the payloads found inside them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;

/// Method carried by the plaintext handshake.
pub const HANDSHAKE_METHOD: &str = "eth_requestAccounts";

/// AEAD output as it travels on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedData {
    #[serde(with = "crate::hex_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "crate::hex_bytes")]
    pub cipher_text: Vec<u8>,
}

/// Application metadata announced during the handshake.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppMetadata {
    #[serde(default)]
    pub app_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_logo_url: Option<String>,
    #[serde(default)]
    pub app_chain_ids: Vec<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub method: String,
    pub params: AppMetadata,
}

impl HandshakePayload {
    pub fn new(params: AppMetadata) -> Self {
        Self {
            method: HANDSHAKE_METHOD.to_string(),
            params,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestContent {
    Handshake(HandshakePayload),
    Encrypted(EncryptedData),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub id: String,
    /// Hex public key of the originator.
    pub sender: String,
    pub content: RequestContent,
    /// Unix milliseconds, informational only.
    pub timestamp: i64,
}

impl RequestEnvelope {
    pub fn is_handshake(&self) -> bool {
        matches!(self.content, RequestContent::Handshake(_))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseContent {
    Encrypted(EncryptedData),
    Failure(RpcError),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub request_id: String,
    /// Hex public key of the responder.
    pub sender: String,
    pub content: ResponseContent,
    pub timestamp: i64,
}

/// A JSON-RPC call as issued by the page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Plaintext of an encrypted request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedRequest {
    pub action: RpcRequest,
    pub chain_id: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RpcResult {
    Value(Value),
    Error(RpcError),
}

/// Metadata piggybacked on any response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SideChannelData {
    /// Chain id to JSON-RPC url.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chains: Option<BTreeMap<u64, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,
}

/// Plaintext of an encrypted response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecryptedPayload {
    pub result: RpcResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SideChannelData>,
}

impl DecryptedPayload {
    pub fn value(value: Value) -> Self {
        Self {
            result: RpcResult::Value(value),
            data: None,
        }
    }

    pub fn error(error: RpcError) -> Self {
        Self {
            result: RpcResult::Error(error),
            data: None,
        }
    }

    pub fn with_data(mut self, data: SideChannelData) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handshake_content_shape() {
        let env = RequestEnvelope {
            id: "00ff".into(),
            sender: "ab".repeat(32),
            content: RequestContent::Handshake(HandshakePayload::new(AppMetadata {
                app_name: "dapp".into(),
                app_logo_url: None,
                app_chain_ids: vec![1],
            })),
            timestamp: 0,
        };
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["content"]["handshake"]["method"], "eth_requestAccounts");
        assert_eq!(v["content"]["handshake"]["params"]["appChainIds"], json!([1]));
        assert!(env.is_handshake());
    }

    #[test]
    fn test_failure_content_parses() {
        let raw = json!({
            "requestId": "01",
            "sender": "",
            "content": { "failure": { "code": 4100, "message": "unauthorized" } },
            "timestamp": 5
        });
        let env: ResponseEnvelope = serde_json::from_value(raw).unwrap();
        match env.content {
            ResponseContent::Failure(e) => assert_eq!(e.code, 4100),
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn test_null_value_survives() {
        let payload = DecryptedPayload::value(Value::Null);
        let text = serde_json::to_string(&payload).unwrap();
        assert_eq!(text, r#"{"result":{"value":null}}"#);
        let back: DecryptedPayload = serde_json::from_str(&text).unwrap();
        assert_eq!(back.result, RpcResult::Value(Value::Null));
    }

    #[test]
    fn test_chain_map_uses_numeric_keys() {
        let raw = json!({
            "result": { "value": ["0xabc"] },
            "data": { "chains": { "1": "https://rpc.one", "10": "https://rpc.ten" } }
        });
        let payload: DecryptedPayload = serde_json::from_value(raw).unwrap();
        let chains = payload.data.unwrap().chains.unwrap();
        assert_eq!(chains.get(&10).map(String::as_str), Some("https://rpc.ten"));
    }

    #[test]
    fn test_encrypted_data_is_hex() {
        let data = EncryptedData {
            iv: vec![0xde, 0xad],
            cipher_text: vec![0xbe, 0xef],
        };
        let v = serde_json::to_value(&data).unwrap();
        assert_eq!(v, json!({ "iv": "dead", "cipherText": "beef" }));
    }
}
