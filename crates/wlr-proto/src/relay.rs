//! Messages exchanged with the relay bridge server.
//!
//! The bridge only routes opaque event payloads between the page-side
//! session and the wallet; it never sees plaintext RPC content.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Event name for request envelopes published by the page.
pub const EVENT_WEB3_REQUEST: &str = "Web3Request";
/// Event name for response envelopes published by the wallet.
pub const EVENT_WEB3_RESPONSE: &str = "Web3Response";

/// Session metadata keys understood by the bridge and the wallet.
pub mod metadata {
    pub const DESTROYED: &str = "__destroyed";
    pub const ETHEREUM_ADDRESS: &str = "EthereumAddress";
    pub const CHAIN_ID: &str = "ChainId";
    pub const JSON_RPC_URL: &str = "JsonRpcUrl";
}

/// Client to bridge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    HostSession {
        id: u32,
        session_id: String,
        session_key: String,
    },
    #[serde(rename_all = "camelCase")]
    IsLinked { id: u32, session_id: String },
    #[serde(rename_all = "camelCase")]
    SetSessionConfig {
        id: u32,
        session_id: String,
        metadata: BTreeMap<String, String>,
    },
    #[serde(rename_all = "camelCase")]
    PublishEvent {
        id: u32,
        session_id: String,
        event: String,
        data: String,
        call_webhook: bool,
    },
}

impl ClientMessage {
    pub fn id(&self) -> u32 {
        match self {
            Self::HostSession { id, .. }
            | Self::IsLinked { id, .. }
            | Self::SetSessionConfig { id, .. }
            | Self::PublishEvent { id, .. } => *id,
        }
    }
}

/// Bridge to client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "OK", rename_all = "camelCase")]
    Ok { id: u32, session_id: String },
    #[serde(rename_all = "camelCase")]
    Fail {
        id: u32,
        session_id: String,
        error: String,
    },
    #[serde(rename = "IsLinkedOK", rename_all = "camelCase")]
    IsLinkedOk {
        id: u32,
        session_id: String,
        linked: bool,
        online_guests: u32,
    },
    #[serde(rename = "PublishEventOK", rename_all = "camelCase")]
    PublishEventOk {
        id: u32,
        session_id: String,
        event_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Linked {
        session_id: String,
        online_guests: u32,
    },
    #[serde(rename_all = "camelCase")]
    Event {
        session_id: String,
        event_id: String,
        event: String,
        data: String,
    },
    #[serde(rename_all = "camelCase")]
    SessionConfigUpdated {
        session_id: String,
        metadata: BTreeMap<String, String>,
    },
}

impl ServerMessage {
    /// Request id for replies; `None` for unsolicited pushes.
    pub fn reply_to(&self) -> Option<u32> {
        match self {
            Self::Ok { id, .. }
            | Self::Fail { id, .. }
            | Self::IsLinkedOk { id, .. }
            | Self::PublishEventOk { id, .. } => Some(*id),
            Self::Linked { .. } | Self::Event { .. } | Self::SessionConfigUpdated { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_host_session_shape() {
        let msg = ClientMessage::HostSession {
            id: 1,
            session_id: "s".into(),
            session_key: "k".into(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "type": "HostSession", "id": 1, "sessionId": "s", "sessionKey": "k" })
        );
    }

    #[test]
    fn test_server_push_has_no_reply_id() {
        let msg: ServerMessage = serde_json::from_value(json!({
            "type": "Linked", "sessionId": "s", "onlineGuests": 1
        }))
        .unwrap();
        assert_eq!(msg.reply_to(), None);

        let ok: ServerMessage =
            serde_json::from_value(json!({ "type": "OK", "id": 7, "sessionId": "s" })).unwrap();
        assert_eq!(ok.reply_to(), Some(7));
    }

    #[test]
    fn test_is_linked_ok_rename() {
        let msg: ServerMessage = serde_json::from_value(json!({
            "type": "IsLinkedOK", "id": 2, "sessionId": "s", "linked": true, "onlineGuests": 0
        }))
        .unwrap();
        assert!(matches!(msg, ServerMessage::IsLinkedOk { linked: true, .. }));
    }
}
