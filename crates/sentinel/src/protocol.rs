//! JSON frames exchanged over the bridge WebSocket.
//!
//! Each frame is an object tagged by `kind`:
//!
//! ```text
//! client → host  {"kind":"connect","name":"ui","sender":{..}}
//!                {"kind":"message","message":{..}}
//!                {"kind":"request","id":1,"sender":{..},"message":{..}}
//!                {"kind":"tabRemoved","tabId":5}
//! host → client  {"kind":"message","message":{..}}
//!                {"kind":"response","id":1,"response":..}
//! ```
//!
//! A `response` frame without a `response` field means no listener answered,
//! which is distinct from an explicit `null` answer.

use sentinel_messaging::{MessageSender, TabId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Opens the socket's persistent connection
    Connect {
        name: String,
        #[serde(default)]
        sender: MessageSender,
    },
    /// Message over the persistent connection
    Message { message: Value },
    /// One-shot message expecting a `response` frame with the same `id`
    Request {
        id: u64,
        #[serde(default)]
        sender: MessageSender,
        message: Value,
    },
    #[serde(rename_all = "camelCase")]
    TabRemoved { tab_id: TabId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HostFrame {
    /// Message posted down the persistent connection
    Message { message: Value },
    /// Reply to a request; `response` is omitted when nobody answered
    Response {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
    },
}
