//! Minimal line-delimited, JSON-RPC-like wire shape. The outer transport
//! (framing, auth, batching of requests) is an external collaborator; this
//! is just enough to drive the core end-to-end over stdio.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum RequestMethod {
    OpenSession {
        dump_path: PathBuf,
        #[serde(default)]
        symbol_path: Option<PathBuf>,
    },
    Enqueue {
        session_id: String,
        command: String,
    },
    GetCommand {
        session_id: String,
        command_id: String,
    },
    GetAllCommands {
        session_id: String,
    },
    CancelCommand {
        session_id: String,
        command_id: String,
    },
    CloseSession {
        session_id: String,
    },
    ListSessions,
}

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    #[serde(flatten)]
    pub method: RequestMethod,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: impl std::fmt::Display) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.to_string()),
        }
    }
}

/// Asynchronous progress notifications (spec.md §1's "streams asynchronous
/// progress notifications"), pushed to stdout without a request id.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    CommandStateChanged(cdbg_core::CommandStateChanged),
    SessionStateChanged(cdbg_core::SessionStateChanged),
    CommandHeartbeat(cdbg_core::CommandHeartbeat),
}
