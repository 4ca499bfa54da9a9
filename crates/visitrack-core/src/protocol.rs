//! Persistent-connection protocol.
//!
//! Every frame is a JSON object with a `type` field.
//!
//! Client → server:
//!   {"type": "register_session", "session_id": "..."}
//!   {"type": "heartbeat", "session_id": "..."}
//!   {"type": "cleanup_old_session", "old_session_id": "..."}
//!
//! Server → client:
//!   {"type": "sessions_update", "sessions": [...]}
//!   {"type": "heartbeat_ack", "status": "ok"}
//!   {"type": "error", "message": "..."}

use serde::{Deserialize, Serialize};

use crate::session::DisplayRecord;

/// Messages a dashboard sends over its persistent connection.
///
/// Session ids arrive as raw strings and are validated by the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    RegisterSession {
        #[serde(default)]
        session_id: String,
    },
    Heartbeat {
        #[serde(default)]
        session_id: String,
    },
    CleanupOldSession {
        #[serde(default)]
        old_session_id: String,
    },
}

/// Messages pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionsUpdate { sessions: Vec<DisplayRecord> },
    HeartbeatAck { status: String },
    Error { message: String },
}

impl ServerMessage {
    pub fn heartbeat_ok() -> Self {
        ServerMessage::HeartbeatAck {
            status: "ok".to_string(),
        }
    }
}
