//! Status frames
//!
//! Canonical lifecycle messages sent back over the websocket. Frames are
//! serialized here and handed to the single writer task through its
//! mailbox, so concurrent runs can never interleave bytes on the wire.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub const RUN_STATUS: &str = "RUN_STATUS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusFrame {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,
    pub message: String,
}

impl StatusFrame {
    /// Error reply carrying no executor context.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            action: RUN_STATUS.to_string(),
            executor_name: None,
            running: Some(false),
            successful: None,
            message: message.into(),
        }
    }

    /// Error reply about a specific executor.
    pub fn executor_error(executor_name: &str, message: impl Into<String>) -> Self {
        Self {
            executor_name: Some(executor_name.to_string()),
            ..Self::error(message)
        }
    }

    /// The executor has been spawned.
    pub fn running(executor_name: &str, agent_name: &str) -> Self {
        Self {
            action: RUN_STATUS.to_string(),
            executor_name: Some(executor_name.to_string()),
            running: Some(true),
            successful: None,
            message: format!("Running {executor_name} executor from {agent_name} agent"),
        }
    }

    /// The executor has been reaped and every stream has drained.
    pub fn finished(executor_name: &str, agent_name: &str, successful: bool) -> Self {
        let message = if successful {
            format!("Executor {executor_name} from {agent_name} finished successfully")
        } else {
            format!("Executor {executor_name} from {agent_name} failed")
        };
        Self {
            action: RUN_STATUS.to_string(),
            executor_name: Some(executor_name.to_string()),
            running: None,
            successful: Some(successful),
            message,
        }
    }
}

/// Serialize a frame and hand it to the websocket writer mailbox.
pub async fn emit(frames: &mpsc::Sender<String>, frame: &StatusFrame) {
    if let Ok(json) = serde_json::to_string(frame) {
        let _ = frames.send(json).await;
    }
}
