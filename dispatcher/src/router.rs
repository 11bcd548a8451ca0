//! Inbound request routing
//!
//! Decodes control frames arriving over the websocket, validates the
//! requested action and its arguments, and hands validated runs to the
//! executor supervisor. Every rejection is answered with a status frame so
//! the server always learns the outcome; the child process is never
//! spawned on a rejected request.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::api_client::ApiClient;
use crate::config::params::ParamSchema;
use crate::config::{Config, ExecutorSpec};
use crate::errors::ArgError;
use crate::executor;
use crate::status::{emit, StatusFrame};

/// Everything a run needs from the process-wide session state.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub agent_name: String,
    pub workspace: String,
    pub executors: BTreeMap<String, ExecutorSpec>,
    pub api: ApiClient,
    /// Mailbox of the single websocket writer.
    pub frames: mpsc::Sender<String>,
}

impl AgentContext {
    pub fn new(config: &Config, api: ApiClient, frames: mpsc::Sender<String>) -> Self {
        Self {
            agent_name: config.agent.agent_name.clone(),
            workspace: config.server.workspace.clone(),
            executors: config.executors().clone(),
            api,
            frames,
        }
    }
}

/// Handle one inbound text frame.
pub async fn dispatch(ctx: Arc<AgentContext>, raw: String) {
    let data: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(_) => {
            emit(&ctx.frames, &StatusFrame::error("Invalid JSON")).await;
            return;
        }
    };

    let Some(action) = data.get("action").and_then(Value::as_str) else {
        info!("Data not contains action to do");
        emit(
            &ctx.frames,
            &StatusFrame::error("'action' key is mandatory in this websocket connection"),
        )
        .await;
        return;
    };

    if action != "RUN" {
        info!("Unrecognized action");
        let mut reply = Map::new();
        reply.insert(
            format!("{action}_RESPONSE"),
            Value::String("Error: Unrecognized action".to_string()),
        );
        let _ = ctx.frames.send(Value::Object(reply).to_string()).await;
        return;
    }

    let Some(executor_name) = data.get("executor").and_then(Value::as_str) else {
        error!("No executor selected");
        emit(
            &ctx.frames,
            &StatusFrame::error(format!("No executor selected to {} agent", ctx.agent_name)),
        )
        .await;
        return;
    };

    let Some(spec) = ctx.executors.get(executor_name) else {
        error!("The selected executor not exists");
        emit(
            &ctx.frames,
            &StatusFrame::executor_error(
                executor_name,
                format!(
                    "The selected executor {executor_name} not exists in {} agent",
                    ctx.agent_name
                ),
            ),
        )
        .await;
        return;
    };

    let empty_args = Map::new();
    let args = data.get("args").and_then(Value::as_object).unwrap_or(&empty_args);

    match ParamSchema::from_flags(&spec.params).coerce(args) {
        Ok(coerced) => {
            tokio::spawn(executor::run(Arc::clone(&ctx), spec.clone(), coerced));
        }
        Err(ArgError::Missing(_)) => {
            error!("Mandatory argument not passed");
            emit(
                &ctx.frames,
                &StatusFrame::executor_error(
                    executor_name,
                    format!(
                        "Mandatory argument(s) not passed to {executor_name} executor from {} agent",
                        ctx.agent_name
                    ),
                ),
            )
            .await;
        }
        Err(ArgError::Unexpected(_)) => {
            error!("Unexpected argument passed");
            emit(
                &ctx.frames,
                &StatusFrame::executor_error(
                    executor_name,
                    format!(
                        "Unexpected argument(s) passed to {executor_name} executor from {} agent",
                        ctx.agent_name
                    ),
                ),
            )
            .await;
        }
        Err(ArgError::BadType(_)) => {
            error!("Invalid argument passed");
            emit(
                &ctx.frames,
                &StatusFrame::executor_error(
                    executor_name,
                    format!(
                        "Invalid argument(s) passed to {executor_name} executor from {} agent",
                        ctx.agent_name
                    ),
                ),
            )
            .await;
        }
    }
}
