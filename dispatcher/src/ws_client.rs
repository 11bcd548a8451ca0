//! WebSocket control channel
//!
//! The dispatcher connects outward as a websocket **client** to the
//! server's control endpoint. The first outbound frame is the `JOIN_AGENT`
//! handshake advertising the configured executors; after that, inbound
//! frames are run requests and outbound frames are status reports.
//!
//! All writes go through one mpsc mailbox drained by the select loop
//! below, which is the only task that touches the sink — concurrent runs
//! can never interleave frames on the wire.

use std::sync::Arc;

use futures::stream::StreamExt;
use futures::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{info, warn};

use crate::api_client::ApiClient;
use crate::config::Config;
use crate::errors::DispatcherError;
use crate::router::{self, AgentContext};

/// Build the `JOIN_AGENT` handshake frame. Each executor advertises its
/// declared params, the value being the required flag.
pub fn join_frame(config: &Config, websocket_token: &str) -> serde_json::Value {
    let executors: Vec<serde_json::Value> = config
        .agent
        .executors
        .iter()
        .map(|name| {
            let params = config
                .executor(name)
                .map(|spec| spec.params.clone())
                .unwrap_or_default();
            serde_json::json!({"executor_name": name, "args": params})
        })
        .collect();
    serde_json::json!({
        "action": "JOIN_AGENT",
        "workspace": config.server.workspace,
        "token": websocket_token,
        "executors": executors,
    })
}

/// Dial the control channel, perform the join handshake, and serve run
/// requests until the server closes the connection or the process is
/// interrupted.
pub async fn connect_and_serve(
    config: &Config,
    api: ApiClient,
    websocket_token: String,
) -> Result<(), DispatcherError> {
    let url = config.server.websocket_url();
    info!("Connecting to {url}");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(&url)
        .await
        .map_err(|e| DispatcherError::Transport(format!("Websocket connection failed: {e}")))?;
    let (mut write, mut read) = ws_stream.split();

    let join = join_frame(config, &websocket_token);
    write
        .send(WsMessage::Text(join.to_string()))
        .await
        .map_err(|e| DispatcherError::Transport(format!("Failed to send join frame: {e}")))?;

    let (frame_tx, mut frame_rx) = mpsc::channel::<String>(64);
    let ctx = Arc::new(AgentContext::new(config, api, frame_tx));

    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(WsMessage::Text(text))) => {
                    tokio::spawn(router::dispatch(Arc::clone(&ctx), text));
                }
                Some(Ok(WsMessage::Ping(payload))) => {
                    let _ = write.send(WsMessage::Pong(payload)).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    info!("Websocket closed by the server");
                    return Ok(());
                }
                Some(Err(e)) => {
                    return Err(DispatcherError::Transport(format!(
                        "Websocket read failed: {e}"
                    )));
                }
                Some(Ok(_)) => {} // Binary, Pong, Frame — ignore
            },
            frame = frame_rx.recv() => {
                if let Some(json) = frame {
                    if let Err(e) = write.send(WsMessage::Text(json)).await {
                        warn!("Failed to send status frame: {e}");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                let _ = write.send(WsMessage::Close(None)).await;
                return Ok(());
            }
        }
    }
}
