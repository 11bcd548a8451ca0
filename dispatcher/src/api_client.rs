//! Server HTTP API client
//!
//! Wraps the three server endpoints the dispatcher talks to: agent
//! registration, websocket token issuance, and the per-workspace bulk
//! create ingest. Every call except registration carries the
//! `Authorization: Agent <token>` header. The underlying `reqwest::Client`
//! is connection-pooled and cheap to clone, so one `ApiClient` is shared
//! across concurrent runs.

use reqwest::StatusCode;
use serde_json::json;
use tracing::{error, info};

use crate::config::validators::{validate_token, AGENT_TOKEN_SIZE};
use crate::config::ServerConfig;
use crate::errors::DispatcherError;

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
    agent_token: Option<String>,
}

impl ApiClient {
    pub fn new(server: &ServerConfig, agent_token: Option<String>) -> Result<Self, DispatcherError> {
        let mut builder = reqwest::Client::builder();
        if !server.ssl_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| DispatcherError::Transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: server.api_url(),
            client,
            agent_token,
        })
    }

    fn auth_header(&self) -> Result<String, DispatcherError> {
        self.agent_token
            .as_deref()
            .map(|token| format!("Agent {token}"))
            .ok_or_else(|| DispatcherError::Auth("agent token is not set".to_string()))
    }

    /// Exchange the registration token for a long-lived agent token.
    pub async fn register(
        &self,
        registration_token: &str,
        agent_name: &str,
    ) -> Result<String, DispatcherError> {
        let url = format!("{}/_api/v2/agent_registration/", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({"token": registration_token, "name": agent_name}))
            .send()
            .await
            .map_err(|e| DispatcherError::Transport(format!("Registration request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DispatcherError::Auth(format!(
                "Server rejected the registration token (HTTP {status})"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatcherError::Server(format!(
                "Registration failed with HTTP {status}: {body}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DispatcherError::Server(format!("Invalid registration response: {e}")))?;
        let token = body
            .get("token")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                DispatcherError::Server("Registration response did not contain a token".to_string())
            })?;
        validate_token("agent token", AGENT_TOKEN_SIZE, token)?;
        Ok(token.to_string())
    }

    /// Ask the server for a fresh short-lived websocket token. The token
    /// is a signed opaque string; the dispatcher never decodes it.
    pub async fn issue_websocket_token(&self) -> Result<String, DispatcherError> {
        let url = format!("{}/_api/v2/agent_websocket_token/", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header()?)
            .send()
            .await
            .map_err(|e| {
                DispatcherError::Transport(format!("Websocket token request failed: {e}"))
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DispatcherError::Auth(format!(
                "Server rejected the agent token (HTTP {status})"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatcherError::Server(format!(
                "Websocket token request failed with HTTP {status}: {body}"
            )));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            DispatcherError::Server(format!("Invalid websocket token response: {e}"))
        })?;
        body.get("token")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                DispatcherError::Server(
                    "Websocket token response did not contain a token".to_string(),
                )
            })
    }

    /// Forward one executor record to the bulk create endpoint.
    ///
    /// Rejections are logged and swallowed: a failed record never aborts
    /// the run, is never retried, and later records are still sent.
    pub async fn bulk_create(&self, workspace: &str, record: &serde_json::Value) {
        let auth = match self.auth_header() {
            Ok(auth) => auth,
            Err(e) => {
                error!("Cannot send data to bulk create: {e}");
                return;
            }
        };
        let url = format!("{}/_api/v2/ws/{workspace}/bulk_create/", self.base_url);
        match self
            .client
            .post(&url)
            .header("Authorization", auth)
            .json(record)
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                if status == StatusCode::CREATED || status == StatusCode::OK {
                    info!("Data sent to bulk create");
                } else if status == StatusCode::BAD_REQUEST {
                    let body = response.text().await.unwrap_or_default();
                    error!(
                        "Invalid data supplied by the executor to the bulk create endpoint. \
                         Server responded: {body}"
                    );
                } else {
                    let body = response.text().await.unwrap_or_default();
                    error!(
                        "Bulk create endpoint rejected the data with status {status}. \
                         Server responded: {body}"
                    );
                }
            }
            Err(e) => error!("Could not reach the bulk create endpoint: {e}"),
        }
    }
}
