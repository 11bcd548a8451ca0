//! Agent session lifecycle
//!
//! Owns the HTTP client and the control channel for the lifetime of the
//! process: created → registered → connected → serving → shut down.

use std::path::Path;

use tracing::info;

use crate::api_client::ApiClient;
use crate::config::Config;
use crate::errors::DispatcherError;
use crate::ws_client;

pub struct AgentSession {
    config: Config,
}

impl AgentSession {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Exchange the registration token for an agent token and persist it
    /// back to the configuration file.
    pub async fn register(&mut self, config_path: &Path) -> Result<(), DispatcherError> {
        let api = ApiClient::new(&self.config.server, None)?;
        let agent_token = api
            .register(
                &self.config.tokens.registration,
                &self.config.agent.agent_name,
            )
            .await?;
        self.config.set_agent_token(agent_token)?;
        self.config.save(config_path)?;
        info!("Agent {} registered", self.config.agent.agent_name);
        Ok(())
    }

    /// Obtain a websocket token and serve run requests until the server
    /// closes the channel.
    pub async fn serve(&self) -> Result<(), DispatcherError> {
        let agent_token = self.config.tokens.agent.clone().ok_or_else(|| {
            DispatcherError::Auth(
                "agent token is not set, run the register command first".to_string(),
            )
        })?;
        let api = ApiClient::new(&self.config.server, Some(agent_token))?;
        let websocket_token = api.issue_websocket_token().await?;
        ws_client::connect_and_serve(&self.config, api, websocket_token).await
    }
}
