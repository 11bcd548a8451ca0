// Agent dispatcher
// Main entry point for the agent-dispatcher binary

use clap::Parser;

use agent_dispatcher::cli::{Cli, Command};
use agent_dispatcher::config::Config;
use agent_dispatcher::session::AgentSession;
use agent_dispatcher::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    telemetry::init(cli.log.as_deref().unwrap_or("info"));

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config = Config::load(&config_path)?;

    match cli.command {
        Command::Register => {
            let mut session = AgentSession::new(config);
            session.register(&config_path).await?;
            println!("Agent registered; token stored in {}", config_path.display());
        }
        Command::Run => {
            let session = AgentSession::new(config);
            session.serve().await?;
        }
    }

    Ok(())
}
