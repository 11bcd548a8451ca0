//! CLI interface
//!
//! Command-line interface using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Agent dispatcher
///
/// Registers this host as an agent against a remote server, keeps a
/// websocket control channel open, and runs the configured executors on
/// demand, streaming their findings back to the server.
#[derive(Parser, Debug)]
#[command(name = "agent-dispatcher")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Exchange the registration token for an agent token and store it
    Register,

    /// Connect to the server and serve run requests
    Run,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        // Test basic command parsing
        let cli = Cli::parse_from(["agent-dispatcher", "run"]);
        assert!(matches!(cli.command, Command::Run));
        assert!(cli.log.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_register_command() {
        let cli = Cli::parse_from(["agent-dispatcher", "register"]);
        assert!(matches!(cli.command, Command::Register));
    }

    #[test]
    fn test_global_flags() {
        // Test global flags
        let cli = Cli::parse_from(["agent-dispatcher", "--log", "debug", "run"]);
        assert_eq!(cli.log, Some("debug".to_string()));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_config_flag() {
        let cli = Cli::parse_from([
            "agent-dispatcher",
            "--config",
            "/etc/dispatcher/config.toml",
            "register",
        ]);
        assert_eq!(
            cli.config,
            Some(PathBuf::from("/etc/dispatcher/config.toml"))
        );
        assert!(matches!(cli.command, Command::Register));
    }

    #[test]
    fn test_global_flags_after_the_subcommand() {
        // Global flags are accepted on either side of the subcommand
        let cli = Cli::parse_from(["agent-dispatcher", "run", "--log", "trace"]);
        assert!(matches!(cli.command, Command::Run));
        assert_eq!(cli.log, Some("trace".to_string()));
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        let result = Cli::try_parse_from(["agent-dispatcher", "reboot"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_a_subcommand_is_required() {
        let result = Cli::try_parse_from(["agent-dispatcher"]);
        assert!(result.is_err());
    }
}
