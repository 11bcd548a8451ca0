//! Configuration management
//!
//! Loads, validates, and persists the dispatcher configuration. The file
//! is TOML with one table per concern:
//!
//! - **server**: host, API and websocket ports, workspace, TLS switches
//! - **tokens**: registration token, and the agent token once registered
//! - **agent**: agent name and the comma-separated executor list
//! - **executor.\<name\>** / **params.\<name\>** / **varenvs.\<name\>**:
//!   per-executor command line, declared parameters, and extra environment
//!
//! Validation happens entirely at load time; after a successful
//! [`Config::load`] the store is immutable for the process lifetime. The
//! single exception is [`Config::set_agent_token`], which records the
//! token obtained at registration so [`Config::save`] can persist it.
//! Token values never reach the log.

pub mod params;
pub mod validators;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use toml::value::Table;
use toml::Value;

use crate::errors::DispatcherError;
use validators::{
    control_bool, control_int, control_list, validate_token, AGENT_TOKEN_SIZE,
    REGISTRATION_TOKEN_SIZE,
};

/// Default per-line byte cap for executor output streams.
pub const DEFAULT_MAX_SIZE: usize = 64 * 1024;

/// Server endpoint configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub api_port: u16,
    pub websocket_port: u16,
    pub workspace: String,
    pub ssl: bool,
    pub ssl_verify: bool,
}

impl ServerConfig {
    pub fn api_url(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.api_port)
    }

    pub fn websocket_url(&self) -> String {
        let scheme = if self.ssl { "wss" } else { "ws" };
        format!("{scheme}://{}:{}/websockets", self.host, self.websocket_port)
    }
}

/// Credential configuration.
#[derive(Debug, Clone)]
pub struct TokensConfig {
    /// One-shot token exchanged for the agent token at registration.
    pub registration: String,
    /// Long-lived agent credential, present once registered.
    pub agent: Option<String>,
}

/// Agent identity configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_name: String,
    /// Executor names in declaration order.
    pub executors: Vec<String>,
}

/// Typed description of one configured executor.
#[derive(Debug, Clone)]
pub struct ExecutorSpec {
    pub name: String,
    /// Operator-authored command line, run through the system shell.
    pub cmd: String,
    /// Per-line byte cap applied to every output stream.
    pub max_size: usize,
    /// Declared parameters: name → required flag.
    pub params: BTreeMap<String, bool>,
    /// Extra environment handed to the child process.
    pub varenvs: BTreeMap<String, String>,
}

/// The loaded configuration tree.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub tokens: TokensConfig,
    pub agent: AgentConfig,
    executors: BTreeMap<String, ExecutorSpec>,
    tree: Table,
}

impl Config {
    /// Load and validate the configuration file.
    pub fn load(path: &Path) -> Result<Self, DispatcherError> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration contents.
    pub fn parse(contents: &str) -> Result<Self, DispatcherError> {
        let tree: Table = toml::from_str(contents)
            .map_err(|e| DispatcherError::Config(format!("Failed to parse config: {e}")))?;

        let server_table = section(&tree, "server")?;
        let server = ServerConfig {
            host: required_str(server_table, "server", "host")?,
            api_port: port(server_table, "server", "api_port")?,
            websocket_port: port(server_table, "server", "websocket_port")?,
            workspace: required_str(server_table, "server", "workspace")?,
            ssl: optional_bool(server_table, "server", "ssl", false)?,
            ssl_verify: optional_bool(server_table, "server", "ssl_verify", true)?,
        };

        let tokens_table = section(&tree, "tokens")?;
        let registration = required_str(tokens_table, "tokens", "registration")?;
        validate_token("registration token", REGISTRATION_TOKEN_SIZE, &registration)?;
        let agent_token = optional_str(tokens_table, "tokens", "agent")?;
        if let Some(token) = &agent_token {
            validate_token("agent token", AGENT_TOKEN_SIZE, token)?;
        }

        let agent_table = section(&tree, "agent")?;
        let agent_name = required_str(agent_table, "agent", "agent_name")?;
        let executors_raw = required_str(agent_table, "agent", "executors")?;
        let executor_names = control_list("executors", &executors_raw, false)?;

        let mut executors = BTreeMap::new();
        for name in &executor_names {
            executors.insert(name.clone(), load_executor(&tree, name)?);
        }

        Ok(Self {
            server,
            tokens: TokensConfig {
                registration,
                agent: agent_token,
            },
            agent: AgentConfig {
                agent_name,
                executors: executor_names,
            },
            executors,
            tree,
        })
    }

    /// Write the tree back to disk, preserving section names. Only used to
    /// persist the agent token obtained at registration.
    pub fn save(&self, path: &Path) -> Result<(), DispatcherError> {
        let rendered = toml::to_string_pretty(&self.tree)
            .map_err(|e| DispatcherError::Config(format!("Failed to serialize config: {e}")))?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Record a freshly issued agent token.
    pub fn set_agent_token(&mut self, token: String) -> Result<(), DispatcherError> {
        validate_token("agent token", AGENT_TOKEN_SIZE, &token)?;
        let tokens = self
            .tree
            .entry("tokens".to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        if let Value::Table(table) = tokens {
            table.insert("agent".to_string(), Value::String(token.clone()));
        }
        self.tokens.agent = Some(token);
        Ok(())
    }

    /// Look up one executor by name.
    pub fn executor(&self, name: &str) -> Option<&ExecutorSpec> {
        self.executors.get(name)
    }

    /// All configured executors, keyed by name.
    pub fn executors(&self) -> &BTreeMap<String, ExecutorSpec> {
        &self.executors
    }

    /// Default configuration file location.
    pub fn default_path() -> Result<PathBuf, DispatcherError> {
        let home = dirs::home_dir().ok_or_else(|| {
            DispatcherError::Config("Could not determine home directory".to_string())
        })?;
        Ok(home.join(".agent-dispatcher").join("config.toml"))
    }
}

fn section<'a>(root: &'a Table, name: &str) -> Result<&'a Table, DispatcherError> {
    match root.get(name) {
        Some(Value::Table(table)) => Ok(table),
        Some(_) => Err(DispatcherError::Config(format!(
            "\"{name}\" must be a section"
        ))),
        None => Err(DispatcherError::Config(format!(
            "\"{name}\" section is required in the configuration file"
        ))),
    }
}

fn required_str(table: &Table, section: &str, option: &str) -> Result<String, DispatcherError> {
    match table.get(option) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(DispatcherError::Config(format!(
            "\"{option}\" option in \"{section}\" must be a string"
        ))),
        None => Err(DispatcherError::Config(format!(
            "\"{option}\" option is required in the \"{section}\" section"
        ))),
    }
}

fn optional_str(
    table: &Table,
    section: &str,
    option: &str,
) -> Result<Option<String>, DispatcherError> {
    match table.get(option) {
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(DispatcherError::Config(format!(
            "\"{option}\" option in \"{section}\" must be a string"
        ))),
        None => Ok(None),
    }
}

fn optional_bool(
    table: &Table,
    section: &str,
    option: &str,
    default: bool,
) -> Result<bool, DispatcherError> {
    match table.get(option) {
        Some(value) => control_bool(&format!("{section}.{option}"), value),
        None => Ok(default),
    }
}

fn port(table: &Table, section: &str, option: &str) -> Result<u16, DispatcherError> {
    let value = table.get(option).ok_or_else(|| {
        DispatcherError::Config(format!(
            "\"{option}\" option is required in the \"{section}\" section"
        ))
    })?;
    let parsed = control_int(&format!("{section}.{option}"), value)?;
    if !(1..=65535).contains(&parsed) {
        return Err(DispatcherError::Config(format!(
            "\"{option}\" option in \"{section}\" must be a port number between 1 and 65535"
        )));
    }
    Ok(parsed as u16)
}

fn subsection<'a>(root: &'a Table, group: &str, name: &str) -> Option<&'a Table> {
    root.get(group)
        .and_then(Value::as_table)
        .and_then(|table| table.get(name))
        .and_then(Value::as_table)
}

fn load_executor(tree: &Table, name: &str) -> Result<ExecutorSpec, DispatcherError> {
    let data = subsection(tree, "executor", name).ok_or_else(|| {
        DispatcherError::Config(format!(
            "\"executor.{name}\" section is required in the configuration file"
        ))
    })?;
    let cmd = required_str(data, &format!("executor.{name}"), "cmd")?;

    let max_size = match data.get("max_size") {
        None => DEFAULT_MAX_SIZE,
        Some(value) => {
            let parsed = control_int(&format!("executor.{name}.max_size"), value)?;
            usize::try_from(parsed).ok().filter(|n| *n > 0).ok_or_else(|| {
                DispatcherError::Config(format!(
                    "\"max_size\" option in \"executor.{name}\" must be a positive int"
                ))
            })?
        }
    };

    let mut declared = BTreeMap::new();
    if let Some(table) = subsection(tree, "params", name) {
        for (key, value) in table {
            if key.contains(char::is_whitespace) {
                return Err(DispatcherError::Config(format!(
                    "param name {key:?} in \"params.{name}\" must not contain whitespace"
                )));
            }
            declared.insert(key.clone(), required_flag(name, key, value)?);
        }
    }

    let mut varenvs = BTreeMap::new();
    if let Some(table) = subsection(tree, "varenvs", name) {
        for (key, value) in table {
            match value {
                Value::String(s) => {
                    varenvs.insert(key.clone(), s.clone());
                }
                _ => {
                    return Err(DispatcherError::Config(format!(
                        "\"{key}\" option in \"varenvs.{name}\" must be a string"
                    )));
                }
            }
        }
    }

    Ok(ExecutorSpec {
        name: name.to_string(),
        cmd,
        max_size,
        params: declared,
        varenvs,
    })
}

/// A param value declares whether the param is mandatory: `True` or
/// `False`, case-insensitive.
fn required_flag(executor: &str, key: &str, value: &Value) -> Result<bool, DispatcherError> {
    match value {
        Value::Boolean(b) => Ok(*b),
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(DispatcherError::Config(format!(
                "\"{key}\" option in \"params.{executor}\" must be True or False"
            ))),
        },
        _ => Err(DispatcherError::Config(format!(
            "\"{key}\" option in \"params.{executor}\" must be True or False"
        ))),
    }
}
