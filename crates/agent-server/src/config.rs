//! Server Configuration
//!
//! Everything comes from the environment (a `.env` file is loaded first).

use std::time::Duration;

use thiserror::Error;

use agent_core::{CommandSpec, OrchestratorConfig, SessionConfig};
use vet_clinic::VET_ASSISTANT_PROMPT;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_TOOL_SERVER: &str = "vet-clinic-server";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Program and arguments of the tool-provider subprocess
    pub tool_server: CommandSpec,
    pub max_iterations: usize,
    pub model_timeout: Duration,
    /// Deadline for one round trip to the tool provider
    pub tool_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let orchestrator = OrchestratorConfig::default();
        let session = SessionConfig::new(CommandSpec::new(DEFAULT_TOOL_SERVER));
        Self {
            bind_addr: DEFAULT_BIND_ADDR.into(),
            tool_server: session.command,
            max_iterations: orchestrator.max_iterations,
            model_timeout: orchestrator.model_timeout,
            tool_timeout: session.request_timeout,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = lookup("BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(program) = lookup("TOOL_SERVER_COMMAND") {
            config.tool_server = CommandSpec::new(program);
        }
        if let Some(args) = lookup("TOOL_SERVER_ARGS") {
            config.tool_server = config.tool_server.args(args.split_whitespace());
        }
        if let Some(n) = number(&lookup, "MAX_ITERATIONS")? {
            config.max_iterations = usize::try_from(n).unwrap_or(usize::MAX);
        }
        if let Some(secs) = number(&lookup, "MODEL_TIMEOUT_SECS")? {
            config.model_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = number(&lookup, "TOOL_TIMEOUT_SECS")? {
            config.tool_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.tool_server.clone())
            .with_request_timeout(self.tool_timeout)
            .with_client_info(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }

    /// Orchestrator settings for the clinic assistant talking to `model`
    pub fn orchestrator_config(&self, model: &str) -> OrchestratorConfig {
        let mut config = OrchestratorConfig {
            system_prompt: VET_ASSISTANT_PROMPT.into(),
            max_iterations: self.max_iterations,
            model_timeout: self.model_timeout,
            ..OrchestratorConfig::default()
        };
        config.generation.model = model.to_string();
        config
    }
}

fn number(lookup: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<Option<u64>, ConfigError> {
    let Some(value) = lookup(name) else {
        return Ok(None);
    };
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(ConfigError::InvalidNumber { name, value }),
    }
}
