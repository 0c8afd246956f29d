//! Runtime configuration, resolved from environment variables plus an
//! optional TOML file listing bridged providers.

mod bridges;

pub use bridges::{BridgeEntry, load_bridge_configs};

use std::env;
use std::str::FromStr;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Read an environment variable, treating absent and unset identically.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "not valid unicode".to_string(),
        }),
    }
}

/// Read and parse an environment variable, falling back to `default` when
/// unset.
pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key)? {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn required_env(key: &str) -> Result<String, ConfigError> {
    optional_env(key)?.ok_or_else(|| ConfigError::MissingVar {
        key: key.to_string(),
    })
}

/// Chat completion backend settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible endpoint.
    pub base_url: String,
    /// Bearer token; optional for local model servers.
    pub api_key: Option<SecretString>,
    pub model: String,
}

impl LlmConfig {
    fn resolve() -> Result<Self, ConfigError> {
        let api_key = optional_env("LLM_API_KEY")?
            .filter(|k| !k.is_empty())
            .map(SecretString::from);
        Ok(Self {
            base_url: required_env("LLM_BASE_URL")?,
            api_key,
            model: required_env("LLM_MODEL")?,
        })
    }
}

/// Tool loop settings.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Hard cap on model round-trips per turn.
    pub max_tool_iterations: usize,
    /// Character cap applied to each tool output before it enters history.
    pub tool_output_cap: usize,
    /// Upper bound on tools advertised to the model per turn.
    pub max_visible_tools: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 10,
            tool_output_cap: 20_000,
            max_visible_tools: 32,
        }
    }
}

impl AgentConfig {
    fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            max_tool_iterations: parse_optional_env(
                "AGENT_MAX_TOOL_ITERATIONS",
                defaults.max_tool_iterations,
            )?,
            tool_output_cap: parse_optional_env("AGENT_TOOL_OUTPUT_CAP", defaults.tool_output_cap)?,
            max_visible_tools: parse_optional_env(
                "AGENT_MAX_VISIBLE_TOOLS",
                defaults.max_visible_tools,
            )?,
        })
    }
}

/// Full host configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    /// Path to the bridged-provider manifest, if any.
    pub bridges_file: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            llm: LlmConfig::resolve()?,
            agent: AgentConfig::resolve()?,
            bridges_file: optional_env("BRIDGES_FILE")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_optional_env_uses_default_when_unset() {
        let value: usize =
            parse_optional_env("TOOLHOST_TEST_UNSET_VAR_XYZ", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn agent_defaults() {
        let defaults = AgentConfig::default();
        assert_eq!(defaults.max_tool_iterations, 10);
        assert_eq!(defaults.tool_output_cap, 20_000);
    }
}
