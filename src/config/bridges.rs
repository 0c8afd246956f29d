//! Bridged-provider manifest.
//!
//! A TOML file lists the external processes to spawn as tool providers:
//!
//! ```toml
//! [[servers]]
//! name = "files"
//! command = "file-server"
//! args = ["--root", "/data"]
//! env = { LOG_LEVEL = "info" }
//! request_timeout_secs = 30
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::bridge::BridgeConfig;
use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeEntry {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub startup_timeout_secs: Option<u64>,
}

impl BridgeEntry {
    pub fn to_bridge_config(&self) -> BridgeConfig {
        let mut config = BridgeConfig::new(&self.name, &self.command)
            .with_args(self.args.iter().cloned())
            .with_env(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(secs) = self.request_timeout_secs {
            config = config.with_request_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.startup_timeout_secs {
            config = config.with_startup_timeout(Duration::from_secs(secs));
        }
        config
    }
}

#[derive(Debug, Default, Deserialize)]
struct BridgeManifest {
    #[serde(default)]
    servers: Vec<BridgeEntry>,
}

/// Load bridge configurations from a manifest file.
pub fn load_bridge_configs(path: &str) -> Result<Vec<BridgeConfig>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    let manifest: BridgeManifest = toml::from_str(&raw).map_err(|e| ConfigError::FileParse {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    Ok(manifest
        .servers
        .iter()
        .map(BridgeEntry::to_bridge_config)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn manifest_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[servers]]
name = "files"
command = "file-server"
args = ["--root", "/data"]
request_timeout_secs = 5

[[servers]]
name = "search"
command = "search-server"
env = {{ INDEX = "main" }}
"#
        )
        .unwrap();

        let configs = load_bridge_configs(file.path().to_str().unwrap()).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].name, "files");
        assert_eq!(configs[0].args, vec!["--root", "/data"]);
        assert_eq!(configs[0].request_timeout, Duration::from_secs(5));
        assert_eq!(configs[1].env, vec![("INDEX".to_string(), "main".to_string())]);
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = load_bridge_configs("/nonexistent/bridges.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not [valid toml").unwrap();
        let err = load_bridge_configs(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::FileParse { .. }));
    }
}
