use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::agent::DELAY_KEY;
use crate::resources::{DirResources, EmbeddedResources, ResourceLoader};

/// Environment variable overriding the ping delay.
pub const DELAY_ENV: &str = "AGENT_PING_DELAY";

/// Default config directory: ~/.agent-ping/
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agent-ping")
}

/// Default config file path: ~/.agent-ping/settings.json
pub fn default_config_path() -> PathBuf {
    config_dir().join("settings.json")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Ping delay in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<i64>,
    /// Directory holding `manifest.json` and `schema/`; embedded when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<PathBuf>,
    /// Answer pings with the in-process pong peer.
    #[serde(default = "default_true")]
    pub loopback_pong: bool,
    /// Extra runtime options, passed through verbatim.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// Raw delay taken from the environment; kept unparsed so a bad value
    /// reaches the ping loop.
    #[serde(skip)]
    env_delay: Option<String>,
}

fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            delay: None,
            resources: None,
            loopback_pong: true,
            options: BTreeMap::new(),
            env_delay: None,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(delay) = lookup(DELAY_ENV) {
            self.env_delay = Some(delay);
        }
        self
    }

    /// Key/value overrides for the runtime config store. Later sources win:
    /// `options`, then the file's `delay`, then the environment.
    pub fn runtime_overrides(&self) -> HashMap<String, String> {
        let mut overrides: HashMap<String, String> = self
            .options
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(delay) = self.delay {
            overrides.insert(DELAY_KEY.to_string(), delay.to_string());
        }
        if let Some(delay) = &self.env_delay {
            overrides.insert(DELAY_KEY.to_string(), delay.clone());
        }
        overrides
    }

    pub fn resource_loader(&self) -> Box<dyn ResourceLoader> {
        match &self.resources {
            Some(dir) => Box::new(DirResources::new(dir)),
            None => Box::new(EmbeddedResources),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_fields_missing() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.version, 1);
        assert!(config.loopback_pong);
        assert!(config.runtime_overrides().is_empty());
    }

    #[test]
    fn overrides_layer_options_file_then_env() {
        let config: AppConfig = serde_json::from_str(
            r#"{ "delay": 250, "options": { "delay": "9", "region": "eu" } }"#,
        )
        .unwrap();
        let overrides = config.runtime_overrides();
        assert_eq!(overrides["delay"], "250");
        assert_eq!(overrides["region"], "eu");

        let config = config.with_overrides_from(|key| {
            (key == DELAY_ENV).then(|| "not-a-number".to_string())
        });
        assert_eq!(config.runtime_overrides()["delay"], "not-a-number");
    }

    #[test]
    fn missing_file_loads_defaults() {
        let path = std::env::temp_dir().join(format!("agent-ping-{}.json", uuid::Uuid::new_v4()));
        let config = AppConfig::load_or_default(&path).unwrap();
        assert!(config.delay.is_none());
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("agent-ping-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, "{ nope").unwrap();
        assert!(AppConfig::load(&path).is_err());
        std::fs::remove_file(path).ok();
    }
}
