//! Settings loaded from `config/config.toml` and `TIDEMARK__*` environment
//! variables.
//!
//! ```toml
//! [connections.default]
//! type = "memory"
//! ids = "uuid"
//!
//! [models]
//! locked = false
//! ```
//!
//! The same keys can be given as `TIDEMARK__CONNECTIONS__DEFAULT__TYPE=memory`.

use crate::connections::ConnectionConfig;
use config::{Config, ConfigError, Environment, File};
use log::{info, warn};
use serde::Deserialize;
use std::collections::BTreeMap;

const DEFAULT_PATH: &str = "config/config.toml";
const ENV_PREFIX: &str = "TIDEMARK";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// Named connections, built lazily by `Connections`
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
    #[serde(default)]
    pub models: ModelSettings,
}

/// Defaults applied to every model's meta.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSettings {
    #[serde(default = "default_locked")]
    pub locked: bool,
}

fn default_locked() -> bool {
    true
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            locked: default_locked(),
        }
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX).separator("__")
}

impl Settings {
    /// Load settings from `config/config.toml`, falling back to env vars.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_PATH)
    }

    /// Load settings from `path` (optional) overlaid with env vars.
    ///
    /// An unreadable or malformed file is skipped with a warning and the
    /// environment alone is used.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(env_source());

        let config = match builder.build() {
            Ok(config) => config,
            Err(err) => {
                if std::path::Path::new(path).exists() {
                    warn!("Failed to load config file `{}`, falling back to env: {}", path, err);
                }
                Config::builder().add_source(env_source()).build().map_err(|env_err| {
                    ConfigError::Message(format!(
                        "Failed to load configuration from file and env: {}, then env-only error: {}",
                        err, env_err
                    ))
                })?
            }
        };

        let settings: Settings = config.try_deserialize().map_err(|e| {
            ConfigError::Message(format!("Settings could not be loaded from file or environment: {}", e))
        })?;
        info!(
            "Loaded settings: {} connection(s), models locked = {}",
            settings.connections.len(),
            settings.models.locked
        );
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(name: &str, body: &str) -> String {
        let path = std::env::temp_dir().join(format!("tidemark-{}-{}.toml", name, std::process::id()));
        let mut file = std::fs::File::create(&path).expect("create config");
        file.write_all(body.as_bytes()).expect("write config");
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_load_from_file() {
        let path = write_config(
            "file",
            r#"
            [connections.default]
            type = "memory"
            ids = "uuid"

            [connections.archive]
            type = "document"
            adapter = "memory"

            [models]
            locked = false
            "#,
        );
        let settings = Settings::load_from(&path).expect("settings");
        let _ = std::fs::remove_file(&path);

        assert!(!settings.models.locked);
        let default = settings.connections.get("default").expect("default connection");
        assert_eq!(default.kind, "memory");
        assert_eq!(default.options.get("ids").and_then(|v| v.as_str()), Some("uuid"));
        let archive = settings.connections.get("archive").expect("archive connection");
        assert_eq!(archive.adapter.as_deref(), Some("memory"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let settings = Settings::load_from("does/not/exist.toml").expect("settings");
        assert!(settings.models.locked);
    }

    #[test]
    fn test_malformed_file_falls_back_to_env() {
        let path = write_config("broken", "[connections.default\ntype = ");
        let settings = Settings::load_from(&path).expect("settings");
        let _ = std::fs::remove_file(&path);
        assert!(settings.models.locked);
    }
}
