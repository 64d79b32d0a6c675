use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub wizard: WizardConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Proxy API connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the proxy REST API, including the `/api/v1` prefix
    pub base_url: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("enrollment-wizard/{}", env!("CARGO_PKG_VERSION"))
}

/// Where wizard progress is persisted between runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// One JSON file per flow under `storage.path`
    #[default]
    File,
    /// Process-local only; progress is lost on exit
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// State directory, relative paths resolve against cwd
    pub path: String,
}

/// Storage keys for each wizard flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WizardConfig {
    #[serde(default = "default_enrollment_key")]
    pub enrollment_key: String,
    #[serde(default = "default_password_reset_key")]
    pub password_reset_key: String,
}

fn default_enrollment_key() -> String {
    "enrollment-storage".to_string()
}

fn default_password_reset_key() -> String {
    "password-reset-storage".to_string()
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            enrollment_key: default_enrollment_key(),
            password_reset_key: default_password_reset_key(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to log to a file under the state directory (false = stderr)
    #[serde(default)]
    pub to_file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: false,
        }
    }
}

impl Config {
    /// Path to the project-local config file
    pub fn local_config_path() -> PathBuf {
        PathBuf::from(".wizard/config.toml")
    }

    pub fn load(config_path: Option<&str>) -> Result<Self> {
        // Start with embedded defaults so the wizard works without config files
        let defaults = Config::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("Failed to serialize default config")?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        let local_config = Self::local_config_path();
        if local_config.exists() {
            builder = builder.add_source(config::File::from(local_config));
        }

        // User config in ~/.config/enrollment-wizard/ (optional global overrides)
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("enrollment-wizard").join("config.toml");
            if user_config.exists() {
                builder = builder.add_source(config::File::from(user_config));
            }
        }

        // Explicit config file (CLI override)
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment variables with WIZARD_ prefix, e.g. WIZARD__API__BASE_URL
        builder = builder.add_source(
            config::Environment::with_prefix("WIZARD")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to load configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Save config to .wizard/config.toml
    pub fn save(&self) -> Result<()> {
        let config_path = Self::local_config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_str =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        std::fs::write(&config_path, toml_str).context("Failed to write config file")?;

        Ok(())
    }

    /// Get absolute path to state directory
    pub fn state_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.storage.path);
        if path.is_absolute() {
            path
        } else {
            std::env::current_dir().unwrap_or_default().join(path)
        }
    }

    /// Get absolute path to logs directory
    pub fn logs_path(&self) -> PathBuf {
        self.state_path().join("logs")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: "http://localhost:8080/api/v1".to_string(),
                timeout_secs: default_timeout(),
                user_agent: default_user_agent(),
            },
            storage: StorageConfig {
                backend: StorageBackend::File,
                path: ".wizard/state".to_string(),
            },
            wizard: WizardConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_storage_keys() {
        let config = Config::default();
        assert_eq!(config.wizard.enrollment_key, "enrollment-storage");
        assert_eq!(config.wizard.password_reset_key, "password-reset-storage");
        assert_eq!(config.storage.backend, StorageBackend::File);
    }

    #[test]
    fn test_relative_state_path_resolves_against_cwd() {
        let config = Config::default();
        let path = config.state_path();
        assert!(path.is_absolute());
        assert!(path.ends_with(".wizard/state"));
        assert!(config.logs_path().ends_with("logs"));
    }

    #[test]
    fn test_absolute_state_path_is_kept() {
        let mut config = Config::default();
        config.storage.path = "/var/lib/wizard".to_string();
        assert_eq!(config.state_path(), PathBuf::from("/var/lib/wizard"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
            [api]
            base_url = "https://proxy.example.com/api/v1"

            [storage]
            backend = "memory"
            path = "/tmp/wizard"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.wizard.enrollment_key, "enrollment-storage");
    }

    #[test]
    fn test_default_config_roundtrips_through_toml() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.api.base_url, config.api.base_url);
        assert_eq!(parsed.storage.path, config.storage.path);
    }
}
