//! Configuration management for the detection engine

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

/// Main configuration structure for the detection engine
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub rules: RulesConfig,
    pub state_store: StateStoreConfig,
    pub matcher: MatcherConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Rule corpus configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RulesConfig {
    /// Root directory holding the rule repository checkout
    pub directory: String,
    /// Subdirectory under the root that contains the actual rule files
    #[serde(default = "default_rules_subdir")]
    pub subdir: String,
    /// Remote repository to clone when self-managing the corpus
    #[serde(default = "default_repo_url")]
    pub repo_url: String,
    /// Clone/pull the corpus here instead of relying on an external provisioner
    #[serde(default)]
    pub self_manage: bool,
    #[serde(default = "default_load_retries")]
    pub load_retries: u32,
    #[serde(default = "default_load_retry_delay")]
    pub load_retry_delay_secs: u64,
    /// Grace period before the first load so a co-deployed provisioner can
    /// populate the directory first
    #[serde(default = "default_startup_delay")]
    pub startup_delay_secs: u64,
}

/// Rule-state store (API service) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateStoreConfig {
    pub base_url: String,
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
    #[serde(default = "default_fetch_retry_delay")]
    pub fetch_retry_delay_secs: u64,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_store_timeout")]
    pub request_timeout_secs: u64,
}

/// Matching configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MatcherConfig {
    /// Sigma category -> OCSF category-name synonyms. Best-effort bridge,
    /// kept as data so deployments can extend it without a rebuild.
    #[serde(default = "default_category_synonyms")]
    pub category_synonyms: HashMap<String, Vec<String>>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_request_timeout() -> u64 { 30 }

fn default_rules_subdir() -> String { "rules".to_string() }
fn default_repo_url() -> String { "https://github.com/SigmaHQ/sigma.git".to_string() }
fn default_load_retries() -> u32 { 3 }
fn default_load_retry_delay() -> u64 { 5 }
fn default_startup_delay() -> u64 { 5 }

fn default_fetch_retries() -> u32 { 5 }
fn default_fetch_retry_delay() -> u64 { 2 }
fn default_refresh_interval() -> u64 { 60 }
fn default_store_timeout() -> u64 { 10 }

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }

pub(crate) fn default_category_synonyms() -> HashMap<String, Vec<String>> {
    let table: [(&str, &[&str]); 6] = [
        ("process_creation", &["process activity", "process creation"]),
        ("authentication", &["identity & access management", "authentication"]),
        ("network_connection", &["network activity", "network connection"]),
        ("dns_query", &["network activity", "dns activity"]),
        ("file_event", &["file system activity", "file activity"]),
        ("registry_event", &["registry activity", "registry key activity"]),
    ];
    table
        .iter()
        .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
        .collect()
}

impl Config {
    /// Load configuration from file or fall back to defaults
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("DETECTION_CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            Ok(Self::default_config())
        }
    }

    /// Load configuration with environment variable overrides layered on top
    pub fn load_with_overrides() -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        let config_path =
            std::env::var("DETECTION_CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

        if Path::new(&config_path).exists() {
            let format = if config_path.ends_with(".yaml") || config_path.ends_with(".yml") {
                FileFormat::Yaml
            } else {
                FileFormat::Toml
            };
            builder = builder.add_source(File::new(&config_path, format));
        } else {
            let defaults = Self::default_config();
            let serialized = toml::to_string(&defaults)?;
            builder = builder.add_source(File::from_str(&serialized, FileFormat::Toml));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("DETECTION")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        if path.ends_with(".toml") {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", path))
        } else if path.ends_with(".yaml") || path.ends_with(".yml") {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path))
        } else {
            anyhow::bail!("Unsupported config file format. Use .toml or .yaml")
        }
    }

    /// Generate default configuration
    pub fn default_config() -> Self {
        Config {
            server: ServerConfig {
                bind_address: "0.0.0.0:8000".parse().expect("valid default bind address"),
                request_timeout_secs: default_request_timeout(),
            },
            rules: RulesConfig {
                directory: "/app/rules".to_string(),
                subdir: default_rules_subdir(),
                repo_url: default_repo_url(),
                self_manage: false,
                load_retries: default_load_retries(),
                load_retry_delay_secs: default_load_retry_delay(),
                startup_delay_secs: default_startup_delay(),
            },
            state_store: StateStoreConfig {
                base_url: "http://api:8080".to_string(),
                fetch_retries: default_fetch_retries(),
                fetch_retry_delay_secs: default_fetch_retry_delay(),
                refresh_interval_secs: default_refresh_interval(),
                request_timeout_secs: default_store_timeout(),
            },
            matcher: MatcherConfig {
                category_synonyms: default_category_synonyms(),
            },
            logging: LoggingConfig {
                level: default_log_level(),
                format: default_log_format(),
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.rules.directory.is_empty() {
            anyhow::bail!("rules.directory must not be empty");
        }

        if self.rules.subdir.is_empty() {
            anyhow::bail!("rules.subdir must not be empty");
        }

        if self.rules.load_retries == 0 {
            anyhow::bail!("rules.load_retries must be greater than 0");
        }

        if self.state_store.base_url.is_empty() {
            anyhow::bail!("state_store.base_url must not be empty");
        }

        if self.state_store.refresh_interval_secs == 0 {
            anyhow::bail!("state_store.refresh_interval_secs must be greater than 0");
        }

        if !Path::new(&self.rules.directory).exists() {
            tracing::warn!(
                "Rules directory does not exist yet: {}",
                self.rules.directory
            );
        }

        Ok(())
    }

    /// Absolute path of the subdirectory that holds the rule files
    pub fn rules_root(&self) -> std::path::PathBuf {
        Path::new(&self.rules.directory).join(&self.rules.subdir)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
