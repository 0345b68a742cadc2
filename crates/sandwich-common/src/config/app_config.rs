//! Process configuration
//!
//! Loads settings from environment variables (and a `.env` file if present).

use serde::Deserialize;
use std::env;

/// Main process configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app: AppSettings,
    pub api: ServerConfig,
    pub sandwich: SandwichSettings,
    pub cluster: ClusterConfig,
    pub discord: DiscordConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

/// RPC server bind address
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Daemon-wide knobs
#[derive(Debug, Clone, Deserialize)]
pub struct SandwichSettings {
    /// Path of the identity file
    #[serde(default = "default_config_path")]
    pub config_path: String,
    /// Process-wide cap on concurrently running dispatch handlers
    #[serde(default = "default_event_pool_limit")]
    pub event_pool_limit: usize,
}

/// Node placement when several daemons split one shard range
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_node_count")]
    pub node_count: u32,
    #[serde(default)]
    pub node_id: u32,
}

/// Discord REST settings
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

// Default value functions
fn default_app_name() -> String {
    "sandwich".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_config_path() -> String {
    "sandwich.json".to_string()
}

fn default_event_pool_limit() -> usize {
    512
}

fn default_node_count() -> u32 {
    1
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_http_timeout_secs() -> u64 {
    20
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing or invalid
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = |key: &'static str| -> Result<Option<u64>, ConfigError> {
            lookup(key)
                .map(|s| {
                    s.trim()
                        .parse::<u64>()
                        .map_err(|_| ConfigError::InvalidValue(key, s.clone()))
                })
                .transpose()
        };

        let cluster = ClusterConfig {
            node_count: parsed("NODE_COUNT")?
                .map_or_else(default_node_count, |n| n as u32),
            node_id: parsed("NODE_ID")?.map_or(0, |n| n as u32),
        };

        if cluster.node_count == 0 {
            return Err(ConfigError::InvalidValue("NODE_COUNT", "0".to_string()));
        }
        if cluster.node_id >= cluster.node_count {
            return Err(ConfigError::InvalidValue(
                "NODE_ID",
                format!("{} (node count is {})", cluster.node_id, cluster.node_count),
            ));
        }

        let event_pool_limit =
            parsed("EVENT_POOL_LIMIT")?.map_or_else(default_event_pool_limit, |n| n as usize);
        if event_pool_limit == 0 {
            return Err(ConfigError::InvalidValue("EVENT_POOL_LIMIT", "0".to_string()));
        }

        Ok(Self {
            app: AppSettings {
                name: lookup("APP_NAME").unwrap_or_else(default_app_name),
                env: lookup("APP_ENV")
                    .and_then(|s| Environment::parse(&s))
                    .unwrap_or_default(),
            },
            api: ServerConfig {
                host: lookup("API_HOST").unwrap_or_else(default_host),
                port: lookup("API_PORT")
                    .and_then(|s| s.parse().ok())
                    .ok_or(ConfigError::MissingVar("API_PORT"))?,
            },
            sandwich: SandwichSettings {
                config_path: lookup("SANDWICH_CONFIG_PATH").unwrap_or_else(default_config_path),
                event_pool_limit,
            },
            cluster,
            discord: DiscordConfig {
                api_base: lookup("DISCORD_API_BASE")
                    .map(|s| s.trim_end_matches('/').to_string())
                    .unwrap_or_else(default_api_base),
                http_timeout_secs: parsed("HTTP_TIMEOUT_SECS")?
                    .unwrap_or_else(default_http_timeout_secs),
            },
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),

    #[error("Invalid identity configuration: {0}")]
    InvalidIdentity(String),

    #[error("Failed to load configuration file: {0}")]
    Load(#[from] config::ConfigError),
}
