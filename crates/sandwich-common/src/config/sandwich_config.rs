//! Identity file
//!
//! One `IdentityConfig` per bot token ("manager"). The file format follows the
//! extension (JSON, TOML, YAML); `SANDWICH__*` environment variables override
//! individual keys. Keys are matched case-insensitively, so driver option names
//! arrive lowercased.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;

use sandwich_core::Intents;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{parse_shard_ids, ConfigError};

/// Root of the identity file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandwichConfig {
    #[serde(default)]
    pub identities: Vec<IdentityConfig>,
}

/// One bot identity
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IdentityConfig {
    /// Unique routing key
    #[validate(length(min = 1, max = 64, message = "identifier must be 1-64 characters"))]
    pub identifier: String,
    /// Tag stamped into outbound payloads; defaults to `identifier`
    #[serde(default)]
    pub producer_identifier: String,
    #[serde(default)]
    pub display_name: String,
    #[validate(length(min = 1, message = "token is required"))]
    pub token: String,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub caching: CachingConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub sharding: ShardingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub intents: Intents,
    #[serde(default)]
    pub default_presence: Option<serde_json::Value>,
    /// Attempts for non-fatal 4xxx closes before a shard gives up
    #[serde(default = "default_retries")]
    pub retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachingConfig {
    #[serde(default = "default_true")]
    pub cache_users: bool,
    #[serde(default = "default_true")]
    pub cache_members: bool,
    /// Chunk every guild once a shard is ready
    #[serde(default)]
    pub request_members: bool,
    #[serde(default)]
    pub store_mutuals: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Dropped before touching state
    #[serde(default)]
    pub event_blacklist: Vec<String>,
    /// Applied to state but never published
    #[serde(default)]
    pub produce_blacklist: Vec<String>,
    /// Forward events that have no state handler
    #[serde(default = "default_true")]
    pub allow_passthrough: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default)]
    pub client_name_random_suffix: bool,
    #[serde(default = "default_channel_name")]
    pub channel_name: String,
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardingConfig {
    /// Use Discord's recommended shard count
    #[serde(default = "default_true")]
    pub auto_sharded: bool,
    #[serde(default = "default_shard_count")]
    pub shard_count: u32,
    /// Range string such as `"0-4,6-7"`; empty means every shard
    #[serde(default)]
    pub shard_ids: String,
    /// Identities with the same domain share identify buckets; unset means
    /// one domain per bot token
    #[serde(default)]
    pub identify_domain: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_retries() -> u32 {
    3
}

fn default_client_name() -> String {
    "sandwich".to_string()
}

fn default_channel_name() -> String {
    "sandwich".to_string()
}

fn default_driver() -> String {
    "websocket".to_string()
}

fn default_shard_count() -> u32 {
    1
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            intents: Intents::default(),
            default_presence: None,
            retries: default_retries(),
        }
    }
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            cache_users: true,
            cache_members: true,
            request_members: false,
            store_mutuals: false,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            event_blacklist: Vec::new(),
            produce_blacklist: Vec::new(),
            allow_passthrough: true,
        }
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            client_name_random_suffix: false,
            channel_name: default_channel_name(),
            driver: default_driver(),
            options: HashMap::new(),
        }
    }
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            auto_sharded: true,
            shard_count: default_shard_count(),
            shard_ids: String::new(),
            identify_domain: None,
        }
    }
}

impl IdentityConfig {
    /// Minimal identity, used by tests and programmatic setups
    pub fn new(identifier: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            producer_identifier: String::new(),
            display_name: String::new(),
            token: token.into(),
            auto_start: false,
            bot: BotConfig::default(),
            caching: CachingConfig::default(),
            events: EventsConfig::default(),
            messaging: MessagingConfig::default(),
            sharding: ShardingConfig::default(),
        }
    }

    /// Tag stamped into the `__sandwich.i` field of outbound payloads
    pub fn producer_identifier(&self) -> &str {
        if self.producer_identifier.is_empty() {
            &self.identifier
        } else {
            &self.producer_identifier
        }
    }

    /// Name shown in the `__sandwich.a` field
    pub fn display_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.identifier
        } else {
            &self.display_name
        }
    }

    /// Shard ids to run for a given shard count
    pub fn shard_ids(&self, shard_count: u32) -> Result<Vec<u32>, ConfigError> {
        parse_shard_ids(&self.sharding.shard_ids, shard_count)
    }

    /// Token with any `Bot ` prefix removed
    pub fn bare_token(&self) -> &str {
        self.token.strip_prefix("Bot ").unwrap_or(&self.token).trim()
    }

    /// Configured identify domain, ignoring blanks
    pub fn identify_domain(&self) -> Option<&str> {
        self.sharding
            .identify_domain
            .as_deref()
            .map(str::trim)
            .filter(|domain| !domain.is_empty())
    }

    pub fn is_event_blacklisted(&self, event: &str) -> bool {
        self.events.event_blacklist.iter().any(|e| e == event)
    }

    pub fn is_produce_blacklisted(&self, event: &str) -> bool {
        self.events.produce_blacklist.iter().any(|e| e == event)
    }
}

impl SandwichConfig {
    /// Load and validate the identity file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or fails validation
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let loaded: Self = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("SANDWICH").separator("__"))
            .build()?
            .try_deserialize()?;

        loaded.validate_identities()?;
        Ok(loaded)
    }

    /// Parse an in-memory JSON document
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let loaded: Self = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Json))
            .build()?
            .try_deserialize()?;

        loaded.validate_identities()?;
        Ok(loaded)
    }

    pub fn identity(&self, identifier: &str) -> Option<&IdentityConfig> {
        self.identities.iter().find(|i| i.identifier == identifier)
    }

    fn validate_identities(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();

        for identity in &self.identities {
            identity
                .validate()
                .map_err(|e| ConfigError::InvalidIdentity(format!("{}: {e}", identity.identifier)))?;

            if !seen.insert(identity.identifier.as_str()) {
                return Err(ConfigError::InvalidIdentity(format!(
                    "duplicate identifier {}",
                    identity.identifier
                )));
            }

            if !identity.sharding.auto_sharded && identity.sharding.shard_count == 0 {
                return Err(ConfigError::InvalidIdentity(format!(
                    "{}: shard_count must be positive",
                    identity.identifier
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "identities": [
            {
                "identifier": "welcomer",
                "token": "Bot abc.def",
                "auto_start": true,
                "bot": {"intents": 513, "retries": 5},
                "caching": {"store_mutuals": true},
                "events": {"produce_blacklist": ["TYPING_START"]},
                "messaging": {"driver": "websocket", "options": {"address": "127.0.0.1:3600"}},
                "sharding": {"auto_sharded": false, "shard_count": 4, "shard_ids": "0-1", "identify_domain": "welcomer-fleet"}
            }
        ]
    }"#;

    #[test]
    fn test_load_json() {
        let config = SandwichConfig::from_json_str(SAMPLE).unwrap();
        let identity = config.identity("welcomer").unwrap();

        assert!(identity.auto_start);
        assert_eq!(identity.bot.intents.bits(), 513);
        assert_eq!(identity.bot.retries, 5);
        assert!(identity.caching.cache_users);
        assert!(identity.caching.store_mutuals);
        assert!(identity.events.allow_passthrough);
        assert!(identity.is_produce_blacklisted("TYPING_START"));
        assert!(!identity.is_event_blacklisted("TYPING_START"));
        assert_eq!(identity.messaging.options.get("address").unwrap(), "127.0.0.1:3600");
        assert_eq!(identity.shard_ids(4).unwrap(), vec![0, 1]);
        assert_eq!(identity.identify_domain(), Some("welcomer-fleet"));
    }

    #[test]
    fn test_identity_defaults() {
        let identity = IdentityConfig::new("app", "Bot tok");
        assert_eq!(identity.producer_identifier(), "app");
        assert_eq!(identity.display_name(), "app");
        assert_eq!(identity.bare_token(), "tok");
        assert_eq!(identity.messaging.driver, "websocket");
        assert_eq!(identity.shard_ids(2).unwrap(), vec![0, 1]);
        assert_eq!(identity.identify_domain(), None);

        let mut identity = identity;
        identity.sharding.identify_domain = Some("  ".to_string());
        assert_eq!(identity.identify_domain(), None);
    }

    #[test]
    fn test_rejects_empty_token() {
        let err = SandwichConfig::from_json_str(r#"{"identities":[{"identifier":"a","token":""}]}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIdentity(_)));
    }

    #[test]
    fn test_rejects_duplicates() {
        let err = SandwichConfig::from_json_str(
            r#"{"identities":[{"identifier":"a","token":"x"},{"identifier":"a","token":"y"}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
