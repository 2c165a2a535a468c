// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::Result;

/// Top-level configuration for the admission subsystem.
///
/// All of this is deployment-owned. A missing `redis` section is not an
/// error: the subsystem runs single-instance on the in-process store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Distributed counting store; optional
    #[serde(default)]
    pub redis: Option<RedisConfig>,

    /// In-process counting store (fallback and single-instance backend)
    #[serde(default)]
    pub memory: InMemoryConfig,

    /// Key prefix to use for all keys in storage
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// How often the violation ledger is swept for idle entries
    #[serde(default = "default_sweep_interval", with = "duration_serde")]
    pub sweep_interval: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            redis: None,
            memory: InMemoryConfig::default(),
            key_prefix: default_key_prefix(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl AdmissionConfig {
    /// Builds configuration from the process environment.
    ///
    /// Recognized variables: REDIS_URL, ADMISSION_KEY_PREFIX,
    /// ADMISSION_REDIS_TIMEOUT_MS. Every variable is optional.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("REDIS_URL") {
            if !url.is_empty() {
                config.redis = Some(RedisConfig::new(url));
            }
        }

        if let Ok(prefix) = env::var("ADMISSION_KEY_PREFIX") {
            if !prefix.is_empty() {
                config.key_prefix = prefix;
            }
        }

        if let Some(redis) = config.redis.as_mut() {
            if let Ok(raw) = env::var("ADMISSION_REDIS_TIMEOUT_MS") {
                if let Ok(ms) = raw.parse::<u64>() {
                    redis.operation_timeout = Duration::from_millis(ms);
                }
            }
        }

        config
    }

    /// Parses configuration from a JSON document.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

fn default_key_prefix() -> String {
    "admission".to_string()
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

/// Configuration for the Redis-backed distributed store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Connection establishment timeout
    #[serde(default = "default_conn_timeout", with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Per-command deadline; on expiry the call falls back to the local store
    #[serde(default = "default_op_timeout", with = "duration_serde")]
    pub operation_timeout: Duration,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_timeout: default_conn_timeout(),
            operation_timeout: default_op_timeout(),
        }
    }
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_op_timeout() -> Duration {
    Duration::from_millis(500)
}

/// Configuration for the in-process counting store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Soft ceiling on tracked identifiers; crossing it triggers an inline purge
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Whether to run a background task that drops aged-out identifiers
    #[serde(default = "default_background_sweep")]
    pub background_sweep: bool,

    /// How often the background sweep runs
    #[serde(default = "default_memory_sweep_interval", with = "duration_serde")]
    pub sweep_interval: Duration,
}

// serde's field defaults only apply during deserialization, so Default is
// implemented by hand to hand out the same values.
impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            background_sweep: default_background_sweep(),
            sweep_interval: default_memory_sweep_interval(),
        }
    }
}

fn default_max_entries() -> usize {
    10_000
}

fn default_background_sweep() -> bool {
    true
}

fn default_memory_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
