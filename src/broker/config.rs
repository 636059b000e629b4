// ABOUTME: Configuration for the connection broker and its worker pool
//
// Defines BrokerConfig with all tunable parameters:
// - Loopback address, base port and pool-size file for the worker pool
// - Timeouts for connect, read, HTTP chunk waits and UDP receives
// - Retry attempts and backoff policy
// - fetch-data chunk size and log queue capacity

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default first port of the worker pool
pub const DEFAULT_BASE_PORT: u16 = 12888;

/// Pool size used when the count file is absent or unreadable
pub const DEFAULT_POOL_SIZE: u16 = 12;

/// fetch-data replies larger than this are split into several frames
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Errors raised while loading configuration files
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read
    #[error("Failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for `BrokerConfig`
    #[error("Failed to parse config from {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// How long to wait between two attempts on the same URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// `min(base * 2^attempt, max)`
    Exponential {
        #[serde(with = "duration_millis")]
        base: Duration,
        #[serde(with = "duration_millis")]
        max: Duration,
    },
    /// Same delay before every retry
    Fixed {
        #[serde(with = "duration_millis")]
        delay: Duration,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(200),
            max: Duration::from_secs(5),
        }
    }
}

/// Configuration shared by broker workers, the pool bootstrap and the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    // === Addressing ===
    /// Loopback host every worker binds to
    pub host: String,

    /// Port of worker 0; worker `i` listens on `base_port + i`
    pub base_port: u16,

    /// File holding the pool size (default: ~/.config/connbroker/pool.num)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_size_file: Option<PathBuf>,

    /// Pool size when the count file is missing
    pub default_pool_size: u16,

    // === Timeouts ===
    /// TCP/UDP connect timeout
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,

    /// Upper bound for a single executor read
    #[serde(with = "duration_millis")]
    pub read_timeout: Duration,

    /// Upper bound for one HTTP body chunk; a stall ends the body
    #[serde(with = "duration_millis")]
    pub chunk_timeout: Duration,

    /// Wait for a UDP reply
    #[serde(with = "duration_millis")]
    pub udp_timeout: Duration,

    /// Time a control connection has to deliver its request
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,

    // === Retry ===
    /// Total attempts allowed per URL for the lifetime of a worker
    pub max_attempts: u32,

    // === Limits ===
    /// Largest `data` payload carried by a single reply frame
    pub chunk_size: usize,

    /// Pending messages kept for the `log` command
    pub log_queue_capacity: usize,

    /// Hard cap on chain-driven read rounds for one `read`
    pub max_chain_rounds: u32,

    /// Delay between attempts (kept last: serialized as a TOML table)
    pub backoff: BackoffPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            base_port: DEFAULT_BASE_PORT,
            pool_size_file: None,
            default_pool_size: DEFAULT_POOL_SIZE,

            connect_timeout: Duration::from_secs(7),
            read_timeout: Duration::from_secs(32),
            chunk_timeout: Duration::from_secs(4),
            udp_timeout: Duration::from_secs(7),
            request_timeout: Duration::from_secs(10),

            max_attempts: 5,

            chunk_size: DEFAULT_CHUNK_SIZE,
            log_queue_capacity: 1024,
            max_chain_rounds: 1000,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl BrokerConfig {
    /// Load configuration from the first existing file in precedence order.
    ///
    /// An explicit path wins; otherwise `./.connbroker/config.toml` and then
    /// `~/.connbroker/config.toml` are tried. No file at all means defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        for path in Self::config_paths() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        Ok(Self::default())
    }

    /// Parse a single TOML file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join(".connbroker").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".connbroker").join("config.toml"));
        }

        paths
    }

    /// Path of the persisted pool-size file
    pub fn pool_size_path(&self) -> PathBuf {
        self.pool_size_file.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("connbroker")
                .join("pool.num")
        })
    }
}

/// Serde helper for Duration as milliseconds (u64)
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();
        assert_eq!(config.base_port, 12888);
        assert_eq!(config.default_pool_size, 12);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.chunk_size, 32 * 1024);
        assert_eq!(config.chunk_timeout, Duration::from_secs(4));
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "base_port = 20000\nmax_attempts = 2\nread_timeout = 1500\n\n[backoff]\nkind = \"fixed\"\ndelay = 10\n",
        )
        .unwrap();

        let config = BrokerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.base_port, 20000);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.read_timeout, Duration::from_millis(1500));
        assert_eq!(
            config.backoff,
            BackoffPolicy::Fixed {
                delay: Duration::from_millis(10)
            }
        );
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "base_port = \"not a number\"").unwrap();

        let err = BrokerConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let err = BrokerConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = BrokerConfig {
            pool_size_file: Some(PathBuf::from("/tmp/pool.num")),
            ..BrokerConfig::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let loaded: BrokerConfig = toml::from_str(&text).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_pool_size_path_override() {
        let config = BrokerConfig {
            pool_size_file: Some(PathBuf::from("/tmp/custom.num")),
            ..BrokerConfig::default()
        };
        assert_eq!(config.pool_size_path(), PathBuf::from("/tmp/custom.num"));
        assert!(BrokerConfig::default()
            .pool_size_path()
            .ends_with("connbroker/pool.num"));
    }
}
