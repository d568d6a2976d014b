use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{QrxError, Result};

/// SQL dialect accepted by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    /// Permissive generic dialect; the default.
    Generic,
    /// PostgreSQL dialect.
    Postgres,
    /// MySQL dialect.
    MySql,
    /// Hive dialect.
    Hive,
}

impl Default for SqlDialect {
    fn default() -> Self {
        Self::Generic
    }
}

impl std::str::FromStr for SqlDialect {
    type Err = QrxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Ok(Self::Generic),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" => Ok(Self::MySql),
            "hive" => Ok(Self::Hive),
            other => Err(QrxError::InvalidConfig(format!(
                "unknown dialect '{other}'; use generic, postgres, mysql, or hive"
            ))),
        }
    }
}

/// Result cache sizing and expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum live entries before LRU eviction.
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    /// Entry time-to-live in milliseconds; 0 disables TTL expiry.
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
}

fn default_cache_max_entries() -> usize {
    100
}

fn default_cache_ttl_ms() -> u64 {
    3_600_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
            ttl_ms: default_cache_ttl_ms(),
        }
    }
}

/// Cost-model limits for the backend selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Device memory available to the vectorized backend.
    #[serde(default = "default_vectorized_memory")]
    pub vectorized_memory_limit_bytes: u64,
    /// Device memory available to the parallel backend.
    #[serde(default = "default_parallel_memory")]
    pub parallel_memory_limit_bytes: u64,
    /// Node count multiplying the distributed backend's scan throughput.
    #[serde(default = "default_distributed_nodes")]
    pub distributed_nodes: u32,
}

fn default_vectorized_memory() -> u64 {
    32 * 1024 * 1024 * 1024
}

fn default_parallel_memory() -> u64 {
    64 * 1024 * 1024 * 1024
}

fn default_distributed_nodes() -> u32 {
    1
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            vectorized_memory_limit_bytes: default_vectorized_memory(),
            parallel_memory_limit_bytes: default_parallel_memory(),
            distributed_nodes: default_distributed_nodes(),
        }
    }
}

/// Partition-index walk behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionScanConfig {
    /// Threads used to stat partition directories during an index build.
    #[serde(default = "default_scan_parallelism")]
    pub parallelism: usize,
}

fn default_scan_parallelism() -> usize {
    1
}

impl Default for PartitionScanConfig {
    fn default() -> Self {
        Self {
            parallelism: default_scan_parallelism(),
        }
    }
}

/// Router configuration passed in at construction; no process-wide state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Result cache sizing and expiry.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Backend selector limits.
    #[serde(default)]
    pub selector: SelectorConfig,
    /// Partition-index walk behavior.
    #[serde(default)]
    pub partition_scan: PartitionScanConfig,
    /// Dialect used when the caller does not name one.
    #[serde(default)]
    pub default_dialect: SqlDialect,
    /// Optional catalog file (`.json` or `.toml`) loaded at construction.
    #[serde(default)]
    pub catalog_path: Option<String>,
}

impl RouterConfig {
    /// Load configuration from a `.json` or `.toml` file, dispatched on
    /// extension.
    pub fn load(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        match Path::new(path).extension().and_then(|ext| ext.to_str()) {
            Some("json") => {
                serde_json::from_str(&s).map_err(|e| QrxError::InvalidConfig(e.to_string()))
            }
            Some("toml") => toml::from_str(&s).map_err(|e| QrxError::InvalidConfig(e.to_string())),
            Some(other) => Err(QrxError::InvalidConfig(format!(
                "unsupported config extension '.{other}'; use .json or .toml"
            ))),
            None => Err(QrxError::InvalidConfig(
                "config path must include extension .json or .toml".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RouterConfig, SqlDialect};

    #[test]
    fn defaults_match_contract() {
        let cfg = RouterConfig::default();
        assert_eq!(cfg.cache.max_entries, 100);
        assert_eq!(cfg.cache.ttl_ms, 3_600_000);
        assert_eq!(cfg.selector.distributed_nodes, 1);
        assert_eq!(cfg.default_dialect, SqlDialect::Generic);
        assert_eq!(cfg.partition_scan.parallelism, 1);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: RouterConfig = toml::from_str(
            r#"
            default_dialect = "postgres"

            [cache]
            max_entries = 8
        "#,
        )
        .expect("parse toml");
        assert_eq!(cfg.cache.max_entries, 8);
        assert_eq!(cfg.cache.ttl_ms, 3_600_000);
        assert_eq!(cfg.default_dialect, SqlDialect::Postgres);
    }

    #[test]
    fn dialect_from_str_rejects_unknown() {
        assert!("snowflake".parse::<SqlDialect>().is_err());
        assert_eq!(
            "POSTGRES".parse::<SqlDialect>().expect("case-insensitive"),
            SqlDialect::Postgres
        );
    }
}
