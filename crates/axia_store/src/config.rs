use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use aideon_axia_core::{AxiaError, AxiaResult, ValidationMode};

const DEFAULT_CONFIG_NAME: &str = "axia.json";
pub(crate) const DEFAULT_DB_NAME: &str = "axia.sqlite";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { path: Option<String> },
    Postgres { url: String },
    Mysql { url: String },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_bulk_items: Option<usize>,
    pub max_string_bytes: Option<usize>,
    pub max_document_bytes: Option<usize>,
    pub max_page_size: Option<u32>,
    /// Rows a predicate query may read before filtering in memory.
    pub max_scan_rows: Option<usize>,
}

impl LimitsConfig {
    pub fn with_defaults() -> Self {
        Self {
            max_bulk_items: Some(100),
            max_string_bytes: Some(65_536),
            max_document_bytes: Some(1_048_576),
            max_page_size: Some(500),
            max_scan_rows: Some(10_000),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub max_conflict_retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
}

impl ConcurrencyConfig {
    pub fn with_defaults() -> Self {
        Self {
            max_conflict_retries: Some(3),
            retry_backoff_ms: Some(5),
        }
    }
}

/// What happens to values referencing an owner entity when that entity is deleted.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceDeletePolicy {
    /// Clear the reference slot and re-validate the row.
    #[default]
    Cascade,
    /// Refuse the delete while current references exist.
    Restrict,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AxiaConfig {
    pub database: DatabaseConfig,
    pub pool: Option<PoolConfig>,
    pub limits: Option<LimitsConfig>,
    pub concurrency: Option<ConcurrencyConfig>,
    pub validation_mode: Option<ValidationMode>,
    pub reference_delete_policy: Option<ReferenceDeletePolicy>,
    pub failpoints: Option<Vec<String>>,
}

impl AxiaConfig {
    pub fn default_sqlite(path: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::Sqlite {
                path: Some(path.into()),
            },
            pool: None,
            limits: Some(LimitsConfig::with_defaults()),
            concurrency: Some(ConcurrencyConfig::with_defaults()),
            validation_mode: Some(ValidationMode::Error),
            reference_delete_policy: Some(ReferenceDeletePolicy::Cascade),
            failpoints: None,
        }
    }

    pub fn load_or_init(base_dir: &Path, default_sqlite_path: &Path) -> AxiaResult<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| AxiaError::storage(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|err| AxiaError::storage(format!("read config: {err}")))?;
            let config: AxiaConfig = serde_json::from_str(&raw)
                .map_err(|err| AxiaError::configuration(format!("parse config: {err}")))?;
            return Ok(config);
        }
        let default = AxiaConfig::default_sqlite(default_sqlite_path.to_string_lossy());
        let payload = serde_json::to_string_pretty(&default)
            .map_err(|err| AxiaError::storage(format!("serialize config: {err}")))?;
        fs::write(&config_path, payload)
            .map_err(|err| AxiaError::storage(format!("write config: {err}")))?;
        Ok(default)
    }

    pub fn sqlite_path(&self, base_dir: &Path) -> AxiaResult<PathBuf> {
        match &self.database {
            DatabaseConfig::Sqlite { path } => {
                let path = path.clone().unwrap_or_else(|| DEFAULT_DB_NAME.to_string());
                let candidate = PathBuf::from(path);
                if candidate.is_absolute() {
                    Ok(candidate)
                } else {
                    Ok(base_dir.join(candidate))
                }
            }
            _ => Err(AxiaError::configuration("config is not sqlite backend")),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.database {
            DatabaseConfig::Sqlite { .. } => "sqlite",
            DatabaseConfig::Postgres { .. } => "postgres",
            DatabaseConfig::Mysql { .. } => "mysql",
        }
    }

    pub fn connection_url(&self, base_dir: &Path) -> AxiaResult<String> {
        match &self.database {
            DatabaseConfig::Sqlite { .. } => {
                let path = self.sqlite_path(base_dir)?;
                Ok(format!("sqlite://{}?mode=rwc", path.display()))
            }
            DatabaseConfig::Postgres { url } | DatabaseConfig::Mysql { url } => Ok(url.clone()),
        }
    }
}

/// Resolved limits with defaults applied.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AxiaLimits {
    pub max_bulk_items: usize,
    pub max_string_bytes: usize,
    pub max_document_bytes: usize,
    pub max_page_size: u32,
    pub max_scan_rows: usize,
}

impl AxiaLimits {
    pub fn from_config(config: &AxiaConfig) -> Self {
        let limits = config
            .limits
            .clone()
            .unwrap_or_else(LimitsConfig::with_defaults);
        Self {
            max_bulk_items: limits.max_bulk_items.unwrap_or(100),
            max_string_bytes: limits.max_string_bytes.unwrap_or(65_536),
            max_document_bytes: limits.max_document_bytes.unwrap_or(1_048_576),
            max_page_size: limits.max_page_size.unwrap_or(500).max(1),
            max_scan_rows: limits.max_scan_rows.unwrap_or(10_000),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AxiaConfig) -> Self {
        let concurrency = config
            .concurrency
            .clone()
            .unwrap_or_else(ConcurrencyConfig::with_defaults);
        Self {
            max_retries: concurrency.max_conflict_retries.unwrap_or(3),
            backoff: Duration::from_millis(concurrency.retry_backoff_ms.unwrap_or(5)),
        }
    }

    /// Linear backoff before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::tempdir;

    use super::{AxiaConfig, AxiaLimits, DatabaseConfig, ReferenceDeletePolicy, RetryPolicy};
    use aideon_axia_core::ValidationMode;

    #[test]
    fn load_or_init_writes_then_reads_config() {
        let dir = tempdir().expect("tempdir");
        let db = dir.path().join("values.sqlite");
        let first = AxiaConfig::load_or_init(dir.path(), &db).expect("init");
        assert_eq!(first.backend_name(), "sqlite");
        assert!(dir.path().join("axia.json").exists());
        let second = AxiaConfig::load_or_init(dir.path(), &db).expect("load");
        assert_eq!(second.validation_mode, Some(ValidationMode::Error));
        assert_eq!(
            second.reference_delete_policy,
            Some(ReferenceDeletePolicy::Cascade)
        );
    }

    #[test]
    fn relative_sqlite_paths_resolve_against_base() {
        let config = AxiaConfig::default_sqlite("nested/values.sqlite");
        let path = config.sqlite_path(Path::new("/data")).expect("path");
        assert_eq!(path, Path::new("/data/nested/values.sqlite"));
        let url = config.connection_url(Path::new("/data")).expect("url");
        assert!(url.starts_with("sqlite:///data/nested/values.sqlite"));
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let raw = r#"{"database": {"backend": "postgres", "url": "postgres://localhost/axia"},
            "pool": null, "limits": {"max_bulk_items": 5, "max_string_bytes": null,
            "max_document_bytes": null, "max_page_size": null}, "concurrency": null,
            "validation_mode": "warn", "reference_delete_policy": "restrict", "failpoints": null}"#;
        let config: AxiaConfig = serde_json::from_str(raw).expect("parse");
        assert!(matches!(config.database, DatabaseConfig::Postgres { .. }));
        assert!(config.sqlite_path(Path::new("/tmp")).is_err());
        let limits = AxiaLimits::from_config(&config);
        assert_eq!(limits.max_bulk_items, 5);
        assert_eq!(limits.max_string_bytes, 65_536);
        assert_eq!(limits.max_scan_rows, 10_000);
        let retry = RetryPolicy::from_config(&config);
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.delay(2).as_millis(), 10);
        assert_eq!(config.validation_mode, Some(ValidationMode::Warn));
    }
}
