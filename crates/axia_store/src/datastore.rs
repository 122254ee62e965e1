use std::path::{Path, PathBuf};

use crate::config::DEFAULT_DB_NAME;
use crate::{AxiaConfig, AxiaResult, AxiaStore, Collaborators};

pub fn load_or_init_config(base: &Path) -> AxiaResult<AxiaConfig> {
    AxiaConfig::load_or_init(base, &default_sqlite_path(base))
}

/// Opens the store rooted at `base`, writing a default SQLite config on first use.
pub async fn open_store(base: &Path, collaborators: Collaborators) -> AxiaResult<AxiaStore> {
    let config = load_or_init_config(base)?;
    AxiaStore::connect(&config, base, collaborators).await
}

pub fn default_sqlite_path(base: &Path) -> PathBuf {
    base.join(DEFAULT_DB_NAME)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{default_sqlite_path, load_or_init_config, open_store};
    use crate::InMemoryCatalog;
    use tempfile::tempdir;

    #[tokio::test]
    async fn opens_store_with_default_config() {
        let dir = tempdir().expect("tempdir");
        let base = dir.path();
        let config = load_or_init_config(base).expect("config");
        assert_eq!(config.backend_name(), "sqlite");
        let catalog = Arc::new(InMemoryCatalog::new());
        let store = open_store(base, catalog.collaborators())
            .await
            .expect("open store");
        assert!(default_sqlite_path(base).exists());
        assert!(store.capabilities().partial_indexes);
    }
}
