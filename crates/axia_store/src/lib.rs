pub mod bulk;
pub mod catalog;
pub mod config;
pub mod datastore;
mod db;
pub mod feed;
pub mod migration;
pub mod references;
pub mod schema_manifest;
pub mod service;
pub mod store;

pub use aideon_axia_core::*;
pub use catalog::InMemoryCatalog;
pub use config::{
    AxiaConfig, ConcurrencyConfig, DatabaseConfig, LimitsConfig, PoolConfig,
    ReferenceDeletePolicy,
};
pub use datastore::{default_sqlite_path, load_or_init_config, open_store};
pub use schema_manifest::load_schema_manifest;
pub use store::{AxiaStore, BackendCapabilities, Collaborators};
