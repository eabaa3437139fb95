//! Storage module for persisting harvested records
//!
//! This module contains the storage capability contract and its backends:
//! - `SqliteStorage`: embedded relational store with local media directory
//! - `BatchFileStorage`: append-only JSON batch files
//! - `RestStorage`: remote PostgREST-style service with object storage
//!
//! The backend is chosen by the `[storage]` configuration section.

mod batch_file;
mod rest;
mod schema;
mod sqlite;
mod traits;

pub use batch_file::BatchFileStorage;
pub use rest::RestStorage;
pub use schema::initialize_schema;
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::config::StorageConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Opens the backend selected by `config`
pub fn open_storage(config: &StorageConfig) -> StorageResult<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match config {
        StorageConfig::Sqlite { path, image_dir } => {
            let path = Path::new(path);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let image_dir = match image_dir {
                Some(dir) => PathBuf::from(dir),
                None => default_image_dir(path),
            };
            Arc::new(SqliteStorage::new(path, Some(image_dir))?)
        }
        StorageConfig::Json {
            output_dir,
            flush_threshold,
        } => Arc::new(BatchFileStorage::new(Path::new(output_dir), *flush_threshold)?),
        StorageConfig::Rest {
            url,
            key,
            schema,
            bucket,
        } => Arc::new(RestStorage::new(url, key, schema, bucket.clone())?),
    };
    tracing::info!("Opened {} storage", storage.name());
    Ok(storage)
}

/// `images/` next to the database file
fn default_image_dir(db_path: &Path) -> PathBuf {
    match db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent.join("images"),
        None => PathBuf::from("images"),
    }
}
