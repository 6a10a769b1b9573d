//! Relational backends for the Knox store.
//!
//! Each engine sits behind a cargo feature (`sqlite`, `mysql`) and implements
//! [`knox_types::Backend`]. [`open_backend`] picks one from configuration.

mod sql;

#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "sqlite")]
mod sqlite;

use knox_types::{Backend, BackendError, DbConfig, DbDriver};
use std::sync::Arc;

pub use knox_types::Table;

#[cfg(feature = "mysql")]
pub use mysql::MysqlBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

/// Open the backend named by `cfg.driver`.
///
/// An unset or unknown driver yields `Ok(None)`: the store then runs without
/// persistence. A known driver whose feature is compiled out is `Unsupported`.
pub async fn open_backend(cfg: &DbConfig) -> Result<Option<Arc<dyn Backend>>, BackendError> {
    let driver = match cfg.driver() {
        Some(d) => d,
        None => {
            if !cfg.driver.is_empty() {
                tracing::warn!(driver = %cfg.driver, "unknown db driver, running without a backend");
            }
            return Ok(None);
        }
    };
    match driver {
        DbDriver::Sqlite3 => open_sqlite(cfg),
        DbDriver::Mysql => open_mysql(cfg).await,
    }
}

#[cfg(feature = "sqlite")]
fn open_sqlite(cfg: &DbConfig) -> Result<Option<Arc<dyn Backend>>, BackendError> {
    let backend = if cfg.sqlite_path == ":memory:" {
        SqliteBackend::open_in_memory()?
    } else {
        SqliteBackend::open(&cfg.sqlite_path)?
    };
    tracing::info!(path = %cfg.sqlite_path, "opened sqlite backend");
    Ok(Some(Arc::new(backend)))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_cfg: &DbConfig) -> Result<Option<Arc<dyn Backend>>, BackendError> {
    Err(BackendError::Unsupported(
        "sqlite3 support not compiled in".to_string(),
    ))
}

#[cfg(feature = "mysql")]
async fn open_mysql(cfg: &DbConfig) -> Result<Option<Arc<dyn Backend>>, BackendError> {
    Ok(Some(Arc::new(MysqlBackend::connect(cfg).await?)))
}

#[cfg(not(feature = "mysql"))]
async fn open_mysql(_cfg: &DbConfig) -> Result<Option<Arc<dyn Backend>>, BackendError> {
    Err(BackendError::Unsupported(
        "mysql support not compiled in".to_string(),
    ))
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_driver_means_no_backend() {
        let cfg = DbConfig {
            driver: "mongo".to_string(),
            ..DbConfig::default()
        };
        assert!(open_backend(&cfg).await.unwrap().is_none());
        assert!(open_backend(&DbConfig::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sqlite_driver_opens_in_memory() {
        let backend = open_backend(&DbConfig::sqlite(":memory:"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(backend.driver_name(), "sqlite3");
        backend.create_table(Table::SystemSummary).await.unwrap();
    }
}
