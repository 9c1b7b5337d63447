//! Application state

use std::sync::Arc;

use orgdesk_core::directory::{DirectoryStore, FileDirectoryStore};
use tracing::info;

use crate::auth::{IdentityResolver, SessionKeys};
use crate::config::AppConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn DirectoryStore>,
    identity: IdentityResolver,
}

impl AppState {
    /// Open the configured store and build the state around it
    pub async fn from_config(config: &AppConfig) -> orgdesk_core::Result<Self> {
        let store = open_store(config).await?;
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: &AppConfig, store: Arc<dyn DirectoryStore>) -> Self {
        let keys = SessionKeys::new(&config.session_secret, config.session_ttl_seconds);
        let identity = IdentityResolver::new(keys, config.session_cookie_name());
        Self {
            inner: Arc::new(AppStateInner { store, identity }),
        }
    }

    /// Get reference to the directory store
    pub fn store(&self) -> &Arc<dyn DirectoryStore> {
        &self.inner.store
    }

    pub fn identity(&self) -> &IdentityResolver {
        &self.inner.identity
    }
}

#[cfg(feature = "postgres")]
async fn open_store(config: &AppConfig) -> orgdesk_core::Result<Arc<dyn DirectoryStore>> {
    if let Some(postgres) = &config.postgres {
        let store =
            orgdesk_core::directory::PgDirectoryStore::connect_with(postgres.connect_options())
                .await?;
        store.ensure_schema().await?;
        info!(host = %postgres.host, database = %postgres.database, "Using PostgreSQL directory store");
        return Ok(Arc::new(store));
    }
    open_file_store(config).await
}

#[cfg(not(feature = "postgres"))]
async fn open_store(config: &AppConfig) -> orgdesk_core::Result<Arc<dyn DirectoryStore>> {
    if config.postgres.is_some() {
        tracing::warn!("POSTGRES_DB is set but the postgres feature is disabled; using the file store");
    }
    open_file_store(config).await
}

async fn open_file_store(config: &AppConfig) -> orgdesk_core::Result<Arc<dyn DirectoryStore>> {
    let store = FileDirectoryStore::new(&config.data_dir).await?;
    info!(path = %store.file_path().display(), "Using file directory store");
    Ok(Arc::new(store))
}
