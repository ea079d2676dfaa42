//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::auth::IdentityVerifier;
use crate::config::Config;
use crate::sync::service::SyncService;
use crate::sync::store::{ProgressStore, SqliteProgressStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    db: SqlitePool,
    identity: Arc<dyn IdentityVerifier>,
    progress: Arc<dyn ProgressStore>,
}

impl AppState {
    /// Create a new application state over an initialized pool
    pub fn new(config: Config, db: SqlitePool, identity: Arc<dyn IdentityVerifier>) -> Self {
        let progress = Arc::new(SqliteProgressStore::new(db.clone()));

        Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                identity,
                progress,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the database pool
    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    /// Get the identity verifier
    pub fn identity(&self) -> &Arc<dyn IdentityVerifier> {
        &self.inner.identity
    }

    /// Build a sync service over the shared progress store
    pub fn sync_service(&self) -> SyncService {
        SyncService::new(
            self.inner.progress.clone(),
            self.inner.config.sync.max_write_attempts,
        )
    }
}
