use std::sync::Arc;

use tracing::{error, warn};

use crate::auth::{memory::MemoryUserStore, repo::PgUserStore, repo::UserStore};
use crate::config::AppConfig;
use crate::error::StartupError;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Reads configuration and opens the user store. Failing to reach the
    /// store here is fatal.
    pub async fn init() -> Result<Self, StartupError> {
        let config = Arc::new(AppConfig::from_env().map_err(StartupError::Config)?);

        let store = PgUserStore::connect(&config).await.map_err(|e| {
            error!(error = %e, "cannot reach user store at startup");
            StartupError::StoreUnreachable(e)
        })?;

        // Run migrations if present
        if let Err(e) = store.migrate().await {
            warn!(error = %e, "migration failed; continuing with existing schema");
        }

        Ok(Self {
            store: Arc::new(store) as Arc<dyn UserStore>,
            config,
        })
    }

    pub fn from_parts(store: Arc<dyn UserStore>, config: Arc<AppConfig>) -> Self {
        Self { store, config }
    }

    /// In-memory state for tests and local demos.
    pub fn fake() -> Self {
        Self::from_parts(
            Arc::new(MemoryUserStore::new()) as Arc<dyn UserStore>,
            Arc::new(AppConfig::for_tests()),
        )
    }
}
