use std::sync::Arc;

use axum::http::StatusCode;
use tracing::{error, info};

use shopledger_infra::{
    AdjustError, AlertDesk, InMemoryStockStore, LedgerStore, PostgresStockStore, RetryPolicy,
    StockAdjustmentCoordinator, StoreError,
    config::{AppConfig, StorageBackend},
};

use crate::app::errors;

/// Storage backend shared by every service, selected once at startup.
pub type SharedStore = Arc<dyn LedgerStore>;

/// Everything the handlers call into.
///
/// All store and coordinator calls are synchronous; handlers go through
/// [`AppServices::run`], which moves them onto the blocking pool.
pub struct AppServices {
    store: SharedStore,
    coordinator: StockAdjustmentCoordinator<SharedStore>,
    alerts: AlertDesk<SharedStore>,
}

impl AppServices {
    pub fn new(store: SharedStore, retry: RetryPolicy) -> Self {
        Self {
            coordinator: StockAdjustmentCoordinator::new(store.clone(), retry),
            alerts: AlertDesk::new(store.clone(), retry),
            store,
        }
    }

    /// In-memory wiring (dev/test).
    pub fn in_memory(retry: RetryPolicy) -> Self {
        Self::new(Arc::new(InMemoryStockStore::new()), retry)
    }

    /// Build the backend named in the storage configuration. The Postgres
    /// backend connects and applies migrations before returning.
    pub async fn from_config(config: &AppConfig) -> Result<Self, StoreError> {
        let retry = RetryPolicy::from(&config.retry);
        match config.storage.backend {
            StorageBackend::Memory => {
                info!("using in-memory stock store");
                Ok(Self::in_memory(retry))
            }
            StorageBackend::Postgres => {
                let store = PostgresStockStore::connect(&config.storage).await?;
                store.migrate().await?;
                info!("using postgres stock store");
                Ok(Self::new(Arc::new(store), retry))
            }
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn coordinator(&self) -> &StockAdjustmentCoordinator<SharedStore> {
        &self.coordinator
    }

    pub fn alerts(&self) -> &AlertDesk<SharedStore> {
        &self.alerts
    }

    /// Run a blocking service call off the async executor and map its error
    /// to a response.
    pub async fn run<T, F>(self: &Arc<Self>, f: F) -> Result<T, axum::response::Response>
    where
        T: Send + 'static,
        F: FnOnce(&AppServices) -> Result<T, AdjustError> + Send + 'static,
    {
        let services = Arc::clone(self);
        match tokio::task::spawn_blocking(move || f(&services)).await {
            Ok(result) => result.map_err(errors::adjust_error_to_response),
            Err(join_error) => {
                error!(error = %join_error, "blocking task failed");
                Err(errors::json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "request handler failed",
                ))
            }
        }
    }
}
