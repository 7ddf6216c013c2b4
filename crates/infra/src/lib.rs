//! Infrastructure layer: storage backends, the stock adjustment coordinator,
//! the alert desk, retry policy and configuration.

pub mod alert_desk;
pub mod config;
pub mod coordinator;
pub mod retry;
pub mod store;

mod integration_tests;

pub use alert_desk::AlertDesk;
pub use coordinator::{AdjustError, AdjustmentOutcome, PartOutcome, StockAdjustmentCoordinator};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use store::{
    AlertFilter, AlertLog, CommitStage, InMemoryStockStore, LedgerStore, MovementFilter,
    MovementLog, MovementPage, Pagination, PostgresStockStore, StockCommit, StockStore,
    StoreError,
};
