//! Stock ledger storage boundary.
//!
//! Three read/write surfaces over one backend: part records ([`StockStore`]),
//! the append-only ledger ([`MovementLog`]) and reorder alerts ([`AlertLog`]).
//! Each backend implements all three so a single commit can span them.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{CommitStage, InMemoryStockStore};
pub use postgres::PostgresStockStore;
pub use r#trait::{
    AlertFilter, AlertLog, MovementFilter, MovementLog, MovementPage, Pagination, StockCommit,
    StockStore, StoreError,
};

/// Everything the HTTP layer needs from one backend.
pub trait LedgerStore: StockStore + MovementLog + AlertLog {}

impl<T> LedgerStore for T where T: StockStore + MovementLog + AlertLog + ?Sized {}
