//! Inventory stock ledger domain.
//!
//! Pure, deterministic business rules for part records, stock movements and
//! reorder alerts (no IO, no HTTP, no storage). Every state change is a
//! function from the current record to the next one; persisting it
//! atomically is the infrastructure layer's job.

pub mod alert;
pub mod error;
pub mod movement;
pub mod part;
pub mod summary;

pub use alert::{
    AlertChange, AlertPriority, AlertStatus, ReorderAlert, StockObservation, evaluate,
};
pub use error::StockError;
pub use movement::{
    AdjustStock, MovementEntry, MovementType, StockTransition, TransferRoute, replay_stock,
    transition,
};
pub use part::{
    CreatePart, Currency, Location, OPENING_BALANCE_REFERENCE, Part, PartNumber, PartRecord,
    StockPolicy, UpdatePartDetails,
};
pub use summary::{MovementSummary, MovementTotals, TimeWindow, summarize};
