use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use shopledger_core::{AlertId, ErrorCategory, ExpectedVersion, PartId};
use shopledger_inventory::{
    AlertChange, AlertPriority, AlertStatus, MovementEntry, MovementSummary, MovementType, Part,
    PartNumber, ReorderAlert, TimeWindow,
};

/// Storage operation error.
///
/// These are infrastructure errors (versioning, uniqueness, transport) as
/// opposed to domain errors (quantities, thresholds, transitions).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic concurrency check failed; a reload-and-retry may succeed.
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    /// A uniqueness rule (part number, open alert) rejected the write.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// The write was internally inconsistent and was refused as a whole.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// Backend unreachable, timed out or failed mid-commit. Nothing was applied.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            StoreError::Conflict(_) => ErrorCategory::Concurrency,
            StoreError::NotFound(_) => ErrorCategory::NotFound,
            StoreError::Duplicate(_) => ErrorCategory::BusinessRule,
            StoreError::Constraint(_) | StoreError::Unavailable(_) => ErrorCategory::Storage,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// One unit of work: the next part state plus everything derived from it.
///
/// Stores apply all of it or none of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockCommit {
    pub part: Part,
    pub movement: Option<MovementEntry>,
    pub alert: Option<AlertChange>,
}

impl StockCommit {
    pub fn part_only(part: Part) -> Self {
        Self {
            part,
            movement: None,
            alert: None,
        }
    }

    /// Structural checks shared by every backend, run before touching storage.
    pub fn validate(&self, current_version: u64) -> Result<(), StoreError> {
        use shopledger_core::AggregateRoot;

        let part_id = self.part.id_typed();
        if self.part.version() != current_version + 1 {
            return Err(StoreError::Constraint(format!(
                "part {part_id} must advance from version {current_version} to {}, got {}",
                current_version + 1,
                self.part.version()
            )));
        }
        if let Some(entry) = &self.movement {
            if entry.part_id != part_id {
                return Err(StoreError::Constraint(format!(
                    "movement {} belongs to part {}, not {part_id}",
                    entry.id, entry.part_id
                )));
            }
            if entry.sequence != self.part.version() || entry.new_stock != self.part.current_stock()
            {
                return Err(StoreError::Constraint(format!(
                    "movement {} (sequence {}, new_stock {}) does not match part state (version {}, stock {})",
                    entry.id,
                    entry.sequence,
                    entry.new_stock,
                    self.part.version(),
                    self.part.current_stock()
                )));
            }
        }
        if let Some(change) = &self.alert {
            if change.alert().part_id != part_id {
                return Err(StoreError::Constraint(format!(
                    "alert {} belongs to part {}, not {part_id}",
                    change.alert().id,
                    change.alert().part_id
                )));
            }
        }
        Ok(())
    }
}

/// Pagination parameters for ledger queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Pagination {
    pub const MAX_LIMIT: u32 = 1000;

    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }

    pub(crate) fn window<T: Clone>(&self, items: &[T]) -> Vec<T> {
        items
            .iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .cloned()
            .collect()
    }
}

/// Filter criteria for ledger queries. `occurred_after` is inclusive,
/// `occurred_before` exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub part_id: Option<PartId>,
    pub movement_type: Option<MovementType>,
    pub occurred_after: Option<DateTime<Utc>>,
    pub occurred_before: Option<DateTime<Utc>>,
}

impl MovementFilter {
    pub fn for_part(part_id: PartId) -> Self {
        Self {
            part_id: Some(part_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &MovementEntry) -> bool {
        self.part_id.is_none_or(|p| entry.part_id == p)
            && self.movement_type.is_none_or(|t| entry.movement_type == t)
            && self.occurred_after.is_none_or(|t| entry.occurred_at >= t)
            && self.occurred_before.is_none_or(|t| entry.occurred_at < t)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementPage {
    pub entries: Vec<MovementEntry>,
    /// Matches across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl MovementPage {
    pub(crate) fn new(entries: Vec<MovementEntry>, total: u64, pagination: Pagination) -> Self {
        let has_more = u64::from(pagination.offset) + (entries.len() as u64) < total;
        Self {
            entries,
            total,
            pagination,
            has_more,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertFilter {
    pub part_id: Option<PartId>,
    pub status: Option<AlertStatus>,
    pub priority: Option<AlertPriority>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &ReorderAlert) -> bool {
        self.part_id.is_none_or(|p| alert.part_id == p)
            && self.status.is_none_or(|s| alert.status == s)
            && self.priority.is_none_or(|p| alert.priority == p)
    }
}

/// Current-state store for part records.
///
/// `commit` is the single read-modify-write primitive: it checks the part's
/// persisted version against `expected`, then writes the part, appends the
/// movement, and applies the alert change atomically.
pub trait StockStore: Send + Sync {
    fn load_part(&self, part_id: PartId) -> Result<Option<Part>, StoreError>;

    fn find_by_part_number(&self, part_number: &PartNumber) -> Result<Option<Part>, StoreError>;

    fn commit(&self, commit: StockCommit, expected: ExpectedVersion) -> Result<(), StoreError>;
}

/// Read side of the append-only movement ledger.
pub trait MovementLog: Send + Sync {
    /// One part's history in sequence order.
    fn movements_for_part(
        &self,
        part_id: PartId,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError>;

    /// Ledger-wide query in time order.
    fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError>;

    fn summarize(&self, part_id: PartId, window: TimeWindow)
    -> Result<MovementSummary, StoreError>;
}

/// Reorder alert records.
pub trait AlertLog: Send + Sync {
    /// The part's open alert if it has one, otherwise its most recent alert.
    fn latest_alert_for_part(&self, part_id: PartId) -> Result<Option<ReorderAlert>, StoreError>;

    fn get_alert(&self, alert_id: AlertId) -> Result<Option<ReorderAlert>, StoreError>;

    /// Matching alerts, most recently raised first.
    fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<ReorderAlert>, StoreError>;

    /// Persist an operator transition of an existing alert.
    fn save_alert(&self, alert: &ReorderAlert, expected: ExpectedVersion)
    -> Result<(), StoreError>;
}

impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    fn load_part(&self, part_id: PartId) -> Result<Option<Part>, StoreError> {
        (**self).load_part(part_id)
    }

    fn find_by_part_number(&self, part_number: &PartNumber) -> Result<Option<Part>, StoreError> {
        (**self).find_by_part_number(part_number)
    }

    fn commit(&self, commit: StockCommit, expected: ExpectedVersion) -> Result<(), StoreError> {
        (**self).commit(commit, expected)
    }
}

impl<S> MovementLog for Arc<S>
where
    S: MovementLog + ?Sized,
{
    fn movements_for_part(
        &self,
        part_id: PartId,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        (**self).movements_for_part(part_id, pagination)
    }

    fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        (**self).query_movements(filter, pagination)
    }

    fn summarize(
        &self,
        part_id: PartId,
        window: TimeWindow,
    ) -> Result<MovementSummary, StoreError> {
        (**self).summarize(part_id, window)
    }
}

impl<S> AlertLog for Arc<S>
where
    S: AlertLog + ?Sized,
{
    fn latest_alert_for_part(&self, part_id: PartId) -> Result<Option<ReorderAlert>, StoreError> {
        (**self).latest_alert_for_part(part_id)
    }

    fn get_alert(&self, alert_id: AlertId) -> Result<Option<ReorderAlert>, StoreError> {
        (**self).get_alert(alert_id)
    }

    fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<ReorderAlert>, StoreError> {
        (**self).list_alerts(filter)
    }

    fn save_alert(
        &self,
        alert: &ReorderAlert,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        (**self).save_alert(alert, expected)
    }
}
