//! Stock Adjustment Coordinator: the single write path for part records.
//!
//! Every operation runs the same cycle:
//!
//! ```text
//! load part (+ latest alert)
//!   ↓
//! decide next state (pure domain: transition, ledger line, alert evaluation)
//!   ↓
//! commit part + ledger line + alert change, expecting the loaded version
//!   ↓ conflict?
//! back off and re-run the whole cycle (bounded by RetryPolicy)
//! ```
//!
//! Domain rejections are deterministic and never retried. Storage failures are
//! reported as not applied and never retried either; only optimistic
//! concurrency conflicts are.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use shopledger_core::{AlertId, ErrorCategory, ExpectedVersion, MovementId, PartId};
use shopledger_inventory::{
    AdjustStock, AlertChange, CreatePart, MovementEntry, Part, PartNumber, ReorderAlert,
    StockError, StockObservation, UpdatePartDetails, evaluate,
};

use crate::retry::RetryPolicy;
use crate::store::{AlertLog, StockCommit, StockStore, StoreError};

/// Failure of a coordinator or alert desk operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdjustError {
    #[error("part {0} not found")]
    PartNotFound(PartId),

    #[error("alert {0} not found")]
    AlertNotFound(AlertId),

    #[error("part number {0} already exists")]
    DuplicatePartNumber(PartNumber),

    #[error(transparent)]
    Stock(#[from] StockError),

    #[error("concurrent modification conflict after {attempts} attempt(s): {reason}")]
    ConcurrentModificationConflict { attempts: u32, reason: String },

    /// The write did not apply.
    #[error("storage failure: {0}")]
    Storage(StoreError),
}

impl AdjustError {
    /// Stable snake_case code for clients.
    pub fn kind(&self) -> &'static str {
        match self {
            AdjustError::PartNotFound(_) => "part_not_found",
            AdjustError::AlertNotFound(_) => "alert_not_found",
            AdjustError::DuplicatePartNumber(_) => "duplicate_part_number",
            AdjustError::Stock(e) => e.kind(),
            AdjustError::ConcurrentModificationConflict { .. } => {
                "concurrent_modification_conflict"
            }
            AdjustError::Storage(_) => "storage",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AdjustError::PartNotFound(_) | AdjustError::AlertNotFound(_) => {
                ErrorCategory::NotFound
            }
            AdjustError::DuplicatePartNumber(_) => ErrorCategory::BusinessRule,
            AdjustError::Stock(e) => e.category(),
            AdjustError::ConcurrentModificationConflict { .. } => ErrorCategory::Concurrency,
            AdjustError::Storage(_) => ErrorCategory::Storage,
        }
    }
}

impl From<StoreError> for AdjustError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(reason) => AdjustError::ConcurrentModificationConflict {
                attempts: 1,
                reason,
            },
            other => AdjustError::Storage(other),
        }
    }
}

/// Result of a committed stock adjustment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustmentOutcome {
    pub part: Part,
    pub movement: MovementEntry,
    /// The alert this write raised, re-triggered or resolved; otherwise the
    /// part's still-open alert, if any.
    pub alert: Option<ReorderAlert>,
}

/// Result of a committed part write that is not a stock movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartOutcome {
    pub part: Part,
    /// Opening-balance line for freshly created parts.
    pub movement: Option<MovementEntry>,
    pub alert: Option<ReorderAlert>,
}

/// Single entry point for every part write.
#[derive(Debug)]
pub struct StockAdjustmentCoordinator<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S> StockAdjustmentCoordinator<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> StockAdjustmentCoordinator<S>
where
    S: StockStore + AlertLog,
{
    /// Apply one stock movement: quantity update, ledger line and alert
    /// re-evaluation commit together or not at all.
    #[instrument(
        skip(self, cmd),
        fields(
            part_id = %cmd.part_id,
            movement_type = %cmd.movement_type,
            quantity = cmd.quantity
        ),
        err
    )]
    pub fn adjust_stock(&self, cmd: AdjustStock) -> Result<AdjustmentOutcome, AdjustError> {
        let movement_id = MovementId::new();
        let outcome = self.with_retry("adjust_stock", || {
            let part = self.load_existing(cmd.part_id)?;
            let (next, entry) = part.record_movement(movement_id, &cmd)?;
            let (change, open) = self.evaluate_alert(Some(&part), &next, cmd.occurred_at)?;

            self.store.commit(
                StockCommit {
                    part: next.clone(),
                    movement: Some(entry.clone()),
                    alert: change.clone(),
                },
                ExpectedVersion::of(&part),
            )?;

            log_alert_change(change.as_ref());
            Ok(AdjustmentOutcome {
                part: next,
                movement: entry,
                alert: change.map(AlertChange::into_alert).or(open),
            })
        })?;

        info!(
            part_id = %outcome.part.id_typed(),
            sequence = outcome.movement.sequence,
            previous_stock = outcome.movement.previous_stock,
            new_stock = outcome.movement.new_stock,
            "stock adjusted"
        );
        Ok(outcome)
    }

    /// Register a new part, recording any opening stock as an `IN` movement.
    #[instrument(skip(self, cmd), fields(part_number = %cmd.part_number), err)]
    pub fn create_part(&self, cmd: CreatePart) -> Result<PartOutcome, AdjustError> {
        if self.store.find_by_part_number(&cmd.part_number)?.is_some() {
            return Err(AdjustError::DuplicatePartNumber(cmd.part_number));
        }

        let part_number = cmd.part_number.clone();
        let occurred_at = cmd.occurred_at;
        let (part, movement) = Part::create(PartId::new(), cmd, MovementId::new())?;
        let (change, _) = self.evaluate_alert(None, &part, occurred_at)?;

        let commit = StockCommit {
            part: part.clone(),
            movement: movement.clone(),
            alert: change.clone(),
        };
        match self.store.commit(commit, ExpectedVersion::Exact(0)) {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => {
                return Err(AdjustError::DuplicatePartNumber(part_number));
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            part_id = %part.id_typed(),
            part_number = %part.part_number(),
            opening_stock = part.current_stock(),
            "part created"
        );
        log_alert_change(change.as_ref());
        Ok(PartOutcome {
            part,
            movement,
            alert: change.map(AlertChange::into_alert),
        })
    }

    /// Change non-quantity attributes. Not ledgered, but a threshold change
    /// re-evaluates the reorder alert in the same commit.
    #[instrument(skip(self, cmd), fields(part_id = %part_id), err)]
    pub fn update_part_details(
        &self,
        part_id: PartId,
        cmd: UpdatePartDetails,
        at: DateTime<Utc>,
    ) -> Result<PartOutcome, AdjustError> {
        self.with_retry("update_part_details", || {
            let part = self.load_existing(part_id)?;
            let next = part.apply_details(&cmd, at)?;
            let (change, open) = self.evaluate_alert(Some(&part), &next, at)?;

            self.store.commit(
                StockCommit {
                    part: next.clone(),
                    movement: None,
                    alert: change.clone(),
                },
                ExpectedVersion::of(&part),
            )?;

            log_alert_change(change.as_ref());
            Ok(PartOutcome {
                part: next,
                movement: None,
                alert: change.map(AlertChange::into_alert).or(open),
            })
        })
    }

    /// Soft-delete. Alerts are left as they are.
    #[instrument(skip(self), fields(part_id = %part_id), err)]
    pub fn deactivate_part(&self, part_id: PartId, at: DateTime<Utc>) -> Result<Part, AdjustError> {
        self.set_active(part_id, at, false)
    }

    #[instrument(skip(self), fields(part_id = %part_id), err)]
    pub fn reactivate_part(&self, part_id: PartId, at: DateTime<Utc>) -> Result<Part, AdjustError> {
        self.set_active(part_id, at, true)
    }

    pub fn part(&self, part_id: PartId) -> Result<Part, AdjustError> {
        self.load_existing(part_id)
    }

    fn set_active(
        &self,
        part_id: PartId,
        at: DateTime<Utc>,
        active: bool,
    ) -> Result<Part, AdjustError> {
        let operation = if active { "reactivate_part" } else { "deactivate_part" };
        let part = self.with_retry(operation, || {
            let part = self.load_existing(part_id)?;
            let next = if active {
                part.reactivated(at)?
            } else {
                part.deactivated(at)?
            };
            self.store
                .commit(StockCommit::part_only(next.clone()), ExpectedVersion::of(&part))?;
            Ok(next)
        })?;
        info!(part_id = %part_id, is_active = active, "part lifecycle changed");
        Ok(part)
    }

    fn load_existing(&self, part_id: PartId) -> Result<Part, AdjustError> {
        self.store
            .load_part(part_id)?
            .ok_or(AdjustError::PartNotFound(part_id))
    }

    /// Returns the alert change to commit and the part's currently open
    /// alert (used when nothing changes).
    fn evaluate_alert(
        &self,
        before: Option<&Part>,
        after: &Part,
        at: DateTime<Utc>,
    ) -> Result<(Option<AlertChange>, Option<ReorderAlert>), AdjustError> {
        let latest = match before {
            Some(_) => self.store.latest_alert_for_part(after.id_typed())?,
            None => None,
        };
        let observation = StockObservation::between(before, after, at);
        let change = evaluate(latest.as_ref(), &observation, AlertId::new());
        let open = latest.filter(|a| a.status.is_open());
        Ok((change, open))
    }

    fn with_retry<T>(
        &self,
        operation: &'static str,
        mut attempt_once: impl FnMut() -> Result<T, AdjustError>,
    ) -> Result<T, AdjustError> {
        retry_on_conflict(&self.retry, operation, &mut attempt_once)
    }
}

/// Re-run `attempt_once` while it fails with an optimistic concurrency
/// conflict and the policy allows another attempt.
pub(crate) fn retry_on_conflict<T>(
    policy: &RetryPolicy,
    operation: &'static str,
    attempt_once: &mut dyn FnMut() -> Result<T, AdjustError>,
) -> Result<T, AdjustError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match attempt_once() {
            Err(AdjustError::ConcurrentModificationConflict { reason, .. }) => {
                if !policy.should_retry(attempt) {
                    warn!(operation, attempts = attempt, %reason, "retries exhausted");
                    return Err(AdjustError::ConcurrentModificationConflict {
                        attempts: attempt,
                        reason,
                    });
                }
                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    operation,
                    attempt,
                    delay_us = delay.as_micros() as u64,
                    %reason,
                    "conflict, retrying"
                );
                std::thread::sleep(delay);
            }
            other => return other,
        }
    }
}

fn log_alert_change(change: Option<&AlertChange>) {
    if let Some(change) = change {
        let alert = change.alert();
        info!(
            alert_id = %alert.id,
            part_id = %alert.part_id,
            status = alert.status.as_str(),
            priority = alert.priority.as_str(),
            current_stock = alert.current_stock,
            "reorder alert {}",
            change.label()
        );
    }
}
