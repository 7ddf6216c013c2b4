//! Reorder alert state machine.
//!
//! ```text
//! (no alert) --stock <= min--> ACTIVE
//! ACTIVE --ack--> ACKNOWLEDGED
//! ACTIVE|ACKNOWLEDGED --stock > min--> RESOLVED
//! ACTIVE|ACKNOWLEDGED --dismiss--> DISMISSED
//! RESOLVED|DISMISSED --stock <= min again--> ACTIVE (new record)
//! ```
//!
//! [`evaluate`] is the only place alerts are raised, re-triggered or resolved.
//! It is pure and idempotent: feeding it the alert it just produced together
//! with the same observation yields no further change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopledger_core::{AggregateRoot, AlertId, PartId, UserId};

use crate::error::StockError;
use crate::part::Part;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    Dismissed,
}

impl AlertStatus {
    /// `ACTIVE` or `ACKNOWLEDGED`. At most one open alert exists per part.
    pub fn is_open(self) -> bool {
        matches!(self, AlertStatus::Active | AlertStatus::Acknowledged)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Active => "ACTIVE",
            AlertStatus::Acknowledged => "ACKNOWLEDGED",
            AlertStatus::Resolved => "RESOLVED",
            AlertStatus::Dismissed => "DISMISSED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        [
            AlertStatus::Active,
            AlertStatus::Acknowledged,
            AlertStatus::Resolved,
            AlertStatus::Dismissed,
        ]
        .into_iter()
        .find(|s| s.as_str().eq_ignore_ascii_case(raw))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertPriority {
    /// `CRITICAL` at zero, `HIGH` at or below half the threshold, else `MEDIUM`.
    ///
    /// `LOW` is never assigned automatically.
    pub fn for_stock(current_stock: i64, min_stock_level: i64) -> Self {
        if current_stock <= 0 {
            AlertPriority::Critical
        } else if current_stock.saturating_mul(2) <= min_stock_level {
            AlertPriority::High
        } else {
            AlertPriority::Medium
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertPriority::Low => "LOW",
            AlertPriority::Medium => "MEDIUM",
            AlertPriority::High => "HIGH",
            AlertPriority::Critical => "CRITICAL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        [
            AlertPriority::Low,
            AlertPriority::Medium,
            AlertPriority::High,
            AlertPriority::Critical,
        ]
        .into_iter()
        .find(|p| p.as_str().eq_ignore_ascii_case(raw))
    }
}

/// Aggregate root: ReorderAlert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderAlert {
    pub id: AlertId,
    pub part_id: PartId,
    pub status: AlertStatus,
    pub priority: AlertPriority,
    pub current_stock: i64,
    pub min_stock_level: i64,
    pub trigger_count: u32,
    pub raised_at: DateTime<Utc>,
    pub last_triggered_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<UserId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub dismissed_at: Option<DateTime<Utc>>,
    pub dismissed_by: Option<UserId>,
    pub version: u64,
}

impl AggregateRoot for ReorderAlert {
    type Id = AlertId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl ReorderAlert {
    fn raise(id: AlertId, obs: &StockObservation) -> Self {
        Self {
            id,
            part_id: obs.part_id,
            status: AlertStatus::Active,
            priority: obs.priority(),
            current_stock: obs.current_stock,
            min_stock_level: obs.min_stock_level,
            trigger_count: 1,
            raised_at: obs.observed_at,
            last_triggered_at: obs.observed_at,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            dismissed_at: None,
            dismissed_by: None,
            version: 1,
        }
    }

    fn next(&self) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next
    }

    fn retriggered(&self, obs: &StockObservation) -> Self {
        let mut next = self.next();
        next.priority = obs.priority();
        next.current_stock = obs.current_stock;
        next.min_stock_level = obs.min_stock_level;
        next.trigger_count = next.trigger_count.saturating_add(1);
        next.last_triggered_at = obs.observed_at;
        next
    }

    fn resolved(&self, obs: &StockObservation) -> Self {
        let mut next = self.next();
        next.status = AlertStatus::Resolved;
        next.current_stock = obs.current_stock;
        next.min_stock_level = obs.min_stock_level;
        next.resolved_at = Some(obs.observed_at);
        next
    }

    /// Operator transition: `ACTIVE -> ACKNOWLEDGED`.
    pub fn acknowledge(&self, actor: UserId, at: DateTime<Utc>) -> Result<Self, StockError> {
        if self.status != AlertStatus::Active {
            return Err(StockError::InvalidAlertTransition {
                from: self.status,
                action: "acknowledge",
            });
        }
        let mut next = self.next();
        next.status = AlertStatus::Acknowledged;
        next.acknowledged_at = Some(at);
        next.acknowledged_by = Some(actor);
        Ok(next)
    }

    /// Operator transition: `ACTIVE|ACKNOWLEDGED -> DISMISSED`.
    pub fn dismiss(&self, actor: UserId, at: DateTime<Utc>) -> Result<Self, StockError> {
        if !self.status.is_open() {
            return Err(StockError::InvalidAlertTransition {
                from: self.status,
                action: "dismiss",
            });
        }
        let mut next = self.next();
        next.status = AlertStatus::Dismissed;
        next.dismissed_at = Some(at);
        next.dismissed_by = Some(actor);
        Ok(next)
    }
}

/// Stock level of one part right after a committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockObservation {
    pub part_id: PartId,
    /// Whether the part was at or below its threshold before this write.
    pub was_below_threshold: bool,
    pub current_stock: i64,
    pub min_stock_level: i64,
    pub observed_at: DateTime<Utc>,
}

impl StockObservation {
    /// Observation for the write that took the part from `before` to `after`.
    /// A freshly created part has no `before`.
    pub fn between(before: Option<&Part>, after: &Part, observed_at: DateTime<Utc>) -> Self {
        Self {
            part_id: after.id_typed(),
            was_below_threshold: before.is_some_and(Part::is_reorder_required),
            current_stock: after.current_stock(),
            min_stock_level: after.policy().min_stock_level(),
            observed_at,
        }
    }

    pub fn is_low(&self) -> bool {
        self.current_stock <= self.min_stock_level
    }

    pub fn priority(&self) -> AlertPriority {
        AlertPriority::for_stock(self.current_stock, self.min_stock_level)
    }
}

/// Write the alert engine wants committed alongside a part write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertChange {
    /// Insert a new `ACTIVE` record.
    Raise(ReorderAlert),
    /// Update the open record's snapshot and priority.
    Retrigger(ReorderAlert),
    /// Close the open record.
    Resolve(ReorderAlert),
}

impl AlertChange {
    pub fn alert(&self) -> &ReorderAlert {
        match self {
            AlertChange::Raise(a) | AlertChange::Retrigger(a) | AlertChange::Resolve(a) => a,
        }
    }

    pub fn into_alert(self) -> ReorderAlert {
        match self {
            AlertChange::Raise(a) | AlertChange::Retrigger(a) | AlertChange::Resolve(a) => a,
        }
    }

    /// Version the stored record must be at for this change to apply.
    pub fn expected_version(&self) -> u64 {
        self.alert().version - 1
    }

    pub fn label(&self) -> &'static str {
        match self {
            AlertChange::Raise(_) => "raised",
            AlertChange::Retrigger(_) => "retriggered",
            AlertChange::Resolve(_) => "resolved",
        }
    }
}

/// Decide how the part's alert record changes after a stock observation.
///
/// `latest` must be the part's most recent alert. Because a new record is only
/// raised when no open one exists, the most recent record is the open one
/// whenever there is one.
pub fn evaluate(
    latest: Option<&ReorderAlert>,
    obs: &StockObservation,
    new_alert_id: AlertId,
) -> Option<AlertChange> {
    let low = obs.is_low();
    match latest {
        Some(open) if open.status.is_open() => {
            if !low {
                return Some(AlertChange::Resolve(open.resolved(obs)));
            }
            let unchanged = open.current_stock == obs.current_stock
                && open.min_stock_level == obs.min_stock_level
                && open.priority == obs.priority();
            (!unchanged).then(|| AlertChange::Retrigger(open.retriggered(obs)))
        }
        // A dismissal silences the episode until stock crosses the threshold again.
        Some(dismissed) if dismissed.status == AlertStatus::Dismissed => (low
            && !obs.was_below_threshold)
            .then(|| AlertChange::Raise(ReorderAlert::raise(new_alert_id, obs))),
        _ => low.then(|| AlertChange::Raise(ReorderAlert::raise(new_alert_id, obs))),
    }
}
