//! Per-part movement aggregation over a time window.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopledger_core::PartId;

use crate::error::StockError;
use crate::movement::{MovementEntry, MovementType};

/// Half-open window `[from, to)`. Missing bounds are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Result<Self, StockError> {
        if let (Some(f), Some(t)) = (from, to) {
            if f > t {
                return Err(StockError::invalid_field(
                    "window",
                    format!("from ({f}) is after to ({t})"),
                ));
            }
        }
        Ok(Self { from, to })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|f| at >= f) && self.to.is_none_or(|t| at < t)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementTotals {
    pub count: u64,
    pub total_quantity: i64,
    pub total_value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementSummary {
    pub part_id: PartId,
    pub window: TimeWindow,
    pub by_type: BTreeMap<MovementType, MovementTotals>,
    pub movement_count: u64,
    /// Sum of `signed_delta` over the window.
    pub net_change: i64,
}

/// Aggregate the entries of one part that fall inside `window`.
pub fn summarize<'a>(
    part_id: PartId,
    window: TimeWindow,
    entries: impl IntoIterator<Item = &'a MovementEntry>,
) -> MovementSummary {
    let mut summary = MovementSummary {
        part_id,
        window,
        by_type: BTreeMap::new(),
        movement_count: 0,
        net_change: 0,
    };

    for entry in entries
        .into_iter()
        .filter(|e| e.part_id == part_id && window.contains(e.occurred_at))
    {
        let totals = summary.by_type.entry(entry.movement_type).or_default();
        totals.count += 1;
        totals.total_quantity = totals.total_quantity.saturating_add(entry.quantity);
        totals.total_value = totals.total_value.saturating_add(entry.total_value);
        summary.movement_count += 1;
        summary.net_change = summary.net_change.saturating_add(entry.signed_delta);
    }

    summary
}
