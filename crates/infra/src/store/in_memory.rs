use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use shopledger_core::{AggregateRoot, AlertId, ExpectedVersion, MovementId, PartId};
use shopledger_inventory::{
    AlertChange, MovementEntry, MovementSummary, Part, PartNumber, ReorderAlert, TimeWindow,
    summarize,
};

use super::r#trait::{
    AlertFilter, AlertLog, MovementFilter, MovementLog, MovementPage, Pagination, StockCommit,
    StockStore, StoreError,
};

/// Point inside [`StockStore::commit`] at which an armed fault fires.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommitStage {
    PartWrite,
    MovementAppend,
    AlertWrite,
}

#[derive(Debug, Default)]
struct State {
    parts: HashMap<PartId, Part>,
    part_numbers: HashMap<PartNumber, PartId>,
    movements: Vec<MovementEntry>,
    movements_by_part: HashMap<PartId, Vec<usize>>,
    movement_ids: HashSet<MovementId>,
    alerts: HashMap<AlertId, ReorderAlert>,
    alerts_by_part: HashMap<PartId, Vec<AlertId>>,
    open_alerts: HashMap<PartId, AlertId>,
}

impl State {
    fn check_alert_change(&self, change: &AlertChange) -> Result<(), StoreError> {
        let alert = change.alert();
        match change {
            AlertChange::Raise(_) => {
                if let Some(open) = self.open_alerts.get(&alert.part_id) {
                    return Err(StoreError::Conflict(format!(
                        "part {} already has open alert {open}",
                        alert.part_id
                    )));
                }
                if self.alerts.contains_key(&alert.id) {
                    return Err(StoreError::Duplicate(format!("alert {}", alert.id)));
                }
            }
            AlertChange::Retrigger(_) | AlertChange::Resolve(_) => {
                let stored = self.alerts.get(&alert.id).ok_or_else(|| {
                    StoreError::Conflict(format!("alert {} is no longer stored", alert.id))
                })?;
                if stored.version != change.expected_version() {
                    return Err(StoreError::Conflict(format!(
                        "alert {} expected version {}, found {}",
                        alert.id,
                        change.expected_version(),
                        stored.version
                    )));
                }
            }
        }
        Ok(())
    }

    fn put_alert(&mut self, alert: ReorderAlert) {
        let (id, part_id) = (alert.id, alert.part_id);
        if !self.alerts.contains_key(&id) {
            self.alerts_by_part.entry(part_id).or_default().push(id);
        }
        if alert.status.is_open() {
            self.open_alerts.insert(part_id, id);
        } else if self.open_alerts.get(&part_id) == Some(&id) {
            self.open_alerts.remove(&part_id);
        }
        self.alerts.insert(id, alert);
    }
}

/// In-memory stock store.
///
/// Intended for tests/dev. Every commit runs in one short critical section:
/// all checks happen against the current state, and the staged part, ledger
/// line and alert are only applied once every check has passed.
///
/// The section is guarded by a single store-wide lock, so commits on
/// different parts queue behind each other for its duration. They never
/// conflict: version checks are per part, so no writer is ever retried
/// because another part moved. Row-level isolation between parts is
/// provided by [`super::PostgresStockStore`].
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    state: RwLock<State>,
    fault: Mutex<Option<CommitStage>>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit that reaches `stage` fail with
    /// [`StoreError::Unavailable`]. The fault fires once.
    pub fn arm_fault(&self, stage: CommitStage) {
        if let Ok(mut fault) = self.fault.lock() {
            *fault = Some(stage);
        }
    }

    fn fire_fault(&self, stage: CommitStage) -> Result<(), StoreError> {
        let mut fault = self.fault.lock().map_err(|_| poisoned())?;
        if *fault == Some(stage) {
            *fault = None;
            return Err(StoreError::Unavailable(format!(
                "injected fault at {stage:?}"
            )));
        }
        Ok(())
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

impl StockStore for InMemoryStockStore {
    fn load_part(&self, part_id: PartId) -> Result<Option<Part>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.parts.get(&part_id).cloned())
    }

    fn find_by_part_number(&self, part_number: &PartNumber) -> Result<Option<Part>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state
            .part_numbers
            .get(part_number)
            .and_then(|id| state.parts.get(id))
            .cloned())
    }

    fn commit(&self, commit: StockCommit, expected: ExpectedVersion) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;

        let part_id = commit.part.id_typed();
        let current = state.parts.get(&part_id).map(|p| p.version()).unwrap_or(0);
        if !expected.matches(current) {
            return Err(StoreError::Conflict(format!(
                "part {part_id}: expected {expected:?}, found {current}"
            )));
        }
        commit.validate(current)?;

        if let Some(owner) = state.part_numbers.get(commit.part.part_number()) {
            if *owner != part_id {
                return Err(StoreError::Duplicate(format!(
                    "part number {}",
                    commit.part.part_number()
                )));
            }
        }
        self.fire_fault(CommitStage::PartWrite)?;

        if let Some(entry) = &commit.movement {
            if state.movement_ids.contains(&entry.id) {
                return Err(StoreError::Duplicate(format!("movement {}", entry.id)));
            }
            self.fire_fault(CommitStage::MovementAppend)?;
        }

        if let Some(change) = &commit.alert {
            state.check_alert_change(change)?;
            self.fire_fault(CommitStage::AlertWrite)?;
        }

        // Every check passed; apply the staged writes.
        let StockCommit {
            part,
            movement,
            alert,
        } = commit;
        state.part_numbers.insert(part.part_number().clone(), part_id);
        state.parts.insert(part_id, part);
        if let Some(entry) = movement {
            let idx = state.movements.len();
            state.movement_ids.insert(entry.id);
            state.movements_by_part.entry(part_id).or_default().push(idx);
            state.movements.push(entry);
        }
        if let Some(change) = alert {
            state.put_alert(change.into_alert());
        }
        Ok(())
    }
}

impl MovementLog for InMemoryStockStore {
    fn movements_for_part(
        &self,
        part_id: PartId,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let all: Vec<MovementEntry> = state
            .movements_by_part
            .get(&part_id)
            .map(|idxs| idxs.iter().map(|&i| state.movements[i].clone()).collect())
            .unwrap_or_default();
        let total = all.len() as u64;
        Ok(MovementPage::new(pagination.window(&all), total, pagination))
    }

    fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut matching: Vec<MovementEntry> = state
            .movements
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        // Stable: entries with equal timestamps keep ledger order.
        matching.sort_by_key(|e| e.occurred_at);
        let total = matching.len() as u64;
        Ok(MovementPage::new(pagination.window(&matching), total, pagination))
    }

    fn summarize(
        &self,
        part_id: PartId,
        window: TimeWindow,
    ) -> Result<MovementSummary, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let entries = state
            .movements_by_part
            .get(&part_id)
            .into_iter()
            .flatten()
            .map(|&i| &state.movements[i]);
        Ok(summarize(part_id, window, entries))
    }
}

impl AlertLog for InMemoryStockStore {
    fn latest_alert_for_part(&self, part_id: PartId) -> Result<Option<ReorderAlert>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let id = state
            .open_alerts
            .get(&part_id)
            .or_else(|| state.alerts_by_part.get(&part_id).and_then(|ids| ids.last()));
        Ok(id.and_then(|id| state.alerts.get(id)).cloned())
    }

    fn get_alert(&self, alert_id: AlertId) -> Result<Option<ReorderAlert>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.alerts.get(&alert_id).cloned())
    }

    fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<ReorderAlert>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut alerts: Vec<ReorderAlert> = state
            .alerts
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.raised_at.cmp(&a.raised_at).then(b.id.cmp(&a.id)));
        Ok(alerts)
    }

    fn save_alert(
        &self,
        alert: &ReorderAlert,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let stored = state
            .alerts
            .get(&alert.id)
            .ok_or_else(|| StoreError::NotFound(format!("alert {}", alert.id)))?;
        if !expected.matches(stored.version) {
            return Err(StoreError::Conflict(format!(
                "alert {}: expected {expected:?}, found {}",
                alert.id, stored.version
            )));
        }
        if alert.version != stored.version + 1 || alert.part_id != stored.part_id {
            return Err(StoreError::Constraint(format!(
                "alert {} must advance from version {} for part {}",
                alert.id, stored.version, stored.part_id
            )));
        }
        if alert.status.is_open() {
            if let Some(open) = state.open_alerts.get(&alert.part_id) {
                if *open != alert.id {
                    return Err(StoreError::Duplicate(format!(
                        "part {} already has open alert {open}",
                        alert.part_id
                    )));
                }
            }
        }
        state.put_alert(alert.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use shopledger_core::UserId;
    use shopledger_inventory::{
        AdjustStock, CreatePart, Currency, Location, MovementType, StockPolicy,
    };

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn new_part(number: &str, opening: i64) -> (Part, Option<MovementEntry>) {
        Part::create(
            PartId::new(),
            CreatePart {
                part_number: PartNumber::parse(number).unwrap(),
                name: "Oil filter".into(),
                policy: StockPolicy::new(2, 20).unwrap(),
                unit_price: 500,
                currency: Currency::parse("EUR").unwrap(),
                location: Location::new("Main").unwrap(),
                opening_stock: opening,
                performed_by: UserId::new(),
                occurred_at: at(0),
            },
            MovementId::new(),
        )
        .unwrap()
    }

    fn out(part: &Part, quantity: i64, secs: i64) -> AdjustStock {
        AdjustStock {
            part_id: part.id_typed(),
            movement_type: MovementType::Out,
            quantity,
            unit_price: None,
            reference: None,
            notes: None,
            transfer_to: None,
            approved_by: None,
            performed_by: UserId::new(),
            occurred_at: at(secs),
        }
    }

    fn insert(store: &InMemoryStockStore, part: Part, entry: Option<MovementEntry>) {
        store
            .commit(
                StockCommit {
                    part,
                    movement: entry,
                    alert: None,
                },
                ExpectedVersion::Exact(0),
            )
            .unwrap();
    }

    #[test]
    fn stale_expected_version_is_a_conflict() {
        let store = InMemoryStockStore::new();
        let (part, entry) = new_part("OF-1", 10);
        insert(&store, part.clone(), entry);

        let (next, line) = part.record_movement(MovementId::new(), &out(&part, 1, 5)).unwrap();
        let commit = StockCommit {
            part: next,
            movement: Some(line),
            alert: None,
        };
        store.commit(commit.clone(), ExpectedVersion::of(&part)).unwrap();
        let err = store.commit(commit, ExpectedVersion::of(&part)).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn part_number_must_be_unique() {
        let store = InMemoryStockStore::new();
        let (a, _) = new_part("OF-1", 0);
        let (b, _) = new_part("of-1", 0);
        insert(&store, a, None);
        let err = store
            .commit(StockCommit::part_only(b), ExpectedVersion::Exact(0))
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[test]
    fn armed_fault_leaves_state_untouched_and_fires_once() {
        let store = InMemoryStockStore::new();
        let (part, entry) = new_part("OF-1", 10);
        insert(&store, part.clone(), entry);

        let (next, line) = part.record_movement(MovementId::new(), &out(&part, 3, 5)).unwrap();
        let commit = StockCommit {
            part: next,
            movement: Some(line),
            alert: None,
        };
        store.arm_fault(CommitStage::MovementAppend);
        let err = store
            .commit(commit.clone(), ExpectedVersion::of(&part))
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(
            store.load_part(part.id_typed()).unwrap().unwrap().current_stock(),
            10
        );
        assert_eq!(
            store
                .movements_for_part(part.id_typed(), Pagination::default())
                .unwrap()
                .total,
            1
        );

        store.commit(commit, ExpectedVersion::of(&part)).unwrap();
        assert_eq!(
            store.load_part(part.id_typed()).unwrap().unwrap().current_stock(),
            7
        );
    }

    #[test]
    fn mismatched_ledger_line_is_refused() {
        let store = InMemoryStockStore::new();
        let (part, entry) = new_part("OF-1", 10);
        insert(&store, part.clone(), entry);

        let (next, mut line) = part.record_movement(MovementId::new(), &out(&part, 3, 5)).unwrap();
        line.new_stock = 8;
        let err = store
            .commit(
                StockCommit {
                    part: next,
                    movement: Some(line),
                    alert: None,
                },
                ExpectedVersion::of(&part),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[test]
    fn ledger_query_filters_and_pages_in_time_order() {
        let store = InMemoryStockStore::new();
        let (mut part, entry) = new_part("OF-1", 10);
        insert(&store, part.clone(), entry);
        for secs in [30, 10, 20] {
            let (next, line) = part
                .record_movement(MovementId::new(), &out(&part, 1, secs))
                .unwrap();
            store
                .commit(
                    StockCommit {
                        part: next.clone(),
                        movement: Some(line),
                        alert: None,
                    },
                    ExpectedVersion::of(&part),
                )
                .unwrap();
            part = next;
        }

        let filter = MovementFilter {
            movement_type: Some(MovementType::Out),
            ..Default::default()
        };
        let page = store
            .query_movements(&filter, Pagination::new(Some(2), None))
            .unwrap();
        assert_eq!(page.total, 3);
        assert!(page.has_more);
        let times: Vec<_> = page.entries.iter().map(|e| e.occurred_at).collect();
        assert_eq!(times, vec![at(10), at(20)]);

        let history = store
            .movements_for_part(part.id_typed(), Pagination::default())
            .unwrap();
        let seqs: Vec<u64> = history.entries.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert!(!history.has_more);
    }
}
