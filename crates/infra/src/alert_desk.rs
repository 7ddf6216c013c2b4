//! Operator-facing reorder alert service.

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use shopledger_core::{AlertId, ExpectedVersion, PartId, UserId};
use shopledger_inventory::{ReorderAlert, StockError};

use crate::coordinator::{AdjustError, retry_on_conflict};
use crate::retry::RetryPolicy;
use crate::store::{AlertFilter, AlertLog};

/// Acknowledge, dismiss and inspect reorder alerts.
///
/// Raising, re-triggering and resolving happen only inside stock commits;
/// this service handles the two operator transitions.
#[derive(Debug)]
pub struct AlertDesk<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S> AlertDesk<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }
}

impl<S> AlertDesk<S>
where
    S: AlertLog,
{
    /// `ACTIVE -> ACKNOWLEDGED`.
    #[instrument(skip(self), fields(alert_id = %alert_id, actor = %actor), err)]
    pub fn acknowledge(
        &self,
        alert_id: AlertId,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> Result<ReorderAlert, AdjustError> {
        self.transition("acknowledge_alert", alert_id, |alert| {
            alert.acknowledge(actor, at)
        })
    }

    /// `ACTIVE|ACKNOWLEDGED -> DISMISSED`. Silences the current low-stock
    /// episode until stock recovers and drops again.
    #[instrument(skip(self), fields(alert_id = %alert_id, actor = %actor), err)]
    pub fn dismiss(
        &self,
        alert_id: AlertId,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> Result<ReorderAlert, AdjustError> {
        self.transition("dismiss_alert", alert_id, |alert| alert.dismiss(actor, at))
    }

    pub fn get(&self, alert_id: AlertId) -> Result<ReorderAlert, AdjustError> {
        self.store
            .get_alert(alert_id)?
            .ok_or(AdjustError::AlertNotFound(alert_id))
    }

    pub fn list(&self, filter: &AlertFilter) -> Result<Vec<ReorderAlert>, AdjustError> {
        Ok(self.store.list_alerts(filter)?)
    }

    pub fn open_alert_for_part(&self, part_id: PartId) -> Result<Option<ReorderAlert>, AdjustError> {
        Ok(self
            .store
            .latest_alert_for_part(part_id)?
            .filter(|a| a.status.is_open()))
    }

    fn transition(
        &self,
        operation: &'static str,
        alert_id: AlertId,
        apply: impl Fn(&ReorderAlert) -> Result<ReorderAlert, StockError>,
    ) -> Result<ReorderAlert, AdjustError> {
        let updated = retry_on_conflict(&self.retry, operation, &mut || {
            let current = self.get(alert_id)?;
            let next = apply(&current)?;
            self.store
                .save_alert(&next, ExpectedVersion::Exact(current.version))?;
            Ok(next)
        })?;
        info!(
            alert_id = %updated.id,
            part_id = %updated.part_id,
            status = updated.status.as_str(),
            "reorder alert updated by operator"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use shopledger_inventory::{
        AdjustStock, AlertStatus, CreatePart, Currency, Location, MovementType, PartNumber,
        StockPolicy,
    };

    use crate::coordinator::StockAdjustmentCoordinator;
    use crate::store::InMemoryStockStore;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn setup() -> (
        StockAdjustmentCoordinator<Arc<InMemoryStockStore>>,
        AlertDesk<Arc<InMemoryStockStore>>,
        PartId,
    ) {
        let store = Arc::new(InMemoryStockStore::new());
        let retry = RetryPolicy::fixed(3, Duration::ZERO);
        let coordinator = StockAdjustmentCoordinator::new(store.clone(), retry);
        let desk = AlertDesk::new(store, retry);
        let part = coordinator
            .create_part(CreatePart {
                part_number: PartNumber::parse("WB-9").unwrap(),
                name: "Wiper blade".into(),
                policy: StockPolicy::new(3, 30).unwrap(),
                unit_price: 900,
                currency: Currency::parse("GBP").unwrap(),
                location: Location::new("Front").unwrap(),
                opening_stock: 2,
                performed_by: UserId::new(),
                occurred_at: at(0),
            })
            .unwrap()
            .part;
        (coordinator, desk, part.id_typed())
    }

    fn movement(part_id: PartId, movement_type: MovementType, quantity: i64, secs: i64) -> AdjustStock {
        AdjustStock {
            part_id,
            movement_type,
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

    #[test]
    fn acknowledge_then_dismiss() {
        let (_, desk, part_id) = setup();
        let open = desk.open_alert_for_part(part_id).unwrap().unwrap();
        let actor = UserId::new();

        let acked = desk.acknowledge(open.id, actor, at(1)).unwrap();
        assert_eq!(acked.status, AlertStatus::Acknowledged);
        assert_eq!(acked.acknowledged_by, Some(actor));

        let err = desk.acknowledge(open.id, actor, at(2)).unwrap_err();
        assert_eq!(err.kind(), "invalid_alert_transition");

        let dismissed = desk.dismiss(open.id, actor, at(3)).unwrap();
        assert_eq!(dismissed.status, AlertStatus::Dismissed);
        assert!(desk.open_alert_for_part(part_id).unwrap().is_none());
    }

    #[test]
    fn dismissal_holds_until_stock_recovers_and_drops_again() {
        let (coordinator, desk, part_id) = setup();
        let open = desk.open_alert_for_part(part_id).unwrap().unwrap();
        desk.dismiss(open.id, UserId::new(), at(1)).unwrap();

        let out = coordinator
            .adjust_stock(movement(part_id, MovementType::Out, 1, 2))
            .unwrap();
        assert!(out.alert.is_none());

        coordinator
            .adjust_stock(movement(part_id, MovementType::In, 10, 3))
            .unwrap();
        let out = coordinator
            .adjust_stock(movement(part_id, MovementType::Out, 9, 4))
            .unwrap();
        let fresh = out.alert.unwrap();
        assert_ne!(fresh.id, open.id);
        assert_eq!(fresh.status, AlertStatus::Active);

        let all = desk
            .list(&AlertFilter {
                part_id: Some(part_id),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn unknown_alert_is_not_found() {
        let (_, desk, _) = setup();
        let id = AlertId::new();
        assert_eq!(desk.get(id).unwrap_err(), AdjustError::AlertNotFound(id));
        assert_eq!(
            desk.dismiss(id, UserId::new(), at(1)).unwrap_err(),
            AdjustError::AlertNotFound(id)
        );
    }
}
