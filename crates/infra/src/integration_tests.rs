//! Integration tests for the stock ledger write path.
//!
//! Tests: Coordinator → StockStore (part + ledger + alert) → queries
//!
//! Verifies:
//! - The reference scenario (drop below threshold, recover, reject overdraw)
//! - Concurrent writers on one part serialize without lost updates
//! - A failure at any commit stage leaves part, ledger and alerts untouched
//! - Ledger replay always reproduces the stored quantity

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use proptest::prelude::*;

    use shopledger_core::{PartId, UserId};
    use shopledger_inventory::{
        AdjustStock, AlertPriority, AlertStatus, CreatePart, Currency, Location, MovementType,
        PartNumber, StockPolicy, TimeWindow, replay_stock,
    };

    use crate::coordinator::{AdjustError, StockAdjustmentCoordinator};
    use crate::retry::RetryPolicy;
    use crate::store::{
        AlertFilter, AlertLog, CommitStage, InMemoryStockStore, MovementFilter, MovementLog,
        Pagination, StockStore,
    };

    type Coordinator = StockAdjustmentCoordinator<Arc<InMemoryStockStore>>;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn setup(retry: RetryPolicy) -> (Coordinator, Arc<InMemoryStockStore>) {
        let store = Arc::new(InMemoryStockStore::new());
        (StockAdjustmentCoordinator::new(store.clone(), retry), store)
    }

    fn create_part(c: &Coordinator, number: &str, opening: i64, min: i64, max: i64) -> PartId {
        c.create_part(CreatePart {
            part_number: PartNumber::parse(number).unwrap(),
            name: "Brake disc".into(),
            policy: StockPolicy::new(min, max).unwrap(),
            unit_price: 4200,
            currency: Currency::parse("USD").unwrap(),
            location: Location::new("Main").unwrap(),
            opening_stock: opening,
            performed_by: UserId::new(),
            occurred_at: at(0),
        })
        .unwrap()
        .part
        .id_typed()
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

    fn history_replays(store: &InMemoryStockStore, part_id: PartId) -> Option<i64> {
        let page = store
            .movements_for_part(part_id, Pagination::new(Some(1000), None))
            .unwrap();
        replay_stock(&page.entries)
    }

    #[test]
    fn reference_scenario() {
        let (c, store) = setup(RetryPolicy::default());
        let part_id = create_part(&c, "BD-100", 10, 5, 50);

        let out = c
            .adjust_stock(movement(part_id, MovementType::Out, 6, 10))
            .unwrap();
        assert_eq!(out.part.current_stock(), 4);
        assert!(out.part.is_reorder_required());
        let alert = out.alert.unwrap();
        assert_eq!(alert.status, AlertStatus::Active);
        // 4 * 2 > 5, so the exact rule gives MEDIUM.
        assert_eq!(alert.priority, AlertPriority::Medium);

        let back = c
            .adjust_stock(movement(part_id, MovementType::In, 3, 20))
            .unwrap();
        assert_eq!(back.part.current_stock(), 7);
        let resolved = back.alert.unwrap();
        assert_eq!(resolved.id, alert.id);
        assert_eq!(resolved.status, AlertStatus::Resolved);

        let err = c
            .adjust_stock(movement(part_id, MovementType::Out, 8, 30))
            .unwrap_err();
        assert_eq!(err.kind(), "insufficient_stock");
        assert_eq!(store.load_part(part_id).unwrap().unwrap().current_stock(), 7);

        let page = store
            .movements_for_part(part_id, Pagination::default())
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(history_replays(&store, part_id), Some(7));
    }

    #[test]
    fn concurrent_outs_drain_to_zero_with_chained_entries() {
        const WRITERS: i64 = 16;
        let (c, store) = setup(RetryPolicy::fixed(10_000, Duration::ZERO));
        let c = Arc::new(c);
        let part_id = create_part(&c, "BD-200", WRITERS, 2, 100);

        let handles: Vec<_> = (0..WRITERS)
            .map(|i| {
                let c = Arc::clone(&c);
                thread::spawn(move || c.adjust_stock(movement(part_id, MovementType::Out, 1, 100 + i)))
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }

        let part = store.load_part(part_id).unwrap().unwrap();
        assert_eq!(part.current_stock(), 0);

        let page = store
            .movements_for_part(part_id, Pagination::new(Some(1000), None))
            .unwrap();
        let outs: Vec<_> = page
            .entries
            .iter()
            .filter(|e| e.movement_type == MovementType::Out)
            .collect();
        assert_eq!(outs.len() as i64, WRITERS);
        for pair in page.entries.windows(2) {
            assert_eq!(pair[1].previous_stock, pair[0].new_stock);
            assert_eq!(pair[1].sequence, pair[0].sequence + 1);
        }

        let open: Vec<_> = store
            .list_alerts(&AlertFilter {
                part_id: Some(part_id),
                ..Default::default()
            })
            .unwrap()
            .into_iter()
            .filter(|a| a.status.is_open())
            .collect();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].priority, AlertPriority::Critical);
    }

    #[test]
    fn writers_on_different_parts_never_conflict() {
        let (c, store) = setup(RetryPolicy::no_retry());
        let c = Arc::new(c);
        let parts: Vec<PartId> = (0..8)
            .map(|i| create_part(&c, &format!("RT-{i}"), 0, 1, 1000))
            .collect();

        let handles: Vec<_> = parts
            .iter()
            .map(|&part_id| {
                let c = c.clone();
                thread::spawn(move || {
                    (0..25)
                        .map(|i| c.adjust_stock(movement(part_id, MovementType::In, 2, i)))
                        .filter(Result::is_ok)
                        .count()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 25);
        }
        for part_id in parts {
            let part = store.load_part(part_id).unwrap().unwrap();
            assert_eq!(part.current_stock(), 50);
            assert_eq!(history_replays(&store, part_id), Some(50));
        }
    }

    #[test]
    fn overdraw_under_contention_never_goes_negative() {
        let (c, store) = setup(RetryPolicy::fixed(10_000, Duration::ZERO));
        let c = Arc::new(c);
        let part_id = create_part(&c, "BD-300", 5, 1, 100);

        let results: Vec<Result<_, AdjustError>> = (0..10)
            .map(|i| {
                let c = Arc::clone(&c);
                thread::spawn(move || c.adjust_stock(movement(part_id, MovementType::Out, 1, i)))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let short = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.kind() == "insufficient_stock"))
            .count();
        assert_eq!((ok, short), (5, 5));
        assert_eq!(store.load_part(part_id).unwrap().unwrap().current_stock(), 0);
        assert_eq!(history_replays(&store, part_id), Some(0));
    }

    #[test]
    fn failure_at_any_stage_applies_nothing() {
        for stage in [
            CommitStage::PartWrite,
            CommitStage::MovementAppend,
            CommitStage::AlertWrite,
        ] {
            let (c, store) = setup(RetryPolicy::default());
            let part_id = create_part(&c, "BD-400", 10, 5, 50);
            let before = store.load_part(part_id).unwrap().unwrap();

            store.arm_fault(stage);
            // Crosses the threshold, so the commit carries an alert change.
            let err = c
                .adjust_stock(movement(part_id, MovementType::Out, 7, 10))
                .unwrap_err();
            assert_eq!(err.kind(), "storage", "stage {stage:?}");

            assert_eq!(store.load_part(part_id).unwrap().unwrap(), before);
            assert_eq!(
                store
                    .movements_for_part(part_id, Pagination::default())
                    .unwrap()
                    .total,
                1
            );
            assert!(store.latest_alert_for_part(part_id).unwrap().is_none());
        }
    }

    #[test]
    fn adjustment_and_transfer_are_ledgered_explicitly() {
        let (c, store) = setup(RetryPolicy::default());
        let part_id = create_part(&c, "BD-500", 10, 2, 50);

        let adj = c
            .adjust_stock(movement(part_id, MovementType::Adjustment, 6, 10))
            .unwrap();
        assert_eq!(adj.movement.set_point, Some(6));
        assert_eq!(adj.movement.signed_delta, -4);
        assert_eq!(adj.movement.quantity, 4);

        let annex = Location::new("Annex").unwrap().with_bin(Some("B4"));
        let mut transfer = movement(part_id, MovementType::Transfer, 6, 20);
        transfer.transfer_to = Some(annex.clone());
        let moved = c.adjust_stock(transfer).unwrap();
        assert_eq!(moved.part.current_stock(), 6);
        assert_eq!(moved.part.location(), &annex);

        let transfers = store
            .query_movements(
                &MovementFilter {
                    movement_type: Some(MovementType::Transfer),
                    ..Default::default()
                },
                Pagination::default(),
            )
            .unwrap();
        assert_eq!(transfers.total, 1);
        assert_eq!(
            transfers.entries[0].transfer.as_ref().unwrap().from.warehouse(),
            "Main"
        );
    }

    #[test]
    fn summary_aggregates_by_type() {
        let (c, store) = setup(RetryPolicy::default());
        let part_id = create_part(&c, "BD-600", 20, 2, 50);
        c.adjust_stock(movement(part_id, MovementType::Out, 3, 10))
            .unwrap();
        c.adjust_stock(movement(part_id, MovementType::Out, 2, 20))
            .unwrap();
        c.adjust_stock(movement(part_id, MovementType::Return, 1, 30))
            .unwrap();

        let s = store
            .summarize(part_id, TimeWindow::new(Some(at(5)), None).unwrap())
            .unwrap();
        assert_eq!(s.movement_count, 3);
        assert_eq!(s.net_change, -4);
        assert_eq!(s.by_type[&MovementType::Out].total_quantity, 5);
        assert_eq!(s.by_type[&MovementType::Out].total_value, 5 * 4200);
        assert!(!s.by_type.contains_key(&MovementType::In));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Conservation: whatever is accepted or rejected, the stored
        /// quantity equals the ledger replay, and at most one alert is open.
        #[test]
        fn stored_stock_always_matches_ledger(
            opening in 0i64..30,
            ops in prop::collection::vec((0usize..6, 1i64..25), 1..30),
        ) {
            let (c, store) = setup(RetryPolicy::no_retry());
            let part_id = create_part(&c, "BD-700", opening, 5, 60);
            let types = [
                MovementType::In,
                MovementType::Out,
                MovementType::Adjustment,
                MovementType::Damage,
                MovementType::Return,
                MovementType::Transfer,
            ];

            for (i, (t, q)) in ops.into_iter().enumerate() {
                let before = store.load_part(part_id).unwrap().unwrap();
                let mut cmd = movement(part_id, types[t], q, i as i64);
                if types[t] == MovementType::Transfer {
                    let other = if before.location().warehouse() == "Main" { "Annex" } else { "Main" };
                    cmd.transfer_to = Some(Location::new(other).unwrap());
                }
                let accepted = c.adjust_stock(cmd).is_ok();
                let part = store.load_part(part_id).unwrap().unwrap();
                prop_assert!(part.current_stock() >= 0);
                if types[t] == MovementType::Transfer {
                    prop_assert_eq!(part.current_stock(), before.current_stock());
                    prop_assert_eq!(part.location() != before.location(), accepted);
                }
                prop_assert_eq!(history_replays(&store, part_id), Some(part.current_stock()));

                let alerts = store.list_alerts(&AlertFilter { part_id: Some(part_id), ..Default::default() }).unwrap();
                let open: Vec<_> = alerts.iter().filter(|a| a.status.is_open()).collect();
                prop_assert!(open.len() <= 1);
                prop_assert_eq!(open.len() == 1, part.is_reorder_required());
            }
        }
    }
}
