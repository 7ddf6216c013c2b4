//! Postgres-backed stock store.
//!
//! ## Error Mapping
//!
//! | SQLx error | Code / constraint | StoreError |
//! |---|---|---|
//! | Database | `23505` on `parts_part_number_key` | `Duplicate` |
//! | Database | `23505` elsewhere (sequence, open-alert index) | `Conflict` |
//! | Database | `23503`, `23514` | `Constraint` |
//! | Database | other | `Unavailable` |
//! | PoolTimedOut, PoolClosed, Io, other | n/a | `Unavailable` |
//!
//! ## Sync Boundary
//!
//! The store traits are synchronous. The trait impls drive the async queries
//! on the runtime captured at [`PostgresStockStore::connect`], so they must be
//! called from a thread that is not itself driving async tasks (a plain
//! thread or `tokio::task::spawn_blocking`).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{Span, instrument};
use uuid::Uuid;

use shopledger_core::{
    AggregateRoot, AlertId, ExpectedVersion, MovementId, PartId, UserId,
};
use shopledger_inventory::{
    AlertChange, AlertPriority, AlertStatus, Currency, Location, MovementEntry, MovementSummary,
    MovementTotals, MovementType, Part, PartNumber, PartRecord, ReorderAlert, StockPolicy,
    TimeWindow, TransferRoute,
};

use crate::config::StorageConfig;

use super::r#trait::{
    AlertFilter, AlertLog, MovementFilter, MovementLog, MovementPage, Pagination, StockCommit,
    StockStore, StoreError,
};

const PART_COLUMNS: &str = "id, part_number, name, current_stock, min_stock_level, \
    max_stock_level, unit_price, currency, location, is_active, version, created_at, updated_at";

const MOVEMENT_COLUMNS: &str = "id, part_id, part_number, sequence, movement_type, quantity, \
    previous_stock, new_stock, signed_delta, set_point, transfer, unit_price, total_value, \
    currency, reference, notes, performed_by, approved_by, occurred_at";

const ALERT_COLUMNS: &str = "id, part_id, status, priority, current_stock, min_stock_level, \
    trigger_count, raised_at, last_triggered_at, acknowledged_at, acknowledged_by, resolved_at, \
    dismissed_at, dismissed_by, version";

/// Postgres-backed stock store.
///
/// `commit` runs in one transaction: the part row is locked (`FOR UPDATE`),
/// its version compared against the expectation, then the part is upserted,
/// the ledger line inserted and the alert change applied with its own
/// conditional version update. Any failure rolls the whole transaction back.
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresStockStore {
    /// Wrap an existing pool. Must be called inside a tokio runtime.
    pub fn new(pool: PgPool) -> Result<Self, StoreError> {
        let runtime = Handle::try_current().map_err(|_| {
            StoreError::Unavailable("PostgresStockStore requires a tokio runtime".to_string())
        })?;
        Ok(Self {
            pool: Arc::new(pool),
            runtime,
        })
    }

    /// Open a pool using the storage configuration.
    #[instrument(skip(config), fields(max_connections = config.max_connections), err)]
    pub async fn connect(config: &StorageConfig) -> Result<Self, StoreError> {
        let url = config.database_url.as_deref().ok_or_else(|| {
            StoreError::Unavailable("storage.database_url is not configured".to_string())
        })?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Self::new(pool)
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&*self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    #[instrument(skip(self), fields(part_id = %part_id), err)]
    pub async fn fetch_part(&self, part_id: PartId) -> Result<Option<Part>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PART_COLUMNS} FROM parts WHERE id = $1"))
            .bind(part_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_part", e))?;
        row.as_ref().map(part_from_row).transpose()
    }

    #[instrument(skip(self), fields(part_number = %part_number), err)]
    pub async fn fetch_part_by_number(
        &self,
        part_number: &PartNumber,
    ) -> Result<Option<Part>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PART_COLUMNS} FROM parts WHERE part_number = $1"
        ))
        .bind(part_number.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_part_number", e))?;
        row.as_ref().map(part_from_row).transpose()
    }

    #[instrument(
        skip(self, commit),
        fields(
            part_id = %commit.part.id_typed(),
            expected_version = ?expected,
            movement = commit.movement.is_some(),
            alert = commit.alert.as_ref().map(AlertChange::label),
            committed_version = tracing::field::Empty
        ),
        err
    )]
    pub async fn commit_async(
        &self,
        commit: StockCommit,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let part_id = commit.part.id_typed();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM parts WHERE id = $1 FOR UPDATE",
        )
        .bind(part_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_part", e))?;
        let current = current.unwrap_or(0) as u64;

        if !expected.matches(current) {
            return Err(StoreError::Conflict(format!(
                "part {part_id}: expected {expected:?}, found {current}"
            )));
        }
        commit.validate(current)?;

        write_part(&mut tx, &commit.part, current).await?;
        if let Some(entry) = &commit.movement {
            insert_movement(&mut tx, entry).await?;
        }
        if let Some(change) = &commit.alert {
            apply_alert_change(&mut tx, change).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Span::current().record("committed_version", commit.part.version());
        Ok(())
    }

    #[instrument(skip(self, filter), err)]
    pub async fn query_movements_async(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
        order_by: &'static str,
    ) -> Result<MovementPage, StoreError> {
        let part_param: Option<Uuid> = filter.part_id.map(Uuid::from);
        let type_param: Option<&str> = filter.movement_type.map(MovementType::as_str);
        let predicate = "($1::uuid IS NULL OR part_id = $1) \
            AND ($2::text IS NULL OR movement_type = $2) \
            AND ($3::timestamptz IS NULL OR occurred_at >= $3) \
            AND ($4::timestamptz IS NULL OR occurred_at < $4)";

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM stock_movements WHERE {predicate}"
        ))
        .bind(part_param)
        .bind(type_param)
        .bind(filter.occurred_after)
        .bind(filter.occurred_before)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_movements", e))?;

        let rows = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE {predicate} \
             ORDER BY {order_by} LIMIT $5 OFFSET $6"
        ))
        .bind(part_param)
        .bind(type_param)
        .bind(filter.occurred_after)
        .bind(filter.occurred_before)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_movements", e))?;

        let entries = rows
            .iter()
            .map(movement_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MovementPage::new(entries, total as u64, pagination))
    }

    #[instrument(skip(self), fields(part_id = %part_id), err)]
    pub async fn summarize_async(
        &self,
        part_id: PartId,
        window: TimeWindow,
    ) -> Result<MovementSummary, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                movement_type,
                COUNT(*)                   AS count,
                SUM(quantity)::BIGINT      AS total_quantity,
                SUM(total_value)::BIGINT   AS total_value,
                SUM(signed_delta)::BIGINT  AS net_change
            FROM stock_movements
            WHERE part_id = $1
                AND ($2::timestamptz IS NULL OR occurred_at >= $2)
                AND ($3::timestamptz IS NULL OR occurred_at < $3)
            GROUP BY movement_type
            "#,
        )
        .bind(part_id.as_uuid())
        .bind(window.from)
        .bind(window.to)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("summarize", e))?;

        let mut summary = MovementSummary {
            part_id,
            window,
            by_type: Default::default(),
            movement_count: 0,
            net_change: 0,
        };
        for row in rows {
            let movement_type: String = row.try_get("movement_type").map_err(decode_error)?;
            let movement_type = movement_type
                .parse::<MovementType>()
                .map_err(|e| StoreError::Constraint(e.to_string()))?;
            let count: i64 = row.try_get("count").map_err(decode_error)?;
            let total_quantity: i64 = row.try_get("total_quantity").map_err(decode_error)?;
            let total_value: i64 = row.try_get("total_value").map_err(decode_error)?;
            let net_change: i64 = row.try_get("net_change").map_err(decode_error)?;
            summary.by_type.insert(
                movement_type,
                MovementTotals {
                    count: count as u64,
                    total_quantity,
                    total_value: total_value as u64,
                },
            );
            summary.movement_count += count as u64;
            summary.net_change += net_change;
        }
        Ok(summary)
    }

    #[instrument(skip(self), fields(part_id = %part_id), err)]
    pub async fn latest_alert_async(
        &self,
        part_id: PartId,
    ) -> Result<Option<ReorderAlert>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM reorder_alerts WHERE part_id = $1 \
             ORDER BY (status IN ('ACTIVE', 'ACKNOWLEDGED')) DESC, raised_at DESC, id DESC \
             LIMIT 1"
        ))
        .bind(part_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_alert_for_part", e))?;
        row.as_ref().map(alert_from_row).transpose()
    }

    #[instrument(skip(self), fields(alert_id = %alert_id), err)]
    pub async fn get_alert_async(
        &self,
        alert_id: AlertId,
    ) -> Result<Option<ReorderAlert>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM reorder_alerts WHERE id = $1"
        ))
        .bind(alert_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_alert", e))?;
        row.as_ref().map(alert_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn list_alerts_async(
        &self,
        filter: AlertFilter,
    ) -> Result<Vec<ReorderAlert>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM reorder_alerts \
             WHERE ($1::uuid IS NULL OR part_id = $1) \
               AND ($2::text IS NULL OR status = $2) \
               AND ($3::text IS NULL OR priority = $3) \
             ORDER BY raised_at DESC, id DESC"
        ))
        .bind(filter.part_id.map(Uuid::from))
        .bind(filter.status.map(AlertStatus::as_str))
        .bind(filter.priority.map(AlertPriority::as_str))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_alerts", e))?;
        rows.iter().map(alert_from_row).collect()
    }

    #[instrument(skip(self, alert), fields(alert_id = %alert.id, status = alert.status.as_str()), err)]
    pub async fn save_alert_async(
        &self,
        alert: &ReorderAlert,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let expected_param: Option<i64> = match expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(v as i64),
        };
        let result = sqlx::query(
            r#"
            UPDATE reorder_alerts SET
                status = $2, priority = $3, current_stock = $4, min_stock_level = $5,
                trigger_count = $6, last_triggered_at = $7, acknowledged_at = $8,
                acknowledged_by = $9, resolved_at = $10, dismissed_at = $11,
                dismissed_by = $12, version = $13
            WHERE id = $1
                AND part_id = $14
                AND version = $13 - 1
                AND ($15::bigint IS NULL OR version = $15)
            "#,
        )
        .bind(alert.id.as_uuid())
        .bind(alert.status.as_str())
        .bind(alert.priority.as_str())
        .bind(alert.current_stock)
        .bind(alert.min_stock_level)
        .bind(alert.trigger_count as i32)
        .bind(alert.last_triggered_at)
        .bind(alert.acknowledged_at)
        .bind(alert.acknowledged_by.map(Uuid::from))
        .bind(alert.resolved_at)
        .bind(alert.dismissed_at)
        .bind(alert.dismissed_by.map(Uuid::from))
        .bind(alert.version as i64)
        .bind(alert.part_id.as_uuid())
        .bind(expected_param)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_alert", e))?;

        if result.rows_affected() == 0 {
            return match self.get_alert_async(alert.id).await? {
                None => Err(StoreError::NotFound(format!("alert {}", alert.id))),
                Some(stored) => Err(StoreError::Conflict(format!(
                    "alert {}: expected {expected:?}, found {}",
                    alert.id, stored.version
                ))),
            };
        }
        Ok(())
    }
}

async fn write_part(
    tx: &mut Transaction<'_, Postgres>,
    part: &Part,
    current_version: u64,
) -> Result<(), StoreError> {
    let location = serde_json::to_value(part.location())
        .map_err(|e| StoreError::Constraint(format!("location serialization failed: {e}")))?;
    let unit_price = to_i64("unit_price", part.unit_price())?;

    if current_version == 0 {
        sqlx::query(&format!(
            "INSERT INTO parts ({PART_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(part.id_typed().as_uuid())
        .bind(part.part_number().as_str())
        .bind(part.name())
        .bind(part.current_stock())
        .bind(part.policy().min_stock_level())
        .bind(part.policy().max_stock_level())
        .bind(unit_price)
        .bind(part.currency().as_str())
        .bind(&location)
        .bind(part.is_active())
        .bind(part.version() as i64)
        .bind(part.created_at())
        .bind(part.updated_at())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_part", e))?;
        return Ok(());
    }

    let result = sqlx::query(
        r#"
        UPDATE parts SET
            name = $2, current_stock = $3, min_stock_level = $4, max_stock_level = $5,
            unit_price = $6, currency = $7, location = $8, is_active = $9,
            version = $10, updated_at = $11
        WHERE id = $1 AND version = $12
        "#,
    )
    .bind(part.id_typed().as_uuid())
    .bind(part.name())
    .bind(part.current_stock())
    .bind(part.policy().min_stock_level())
    .bind(part.policy().max_stock_level())
    .bind(unit_price)
    .bind(part.currency().as_str())
    .bind(&location)
    .bind(part.is_active())
    .bind(part.version() as i64)
    .bind(part.updated_at())
    .bind(current_version as i64)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_part", e))?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict(format!(
            "part {} moved past version {current_version}",
            part.id_typed()
        )));
    }
    Ok(())
}

async fn insert_movement(
    tx: &mut Transaction<'_, Postgres>,
    entry: &MovementEntry,
) -> Result<(), StoreError> {
    let transfer = entry
        .transfer
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| StoreError::Constraint(format!("transfer serialization failed: {e}")))?;

    sqlx::query(&format!(
        "INSERT INTO stock_movements ({MOVEMENT_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)"
    ))
    .bind(entry.id.as_uuid())
    .bind(entry.part_id.as_uuid())
    .bind(entry.part_number.as_str())
    .bind(entry.sequence as i64)
    .bind(entry.movement_type.as_str())
    .bind(entry.quantity)
    .bind(entry.previous_stock)
    .bind(entry.new_stock)
    .bind(entry.signed_delta)
    .bind(entry.set_point)
    .bind(transfer)
    .bind(to_i64("unit_price", entry.unit_price)?)
    .bind(to_i64("total_value", entry.total_value)?)
    .bind(entry.currency.as_str())
    .bind(entry.reference.as_deref())
    .bind(entry.notes.as_deref())
    .bind(entry.performed_by.as_uuid())
    .bind(entry.approved_by.map(Uuid::from))
    .bind(entry.occurred_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_movement", e))?;
    Ok(())
}

async fn apply_alert_change(
    tx: &mut Transaction<'_, Postgres>,
    change: &AlertChange,
) -> Result<(), StoreError> {
    let alert = change.alert();
    let result = match change {
        AlertChange::Raise(_) => sqlx::query(&format!(
            "INSERT INTO reorder_alerts ({ALERT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        ))
        .bind(alert.id.as_uuid())
        .bind(alert.part_id.as_uuid())
        .bind(alert.status.as_str())
        .bind(alert.priority.as_str())
        .bind(alert.current_stock)
        .bind(alert.min_stock_level)
        .bind(alert.trigger_count as i32)
        .bind(alert.raised_at)
        .bind(alert.last_triggered_at)
        .bind(alert.acknowledged_at)
        .bind(alert.acknowledged_by.map(Uuid::from))
        .bind(alert.resolved_at)
        .bind(alert.dismissed_at)
        .bind(alert.dismissed_by.map(Uuid::from))
        .bind(alert.version as i64)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_alert", e))?,
        AlertChange::Retrigger(_) | AlertChange::Resolve(_) => sqlx::query(
            r#"
            UPDATE reorder_alerts SET
                status = $2, priority = $3, current_stock = $4, min_stock_level = $5,
                trigger_count = $6, last_triggered_at = $7, resolved_at = $8, version = $9
            WHERE id = $1 AND version = $10
            "#,
        )
        .bind(alert.id.as_uuid())
        .bind(alert.status.as_str())
        .bind(alert.priority.as_str())
        .bind(alert.current_stock)
        .bind(alert.min_stock_level)
        .bind(alert.trigger_count as i32)
        .bind(alert.last_triggered_at)
        .bind(alert.resolved_at)
        .bind(alert.version as i64)
        .bind(change.expected_version() as i64)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_alert", e))?,
    };

    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict(format!(
            "alert {} moved past version {}",
            alert.id,
            change.expected_version()
        )));
    }
    Ok(())
}

fn to_i64(field: &str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::Constraint(format!("{field} {value} exceeds BIGINT")))
}

fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Constraint(format!("failed to decode row: {err}"))
}

fn corrupt(what: &str, err: impl core::fmt::Display) -> StoreError {
    StoreError::Constraint(format!("stored {what} is invalid: {err}"))
}

fn part_from_row(row: &PgRow) -> Result<Part, StoreError> {
    let part_number: String = row.try_get("part_number").map_err(decode_error)?;
    let currency: String = row.try_get("currency").map_err(decode_error)?;
    let location: serde_json::Value = row.try_get("location").map_err(decode_error)?;
    let unit_price: i64 = row.try_get("unit_price").map_err(decode_error)?;
    let version: i64 = row.try_get("version").map_err(decode_error)?;
    let id: Uuid = row.try_get("id").map_err(decode_error)?;

    let record = PartRecord {
        id: PartId::from_uuid(id),
        part_number: PartNumber::parse(&part_number).map_err(|e| corrupt("part_number", e))?,
        name: row.try_get("name").map_err(decode_error)?,
        current_stock: row.try_get("current_stock").map_err(decode_error)?,
        policy: StockPolicy::new(
            row.try_get("min_stock_level").map_err(decode_error)?,
            row.try_get("max_stock_level").map_err(decode_error)?,
        )
        .map_err(|e| corrupt("stock policy", e))?,
        unit_price: unit_price as u64,
        currency: Currency::parse(&currency).map_err(|e| corrupt("currency", e))?,
        location: serde_json::from_value::<Location>(location)
            .map_err(|e| corrupt("location", e))?,
        is_active: row.try_get("is_active").map_err(decode_error)?,
        version: version as u64,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
    };
    Part::restore(record).map_err(|e| corrupt("part", e))
}

fn movement_from_row(row: &PgRow) -> Result<MovementEntry, StoreError> {
    let id: Uuid = row.try_get("id").map_err(decode_error)?;
    let part_id: Uuid = row.try_get("part_id").map_err(decode_error)?;
    let part_number: String = row.try_get("part_number").map_err(decode_error)?;
    let movement_type: String = row.try_get("movement_type").map_err(decode_error)?;
    let sequence: i64 = row.try_get("sequence").map_err(decode_error)?;
    let transfer: Option<serde_json::Value> = row.try_get("transfer").map_err(decode_error)?;
    let unit_price: i64 = row.try_get("unit_price").map_err(decode_error)?;
    let total_value: i64 = row.try_get("total_value").map_err(decode_error)?;
    let currency: String = row.try_get("currency").map_err(decode_error)?;
    let performed_by: Uuid = row.try_get("performed_by").map_err(decode_error)?;
    let approved_by: Option<Uuid> = row.try_get("approved_by").map_err(decode_error)?;
    let occurred_at: DateTime<Utc> = row.try_get("occurred_at").map_err(decode_error)?;

    Ok(MovementEntry {
        id: MovementId::from_uuid(id),
        part_id: PartId::from_uuid(part_id),
        part_number: PartNumber::parse(&part_number).map_err(|e| corrupt("part_number", e))?,
        sequence: sequence as u64,
        movement_type: movement_type
            .parse()
            .map_err(|e| corrupt("movement_type", e))?,
        quantity: row.try_get("quantity").map_err(decode_error)?,
        previous_stock: row.try_get("previous_stock").map_err(decode_error)?,
        new_stock: row.try_get("new_stock").map_err(decode_error)?,
        signed_delta: row.try_get("signed_delta").map_err(decode_error)?,
        set_point: row.try_get("set_point").map_err(decode_error)?,
        transfer: transfer
            .map(serde_json::from_value::<TransferRoute>)
            .transpose()
            .map_err(|e| corrupt("transfer", e))?,
        unit_price: unit_price as u64,
        total_value: total_value as u64,
        currency: Currency::parse(&currency).map_err(|e| corrupt("currency", e))?,
        reference: row.try_get("reference").map_err(decode_error)?,
        notes: row.try_get("notes").map_err(decode_error)?,
        performed_by: UserId::from_uuid(performed_by),
        approved_by: approved_by.map(UserId::from_uuid),
        occurred_at,
    })
}

fn alert_from_row(row: &PgRow) -> Result<ReorderAlert, StoreError> {
    let id: Uuid = row.try_get("id").map_err(decode_error)?;
    let part_id: Uuid = row.try_get("part_id").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let priority: String = row.try_get("priority").map_err(decode_error)?;
    let trigger_count: i32 = row.try_get("trigger_count").map_err(decode_error)?;
    let acknowledged_by: Option<Uuid> = row.try_get("acknowledged_by").map_err(decode_error)?;
    let dismissed_by: Option<Uuid> = row.try_get("dismissed_by").map_err(decode_error)?;
    let version: i64 = row.try_get("version").map_err(decode_error)?;

    Ok(ReorderAlert {
        id: AlertId::from_uuid(id),
        part_id: PartId::from_uuid(part_id),
        status: AlertStatus::parse(&status).ok_or_else(|| corrupt("alert status", &status))?,
        priority: AlertPriority::parse(&priority)
            .ok_or_else(|| corrupt("alert priority", &priority))?,
        current_stock: row.try_get("current_stock").map_err(decode_error)?,
        min_stock_level: row.try_get("min_stock_level").map_err(decode_error)?,
        trigger_count: trigger_count as u32,
        raised_at: row.try_get("raised_at").map_err(decode_error)?,
        last_triggered_at: row.try_get("last_triggered_at").map_err(decode_error)?,
        acknowledged_at: row.try_get("acknowledged_at").map_err(decode_error)?,
        acknowledged_by: acknowledged_by.map(UserId::from_uuid),
        resolved_at: row.try_get("resolved_at").map_err(decode_error)?,
        dismissed_at: row.try_get("dismissed_at").map_err(decode_error)?,
        dismissed_by: dismissed_by.map(UserId::from_uuid),
        version: version as u64,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") if db_err.constraint() == Some("parts_part_number_key") => {
                    StoreError::Duplicate(msg)
                }
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") | Some("23514") => StoreError::Constraint(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

impl StockStore for PostgresStockStore {
    fn load_part(&self, part_id: PartId) -> Result<Option<Part>, StoreError> {
        self.block_on(self.fetch_part(part_id))
    }

    fn find_by_part_number(&self, part_number: &PartNumber) -> Result<Option<Part>, StoreError> {
        self.block_on(self.fetch_part_by_number(part_number))
    }

    fn commit(&self, commit: StockCommit, expected: ExpectedVersion) -> Result<(), StoreError> {
        self.block_on(self.commit_async(commit, expected))
    }
}

impl MovementLog for PostgresStockStore {
    fn movements_for_part(
        &self,
        part_id: PartId,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        let filter = MovementFilter::for_part(part_id);
        self.block_on(self.query_movements_async(&filter, pagination, "sequence ASC"))
    }

    fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        self.block_on(self.query_movements_async(
            filter,
            pagination,
            "occurred_at ASC, ledger_position ASC",
        ))
    }

    fn summarize(
        &self,
        part_id: PartId,
        window: TimeWindow,
    ) -> Result<MovementSummary, StoreError> {
        self.block_on(self.summarize_async(part_id, window))
    }
}

impl AlertLog for PostgresStockStore {
    fn latest_alert_for_part(&self, part_id: PartId) -> Result<Option<ReorderAlert>, StoreError> {
        self.block_on(self.latest_alert_async(part_id))
    }

    fn get_alert(&self, alert_id: AlertId) -> Result<Option<ReorderAlert>, StoreError> {
        self.block_on(self.get_alert_async(alert_id))
    }

    fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<ReorderAlert>, StoreError> {
        self.block_on(self.list_alerts_async(*filter))
    }

    fn save_alert(
        &self,
        alert: &ReorderAlert,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        self.block_on(self.save_alert_async(alert, expected))
    }
}

/// Run against a disposable database:
/// `DATABASE_URL=postgres://... cargo test -p shopledger-infra -- --ignored`.
#[cfg(test)]
mod tests {
    use super::*;

    use shopledger_inventory::{AdjustStock, CreatePart};

    use crate::config::StorageBackend;
    use crate::coordinator::StockAdjustmentCoordinator;
    use crate::retry::RetryPolicy;

    async fn connect() -> Option<PostgresStockStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let config = StorageConfig {
            backend: StorageBackend::Postgres,
            database_url: Some(url),
            max_connections: 16,
            acquire_timeout_ms: 5_000,
        };
        let store = PostgresStockStore::connect(&config).await.unwrap();
        store.migrate().await.unwrap();
        Some(store)
    }

    fn create_cmd(part_number: &PartNumber, opening: i64, min: i64) -> CreatePart {
        CreatePart {
            part_number: part_number.clone(),
            name: "Spark plug".into(),
            policy: StockPolicy::new(min, 500).unwrap(),
            unit_price: 650,
            currency: Currency::parse("USD").unwrap(),
            location: Location::new("Main").unwrap(),
            opening_stock: opening,
            performed_by: UserId::new(),
            occurred_at: Utc::now(),
        }
    }

    /// Coordinator calls block on the pool, so they run off the async workers.
    async fn create_part(store: &PostgresStockStore, opening: i64, min: i64) -> Part {
        let store = store.clone();
        tokio::task::spawn_blocking(move || {
            let number = PartNumber::parse(&format!("PG-{}", Uuid::now_v7().simple())).unwrap();
            StockAdjustmentCoordinator::new(store, RetryPolicy::no_retry())
                .create_part(create_cmd(&number, opening, min))
                .unwrap()
                .part
        })
        .await
        .unwrap()
    }

    fn movement(part_id: PartId, movement_type: MovementType, quantity: i64) -> AdjustStock {
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
            occurred_at: Utc::now(),
        }
    }

    async fn ledger(store: &PostgresStockStore, part_id: PartId) -> MovementPage {
        store
            .query_movements_async(
                &MovementFilter::for_part(part_id),
                Pagination::new(Some(200), None),
                "sequence ASC",
            )
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore = "requires DATABASE_URL"]
    async fn stale_commit_conflicts_and_applies_nothing() {
        let Some(store) = connect().await else { return };
        let part = create_part(&store, 10, 2).await;
        let part_id = part.id_typed();

        let (next, entry) = part
            .record_movement(MovementId::new(), &movement(part_id, MovementType::Out, 3))
            .unwrap();
        let commit = StockCommit {
            part: next.clone(),
            movement: Some(entry),
            alert: None,
        };
        store.commit_async(commit, ExpectedVersion::of(&part)).await.unwrap();

        let (stale, stale_entry) = part
            .record_movement(MovementId::new(), &movement(part_id, MovementType::Out, 4))
            .unwrap();
        let commit = StockCommit {
            part: stale,
            movement: Some(stale_entry),
            alert: None,
        };
        let err = store
            .commit_async(commit, ExpectedVersion::of(&part))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "{err:?}");

        let stored = store.fetch_part(part_id).await.unwrap().unwrap();
        assert_eq!(stored.current_stock(), 7);
        assert_eq!(stored.version(), next.version());
        assert_eq!(ledger(&store, part_id).await.total, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore = "requires DATABASE_URL"]
    async fn concurrent_outs_serialize_on_the_part_row() {
        let Some(store) = connect().await else { return };
        let part_id = create_part(&store, 40, 2).await.id_typed();
        let coordinator = Arc::new(StockAdjustmentCoordinator::new(
            store.clone(),
            RetryPolicy::fixed(200, Duration::from_millis(1)),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::task::spawn_blocking(move || {
                    for _ in 0..5 {
                        coordinator
                            .adjust_stock(movement(part_id, MovementType::Out, 1))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = store.fetch_part(part_id).await.unwrap().unwrap();
        assert_eq!(stored.current_stock(), 0);

        let page = ledger(&store, part_id).await;
        assert_eq!(page.total, 41);
        for pair in page.entries.windows(2) {
            assert_eq!(pair[1].sequence, pair[0].sequence + 1);
            assert_eq!(pair[1].previous_stock, pair[0].new_stock);
        }

        let open = store.latest_alert_async(part_id).await.unwrap().unwrap();
        assert_eq!(open.status, AlertStatus::Active);
        assert_eq!(open.priority, AlertPriority::Critical);
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore = "requires DATABASE_URL"]
    async fn second_open_alert_rolls_back_the_whole_commit() {
        let Some(store) = connect().await else { return };
        let part = create_part(&store, 1, 5).await;
        let part_id = part.id_typed();
        let open = store.latest_alert_async(part_id).await.unwrap().unwrap();
        assert!(open.status.is_open());

        let mut duplicate = open.clone();
        duplicate.id = AlertId::new();
        duplicate.version = 1;
        let (next, entry) = part
            .record_movement(MovementId::new(), &movement(part_id, MovementType::In, 1))
            .unwrap();
        let commit = StockCommit {
            part: next,
            movement: Some(entry),
            alert: Some(AlertChange::Raise(duplicate)),
        };
        let err = store
            .commit_async(commit, ExpectedVersion::of(&part))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "{err:?}");

        let stored = store.fetch_part(part_id).await.unwrap().unwrap();
        assert_eq!(stored.current_stock(), 1);
        assert_eq!(stored.version(), part.version());
        assert_eq!(ledger(&store, part_id).await.total, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore = "requires DATABASE_URL"]
    async fn reused_part_number_is_a_duplicate() {
        let Some(store) = connect().await else { return };
        let existing = create_part(&store, 0, 1).await;

        let (copy, opening) = Part::create(
            PartId::new(),
            create_cmd(existing.part_number(), 4, 1),
            MovementId::new(),
        )
        .unwrap();
        let commit = StockCommit {
            part: copy,
            movement: opening,
            alert: None,
        };
        let err = store
            .commit_async(commit, ExpectedVersion::Exact(0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)), "{err:?}");
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore = "requires DATABASE_URL"]
    async fn ledger_rows_cannot_be_rewritten() {
        let Some(store) = connect().await else { return };
        let part_id = create_part(&store, 3, 1).await.id_typed();

        for statement in [
            "UPDATE stock_movements SET notes = 'edited' WHERE part_id = $1",
            "DELETE FROM stock_movements WHERE part_id = $1",
        ] {
            let err = sqlx::query(statement)
                .bind(part_id.as_uuid())
                .execute(&*store.pool)
                .await
                .map_err(|e| map_sqlx_error("rewrite_ledger", e))
                .unwrap_err();
            assert!(err.to_string().contains("append-only"), "{err}");
        }
        assert_eq!(ledger(&store, part_id).await.total, 1);
    }
}
