use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Number, Value, json};

use shopledger_core::{AggregateRoot, PartId, UserId};
use shopledger_infra::{AlertFilter, MovementFilter, MovementPage, Pagination};
use shopledger_inventory::{
    AdjustStock, AlertPriority, AlertStatus, CreatePart, Currency, Location, MovementEntry,
    MovementSummary, MovementType, Part, PartNumber, ReorderAlert, StockError, StockPolicy,
    TimeWindow, UpdatePartDetails,
};

const DEFAULT_CURRENCY: &str = "USD";

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct LocationRequest {
    pub warehouse: String,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub shelf: Option<String>,
    #[serde(default)]
    pub bin: Option<String>,
}

impl LocationRequest {
    pub fn into_location(self) -> Result<Location, StockError> {
        Ok(Location::new(&self.warehouse)?
            .with_section(self.section.as_deref())
            .with_shelf(self.shelf.as_deref())
            .with_bin(self.bin.as_deref()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePartRequest {
    pub part_number: String,
    pub name: String,
    pub min_stock_level: i64,
    pub max_stock_level: i64,
    pub unit_price: u64,
    #[serde(default)]
    pub currency: Option<String>,
    pub location: LocationRequest,
    #[serde(default)]
    pub opening_stock: i64,
}

impl CreatePartRequest {
    pub fn into_command(
        self,
        performed_by: UserId,
        occurred_at: DateTime<Utc>,
    ) -> Result<CreatePart, StockError> {
        Ok(CreatePart {
            part_number: PartNumber::parse(&self.part_number)?,
            name: self.name,
            policy: StockPolicy::new(self.min_stock_level, self.max_stock_level)?,
            unit_price: self.unit_price,
            currency: Currency::parse(self.currency.as_deref().unwrap_or(DEFAULT_CURRENCY))?,
            location: self.location.into_location()?,
            opening_stock: self.opening_stock,
            performed_by,
            occurred_at,
        })
    }
}

/// Thresholds are replaced as a pair.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePartRequest {
    pub name: Option<String>,
    pub min_stock_level: Option<i64>,
    pub max_stock_level: Option<i64>,
    pub unit_price: Option<u64>,
    pub currency: Option<String>,
    pub location: Option<LocationRequest>,
}

impl UpdatePartRequest {
    pub fn into_command(self) -> Result<UpdatePartDetails, StockError> {
        let policy = match (self.min_stock_level, self.max_stock_level) {
            (Some(min), Some(max)) => Some(StockPolicy::new(min, max)?),
            (None, None) => None,
            _ => {
                return Err(StockError::invalid_field(
                    "policy",
                    "minStockLevel and maxStockLevel must be provided together",
                ));
            }
        };
        Ok(UpdatePartDetails {
            name: self.name,
            policy,
            unit_price: self.unit_price,
            currency: self.currency.as_deref().map(Currency::parse).transpose()?,
            location: self.location.map(LocationRequest::into_location).transpose()?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockTransactionRequest {
    pub part_id: String,
    pub transaction_type: String,
    pub quantity: Number,
    #[serde(default)]
    pub unit_price: Option<u64>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub transfer_to: Option<LocationRequest>,
    #[serde(default)]
    pub approved_by: Option<String>,
}

impl StockTransactionRequest {
    pub fn into_command(
        self,
        performed_by: UserId,
        occurred_at: DateTime<Utc>,
    ) -> Result<AdjustStock, StockError> {
        let part_id = parse_id::<PartId>("partId", &self.part_id)?;
        let quantity = self.quantity.as_i64().ok_or_else(|| {
            StockError::InvalidQuantity(format!("{} is not a whole number", self.quantity))
        })?;
        let approved_by = self
            .approved_by
            .as_deref()
            .map(|raw| parse_id::<UserId>("approvedBy", raw))
            .transpose()?;

        Ok(AdjustStock {
            part_id,
            movement_type: self.transaction_type.parse::<MovementType>()?,
            quantity,
            unit_price: self.unit_price,
            reference: self.reference,
            notes: self.notes,
            transfer_to: self
                .transfer_to
                .map(LocationRequest::into_location)
                .transpose()?,
            approved_by,
            performed_by,
            occurred_at,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl PageQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.limit, self.offset)
    }
}

/// `GET /inventory/transactions` query string.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionQuery {
    pub part_id: Option<String>,
    #[serde(rename = "type")]
    pub transaction_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl TransactionQuery {
    pub fn into_filter(self) -> Result<(MovementFilter, Pagination), StockError> {
        let window = TimeWindow::new(self.from, self.to)?;
        let part_id = self
            .part_id
            .as_deref()
            .map(|raw| parse_id::<PartId>("partId", raw))
            .transpose()?;
        let movement_type = self
            .transaction_type
            .as_deref()
            .map(str::parse::<MovementType>)
            .transpose()?;

        let filter = MovementFilter {
            part_id,
            movement_type,
            occurred_after: window.from,
            occurred_before: window.to,
        };
        Ok((filter, Pagination::new(self.limit, self.offset)))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub part_id: Option<String>,
}

impl AlertQuery {
    pub fn into_filter(self) -> Result<AlertFilter, StockError> {
        let status = self
            .status
            .as_deref()
            .map(|raw| {
                AlertStatus::parse(raw)
                    .ok_or_else(|| StockError::invalid_field("status", format!("unknown status {raw}")))
            })
            .transpose()?;
        let priority = self
            .priority
            .as_deref()
            .map(|raw| {
                AlertPriority::parse(raw).ok_or_else(|| {
                    StockError::invalid_field("priority", format!("unknown priority {raw}"))
                })
            })
            .transpose()?;
        let part_id = self
            .part_id
            .as_deref()
            .map(|raw| parse_id::<PartId>("partId", raw))
            .transpose()?;
        Ok(AlertFilter {
            part_id,
            status,
            priority,
        })
    }
}

fn parse_id<T: FromStr>(field: &'static str, raw: &str) -> Result<T, StockError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| StockError::invalid_field(field, format!("not a UUID: {raw}")))
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn part_to_json(part: &Part) -> Value {
    json!({
        "id": part.id_typed(),
        "partNumber": part.part_number().as_str(),
        "name": part.name(),
        "currentStock": part.current_stock(),
        "minStockLevel": part.policy().min_stock_level(),
        "maxStockLevel": part.policy().max_stock_level(),
        "unitPrice": part.unit_price(),
        "currency": part.currency().as_str(),
        "location": part.location(),
        "isActive": part.is_active(),
        "isReorderRequired": part.is_reorder_required(),
        "version": part.version(),
        "createdAt": part.created_at(),
        "updatedAt": part.updated_at(),
    })
}

pub fn movement_to_json(entry: &MovementEntry) -> Value {
    json!({
        "id": entry.id,
        "partId": entry.part_id,
        "partNumber": entry.part_number.as_str(),
        "sequence": entry.sequence,
        "transactionType": entry.movement_type,
        "quantity": entry.quantity,
        "previousStock": entry.previous_stock,
        "newStock": entry.new_stock,
        "signedDelta": entry.signed_delta,
        "setPoint": entry.set_point,
        "transferFrom": entry.transfer.as_ref().map(|t| &t.from),
        "transferTo": entry.transfer.as_ref().map(|t| &t.to),
        "unitPrice": entry.unit_price,
        "totalValue": entry.total_value,
        "currency": entry.currency.as_str(),
        "reference": entry.reference,
        "notes": entry.notes,
        "performedBy": entry.performed_by,
        "approvedBy": entry.approved_by,
        "occurredAt": entry.occurred_at,
    })
}

pub fn alert_to_json(alert: &ReorderAlert) -> Value {
    json!({
        "id": alert.id,
        "partId": alert.part_id,
        "status": alert.status,
        "priority": alert.priority,
        "currentStock": alert.current_stock,
        "minStockLevel": alert.min_stock_level,
        "triggerCount": alert.trigger_count,
        "raisedAt": alert.raised_at,
        "lastTriggeredAt": alert.last_triggered_at,
        "acknowledgedAt": alert.acknowledged_at,
        "acknowledgedBy": alert.acknowledged_by,
        "resolvedAt": alert.resolved_at,
        "dismissedAt": alert.dismissed_at,
        "dismissedBy": alert.dismissed_by,
        "version": alert.version,
    })
}

pub fn page_to_json(page: &MovementPage) -> Value {
    json!({
        "transactions": page.entries.iter().map(movement_to_json).collect::<Vec<_>>(),
        "total": page.total,
        "limit": page.pagination.limit,
        "offset": page.pagination.offset,
        "hasMore": page.has_more,
    })
}

pub fn summary_to_json(summary: &MovementSummary) -> Value {
    let by_type: serde_json::Map<String, Value> = summary
        .by_type
        .iter()
        .map(|(movement_type, totals)| {
            (
                movement_type.as_str().to_string(),
                json!({
                    "count": totals.count,
                    "totalQuantity": totals.total_quantity,
                    "totalValue": totals.total_value,
                }),
            )
        })
        .collect();

    json!({
        "partId": summary.part_id,
        "from": summary.window.from,
        "to": summary.window.to,
        "transactionCount": summary.movement_count,
        "netChange": summary.net_change,
        "byType": by_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_requires_both_thresholds() {
        let req = UpdatePartRequest {
            min_stock_level: Some(3),
            ..Default::default()
        };
        let err = req.into_command().unwrap_err();
        assert_eq!(err.kind(), "invalid_field");
    }

    fn transaction(transaction_type: &str, quantity: Value) -> StockTransactionRequest {
        serde_json::from_value(json!({
            "partId": PartId::new().to_string(),
            "transactionType": transaction_type,
            "quantity": quantity,
        }))
        .unwrap()
    }

    #[test]
    fn unknown_transaction_type_is_rejected() {
        let err = transaction("STOLEN", json!(1))
            .into_command(UserId::new(), Utc::now())
            .unwrap_err();
        assert_eq!(err, StockError::InvalidOperationType("STOLEN".into()));
    }

    #[test]
    fn fractional_quantity_is_an_invalid_quantity() {
        for raw in [json!(1.5), json!(2.0)] {
            let err = transaction("OUT", raw)
                .into_command(UserId::new(), Utc::now())
                .unwrap_err();
            assert_eq!(err.kind(), "invalid_quantity");
        }
        let cmd = transaction("in", json!(7))
            .into_command(UserId::new(), Utc::now())
            .unwrap();
        assert_eq!(cmd.quantity, 7);
        assert_eq!(cmd.movement_type, MovementType::In);
    }

    #[test]
    fn alert_query_parses_case_insensitively() {
        let filter = AlertQuery {
            status: Some("active".into()),
            priority: Some("Critical".into()),
            part_id: None,
        }
        .into_filter()
        .unwrap();
        assert_eq!(filter.status, Some(AlertStatus::Active));
        assert_eq!(filter.priority, Some(AlertPriority::Critical));
    }
}
