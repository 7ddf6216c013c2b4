//! Part record: identity, stock policy, quantity state, lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopledger_core::{AggregateRoot, MovementId, PartId, UserId};

use crate::error::StockError;
use crate::movement::{
    AdjustStock, MovementEntry, MovementType, TransferRoute, clean_text, transition,
};

const PART_NUMBER_MAX_LEN: usize = 64;

/// Unique, normalized part number (SKU code).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartNumber(String);

impl PartNumber {
    pub fn parse(raw: &str) -> Result<Self, StockError> {
        let normalized = raw.trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return Err(StockError::invalid_field("part_number", "cannot be empty"));
        }
        if normalized.len() > PART_NUMBER_MAX_LEN {
            return Err(StockError::invalid_field(
                "part_number",
                format!("longer than {PART_NUMBER_MAX_LEN} characters"),
            ));
        }
        if let Some(bad) = normalized
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(StockError::invalid_field(
                "part_number",
                format!("unexpected character {bad:?}"),
            ));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PartNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PartNumber {
    type Error = StockError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PartNumber> for String {
    fn from(value: PartNumber) -> Self {
        value.0
    }
}

/// Three-letter uppercase currency code. Stored, never converted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn parse(raw: &str) -> Result<Self, StockError> {
        let code = raw.trim().to_ascii_uppercase();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(StockError::invalid_field(
                "currency",
                format!("expected a three-letter code, got {raw:?}"),
            ));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = StockError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Deserialize)]
struct LocationRepr {
    warehouse: String,
    #[serde(default)]
    section: Option<String>,
    #[serde(default)]
    shelf: Option<String>,
    #[serde(default)]
    bin: Option<String>,
}

/// Physical storage location of a part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "LocationRepr")]
pub struct Location {
    warehouse: String,
    section: Option<String>,
    shelf: Option<String>,
    bin: Option<String>,
}

impl Location {
    pub fn new(warehouse: &str) -> Result<Self, StockError> {
        let warehouse = warehouse.trim();
        if warehouse.is_empty() {
            return Err(StockError::invalid_field("location", "warehouse is required"));
        }
        Ok(Self {
            warehouse: warehouse.to_string(),
            section: None,
            shelf: None,
            bin: None,
        })
    }

    pub fn with_section(mut self, section: Option<&str>) -> Self {
        self.section = clean_text(section);
        self
    }

    pub fn with_shelf(mut self, shelf: Option<&str>) -> Self {
        self.shelf = clean_text(shelf);
        self
    }

    pub fn with_bin(mut self, bin: Option<&str>) -> Self {
        self.bin = clean_text(bin);
        self
    }

    pub fn warehouse(&self) -> &str {
        &self.warehouse
    }

    pub fn section(&self) -> Option<&str> {
        self.section.as_deref()
    }

    pub fn shelf(&self) -> Option<&str> {
        self.shelf.as_deref()
    }

    pub fn bin(&self) -> Option<&str> {
        self.bin.as_deref()
    }
}

impl TryFrom<LocationRepr> for Location {
    type Error = StockError;

    fn try_from(r: LocationRepr) -> Result<Self, Self::Error> {
        Ok(Location::new(&r.warehouse)?
            .with_section(r.section.as_deref())
            .with_shelf(r.shelf.as_deref())
            .with_bin(r.bin.as_deref()))
    }
}

impl core::fmt::Display for Location {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.warehouse)?;
        for part in [&self.section, &self.shelf, &self.bin].into_iter().flatten() {
            write!(f, "/{part}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StockPolicyRepr {
    #[serde(alias = "min_stock_level")]
    min_stock_level: i64,
    #[serde(alias = "max_stock_level")]
    max_stock_level: i64,
}

/// Reorder thresholds. Always `0 <= min < max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "StockPolicyRepr", rename_all = "camelCase")]
pub struct StockPolicy {
    min_stock_level: i64,
    max_stock_level: i64,
}

impl StockPolicy {
    pub fn new(min_stock_level: i64, max_stock_level: i64) -> Result<Self, StockError> {
        if min_stock_level < 0 || max_stock_level <= min_stock_level {
            return Err(StockError::InvalidStockPolicy {
                min: min_stock_level,
                max: max_stock_level,
            });
        }
        Ok(Self {
            min_stock_level,
            max_stock_level,
        })
    }

    pub fn min_stock_level(&self) -> i64 {
        self.min_stock_level
    }

    pub fn max_stock_level(&self) -> i64 {
        self.max_stock_level
    }
}

impl TryFrom<StockPolicyRepr> for StockPolicy {
    type Error = StockError;

    fn try_from(r: StockPolicyRepr) -> Result<Self, Self::Error> {
        StockPolicy::new(r.min_stock_level, r.max_stock_level)
    }
}

/// Command: CreatePart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePart {
    pub part_number: PartNumber,
    pub name: String,
    pub policy: StockPolicy,
    pub unit_price: u64,
    pub currency: Currency,
    pub location: Location,
    /// Recorded as an `IN` movement referenced `opening-balance` when > 0.
    pub opening_stock: i64,
    pub performed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePartDetails. `None` leaves the attribute unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdatePartDetails {
    pub name: Option<String>,
    pub policy: Option<StockPolicy>,
    pub unit_price: Option<u64>,
    pub currency: Option<Currency>,
    pub location: Option<Location>,
}

impl UpdatePartDetails {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.policy.is_none()
            && self.unit_price.is_none()
            && self.currency.is_none()
            && self.location.is_none()
    }
}

pub const OPENING_BALANCE_REFERENCE: &str = "opening-balance";

/// Full persisted state of a part, used by stores to rebuild a [`Part`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRecord {
    pub id: PartId,
    pub part_number: PartNumber,
    pub name: String,
    pub current_stock: i64,
    pub policy: StockPolicy,
    pub unit_price: u64,
    pub currency: Currency,
    pub location: Location,
    pub is_active: bool,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate root: Part.
///
/// Every state-changing method is pure: it returns the next state (with the
/// version already advanced by one) and leaves `self` untouched. Stores accept
/// the next state only if the persisted version still equals `self.version()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    id: PartId,
    part_number: PartNumber,
    name: String,
    current_stock: i64,
    policy: StockPolicy,
    unit_price: u64,
    currency: Currency,
    location: Location,
    is_active: bool,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Part {
    /// Build a new part, plus its opening-balance ledger line when
    /// `opening_stock > 0`. The returned part is at version 1.
    pub fn create(
        id: PartId,
        cmd: CreatePart,
        opening_movement_id: MovementId,
    ) -> Result<(Part, Option<MovementEntry>), StockError> {
        let name = validate_name(&cmd.name)?;
        if cmd.opening_stock < 0 {
            return Err(StockError::InvalidQuantity(format!(
                "opening stock cannot be negative (got {})",
                cmd.opening_stock
            )));
        }

        let blank = Part {
            id,
            part_number: cmd.part_number,
            name,
            current_stock: 0,
            policy: cmd.policy,
            unit_price: cmd.unit_price,
            currency: cmd.currency,
            location: cmd.location,
            is_active: true,
            version: 0,
            created_at: cmd.occurred_at,
            updated_at: cmd.occurred_at,
        };

        if cmd.opening_stock == 0 {
            return Ok((blank.next(cmd.occurred_at), None));
        }

        let opening = AdjustStock {
            part_id: id,
            movement_type: MovementType::In,
            quantity: cmd.opening_stock,
            unit_price: None,
            reference: Some(OPENING_BALANCE_REFERENCE.to_string()),
            notes: None,
            transfer_to: None,
            approved_by: None,
            performed_by: cmd.performed_by,
            occurred_at: cmd.occurred_at,
        };
        let (part, entry) = blank.record_movement(opening_movement_id, &opening)?;
        Ok((part, Some(entry)))
    }

    pub fn restore(record: PartRecord) -> Result<Part, StockError> {
        if record.current_stock < 0 {
            return Err(StockError::InvalidQuantity(format!(
                "stored stock is negative ({})",
                record.current_stock
            )));
        }
        Ok(Part {
            id: record.id,
            part_number: record.part_number,
            name: record.name,
            current_stock: record.current_stock,
            policy: record.policy,
            unit_price: record.unit_price,
            currency: record.currency,
            location: record.location,
            is_active: record.is_active,
            version: record.version,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    pub fn id_typed(&self) -> PartId {
        self.id
    }

    pub fn part_number(&self) -> &PartNumber {
        &self.part_number
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_stock(&self) -> i64 {
        self.current_stock
    }

    pub fn policy(&self) -> StockPolicy {
        self.policy
    }

    pub fn unit_price(&self) -> u64 {
        self.unit_price
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// `current_stock <= min_stock_level`. Derived, never stored.
    pub fn is_reorder_required(&self) -> bool {
        self.current_stock <= self.policy.min_stock_level
    }

    /// Apply one stock movement, producing the next part state and the
    /// ledger line describing it.
    pub fn record_movement(
        &self,
        movement_id: MovementId,
        cmd: &AdjustStock,
    ) -> Result<(Part, MovementEntry), StockError> {
        if cmd.part_id != self.id {
            return Err(StockError::invalid_field(
                "part_id",
                format!("command targets {}, record is {}", cmd.part_id, self.id),
            ));
        }
        if !self.is_active {
            return Err(StockError::PartInactive(self.id));
        }

        let step = transition(self.current_stock, cmd.movement_type, cmd.quantity)?;

        let route = match (cmd.movement_type, &cmd.transfer_to) {
            (MovementType::Transfer, None) => {
                return Err(StockError::InvalidTransfer(
                    "transfer_to is required for TRANSFER".into(),
                ));
            }
            (MovementType::Transfer, Some(to)) if *to == self.location => {
                return Err(StockError::InvalidTransfer(format!(
                    "part is already at {to}"
                )));
            }
            (MovementType::Transfer, Some(to)) => Some(TransferRoute {
                from: self.location.clone(),
                to: to.clone(),
            }),
            (_, Some(_)) => {
                return Err(StockError::InvalidTransfer(format!(
                    "transfer_to only applies to TRANSFER, not {}",
                    cmd.movement_type
                )));
            }
            (_, None) => None,
        };

        let unit_price = cmd.unit_price.unwrap_or(self.unit_price);
        let total_value = unit_price
            .checked_mul(step.quantity as u64)
            .ok_or_else(|| {
                StockError::InvalidQuantity(format!(
                    "total value of {} x {unit_price} overflows",
                    step.quantity
                ))
            })?;

        let mut next = self.next(cmd.occurred_at);
        next.current_stock = step.new_stock;
        if let Some(route) = &route {
            next.location = route.to.clone();
        }

        let entry = MovementEntry {
            id: movement_id,
            part_id: self.id,
            part_number: self.part_number.clone(),
            sequence: next.version,
            movement_type: cmd.movement_type,
            quantity: step.quantity,
            previous_stock: step.previous_stock,
            new_stock: step.new_stock,
            signed_delta: step.signed_delta,
            set_point: step.set_point,
            transfer: route,
            unit_price,
            total_value,
            currency: self.currency.clone(),
            reference: clean_text(cmd.reference.as_deref()),
            notes: clean_text(cmd.notes.as_deref()),
            performed_by: cmd.performed_by,
            approved_by: cmd.approved_by,
            occurred_at: cmd.occurred_at,
        };

        Ok((next, entry))
    }

    /// Apply non-quantity attribute changes.
    pub fn apply_details(
        &self,
        cmd: &UpdatePartDetails,
        at: DateTime<Utc>,
    ) -> Result<Part, StockError> {
        if cmd.is_empty() {
            return Err(StockError::invalid_field("update", "no fields to update"));
        }
        let mut next = self.next(at);
        if let Some(name) = &cmd.name {
            next.name = validate_name(name)?;
        }
        if let Some(policy) = cmd.policy {
            next.policy = policy;
        }
        if let Some(price) = cmd.unit_price {
            next.unit_price = price;
        }
        if let Some(currency) = &cmd.currency {
            next.currency = currency.clone();
        }
        if let Some(location) = &cmd.location {
            next.location = location.clone();
        }
        Ok(next)
    }

    pub fn deactivated(&self, at: DateTime<Utc>) -> Result<Part, StockError> {
        if !self.is_active {
            return Err(StockError::AlreadyInState("inactive"));
        }
        let mut next = self.next(at);
        next.is_active = false;
        Ok(next)
    }

    pub fn reactivated(&self, at: DateTime<Utc>) -> Result<Part, StockError> {
        if self.is_active {
            return Err(StockError::AlreadyInState("active"));
        }
        let mut next = self.next(at);
        next.is_active = true;
        Ok(next)
    }

    fn next(&self, at: DateTime<Utc>) -> Part {
        let mut next = self.clone();
        next.version += 1;
        next.updated_at = at;
        next
    }
}

impl AggregateRoot for Part {
    type Id = PartId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

fn validate_name(name: &str) -> Result<String, StockError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StockError::invalid_field("name", "cannot be empty"));
    }
    Ok(name.to_string())
}
