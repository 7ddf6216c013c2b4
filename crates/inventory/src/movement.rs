//! Movement types, the quantity transition function, and immutable ledger lines.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopledger_core::{MovementId, PartId, UserId};

use crate::error::StockError;
use crate::part::{Currency, Location, PartNumber};

/// Kind of stock movement recorded in the ledger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    In,
    Out,
    Adjustment,
    Transfer,
    Damage,
    Return,
}

impl MovementType {
    pub const ALL: [MovementType; 6] = [
        MovementType::In,
        MovementType::Out,
        MovementType::Adjustment,
        MovementType::Transfer,
        MovementType::Damage,
        MovementType::Return,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
            MovementType::Adjustment => "ADJUSTMENT",
            MovementType::Transfer => "TRANSFER",
            MovementType::Damage => "DAMAGE",
            MovementType::Return => "RETURN",
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = StockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| StockError::InvalidOperationType(wanted.to_string()))
    }
}

/// Result of applying one movement to an on-hand quantity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StockTransition {
    pub previous_stock: i64,
    pub new_stock: i64,
    /// Ledger magnitude, always > 0.
    pub quantity: i64,
    pub signed_delta: i64,
    /// Absolute target for `ADJUSTMENT` movements.
    pub set_point: Option<i64>,
}

/// Pure quantity transition `f(previous, type, quantity)`.
///
/// `quantity` is the caller-supplied magnitude, or the set-point for
/// `ADJUSTMENT`. The returned `new_stock` is never negative.
pub fn transition(
    previous: i64,
    movement_type: MovementType,
    quantity: i64,
) -> Result<StockTransition, StockError> {
    if quantity <= 0 {
        return Err(StockError::InvalidQuantity(format!(
            "quantity must be greater than zero (got {quantity})"
        )));
    }
    if previous < 0 {
        return Err(StockError::InvalidQuantity(format!(
            "on-hand quantity is negative ({previous})"
        )));
    }

    let (new_stock, magnitude, set_point) = match movement_type {
        MovementType::In | MovementType::Return => {
            let new_stock = previous.checked_add(quantity).ok_or_else(|| {
                StockError::InvalidQuantity(format!(
                    "adding {quantity} to {previous} overflows"
                ))
            })?;
            (new_stock, quantity, None)
        }
        MovementType::Out | MovementType::Damage => {
            if quantity > previous {
                return Err(StockError::InsufficientStock {
                    requested: quantity,
                    on_hand: previous,
                });
            }
            (previous - quantity, quantity, None)
        }
        MovementType::Adjustment => {
            if quantity == previous {
                return Err(StockError::InvalidQuantity(format!(
                    "adjustment set-point equals current stock ({previous})"
                )));
            }
            (quantity, (quantity - previous).abs(), Some(quantity))
        }
        MovementType::Transfer => {
            if quantity > previous {
                return Err(StockError::InsufficientStock {
                    requested: quantity,
                    on_hand: previous,
                });
            }
            (previous, quantity, None)
        }
    };

    Ok(StockTransition {
        previous_stock: previous,
        new_stock,
        quantity: magnitude,
        signed_delta: new_stock - previous,
        set_point,
    })
}

/// Command: AdjustStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub part_id: PartId,
    pub movement_type: MovementType,
    pub quantity: i64,
    /// Overrides the part's unit price for this entry's valuation only.
    pub unit_price: Option<u64>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub transfer_to: Option<Location>,
    pub approved_by: Option<UserId>,
    pub performed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Source and destination of a `TRANSFER` movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRoute {
    pub from: Location,
    pub to: Location,
}

/// One immutable ledger line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementEntry {
    pub id: MovementId,
    pub part_id: PartId,
    pub part_number: PartNumber,
    /// Part version this entry produced.
    pub sequence: u64,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub previous_stock: i64,
    pub new_stock: i64,
    pub signed_delta: i64,
    pub set_point: Option<i64>,
    pub transfer: Option<TransferRoute>,
    pub unit_price: u64,
    pub total_value: u64,
    pub currency: Currency,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub performed_by: UserId,
    pub approved_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

impl MovementEntry {
    /// Apply this entry to a running balance, returning `None` when the
    /// running balance does not match the entry's recorded `previous_stock`.
    pub fn apply_to(&self, running: i64) -> Option<i64> {
        (running == self.previous_stock).then_some(self.new_stock)
    }
}

/// Replay a part's ledger (in sequence order) from zero.
///
/// Returns `None` if the chain is broken.
pub fn replay_stock<'a>(entries: impl IntoIterator<Item = &'a MovementEntry>) -> Option<i64> {
    entries
        .into_iter()
        .try_fold(0i64, |running, entry| entry.apply_to(running))
}

pub(crate) fn clean_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_and_return_add() {
        let t = transition(10, MovementType::In, 5).unwrap();
        assert_eq!((t.new_stock, t.signed_delta, t.quantity), (15, 5, 5));
        let t = transition(0, MovementType::Return, 2).unwrap();
        assert_eq!(t.new_stock, 2);
    }

    #[test]
    fn out_cannot_drive_stock_negative() {
        let err = transition(3, MovementType::Out, 4).unwrap_err();
        assert_eq!(
            err,
            StockError::InsufficientStock {
                requested: 4,
                on_hand: 3
            }
        );
        assert_eq!(transition(3, MovementType::Damage, 3).unwrap().new_stock, 0);
    }

    #[test]
    fn adjustment_is_a_set_point_with_explicit_delta() {
        let down = transition(10, MovementType::Adjustment, 7).unwrap();
        assert_eq!(down.new_stock, 7);
        assert_eq!(down.quantity, 3);
        assert_eq!(down.signed_delta, -3);
        assert_eq!(down.set_point, Some(7));

        let up = transition(2, MovementType::Adjustment, 9).unwrap();
        assert_eq!((up.quantity, up.signed_delta), (7, 7));
    }

    #[test]
    fn adjustment_to_current_value_is_rejected() {
        assert!(matches!(
            transition(5, MovementType::Adjustment, 5),
            Err(StockError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn transfer_keeps_quantity_but_needs_stock() {
        let t = transition(8, MovementType::Transfer, 8).unwrap();
        assert_eq!((t.new_stock, t.signed_delta), (8, 0));
        assert!(matches!(
            transition(8, MovementType::Transfer, 9),
            Err(StockError::InsufficientStock { .. })
        ));
    }

    #[test]
    fn non_positive_quantity_is_rejected_for_every_type() {
        for t in MovementType::ALL {
            assert!(matches!(
                transition(10, t, 0),
                Err(StockError::InvalidQuantity(_))
            ));
            assert!(matches!(
                transition(10, t, -1),
                Err(StockError::InvalidQuantity(_))
            ));
        }
    }

    #[test]
    fn in_overflow_is_reported() {
        assert!(matches!(
            transition(i64::MAX, MovementType::In, 1),
            Err(StockError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn movement_type_parses_case_insensitively() {
        assert_eq!(" out ".parse::<MovementType>().unwrap(), MovementType::Out);
        assert_eq!(
            "Adjustment".parse::<MovementType>().unwrap(),
            MovementType::Adjustment
        );
        assert_eq!(
            "RESTOCK".parse::<MovementType>().unwrap_err(),
            StockError::InvalidOperationType("RESTOCK".into())
        );
    }

    #[test]
    fn wire_form_is_screaming_snake_case() {
        let json = serde_json::to_string(&MovementType::Adjustment).unwrap();
        assert_eq!(json, "\"ADJUSTMENT\"");
    }
}
