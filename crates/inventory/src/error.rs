use thiserror::Error;

use shopledger_core::{ErrorCategory, PartId};

use crate::alert::AlertStatus;

/// Stock-ledger domain failure.
///
/// Every variant is deterministic: the same input against the same state
/// always produces the same error, so none of these are ever retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("invalid operation type: {0}")]
    InvalidOperationType(String),

    #[error("insufficient stock: requested {requested}, on hand {on_hand}")]
    InsufficientStock { requested: i64, on_hand: i64 },

    #[error("invalid stock policy: max_stock_level ({max}) must exceed min_stock_level ({min}) and min must be >= 0")]
    InvalidStockPolicy { min: i64, max: i64 },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("invalid transfer: {0}")]
    InvalidTransfer(String),

    #[error("part {0} is inactive")]
    PartInactive(PartId),

    #[error("part is already {0}")]
    AlreadyInState(&'static str),

    #[error("cannot {action} an alert in status {from:?}")]
    InvalidAlertTransition {
        from: AlertStatus,
        action: &'static str,
    },
}

impl StockError {
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Stable snake_case code for clients.
    pub fn kind(&self) -> &'static str {
        match self {
            StockError::InvalidQuantity(_) => "invalid_quantity",
            StockError::InvalidOperationType(_) => "invalid_operation_type",
            StockError::InsufficientStock { .. } => "insufficient_stock",
            StockError::InvalidStockPolicy { .. } => "invalid_stock_policy",
            StockError::InvalidField { .. } => "invalid_field",
            StockError::InvalidTransfer(_) => "invalid_transfer",
            StockError::PartInactive(_) => "part_inactive",
            StockError::AlreadyInState(_) => "already_in_state",
            StockError::InvalidAlertTransition { .. } => "invalid_alert_transition",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            StockError::InvalidQuantity(_)
            | StockError::InvalidOperationType(_)
            | StockError::InvalidField { .. }
            | StockError::InvalidTransfer(_)
            | StockError::AlreadyInState(_) => ErrorCategory::Validation,
            StockError::InsufficientStock { .. }
            | StockError::InvalidStockPolicy { .. }
            | StockError::PartInactive(_)
            | StockError::InvalidAlertTransition { .. } => ErrorCategory::BusinessRule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_is_a_business_rule() {
        let err = StockError::InsufficientStock {
            requested: 5,
            on_hand: 2,
        };
        assert_eq!(err.kind(), "insufficient_stock");
        assert_eq!(err.category(), ErrorCategory::BusinessRule);
    }

    #[test]
    fn bad_input_is_validation() {
        let err = StockError::InvalidQuantity("zero".into());
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert_eq!(err.to_string(), "invalid quantity: zero");
    }
}
