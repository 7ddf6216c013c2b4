//! `shopledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! typed identifiers, the shared domain error, and the optimistic-concurrency
//! vocabulary every versioned record uses.

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use error::{DomainError, ErrorCategory};
pub use id::{AlertId, MovementId, PartId, UserId};
