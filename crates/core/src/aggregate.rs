//! Versioned record roots and optimistic concurrency expectations.

/// Aggregate root marker + minimal interface.
///
/// Every record that is written back through a read-modify-write cycle (parts,
/// reorder alerts) exposes its identity and a monotonically increasing version.
/// Stores compare that version against an [`ExpectedVersion`] before accepting
/// a write.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Version of the persisted state this value was read at.
    ///
    /// `0` means "never persisted". Each committed write increments it by one.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for an aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (only used for first inserts and migrations).
    Any,
    /// Require the aggregate to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Expect exactly the version the given aggregate was read at.
    pub fn of<A: AggregateRoot>(aggregate: &A) -> Self {
        ExpectedVersion::Exact(aggregate.version())
    }

    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }
}
