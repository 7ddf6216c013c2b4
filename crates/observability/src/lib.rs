//! Process-wide logging and tracing setup shared by the service binaries.

/// Subscriber configuration (filters, output format).
pub mod tracing;

pub use crate::tracing::ObservabilityConfig;

/// Initialize process-wide observability.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init(config: &ObservabilityConfig) {
    tracing::init(config);
}
