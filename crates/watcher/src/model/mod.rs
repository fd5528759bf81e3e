/// Data shapes read from and written to storage
///
/// Check definitions and notification settings are created by an external
/// configuration system and are read-only here. Aggregated statuses are
/// written back for analytics.
pub mod aggregated;
pub mod definition;

pub use aggregated::{AggregatedStatus, aggregate};
pub use definition::{CheckDefinition, NotificationSetting, ProtocolKind};
