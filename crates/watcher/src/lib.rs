//! Watcher - interval-aligned synthetic monitoring engine
//!
//! Check definitions are grouped by cadence. Each [`IntervalGroup`] wakes on
//! wall-clock boundaries, refreshes its definitions through the cached and
//! retried [`DataAccess`] layer, parses them into probes and fans the probes
//! out as independent tasks. Every probe produces one [`Status`] that is
//! handed back to storage.

pub mod cache;
pub mod clock;
pub mod error;
pub mod model;
pub mod parse;
pub mod probe;
pub mod resilience;
pub mod scheduler;
pub mod status;
pub mod storage;

// Re-export main types
pub use cache::MetadataCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StorageError, WatcherError};
pub use model::{AggregatedStatus, CheckDefinition, NotificationSetting, ProtocolKind};
pub use parse::CheckParser;
pub use probe::Probe;
pub use resilience::BackoffPolicy;
pub use scheduler::{IntervalGroup, IntervalGroupSettings, TickReport, spawn_interval_groups};
pub use status::{FailureKind, Status};
pub use storage::{DataAccess, MemoryStorage, Storage};

/// Watcher result type
pub type Result<T, E = WatcherError> = std::result::Result<T, E>;

/// Cadences used when neither the operator nor the storage provide any
pub const DEFAULT_CADENCES: [u32; 6] = [10, 30, 60, 120, 300, 600];

/// Smallest cadence that still makes sense for network probing
pub const MIN_CADENCE_SECONDS: u32 = 5;
