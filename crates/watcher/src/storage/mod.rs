//! Storage contract and the decorators around it

pub mod access;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::model::{AggregatedStatus, CheckDefinition, NotificationSetting};
use crate::status::Status;

pub use access::DataAccess;
pub use memory::MemoryStorage;

/// Backing store for definitions, settings and probe results
///
/// Implementations must be safe for concurrent use, many probes persist
/// their results at the same time.
#[async_trait]
pub trait Storage: Send + Sync {
    /// All definitions scheduled at `cadence_seconds`
    async fn fetch_check_definitions(&self, cadence_seconds: u32) -> Result<Vec<CheckDefinition>, StorageError>;

    /// Fails with [`StorageError::NotFound`] when no definition has this id
    async fn fetch_check_definition(&self, id: i64) -> Result<CheckDefinition, StorageError>;

    async fn fetch_notification_settings(&self, service_id: i64) -> Result<Vec<NotificationSetting>, StorageError>;

    /// Distinct cadences in use, ascending
    async fn fetch_cadences(&self) -> Result<Vec<u32>, StorageError>;

    async fn persist_status(&self, status: &Status) -> Result<(), StorageError>;

    /// Insert when `status.id` is `None`, update in place otherwise; returns the stored id
    async fn persist_aggregated_status(&self, status: &AggregatedStatus) -> Result<String, StorageError>;

    /// Failed statuses recorded in `[from, to)` for one cadence
    async fn fetch_failed_statuses(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        cadence_seconds: u32,
    ) -> Result<Vec<Status>, StorageError>;

    async fn close(&self) -> Result<(), StorageError>;
}
