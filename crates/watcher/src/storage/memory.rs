use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::Storage;
use crate::error::StorageError;
use crate::model::{AggregatedStatus, CheckDefinition, NotificationSetting};
use crate::status::Status;

#[derive(Debug, Default)]
struct MemoryState {
    definitions: BTreeMap<i64, CheckDefinition>,
    notification_settings: Vec<NotificationSetting>,
    statuses: Vec<Status>,
    aggregated: BTreeMap<String, AggregatedStatus>,
    next_aggregated_id: u64,
}

/// In-process storage backend
///
/// Holds everything in memory behind one lock. Besides the [`Storage`]
/// contract it offers seeding helpers and counters that make the scheduler
/// observable in tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: RwLock<MemoryState>,
    definition_fetches: AtomicU64,
    failures_pending: AtomicU32,
    closed: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definitions(definitions: impl IntoIterator<Item = CheckDefinition>) -> Self {
        let storage = Self::new();
        for definition in definitions {
            storage.insert_definition(definition);
        }
        storage
    }

    pub fn insert_definition(&self, definition: CheckDefinition) {
        self.write().definitions.insert(definition.id, definition);
    }

    pub fn remove_definition(&self, id: i64) -> Option<CheckDefinition> {
        self.write().definitions.remove(&id)
    }

    pub fn insert_notification_setting(&self, setting: NotificationSetting) {
        self.write().notification_settings.push(setting);
    }

    /// Make the next `count` calls fail with a transient backend error
    pub fn fail_next(&self, count: u32) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    /// How many times definitions were fetched by cadence
    pub fn definition_fetches(&self) -> u64 {
        self.definition_fetches.load(Ordering::SeqCst)
    }

    /// Copy of every persisted status, in persistence order
    pub fn statuses(&self) -> Vec<Status> {
        self.read().statuses.clone()
    }

    pub fn aggregated_statuses(&self) -> Vec<AggregatedStatus> {
        self.read().aggregated.values().cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn injected_failure(&self) -> Result<(), StorageError> {
        let took = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match took {
            Ok(_) => Err(StorageError::backend("injected memory storage failure")),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn fetch_check_definitions(&self, cadence_seconds: u32) -> Result<Vec<CheckDefinition>, StorageError> {
        self.injected_failure()?;
        self.definition_fetches.fetch_add(1, Ordering::SeqCst);

        Ok(self
            .read()
            .definitions
            .values()
            .filter(|definition| definition.cadence_seconds == cadence_seconds)
            .cloned()
            .collect())
    }

    async fn fetch_check_definition(&self, id: i64) -> Result<CheckDefinition, StorageError> {
        self.injected_failure()?;
        self.read()
            .definitions
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("service {id}")))
    }

    async fn fetch_notification_settings(&self, service_id: i64) -> Result<Vec<NotificationSetting>, StorageError> {
        self.injected_failure()?;
        Ok(self
            .read()
            .notification_settings
            .iter()
            .filter(|setting| setting.service_id == service_id)
            .cloned()
            .collect())
    }

    async fn fetch_cadences(&self) -> Result<Vec<u32>, StorageError> {
        self.injected_failure()?;
        let mut cadences: Vec<u32> = self
            .read()
            .definitions
            .values()
            .map(|definition| definition.cadence_seconds)
            .collect();
        cadences.sort_unstable();
        cadences.dedup();
        Ok(cadences)
    }

    async fn persist_status(&self, status: &Status) -> Result<(), StorageError> {
        self.injected_failure()?;
        debug!(id = status.id, request_id = %status.request_id, "storing status in memory");
        self.write().statuses.push(status.clone());
        Ok(())
    }

    async fn persist_aggregated_status(&self, status: &AggregatedStatus) -> Result<String, StorageError> {
        self.injected_failure()?;
        let mut state = self.write();

        let id = match &status.id {
            Some(id) => id.clone(),
            None => {
                state.next_aggregated_id += 1;
                format!("aggregated-{}", state.next_aggregated_id)
            }
        };

        let mut stored = status.clone();
        stored.id = Some(id.clone());
        state.aggregated.insert(id.clone(), stored);
        Ok(id)
    }

    async fn fetch_failed_statuses(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        cadence_seconds: u32,
    ) -> Result<Vec<Status>, StorageError> {
        self.injected_failure()?;
        Ok(self
            .read()
            .statuses
            .iter()
            .filter(|status| {
                !status.result
                    && status.cadence_seconds == cadence_seconds
                    && status.timestamp >= from
                    && status.timestamp < to
            })
            .cloned()
            .collect())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
