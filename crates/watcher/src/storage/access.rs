use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::Storage;
use crate::cache::MetadataCache;
use crate::error::StorageError;
use crate::model::{AggregatedStatus, CheckDefinition, NotificationSetting};
use crate::resilience::{BackoffPolicy, retry};
use crate::status::Status;

/// Cache and retry decorator around a [`Storage`] backend
///
/// Reads consult the [`MetadataCache`] first and refill it on a miss. Every
/// call that reaches the backend is retried with its own backoff state:
/// definition, settings and cadence reads use the relational policy, status
/// reads and writes the search policy.
pub struct DataAccess {
    inner: Arc<dyn Storage>,
    cache: Option<Arc<MetadataCache>>,
    relational: BackoffPolicy,
    search: BackoffPolicy,
}

impl DataAccess {
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self {
            inner,
            cache: None,
            relational: BackoffPolicy::relational(),
            search: BackoffPolicy::search(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<MetadataCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_policies(mut self, relational: BackoffPolicy, search: BackoffPolicy) -> Self {
        self.relational = relational;
        self.search = search;
        self
    }

    pub fn cache(&self) -> Option<&Arc<MetadataCache>> {
        self.cache.as_ref()
    }

    pub fn inner(&self) -> &Arc<dyn Storage> {
        &self.inner
    }
}

#[async_trait]
impl Storage for DataAccess {
    async fn fetch_check_definitions(&self, cadence_seconds: u32) -> Result<Vec<CheckDefinition>, StorageError> {
        if let Some(definitions) = self.cache.as_ref().and_then(|c| c.cached_services(cadence_seconds)) {
            debug!(cadence = cadence_seconds, count = definitions.len(), "check definitions served from cache");
            return Ok(definitions);
        }

        let inner = &self.inner;
        let definitions = retry(&self.relational, "fetch check definitions", move || {
            inner.fetch_check_definitions(cadence_seconds)
        })
        .await?;

        if let Some(cache) = &self.cache {
            cache.store_services(cadence_seconds, definitions.clone());
        }
        Ok(definitions)
    }

    async fn fetch_check_definition(&self, id: i64) -> Result<CheckDefinition, StorageError> {
        if let Some(definition) = self.cache.as_ref().and_then(|c| c.cached_service(id)) {
            return Ok(definition);
        }

        let inner = &self.inner;
        let definition = retry(&self.relational, "fetch check definition", move || inner.fetch_check_definition(id)).await?;

        if let Some(cache) = &self.cache {
            cache.store_service(definition.clone());
        }
        Ok(definition)
    }

    async fn fetch_notification_settings(&self, service_id: i64) -> Result<Vec<NotificationSetting>, StorageError> {
        if let Some(settings) = self
            .cache
            .as_ref()
            .and_then(|c| c.cached_notification_settings(service_id))
        {
            return Ok(settings);
        }

        let inner = &self.inner;
        let settings = retry(&self.relational, "fetch notification settings", move || {
            inner.fetch_notification_settings(service_id)
        })
        .await?;

        if let Some(cache) = &self.cache {
            cache.store_notification_settings(service_id, settings.clone());
        }
        Ok(settings)
    }

    async fn fetch_cadences(&self) -> Result<Vec<u32>, StorageError> {
        let inner = &self.inner;
        retry(&self.relational, "fetch cadences", move || inner.fetch_cadences()).await
    }

    async fn persist_status(&self, status: &Status) -> Result<(), StorageError> {
        let inner = &self.inner;
        retry(&self.search, "persist status", move || inner.persist_status(status)).await
    }

    async fn persist_aggregated_status(&self, status: &AggregatedStatus) -> Result<String, StorageError> {
        let inner = &self.inner;
        retry(&self.search, "persist aggregated status", move || {
            inner.persist_aggregated_status(status)
        })
        .await
    }

    async fn fetch_failed_statuses(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        cadence_seconds: u32,
    ) -> Result<Vec<Status>, StorageError> {
        let inner = &self.inner;
        retry(&self.search, "fetch failed statuses", move || {
            inner.fetch_failed_statuses(from, to, cadence_seconds)
        })
        .await
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.inner.close().await
    }
}
