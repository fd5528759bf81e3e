//! Metadata cache in front of the storage collaborator
//!
//! One [`TtlCache`] per lookup kind, each behind its own lock so a scheduler
//! refreshing one cadence never blocks a probe reading notification settings.

pub mod ttl;

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::clock::Clock;
use crate::error::WatcherError;
use crate::model::{CheckDefinition, NotificationSetting};

pub use ttl::{CacheRecord, TtlCache};

/// TTLs shorter than this defeat caching for the slower cadences
const SHORT_TTL_WARNING: Duration = Duration::from_secs(60);

pub struct MetadataCache {
    ttl: Duration,
    services_by_interval: TtlCache<u32, Vec<CheckDefinition>>,
    service_by_id: TtlCache<i64, CheckDefinition>,
    notification_settings: TtlCache<i64, Vec<NotificationSetting>>,
}

impl MetadataCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Result<Self, WatcherError> {
        if ttl.is_zero() {
            return Err(WatcherError::invalid("cache ttl must be greater than zero"));
        }
        if ttl < SHORT_TTL_WARNING {
            warn!(
                ttl_secs = ttl.as_secs(),
                "cache ttl is shorter than a minute, cadences above it will always refetch"
            );
        }

        Ok(Self {
            ttl,
            services_by_interval: TtlCache::new(clock.clone()),
            service_by_id: TtlCache::new(clock.clone()),
            notification_settings: TtlCache::new(clock),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn services_by_interval(&self) -> &TtlCache<u32, Vec<CheckDefinition>> {
        &self.services_by_interval
    }

    pub fn service_by_id(&self) -> &TtlCache<i64, CheckDefinition> {
        &self.service_by_id
    }

    pub fn notification_settings(&self) -> &TtlCache<i64, Vec<NotificationSetting>> {
        &self.notification_settings
    }

    pub fn cached_services(&self, cadence_seconds: u32) -> Option<Vec<CheckDefinition>> {
        self.services_by_interval.get_valid(&cadence_seconds, self.ttl)
    }

    pub fn store_services(&self, cadence_seconds: u32, definitions: Vec<CheckDefinition>) {
        self.services_by_interval.store(cadence_seconds, definitions);
    }

    pub fn cached_service(&self, id: i64) -> Option<CheckDefinition> {
        self.service_by_id.get_valid(&id, self.ttl)
    }

    pub fn store_service(&self, definition: CheckDefinition) {
        self.service_by_id.store(definition.id, definition);
    }

    pub fn cached_notification_settings(&self, service_id: i64) -> Option<Vec<NotificationSetting>> {
        self.notification_settings.get_valid(&service_id, self.ttl)
    }

    pub fn store_notification_settings(&self, service_id: i64, settings: Vec<NotificationSetting>) {
        self.notification_settings.store(service_id, settings);
    }
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("ttl", &self.ttl)
            .field("services_by_interval", &self.services_by_interval.len())
            .field("service_by_id", &self.service_by_id.len())
            .field("notification_settings", &self.notification_settings.len())
            .finish()
    }
}
