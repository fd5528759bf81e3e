//! Metadata cache with a simulated clock

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use watcher::{CheckDefinition, ManualClock, MetadataCache, NotificationSetting, ProtocolKind};

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()))
}

#[test]
fn test_round_trip_then_expiry() {
    let clock = clock();
    let cache = MetadataCache::new(Duration::from_secs(120), clock.clone()).unwrap();
    let ttl = Duration::from_secs(120);

    cache.services_by_interval().store(30, vec![CheckDefinition::new(1, ProtocolKind::Http, 30, "{}")]);
    assert!(cache.services_by_interval().is_valid(&30, ttl));

    clock.advance(Duration::from_secs(121));
    assert!(!cache.services_by_interval().is_valid(&30, ttl));
    assert!(cache.cached_services(30).is_none());
}

#[test]
fn test_notification_settings_by_service() {
    let clock = clock();
    let cache = MetadataCache::new(Duration::from_secs(600), clock.clone()).unwrap();
    let setting = NotificationSetting {
        id: 1,
        service_id: 9,
        channel: "email".into(),
        target: "ops@example.com".into(),
        resend_every: Duration::from_secs(3600),
    };

    cache.store_notification_settings(9, vec![setting.clone()]);
    assert_eq!(cache.cached_notification_settings(9), Some(vec![setting]));
    assert!(cache.cached_notification_settings(10).is_none());
}

#[test]
fn test_shared_across_threads() {
    let cache = Arc::new(MetadataCache::new(Duration::from_secs(600), clock()).unwrap());

    let handles: Vec<_> = (0..8u32)
        .map(|n| {
            let cache = cache.clone();
            std::thread::spawn(move || {
                let cadence = 10 * (n + 1);
                cache.store_services(cadence, vec![CheckDefinition::new(i64::from(n) + 1, ProtocolKind::Tcp, cadence, "{}")]);
                cache.cached_services(cadence).map(|defs| defs.len())
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), Some(1));
    }
    assert_eq!(cache.services_by_interval().len(), 8);
}
