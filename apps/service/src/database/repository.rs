use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use std::time::Duration;
use uuid::Uuid;

use watcher::status::Status;
use watcher::{AggregatedStatus, CheckDefinition, FailureKind, NotificationSetting, ProtocolKind, Storage, StorageError};

use crate::pool::{LibsqlManager, LibsqlPool};

const SERVICE_COLUMNS: &str = "id, kind, cadence_seconds, fail_threshold, metadata";

const STATUS_COLUMNS: &str = "service_id, request_id, result, duration_micros, message, extra, error, failure, cadence_seconds, fail_threshold, timestamp";

/// libsql implementation of the storage contract
pub struct LibsqlStorage {
    pool: LibsqlPool,
}

impl LibsqlStorage {
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>, StorageError> {
        self.pool.get().await.map_err(StorageError::backend)
    }
}

fn to_millis(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::InvalidData(format!("timestamp {millis} out of range")))
}

fn to_micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

fn from_micros(micros: i64) -> Duration {
    Duration::from_micros(u64::try_from(micros).unwrap_or_default())
}

fn to_u32(value: i64, column: &str) -> Result<u32, StorageError> {
    u32::try_from(value).map_err(|_| StorageError::InvalidData(format!("{column} {value} out of range")))
}

fn definition_from_row(row: &Row) -> Result<CheckDefinition, StorageError> {
    let kind = ProtocolKind::from_code(row.get::<i32>(1).map_err(StorageError::backend)?)
        .map_err(|err| StorageError::InvalidData(err.to_string()))?;

    Ok(CheckDefinition {
        id: row.get(0).map_err(StorageError::backend)?,
        kind,
        cadence_seconds: to_u32(row.get(2).map_err(StorageError::backend)?, "cadence_seconds")?,
        fail_threshold: to_u32(row.get(3).map_err(StorageError::backend)?, "fail_threshold")?,
        metadata: row.get(4).map_err(StorageError::backend)?,
    })
}

fn status_from_row(row: &Row) -> Result<Status, StorageError> {
    let failure = match row.get::<Option<String>>(7).map_err(StorageError::backend)?.as_deref() {
        None => None,
        Some("internal") => Some(FailureKind::Internal),
        Some("target") => Some(FailureKind::Target),
        Some(other) => return Err(StorageError::InvalidData(format!("unknown failure kind {other}"))),
    };

    Ok(Status {
        id: row.get(0).map_err(StorageError::backend)?,
        request_id: row.get(1).map_err(StorageError::backend)?,
        result: row.get::<i64>(2).map_err(StorageError::backend)? != 0,
        duration: from_micros(row.get(3).map_err(StorageError::backend)?),
        message: row.get(4).map_err(StorageError::backend)?,
        extra: row.get(5).map_err(StorageError::backend)?,
        error: row.get(6).map_err(StorageError::backend)?,
        failure,
        cadence_seconds: to_u32(row.get(8).map_err(StorageError::backend)?, "cadence_seconds")?,
        fail_threshold: to_u32(row.get(9).map_err(StorageError::backend)?, "fail_threshold")?,
        timestamp: from_millis(row.get(10).map_err(StorageError::backend)?)?,
    })
}

#[async_trait]
impl Storage for LibsqlStorage {
    async fn fetch_check_definitions(&self, cadence_seconds: u32) -> Result<Vec<CheckDefinition>, StorageError> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SERVICE_COLUMNS} FROM services WHERE cadence_seconds = ? AND enabled = 1 ORDER BY id"
            ))
            .await
            .map_err(StorageError::backend)?;

        let mut rows = stmt.query(params![i64::from(cadence_seconds)]).await.map_err(StorageError::backend)?;
        let mut definitions = Vec::new();

        while let Some(row) = rows.next().await.map_err(StorageError::backend)? {
            definitions.push(definition_from_row(&row)?);
        }

        Ok(definitions)
    }

    async fn fetch_check_definition(&self, id: i64) -> Result<CheckDefinition, StorageError> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?"))
            .await
            .map_err(StorageError::backend)?;

        let mut rows = stmt.query(params![id]).await.map_err(StorageError::backend)?;

        match rows.next().await.map_err(StorageError::backend)? {
            Some(row) => definition_from_row(&row),
            None => Err(StorageError::NotFound(format!("service {id}"))),
        }
    }

    async fn fetch_notification_settings(&self, service_id: i64) -> Result<Vec<NotificationSetting>, StorageError> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT id, service_id, channel, target, resend_every_seconds FROM notification_settings WHERE service_id = ? ORDER BY id",
            )
            .await
            .map_err(StorageError::backend)?;

        let mut rows = stmt.query(params![service_id]).await.map_err(StorageError::backend)?;
        let mut settings = Vec::new();

        while let Some(row) = rows.next().await.map_err(StorageError::backend)? {
            let resend_every: i64 = row.get(4).map_err(StorageError::backend)?;
            settings.push(NotificationSetting {
                id: row.get(0).map_err(StorageError::backend)?,
                service_id: row.get(1).map_err(StorageError::backend)?,
                channel: row.get(2).map_err(StorageError::backend)?,
                target: row.get(3).map_err(StorageError::backend)?,
                resend_every: Duration::from_secs(u64::try_from(resend_every).unwrap_or_default()),
            });
        }

        Ok(settings)
    }

    async fn fetch_cadences(&self) -> Result<Vec<u32>, StorageError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT DISTINCT cadence_seconds FROM services WHERE enabled = 1 ORDER BY cadence_seconds",
                (),
            )
            .await
            .map_err(StorageError::backend)?;

        let mut cadences = Vec::new();
        while let Some(row) = rows.next().await.map_err(StorageError::backend)? {
            cadences.push(to_u32(row.get(0).map_err(StorageError::backend)?, "cadence_seconds")?);
        }

        Ok(cadences)
    }

    async fn persist_status(&self, status: &Status) -> Result<(), StorageError> {
        let conn = self.get_conn().await?;
        conn.execute(
            &format!("INSERT INTO service_status ({STATUS_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                status.id,
                status.request_id.clone(),
                i64::from(status.result),
                to_micros(status.duration),
                status.message.clone(),
                status.extra.clone(),
                status.error.clone(),
                status.failure.map(|kind| kind.to_string()),
                i64::from(status.cadence_seconds),
                i64::from(status.fail_threshold),
                to_millis(status.timestamp),
            ],
        )
        .await
        .map_err(StorageError::backend)?;

        Ok(())
    }

    async fn persist_aggregated_status(&self, status: &AggregatedStatus) -> Result<String, StorageError> {
        let id = status.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO aggregated_service_status (id, service_id, cadence_seconds, avg_duration_micros, aggregated, result, timestamp_from, timestamp_to)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                avg_duration_micros = excluded.avg_duration_micros,
                aggregated = excluded.aggregated,
                result = excluded.result,
                timestamp_from = excluded.timestamp_from,
                timestamp_to = excluded.timestamp_to",
            params![
                id.clone(),
                status.service_id,
                i64::from(status.cadence_seconds),
                to_micros(status.avg_duration),
                i64::from(status.aggregated),
                i64::from(status.result),
                to_millis(status.timestamp_from),
                to_millis(status.timestamp_to),
            ],
        )
        .await
        .map_err(StorageError::backend)?;

        Ok(id)
    }

    async fn fetch_failed_statuses(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        cadence_seconds: u32,
    ) -> Result<Vec<Status>, StorageError> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {STATUS_COLUMNS} FROM service_status
                 WHERE result = 0 AND cadence_seconds = ? AND timestamp >= ? AND timestamp < ?
                 ORDER BY timestamp"
            ))
            .await
            .map_err(StorageError::backend)?;

        let mut rows = stmt
            .query(params![i64::from(cadence_seconds), to_millis(from), to_millis(to)])
            .await
            .map_err(StorageError::backend)?;

        let mut statuses = Vec::new();
        while let Some(row) = rows.next().await.map_err(StorageError::backend)? {
            statuses.push(status_from_row(&row)?);
        }

        Ok(statuses)
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.pool.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use chrono::TimeZone;
    use tempfile::{TempDir, tempdir};
    use watcher::status::StatusConfig;

    /// Helper to create test database pool
    async fn create_test_storage() -> Result<(LibsqlStorage, TempDir)> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test.db");

        let pool = crate::pool::open_local(&db_path.to_string_lossy(), 4).await?;
        let conn = pool.get().await?;
        crate::database::initialize_database(&conn).await?;
        drop(conn);

        Ok((LibsqlStorage::new_from_pool(pool), temp_dir))
    }

    async fn insert_service(storage: &LibsqlStorage, definition: &CheckDefinition, enabled: bool) -> Result<()> {
        let conn = storage.pool.get().await?;
        conn.execute(
            "INSERT INTO services (id, kind, cadence_seconds, fail_threshold, metadata, enabled) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                definition.id,
                definition.kind.code(),
                i64::from(definition.cadence_seconds),
                i64::from(definition.fail_threshold),
                definition.metadata.clone(),
                i64::from(enabled),
            ],
        )
        .await?;
        Ok(())
    }

    fn status(id: i64, result: bool, cadence_seconds: u32, second: u32) -> Status {
        let mut status = Status::new(StatusConfig {
            id,
            request_id: format!("req-{id}-{second}"),
            cadence_seconds,
            fail_threshold: 2,
        });
        if result {
            status.set(true, None, "success", "");
        } else {
            status.set(false, Some(&"connection refused"), "failed to open tcp connection", "");
        }
        status.set_duration(Duration::from_micros(1_500));
        status.timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, second).unwrap();
        status
    }

    #[tokio::test]
    async fn test_definitions_by_cadence() -> Result<()> {
        let (storage, _dir) = create_test_storage().await?;
        let tcp = CheckDefinition::new(1, ProtocolKind::Tcp, 30, r#"{"target":"localhost","port":80}"#).with_fail_threshold(3);
        let icmp = CheckDefinition::new(2, ProtocolKind::Icmp, 30, r#"{"target":"localhost"}"#);
        let other = CheckDefinition::new(3, ProtocolKind::Http, 60, r#"{"target":"localhost"}"#);
        let disabled = CheckDefinition::new(4, ProtocolKind::Http, 30, r#"{"target":"localhost"}"#);

        insert_service(&storage, &tcp, true).await?;
        insert_service(&storage, &icmp, true).await?;
        insert_service(&storage, &other, true).await?;
        insert_service(&storage, &disabled, false).await?;

        assert_eq!(storage.fetch_check_definitions(30).await?, vec![tcp.clone(), icmp]);
        assert_eq!(storage.fetch_check_definition(1).await?, tcp);
        assert_eq!(storage.fetch_cadences().await?, vec![30, 60]);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_definition_is_not_found() -> Result<()> {
        let (storage, _dir) = create_test_storage().await?;

        let err = storage.fetch_check_definition(42).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(!err.is_transient());
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_kind_is_invalid_data() -> Result<()> {
        let (storage, _dir) = create_test_storage().await?;
        let conn = storage.pool.get().await?;
        conn.execute(
            "INSERT INTO services (id, kind, cadence_seconds, metadata) VALUES (9, 7, 30, '{}')",
            (),
        )
        .await?;
        drop(conn);

        assert!(matches!(storage.fetch_check_definition(9).await, Err(StorageError::InvalidData(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_notification_settings() -> Result<()> {
        let (storage, _dir) = create_test_storage().await?;
        let conn = storage.pool.get().await?;
        conn.execute(
            "INSERT INTO notification_settings (id, service_id, channel, target, resend_every_seconds) VALUES (1, 5, 'email', 'ops@example.com', 3600)",
            (),
        )
        .await?;
        drop(conn);

        let settings = storage.fetch_notification_settings(5).await?;
        assert_eq!(settings.len(), 1);
        assert_eq!(settings[0].channel, "email");
        assert_eq!(settings[0].resend_every, Duration::from_secs(3600));
        assert!(storage.fetch_notification_settings(6).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_statuses_window() -> Result<()> {
        let (storage, _dir) = create_test_storage().await?;

        storage.persist_status(&status(1, false, 30, 0)).await?;
        storage.persist_status(&status(1, true, 30, 10)).await?;
        storage.persist_status(&status(2, false, 60, 20)).await?;
        storage.persist_status(&status(1, false, 30, 30)).await?;

        let from = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 30).unwrap();
        let failed = storage.fetch_failed_statuses(from, to, 30).await?;

        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0], status(1, false, 30, 0));
        assert_eq!(failed[0].failure, Some(FailureKind::Target));
        assert_eq!(failed[0].error.as_deref(), Some("connection refused"));
        Ok(())
    }

    #[tokio::test]
    async fn test_aggregated_status_upsert() -> Result<()> {
        let (storage, _dir) = create_test_storage().await?;
        let mut run = AggregatedStatus::from_status(&status(1, true, 30, 0));

        let id = storage.persist_aggregated_status(&run).await?;
        assert!(Uuid::parse_str(&id).is_ok());

        run.id = Some(id.clone());
        assert!(run.absorb(&status(1, true, 30, 30)));
        assert_eq!(storage.persist_aggregated_status(&run).await?, id);

        let conn = storage.pool.get().await?;
        let mut rows = conn
            .query("SELECT COUNT(*), MAX(aggregated) FROM aggregated_service_status", ())
            .await?;
        let row = rows.next().await?.ok_or_else(|| anyhow::anyhow!("no rows"))?;
        assert_eq!(row.get::<i64>(0)?, 1);
        assert_eq!(row.get::<i64>(1)?, 2);
        Ok(())
    }
}
