use anyhow::Result;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations
///
/// Check definitions and notification settings are written by the external
/// configuration system; the watcher only creates the tables it expects.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Services and notification settings").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Service status and aggregated status").await?;
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: check definitions and where to notify about them
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS services (
            id INTEGER PRIMARY KEY,
            kind INTEGER NOT NULL,
            cadence_seconds INTEGER NOT NULL,
            fail_threshold INTEGER NOT NULL DEFAULT 1,
            metadata TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notification_settings (
            id INTEGER PRIMARY KEY,
            service_id INTEGER NOT NULL,
            channel TEXT NOT NULL,
            target TEXT NOT NULL,
            resend_every_seconds INTEGER NOT NULL DEFAULT 0
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_services_cadence ON services(cadence_seconds, enabled)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notification_settings_service ON notification_settings(service_id)",
        (),
    )
    .await?;

    Ok(())
}

/// Migration v2: probe results, raw and folded into runs
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS service_status (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            service_id INTEGER NOT NULL,
            request_id TEXT NOT NULL,
            result INTEGER NOT NULL,
            duration_micros INTEGER NOT NULL,
            message TEXT NOT NULL,
            extra TEXT NOT NULL,
            error TEXT,
            failure TEXT,
            cadence_seconds INTEGER NOT NULL,
            fail_threshold INTEGER NOT NULL,
            timestamp INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS aggregated_service_status (
            id TEXT PRIMARY KEY,
            service_id INTEGER NOT NULL,
            cadence_seconds INTEGER NOT NULL,
            avg_duration_micros INTEGER NOT NULL,
            aggregated INTEGER NOT NULL,
            result INTEGER NOT NULL,
            timestamp_from INTEGER NOT NULL,
            timestamp_to INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_service_status_failed ON service_status(cadence_seconds, result, timestamp)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_aggregated_status_service ON aggregated_service_status(service_id, timestamp_to DESC)",
        (),
    )
    .await?;

    Ok(())
}
