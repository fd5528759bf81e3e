/// Database layer
///
/// libsql implementation of the watcher storage contract, with the schema
/// managed by versioned migrations.

pub mod migrations;
pub mod repository;

pub use repository::LibsqlStorage;

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
