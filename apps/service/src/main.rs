mod cli;
mod config;
mod database;
mod pool;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use watcher::{
    CheckParser, DataAccess, DEFAULT_CADENCES, IntervalGroupSettings, MemoryStorage, MetadataCache, Storage,
    SystemClock, spawn_interval_groups,
};

use crate::cli::Cli;
use crate::config::{Config, DatabaseDriver};
use crate::database::LibsqlStorage;

const POOL_SIZE: usize = 16;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_config(cli.config.as_ref()).context("failed to load config")?;
    cli.apply(&mut config);

    logger::init(cli::log_options(&config));
    info!("{}", config);

    let backend = open_storage(&config).await?;
    let storage = Arc::new(with_access_layer(backend, &config)?);

    let cadences = resolve_cadences(&config, storage.as_ref()).await;
    info!(?cadences, "starting interval groups");

    let mut settings = IntervalGroupSettings::new(storage.clone(), CheckParser::new(storage.clone()));
    settings.fetch_loop_modulator = config.scheduler.fetch_loop_modulator;
    settings.concurrency = concurrency_limiter(config.scheduler.max_concurrent_probes);

    let handles = spawn_interval_groups(&cadences, &settings);
    if handles.is_empty() {
        anyhow::bail!("no valid interval group to run");
    }

    shutdown_signal().await;

    for handle in &handles {
        handle.abort();
    }
    if let Err(err) = storage.close().await {
        error!(error = %err, "failed to close storage");
    }

    info!("watcher stopped");
    Ok(())
}

async fn open_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    match config.database.driver {
        DatabaseDriver::Libsql => {
            let pool = pool::open_local(&config.database.path, POOL_SIZE)
                .await
                .with_context(|| format!("failed to open database {}", config.database.path))?;
            let conn = pool.get().await.map_err(|err| anyhow::anyhow!("failed to get connection: {err}"))?;
            database::initialize_database(&conn).await?;
            drop(conn);

            info!(path = %config.database.path, "using libsql storage");
            Ok(Arc::new(LibsqlStorage::new_from_pool(pool)))
        }
        DatabaseDriver::Memory => {
            warn!("using in-memory storage, nothing will be persisted");
            Ok(Arc::new(MemoryStorage::new()))
        }
    }
}

/// Retry policies and, when enabled, the metadata cache
fn with_access_layer(backend: Arc<dyn Storage>, config: &Config) -> Result<DataAccess> {
    let access = DataAccess::new(backend);
    if !config.cache.enabled {
        return Ok(access);
    }

    let cache = MetadataCache::new(Duration::from_secs(config.cache.ttl_seconds), Arc::new(SystemClock))?;
    Ok(access.with_cache(Arc::new(cache)))
}

/// Shared bound on checks in flight; 0 means unbounded
fn concurrency_limiter(max: usize) -> Option<Arc<Semaphore>> {
    if max == 0 {
        return None;
    }
    if max > Semaphore::MAX_PERMITS {
        warn!(max, limit = Semaphore::MAX_PERMITS, "max_concurrent_probes too large, clamping");
    }
    Some(Arc::new(Semaphore::new(max.min(Semaphore::MAX_PERMITS))))
}

/// Configured list, then what the storage knows, then the built-in set
async fn resolve_cadences(config: &Config, storage: &dyn Storage) -> Vec<u32> {
    if !config.scheduler.interval_groups.is_empty() {
        return config.scheduler.interval_groups.clone();
    }

    match storage.fetch_cadences().await {
        Ok(cadences) if !cadences.is_empty() => cadences,
        Ok(_) => {
            info!("storage has no cadences, using defaults");
            DEFAULT_CADENCES.to_vec()
        }
        Err(err) => {
            warn!(error = %err, "failed to fetch cadences, using defaults");
            DEFAULT_CADENCES.to_vec()
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watcher::{CheckDefinition, ProtocolKind};

    #[tokio::test]
    async fn test_cadences_prefer_config() {
        let storage = MemoryStorage::new();
        storage.insert_definition(CheckDefinition::new(1, ProtocolKind::Tcp, 45, "{}"));

        let mut config = Config::default();
        config.scheduler.interval_groups = vec![30];
        assert_eq!(resolve_cadences(&config, &storage).await, vec![30]);

        config.scheduler.interval_groups.clear();
        assert_eq!(resolve_cadences(&config, &storage).await, vec![45]);
    }

    #[tokio::test]
    async fn test_cadences_fall_back_to_defaults() {
        let config = Config::default();
        assert_eq!(resolve_cadences(&config, &MemoryStorage::new()).await, DEFAULT_CADENCES.to_vec());
    }

    #[test]
    fn test_concurrency_limiter_bounds() {
        assert!(concurrency_limiter(0).is_none());
        assert_eq!(concurrency_limiter(8).map(|s| s.available_permits()), Some(8));
        assert_eq!(
            concurrency_limiter(usize::MAX).map(|s| s.available_permits()),
            Some(Semaphore::MAX_PERMITS)
        );
    }

    #[tokio::test]
    async fn test_access_layer_cache_toggle() -> Result<()> {
        let mut config = Config::default();
        let backend: Arc<dyn Storage> = Arc::new(MemoryStorage::new());

        assert!(with_access_layer(backend.clone(), &config)?.cache().is_some());

        config.cache.enabled = false;
        assert!(with_access_layer(backend.clone(), &config)?.cache().is_none());

        config.cache.enabled = true;
        config.cache.ttl_seconds = 0;
        assert!(with_access_layer(backend, &config).is_err());
        Ok(())
    }
}
