use std::path::PathBuf;

use clap::Parser;
use logger::{LogFormat, LogOptions};

use crate::config::{Config, DatabaseDriver};

#[derive(Debug, Parser)]
#[command(name = "watcher", version, about = "Interval-aligned synthetic monitoring")]
pub struct Cli {
    /// Config file, created with defaults when missing
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Cadences in seconds to run, e.g. 10,30,60
    #[arg(long, value_delimiter = ',')]
    pub interval_groups: Vec<u32>,

    #[arg(long, value_enum)]
    pub db_driver: Option<DatabaseDriver>,

    #[arg(long)]
    pub db_path: Option<String>,

    /// Metadata cache TTL in seconds
    #[arg(long)]
    pub cache_ttl: Option<u64>,

    #[arg(long)]
    pub no_cache: bool,

    /// Refetch definitions every N ticks
    #[arg(long)]
    pub fetch_loop_modulator: Option<u64>,

    /// Bound on probes in flight across all groups, 0 for none
    #[arg(long)]
    pub max_concurrent_probes: Option<usize>,

    #[arg(short, long)]
    pub verbose: bool,

    /// compact or json
    #[arg(long)]
    pub log_format: Option<String>,
}

impl Cli {
    /// Command line values win over the file
    pub fn apply(&self, config: &mut Config) {
        if !self.interval_groups.is_empty() {
            config.scheduler.interval_groups = self.interval_groups.clone();
        }
        if let Some(driver) = self.db_driver {
            config.database.driver = driver;
        }
        if let Some(path) = &self.db_path {
            config.database.path = path.clone();
        }
        if let Some(ttl) = self.cache_ttl {
            config.cache.ttl_seconds = ttl;
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
        if let Some(m) = self.fetch_loop_modulator {
            config.scheduler.fetch_loop_modulator = m;
        }
        if let Some(max) = self.max_concurrent_probes {
            config.scheduler.max_concurrent_probes = max;
        }
        if self.verbose {
            config.logging.verbose = true;
        }
        if let Some(format) = &self.log_format {
            config.logging.format = format.clone();
        }
    }
}

/// Logger options from the merged config; an unknown format falls back to compact
pub fn log_options(config: &Config) -> LogOptions {
    let format = config.logging.format.parse().unwrap_or_else(|err| {
        eprintln!("{err}, using compact");
        LogFormat::Compact
    });
    LogOptions { verbose: config.logging.verbose, format }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "watcher",
            "--interval-groups",
            "10,30,60",
            "--db-driver",
            "memory",
            "--no-cache",
            "--fetch-loop-modulator",
            "5",
            "-v",
            "--log-format",
            "json",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.scheduler.interval_groups, vec![10, 30, 60]);
        assert_eq!(config.database.driver, DatabaseDriver::Memory);
        assert!(!config.cache.enabled);
        assert_eq!(config.scheduler.fetch_loop_modulator, 5);

        let cli = Cli::parse_from(["watcher", "--db-driver", "libsql"]);
        assert_eq!(cli.db_driver, Some(DatabaseDriver::Libsql));
        assert!(Cli::try_parse_from(["watcher", "--db-driver", "postgres"]).is_err());

        let options = log_options(&config);
        assert!(options.verbose);
        assert_eq!(options.format, LogFormat::Json);
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let cli = Cli::parse_from(["watcher"]);
        let mut config = Config::default();
        config.scheduler.interval_groups = vec![120];
        config.cache.ttl_seconds = 90;
        cli.apply(&mut config);

        assert_eq!(config.scheduler.interval_groups, vec![120]);
        assert_eq!(config.cache.ttl_seconds, 90);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_unknown_log_format_falls_back() {
        let mut config = Config::default();
        config.logging.format = "xml".into();
        assert_eq!(log_options(&config).format, LogFormat::Compact);
    }
}
