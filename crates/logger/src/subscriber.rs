use std::env::var;
use std::str::FromStr;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "compact" | "text" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}', expected compact or json")),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Compact => write!(f, "compact"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    /// Debug output instead of info
    pub verbose: bool,
    pub format: LogFormat,
}

impl LogOptions {
    fn level(&self) -> LevelFilter {
        if self.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO }
    }

    /// `RUST_LOG_FORMAT=json` wins over the configured format
    fn effective_format(&self) -> LogFormat {
        match var("RUST_LOG_FORMAT") {
            Ok(value) => value.parse().unwrap_or(self.format),
            Err(_) => self.format,
        }
    }
}

/// Info level, compact output
pub fn init_tracing() {
    init(LogOptions::default());
}

/// Install the global subscriber
///
/// `RUST_LOG` overrides the level picked by `verbose`. Calling this twice
/// leaves the first subscriber in place.
pub fn init(options: LogOptions) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(options.level().into())
        .from_env_lossy();

    let log_layer = match options.effective_format() {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_filter(env_filter)
            .boxed(),
    };

    if let Err(error) = tracing_subscriber::registry().with(log_layer).try_init() {
        eprintln!("tracing subscriber already installed, keeping it: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_verbose_level() {
        let options = LogOptions {
            verbose: true,
            format: LogFormat::Compact,
        };
        assert_eq!(options.level(), LevelFilter::DEBUG);
        assert_eq!(LogOptions::default().level(), LevelFilter::INFO);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing();
        init(LogOptions {
            verbose: true,
            format: LogFormat::Json,
        });
    }
}
