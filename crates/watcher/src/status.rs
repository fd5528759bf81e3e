use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Display;
use std::time::Duration;

use crate::error::StorageError;
use crate::storage::Storage;

pub const MSG_SUCCESS: &str = "success";
pub const MSG_TIMEOUT: &str = "failed - timeout";

/// Why a probe execution failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Local fault: the client or prober could not be set up
    Internal,
    /// The target itself is unhealthy
    Target,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Internal => write!(f, "internal"),
            FailureKind::Target => write!(f, "target"),
        }
    }
}

/// Identity a fresh status is created with
#[derive(Debug, Clone)]
pub struct StatusConfig {
    pub id: i64,
    pub request_id: String,
    pub cadence_seconds: u32,
    pub fail_threshold: u32,
}

/// Outcome of one probe execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// Id of the check definition
    pub id: i64,

    /// Correlation token, unique per execution
    pub request_id: String,

    pub result: bool,

    pub duration: Duration,

    /// Primary classification, appended to on every `set`
    pub message: String,

    /// Supplementary diagnostics, appended to on every `set`
    pub extra: String,

    /// Rendered underlying fault, if any
    pub error: Option<String>,

    pub failure: Option<FailureKind>,

    pub cadence_seconds: u32,

    pub fail_threshold: u32,

    /// When the outcome was last recorded
    pub timestamp: DateTime<Utc>,
}

impl Status {
    pub fn new(config: StatusConfig) -> Self {
        Self {
            id: config.id,
            request_id: config.request_id,
            result: false,
            duration: Duration::ZERO,
            message: String::new(),
            extra: String::new(),
            error: None,
            failure: None,
            cadence_seconds: config.cadence_seconds,
            fail_threshold: config.fail_threshold,
            timestamp: Utc::now(),
        }
    }

    /// Record the outcome
    ///
    /// `result` and `error` are overwritten, `message` and `extra` are
    /// appended so a primary classification and its details both survive.
    pub fn set(&mut self, result: bool, error: Option<&dyn Display>, message: &str, extra: &str) {
        self.result = result;
        self.error = error.map(|e| e.to_string());
        self.message.push_str(message);
        self.extra.push_str(extra);
        self.failure = if result { None } else { Some(FailureKind::Target) };
        self.timestamp = Utc::now();
    }

    /// Record a local failure that says nothing about the target
    pub fn set_internal(&mut self, error: Option<&dyn Display>, message: &str) {
        self.set(false, error, message, "");
        self.failure = Some(FailureKind::Internal);
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
    }

    pub fn is_internal_failure(&self) -> bool {
        self.failure == Some(FailureKind::Internal)
    }

    /// Message with extra info and error folded in, for log lines
    pub fn log_message(&self) -> String {
        let mut message = self.message.clone();
        if !self.extra.is_empty() {
            message.push_str(", extra: ");
            message.push_str(&self.extra);
        }
        if let Some(error) = &self.error {
            message.push_str(", error: ");
            message.push_str(error);
        }
        message
    }

    /// Hand the finished status to storage
    pub async fn save_to(&self, storage: &dyn Storage) -> Result<(), StorageError> {
        storage.persist_status(self).await
    }
}

/// Correlation id for one execution of check `id`
///
/// Derived from the id and the current time; a correlation token, not a secret.
pub fn generate_request_id(id: i64) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(format!("{id}{nanos}").as_bytes());
    hex::encode(hasher.finalize())
}

/// Milliseconds with two decimals
pub fn format_millis(duration: Duration) -> String {
    format!("{:.2}", duration.as_secs_f64() * 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_status() -> Status {
        Status::new(StatusConfig {
            id: 3,
            request_id: generate_request_id(3),
            cadence_seconds: 30,
            fail_threshold: 2,
        })
    }

    #[test]
    fn test_status_starts_failed_and_empty() {
        let status = new_status();
        assert!(!status.result);
        assert!(status.message.is_empty());
        assert!(status.failure.is_none());
        assert_eq!(status.fail_threshold, 2);
    }

    #[test]
    fn test_set_appends_messages() {
        let mut status = new_status();
        status.set(true, None, "a", "");
        status.set(false, None, "b", "");

        assert_eq!(status.message, "ab");
        assert!(!status.result);
        assert_eq!(status.failure, Some(FailureKind::Target));
    }

    #[test]
    fn test_set_overwrites_error() {
        let mut status = new_status();
        status.set(false, Some(&"connection refused"), "failed", "first");
        status.set(true, None, "", " second");

        assert!(status.error.is_none());
        assert_eq!(status.extra, "first second");
        assert!(status.failure.is_none());
    }

    #[test]
    fn test_internal_failure() {
        let mut status = new_status();
        status.set_internal(Some(&"operation not permitted"), "INTERNAL: failed to initialise pinger");

        assert!(status.is_internal_failure());
        assert_eq!(
            status.log_message(),
            "INTERNAL: failed to initialise pinger, error: operation not permitted"
        );
    }

    #[test]
    fn test_request_ids_are_hex_and_fresh() {
        let first = generate_request_id(9);
        let second = generate_request_id(9);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(Duration::from_micros(12_345)), "12.35");
        assert_eq!(format_millis(Duration::ZERO), "0.00");
    }
}
