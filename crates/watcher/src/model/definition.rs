use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::WatcherError;

/// Protocol a check probes with
///
/// The numeric codes are the ones stored alongside each definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Http,
    Tcp,
    Icmp,
}

impl ProtocolKind {
    pub fn from_code(code: i32) -> Result<Self, WatcherError> {
        match code {
            0 => Ok(ProtocolKind::Http),
            1 => Ok(ProtocolKind::Tcp),
            2 => Ok(ProtocolKind::Icmp),
            other => Err(WatcherError::UnknownProtocol(other)),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            ProtocolKind::Http => 0,
            ProtocolKind::Tcp => 1,
            ProtocolKind::Icmp => 2,
        }
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolKind::Http => write!(f, "http/https"),
            ProtocolKind::Tcp => write!(f, "tcp"),
            ProtocolKind::Icmp => write!(f, "icmp"),
        }
    }
}

/// One stored check, as the external configuration system wrote it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckDefinition {
    /// Stable identity across runs
    pub id: i64,

    pub kind: ProtocolKind,

    /// How often the check runs
    pub cadence_seconds: u32,

    /// Consecutive failures before alerting; evaluated downstream
    pub fail_threshold: u32,

    /// Protocol-specific JSON payload
    pub metadata: String,
}

impl CheckDefinition {
    pub fn new(id: i64, kind: ProtocolKind, cadence_seconds: u32, metadata: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            cadence_seconds,
            fail_threshold: 1,
            metadata: metadata.into(),
        }
    }

    pub fn with_fail_threshold(mut self, fail_threshold: u32) -> Self {
        self.fail_threshold = fail_threshold;
        self
    }
}

/// Where and how often to notify about a failing service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSetting {
    pub id: i64,
    pub service_id: i64,

    /// Channel type, e.g. `email` or `webhook`
    pub channel: String,

    /// Address on that channel
    pub target: String,

    /// Minimum delay between repeated notifications
    #[serde(with = "duration_secs")]
    pub resend_every: Duration,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
