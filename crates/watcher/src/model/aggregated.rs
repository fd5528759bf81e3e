use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::status::Status;

/// A run of consecutive statuses with the same result, folded into one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedStatus {
    /// Storage id; `None` until first persisted
    pub id: Option<String>,
    pub service_id: i64,
    pub cadence_seconds: u32,
    pub avg_duration: Duration,

    /// Number of statuses folded in
    pub aggregated: u32,
    pub result: bool,
    pub timestamp_from: DateTime<Utc>,
    pub timestamp_to: DateTime<Utc>,
}

impl AggregatedStatus {
    pub fn from_status(status: &Status) -> Self {
        Self {
            id: None,
            service_id: status.id,
            cadence_seconds: status.cadence_seconds,
            avg_duration: status.duration,
            aggregated: 1,
            result: status.result,
            timestamp_from: status.timestamp,
            timestamp_to: status.timestamp,
        }
    }

    /// Fold `status` into this run
    ///
    /// Returns false, leaving the record untouched, when the status belongs to
    /// another service or breaks the run by having a different result.
    pub fn absorb(&mut self, status: &Status) -> bool {
        if status.id != self.service_id || status.result != self.result {
            return false;
        }

        let total = self.avg_duration.as_nanos() * u128::from(self.aggregated) + status.duration.as_nanos();
        self.aggregated += 1;
        let avg = total / u128::from(self.aggregated);
        self.avg_duration = Duration::from_nanos(u64::try_from(avg).unwrap_or(u64::MAX));

        if status.timestamp < self.timestamp_from {
            self.timestamp_from = status.timestamp;
        }
        if status.timestamp > self.timestamp_to {
            self.timestamp_to = status.timestamp;
        }
        true
    }
}

/// Fold a time-ordered status stream into per-service runs
///
/// A new run starts whenever a service's result flips.
pub fn aggregate(statuses: &[Status]) -> Vec<AggregatedStatus> {
    let mut runs: Vec<AggregatedStatus> = Vec::new();

    for status in statuses {
        let open = runs.iter_mut().rev().find(|run| run.service_id == status.id);
        let absorbed = match open {
            Some(run) => run.absorb(status),
            None => false,
        };
        if !absorbed {
            runs.push(AggregatedStatus::from_status(status));
        }
    }

    runs
}

impl std::fmt::Display for AggregatedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[id: {}, service id: {}, interval: {}, aggregated: {}, result: {}, from: {}, to: {}]",
            self.id.as_deref().unwrap_or("-"),
            self.service_id,
            self.cadence_seconds,
            self.aggregated,
            self.result,
            self.timestamp_from.format("%Y-%m-%d %H:%M:%S"),
            self.timestamp_to.format("%Y-%m-%d %H:%M:%S"),
        )
    }
}
