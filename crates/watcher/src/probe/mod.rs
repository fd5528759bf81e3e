//! Executable checks
//!
//! Every protocol implements [`Probe`]. A probe is built from one stored
//! definition, runs once and is dropped; its [`Status`] is the only thing
//! that outlives it.

pub mod http;
pub mod icmp;
pub mod tcp;

use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::WatcherError;
use crate::model::ProtocolKind;
use crate::status::{Status, StatusConfig, format_millis, generate_request_id};
use crate::storage::Storage;

pub use http::{HttpConfig, HttpProbe};
pub use icmp::{IcmpConfig, IcmpProbe, PingError, PingReply, Pinger, SurgePinger};
pub use tcp::{TcpConfig, TcpProbe};

/// Identity shared by every probe variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeIdentity {
    pub id: i64,
    pub cadence_seconds: u32,
    pub fail_threshold: u32,
}

impl ProbeIdentity {
    pub fn validate(&self) -> Result<(), WatcherError> {
        if self.id == 0 {
            return Err(WatcherError::invalid("check id must not be zero"));
        }
        if self.fail_threshold == 0 {
            return Err(WatcherError::invalid(format!(
                "check {}: fail threshold must be at least 1",
                self.id
            )));
        }
        Ok(())
    }

    /// Fresh status with a newly generated request id
    pub fn new_status(&self) -> Status {
        Status::new(StatusConfig {
            id: self.id,
            request_id: generate_request_id(self.id),
            cadence_seconds: self.cadence_seconds,
            fail_threshold: self.fail_threshold,
        })
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    fn identity(&self) -> &ProbeIdentity;

    fn kind(&self) -> ProtocolKind;

    fn target(&self) -> &str;

    /// Where the finished status is persisted
    fn storage(&self) -> &Arc<dyn Storage>;

    fn id(&self) -> i64 {
        self.identity().id
    }

    /// Perform the check once; target faults end up in the status, never as an error
    async fn execute(&self) -> Status;

    /// One structured line per execution
    fn describe_result(&self, status: &Status);

    fn describe_failure(&self, request_id: &str, error: &dyn Display, context: &str) {
        error!(
            check = %self.kind(),
            id = self.id(),
            request_id,
            host = self.target(),
            error = %error,
            "{context}"
        );
    }

    /// Execute, log and persist
    async fn run(&self) {
        let status = self.execute().await;
        self.describe_result(&status);
        self.persist(&status).await;
    }

    /// A persistence failure is logged and dropped; retries already happened
    /// beneath the storage handle.
    async fn persist(&self, status: &Status) {
        if let Err(err) = status.save_to(self.storage().as_ref()).await {
            self.describe_failure(&status.request_id, &err, "failed to save status");
        }
    }
}

/// Log line shared by the probe variants
pub(crate) fn log_status(kind: ProtocolKind, target: &str, port: Option<u16>, status: &Status) {
    info!(
        check = %kind,
        id = status.id,
        request_id = %status.request_id,
        host = target,
        port,
        latency_ms = %format_millis(status.duration),
        result = status.result,
        message = %status.log_message(),
        "check finished"
    );
}
