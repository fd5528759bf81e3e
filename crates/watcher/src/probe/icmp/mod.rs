mod pinger;

use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::lookup_host;
use tokio::time::Instant;

use super::{Probe, ProbeIdentity, log_status};
use crate::error::WatcherError;
use crate::model::ProtocolKind;
use crate::status::{MSG_SUCCESS, MSG_TIMEOUT, Status};
use crate::storage::Storage;

pub use pinger::{PingError, PingReply, Pinger, SurgePinger};

const MSG_UNRESOLVED: &str = "failed - unable to resolve target";
const MSG_PING_INIT: &str = "INTERNAL: failed to initialise pinger";
const MSG_PING_FAILED: &str = "failed - icmp echo request failed";

#[derive(Debug, Clone)]
pub struct IcmpConfig {
    pub identity: ProbeIdentity,
    pub target: String,
    pub timeout: Duration,
}

/// Single echo request against a host
pub struct IcmpProbe {
    config: IcmpConfig,
    pinger: Arc<dyn Pinger>,
    storage: Arc<dyn Storage>,
}

impl IcmpProbe {
    pub fn new(config: IcmpConfig, pinger: Arc<dyn Pinger>, storage: Arc<dyn Storage>) -> Result<Self, WatcherError> {
        config.identity.validate()?;
        let id = config.identity.id;
        if config.target.trim().is_empty() {
            return Err(WatcherError::invalid(format!("icmp check {id}: target must not be empty")));
        }
        if config.timeout.is_zero() {
            return Err(WatcherError::invalid(format!("icmp check {id}: timeout must not be zero")));
        }

        Ok(Self {
            config,
            pinger,
            storage,
        })
    }

    pub fn config(&self) -> &IcmpConfig {
        &self.config
    }

    async fn resolve(&self) -> io::Result<IpAddr> {
        let target = self.config.target.trim();
        if let Ok(address) = target.parse::<IpAddr>() {
            return Ok(address);
        }

        lookup_host((target, 0))
            .await?
            .next()
            .map(|socket| socket.ip())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address found for {target}")))
    }
}

#[async_trait]
impl Probe for IcmpProbe {
    fn identity(&self) -> &ProbeIdentity {
        &self.config.identity
    }

    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Icmp
    }

    fn target(&self) -> &str {
        &self.config.target
    }

    fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    async fn execute(&self) -> Status {
        let mut status = self.config.identity.new_status();
        let started = Instant::now();

        let address = match self.resolve().await {
            Ok(address) => address,
            Err(err) => {
                status.set_duration(started.elapsed());
                status.set(false, Some(&err), MSG_UNRESOLVED, "");
                return status;
            }
        };

        match self.pinger.ping(address, self.config.timeout).await {
            Ok(reply) => {
                status.set_duration(reply.elapsed);
                // a reply racing the deadline still counts as a timeout
                if reply.received && reply.elapsed < self.config.timeout {
                    status.set(true, None, MSG_SUCCESS, "");
                } else {
                    status.set(false, None, MSG_TIMEOUT, "");
                }
            }
            Err(err @ PingError::Init(_)) => {
                status.set_duration(started.elapsed());
                self.describe_failure(&status.request_id, &err, MSG_PING_INIT);
                status.set_internal(Some(&err), MSG_PING_INIT);
            }
            Err(err) => {
                status.set_duration(started.elapsed());
                status.set(false, Some(&err), MSG_PING_FAILED, "");
            }
        }
        status
    }

    fn describe_result(&self, status: &Status) {
        log_status(ProtocolKind::Icmp, &self.config.target, None, status);
    }
}
