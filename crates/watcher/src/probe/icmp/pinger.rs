use std::io;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use rand::random;
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence, SurgeError};
use thiserror::Error;

/// Outcome of one echo request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingReply {
    /// Whether an echo reply came back at all
    pub received: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Error)]
pub enum PingError {
    /// The local ICMP socket could not be opened, usually missing privileges
    #[error("failed to open icmp socket: {0}")]
    Init(#[source] io::Error),

    #[error("echo request failed: {0}")]
    Send(String),
}

/// Sends a single ICMP echo request
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self, address: IpAddr, timeout: Duration) -> Result<PingReply, PingError>;
}

const PAYLOAD: [u8; 56] = [0; 56];

/// [`Pinger`] backed by `surge-ping`
///
/// The raw socket is opened per echo so a missing capability is reported on
/// the probe that needed it rather than at startup.
#[derive(Debug, Default, Clone, Copy)]
pub struct SurgePinger;

#[async_trait]
impl Pinger for SurgePinger {
    async fn ping(&self, address: IpAddr, timeout: Duration) -> Result<PingReply, PingError> {
        let config = match address {
            IpAddr::V4(_) => Config::default(),
            IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
        };
        let client = Client::new(&config).map_err(PingError::Init)?;

        let mut pinger = client.pinger(address, PingIdentifier(random())).await;
        pinger.timeout(timeout);

        match pinger.ping(PingSequence(0), &PAYLOAD).await {
            Ok((_packet, elapsed)) => Ok(PingReply {
                received: true,
                elapsed,
            }),
            Err(SurgeError::Timeout { .. }) => Ok(PingReply {
                received: false,
                elapsed: timeout,
            }),
            Err(err) => Err(PingError::Send(err.to_string())),
        }
    }
}
