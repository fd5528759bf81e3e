use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout};

use super::{Probe, ProbeIdentity, log_status};
use crate::error::WatcherError;
use crate::model::ProtocolKind;
use crate::status::{MSG_SUCCESS, Status};
use crate::storage::Storage;

#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub identity: ProbeIdentity,
    pub target: String,
    pub port: u16,
    pub timeout: Duration,
}

/// Succeeds when a TCP connection can be established; nothing is sent
pub struct TcpProbe {
    config: TcpConfig,
    storage: Arc<dyn Storage>,
}

impl TcpProbe {
    pub fn new(config: TcpConfig, storage: Arc<dyn Storage>) -> Result<Self, WatcherError> {
        config.identity.validate()?;
        let id = config.identity.id;
        if config.port == 0 {
            return Err(WatcherError::invalid(format!("tcp check {id}: port must not be zero")));
        }
        if config.target.trim().is_empty() {
            return Err(WatcherError::invalid(format!("tcp check {id}: target must not be empty")));
        }
        if config.timeout.is_zero() {
            return Err(WatcherError::invalid(format!("tcp check {id}: timeout must not be zero")));
        }

        Ok(Self { config, storage })
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    async fn connect(&self) -> io::Result<TcpStream> {
        let address = (self.config.target.as_str(), self.config.port);
        match timeout(self.config.timeout, TcpStream::connect(address)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("timed out after {:?}", self.config.timeout),
            )),
        }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    fn identity(&self) -> &ProbeIdentity {
        &self.config.identity
    }

    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Tcp
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

        let outcome = self.connect().await;
        status.set_duration(started.elapsed());

        match outcome {
            Ok(stream) => {
                drop(stream);
                status.set(true, None, MSG_SUCCESS, "");
            }
            Err(err) => {
                let message = format!("failed to open tcp connection: {err}");
                status.set(false, Some(&err), &message, "");
            }
        }
        status
    }

    fn describe_result(&self, status: &Status) {
        log_status(ProtocolKind::Tcp, &self.config.target, Some(self.config.port), status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use tokio::net::TcpListener;

    fn config(port: u16) -> TcpConfig {
        TcpConfig {
            identity: ProbeIdentity {
                id: 11,
                cadence_seconds: 30,
                fail_threshold: 1,
            },
            target: "127.0.0.1".into(),
            port,
            timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_validation() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());

        assert!(TcpProbe::new(config(0), storage.clone()).is_err());
        assert!(
            TcpProbe::new(
                TcpConfig {
                    target: " ".into(),
                    ..config(80)
                },
                storage.clone()
            )
            .is_err()
        );
        assert!(
            TcpProbe::new(
                TcpConfig {
                    timeout: Duration::ZERO,
                    ..config(80)
                },
                storage.clone()
            )
            .is_err()
        );
        assert!(TcpProbe::new(config(80), storage).is_ok());
    }

    #[tokio::test]
    async fn test_open_port_succeeds() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let probe = TcpProbe::new(config(port), Arc::new(MemoryStorage::new())).unwrap();
        let status = probe.execute().await;

        assert!(status.result, "{}", status.log_message());
        assert_eq!(status.message, MSG_SUCCESS);
        assert!(status.error.is_none());
    }
}
