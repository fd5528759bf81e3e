//! Turns stored definitions into validated probes

pub mod metadata;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::WatcherError;
use crate::model::{CheckDefinition, ProtocolKind};
use crate::probe::{
    HttpConfig, HttpProbe, IcmpConfig, IcmpProbe, Pinger, Probe, ProbeIdentity, SurgePinger, TcpConfig, TcpProbe,
};
use crate::storage::Storage;

pub use metadata::{HttpMetadata, IcmpMetadata, KeyValue, TcpMetadata};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Builds probes that persist into `storage`
#[derive(Clone)]
pub struct CheckParser {
    storage: Arc<dyn Storage>,
    pinger: Arc<dyn Pinger>,
}

impl CheckParser {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            pinger: Arc::new(SurgePinger),
        }
    }

    /// Replace the ICMP prober, e.g. with one that needs no raw socket
    pub fn with_pinger(mut self, pinger: Arc<dyn Pinger>) -> Self {
        self.pinger = pinger;
        self
    }

    pub fn parse(&self, definition: &CheckDefinition) -> Result<Box<dyn Probe>, WatcherError> {
        let identity = ProbeIdentity {
            id: definition.id,
            cadence_seconds: definition.cadence_seconds,
            fail_threshold: definition.fail_threshold,
        };

        let probe: Box<dyn Probe> = match definition.kind {
            ProtocolKind::Http => {
                let raw: HttpMetadata = decode(definition)?;
                note_id_mismatch(definition, raw.id);
                Box::new(HttpProbe::new(http_config(identity, raw), self.storage.clone())?)
            }
            ProtocolKind::Tcp => {
                let raw: TcpMetadata = decode(definition)?;
                note_id_mismatch(definition, raw.id);
                let config = TcpConfig {
                    identity,
                    target: raw.target,
                    port: raw.port,
                    timeout: Duration::from_secs(raw.timeout_seconds),
                };
                Box::new(TcpProbe::new(config, self.storage.clone())?)
            }
            ProtocolKind::Icmp => {
                let raw: IcmpMetadata = decode(definition)?;
                note_id_mismatch(definition, raw.id);
                let config = IcmpConfig {
                    identity,
                    target: raw.target,
                    timeout: Duration::from_secs(raw.timeout_seconds),
                };
                Box::new(IcmpProbe::new(config, self.pinger.clone(), self.storage.clone())?)
            }
        };

        debug!(id = definition.id, check = %definition.kind, "parsed check metadata");
        Ok(probe)
    }
}

fn decode<T: DeserializeOwned>(definition: &CheckDefinition) -> Result<T, WatcherError> {
    serde_json::from_str(&definition.metadata).map_err(|source| WatcherError::Metadata {
        id: definition.id,
        kind: match definition.kind {
            ProtocolKind::Http => "http",
            ProtocolKind::Tcp => "tcp",
            ProtocolKind::Icmp => "icmp",
        },
        source,
    })
}

fn note_id_mismatch(definition: &CheckDefinition, metadata_id: i64) {
    if metadata_id != 0 && metadata_id != definition.id {
        debug!(id = definition.id, metadata_id, "metadata id differs from definition id, using definition id");
    }
}

fn http_config(identity: ProbeIdentity, raw: HttpMetadata) -> HttpConfig {
    let pairs = |values: Vec<KeyValue>| -> Vec<(String, String)> {
        values.into_iter().map(|kv| (kv.name, kv.value)).collect()
    };

    HttpConfig {
        scheme: Some(raw.protocol).filter(|p| !p.is_empty()),
        method: raw.method,
        query: raw.query,
        post_data: pairs(raw.post_data),
        extra_headers: pairs(raw.extra_headers),
        auth_enabled: raw.auth_enabled,
        auth_username: raw.auth_username,
        auth_password: raw.auth_password,
        content_check_enabled: raw.content_check_enabled,
        content_check_string: raw.content_check_string,
        allowed_status_codes: raw.allowed_http_status_codes,
        tls_skip_verify: raw.tls_skip_verify,
        tls_check_certificates: raw.tls_check_certificates,
        tls_cert_expiration_threshold: Duration::from_secs(
            raw.tls_cert_expiration_threshold_days.saturating_mul(SECONDS_PER_DAY),
        ),
        ..HttpConfig::new(identity, raw.target, raw.port, Duration::from_secs(raw.timeout_seconds))
    }
}
