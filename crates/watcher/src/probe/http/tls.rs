//! Peer certificate inspection for HTTPS checks
//!
//! reqwest only exposes the leaf certificate, so the chain is read from a
//! separate handshake. The handshake accepts any certificate: trust is the
//! HTTP client's business, this path only looks at expiry dates.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use url::Host;
use tokio_rustls::rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::crypto::{CryptoProvider, ring, verify_tls12_signature, verify_tls13_signature};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{self, ClientConfig, DigitallySignedStruct, SignatureScheme};
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

#[derive(Debug, Error)]
pub enum TlsInspectError {
    #[error("invalid server name {0}")]
    ServerName(String),

    #[error("tls configuration failed: {0}")]
    Config(#[from] rustls::Error),

    #[error("tls handshake failed: {0}")]
    Handshake(#[from] std::io::Error),

    #[error("tls handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("server sent no certificates")]
    NoCertificates,

    #[error("failed to parse certificate: {0}")]
    Parse(String),
}

/// What the expiry check needs from one certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCertificate {
    pub dns_names: Vec<String>,
    pub not_after: DateTime<Utc>,
}

impl PeerCertificate {
    pub fn from_der(der: &[u8]) -> Result<Self, TlsInspectError> {
        let (_, cert) = X509Certificate::from_der(der).map_err(|e| TlsInspectError::Parse(e.to_string()))?;

        let mut dns_names: Vec<String> = match cert.subject_alternative_name() {
            Ok(Some(san)) => san
                .value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some((*dns).to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        if dns_names.is_empty() {
            dns_names.extend(
                cert.subject()
                    .iter_common_name()
                    .filter_map(|cn| cn.as_str().ok())
                    .map(str::to_string),
            );
        }

        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| TlsInspectError::Parse("notAfter out of range".into()))?;

        Ok(Self { dns_names, not_after })
    }
}

/// Certificates that expire before `now + threshold`
pub fn expiring(certificates: &[PeerCertificate], now: DateTime<Utc>, threshold: Duration) -> Vec<&PeerCertificate> {
    let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
    let horizon = now.checked_add_signed(threshold).unwrap_or(DateTime::<Utc>::MAX_UTC);
    certificates.iter().filter(|cert| horizon > cert.not_after).collect()
}

pub fn describe_expiring(certificates: &[&PeerCertificate], threshold: Duration) -> String {
    let hours = threshold.as_secs() / 3600;
    certificates
        .iter()
        .map(|cert| {
            format!(
                "certificate [{}] will expire in less than {hours} hours",
                cert.dns_names.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// SNI name and dial address for a URL host; IP literals never go through DNS
pub fn handshake_target(host: &Host<&str>, port: u16) -> Result<(ServerName<'static>, String), TlsInspectError> {
    match host {
        Host::Domain(domain) => {
            let name = ServerName::try_from(domain.to_string())
                .map_err(|_| TlsInspectError::ServerName(domain.to_string()))?;
            Ok((name, format!("{domain}:{port}")))
        }
        Host::Ipv4(address) => {
            let ip = IpAddr::V4(*address);
            Ok((ServerName::from(ip), SocketAddr::new(ip, port).to_string()))
        }
        Host::Ipv6(address) => {
            let ip = IpAddr::V6(*address);
            Ok((ServerName::from(ip), SocketAddr::new(ip, port).to_string()))
        }
    }
}

/// Handshake with `host:port` and return every certificate the server presented
pub async fn fetch_peer_certificates(
    host: &Host<&str>,
    port: u16,
    deadline: Duration,
) -> Result<Vec<PeerCertificate>, TlsInspectError> {
    let provider = Arc::new(ring::default_provider());
    let verifier = Arc::new(AcceptAnyCertificate {
        provider: provider.clone(),
    });
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();

    let (server_name, address) = handshake_target(host, port)?;
    let connector = TlsConnector::from(Arc::new(config));

    let handshake = async {
        let stream = TcpStream::connect(address.as_str()).await?;
        connector.connect(server_name, stream).await
    };
    let tls = timeout(deadline, handshake)
        .await
        .map_err(|_| TlsInspectError::Timeout(deadline))??;

    let (_, connection) = tls.get_ref();
    let chain = connection.peer_certificates().ok_or(TlsInspectError::NoCertificates)?;
    if chain.is_empty() {
        return Err(TlsInspectError::NoCertificates);
    }

    chain.iter().map(|der| PeerCertificate::from_der(der.as_ref())).collect()
}

#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
