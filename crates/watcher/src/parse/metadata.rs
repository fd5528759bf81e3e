//! Stored metadata payloads, one shape per protocol
//!
//! Field names follow the configuration system (camelCase). Older payloads
//! used `timeout`, `proto` and `tlsCertExpirationThreshold`; both spellings
//! are accepted.

use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct KeyValue {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpMetadata {
    pub id: i64,
    pub port: u16,
    pub target: String,
    #[serde(alias = "timeout")]
    pub timeout_seconds: u64,
    #[serde(alias = "proto")]
    pub protocol: String,
    pub method: String,
    pub query: String,
    pub post_data: Vec<KeyValue>,
    pub extra_headers: Vec<KeyValue>,
    pub auth_enabled: bool,
    pub auth_username: String,
    pub auth_password: String,
    pub content_check_enabled: bool,
    pub content_check_string: String,
    pub allowed_http_status_codes: Vec<u16>,
    pub tls_skip_verify: bool,
    pub tls_check_certificates: bool,
    #[serde(alias = "tlsCertExpirationThreshold")]
    pub tls_cert_expiration_threshold_days: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TcpMetadata {
    pub id: i64,
    pub target: String,
    pub port: u16,
    #[serde(alias = "timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IcmpMetadata {
    pub id: i64,
    pub target: String,
    #[serde(alias = "timeout")]
    pub timeout_seconds: u64,
}
