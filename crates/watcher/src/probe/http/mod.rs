pub mod tls;

use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::{Client, Method, Response, StatusCode};
use thiserror::Error;
use tokio::time::{Instant, timeout};
use url::Url;

use super::{Probe, ProbeIdentity, log_status};
use crate::error::WatcherError;
use crate::model::ProtocolKind;
use crate::status::{MSG_SUCCESS, MSG_TIMEOUT, Status};
use crate::storage::Storage;

pub const DEFAULT_ALLOWED_STATUS_CODES: [u16; 6] = [200, 201, 202, 203, 204, 205];
pub const MAX_REDIRECTS: usize = 10;

const MSG_FAILED_TO_EXECUTE: &str = "failed to execute http request";
const MSG_BAD_STATUS_CODE: &str = "failed - bad http status code";
const MSG_CONTENT_NOT_FOUND: &str = "failed - content not found";
const MSG_CERT_EXPIRATION: &str = "failed - certificate expiration issue";
const MSG_INTERNAL_PREPARE: &str = "INTERNAL: failed to prepare http request";
const MSG_INTERNAL_READ: &str = "INTERNAL: failed to read http response";

/// Validated settings of one HTTP/HTTPS check
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub identity: ProbeIdentity,

    /// `http` or `https`; derived from the port when absent
    pub scheme: Option<String>,
    pub target: String,
    pub port: u16,
    pub timeout: Duration,
    pub method: String,
    pub query: String,

    /// Form fields sent with POST requests
    pub post_data: Vec<(String, String)>,

    /// Sent on the first request and on every redirect hop
    pub extra_headers: Vec<(String, String)>,

    pub auth_enabled: bool,
    pub auth_username: String,
    pub auth_password: String,

    pub content_check_enabled: bool,
    pub content_check_string: String,

    /// Empty means [`DEFAULT_ALLOWED_STATUS_CODES`]
    pub allowed_status_codes: Vec<u16>,

    pub tls_skip_verify: bool,
    pub tls_check_certificates: bool,
    pub tls_cert_expiration_threshold: Duration,
}

impl HttpConfig {
    /// GET check against `target:port` with every option at its default
    pub fn new(identity: ProbeIdentity, target: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            identity,
            scheme: None,
            target: target.into(),
            port,
            timeout,
            method: "GET".into(),
            query: String::new(),
            post_data: Vec::new(),
            extra_headers: Vec::new(),
            auth_enabled: false,
            auth_username: String::new(),
            auth_password: String::new(),
            content_check_enabled: false,
            content_check_string: String::new(),
            allowed_status_codes: Vec::new(),
            tls_skip_verify: false,
            tls_check_certificates: false,
            tls_cert_expiration_threshold: Duration::ZERO,
        }
    }
}

#[derive(Debug, Error)]
enum SendError {
    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error("stopped after {0} redirects")]
    TooManyRedirects(usize),

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

impl SendError {
    fn is_timeout(&self) -> bool {
        match self {
            SendError::Request(err) => err.is_timeout(),
            SendError::Timeout(_) => true,
            SendError::TooManyRedirects(_) => false,
        }
    }
}

/// One HTTP/HTTPS request with status, content and certificate checks
pub struct HttpProbe {
    config: HttpConfig,
    url: Url,
    method: Method,
    headers: HeaderMap,
    form_body: Option<String>,
    allowed_status_codes: Vec<u16>,
    storage: Arc<dyn Storage>,
}

impl HttpProbe {
    pub fn new(config: HttpConfig, storage: Arc<dyn Storage>) -> Result<Self, WatcherError> {
        config.identity.validate()?;
        let id = config.identity.id;

        if config.port == 0 {
            return Err(WatcherError::invalid(format!("http check {id}: port must not be zero")));
        }
        if config.target.trim().is_empty() {
            return Err(WatcherError::invalid(format!("http check {id}: target must not be empty")));
        }
        if config.timeout.is_zero() {
            return Err(WatcherError::invalid(format!("http check {id}: timeout must not be zero")));
        }
        let method = parse_method(&config.method)
            .map_err(|reason| WatcherError::invalid(format!("http check {id}: {reason}")))?;
        if config.auth_enabled && config.auth_username.is_empty() {
            return Err(WatcherError::invalid(format!(
                "http check {id}: username must not be empty when basic auth is enabled"
            )));
        }
        if config.tls_check_certificates && config.tls_cert_expiration_threshold.is_zero() {
            return Err(WatcherError::invalid(format!(
                "http check {id}: certificate expiration threshold must not be zero when certificate checks are enabled"
            )));
        }

        let url = build_url(config.scheme.as_deref(), &config.target, config.port, &config.query)
            .map_err(|reason| WatcherError::invalid(format!("http check {id}: {reason}")))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| WatcherError::invalid(format!("http check {id}: header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| WatcherError::invalid(format!("http check {id}: header {name} value: {e}")))?;
            headers.append(name, value);
        }

        let form_body = (method == Method::POST && !config.post_data.is_empty()).then(|| {
            url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(config.post_data.iter())
                .finish()
        });

        let allowed_status_codes = if config.allowed_status_codes.is_empty() {
            DEFAULT_ALLOWED_STATUS_CODES.to_vec()
        } else {
            config.allowed_status_codes.clone()
        };

        Ok(Self {
            config,
            url,
            method,
            headers,
            form_body,
            allowed_status_codes,
            storage,
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn build_client(&self) -> reqwest::Result<Client> {
        Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .connect_timeout(self.config.timeout)
            .read_timeout(self.config.timeout)
            .pool_idle_timeout(self.config.timeout)
            .danger_accept_invalid_certs(self.config.tls_skip_verify)
            .build()
    }

    fn request(&self, client: &Client, method: &Method, url: Url, with_body: bool) -> reqwest::RequestBuilder {
        let mut builder = client.request(method.clone(), url).headers(self.headers.clone());
        if self.config.auth_enabled {
            builder = builder.basic_auth(&self.config.auth_username, Some(&self.config.auth_password));
        }
        if let (true, Some(body)) = (with_body, &self.form_body) {
            builder = builder
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body.clone());
        }
        builder
    }

    /// Send the request, following redirects by hand so auth and headers survive each hop
    async fn send(&self, client: &Client) -> Result<Response, SendError> {
        let mut url = self.url.clone();
        let mut method = self.method.clone();
        let mut with_body = method == Method::POST;

        for _ in 0..=MAX_REDIRECTS {
            let response = self.request(client, &method, url.clone(), with_body).send().await?;
            let status = response.status();
            if !status.is_redirection() {
                return Ok(response);
            }

            let next = response
                .headers()
                .get(LOCATION)
                .and_then(|location| location.to_str().ok())
                .and_then(|location| url.join(location).ok());
            let Some(next) = next else {
                return Ok(response);
            };

            if status == StatusCode::SEE_OTHER
                || (method == Method::POST && matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND))
            {
                method = Method::GET;
                with_body = false;
            }
            url = next;
        }

        Err(SendError::TooManyRedirects(MAX_REDIRECTS))
    }

    /// Every check after the response arrived; returns false once `status` is final
    async fn inspect(&self, response: Response, status: &mut Status) -> bool {
        let code = response.status().as_u16();
        if !self.allowed_status_codes.contains(&code) {
            let extra = format!(
                "http status code {code} is not within allowed codes {:?}",
                self.allowed_status_codes
            );
            status.set(false, None, MSG_BAD_STATUS_CODE, &extra);
            return false;
        }

        if self.config.content_check_enabled {
            let body = match timeout(self.config.timeout, response.text()).await {
                Ok(Ok(body)) => body,
                Ok(Err(err)) if err.is_timeout() => {
                    status.set(false, Some(&err), MSG_TIMEOUT, "");
                    return false;
                }
                Ok(Err(err)) => {
                    self.describe_failure(&status.request_id, &err, MSG_INTERNAL_READ);
                    status.set_internal(Some(&err), MSG_INTERNAL_READ);
                    return false;
                }
                Err(_) => {
                    status.set(false, None, MSG_TIMEOUT, "timed out reading the response body");
                    return false;
                }
            };
            if !body.contains(&self.config.content_check_string) {
                status.set(
                    false,
                    None,
                    MSG_CONTENT_NOT_FOUND,
                    "the page was retrieved, but the required content was not found",
                );
                return false;
            }
        }

        if self.config.tls_check_certificates && self.url.scheme() == "https" {
            let port = self.url.port_or_known_default().unwrap_or(self.config.port);
            let fetched = match self.url.host() {
                Some(host) => tls::fetch_peer_certificates(&host, port, self.config.timeout).await,
                None => Err(tls::TlsInspectError::ServerName(self.config.target.clone())),
            };
            match fetched {
                Ok(chain) => {
                    let threshold = self.config.tls_cert_expiration_threshold;
                    let soon = tls::expiring(&chain, Utc::now(), threshold);
                    if !soon.is_empty() {
                        status.set(false, None, MSG_CERT_EXPIRATION, &tls::describe_expiring(&soon, threshold));
                        return false;
                    }
                }
                Err(err) => {
                    status.set(false, Some(&err), MSG_CERT_EXPIRATION, "unable to read peer certificates");
                    return false;
                }
            }
        }

        true
    }
}

#[async_trait]
impl Probe for HttpProbe {
    fn identity(&self) -> &ProbeIdentity {
        &self.config.identity
    }

    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Http
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

        let client = match self.build_client() {
            Ok(client) => client,
            Err(err) => {
                self.describe_failure(&status.request_id, &err, MSG_INTERNAL_PREPARE);
                status.set_internal(Some(&err), MSG_INTERNAL_PREPARE);
                return status;
            }
        };

        // bounds the wait for response headers; the body read has its own deadline
        let sent = match timeout(self.config.timeout, self.send(&client)).await {
            Ok(sent) => sent,
            Err(_) => Err(SendError::Timeout(self.config.timeout)),
        };
        status.set_duration(started.elapsed());

        let response = match sent {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                status.set(false, Some(&err), MSG_TIMEOUT, "");
                return status;
            }
            Err(err) => {
                status.set(false, Some(&err), MSG_FAILED_TO_EXECUTE, "");
                return status;
            }
        };

        if self.inspect(response, &mut status).await {
            status.set(true, None, MSG_SUCCESS, "");
        }
        status
    }

    fn describe_result(&self, status: &Status) {
        log_status(ProtocolKind::Http, &self.config.target, Some(self.config.port), status);
    }
}

fn parse_method(method: &str) -> Result<Method, String> {
    let upper = method.trim().to_ascii_uppercase();
    match upper.as_str() {
        "" => Err("method must not be empty".into()),
        "GET" => Ok(Method::GET),
        "HEAD" => Ok(Method::HEAD),
        "POST" => Ok(Method::POST),
        _ => Err(format!("http method {method} is not supported")),
    }
}

/// Compose the request URL from the stored pieces
///
/// A target that already carries a scheme keeps it and gets `port` applied,
/// a bare host gets `scheme` (or one derived from the port).
fn build_url(scheme: Option<&str>, target: &str, port: u16, query: &str) -> Result<Url, String> {
    let target = target.trim();
    let mut url = if target.contains("://") {
        let mut url = Url::parse(target).map_err(|e| format!("invalid target {target}: {e}"))?;
        url.set_port(Some(port))
            .map_err(|_| format!("target {target} cannot carry a port"))?;
        url
    } else {
        let scheme = match scheme.map(str::trim).filter(|s| !s.is_empty()) {
            Some(scheme) => scheme.to_ascii_lowercase(),
            None if port == 443 => "https".to_string(),
            None => "http".to_string(),
        };
        if scheme != "http" && scheme != "https" {
            return Err(format!("protocol {scheme} is not supported"));
        }
        let (host, path) = match target.find('/') {
            Some(index) => target.split_at(index),
            None => (target, ""),
        };
        let host = match host.parse::<Ipv6Addr>() {
            Ok(address) => format!("[{address}]"),
            Err(_) => host.to_string(),
        };
        Url::parse(&format!("{scheme}://{host}:{port}{path}")).map_err(|e| format!("invalid target {target}: {e}"))?
    };

    let query = query.trim().trim_start_matches('?');
    if !query.is_empty() {
        url.set_query(Some(query));
    }
    Ok(url)
}
