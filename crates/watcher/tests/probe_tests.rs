//! TCP and ICMP probes through the parser

mod common;

use std::sync::Arc;
use std::time::Duration;

use watcher::probe::{PingError, PingReply, Pinger};
use watcher::{CheckDefinition, CheckParser, FailureKind, MemoryStorage, ProtocolKind};

fn parser_with(pinger: impl Pinger + 'static) -> CheckParser {
    CheckParser::new(Arc::new(MemoryStorage::new())).with_pinger(Arc::new(pinger))
}

#[tokio::test]
async fn test_tcp_refused_connection() {
    let port = common::closed_port().await;
    let definition = CheckDefinition::new(
        1,
        ProtocolKind::Tcp,
        30,
        format!(r#"{{"target": "127.0.0.1", "port": {port}, "timeoutSeconds": 2}}"#),
    );

    let probe = CheckParser::new(Arc::new(MemoryStorage::new())).parse(&definition).unwrap();
    let status = probe.execute().await;

    assert!(!status.result);
    assert!(
        status.message.starts_with("failed to open tcp connection: "),
        "{}",
        status.message
    );
    assert_eq!(status.failure, Some(FailureKind::Target));
}

#[tokio::test]
async fn test_tcp_timeout() {
    let (listener, _queued) = common::saturated_listener().await;
    let port = listener.local_addr().unwrap().port();
    let definition = CheckDefinition::new(
        2,
        ProtocolKind::Tcp,
        30,
        format!(r#"{{"target": "127.0.0.1", "port": {port}, "timeoutSeconds": 1}}"#),
    );

    let probe = CheckParser::new(Arc::new(MemoryStorage::new())).parse(&definition).unwrap();
    let status = probe.execute().await;

    assert!(!status.result);
    assert!(status.message.starts_with("failed to open tcp connection"));
    let error = status.error.unwrap_or_default();
    assert!(error.contains("timed out"), "{error}");
}

#[tokio::test]
async fn test_icmp_elapsed_at_timeout_is_failure() {
    let definition = CheckDefinition::new(3, ProtocolKind::Icmp, 10, r#"{"target": "127.0.0.1", "timeoutSeconds": 1}"#);
    let parser = parser_with(common::StaticPinger {
        elapsed: Duration::from_millis(1500),
        received: true,
    });

    let status = parser.parse(&definition).unwrap().execute().await;

    assert!(!status.result);
    assert_eq!(status.message, "failed - timeout");
}

#[tokio::test]
async fn test_icmp_reply_in_time() {
    let definition = CheckDefinition::new(4, ProtocolKind::Icmp, 10, r#"{"target": "localhost", "timeoutSeconds": 1}"#);
    let parser = parser_with(common::StaticPinger {
        elapsed: Duration::from_millis(3),
        received: true,
    });

    let status = parser.parse(&definition).unwrap().execute().await;

    assert!(status.result, "{}", status.log_message());
    assert_eq!(status.message, "success");
}

struct DeniedPinger;

#[async_trait::async_trait]
impl Pinger for DeniedPinger {
    async fn ping(&self, _address: std::net::IpAddr, _timeout: Duration) -> Result<PingReply, PingError> {
        Err(PingError::Init(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "operation not permitted",
        )))
    }
}

#[tokio::test]
async fn test_icmp_privilege_failure_is_internal() {
    let definition = CheckDefinition::new(5, ProtocolKind::Icmp, 10, r#"{"target": "127.0.0.1", "timeoutSeconds": 1}"#);

    let status = parser_with(DeniedPinger).parse(&definition).unwrap().execute().await;

    assert!(!status.result);
    assert_eq!(status.failure, Some(FailureKind::Internal));
    assert!(status.message.starts_with("INTERNAL"));
}
