// tests/integration/session_test.rs

//! Integration tests for the connection lifecycle
//! Tests: INFO banner, PING/PONG, CONNECT, keepalive, protocol errors, shutdown

use super::test_helpers::TestContext;
use spinelmq::config::Config;
use spinelmq::core::SpinelMQError;
use spinelmq::core::protocol::ParseErrorCode;
use std::time::Duration;

/// Long enough for paused-time tests to reach several keepalive ticks.
const TICK_WAIT: Duration = Duration::from_secs(60);

fn keepalive_config() -> Config {
    Config {
        ping_interval: Duration::from_secs(1),
        max_pings_outstanding: 2,
        ..Config::default()
    }
}

// ===== INFO Banner Tests =====

#[tokio::test]
async fn test_info_banner_fields() {
    let ctx = TestContext::new();
    let client = ctx.connect().await;

    let json = client.info.strip_prefix("INFO ").unwrap();
    let info: serde_json::Value = serde_json::from_str(json).unwrap();

    let server_id = info["server_id"].as_str().unwrap();
    assert_eq!(server_id.len(), 32);
    assert!(server_id.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(server_id, ctx.state.server_id);
    assert_eq!(info["server_name"], "spinelmq");
    assert_eq!(info["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(info["proto"], 1);
    assert_eq!(info["host"], "0.0.0.0");
    assert_eq!(info["port"], 4222);
    assert_eq!(info["headers"], false);
    assert_eq!(info["max_payload"], 1024 * 1024);
    assert_eq!(info["client_id"], client.id);
    assert_eq!(info["client_ip"], "127.0.0.1");
}

#[tokio::test]
async fn test_each_client_gets_a_distinct_id() {
    let ctx = TestContext::new();
    let first = ctx.connect().await;
    let second = ctx.connect().await;

    assert_ne!(first.id, second.id);
    assert_eq!(ctx.state.clients.len(), 2);
}

// ===== PING / PONG Tests =====

#[tokio::test]
async fn test_ping_produces_only_pong() {
    let ctx = TestContext::new();
    let mut client = ctx.connect().await;

    client.send(b"PING\r\n").await;
    client.expect_line("PONG").await;
    client.assert_silent(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_unsolicited_pong_is_ignored() {
    let ctx = TestContext::new();
    let mut client = ctx.connect().await;

    client.send(b"PONG\r\n").await;
    client.sync().await;
}

// ===== CONNECT Tests =====

#[tokio::test]
async fn test_connect_records_client_metadata() {
    let ctx = TestContext::new();
    let mut client = ctx.connect().await;

    client.handshake(false, true).await;
    client.sync().await;

    let handle = ctx.state.clients.get(&client.id).unwrap();
    assert_eq!(handle.info.name.as_deref(), Some("test-client"));
    assert_eq!(handle.info.lang.as_deref(), Some("rust"));
    assert_eq!(handle.info.version.as_deref(), Some("1.0.0"));
}

#[tokio::test]
async fn test_verbose_connect_is_acknowledged() {
    let ctx = TestContext::new();
    let mut client = ctx.connect().await;

    // handshake() asserts the +OK.
    client.handshake(true, true).await;
    client.sync().await;
}

#[tokio::test(start_paused = true)]
async fn test_invalid_connect_is_rejected_without_closing() {
    let ctx = TestContext::with_config(keepalive_config());
    let mut client = ctx.connect().await;

    client.send(b"CONNECT {not json}\r\n").await;
    client.expect_line("-ERR 'Invalid CONNECT Options'").await;

    // No keepalive was started.
    client.assert_silent(Duration::from_secs(10)).await;
    client.sync().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_missing_required_fields_is_rejected() {
    let ctx = TestContext::with_config(keepalive_config());
    let mut client = ctx.connect().await;

    client.send(b"CONNECT {\"verbose\":true}\r\n").await;
    client.expect_line("-ERR 'Invalid CONNECT Options'").await;
    client.assert_silent(Duration::from_secs(10)).await;
}

// ===== Keepalive Tests =====

#[tokio::test(start_paused = true)]
async fn test_keepalive_ping_after_connect() {
    let ctx = TestContext::with_config(keepalive_config());
    let mut client = ctx.connect().await;

    client.handshake(false, true).await;
    assert_eq!(client.read_line_within(TICK_WAIT).await, "PING");
}

#[tokio::test(start_paused = true)]
async fn test_no_keepalive_without_connect() {
    let ctx = TestContext::with_config(keepalive_config());
    let mut client = ctx.connect().await;

    client.assert_silent(Duration::from_secs(30)).await;
    client.sync().await;
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_pings_make_the_connection_stale() {
    let ctx = TestContext::with_config(keepalive_config());
    let mut client = ctx.connect().await;

    client.handshake(false, true).await;
    assert_eq!(client.read_line_within(TICK_WAIT).await, "PING");
    assert_eq!(client.read_line_within(TICK_WAIT).await, "PING");

    let rest = client.read_until_closed().await;
    assert_eq!(rest, "-ERR 'Stale Connection'\r\n");
    assert_eq!(client.join().await, Err(SpinelMQError::StaleConnection));
}

#[tokio::test(start_paused = true)]
async fn test_pong_resets_outstanding_pings() {
    let ctx = TestContext::with_config(keepalive_config());
    let mut client = ctx.connect().await;

    client.handshake(false, true).await;
    for _ in 0..5 {
        assert_eq!(client.read_line_within(TICK_WAIT).await, "PING");
        client.send(b"PONG\r\n").await;
    }
    client.sync().await;
    assert!(ctx.state.clients.contains_key(&client.id));
}

// ===== Protocol Error Tests =====

#[tokio::test]
async fn test_unknown_operation_closes_the_connection() {
    let ctx = TestContext::new();
    let mut client = ctx.connect().await;

    client.send(b"XYZ\r\n").await;

    let rest = client.read_until_closed().await;
    assert_eq!(rest, "-ERR 'Unknown Protocol Operation'\r\n");
    match client.join().await {
        Err(SpinelMQError::Parse(e)) => assert_eq!(e.code, ParseErrorCode::Parsing),
        other => panic!("expected a parse error, got {other:?}"),
    }
    assert!(!ctx.state.clients.contains_key(&client.id));
}

#[tokio::test]
async fn test_oversized_payload_closes_the_connection() {
    let config = Config {
        max_payload: 16,
        ..Config::default()
    };
    let ctx = TestContext::with_config(config);
    let mut client = ctx.connect().await;

    client.send(b"PUB foo 17\r\n").await;

    let rest = client.read_until_closed().await;
    assert_eq!(rest, "-ERR 'Maximum Payload Violation'\r\n");
    match client.join().await {
        Err(SpinelMQError::Parse(e)) => assert_eq!(e.code, ParseErrorCode::MaxPayload),
        other => panic!("expected a parse error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_long_control_line_closes_the_connection() {
    let config = Config {
        max_control_line: 32,
        ..Config::default()
    };
    let ctx = TestContext::with_config(config);
    let mut client = ctx.connect().await;

    client.send(format!("SUB {} 1\r\n", "a".repeat(64)).as_bytes()).await;

    let rest = client.read_until_closed().await;
    assert_eq!(rest, "-ERR 'Maximum Control Line Exceeded'\r\n");
}

#[tokio::test]
async fn test_queued_replies_are_flushed_before_the_error() {
    let ctx = TestContext::new();
    let mut client = ctx.connect().await;

    client.send(b"PING\r\nPUB foo x\r\n").await;

    let rest = client.read_until_closed().await;
    assert_eq!(rest, "PONG\r\n-ERR 'Invalid Protocol Arguments'\r\n");
}

#[tokio::test]
async fn test_subscriptions_are_removed_after_a_protocol_error() {
    let ctx = TestContext::new();
    let mut client = ctx.connect().await;

    client.send(b"SUB foo 1\r\n").await;
    client.sync().await;
    assert_eq!(ctx.state.registry.len(), 1);

    client.send(b"BOGUS\r\n").await;
    assert!(client.join().await.is_err());
    assert!(ctx.state.registry.is_empty());
}

// ===== Shutdown Tests =====

#[tokio::test]
async fn test_global_shutdown_closes_every_connection() {
    let ctx = TestContext::new();
    let mut first = ctx.connect().await;
    let mut second = ctx.connect().await;

    first.send(b"SUB foo 1\r\n").await;
    first.sync().await;

    ctx.shutdown();

    first.read_until_closed().await;
    second.read_until_closed().await;
    first.join().await.unwrap();
    second.join().await.unwrap();

    assert!(ctx.state.registry.is_empty());
    assert!(ctx.state.clients.is_empty());
}

#[tokio::test]
async fn test_peer_close_is_a_normal_disconnect() {
    let ctx = TestContext::new();
    let client = ctx.connect().await;

    client.close().await.unwrap();
    assert!(ctx.state.clients.is_empty());
}
