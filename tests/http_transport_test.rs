//! HTTP transport integration tests
//!
//! Exercises `HttpTransport` against a `wiremock` server: the health probe
//! gate, bearer authentication, reply validation and HTTP error mapping.

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use parley::error::{classify, ParleyError};
use parley::mcp::config::HttpTransportConfig;
use parley::mcp::transport::http::HttpTransport;
use parley::mcp::transport::Transport;

fn make_transport(server: &MockServer) -> HttpTransport {
    let mut cfg = HttpTransportConfig::new(server.uri());
    cfg.api_key = Some("secret".to_string());
    cfg.timeout_secs = 2;
    HttpTransport::new(&cfg).expect("valid config")
}

async fn mount_health(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Replies with a result echoing the request id and method.
fn echo_id(req: &Request) -> ResponseTemplate {
    let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap_or_default();
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": body["id"],
        "result": { "method": body["method"] }
    }))
}

#[tokio::test]
async fn test_connect_requires_healthy_probe() {
    let server = MockServer::start().await;
    mount_health(&server, 503).await;

    let transport = make_transport(&server);
    let err = transport.connect().await.unwrap_err();
    assert!(matches!(classify(&err), Some(ParleyError::ConnectionFailed(_))));
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_request_carries_bearer_and_envelope() {
    let server = MockServer::start().await;
    mount_health(&server, 200).await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(header("authorization", "Bearer secret"))
        .and(body_partial_json(json!({ "jsonrpc": "2.0", "method": "tools/list" })))
        .respond_with(echo_id)
        .expect(1)
        .mount(&server)
        .await;

    let transport = make_transport(&server);
    transport.connect().await.unwrap();
    let result = transport.send_request("tools/list", None).await.unwrap();
    assert_eq!(result["method"], "tools/list");
}

#[tokio::test]
async fn test_mismatched_id_is_malformed() {
    let server = MockServer::start().await;
    mount_health(&server, 200).await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "not-the-request-id",
            "result": {}
        })))
        .mount(&server)
        .await;

    let transport = make_transport(&server);
    transport.connect().await.unwrap();
    let err = transport.send_request("ping", None).await.unwrap_err();
    assert!(matches!(classify(&err), Some(ParleyError::MalformedResponse(_))));
}

#[tokio::test]
async fn test_json_rpc_error_is_upstream_failure() {
    let server = MockServer::start().await;
    mount_health(&server, 200).await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(|req: &Request| {
            let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap_or_default();
            ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": body["id"],
                "error": { "code": -32602, "message": "Unknown tool: nope" }
            }))
        })
        .mount(&server)
        .await;

    let transport = make_transport(&server);
    transport.connect().await.unwrap();
    let err = transport
        .send_request("tools/call", Some(json!({ "name": "nope" })))
        .await
        .unwrap_err();
    match classify(&err) {
        Some(ParleyError::UpstreamFailed { code, message }) => {
            assert_eq!(*code, -32602);
            assert!(message.contains("Unknown tool"));
        }
        other => panic!("expected UpstreamFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_http_error_status_is_upstream_failure() {
    let server = MockServer::start().await;
    mount_health(&server, 200).await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let transport = make_transport(&server);
    transport.connect().await.unwrap();
    let err = transport.send_request("ping", None).await.unwrap_err();
    match classify(&err) {
        Some(ParleyError::UpstreamFailed { code, message }) => {
            assert_eq!(*code, 500);
            assert_eq!(message, "boom");
        }
        other => panic!("expected UpstreamFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    mount_health(&server, 200).await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(5)))
        .mount(&server)
        .await;

    let transport = make_transport(&server);
    transport.connect().await.unwrap();
    let err = transport.send_request("ping", None).await.unwrap_err();
    assert!(matches!(classify(&err), Some(ParleyError::Timeout(_))));
}
