use std::fs;
use std::path::PathBuf;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use parley::config::ProviderSettings;
use parley::mcp::config::{ServerConfig, StdioTransportConfig, TransportConfig};

/// Path to the `mcp_test_server` binary built alongside the tests.
#[allow(dead_code)]
pub fn test_server_exe() -> PathBuf {
    if let Ok(p) = std::env::var("CARGO_BIN_EXE_mcp_test_server") {
        return PathBuf::from(p);
    }

    if let Ok(manifest) = std::env::var("CARGO_MANIFEST_DIR") {
        let debug = PathBuf::from(manifest)
            .join("target")
            .join("debug")
            .join("mcp_test_server");
        if debug.exists() {
            return debug;
        }
    }

    PathBuf::from("mcp_test_server")
}

#[allow(dead_code)]
pub fn stdio_config(request_timeout_secs: u64) -> StdioTransportConfig {
    let mut cfg = StdioTransportConfig::new(test_server_exe().to_string_lossy());
    cfg.request_timeout_secs = request_timeout_secs;
    cfg.shutdown_grace_secs = 1;
    cfg
}

#[allow(dead_code)]
pub fn stdio_server(request_timeout_secs: u64) -> ServerConfig {
    ServerConfig::new(TransportConfig::Stdio(stdio_config(request_timeout_secs)))
}

/// A directory holding `a.txt`, `b.txt` and a `nested/` directory.
#[allow(dead_code)]
pub fn sample_dir() -> TempDir {
    let tmp = TempDir::new().expect("failed to create tempdir");
    fs::write(tmp.path().join("a.txt"), "alpha").expect("write a.txt");
    fs::write(tmp.path().join("b.txt"), "bravo").expect("write b.txt");
    fs::create_dir(tmp.path().join("nested")).expect("create nested");
    tmp
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("parley.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Mount a healthy `/models` listing on `server`.
#[allow(dead_code)]
pub async fn mount_models(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [{ "id": "gpt-test", "object": "model" }]
        })))
        .mount(server)
        .await;
}

/// Mount a chat completion answering `text`.
#[allow(dead_code)]
pub async fn mount_completion(server: &MockServer, text: &str) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "model": "gpt-test",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": text },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12 }
        })))
        .mount(server)
        .await;
}

#[allow(dead_code)]
pub fn provider_settings(server: &MockServer) -> ProviderSettings {
    let mut settings = ProviderSettings::new(server.uri(), "gpt-test");
    settings.api_key = Some("test-key".to_string());
    settings.timeout_secs = 5;
    settings
}
