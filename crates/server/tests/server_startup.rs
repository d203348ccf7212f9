//! Start the real binary and talk to it over HTTP.

use std::io::Write;
use std::net::TcpListener;
use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use tempfile::{NamedTempFile, TempDir};
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};

/// Find an available port
fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Config whose indexer and backend point at a closed port.
fn unreachable_upstreams_config(port: u16, db_path: &Path) -> String {
    format!(
        r#"
[server]
host = "127.0.0.1"
port = {}

[database]
path = "{}"

[indexer]
url = "http://127.0.0.1:9"
api_key = "indexer-secret"
timeout_secs = 2

[backend]
url = "http://127.0.0.1:9"
api_key = "backend-secret"
"#,
        port,
        db_path.display()
    )
}

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// A running server with the files it depends on.
struct RunningServer {
    child: Child,
    port: u16,
    _config: NamedTempFile,
    _db_dir: TempDir,
}

impl RunningServer {
    async fn start() -> Self {
        let port = get_available_port();
        let db_dir = tempfile::tempdir().unwrap();
        let config = write_config(&unreachable_upstreams_config(
            port,
            &db_dir.path().join("cache.db"),
        ));

        let child = Command::new(env!("CARGO_BIN_EXE_nzbstream"))
            .env("NZBSTREAM_CONFIG", config.path())
            .env("RUST_LOG", "error")
            .kill_on_drop(true)
            .spawn()
            .expect("Failed to spawn server");

        let server = Self {
            child,
            port,
            _config: config,
            _db_dir: db_dir,
        };
        assert!(server.wait_ready(40).await, "Server did not start in time");
        server
    }

    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    async fn wait_ready(&self, max_attempts: u32) -> bool {
        let client = Client::new();
        for _ in 0..max_attempts {
            if client.get(self.url("/api/v1/health")).send().await.is_ok() {
                return true;
            }
            sleep(Duration::from_millis(50)).await;
        }
        false
    }

    async fn stop(mut self) {
        self.child.kill().await.ok();
    }
}

async fn run_to_exit(config_path: &Path) -> std::process::Output {
    timeout(
        Duration::from_secs(5),
        Command::new(env!("CARGO_BIN_EXE_nzbstream"))
            .env("NZBSTREAM_CONFIG", config_path)
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command")
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = RunningServer::start().await;

    let response = Client::new()
        .get(server.url("/api/v1/health"))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let json: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(json["status"], "ok");
    assert_eq!(json["backend"], "sabnzbd");

    server.stop().await;
}

#[tokio::test]
async fn test_config_endpoint_returns_sanitized() {
    let server = RunningServer::start().await;

    let response = Client::new()
        .get(server.url("/api/v1/config"))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let json: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(json["server"]["port"], server.port);
    assert_eq!(json["backend"]["credentials_configured"], true);
    assert!(!json.to_string().contains("backend-secret"));

    server.stop().await;
}

#[tokio::test]
async fn test_resolve_with_unreachable_indexer_is_bad_gateway() {
    let server = RunningServer::start().await;

    let response = Client::new()
        .post(server.url("/api/v1/resolve"))
        .json(&json!({
            "content": { "kind": "movie", "id": "tt0133093" },
            "title": "The Matrix",
            "year": 1999
        }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status().as_u16(), 502);

    let json: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(json["code"], "search");

    server.stop().await;
}

#[tokio::test]
async fn test_missing_config_file_exits_with_error() {
    let result = run_to_exit(Path::new("/nonexistent/config.toml")).await;
    assert!(!result.status.success());
}

#[tokio::test]
async fn test_missing_backend_section_exits_with_error() {
    let config = write_config(
        r#"
[server]
port = 8080

[indexer]
url = "http://127.0.0.1:9"
api_key = "key"
"#,
    );

    let result = run_to_exit(config.path()).await;
    assert!(!result.status.success());
}

#[tokio::test]
async fn test_invalid_blocklist_rule_exits_with_error() {
    let db_dir = tempfile::tempdir().unwrap();
    let mut content = unreachable_upstreams_config(get_available_port(), &db_dir.path().join("cache.db"));
    content.push_str(
        r#"
[[blocklist.rules]]
pattern = "(unclosed"
kind = "regex"
"#,
    );
    let config = write_config(&content);

    let result = run_to_exit(config.path()).await;
    assert!(!result.status.success());
}
