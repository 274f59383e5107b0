#[allow(dead_code)]
mod common;

use flocker_core::test_helpers::fast_config;
use flocker_server::config::ServerConfig;

use common::{TestServer, ws_connect, ws_join_ok};

#[tokio::test]
async fn health_reports_no_room_before_first_join() {
    let server = TestServer::new().await;
    let resp = reqwest::get(format!("{}/health", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["connections"]["websocket"], 0);
    assert!(body["room"].is_null());
}

#[tokio::test]
async fn health_reports_room_after_join() {
    let server = TestServer::new().await;
    let mut alice = ws_connect(&server.ws_url()).await;
    ws_join_ok(&mut alice, "Alice").await;
    // Allow the room loop to publish its status
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let body: serde_json::Value = reqwest::get(format!("{}/health", server.base_url()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["connections"]["websocket"], 1);
    assert_eq!(body["room"]["phase"], "lobby");
    assert_eq!(body["room"]["connected"], 1);
}

#[tokio::test]
async fn ready_when_data_dir_exists() {
    let server = TestServer::new().await;
    let resp = reqwest::get(format!("{}/ready", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ready");
}

#[tokio::test]
async fn not_ready_without_data_dir() {
    let data_dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        data_dir: data_dir.path().join("missing").display().to_string(),
        experiment: fast_config(),
        ..ServerConfig::default()
    };
    let server = TestServer::from_config(config, data_dir).await;
    let resp = reqwest::get(format!("{}/ready", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn unknown_path_falls_back_to_static_files() {
    let server = TestServer::new().await;
    let resp = reqwest::get(format!("{}/no-such-page.html", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
