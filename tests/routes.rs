use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use serde_json::Value;
use xinghuo_gateway::config::AppConfig;
use xinghuo_gateway::routing::dispatch::{dispatch_request, normalize_base_path};
use xinghuo_gateway::state::AppState;

fn state(master_key: Option<&str>) -> Arc<AppState> {
    let mut config = AppConfig::default();
    config.client_authentication.master_key = master_key.map(str::to_string);
    config.app.name = "Local Spark".to_string();
    config.app.version = "2.1.0".to_string();
    Arc::new(AppState::new(config).expect("state"))
}

async fn send(state: Arc<AppState>, base_path: &str, method: &str, uri: &str) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", "Bearer sk-routes")
        .body(Body::empty())
        .expect("build request");
    dispatch_request(state, Arc::<str>::from(base_path), request)
        .await
        .expect("dispatch")
}

async fn json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json body")
}

#[tokio::test]
async fn test_root_banner_skips_auth() {
    let response = send(state(Some("other-key")), "", "GET", "/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Welcome to Local Spark");
    assert_eq!(body["version"], "2.1.0");
    assert!(body["description"].is_string());
}

#[tokio::test]
async fn test_models_list_defaults() {
    let response = send(state(Some("sk-routes")), "", "GET", "/v1/models").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["object"], "list");
    let ids: Vec<&str> = body["data"]
        .as_array()
        .expect("data array")
        .iter()
        .map(|model| model["id"].as_str().expect("id"))
        .collect();
    assert_eq!(ids, ["spark-3.5-max", "spark-pro", "spark-v2.0", "spark-lite"]);
    assert_eq!(body["data"][0]["object"], "model");
}

#[tokio::test]
async fn test_models_requires_key_when_configured() {
    let response = send(state(Some("different")), "", "GET", "/v1/models").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_path_and_wrong_method() {
    let response = send(state(None), "", "GET", "/v1/embeddings").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(state(None), "", "GET", "/v1/chat/completions").await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let response = send(state(None), "", "POST", "/v1/models").await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_base_path_prefix() {
    let base = normalize_base_path("spark/");
    assert_eq!(base, "/spark");

    let response = send(state(None), &base, "GET", "/spark/v1/models").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(state(None), &base, "GET", "/spark").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(state(None), &base, "GET", "/v1/models").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(state(None), &base, "GET", "/sparkle/v1/models").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_oversized_chat_body_rejected() {
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .body(Body::from(vec![b' '; 3 * 1024 * 1024]))
        .expect("build request");
    let response = dispatch_request(state(None), Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
