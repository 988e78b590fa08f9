//! Exercises the axum router wiring (Component H's transport binding)
//! without a full websocket round trip, following the teacher's
//! `route_api.rs` pattern of driving the router with `tower::oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use backend::elevation::ConstantElevationOracle;
use backend::ws::{create_router, AppState};
use hyper::StatusCode;
use tower::ServiceExt;

fn test_state(dir: &std::path::Path) -> AppState {
    AppState {
        graphs_dir: dir.to_path_buf(),
        oracle: Arc::new(ConstantElevationOracle(0.0)),
        pbf_path: None,
        min_component_length_m: 3000.0,
    }
}

#[tokio::test]
async fn ws_route_rejects_plain_get() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_router(test_state(dir.path()));
    let request = Request::builder().uri("/ws").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ws_route_accepts_upgrade_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_router(test_state(dir.path()));
    let request = Request::builder()
        .uri("/ws")
        .header("connection", "upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
}

#[tokio::test]
async fn unknown_route_returns_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_router(test_state(dir.path()));
    let request = Request::builder().uri("/nope").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
