use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use relcheck::{
    CheckResult, Peer, Pipeline,
    schema::{RelationRule, Schema},
    store::InMemoryTupleStore,
};
use relcheck_http::{
    error::ErrorBody,
    models::{CacheStatsResponse, CheckResponseBody, RingOwnerResponse},
    routes,
    server::AppState,
};
use serde_json::{Value, json};
use tower::ServiceExt;

fn create_test_state() -> AppState {
    let store = InMemoryTupleStore::from_tuples(["document:2#editor@user:alice"]).unwrap();
    let pipeline = Pipeline::builder(Peer::new("node-a", "127.0.0.1:7001"))
        .schema(
            Schema::new()
                .with_rule("document", "editor", RelationRule::Direct)
                .with_rule("document", "viewer", RelationRule::computed("editor")),
        )
        .store(Arc::new(store))
        .seed(vec![(
            "document:1#editor".parse().unwrap(),
            CheckResult::allowed(),
        )])
        .build()
        .unwrap();
    AppState::new(Arc::new(pipeline))
}

fn app() -> Router {
    routes::create_api_router().with_state(create_test_state())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health() {
    let response = app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_check_rewrite_against_seeded_fact() {
    let app = app();

    let request = post_json(
        "/api/v1/check",
        json!({ "object_type": "document", "object_id": "1", "relation": "viewer" }),
    );
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: CheckResponseBody = read_json(response).await;
    assert!(body.allowed);
    assert_eq!(body.dispatch_count, 1);
    assert!(!body.cached);

    // same check again is a cache hit
    let request = post_json(
        "/api/v1/check",
        json!({ "object_type": "document", "object_id": "1", "relation": "viewer" }),
    );
    let body: CheckResponseBody = read_json(app.clone().oneshot(request).await.unwrap()).await;
    assert!(body.allowed);
    assert!(body.cached);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/cache/stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let stats: CacheStatsResponse = read_json(response).await;
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.entries, 2);
}

#[tokio::test]
async fn test_check_with_subject() {
    let app = app();
    for (subject, allowed) in [("user:alice", true), ("user:bob", false)] {
        let request = post_json(
            "/api/v1/check",
            json!({
                "object_type": "document",
                "object_id": "2",
                "relation": "viewer",
                "subject": subject
            }),
        );
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: CheckResponseBody = read_json(response).await;
        assert_eq!(body.allowed, allowed, "{}", subject);
    }
}

#[tokio::test]
async fn test_unknown_relation_is_unprocessable() {
    let request = post_json(
        "/api/v1/check",
        json!({ "object_type": "document", "object_id": "1", "relation": "owner" }),
    );
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: ErrorBody = read_json(response).await;
    assert_eq!(body.kind.to_string(), "unresolved_relation");
    assert_eq!(body.detail, "document#owner");
}

#[tokio::test]
async fn test_malformed_subject_is_bad_request() {
    let request = post_json(
        "/api/v1/check",
        json!({
            "object_type": "document",
            "object_id": "1",
            "relation": "viewer",
            "subject": "alice"
        }),
    );
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_peer_check_honours_headers() {
    let request = Request::builder()
        .uri("/dispatch/v1/check")
        .method("POST")
        .header("Content-Type", "application/json")
        .header("x-relcheck-routing-key", "2")
        .header("x-relcheck-deadline-ms", "1000")
        .body(Body::from(
            json!({
                "object_type": "document",
                "object_id": "2",
                "relation": "editor",
                "subject": { "object_type": "user", "object_id": "alice" }
            })
            .to_string(),
        ))
        .unwrap();
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let result: CheckResult = read_json(response).await;
    assert!(result.allowed);
}

#[tokio::test]
async fn test_ring_owner() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/api/v1/ring/owner/report-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: RingOwnerResponse = read_json(response).await;
    assert_eq!(body.object_id, "report-42");
    assert_eq!(body.owner.id, "node-a");
    assert!(body.is_local);
    assert_eq!(body.ring_size, 1);
}

#[tokio::test]
async fn test_openapi_document() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let doc: Value = read_json(response).await;
    assert!(doc["paths"]["/api/v1/check"].is_object());
}

#[tokio::test]
async fn test_state_from_config_file() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "node_id": "node-file",
            "advertise_addr": "127.0.0.1:7009",
            "schema": {{ "document": {{ "owner": "direct" }} }},
            "tuples": ["document:7#owner@user:carol"]
        }}"#
    )
    .unwrap();
    let config = relcheck::NodeConfig::from_file(file.path()).unwrap();
    let state = AppState::from_config(&config).unwrap();
    assert_eq!(state.pipeline.local_peer().id, "node-file");

    let request = post_json(
        "/api/v1/check",
        json!({
            "object_type": "document",
            "object_id": "7",
            "relation": "owner",
            "subject": "user:carol"
        }),
    );
    let response = routes::create_api_router()
        .with_state(state)
        .oneshot(request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: CheckResponseBody = read_json(response).await;
    assert!(body.allowed);
}
