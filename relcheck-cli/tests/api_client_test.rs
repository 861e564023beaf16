use std::sync::Arc;

use relcheck::{
    Peer, Pipeline,
    schema::{RelationRule, Schema},
    store::InMemoryTupleStore,
};
use relcheck_cli::api_client::{ApiClient, ClientError};
use relcheck_http::{
    models::{CheckRequestBody, ConsistencyParam},
    server::{AppState, serve},
};
use tokio::net::TcpListener;

async fn start_node() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let store = InMemoryTupleStore::from_tuples(["document:1#editor@user:alice"]).unwrap();
    let pipeline = Pipeline::builder(Peer::new("node-a", addr.clone()))
        .schema(
            Schema::new()
                .with_rule("document", "editor", RelationRule::Direct)
                .with_rule("document", "viewer", RelationRule::computed("editor")),
        )
        .store(Arc::new(store))
        .build()
        .unwrap();
    tokio::spawn(serve(listener, AppState::new(Arc::new(pipeline))));
    format!("http://{}", addr)
}

fn viewer_check(subject: &str) -> CheckRequestBody {
    CheckRequestBody {
        object_type: "document".into(),
        object_id: "1".into(),
        relation: "viewer".into(),
        subject: Some(subject.into()),
        consistency: ConsistencyParam::MinimizeLatency,
    }
}

#[tokio::test]
async fn test_check_and_stats() {
    let client = ApiClient::new(&start_node().await);

    let allowed = client.check(&viewer_check("user:alice")).await.unwrap();
    assert!(allowed.allowed);
    assert!(!allowed.cached);

    let denied = client.check(&viewer_check("user:bob")).await.unwrap();
    assert!(!denied.allowed);

    let again = client.check(&viewer_check("user:alice")).await.unwrap();
    assert!(again.cached);

    let stats = client.cache_stats().await.unwrap();
    assert!(stats.hits >= 1);
    assert!(stats.entries >= 2);
}

#[tokio::test]
async fn test_ring_owner() {
    let client = ApiClient::new(&start_node().await);
    let owner = client.ring_owner("report-42").await.unwrap();
    assert_eq!(owner.owner.id, "node-a");
    assert!(owner.is_local);
}

#[tokio::test]
async fn test_api_error_carries_kind() {
    let client = ApiClient::new(&start_node().await);
    let mut body = viewer_check("user:alice");
    body.relation = "owner".into();

    match client.check(&body).await.unwrap_err() {
        ClientError::Api { status, kind, .. } => {
            assert_eq!(status, 422);
            assert_eq!(kind, "unresolved_relation");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}
