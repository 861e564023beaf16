use crate::error::ErrorBody;
use crate::handlers;
use crate::models::{
    CacheStatsResponse, CheckRequestBody, CheckResponseBody, ConsistencyParam, PeerInfo,
    RingOwnerResponse,
};
use crate::server::AppState;
use axum::{
    Router,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::check::check_relation,
        handlers::check::peer_check,
        handlers::cluster::ring_owner,
        handlers::cluster::cache_stats
    ),
    components(schemas(
        CheckRequestBody,
        CheckResponseBody,
        ConsistencyParam,
        RingOwnerResponse,
        PeerInfo,
        CacheStatsResponse,
        ErrorBody
    ))
)]
pub struct ApiDoc;

/// Create the main API router with state
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(health_check))
        .route("/dispatch/v1/check", post(handlers::peer_check))
        .nest("/api/v1", api_v1_router())
}

/// Create the v1 API router with state
fn api_v1_router() -> Router<AppState> {
    Router::new()
        .route("/check", post(handlers::check_relation))
        .route("/ring/owner/{object_id}", get(handlers::ring_owner))
        .route("/cache/stats", get(handlers::cache_stats))
}

/// Health check endpoint for container health monitoring
async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
