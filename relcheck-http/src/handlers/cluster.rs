use axum::{
    extract::{Path, State},
    response::Json,
};
use relcheck::DispatchError;

use crate::error::AppError;
use crate::models::{CacheStatsResponse, RingOwnerResponse};
use crate::server::AppState;

/// Get the owner of an object
///
/// Returns the peer that owns `object_id` on this node's current ring.
#[utoipa::path(
    get,
    path = "/api/v1/ring/owner/{object_id}",
    responses(
        (status = 200, description = "Owner found", body = RingOwnerResponse),
        (status = 500, description = "Ring is empty", body = crate::error::ErrorBody)
    ),
    params(
        ("object_id" = String, Path, description = "Object identifier")
    )
)]
#[axum::debug_handler]
pub async fn ring_owner(
    State(state): State<AppState>,
    Path(object_id): Path<String>,
) -> Result<Json<RingOwnerResponse>, AppError> {
    let membership = state.pipeline.membership();
    let ring = membership.snapshot();
    let owner = ring
        .owner_of(object_id.as_bytes())
        .map_err(DispatchError::from)?
        .clone();

    Ok(Json(RingOwnerResponse {
        is_local: membership.is_local(&owner),
        ring_size: ring.len(),
        owner: owner.into(),
        object_id,
    }))
}

/// Get result cache statistics
#[utoipa::path(
    get,
    path = "/api/v1/cache/stats",
    responses(
        (status = 200, description = "Cache statistics", body = CacheStatsResponse)
    )
)]
#[axum::debug_handler]
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatsResponse> {
    Json(state.pipeline.cache().stats().into())
}
