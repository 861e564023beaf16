use std::time::Duration;

use axum::{
    extract::State,
    http::HeaderMap,
    response::Json,
};
use relcheck::{CheckRequest, CheckResult, DispatchContext};
use tracing::{debug, warn};

use crate::client::{DEADLINE_HEADER, ROUTING_KEY_HEADER};
use crate::error::AppError;
use crate::models::{CheckRequestBody, CheckResponseBody};
use crate::server::AppState;

/// Check a relation
///
/// Answers whether the subject has the relation on the object. The check is
/// routed to the node that owns the object.
#[utoipa::path(
    post,
    path = "/api/v1/check",
    request_body = CheckRequestBody,
    responses(
        (status = 200, description = "Check answered", body = CheckResponseBody),
        (status = 400, description = "Malformed request", body = crate::error::ErrorBody),
        (status = 408, description = "Deadline exceeded", body = crate::error::ErrorBody),
        (status = 422, description = "No rewrite rule for the relation", body = crate::error::ErrorBody),
        (status = 503, description = "Peer or tuple store unavailable", body = crate::error::ErrorBody),
        (status = 500, description = "Internal server error", body = crate::error::ErrorBody)
    )
)]
#[axum::debug_handler]
pub async fn check_relation(
    State(state): State<AppState>,
    Json(body): Json<CheckRequestBody>,
) -> Result<Json<CheckResponseBody>, AppError> {
    let request = CheckRequest::try_from(body)?;
    // dropped with the connection, which cancels every outstanding sub-check
    let ctx = state.pipeline.context();
    let result = state.pipeline.check(&ctx, &request).await?;
    Ok(Json(result.into()))
}

/// Serve a check forwarded by a peer
///
/// The receiving node owns the object, so the check is evaluated here and
/// never forwarded again.
#[utoipa::path(
    post,
    path = "/dispatch/v1/check",
    params(
        ("x-relcheck-routing-key" = Option<String>, Header, description = "Routing key of the check"),
        ("x-relcheck-deadline-ms" = Option<u64>, Header, description = "Remaining time budget in milliseconds")
    ),
    responses(
        (status = 200, description = "Check answered with dispatch metadata"),
        (status = 400, description = "Malformed request", body = crate::error::ErrorBody),
        (status = 422, description = "No rewrite rule for the relation", body = crate::error::ErrorBody)
    )
)]
#[axum::debug_handler]
pub async fn peer_check(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CheckRequest>,
) -> Result<Json<CheckResult>, AppError> {
    let routing_key = headers
        .get(ROUTING_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    if let Some(key) = routing_key {
        if key != request.object_id {
            warn!(routing_key = key, check = %request, "routing key does not match object");
        }
    }

    let mut ctx = state.pipeline.context();
    if let Some(budget) = deadline_budget(&headers) {
        ctx = ctx.with_deadline(tokio::time::Instant::now() + budget);
    }
    debug!(check = %request, ?routing_key, remaining = ?ctx.remaining(), "serving peer check");

    let result = state.pipeline.check_owned(&ctx, &request).await?;
    Ok(Json(result))
}

fn deadline_budget(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(DEADLINE_HEADER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_budget() {
        let mut headers = HeaderMap::new();
        assert_eq!(deadline_budget(&headers), None);
        headers.insert(DEADLINE_HEADER, "250".parse().unwrap());
        assert_eq!(deadline_budget(&headers), Some(Duration::from_millis(250)));
        headers.insert(DEADLINE_HEADER, "soon".parse().unwrap());
        assert_eq!(deadline_budget(&headers), None);
    }
}
