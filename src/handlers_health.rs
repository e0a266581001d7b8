use serde_json::json;
use std::convert::Infallible;
use warp::{Filter, Reply};

use crate::studio_session::SessionRegistry;
use crate::warp_helpers::with_registry;

pub async fn health_check() -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// Nothing to connect to locally; reports the live session count.
pub async fn ready_check(registry: SessionRegistry) -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&json!({
        "status": "ready",
        "sessions": registry.len(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub fn build_health_routes(
    registry: SessionRegistry,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(health_check);

    let ready = warp::path("ready")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_registry(registry))
        .and_then(ready_check);

    health.or(ready)
}
