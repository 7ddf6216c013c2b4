use std::time::Instant;

use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::info;

use shopledger_core::UserId;

use crate::app::errors;
use crate::context::ActorContext;

pub const ACTOR_HEADER: &str = "x-actor-id";

pub async fn actor_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let actor_id = extract_actor(req.headers())?;
    req.extensions_mut().insert(ActorContext::new(actor_id));
    Ok(next.run(req).await)
}

/// One log line per request with status and latency.
pub async fn trace_requests(req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let started = Instant::now();

    let response = next.run(req).await;

    info!(
        %method,
        path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request completed"
    );
    response
}

fn extract_actor(headers: &HeaderMap) -> Result<UserId, Response> {
    let unauthorized = |message: &str| {
        errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", message)
    };

    let header = headers
        .get(ACTOR_HEADER)
        .ok_or_else(|| unauthorized("missing x-actor-id header"))?;
    let raw = header
        .to_str()
        .map_err(|_| unauthorized("x-actor-id is not valid ASCII"))?;

    raw.trim()
        .parse::<UserId>()
        .map_err(|_| unauthorized("x-actor-id must be a UUID"))
}
