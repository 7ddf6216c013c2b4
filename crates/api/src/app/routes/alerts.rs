use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Extension, Path, Query,
        rejection::QueryRejection,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;

use shopledger_core::AlertId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/alerts", get(list_alerts))
        .route("/alerts/:id", get(get_alert))
        .route("/alerts/:id/acknowledge", post(acknowledge_alert))
        .route("/alerts/:id/dismiss", post(dismiss_alert))
}

fn parse_alert_id(raw: &str) -> Result<AlertId, Response> {
    raw.parse().map_err(errors::domain_error_to_response)
}

pub async fn list_alerts(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<dto::AlertQuery>, QueryRejection>,
) -> Result<Response, Response> {
    let Query(query) = query.map_err(errors::query_rejection)?;
    let filter = query
        .into_filter()
        .map_err(errors::stock_error_to_response)?;

    let alerts = services.run(move |s| s.alerts().list(&filter)).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "alerts": alerts.iter().map(dto::alert_to_json).collect::<Vec<_>>(),
            "count": alerts.len(),
        })),
    )
        .into_response())
}

pub async fn get_alert(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let alert_id = parse_alert_id(&id)?;
    let alert = services.run(move |s| s.alerts().get(alert_id)).await?;
    Ok((StatusCode::OK, Json(dto::alert_to_json(&alert))).into_response())
}

pub async fn acknowledge_alert(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let alert_id = parse_alert_id(&id)?;
    let alert = services
        .run(move |s| s.alerts().acknowledge(alert_id, actor.actor_id(), Utc::now()))
        .await?;
    Ok((StatusCode::OK, Json(dto::alert_to_json(&alert))).into_response())
}

pub async fn dismiss_alert(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let alert_id = parse_alert_id(&id)?;
    let alert = services
        .run(move |s| s.alerts().dismiss(alert_id, actor.actor_id(), Utc::now()))
        .await?;
    Ok((StatusCode::OK, Json(dto::alert_to_json(&alert))).into_response())
}
