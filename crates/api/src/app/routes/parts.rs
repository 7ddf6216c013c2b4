use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Extension, Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;

use shopledger_core::PartId;
use shopledger_infra::MovementLog;
use shopledger_inventory::TimeWindow;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/parts", post(create_part))
        .route("/parts/:id", get(get_part).patch(update_part))
        .route("/parts/:id/deactivate", post(deactivate_part))
        .route("/parts/:id/reactivate", post(reactivate_part))
        .route("/parts/:id/transactions", get(part_transactions))
        .route("/parts/:id/transactions/summary", get(part_summary))
}

fn parse_part_id(raw: &str) -> Result<PartId, Response> {
    raw.parse().map_err(errors::domain_error_to_response)
}

pub async fn create_part(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    body: Result<Json<dto::CreatePartRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let Json(body) = body.map_err(errors::json_rejection)?;
    let cmd = body
        .into_command(actor.actor_id(), Utc::now())
        .map_err(errors::stock_error_to_response)?;

    let outcome = services
        .run(move |s| s.coordinator().create_part(cmd))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "part": dto::part_to_json(&outcome.part),
            "transaction": outcome.movement.as_ref().map(dto::movement_to_json),
            "alert": outcome.alert.as_ref().map(dto::alert_to_json),
        })),
    )
        .into_response())
}

pub async fn get_part(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let part_id = parse_part_id(&id)?;
    let part = services.run(move |s| s.coordinator().part(part_id)).await?;
    Ok((StatusCode::OK, Json(dto::part_to_json(&part))).into_response())
}

pub async fn update_part(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::UpdatePartRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let Json(body) = body.map_err(errors::json_rejection)?;
    let part_id = parse_part_id(&id)?;
    let cmd = body
        .into_command()
        .map_err(errors::stock_error_to_response)?;

    let outcome = services
        .run(move |s| s.coordinator().update_part_details(part_id, cmd, Utc::now()))
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "part": dto::part_to_json(&outcome.part),
            "alert": outcome.alert.as_ref().map(dto::alert_to_json),
        })),
    )
        .into_response())
}

pub async fn deactivate_part(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let part_id = parse_part_id(&id)?;
    let part = services
        .run(move |s| s.coordinator().deactivate_part(part_id, Utc::now()))
        .await?;
    Ok((StatusCode::OK, Json(dto::part_to_json(&part))).into_response())
}

pub async fn reactivate_part(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let part_id = parse_part_id(&id)?;
    let part = services
        .run(move |s| s.coordinator().reactivate_part(part_id, Utc::now()))
        .await?;
    Ok((StatusCode::OK, Json(dto::part_to_json(&part))).into_response())
}

/// Part history in sequence order.
pub async fn part_transactions(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    query: Result<Query<dto::PageQuery>, QueryRejection>,
) -> Result<Response, Response> {
    let Query(query) = query.map_err(errors::query_rejection)?;
    let part_id = parse_part_id(&id)?;
    let pagination = query.pagination();

    let page = services
        .run(move |s| {
            s.coordinator().part(part_id)?;
            Ok(s.store().movements_for_part(part_id, pagination)?)
        })
        .await?;

    Ok((StatusCode::OK, Json(dto::page_to_json(&page))).into_response())
}

pub async fn part_summary(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    query: Result<Query<dto::WindowQuery>, QueryRejection>,
) -> Result<Response, Response> {
    let Query(query) = query.map_err(errors::query_rejection)?;
    let part_id = parse_part_id(&id)?;
    let window =
        TimeWindow::new(query.from, query.to).map_err(errors::stock_error_to_response)?;

    let summary = services
        .run(move |s| {
            s.coordinator().part(part_id)?;
            Ok(s.store().summarize(part_id, window)?)
        })
        .await?;

    Ok((StatusCode::OK, Json(dto::summary_to_json(&summary))).into_response())
}
