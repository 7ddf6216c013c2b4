use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Extension, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::Utc;
use serde_json::json;

use shopledger_infra::MovementLog;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new().route(
        "/inventory/transactions",
        post(record_transaction).get(query_transactions),
    )
}

/// Apply one stock movement through the coordinator.
pub async fn record_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    body: Result<Json<dto::StockTransactionRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let Json(body) = body.map_err(errors::json_rejection)?;
    let cmd = body
        .into_command(actor.actor_id(), Utc::now())
        .map_err(errors::stock_error_to_response)?;

    let outcome = services
        .run(move |s| s.coordinator().adjust_stock(cmd))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "part": dto::part_to_json(&outcome.part),
            "transaction": dto::movement_to_json(&outcome.movement),
            "alert": outcome.alert.as_ref().map(dto::alert_to_json),
        })),
    )
        .into_response())
}

/// Ledger-wide query in time order.
pub async fn query_transactions(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<dto::TransactionQuery>, QueryRejection>,
) -> Result<Response, Response> {
    let Query(query) = query.map_err(errors::query_rejection)?;
    let (filter, pagination) = query
        .into_filter()
        .map_err(errors::stock_error_to_response)?;

    let page = services
        .run(move |s| Ok(s.store().query_movements(&filter, pagination)?))
        .await?;

    Ok((StatusCode::OK, Json(dto::page_to_json(&page))).into_response())
}
