use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use shopledger_core::{DomainError, ErrorCategory};
use shopledger_infra::AdjustError;
use shopledger_inventory::StockError;

pub fn status_for(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::Validation => StatusCode::BAD_REQUEST,
        ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::BusinessRule => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCategory::Concurrency => StatusCode::CONFLICT,
        ErrorCategory::Storage => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub fn adjust_error_to_response(err: AdjustError) -> axum::response::Response {
    let category = err.category();
    if category == ErrorCategory::Storage {
        error!(error = %err, "storage failure");
    }
    json_error(status_for(category), err.kind(), err.to_string())
}

pub fn stock_error_to_response(err: StockError) -> axum::response::Response {
    json_error(status_for(err.category()), err.kind(), err.to_string())
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    json_error(status_for(err.category()), err.kind(), err.to_string())
}

/// Body extraction failures keep the `{ kind, message }` shape.
pub fn json_rejection(rejection: JsonRejection) -> axum::response::Response {
    let (status, kind) = match &rejection {
        JsonRejection::MissingJsonContentType(_) => (rejection.status(), "unsupported_media_type"),
        JsonRejection::JsonSyntaxError(_) => (StatusCode::BAD_REQUEST, "malformed_json"),
        _ => (StatusCode::BAD_REQUEST, "invalid_body"),
    };
    json_error(status, kind, rejection.body_text())
}

pub fn query_rejection(rejection: QueryRejection) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_query", rejection.body_text())
}

pub fn json_error(
    status: StatusCode,
    kind: &str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "kind": kind,
            "message": message.into(),
        })),
    )
        .into_response()
}
