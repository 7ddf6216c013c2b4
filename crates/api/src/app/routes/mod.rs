use axum::Router;

pub mod alerts;
pub mod inventory;
pub mod parts;
pub mod system;

/// Router for all actor-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .merge(parts::router())
        .merge(inventory::router())
        .merge(alerts::router())
}
