//! HTTP API: routing, actor context, and request/response mapping over the
//! stock adjustment coordinator and the alert desk.

pub mod app;
pub mod context;
pub mod middleware;
