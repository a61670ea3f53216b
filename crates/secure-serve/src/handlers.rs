//! Request handlers for the hosted router.

use axum::{body::Bytes, response::IntoResponse, Json};
use serde::Serialize;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub authenticated: bool,
}

/// `GET /health`: liveness probe. Excluded from the token gate by default.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /status`: only reachable once the gate has admitted the request.
pub async fn status() -> impl IntoResponse {
    Json(StatusResponse {
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        authenticated: true,
    })
}

/// `POST /echo`: returns the request body unchanged.
pub async fn echo(body: Bytes) -> Bytes {
    body
}
