//! Process default instance and fallback handler.

use std::sync::OnceLock;

use axum::{http::StatusCode, response::IntoResponse, Json, Router};
use serde_json::json;

use super::Microauth;
use crate::error::GenerationError;

/// Host identity of the default instance's generated certificate.
pub const DEFAULT_HOST: &str = "microbox.cloud";

static DEFAULT_INSTANCE: OnceLock<Microauth> = OnceLock::new();

/// The shared default [`Microauth`], built on first use.
///
/// It serves a freshly generated certificate for [`DEFAULT_HOST`] and reads the
/// token from [`crate::gate::DEFAULT_HEADER`]. The instance is immutable once
/// built; callers needing isolation construct their own [`Microauth`].
///
/// # Errors
///
/// Returns a [`GenerationError`] if the certificate cannot be generated. A later
/// call retries generation.
pub fn default_instance() -> Result<&'static Microauth, GenerationError> {
    if let Some(instance) = DEFAULT_INSTANCE.get() {
        return Ok(instance);
    }

    // Concurrent first calls may each generate; only one result is kept.
    let instance = Microauth::generated(DEFAULT_HOST)?;
    Ok(DEFAULT_INSTANCE.get_or_init(|| instance))
}

/// Handler used when the caller supplies none: `404` with a JSON body for every path.
pub fn default_handler() -> Router {
    Router::new().fallback(not_found)
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "code": "not_found",
            "message": "the requested resource does not exist",
        })),
    )
}
