//! Translates `confplane_core::ConfigError` into HTTP status/JSON bodies at
//! the read-API edge (spec.md §7 "transformed to wire status codes at the
//! read-API edge").

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use confplane_core::error::ConfigError;

pub struct ApiError(pub ConfigError);

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        config_error_response(&self.0).into_response()
    }
}

pub fn config_error_response(err: &ConfigError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match err {
        ConfigError::NotFound(_) => StatusCode::NOT_FOUND,
        ConfigError::BadRequest(_) => StatusCode::BAD_REQUEST,
        ConfigError::Forbidden(_) => StatusCode::FORBIDDEN,
        ConfigError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        ConfigError::ConsumerDestroyed(_) | ConfigError::FatalInternal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "error": err.to_string() })))
}
