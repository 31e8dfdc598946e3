//! Bearer-token authentication (spec.md §6 "Authentication (collaborator
//! contract)"). This is the one deliberately-external interface: the read
//! API depends on a `ProjectResolver` to turn a bearer token into a
//! `projectId` and never consults it again afterward.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use confplane_core::error::ConfigError;

use crate::error::config_error_response;
use crate::state::AppState;

#[async_trait]
pub trait ProjectResolver: Send + Sync {
    async fn resolve(&self, bearer_token: &str) -> Result<Uuid, ConfigError>;
}

/// Extracted `projectId` for the current request, already resolved from the
/// `Authorization: Bearer <token>` header.
pub struct AuthenticatedProject(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedProject {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized("missing authorization header"))?;

        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or_else(|| unauthorized("expected a bearer token"))?;

        let project_id = state
            .project_resolver
            .resolve(token)
            .await
            .map_err(|e| config_error_response(&e).into_response())?;

        Ok(AuthenticatedProject(project_id))
    }
}

fn unauthorized(msg: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": msg }))).into_response()
}
