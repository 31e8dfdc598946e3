//! `GET /configs/{name}` and `GET /configs/{name}/value` (spec.md §4.7, §6).

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use confplane_core::error::ConfigError;
use confplane_core::model::{Context, RenderedOverride};
use confplane_eval::{evaluate, render_overrides};

use crate::error::ApiError;
use crate::project_resolver::AuthenticatedProject;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EnvironmentQuery {
    pub environment: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ConfigValueQuery {
    pub environment: Uuid,
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub name: String,
    pub value: serde_json::Value,
    pub rendered_overrides: Vec<RenderedOverride>,
    pub version: i64,
}

#[derive(Debug, Serialize)]
pub struct ConfigValueResponse {
    pub name: String,
    pub value: serde_json::Value,
}

/// `GetConfig(projectId, configName, environmentId)` — the client-side-eval
/// shape: raw value plus rendered overrides, no context applied.
pub async fn get_config(
    State(state): State<AppState>,
    AuthenticatedProject(project_id): AuthenticatedProject,
    Path(name): Path<String>,
    Query(query): Query<EnvironmentQuery>,
) -> Result<Json<ConfigResponse>, ApiError> {
    let env_config = state
        .replica
        .get_environmental_config(project_id, &name, query.environment)
        .ok_or_else(|| ConfigError::NotFound(format!("config '{name}' not found")))?;

    let rendered_overrides =
        render_overrides(&env_config.overrides, query.environment, state.replica.as_ref());

    Ok(Json(ConfigResponse {
        name: env_config.name,
        value: env_config.value,
        rendered_overrides,
        version: env_config.version,
    }))
}

/// `GetConfigValue(projectId, configName, environmentId, context)` —
/// server-side evaluation: render then evaluate.
pub async fn get_config_value(
    State(state): State<AppState>,
    AuthenticatedProject(project_id): AuthenticatedProject,
    Path(name): Path<String>,
    Query(query): Query<ConfigValueQuery>,
) -> Result<Json<ConfigValueResponse>, ApiError> {
    let env_config = state
        .replica
        .get_environmental_config(project_id, &name, query.environment)
        .ok_or_else(|| ConfigError::NotFound(format!("config '{name}' not found")))?;

    let context = parse_context(query.context.as_deref())?;
    let rendered_overrides =
        render_overrides(&env_config.overrides, query.environment, state.replica.as_ref());
    let result = evaluate(&env_config.value, &rendered_overrides, &context);

    Ok(Json(ConfigValueResponse {
        name: env_config.name,
        value: result.final_value,
    }))
}

fn parse_context(raw: Option<&str>) -> Result<Context, ApiError> {
    let Some(raw) = raw else {
        return Ok(Context::new());
    };
    if raw.is_empty() {
        return Ok(Context::new());
    }
    let decoded = urlencoding::decode(raw)
        .map_err(|e| ApiError(ConfigError::BadRequest(format!("malformed context: {e}"))))?;
    serde_json::from_str(&decoded)
        .map_err(|e| ApiError(ConfigError::BadRequest(format!("malformed context: {e}"))))
}
