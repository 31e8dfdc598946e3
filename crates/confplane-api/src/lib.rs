//! Read API and event stream (spec.md §4.7): `GET /configs/{name}`, `GET
//! /configs/{name}/value`, `GET /events`. This is the only HTTP surface this
//! workspace exposes — the authoring/admin surface is out of scope
//! (spec.md §1 Non-goals).

pub mod error;
pub mod events;
pub mod handlers;
pub mod middleware;
pub mod project_resolver;
pub mod router;
pub mod state;

pub use error::ApiError;
pub use events::EventBus;
pub use project_resolver::{AuthenticatedProject, ProjectResolver};
pub use router::api_router;
pub use state::AppState;

use axum::Router;

/// Builds the full router bound to `state`, ready to be served.
pub fn app(state: AppState) -> Router {
    router::api_router().with_state(state)
}
