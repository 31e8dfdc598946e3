use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Named tier within a project (e.g. `Production`, `Development`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Environment {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub order: i32,
}
