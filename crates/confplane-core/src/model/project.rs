use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Container of configs and environments. Relevant to the replication core
/// only as a scoping key; CRUD lives in the out-of-scope admin surface.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
}
