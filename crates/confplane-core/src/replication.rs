//! Collaborator traits the replicator is generic over (spec.md §4.3).
//!
//! Living here (rather than in `confplane-replica` or `confplane-db`) keeps
//! both the durable-store adapter and the in-memory replica store free to
//! depend only on `confplane-core`, with no crate needing to depend on the
//! other just to implement an interface.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::model::ConfigReplica;

/// The durable store's half of the replicator (`source` in spec.md §4.3).
#[async_trait]
pub trait ReplicationSource: Send + Sync {
    async fn get_ids(&self) -> Result<Vec<Uuid>, ConfigError>;
    async fn get_by_ids(&self, ids: &[Uuid]) -> Result<Vec<ConfigReplica>, ConfigError>;
}

/// Outcome of one entity's upsert against the replica (spec.md §4.3
/// "Version rule").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Ignored,
}

/// The in-memory replica's half of the replicator (`target` in spec.md
/// §4.3). Pure, non-suspending — the replica store performs no I/O.
pub trait ReplicationTarget: Send + Sync {
    fn upsert(&self, entities: Vec<ConfigReplica>) -> Vec<UpsertOutcome>;
    fn delete(&self, id: Uuid) -> bool;
    /// Looks up an entity without mutating anything. Used by the replicator
    /// to capture `project_id`/`name`/`version` for a deletion's change
    /// event before the row is gone.
    fn get(&self, id: Uuid) -> Option<ConfigReplica>;
    fn clear(&self);
    fn get_consumer_id(&self) -> Option<Uuid>;
    fn set_consumer_id(&self, id: Uuid);
}

/// One row pulled from a consumer's event queue (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub id: Uuid,
    pub entity_id: Uuid,
}

/// The durable, per-consumer fan-out queue the replicator pulls from
/// (spec.md §4.2).
#[async_trait]
pub trait EventHub: Send + Sync {
    async fn create_consumer(&self, topic: &str) -> Result<Uuid, ConfigError>;
    /// `Ok(true)` if the consumer still exists (and its `lastUsedAt` was
    /// refreshed); `Ok(false)` if it was garbage-collected.
    async fn try_restore_consumer(&self, topic: &str, consumer_id: Uuid) -> Result<bool, ConfigError>;
    async fn pull(&self, consumer_id: Uuid, n: u32) -> Result<Vec<StoredEvent>, ConfigError>;
    async fn ack(&self, consumer_id: Uuid, ids: &[Uuid]) -> Result<(), ConfigError>;
    async fn destroy(&self, consumer_id: Uuid) -> Result<(), ConfigError>;
}
