//! In-memory replica of the durable config store (spec.md §4.4) plus the
//! replicator that keeps it in sync via the event hub (spec.md §4.3).

pub mod replicator;
pub mod store;

pub use replicator::{ChangeEvent, ChangeKind, Replicator, ReplicatorSettings};
pub use store::{base_only_replica, ReplicaStore};
