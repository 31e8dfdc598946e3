//! Per-project fan-out bus for the `/events` stream (spec.md §4.7).
//!
//! The bus itself only carries the replicator's lightweight `ChangeEvent`
//! notices; each subscriber re-reads the current state from the replica at
//! delivery time (direct + referential union, per-environment rendering),
//! so a slow subscriber that misses notices via `broadcast`'s drop-oldest
//! behavior still converges to the latest state on its next delivered
//! notice rather than replaying a stale one.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use confplane_core::model::RenderedOverride;
use confplane_eval::render_overrides;
use confplane_replica::{ChangeEvent, ChangeKind, ReplicaStore};

/// Bounded per-project channel capacity; a subscriber that falls this far
/// behind the newest notice drops the oldest ones (spec.md §5 "bounded
/// channel per subscriber with drop-oldest on overflow, logged").
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfigEvent {
    ConfigCreated {
        #[serde(rename = "configName")]
        config_name: String,
        version: i64,
        value: serde_json::Value,
        overrides: Vec<RenderedOverride>,
    },
    ConfigUpdated {
        #[serde(rename = "configName")]
        config_name: String,
        version: i64,
        value: serde_json::Value,
        overrides: Vec<RenderedOverride>,
    },
    ConfigDeleted {
        #[serde(rename = "configName")]
        config_name: String,
        version: i64,
        value: serde_json::Value,
        overrides: Vec<RenderedOverride>,
    },
}

pub struct EventBus {
    buses: Mutex<HashMap<Uuid, broadcast::Sender<ChangeEvent>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            buses: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, project_id: Uuid) -> broadcast::Receiver<ChangeEvent> {
        let mut buses = self.buses.lock();
        buses
            .entry(project_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Wired as the replicator's `on_change` callback.
    pub fn publish(&self, change: ChangeEvent) {
        if change.project_id.is_nil() {
            return;
        }
        let buses = self.buses.lock();
        if let Some(tx) = buses.get(&change.project_id) {
            // Err(SendError) just means there are no live subscribers right now.
            let _ = tx.send(change);
        }
    }
}

/// Builds the set of wire events a subscriber on `(subscriber_project_id,
/// environment_id)` should see for one `change` (spec.md §4.7 "union direct
/// + referential, deduplicate, and emit").
pub fn events_for_change(
    replica: &ReplicaStore,
    change: &ChangeEvent,
    subscriber_project_id: Uuid,
    environment_id: Uuid,
) -> Vec<ConfigEvent> {
    let mut names: Vec<String> = Vec::new();
    let mut direct = false;

    if change.project_id == subscriber_project_id {
        names.push(change.name.clone());
        direct = true;
    }

    for referencing in replica.referencing_configs(subscriber_project_id, change.project_id, &change.name)
    {
        if !names.contains(&referencing) {
            names.push(referencing);
        }
    }

    let mut events = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let is_direct_target = direct && i == 0;

        if is_direct_target && change.kind == ChangeKind::Deleted {
            events.push(ConfigEvent::ConfigDeleted {
                config_name: name.clone(),
                version: change.version,
                value: serde_json::Value::Null,
                overrides: Vec::new(),
            });
            continue;
        }

        let Some(env_config) = replica.get_environmental_config(subscriber_project_id, name, environment_id)
        else {
            // Deleted, or not visible in this environment: nothing to emit.
            continue;
        };
        let rendered = render_overrides(&env_config.overrides, environment_id, replica);

        let event = if is_direct_target && change.kind == ChangeKind::Created {
            ConfigEvent::ConfigCreated {
                config_name: name.clone(),
                version: env_config.version,
                value: env_config.value,
                overrides: rendered,
            }
        } else {
            // Direct updates and every referential notification surface as
            // `updated` (spec.md §4.7 point 2: "the subscriber must receive
            // an updated event for each such referencing config").
            ConfigEvent::ConfigUpdated {
                config_name: name.clone(),
                version: env_config.version,
                value: env_config.value,
                overrides: rendered,
            }
        };
        events.push(event);
    }

    events
}

pub fn log_lagged(skipped: u64) {
    warn!(skipped, "subscriber lagged behind the project event bus, dropped oldest notices");
}

pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use confplane_core::model::ConfigReplica;
    use serde_json::json;
    use std::collections::HashMap;

    fn base_config(id: Uuid, project_id: Uuid, name: &str, version: i64, value: serde_json::Value) -> ConfigReplica {
        ConfigReplica {
            id,
            project_id,
            name: name.to_string(),
            version,
            base_value: value,
            base_schema: None,
            base_overrides: vec![],
            variants: HashMap::new(),
        }
    }

    #[test]
    fn direct_created_event_carries_current_value() {
        let replica = ReplicaStore::new();
        let project_id = Uuid::new_v4();
        let config_id = Uuid::new_v4();
        let env = Uuid::new_v4();
        replica.upsert_configs(vec![base_config(config_id, project_id, "A", 1, json!({"x": 1}))]);

        let change = ChangeEvent {
            kind: ChangeKind::Created,
            project_id,
            config_id,
            name: "A".to_string(),
            version: 1,
        };

        let events = events_for_change(&replica, &change, project_id, env);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ConfigEvent::ConfigCreated { config_name, value, .. } => {
                assert_eq!(config_name, "A");
                assert_eq!(*value, json!({"x": 1}));
            }
            other => panic!("expected ConfigCreated, got {other:?}"),
        }
    }

    #[test]
    fn deleted_event_has_no_replica_lookup() {
        let replica = ReplicaStore::new();
        let project_id = Uuid::new_v4();
        let config_id = Uuid::new_v4();
        let env = Uuid::new_v4();

        let change = ChangeEvent {
            kind: ChangeKind::Deleted,
            project_id,
            config_id,
            name: "A".to_string(),
            version: 3,
        };

        let events = events_for_change(&replica, &change, project_id, env);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ConfigEvent::ConfigDeleted { config_name, .. } if config_name == "A"));
    }

    #[test]
    fn referential_change_emits_updated_event_for_referencer_in_same_project() {
        let replica = ReplicaStore::new();
        let project_id = Uuid::new_v4();
        let env = Uuid::new_v4();
        let a_id = Uuid::new_v4();
        let b_id = Uuid::new_v4();

        replica.upsert_configs(vec![base_config(a_id, project_id, "A", 1, json!({"threshold": 100}))]);

        let b = ConfigReplica {
            id: b_id,
            project_id,
            name: "B".to_string(),
            version: 1,
            base_value: json!({"tier": "default"}),
            base_schema: None,
            base_overrides: vec![confplane_core::model::Override {
                name: "premium".into(),
                conditions: vec![confplane_core::model::Condition::GreaterThan {
                    property: "score".into(),
                    value: confplane_core::model::Value::Reference {
                        project_id,
                        config_name: "A".into(),
                        path: vec![confplane_core::model::PathSegment::Key("threshold".into())],
                    },
                }],
                value: confplane_core::model::Value::Literal {
                    value: json!({"tier": "premium"}),
                },
            }],
            variants: HashMap::new(),
        };
        replica.upsert_configs(vec![b]);

        let change = ChangeEvent {
            kind: ChangeKind::Updated,
            project_id,
            config_id: a_id,
            name: "A".to_string(),
            version: 2,
        };

        let events = events_for_change(&replica, &change, project_id, env);
        let names: Vec<&str> = events
            .iter()
            .map(|e| match e {
                ConfigEvent::ConfigCreated { config_name, .. }
                | ConfigEvent::ConfigUpdated { config_name, .. }
                | ConfigEvent::ConfigDeleted { config_name, .. } => config_name.as_str(),
            })
            .collect();

        assert!(names.contains(&"A"));
        assert!(names.contains(&"B"));
    }

    #[test]
    fn cross_project_reference_does_not_leak_into_unrelated_subscriber() {
        let replica = ReplicaStore::new();
        let target_project = Uuid::new_v4();
        let other_project = Uuid::new_v4();
        let env = Uuid::new_v4();
        let a_id = Uuid::new_v4();

        replica.upsert_configs(vec![base_config(a_id, target_project, "A", 1, json!({"x": 1}))]);

        let change = ChangeEvent {
            kind: ChangeKind::Updated,
            project_id: target_project,
            config_id: a_id,
            name: "A".to_string(),
            version: 2,
        };

        // A subscriber on an unrelated project with no referencing configs
        // sees nothing.
        let events = events_for_change(&replica, &change, other_project, env);
        assert!(events.is_empty());
    }
}

