//! In-memory replica store (spec.md §4.4).
//!
//! One `parking_lot::RwLock<ReplicaInner>` guards the primary map and its
//! secondary indices together, so a reader never observes a partial upsert
//! across them (spec.md §5 "Reads never observe a partial upsert"). This
//! generalizes the teacher lineage's `ConfigManager`'s single
//! `RwLock<AppConfig>` rather than the per-key `DashMap` sharding its
//! multi-level cache used, because an upsert here must update three indices
//! atomically with respect to readers — see DESIGN.md.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use uuid::Uuid;

use confplane_core::model::{Config, ConfigReplica, EnvironmentalConfig};
use confplane_core::{ReplicationTarget, UpsertOutcome};
use confplane_eval::ConfigValueResolver;

#[derive(Default)]
struct ReplicaInner {
    configs: HashMap<Uuid, ConfigReplica>,
    by_project_and_name: HashMap<(Uuid, String), Uuid>,
    by_project: HashMap<Uuid, HashSet<Uuid>>,
    /// `(projectId, configName) -> set<configId>` of configs whose overrides
    /// reference that `(projectId, configName)` (spec.md §4.7 point 2).
    referenced_by: HashMap<(Uuid, String), HashSet<Uuid>>,
    consumer_id: Option<Uuid>,
}

pub struct ReplicaStore {
    inner: RwLock<ReplicaInner>,
}

impl Default for ReplicaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicaStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ReplicaInner::default()),
        }
    }

    /// One exclusive critical section for the whole batch (spec.md §5
    /// "Writes MUST be batched: one upsert([E]) call = one exclusive
    /// critical section"). Returns one outcome per input config, in order.
    pub fn upsert_configs(&self, configs: Vec<ConfigReplica>) -> Vec<UpsertOutcome> {
        let mut inner = self.inner.write();
        let mut outcomes = Vec::with_capacity(configs.len());
        for config in configs {
            outcomes.push(upsert_one(&mut inner, config));
        }
        outcomes
    }

    pub fn get(&self, id: Uuid) -> Option<ConfigReplica> {
        self.inner.read().configs.get(&id).cloned()
    }

    /// `true` if a config with `id` was present and removed.
    pub fn delete_config(&self, id: Uuid) -> bool {
        let mut inner = self.inner.write();
        let Some(removed) = inner.configs.remove(&id) else {
            return false;
        };
        inner
            .by_project_and_name
            .remove(&(removed.project_id, removed.name.clone()));
        if let Some(set) = inner.by_project.get_mut(&removed.project_id) {
            set.remove(&id);
        }
        for (target, name) in removed.referenced_configs() {
            if let Some(set) = inner.referenced_by.get_mut(&(target, name)) {
                set.remove(&id);
            }
        }
        true
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        *inner = ReplicaInner::default();
    }

    pub fn get_consumer_id(&self) -> Option<Uuid> {
        self.inner.read().consumer_id
    }

    pub fn set_consumer_id(&self, id: Uuid) {
        self.inner.write().consumer_id = Some(id);
    }

    pub fn get_environmental_config(
        &self,
        project_id: Uuid,
        name: &str,
        environment_id: Uuid,
    ) -> Option<EnvironmentalConfig> {
        let inner = self.inner.read();
        let id = inner
            .by_project_and_name
            .get(&(project_id, name.to_string()))?;
        let replica = inner.configs.get(id)?;
        Some(replica.environmental_config(environment_id))
    }

    pub fn get_config_value(
        &self,
        project_id: Uuid,
        name: &str,
        environment_id: Uuid,
    ) -> Option<serde_json::Value> {
        let inner = self.inner.read();
        let id = inner
            .by_project_and_name
            .get(&(project_id, name.to_string()))?;
        let replica = inner.configs.get(id)?;
        Some(replica.config_value(environment_id))
    }

    pub fn get_project_configs(
        &self,
        project_id: Uuid,
        environment_id: Uuid,
    ) -> Vec<EnvironmentalConfig> {
        let inner = self.inner.read();
        let Some(ids) = inner.by_project.get(&project_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.configs.get(id))
            .map(|replica| replica.environmental_config(environment_id))
            .collect()
    }

    /// Configs belonging to `subscriber_project_id` whose overrides
    /// reference `(referenced_project_id, referenced_config_name)` — the
    /// union's "referential" half of spec.md §4.7. References can cross
    /// project boundaries, so the `referenced_by` index is keyed by the
    /// *target's* project; this filters the referencers back down to the
    /// subscriber's own project before returning their names.
    pub fn referencing_configs(
        &self,
        subscriber_project_id: Uuid,
        referenced_project_id: Uuid,
        referenced_config_name: &str,
    ) -> Vec<String> {
        let inner = self.inner.read();
        let Some(ids) = inner
            .referenced_by
            .get(&(referenced_project_id, referenced_config_name.to_string()))
        else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.configs.get(id))
            .filter(|replica| replica.project_id == subscriber_project_id)
            .map(|replica| replica.name.clone())
            .collect()
    }
}

impl ReplicationTarget for ReplicaStore {
    fn upsert(&self, entities: Vec<ConfigReplica>) -> Vec<UpsertOutcome> {
        self.upsert_configs(entities)
    }

    fn delete(&self, id: Uuid) -> bool {
        self.delete_config(id)
    }

    fn get(&self, id: Uuid) -> Option<ConfigReplica> {
        ReplicaStore::get(self, id)
    }

    fn clear(&self) {
        ReplicaStore::clear(self)
    }

    fn get_consumer_id(&self) -> Option<Uuid> {
        ReplicaStore::get_consumer_id(self)
    }

    fn set_consumer_id(&self, id: Uuid) {
        ReplicaStore::set_consumer_id(self, id)
    }
}

impl ConfigValueResolver for ReplicaStore {
    fn resolve_config_value(
        &self,
        project_id: Uuid,
        config_name: &str,
        environment_id: Uuid,
    ) -> Option<serde_json::Value> {
        self.get_config_value(project_id, config_name, environment_id)
    }
}

fn upsert_one(inner: &mut ReplicaInner, config: ConfigReplica) -> UpsertOutcome {
    let id = config.id;
    let existing_version = inner.configs.get(&id).map(|c| c.version);

    if let Some(existing_version) = existing_version {
        if existing_version >= config.version {
            return UpsertOutcome::Ignored;
        }
    }

    // Remove the stale `referencedBy` entries this config contributed
    // before re-adding the fresh set, so a reference that was dropped in
    // this update stops pointing back at it.
    if let Some(old) = inner.configs.get(&id) {
        for (target, name) in old.referenced_configs() {
            if let Some(set) = inner.referenced_by.get_mut(&(target, name)) {
                set.remove(&id);
            }
        }

        // A rename must drop the old (project, name) -> id mapping, or the
        // stale key keeps resolving to this config under its old name.
        if old.name != config.name {
            inner
                .by_project_and_name
                .remove(&(old.project_id, old.name.clone()));
        }
    }

    inner
        .by_project_and_name
        .insert((config.project_id, config.name.clone()), id);
    inner
        .by_project
        .entry(config.project_id)
        .or_default()
        .insert(id);

    for (target, name) in config.referenced_configs() {
        inner.referenced_by.entry((target, name)).or_default().insert(id);
    }

    let outcome = if existing_version.is_some() {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Created
    };
    inner.configs.insert(id, config);
    outcome
}

/// Converts a durable-store `Config` row (without variant data) into the
/// minimal `ConfigReplica` shape used when a config has no variants yet.
/// Variants are merged in by the replicator once resolved.
pub fn base_only_replica(config: &Config) -> ConfigReplica {
    ConfigReplica {
        id: config.id,
        project_id: config.project_id,
        name: config.name.clone(),
        version: config.version,
        base_value: config.base_value.clone(),
        base_schema: config.base_schema.clone(),
        base_overrides: config.base_overrides.clone(),
        variants: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn replica(id: Uuid, project_id: Uuid, name: &str, version: i64) -> ConfigReplica {
        ConfigReplica {
            id,
            project_id,
            name: name.to_string(),
            version,
            base_value: json!({"x": version}),
            base_schema: None,
            base_overrides: vec![],
            variants: HashMap::new(),
        }
    }

    #[test]
    fn upsert_new_config_reports_created() {
        let store = ReplicaStore::new();
        let project_id = Uuid::new_v4();
        let id = Uuid::new_v4();
        let outcomes = store.upsert_configs(vec![replica(id, project_id, "A", 1)]);
        assert_eq!(outcomes, vec![UpsertOutcome::Created]);
    }

    #[test]
    fn upsert_same_version_is_ignored_idempotent() {
        let store = ReplicaStore::new();
        let project_id = Uuid::new_v4();
        let id = Uuid::new_v4();
        store.upsert_configs(vec![replica(id, project_id, "A", 1)]);
        let outcomes = store.upsert_configs(vec![replica(id, project_id, "A", 1)]);
        assert_eq!(outcomes, vec![UpsertOutcome::Ignored]);
    }

    #[test]
    fn upsert_higher_version_reports_updated() {
        let store = ReplicaStore::new();
        let project_id = Uuid::new_v4();
        let id = Uuid::new_v4();
        store.upsert_configs(vec![replica(id, project_id, "A", 1)]);
        let outcomes = store.upsert_configs(vec![replica(id, project_id, "A", 2)]);
        assert_eq!(outcomes, vec![UpsertOutcome::Updated]);
    }

    #[test]
    fn lower_version_is_ignored() {
        let store = ReplicaStore::new();
        let project_id = Uuid::new_v4();
        let id = Uuid::new_v4();
        store.upsert_configs(vec![replica(id, project_id, "A", 5)]);
        let outcomes = store.upsert_configs(vec![replica(id, project_id, "A", 3)]);
        assert_eq!(outcomes, vec![UpsertOutcome::Ignored]);
        let env = Uuid::new_v4();
        let value = store.get_config_value(project_id, "A", env).unwrap();
        assert_eq!(value, json!({"x": 5}));
    }

    #[test]
    fn delete_removes_from_all_indices() {
        let store = ReplicaStore::new();
        let project_id = Uuid::new_v4();
        let id = Uuid::new_v4();
        store.upsert_configs(vec![replica(id, project_id, "A", 1)]);
        assert!(store.delete_config(id));
        let env = Uuid::new_v4();
        assert!(store.get_config_value(project_id, "A", env).is_none());
        assert!(store.get_project_configs(project_id, env).is_empty());
    }

    #[test]
    fn consumer_id_round_trips() {
        let store = ReplicaStore::new();
        assert_eq!(store.get_consumer_id(), None);
        let id = Uuid::new_v4();
        store.set_consumer_id(id);
        assert_eq!(store.get_consumer_id(), Some(id));
    }
}
