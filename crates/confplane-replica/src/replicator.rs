//! Replicator (spec.md §4.3).
//!
//! Specialized directly to the `Config` entity — the only entity type this
//! spec replicates — rather than built generic over an entity type
//! parameter, while still depending on `ReplicationSource`/
//! `ReplicationTarget`/`EventHub` trait objects so the pump logic itself
//! stays agnostic of the durable-store and replica-store concrete types.
//! See DESIGN.md for why full entity-type genericity was not worth building
//! for a single entity.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use confplane_core::error::ConfigError;
use confplane_core::worker::{AsyncWorker, WorkerError};
use confplane_core::{EventHub, ReplicationSource, ReplicationTarget, UpsertOutcome};

const TOPIC: &str = "configs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub project_id: Uuid,
    pub config_id: Uuid,
    pub name: String,
    pub version: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct ReplicatorSettings {
    pub step_batch: u32,
    pub step_interval_ms: u64,
    pub dump_batch_size: u32,
}

impl Default for ReplicatorSettings {
    fn default() -> Self {
        Self {
            step_batch: 128,
            step_interval_ms: 100,
            dump_batch_size: 256,
        }
    }
}

struct State {
    source: Arc<dyn ReplicationSource>,
    target: Arc<dyn ReplicationTarget>,
    hub: Arc<dyn EventHub>,
    settings: ReplicatorSettings,
    on_change: Box<dyn Fn(ChangeEvent) + Send + Sync>,
    fatal_sink: tokio::sync::mpsc::UnboundedSender<ConfigError>,
    consumer_id: Mutex<Option<Uuid>>,
    fatal: AtomicBool,
    /// Filled in immediately after the owning [`AsyncWorker`] is
    /// constructed, before `start()` is ever called, so `tick()` can always
    /// assume it is present.
    worker: Mutex<Option<AsyncWorker>>,
}

impl State {
    fn wakeup_immediately(self: &Arc<Self>) {
        if let Some(worker) = self.worker.lock().clone() {
            let _ = worker.wakeup();
        }
    }

    fn wakeup_after_interval(self: &Arc<Self>) {
        let state = self.clone();
        let interval = state.settings.step_interval_ms;
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(interval)).await;
            if let Some(worker) = state.worker.lock().clone() {
                let _ = worker.wakeup();
            }
        });
    }
}

/// Pumps the replica store to match the durable store via the event hub
/// (spec.md §4.3). Built on [`AsyncWorker`]: each tick runs one steady-loop
/// step, then re-arms itself — immediately if lagging, after
/// `step_interval_ms` otherwise — by waking the worker again.
pub struct Replicator {
    state: Arc<State>,
    worker: AsyncWorker,
}

impl Replicator {
    pub fn new(
        source: Arc<dyn ReplicationSource>,
        target: Arc<dyn ReplicationTarget>,
        hub: Arc<dyn EventHub>,
        settings: ReplicatorSettings,
        on_change: impl Fn(ChangeEvent) + Send + Sync + 'static,
        fatal_sink: tokio::sync::mpsc::UnboundedSender<ConfigError>,
    ) -> Self {
        let state = Arc::new(State {
            source,
            target,
            hub,
            settings,
            on_change: Box::new(on_change),
            fatal_sink,
            consumer_id: Mutex::new(None),
            fatal: AtomicBool::new(false),
            worker: Mutex::new(None),
        });

        let task_state = state.clone();
        let worker = AsyncWorker::new(
            move || {
                let state = task_state.clone();
                async move { tick(&state).await }
            },
            |e: anyhow::Error| error!(error = %e, "replicator tick failed"),
        );
        *state.worker.lock() = Some(worker.clone());

        Self { state, worker }
    }

    /// Runs the startup sequence (restore-or-reset, optional initial dump)
    /// then starts the steady loop.
    pub async fn start(&self) -> Result<(), ConfigError> {
        self.run_startup().await?;
        self.worker.start().await;
        Ok(())
    }

    async fn run_startup(&self) -> Result<(), ConfigError> {
        let existing = self.state.target.get_consumer_id();

        let restored = match existing {
            Some(id) => self.state.hub.try_restore_consumer(TOPIC, id).await?,
            None => false,
        };

        if restored {
            *self.state.consumer_id.lock() = existing;
            info!(consumer_id = ?existing, "replicator restored existing consumer");
            return Ok(());
        }

        info!("replicator resetting local state and creating a fresh consumer");
        self.state.target.clear();
        let new_id = self.state.hub.create_consumer(TOPIC).await?;
        self.state.target.set_consumer_id(new_id);
        *self.state.consumer_id.lock() = Some(new_id);

        self.initial_dump().await?;
        Ok(())
    }

    async fn initial_dump(&self) -> Result<(), ConfigError> {
        let ids = self.state.source.get_ids().await?;
        for chunk in ids.chunks(self.state.settings.dump_batch_size.max(1) as usize) {
            let entities = self.state.source.get_by_ids(chunk).await?;
            let outcomes = self.state.target.upsert(entities.clone());
            for (entity, outcome) in entities.into_iter().zip(outcomes) {
                emit_for_outcome(&self.state, &entity, outcome);
            }
        }
        Ok(())
    }

    pub fn wakeup(&self) -> Result<(), WorkerError> {
        self.worker.wakeup()
    }

    pub fn stop(&self) {
        self.worker.stop();
    }

    /// Stops the worker, destroys the event-hub consumer and clears the
    /// replica (spec.md §4.3 "destroy() also deletes the consumer and
    /// clears the target").
    pub async fn destroy(&self) {
        self.worker.stop();
        self.worker.join().await;
        if let Some(id) = *self.state.consumer_id.lock() {
            if let Err(e) = self.state.hub.destroy(id).await {
                warn!(error = %e, "failed to destroy consumer on replicator teardown");
            }
        }
        self.state.target.clear();
    }

    pub async fn join(&self) {
        self.worker.join().await;
    }
}

fn emit_for_outcome(
    state: &State,
    entity: &confplane_core::model::ConfigReplica,
    outcome: UpsertOutcome,
) {
    let kind = match outcome {
        UpsertOutcome::Created => ChangeKind::Created,
        UpsertOutcome::Updated => ChangeKind::Updated,
        UpsertOutcome::Ignored => return,
    };
    metrics::counter!("confplane_replicator_events_applied_total", 1);
    (state.on_change)(ChangeEvent {
        kind,
        project_id: entity.project_id,
        config_id: entity.id,
        name: entity.name.clone(),
        version: entity.version,
    });
}

/// One steady-loop step (spec.md §4.3 "Steady loop"), run as the
/// `AsyncWorker`'s task.
async fn tick(state: &Arc<State>) -> anyhow::Result<()> {
    if state.fatal.load(Ordering::SeqCst) {
        return Ok(());
    }

    let consumer_id = match *state.consumer_id.lock() {
        Some(id) => id,
        None => return Ok(()), // startup has not completed yet
    };

    let step_batch = state.settings.step_batch;
    metrics::counter!("confplane_replicator_ticks_total", 1);

    match run_step(state, consumer_id, step_batch).await {
        Ok(lagging) => {
            if lagging {
                state.wakeup_immediately();
            } else {
                state.wakeup_after_interval();
            }
        }
        Err(ConfigError::ConsumerDestroyed(msg)) => {
            error!(error = %msg, "replicator consumer destroyed, marking fatal");
            metrics::counter!("confplane_replicator_errors_total", 1);
            state.fatal.store(true, Ordering::SeqCst);
            let _ = state.fatal_sink.send(ConfigError::ConsumerDestroyed(msg));
        }
        Err(e) if e.is_retryable() => {
            warn!(error = %e, "transient replicator error, will retry after interval");
            metrics::counter!("confplane_replicator_errors_total", 1);
            state.wakeup_after_interval();
        }
        Err(e) => {
            error!(error = %e, "non-retryable replicator error");
            metrics::counter!("confplane_replicator_errors_total", 1);
            let _ = state.fatal_sink.send(e);
        }
    }

    Ok(())
}

/// Runs one steady-loop step; returns `Ok(true)` if a full batch was
/// pulled (lagging — tick again immediately).
async fn run_step(
    state: &Arc<State>,
    consumer_id: Uuid,
    step_batch: u32,
) -> Result<bool, ConfigError> {
    let events = state.hub.pull(consumer_id, step_batch).await?;
    if events.is_empty() {
        return Ok(false);
    }

    let distinct_ids: Vec<Uuid> = events
        .iter()
        .map(|e| e.entity_id)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    let resolved = state.source.get_by_ids(&distinct_ids).await?;
    let resolved_ids: HashSet<Uuid> = resolved.iter().map(|e| e.id).collect();

    for id in &distinct_ids {
        if resolved_ids.contains(id) {
            continue;
        }
        let removed = state.target.get(*id);
        if state.target.delete(*id) {
            debug!(config_id = %id, "entity deleted upstream, removing from replica");
            metrics::counter!("confplane_replicator_events_applied_total", 1);
            let (project_id, name, version) = removed
                .map(|r| (r.project_id, r.name, r.version))
                .unwrap_or((Uuid::nil(), String::new(), 0));
            (state.on_change)(ChangeEvent {
                kind: ChangeKind::Deleted,
                project_id,
                config_id: *id,
                name,
                version,
            });
        }
    }

    let outcomes = state.target.upsert(resolved.clone());
    for (entity, outcome) in resolved.into_iter().zip(outcomes) {
        emit_for_outcome(state, &entity, outcome);
    }

    let ack_ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
    state.hub.ack(consumer_id, &ack_ids).await?;

    Ok(events.len() as u32 == step_batch)
}
