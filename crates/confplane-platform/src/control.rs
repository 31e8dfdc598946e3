//! Control plane (spec.md §4.9, §9 "Global singletons"): wires the durable
//! store, event hub, replicator and read API into one explicitly constructed
//! handle instead of a lazily-initialized process-wide singleton, and takes
//! a caller-supplied fatal-error sink instead of panicking in place.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use confplane_api::{AppState, EventBus, ProjectResolver};
use confplane_core::error::ConfigError;
use confplane_core::{EventHub, ReplicationSource, ReplicationTarget};
use confplane_db::event_hub::EventHubSettings;
use confplane_db::{DatabasePool, DurableConfigStore, DurableEventHub};
use confplane_replica::{ChangeEvent, ReplicaStore, Replicator, ReplicatorSettings};
use confplane_settings::ReplicationConfig;

use crate::port_authority::{PortAuthority, PortError};
use crate::port_policy::PortPolicy;
use crate::safe_socket::ManagedListener;

/// Errors that can abort `ControlPlane::start` before the service is
/// serving traffic.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("port error: {0}")]
    Port(#[from] PortError),
    #[error("replicator failed to start: {0}")]
    Replicator(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fatal error surfaced after the control plane is already serving
/// traffic — the replicator's consumer was destroyed remotely, or it hit a
/// non-retryable store error (spec.md §4.3 "Failure semantics").
#[derive(Debug, thiserror::Error)]
#[error("control plane reported a fatal error: {0}")]
pub struct FatalError(#[from] pub ConfigError);

/// The running service: HTTP listener, replicator, and the event hub they
/// share. Dropping this does not stop anything — call [`ControlPlane::stop`]
/// for a clean shutdown.
pub struct ControlPlane {
    replicator: Arc<Replicator>,
    port_authority: Arc<PortAuthority>,
    bound_port: u16,
    server_handle: tokio::task::JoinHandle<()>,
}

impl ControlPlane {
    /// Wires the component graph and starts serving.
    ///
    /// `project_resolver` is the collaborator contract from spec.md §6
    /// ("Authentication") — this crate never constructs one itself.
    #[allow(clippy::too_many_arguments)]
    pub async fn start(
        pool: DatabasePool,
        replication: ReplicationConfig,
        project_resolver: Arc<dyn ProjectResolver>,
        host: String,
        policy: PortPolicy,
        fatal_sink: mpsc::UnboundedSender<FatalError>,
    ) -> Result<Self, ControlError> {
        let hub = Arc::new(DurableEventHub::new(
            pool.clone(),
            EventHubSettings {
                consumer_idle_ttl_ms: replication.consumer_idle_ttl_ms as i64,
                publish_cleanup_frequency: replication.publish_cleanup_frequency,
                report_frequency: replication.report_frequency,
            },
        ));

        let store = Arc::new(DurableConfigStore::new(pool, hub.clone()));
        let replica = Arc::new(ReplicaStore::new());
        let events: Arc<EventBus> = Arc::new(EventBus::new());

        let (replicator_fatal_tx, mut replicator_fatal_rx) = mpsc::unbounded_channel::<ConfigError>();
        let forwarded_sink = fatal_sink.clone();
        tokio::spawn(async move {
            while let Some(err) = replicator_fatal_rx.recv().await {
                error!(error = %err, "forwarding fatal replicator error to control plane sink");
                let _ = forwarded_sink.send(FatalError(err));
            }
        });

        let on_change_events = events.clone();
        let on_change = move |change: ChangeEvent| on_change_events.publish(change);

        let replicator = Arc::new(Replicator::new(
            store.clone() as Arc<dyn ReplicationSource>,
            replica.clone() as Arc<dyn ReplicationTarget>,
            hub.clone() as Arc<dyn EventHub>,
            ReplicatorSettings {
                step_batch: replication.step_batch_size,
                step_interval_ms: replication.step_interval_ms,
                dump_batch_size: replication.dump_batch_size,
            },
            on_change,
            replicator_fatal_tx,
        ));
        replicator.start().await?;

        let port_authority = Arc::new(PortAuthority::new()?);
        let listener: ManagedListener = port_authority.acquire(&policy, &host).await?;
        let bound_port = listener.port();

        let app_state = AppState {
            replica,
            events,
            project_resolver,
            stream_heartbeat_ms: replication.stream_heartbeat_ms,
        };
        let app = confplane_api::app(app_state);

        let tokio_listener = listener.into_tokio_listener()?;
        info!(port = bound_port, "control plane serving read API");
        let server_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(tokio_listener, app).await {
                error!(error = %e, "read API server exited with an error");
            }
        });

        Ok(Self {
            replicator,
            port_authority,
            bound_port,
            server_handle,
        })
    }

    pub fn bound_port(&self) -> u16 {
        self.bound_port
    }

    /// Stops the HTTP listener, releases its port lease and tears down the
    /// replicator (destroying its consumer — spec.md §4.3).
    pub async fn stop(self) {
        self.server_handle.abort();
        if let Err(e) = self.port_authority.release(self.bound_port).await {
            tracing::warn!(error = %e, "failed to release port lease on shutdown");
        }
        self.replicator.destroy().await;
    }
}
