//! Structured logging and metrics wiring, started once from `main` before
//! any other component of the control plane (spec.md §9 "Global
//! singletons": this is the one piece of process-wide, genuinely-global
//! state the service needs, and it carries no domain logic).

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a `tracing-subscriber` registry driven by `RUST_LOG` (falling
/// back to `default_filter`) and a global Prometheus metrics recorder.
/// Idempotent only in the sense that the caller is expected to invoke it
/// exactly once at process startup; a second call will panic when
/// `tracing`/`metrics` refuse to install a second global recorder.
pub fn init_telemetry(default_filter: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install prometheus recorder: {e}"))?;

    Ok(())
}

/// Replication counters recorded by the replicator and event hub (spec.md
/// §8 quantified invariants are tested directly; these gauges are the
/// operational surface an operator would actually watch).
pub mod metrics_keys {
    pub const REPLICATOR_TICKS: &str = "confplane_replicator_ticks_total";
    pub const REPLICATOR_ERRORS: &str = "confplane_replicator_errors_total";
    pub const REPLICATOR_EVENTS_APPLIED: &str = "confplane_replicator_events_applied_total";
    pub const EVENT_HUB_PUBLISHED: &str = "confplane_event_hub_published_total";
    pub const EVENT_HUB_CONSUMERS_GC: &str = "confplane_event_hub_consumers_gc_total";
    pub const READ_API_REQUESTS: &str = "confplane_read_api_requests_total";
}
