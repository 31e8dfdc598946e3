use std::sync::Arc;

use confplane_replica::ReplicaStore;

use crate::events::SharedEventBus;
use crate::project_resolver::ProjectResolver;

#[derive(Clone)]
pub struct AppState {
    pub replica: Arc<ReplicaStore>,
    pub events: SharedEventBus,
    pub project_resolver: Arc<dyn ProjectResolver>,
    pub stream_heartbeat_ms: u64,
}
