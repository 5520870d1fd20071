use std::sync::Arc;

use crate::auth::SessionGate;
use crate::config::ConfigStore;
use crate::lifecycle::LifecycleController;
use crate::lifecycle::collaborator::ServiceBuilder;
use crate::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub gate: Arc<SessionGate>,
    pub registry: Arc<ConnectionRegistry>,
    pub lifecycle: LifecycleController,
    /// Also held by the lifecycle controller; handlers use it for branch listings.
    pub builder: Arc<dyn ServiceBuilder>,
}

impl AppState {
    pub fn new(
        config: Arc<ConfigStore>,
        gate: SessionGate,
        lifecycle: LifecycleController,
        builder: Arc<dyn ServiceBuilder>,
    ) -> Self {
        AppState {
            config,
            gate: Arc::new(gate),
            registry: Arc::new(ConnectionRegistry::new()),
            lifecycle,
            builder,
        }
    }
}
