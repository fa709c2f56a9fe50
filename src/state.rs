use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::controller::PresenceController;
use crate::error::AppError;
use crate::models::snapshot::Role;
use crate::observability::metrics::Metrics;
use crate::stream::StreamHandle;

pub struct AppState {
    pub controllers: HashMap<Role, Arc<PresenceController>>,
    pub stream: StreamHandle,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(stream: StreamHandle, metrics: Metrics) -> Self {
        Self {
            controllers: HashMap::new(),
            stream,
            metrics,
        }
    }

    pub fn with_controller(mut self, controller: PresenceController) -> Self {
        self.controllers
            .insert(controller.role(), Arc::new(controller));
        self
    }

    /// Looks up the controller for a `:role` path segment.
    pub fn controller(&self, role: &str) -> Result<Arc<PresenceController>, AppError> {
        role.parse::<Role>()
            .ok()
            .and_then(|role| self.controllers.get(&role).cloned())
            .ok_or_else(|| AppError::NotFound(format!("no presence page for role {role}")))
    }
}
