use crate::features::observability::repo::ObservabilityRepository;
use crate::features::observability::service::ObservabilityService;
use cuwhapp_core::HostRole;
use std::sync::Arc;

pub struct ObservabilityController {
    service: ObservabilityService,
}

impl ObservabilityController {
    pub fn new(service: ObservabilityService) -> Self {
        Self { service }
    }

    /// Controller backed by a fresh registry
    pub fn with_new_registry() -> Result<Self, String> {
        let repo = Arc::new(ObservabilityRepository::new()?);
        Ok(Self::new(ObservabilityService::new(repo)))
    }

    pub fn record_remote_command(&self, role: HostRole, outcome: &str, seconds: f64) {
        self.service.record_remote_command(role, outcome, seconds);
    }

    pub fn record_retry(&self, role: HostRole) {
        self.service.record_retry(role);
    }

    pub fn record_action(&self, action: &str, category: &str, seconds: f64) {
        self.service.record_action(action, category, seconds);
    }

    pub fn set_waha_instances(&self, count: usize) {
        self.service.set_waha_instances(count);
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        self.service.render_metrics()
    }
}
