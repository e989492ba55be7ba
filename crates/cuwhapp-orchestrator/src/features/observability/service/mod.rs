use crate::features::observability::repo::ObservabilityRepository;
use cuwhapp_core::HostRole;
use std::sync::Arc;

pub struct ObservabilityService {
    repo: Arc<ObservabilityRepository>,
}

impl ObservabilityService {
    pub fn new(repo: Arc<ObservabilityRepository>) -> Self {
        Self { repo }
    }

    pub fn record_remote_command(&self, role: HostRole, outcome: &str, seconds: f64) {
        self.repo
            .observe_remote_command(role.as_str(), outcome, seconds);
    }

    pub fn record_retry(&self, role: HostRole) {
        self.repo.inc_remote_command_retry(role.as_str());
    }

    pub fn record_action(&self, action: &str, category: &str, seconds: f64) {
        self.repo.observe_action(action, category, seconds);
    }

    pub fn set_waha_instances(&self, count: usize) {
        self.repo.set_waha_instance_count(count as f64);
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        self.repo.render_metrics()
    }
}
