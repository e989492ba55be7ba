use prometheus::{
    opts, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Registry, TextEncoder,
};

pub struct ObservabilityRepository {
    registry: Registry,
    remote_command_total: CounterVec,
    remote_command_retry_total: CounterVec,
    remote_command_latency_seconds: HistogramVec,
    action_total: CounterVec,
    action_latency_seconds: HistogramVec,
    waha_instance_count: Gauge,
}

impl ObservabilityRepository {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();

        let remote_command_total = CounterVec::new(
            opts!(
                "cuwhapp_remote_command_total",
                "Remote command attempts by host role and outcome"
            ),
            &["role", "outcome"],
        )
        .map_err(|e| e.to_string())?;
        let remote_command_retry_total = CounterVec::new(
            opts!(
                "cuwhapp_remote_command_retry_total",
                "Remote command retries after transient transport failures"
            ),
            &["role"],
        )
        .map_err(|e| e.to_string())?;
        let remote_command_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "cuwhapp_remote_command_latency_seconds",
                "Remote command attempt latency (seconds)",
            ),
            &["role"],
        )
        .map_err(|e| e.to_string())?;
        let action_total = CounterVec::new(
            opts!(
                "cuwhapp_action_total",
                "Dispatched actions by action name and result category"
            ),
            &["action", "category"],
        )
        .map_err(|e| e.to_string())?;
        let action_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "cuwhapp_action_latency_seconds",
                "End-to-end action latency (seconds)",
            ),
            &["action"],
        )
        .map_err(|e| e.to_string())?;
        let waha_instance_count = Gauge::with_opts(opts!(
            "cuwhapp_waha_instance_count",
            "Running WAHA instances seen by the last full scan"
        ))
        .map_err(|e| e.to_string())?;

        registry
            .register(Box::new(remote_command_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(remote_command_retry_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(remote_command_latency_seconds.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(action_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(action_latency_seconds.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(waha_instance_count.clone()))
            .map_err(|e| e.to_string())?;

        Ok(Self {
            registry,
            remote_command_total,
            remote_command_retry_total,
            remote_command_latency_seconds,
            action_total,
            action_latency_seconds,
            waha_instance_count,
        })
    }

    pub fn observe_remote_command(&self, role: &str, outcome: &str, seconds: f64) {
        self.remote_command_total
            .with_label_values(&[role, outcome])
            .inc();
        self.remote_command_latency_seconds
            .with_label_values(&[role])
            .observe(seconds);
    }

    pub fn inc_remote_command_retry(&self, role: &str) {
        self.remote_command_retry_total
            .with_label_values(&[role])
            .inc();
    }

    pub fn observe_action(&self, action: &str, category: &str, seconds: f64) {
        self.action_total
            .with_label_values(&[action, category])
            .inc();
        self.action_latency_seconds
            .with_label_values(&[action])
            .observe(seconds);
    }

    pub fn set_waha_instance_count(&self, count: f64) {
        self.waha_instance_count.set(count);
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| e.to_string())?;
        String::from_utf8(buffer).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repositories_do_not_share_registries() {
        let first = ObservabilityRepository::new().unwrap();
        let second = ObservabilityRepository::new().unwrap();

        first.observe_remote_command("waha", "success", 0.02);

        assert!(first
            .render_metrics()
            .unwrap()
            .contains("cuwhapp_remote_command_total{outcome=\"success\",role=\"waha\"} 1"));
        assert!(!second
            .render_metrics()
            .unwrap()
            .contains("cuwhapp_remote_command_total{"));
    }

    #[test]
    fn test_gauge_and_retry_counter_render() {
        let repo = ObservabilityRepository::new().unwrap();
        repo.set_waha_instance_count(3.0);
        repo.inc_remote_command_retry("user");

        let rendered = repo.render_metrics().unwrap();
        assert!(rendered.contains("cuwhapp_waha_instance_count 3"));
        assert!(rendered.contains("cuwhapp_remote_command_retry_total{role=\"user\"} 1"));
    }
}
