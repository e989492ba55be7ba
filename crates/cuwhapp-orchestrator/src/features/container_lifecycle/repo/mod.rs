//! Docker commands against the USER host.
//!
//! Command builders are pure so identical inputs always produce identical
//! command lines; `UserHostRepository` sends them through the executor.

use std::sync::Arc;
use std::time::Duration;

use cuwhapp_core::container_spec::{
    parse_service_container_name, service_container_name, LABEL_ROLE, LABEL_SERVICE, LABEL_USER,
    ROLE_USER,
};
use cuwhapp_core::{ContainerSpec, ObservedService, RuntimeStatus, ServiceKind, ServiceSpec};
use tracing::warn;

use crate::features::remote_execution::service::RemoteExecutor;
use crate::shared::error::{OrchestratorError, OrchestratorResult};
use crate::shared::shell::RemoteCommand;
use crate::shared::types::{Deadline, Host, PlanType, UserId};

pub const LABEL_PLAN: &str = "cuwhapp.plan";
const DATA_MOUNT: &str = "/app/data";

/// One probe of a tenant's service containers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub services: Vec<ObservedService>,
    /// Plan recorded on the existing containers, if any
    pub plan_type: Option<PlanType>,
}

impl ProbeReport {
    pub fn contains(&self, kind: ServiceKind) -> bool {
        self.services.iter().any(|s| s.kind == kind)
    }

    pub fn is_complete(&self) -> bool {
        ServiceKind::ALL.iter().all(|kind| self.contains(*kind))
    }
}

pub fn probe_command(user_id: &UserId) -> RemoteCommand {
    RemoteCommand::new("docker")
        .fragment("ps -a")
        .opt("--filter", format!("label={}={}", LABEL_USER, user_id))
        .opt(
            "--format",
            format!(
                "{{{{.Names}}}}\\t{{{{.State}}}}\\t{{{{.Label \"{}\"}}}}",
                LABEL_PLAN
            ),
        )
}

pub fn parse_probe(user_id: &UserId, stdout: &str) -> ProbeReport {
    let mut report = ProbeReport::default();

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let mut fields = line.split('\t');
        let name = fields.next().unwrap_or_default();
        let state = fields.next().unwrap_or_default();
        let plan = fields.next().unwrap_or_default();

        let Some(kind) = parse_service_container_name(user_id, name) else {
            warn!(%user_id, container = %name, "Ignoring unexpected container in probe");
            continue;
        };
        let Some(status) = RuntimeStatus::parse(state) else {
            warn!(%user_id, container = %name, state = %state, "Unrecognised container state");
            continue;
        };

        if report.plan_type.is_none() {
            report.plan_type = plan.parse::<PlanType>().ok();
        }
        if !report.contains(kind) {
            report.services.push(ObservedService { kind, status });
        }
    }

    report.services.sort_by_key(|s| s.kind);
    report
}

pub fn ensure_network_command(spec: &ContainerSpec) -> RemoteCommand {
    RemoteCommand::new("docker")
        .fragment("network inspect")
        .arg(&spec.network)
        .quiet()
        .or_else(
            RemoteCommand::new("docker")
                .fragment("network create")
                .opt("--label", format!("{}={}", LABEL_ROLE, ROLE_USER))
                .opt("--label", format!("{}={}", LABEL_USER, spec.user_id))
                .arg(&spec.network),
        )
}

pub fn ensure_volume_command(spec: &ContainerSpec) -> RemoteCommand {
    RemoteCommand::new("docker")
        .fragment("volume inspect")
        .arg(&spec.volume)
        .quiet()
        .or_else(
            RemoteCommand::new("docker")
                .fragment("volume create")
                .opt("--label", format!("{}={}", LABEL_ROLE, ROLE_USER))
                .opt("--label", format!("{}={}", LABEL_USER, spec.user_id))
                .arg(&spec.volume),
        )
}

pub fn run_command(spec: &ContainerSpec, service: &ServiceSpec) -> RemoteCommand {
    RemoteCommand::new("docker")
        .fragment("run -d")
        .opt("--name", &service.container_name)
        .opt("--network", &spec.network)
        .opt("--restart", spec.restart_policy)
        .opt("--cpus", spec.limits.cpus_arg())
        .opt("--memory", spec.limits.memory_arg())
        .opt("--label", format!("{}={}", LABEL_ROLE, ROLE_USER))
        .opt("--label", format!("{}={}", LABEL_USER, spec.user_id))
        .opt("--label", format!("{}={}", LABEL_SERVICE, service.kind.as_str()))
        .opt("--label", format!("{}={}", LABEL_PLAN, spec.plan_type))
        .opt("-e", format!("USER_ID={}", spec.user_id))
        .opt("-e", format!("PLAN_TYPE={}", spec.plan_type))
        .opt("-e", format!("SERVICE={}", service.kind.as_str()))
        .opt(
            "-e",
            format!("{}={}", service.kind.port_env(), service.container_port),
        )
        .opt(
            "-p",
            format!("{}:{}", service.host_port, service.container_port),
        )
        .opt("-v", format!("{}:{}", spec.volume, DATA_MOUNT))
        .arg(&spec.image)
}

pub fn start_command(container_name: &str) -> RemoteCommand {
    RemoteCommand::new("docker").fragment("start").arg(container_name)
}

pub fn stop_command(names: &[String], grace: Duration) -> RemoteCommand {
    RemoteCommand::new("docker")
        .fragment("stop")
        .opt("--time", grace.as_secs().to_string())
        .args(names)
}

pub fn restart_command(names: &[String], grace: Duration) -> RemoteCommand {
    RemoteCommand::new("docker")
        .fragment("restart")
        .opt("--time", grace.as_secs().to_string())
        .args(names)
}

pub fn remove_containers_command(names: &[String]) -> RemoteCommand {
    RemoteCommand::new("docker").fragment("rm -f").args(names)
}

pub fn remove_volume_command(volume: &str) -> RemoteCommand {
    RemoteCommand::new("docker").fragment("volume rm").arg(volume)
}

pub fn remove_network_command(network: &str) -> RemoteCommand {
    RemoteCommand::new("docker").fragment("network rm").arg(network)
}

/// Names of the tenant's containers that exist according to `report`
pub fn existing_names(user_id: &UserId, report: &ProbeReport) -> Vec<String> {
    report
        .services
        .iter()
        .map(|s| service_container_name(user_id, s.kind))
        .collect()
}

/// True when every error line reports a missing container, volume or network
pub fn is_missing_resource(stderr: &str) -> bool {
    let mut lines = stderr
        .lines()
        .map(|l| l.trim().to_ascii_lowercase())
        .filter(|l| !l.is_empty())
        .peekable();

    if lines.peek().is_none() {
        return false;
    }
    lines.all(|l| l.contains("no such") || l.contains("not found"))
}

pub struct UserHostRepository {
    executor: Arc<RemoteExecutor>,
    host: Host,
}

impl UserHostRepository {
    pub fn new(executor: Arc<RemoteExecutor>, host: Host) -> Self {
        Self { executor, host }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub async fn probe(&self, user_id: &UserId, deadline: Deadline) -> OrchestratorResult<ProbeReport> {
        let result = self
            .executor
            .execute_checked(&self.host, &probe_command(user_id), deadline)
            .await?;
        Ok(parse_probe(user_id, &result.stdout))
    }

    pub async fn run(&self, command: RemoteCommand, deadline: Deadline) -> OrchestratorResult<()> {
        self.executor
            .execute_checked(&self.host, &command, deadline)
            .await
            .map(|_| ())
    }

    /// Runs a teardown step, treating "no such ..." as already done
    pub async fn run_tolerating_missing(
        &self,
        command: RemoteCommand,
        deadline: Deadline,
    ) -> OrchestratorResult<()> {
        match self.executor.execute_checked(&self.host, &command, deadline).await {
            Ok(_) => Ok(()),
            Err(OrchestratorError::Remote { stderr, .. }) if is_missing_resource(&stderr) => Ok(()),
            Err(error) => Err(error),
        }
    }
}
