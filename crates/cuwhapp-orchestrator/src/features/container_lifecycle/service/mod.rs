use std::sync::Arc;
use std::time::Duration;

use cuwhapp_core::{
    ContainerSpec, LifecycleIntent, ObservedService, RuntimeStatus, ServiceKind, ServiceSpec, Transition,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::features::container_lifecycle::repo::{
    ensure_network_command, ensure_volume_command, existing_names, remove_containers_command,
    remove_network_command, remove_volume_command, restart_command, run_command, start_command,
    stop_command, ProbeReport, UserHostRepository,
};
use crate::shared::error::{OrchestratorError, OrchestratorResult};
use crate::shared::types::{ContainerState, Deadline, PlanType, UserId};

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

const PORT_ALLOCATED: &str = "port is already allocated";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleOutcome {
    pub user_id: UserId,
    pub previous: ContainerState,
    pub state: ContainerState,
    /// Whether any mutating command was sent
    pub changed: bool,
    pub spec: ContainerSpec,
}

pub struct ContainerLifecycleService {
    repo: Arc<UserHostRepository>,
    stop_grace: Duration,
}

impl ContainerLifecycleService {
    pub fn new(repo: Arc<UserHostRepository>, stop_grace: Duration) -> Self {
        Self { repo, stop_grace }
    }

    pub fn host_address(&self) -> &str {
        &self.repo.host().address
    }

    /// Current state as observed on the host
    pub async fn observe(
        &self,
        user_id: &UserId,
        deadline: Deadline,
    ) -> OrchestratorResult<(ContainerState, ProbeReport)> {
        let report = self.repo.probe(user_id, deadline).await?;
        Ok((ContainerState::derive(&report.services), report))
    }

    pub async fn create(
        &self,
        user_id: &UserId,
        plan_type: PlanType,
        deadline: Deadline,
    ) -> OrchestratorResult<LifecycleOutcome> {
        let (previous, report) = self.observe(user_id, deadline).await?;

        match previous.plan(LifecycleIntent::Create) {
            Transition::NoOp => {
                let running = self.spec_for(user_id, &report);
                if running.plan_type != plan_type {
                    warn!(%user_id, requested = %plan_type, running = %running.plan_type, "User containers already running under another plan");
                } else {
                    info!(%user_id, state = %previous, "User containers already running");
                }
                Ok(self.unchanged(user_id, previous, running))
            }
            Transition::Proceed { via, target } => {
                log_transition(user_id, LifecycleIntent::Create, previous, via, target);
                let spec = ContainerSpec::derive(user_id, plan_type);
                self.bring_up(&spec, &report, deadline).await?;
                let state = self.verify_running(user_id, deadline).await?;
                Ok(LifecycleOutcome {
                    user_id: user_id.clone(),
                    previous,
                    state,
                    changed: true,
                    spec,
                })
            }
            Transition::NotFound => Err(OrchestratorError::NotFound(user_id.to_string())),
        }
    }

    pub async fn stop(&self, user_id: &UserId, deadline: Deadline) -> OrchestratorResult<LifecycleOutcome> {
        let (previous, report) = self.observe(user_id, deadline).await?;
        let spec = self.spec_for(user_id, &report);

        match previous.plan(LifecycleIntent::Stop) {
            Transition::Proceed { via, target } => {
                log_transition(user_id, LifecycleIntent::Stop, previous, via, target);
                let names = existing_names(user_id, &report);
                self.repo
                    .run_tolerating_missing(stop_command(&names, self.stop_grace), deadline)
                    .await?;

                let stopped: Vec<ObservedService> = report
                    .services
                    .iter()
                    .map(|s| ObservedService {
                        kind: s.kind,
                        status: RuntimeStatus::Exited,
                    })
                    .collect();

                Ok(LifecycleOutcome {
                    user_id: user_id.clone(),
                    previous,
                    state: ContainerState::derive(&stopped),
                    changed: true,
                    spec,
                })
            }
            Transition::NoOp | Transition::NotFound => {
                info!(%user_id, state = %previous, "Nothing to stop");
                Ok(self.unchanged(user_id, previous, spec))
            }
        }
    }

    pub async fn restart(
        &self,
        user_id: &UserId,
        deadline: Deadline,
    ) -> OrchestratorResult<LifecycleOutcome> {
        let (previous, report) = self.observe(user_id, deadline).await?;
        let spec = self.spec_for(user_id, &report);

        match previous.plan(LifecycleIntent::Restart) {
            Transition::NotFound => Err(OrchestratorError::NotFound(format!(
                "no containers for user {}",
                user_id
            ))),
            Transition::NoOp => Ok(self.unchanged(user_id, previous, spec)),
            Transition::Proceed { via, target } => {
                log_transition(user_id, LifecycleIntent::Restart, previous, via, target);
                if report.is_complete() {
                    let names = spec
                        .container_names()
                        .into_iter()
                        .map(str::to_string)
                        .collect::<Vec<_>>();
                    self.repo
                        .run(restart_command(&names, self.stop_grace), deadline)
                        .await?;
                } else {
                    warn!(%user_id, "Partial container set, restarting through create");
                    self.bring_up(&spec, &report, deadline).await?;
                }

                let state = self.verify_running(user_id, deadline).await?;
                Ok(LifecycleOutcome {
                    user_id: user_id.clone(),
                    previous,
                    state,
                    changed: true,
                    spec,
                })
            }
        }
    }

    pub async fn delete(
        &self,
        user_id: &UserId,
        deadline: Deadline,
    ) -> OrchestratorResult<LifecycleOutcome> {
        let (previous, report) = self.observe(user_id, deadline).await?;
        let spec = self.spec_for(user_id, &report);

        if let Transition::Proceed { via, target } = previous.plan(LifecycleIntent::Delete) {
            log_transition(user_id, LifecycleIntent::Delete, previous, via, target);
        }

        let running: Vec<String> = report
            .services
            .iter()
            .filter(|s| s.status.is_running())
            .map(|s| cuwhapp_core::container_spec::service_container_name(user_id, s.kind))
            .collect();
        if !running.is_empty() {
            self.repo
                .run_tolerating_missing(stop_command(&running, self.stop_grace), deadline)
                .await?;
        }

        let all_names = spec
            .container_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        self.repo
            .run_tolerating_missing(remove_containers_command(&all_names), deadline)
            .await?;
        self.repo
            .run_tolerating_missing(remove_volume_command(&spec.volume), deadline)
            .await?;
        self.repo
            .run_tolerating_missing(remove_network_command(&spec.network), deadline)
            .await?;

        info!(%user_id, previous = %previous, "User containers deleted");
        Ok(LifecycleOutcome {
            user_id: user_id.clone(),
            previous,
            state: ContainerState::Absent,
            changed: previous != ContainerState::Absent,
            spec,
        })
    }

    async fn bring_up(
        &self,
        spec: &ContainerSpec,
        report: &ProbeReport,
        deadline: Deadline,
    ) -> OrchestratorResult<()> {
        self.repo.run(ensure_network_command(spec), deadline).await?;
        self.repo.run(ensure_volume_command(spec), deadline).await?;

        for service in &spec.services {
            let command = if report.contains(service.kind) {
                start_command(&service.container_name)
            } else {
                run_command(spec, service)
            };
            self.repo
                .run(command, deadline)
                .await
                .map_err(|error| port_conflict(error, spec, service))?;
        }

        Ok(())
    }

    async fn verify_running(
        &self,
        user_id: &UserId,
        deadline: Deadline,
    ) -> OrchestratorResult<ContainerState> {
        let (state, report) = self.observe(user_id, deadline).await?;
        if state == ContainerState::Running {
            return Ok(state);
        }

        let not_running: Vec<&str> = ServiceKind::ALL
            .iter()
            .filter(|kind| {
                !report
                    .services
                    .iter()
                    .any(|s| s.kind == **kind && s.status.is_running())
            })
            .map(|kind| kind.as_str())
            .collect();
        warn!(%user_id, state = %state, services = ?not_running, "Services not running after start");

        Err(OrchestratorError::Remote {
            exit_code: 0,
            stderr: format!(
                "services not running after start: {}",
                not_running.join(", ")
            ),
        })
    }

    fn spec_for(&self, user_id: &UserId, report: &ProbeReport) -> ContainerSpec {
        ContainerSpec::derive(user_id, report.plan_type.unwrap_or_default())
    }

    fn unchanged(&self, user_id: &UserId, state: ContainerState, spec: ContainerSpec) -> LifecycleOutcome {
        LifecycleOutcome {
            user_id: user_id.clone(),
            previous: state,
            state,
            changed: false,
            spec,
        }
    }
}

/// Names the contended host port when docker refuses to bind it.
///
/// Port slots come from a hash of the user id, so two tenants can share one.
/// The docker stderr is kept intact at the front of the message.
fn port_conflict(error: OrchestratorError, spec: &ContainerSpec, service: &ServiceSpec) -> OrchestratorError {
    match error {
        OrchestratorError::Remote { exit_code, stderr } if stderr.contains(PORT_ALLOCATED) => {
            warn!(user_id = %spec.user_id, service = %service.kind.as_str(), host_port = service.host_port, "Host port already bound");
            OrchestratorError::Remote {
                exit_code,
                stderr: format!(
                    "{} (host port {} for service {} of user {} is bound by another container)",
                    stderr,
                    service.host_port,
                    service.kind.as_str(),
                    spec.user_id
                ),
            }
        }
        other => other,
    }
}

fn log_transition(
    user_id: &UserId,
    intent: LifecycleIntent,
    from: ContainerState,
    via: ContainerState,
    to: ContainerState,
) {
    info!(%user_id, %intent, from = %from, via = %via, to = %to, "Lifecycle transition");
}
