use std::sync::Arc;

use cuwhapp_core::Selection;
use cuwhapp_proto::{
    CreateWahaData, FindAvailableData, LifecycleData, ListWahaData, ServiceEndpoint,
    WahaInstanceView, WahaSummary,
};
use serde::Serialize;

use crate::features::capacity_selection::service::CapacitySelector;
use crate::features::container_lifecycle::service::{ContainerLifecycleService, LifecycleOutcome};
use crate::features::waha_registry::service::WahaRegistryService;
use crate::shared::error::{OrchestratorError, OrchestratorResult};
use crate::shared::types::{Command, ContainerState, Deadline};

/// Dispatches a typed command to the component that owns it
pub struct CommandRouterService {
    lifecycle: Arc<ContainerLifecycleService>,
    registry: Arc<WahaRegistryService>,
    selector: Arc<CapacitySelector>,
}

impl CommandRouterService {
    pub fn new(
        lifecycle: Arc<ContainerLifecycleService>,
        registry: Arc<WahaRegistryService>,
        selector: Arc<CapacitySelector>,
    ) -> Self {
        Self {
            lifecycle,
            registry,
            selector,
        }
    }

    pub async fn route(&self, command: Command, deadline: Deadline) -> OrchestratorResult<serde_json::Value> {
        match command {
            Command::CreateUserContainer { user_id, plan_type } => {
                let outcome = self.lifecycle.create(&user_id, plan_type, deadline).await?;
                let message = if outcome.changed {
                    format!("Containers for user {} created", user_id)
                } else {
                    format!("Containers for user {} already running", user_id)
                };
                to_data(self.lifecycle_data(outcome, message))
            }
            Command::StopUserContainer { user_id } => {
                let outcome = self.lifecycle.stop(&user_id, deadline).await?;
                let message = match outcome.previous {
                    ContainerState::Absent => format!("No containers for user {}", user_id),
                    _ if !outcome.changed => format!("Containers for user {} already stopped", user_id),
                    _ => format!("Containers for user {} stopped", user_id),
                };
                to_data(self.lifecycle_data(outcome, message))
            }
            Command::RestartUserContainer { user_id } => {
                let outcome = self.lifecycle.restart(&user_id, deadline).await?;
                let message = format!("Containers for user {} restarted", user_id);
                to_data(self.lifecycle_data(outcome, message))
            }
            Command::DeleteUserContainer { user_id } => {
                let outcome = self.lifecycle.delete(&user_id, deadline).await?;
                let message = if outcome.changed {
                    format!("Containers for user {} deleted", user_id)
                } else {
                    format!("No containers for user {}", user_id)
                };
                to_data(self.lifecycle_data(outcome, message))
            }
            Command::CreateWaha { max_sessions } => {
                let instance = self.registry.create_instance(max_sessions, deadline).await?;
                to_data(CreateWahaData {
                    message: format!(
                        "WAHA instance {} created with capacity {}",
                        instance.id, instance.max_sessions
                    ),
                    instance: WahaInstanceView::new(&instance, self.registry.host_address()),
                })
            }
            Command::ListWaha => {
                let instances = self.registry.collect_instances(deadline).await?;
                to_data(ListWahaData {
                    summary: WahaSummary::from_instances(&instances),
                    instances: instances
                        .iter()
                        .map(|i| WahaInstanceView::new(i, self.registry.host_address()))
                        .collect(),
                })
            }
            Command::FindAvailableWaha { sessions_needed } => {
                let data = match self.selector.find_available(sessions_needed, deadline).await? {
                    Selection::Instance(instance) => FindAvailableData::UseExisting {
                        instance: WahaInstanceView::new(&instance, self.registry.host_address()),
                    },
                    Selection::CreateNew(directive) => FindAvailableData::CreateNew {
                        action_needed: "create_waha".to_string(),
                        min_max_sessions: directive.min_max_sessions,
                        suggested_max_sessions: directive.suggested_max_sessions,
                        reason: directive.reason,
                    },
                };
                to_data(data)
            }
        }
    }

    fn lifecycle_data(&self, outcome: LifecycleOutcome, message: String) -> LifecycleData {
        let address = self.lifecycle.host_address();
        let containers = if outcome.state == ContainerState::Running {
            outcome
                .spec
                .services
                .iter()
                .map(|service| ServiceEndpoint {
                    service: service.kind,
                    container_name: service.container_name.clone(),
                    host_port: service.host_port,
                    url: format!("http://{}:{}", address, service.host_port),
                })
                .collect()
        } else {
            Vec::new()
        };

        LifecycleData {
            user_id: outcome.user_id.to_string(),
            previous: outcome.previous,
            state: outcome.state,
            changed: outcome.changed,
            containers,
            message,
        }
    }
}

fn to_data<T: Serialize>(data: T) -> OrchestratorResult<serde_json::Value> {
    serde_json::to_value(data)
        .map_err(|e| OrchestratorError::Unknown(format!("failed to encode response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::container_lifecycle::repo::UserHostRepository;
    use crate::features::container_lifecycle::service::DEFAULT_STOP_GRACE;
    use crate::features::waha_registry::repo::WahaHostRepository;
    use crate::features::waha_registry::service::ReadinessPolicy;
    use crate::shared::testing::{
        sessions_json, test_executor, test_observability, user_host, waha_host, ScriptedTransport,
    };
    use crate::shared::types::{HostRole, PlanType, UserId};
    use cuwhapp_core::SelectionPolicy;
    use std::time::Duration;

    fn router(transport: &Arc<ScriptedTransport>) -> CommandRouterService {
        let executor = test_executor(transport.clone());
        let lifecycle = ContainerLifecycleService::new(
            Arc::new(UserHostRepository::new(executor.clone(), user_host())),
            DEFAULT_STOP_GRACE,
        );
        let registry = Arc::new(WahaRegistryService::new(
            Arc::new(WahaHostRepository::new(executor, waha_host())),
            ReadinessPolicy::default(),
            test_observability(),
        ));
        let selector = CapacitySelector::new(registry.clone(), SelectionPolicy::best_fit());
        CommandRouterService::new(Arc::new(lifecycle), registry, Arc::new(selector))
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_create_reports_endpoints_on_user_host() {
        let transport = ScriptedTransport::new();
        transport.once("label=cuwhapp.user=u1", 0, "", "").on(
            "label=cuwhapp.user=u1",
            0,
            "cuwhapp-user-u1-api\trunning\tpro\ncuwhapp-user-u1-warmer\trunning\tpro\ncuwhapp-user-u1-campaign\trunning\tpro\n",
            "",
        );

        let data = router(&transport)
            .route(
                Command::CreateUserContainer {
                    user_id: UserId::parse("u1").unwrap(),
                    plan_type: PlanType::Pro,
                },
                deadline(),
            )
            .await
            .unwrap();
        let data: LifecycleData = serde_json::from_value(data).unwrap();

        assert_eq!(data.state, ContainerState::Running);
        assert_eq!(data.containers.len(), 3);
        assert!(data.containers[0].url.starts_with("http://10.0.0.9:4"));
        assert!(transport.roles().iter().all(|role| *role == HostRole::User));
    }

    #[tokio::test]
    async fn test_waha_commands_only_touch_waha_host() {
        let transport = ScriptedTransport::new();
        transport
            .on("docker ps -a --filter name=cuwhapp-waha-", 0, "cuwhapp-waha-1\trunning\t1\t100\n", "")
            .on("/api/sessions", 0, &sessions_json(30), "");

        let data = router(&transport)
            .route(Command::ListWaha, deadline())
            .await
            .unwrap();
        let data: ListWahaData = serde_json::from_value(data).unwrap();

        assert_eq!(data.summary.total_instances, 1);
        assert_eq!(data.summary.total_available, 70);
        assert_eq!(data.instances[0].endpoint, "http://10.0.0.3:4500");
        assert!(transport.roles().iter().all(|role| *role == HostRole::Waha));
    }

    #[tokio::test]
    async fn test_find_available_directive_shape() {
        let transport = ScriptedTransport::new();
        transport.on("docker ps", 0, "", "");

        let data = router(&transport)
            .route(Command::FindAvailableWaha { sessions_needed: 250 }, deadline())
            .await
            .unwrap();

        assert_eq!(data["outcome"], "create_new");
        assert_eq!(data["action_needed"], "create_waha");
        assert_eq!(data["min_max_sessions"], 250);
        assert_eq!(data["suggested_max_sessions"], 250);
    }

    #[tokio::test]
    async fn test_delete_of_absent_user_succeeds() {
        let transport = ScriptedTransport::new();

        let data = router(&transport)
            .route(
                Command::DeleteUserContainer {
                    user_id: UserId::parse("ghost").unwrap(),
                },
                deadline(),
            )
            .await
            .unwrap();

        assert_eq!(data["state"], "absent");
        assert_eq!(data["changed"], false);
        assert_eq!(data["message"], "No containers for user ghost");
    }
}
