pub mod config;
pub mod features;
pub mod server;
pub mod shared;

use std::sync::Arc;

use axum::Router;

use crate::config::OrchestratorConfig;
use crate::features::capacity_selection::service::CapacitySelector;
use crate::features::command_routing::controller::CommandRouterController;
use crate::features::command_routing::service::CommandRouterService;
use crate::features::container_lifecycle::repo::UserHostRepository;
use crate::features::container_lifecycle::service::ContainerLifecycleService;
use crate::features::observability::controller::ObservabilityController;
use crate::features::remote_execution::repo::RemoteTransport;
use crate::features::remote_execution::service::RemoteExecutor;
use crate::features::waha_registry::repo::WahaHostRepository;
use crate::features::waha_registry::service::WahaRegistryService;
use crate::server::AppState;

/// Fully wired orchestrator: one executor shared by both host repositories
pub struct Orchestrator {
    controller: Arc<CommandRouterController>,
    observability: Arc<ObservabilityController>,
}

impl Orchestrator {
    pub fn build(
        config: &OrchestratorConfig,
        transport: Arc<dyn RemoteTransport>,
        observability: Arc<ObservabilityController>,
    ) -> Self {
        let executor = Arc::new(RemoteExecutor::new(
            transport,
            config.retry.clone(),
            config.command_timeout,
            observability.clone(),
        ));

        let lifecycle = Arc::new(ContainerLifecycleService::new(
            Arc::new(UserHostRepository::new(executor.clone(), config.user_host.clone())),
            config.stop_grace,
        ));
        let registry = Arc::new(WahaRegistryService::new(
            Arc::new(WahaHostRepository::new(executor, config.waha_host.clone())),
            config.readiness,
            observability.clone(),
        ));
        let selector = Arc::new(CapacitySelector::new(registry.clone(), config.selection));

        let service = Arc::new(CommandRouterService::new(lifecycle, registry, selector));
        let controller = Arc::new(CommandRouterController::new(
            service,
            observability.clone(),
            config.invocation_budget,
        ));

        Self {
            controller,
            observability,
        }
    }

    pub fn app(&self) -> Router {
        server::router(AppState {
            controller: self.controller.clone(),
            observability: self.observability.clone(),
        })
    }
}
