use std::sync::Arc;
use std::time::{Duration, Instant};

use cuwhapp_core::ActionResponse;
use cuwhapp_proto::conversion::parse_action;
use serde_json::json;
use tracing::{info, warn};

use crate::features::command_routing::service::CommandRouterService;
use crate::features::observability::controller::ObservabilityController;
use crate::shared::error::OrchestratorError;
use crate::shared::locks::UserLocks;
use crate::shared::types::{Command, ContainerState, Deadline};

/// Entry point for one invocation: decode, route, map to a response envelope.
///
/// Lifecycle commands for the same user are serialized in-process.
pub struct CommandRouterController {
    service: Arc<CommandRouterService>,
    observability: Arc<ObservabilityController>,
    user_locks: UserLocks,
    invocation_budget: Duration,
}

impl CommandRouterController {
    pub fn new(
        service: Arc<CommandRouterService>,
        observability: Arc<ObservabilityController>,
        invocation_budget: Duration,
    ) -> Self {
        Self {
            service,
            observability,
            user_locks: UserLocks::new(),
            invocation_budget,
        }
    }

    /// Decodes a raw action body and handles it
    pub async fn handle_raw(&self, body: &[u8]) -> ActionResponse {
        match parse_action(body) {
            Ok(command) => self.handle(command).await,
            Err(error) => {
                warn!(error = %error, "Rejected action");
                let response = ActionResponse::from(error);
                self.record("invalid", &response, 0.0);
                response
            }
        }
    }

    pub async fn handle(&self, command: Command) -> ActionResponse {
        let action = command.action_name();
        let user_id = command.user_id().cloned();
        let is_create = matches!(command, Command::CreateUserContainer { .. });
        let deadline = Deadline::after(self.invocation_budget);
        let started = Instant::now();

        let _guard = match user_id.as_ref() {
            Some(user_id) => Some(self.user_locks.lock(user_id).await),
            None => None,
        };

        let response = match self.service.route(command, deadline).await {
            Ok(data) => ActionResponse::ok(data),
            Err(error) => {
                warn!(action, user_id = ?user_id.as_ref().map(|u| u.as_str()), category = %error.category(), error = %error, "Action failed");
                let failed_create = is_create && matches!(error, OrchestratorError::Remote { .. });
                let response = ActionResponse::from(error);
                match user_id.as_ref() {
                    Some(user_id) if failed_create => response.with_data(json!({
                        "user_id": user_id.as_str(),
                        "state": ContainerState::Failed,
                    })),
                    _ => response,
                }
            }
        };

        let elapsed = started.elapsed();
        self.record(action, &response, elapsed.as_secs_f64());
        info!(
            action,
            success = response.success,
            duration_ms = elapsed.as_millis() as u64,
            "Action handled"
        );
        response
    }

    fn record(&self, action: &str, response: &ActionResponse, seconds: f64) {
        let category = response.category.map(|c| c.as_str()).unwrap_or("ok");
        self.observability.record_action(action, category, seconds);
    }
}
