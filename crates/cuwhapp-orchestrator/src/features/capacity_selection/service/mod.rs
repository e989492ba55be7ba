use std::sync::Arc;

use cuwhapp_core::{select_instance, Capacity, Selection, SelectionPolicy, SessionRequest};
use tracing::{info, warn};

use crate::features::waha_registry::service::WahaRegistryService;
use crate::shared::error::{OrchestratorError, OrchestratorResult};
use crate::shared::types::{Deadline, WahaInstance};

/// Places session demand on existing WAHA instances.
///
/// Never creates instances itself; when nothing fits it answers with a
/// directive describing the instance the caller should create.
pub struct CapacitySelector {
    registry: Arc<WahaRegistryService>,
    policy: SelectionPolicy,
}

impl CapacitySelector {
    pub fn new(registry: Arc<WahaRegistryService>, policy: SelectionPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    pub async fn find_available(
        &self,
        sessions_needed: i64,
        deadline: Deadline,
    ) -> OrchestratorResult<Selection> {
        let request = SessionRequest::new(sessions_needed)?;
        let instances = self.registry.collect_instances(deadline).await?;

        match select_instance(&instances, request, self.policy) {
            Selection::Instance(chosen) => {
                let required = self.policy.required_free(request);
                let capacity = self.verify_assignment(&chosen, required, deadline).await?;

                info!(id = chosen.id, remaining = capacity.remaining(), sessions_needed, "Selected WAHA instance");
                Ok(Selection::Instance(WahaInstance {
                    used_sessions: capacity.used,
                    ..chosen
                }))
            }
            Selection::CreateNew(directive) => {
                info!(
                    sessions_needed,
                    min_max_sessions = directive.min_max_sessions,
                    instances = instances.len(),
                    "No WAHA instance fits, new instance required"
                );
                Ok(Selection::CreateNew(directive))
            }
        }
    }

    /// Re-reads the capacity of `instance` and checks it still holds `pending`
    /// more sessions.
    ///
    /// Called with the request size before placement, and with `0` after the
    /// caller assigned sessions to catch a concurrent overcommit.
    pub async fn verify_assignment(
        &self,
        instance: &WahaInstance,
        pending: u32,
        deadline: Deadline,
    ) -> OrchestratorResult<Capacity> {
        let capacity = self.registry.get_capacity(instance, deadline).await?;
        if capacity.is_overcommitted() {
            warn!(id = instance.id, used = capacity.used, max = capacity.max, "WAHA instance overcommitted");
            return Err(OrchestratorError::CapacityExceeded(format!(
                "instance {} holds {} sessions but allows {}",
                instance.id, capacity.used, capacity.max
            )));
        }
        if !capacity.can_absorb(pending) {
            warn!(
                id = instance.id,
                used = capacity.used,
                max = capacity.max,
                pending,
                "WAHA instance filled up before placement"
            );
            return Err(OrchestratorError::CapacityExceeded(format!(
                "instance {} now has {} of {} sessions in use, {} needed",
                instance.id, capacity.used, capacity.max, pending
            )));
        }
        Ok(capacity)
    }
}
