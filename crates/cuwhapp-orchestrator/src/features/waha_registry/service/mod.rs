use std::sync::Arc;
use std::time::Duration;

use cuwhapp_core::waha;
use cuwhapp_core::Capacity;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::features::observability::controller::ObservabilityController;
use crate::features::waha_registry::repo::{ScannedInstance, WahaHostRepository};
use crate::shared::error::{OrchestratorError, OrchestratorResult};
use crate::shared::types::{Deadline, WahaInstance};

/// How long a new instance may take to answer its health endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(2),
        }
    }
}

/// Lazy enumeration of running instances in ascending id order.
///
/// The container scan already happened; every `next()` costs one session
/// query. Instances whose query fails are skipped.
pub struct InstanceScan<'a> {
    repo: &'a WahaHostRepository,
    pending: std::vec::IntoIter<ScannedInstance>,
    deadline: Deadline,
}

impl InstanceScan<'_> {
    pub async fn next(&mut self) -> OrchestratorResult<Option<WahaInstance>> {
        for scanned in self.pending.by_ref() {
            let Some(host_port) = waha::host_port(scanned.id) else {
                warn!(id = scanned.id, "WAHA instance id outside the port range");
                continue;
            };

            match self.repo.session_count(host_port, self.deadline).await {
                Ok(used_sessions) => {
                    return Ok(Some(WahaInstance {
                        id: scanned.id,
                        host_port,
                        max_sessions: scanned.max_sessions,
                        used_sessions,
                    }))
                }
                Err(OrchestratorError::Unknown(message)) => {
                    return Err(OrchestratorError::Unknown(message))
                }
                Err(error) => {
                    warn!(id = scanned.id, port = host_port, error = %error, "Skipping WAHA instance, session query failed");
                }
            }
        }

        Ok(None)
    }
}

pub struct WahaRegistryService {
    repo: Arc<WahaHostRepository>,
    readiness: ReadinessPolicy,
    create_lock: Mutex<()>,
    observability: Arc<ObservabilityController>,
}

impl WahaRegistryService {
    pub fn new(
        repo: Arc<WahaHostRepository>,
        readiness: ReadinessPolicy,
        observability: Arc<ObservabilityController>,
    ) -> Self {
        Self {
            repo,
            readiness,
            create_lock: Mutex::new(()),
            observability,
        }
    }

    pub fn host_address(&self) -> &str {
        &self.repo.host().address
    }

    pub async fn list_instances(&self, deadline: Deadline) -> OrchestratorResult<InstanceScan<'_>> {
        let scanned = self.repo.scan(deadline).await?;
        let running: Vec<ScannedInstance> = scanned.into_iter().filter(|i| i.running).collect();
        debug!(count = running.len(), "Scanned running WAHA instances");

        Ok(InstanceScan {
            repo: &self.repo,
            pending: running.into_iter(),
            deadline,
        })
    }

    /// Drains a fresh scan into a vector
    pub async fn collect_instances(&self, deadline: Deadline) -> OrchestratorResult<Vec<WahaInstance>> {
        let mut scan = self.list_instances(deadline).await?;
        let mut instances = Vec::new();
        while let Some(instance) = scan.next().await? {
            instances.push(instance);
        }

        self.observability.set_waha_instances(instances.len());
        Ok(instances)
    }

    /// Re-queries the live session count of one instance
    pub async fn get_capacity(
        &self,
        instance: &WahaInstance,
        deadline: Deadline,
    ) -> OrchestratorResult<Capacity> {
        let used = self.repo.session_count(instance.host_port, deadline).await?;
        Ok(Capacity {
            used,
            max: instance.max_sessions,
        })
    }

    /// Starts a new instance on the lowest free id and waits until it is healthy.
    ///
    /// Creations within this process are serialized.
    pub async fn create_instance(
        &self,
        max_sessions: u32,
        deadline: Deadline,
    ) -> OrchestratorResult<WahaInstance> {
        if max_sessions == 0 {
            return Err(OrchestratorError::InvalidArgument(
                "max_sessions must be at least 1".to_string(),
            ));
        }

        let _guard = self.create_lock.lock().await;

        let existing = self.repo.scan(deadline).await?;
        let id = waha::lowest_free_id(existing.iter().map(|i| i.id)).ok_or_else(|| {
            OrchestratorError::CapacityExceeded(format!(
                "all {} WAHA instance ids are in use",
                waha::WAHA_MAX_ID
            ))
        })?;
        let host_port = waha::host_port(id).ok_or_else(|| {
            OrchestratorError::CapacityExceeded(format!("no host port for WAHA instance {}", id))
        })?;

        info!(id, port = host_port, max_sessions, "Creating WAHA instance");
        self.repo.ensure_network(deadline).await?;
        self.repo
            .run_instance(id, host_port, max_sessions, deadline)
            .await?;
        self.wait_ready(id, host_port, deadline).await?;
        info!(id, port = host_port, "WAHA instance ready");

        Ok(WahaInstance {
            id,
            host_port,
            max_sessions,
            used_sessions: 0,
        })
    }

    async fn wait_ready(&self, id: u32, host_port: u16, deadline: Deadline) -> OrchestratorResult<()> {
        let ready_by = Deadline::after(self.readiness.timeout);
        let mut probes = 0u32;

        loop {
            probes += 1;
            if self.repo.is_healthy(host_port, deadline).await? {
                debug!(id, probes, "Readiness probe succeeded");
                return Ok(());
            }

            match ready_by.remaining() {
                Some(left) => tokio::time::sleep(left.min(self.readiness.interval)).await,
                None => {
                    warn!(id, port = host_port, probes, "WAHA instance never became healthy");
                    return Err(OrchestratorError::ProvisionTimeout(format!(
                        "WAHA instance {} not healthy after {:?}",
                        id, self.readiness.timeout
                    )));
                }
            }
        }
    }
}
