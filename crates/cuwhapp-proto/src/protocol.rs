// Action messages exchanged between callers and the orchestrator.
// Requests keep the loose JSON shape callers already send; responses are typed.

use cuwhapp_core::lifecycle::ContainerState;
use cuwhapp_core::{ActionResponse, ErrorCategory, ServiceKind, WahaInstance};
use serde::{Deserialize, Serialize};

// Version: 1.0.0

pub const ACTIONS: [&str; 8] = [
    "create",
    "create_user_container",
    "stop",
    "restart",
    "delete",
    "create_waha",
    "list_waha",
    "find_available_waha",
];

/// Raw inbound action as posted by callers
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActionRequest {
    #[serde(default)]
    pub action: Option<String>,
    /// String or integer; validated during conversion
    #[serde(default)]
    pub user_id: Option<serde_json::Value>,
    #[serde(default)]
    pub plan_type: Option<String>,
    #[serde(default)]
    pub max_sessions: Option<i64>,
    #[serde(default)]
    pub sessions_needed: Option<i64>,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(serde_json::Value::String(user_id.into()));
        self
    }
}

// Lifecycle responses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceEndpoint {
    pub service: ServiceKind,
    pub container_name: String,
    pub host_port: u16,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleData {
    pub user_id: String,
    pub previous: ContainerState,
    pub state: ContainerState,
    pub changed: bool,
    pub containers: Vec<ServiceEndpoint>,
    pub message: String,
}

// WAHA responses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WahaInstanceView {
    pub id: u32,
    pub container_name: String,
    pub port: u16,
    pub endpoint: String,
    pub max_sessions: u32,
    pub used_sessions: u32,
    pub available_sessions: u32,
}

impl WahaInstanceView {
    pub fn new(instance: &WahaInstance, host_address: &str) -> Self {
        Self {
            id: instance.id,
            container_name: instance.container_name(),
            port: instance.host_port,
            endpoint: format!("http://{}:{}", host_address, instance.host_port),
            max_sessions: instance.max_sessions,
            used_sessions: instance.used_sessions,
            available_sessions: instance.remaining(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WahaSummary {
    pub total_instances: usize,
    pub total_capacity: u64,
    pub total_used: u64,
    pub total_available: u64,
}

impl WahaSummary {
    pub fn from_instances(instances: &[WahaInstance]) -> Self {
        instances.iter().fold(Self::default(), |mut acc, instance| {
            acc.total_instances += 1;
            acc.total_capacity += u64::from(instance.max_sessions);
            acc.total_used += u64::from(instance.used_sessions);
            acc.total_available += u64::from(instance.remaining());
            acc
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListWahaData {
    pub instances: Vec<WahaInstanceView>,
    pub summary: WahaSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateWahaData {
    pub instance: WahaInstanceView,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FindAvailableData {
    UseExisting {
        instance: WahaInstanceView,
    },
    CreateNew {
        /// Action the caller should issue next
        action_needed: String,
        min_max_sessions: u32,
        suggested_max_sessions: u32,
        reason: String,
    },
}

/// HTTP status for a response envelope
pub fn http_status(response: &ActionResponse) -> u16 {
    match response.category {
        None if response.success => 200,
        None => 500,
        Some(category) => status_for_category(category),
    }
}

pub fn status_for_category(category: ErrorCategory) -> u16 {
    match category {
        ErrorCategory::InvalidArgument | ErrorCategory::UnsupportedAction => 400,
        ErrorCategory::NotFound => 404,
        ErrorCategory::CapacityExceeded => 409,
        ErrorCategory::Transport | ErrorCategory::Remote => 502,
        ErrorCategory::ProvisionTimeout | ErrorCategory::Unknown => 504,
    }
}
