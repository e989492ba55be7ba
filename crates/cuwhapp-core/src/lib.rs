pub mod capacity;
pub mod container_spec;
pub mod lifecycle;
pub mod waha;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub use capacity::{
    select_instance, Capacity, CreateNewDirective, Selection, SelectionPolicy, SelectionStrategy,
    SessionRequest,
};
pub use container_spec::{ContainerSpec, ResourceLimits, ServiceKind, ServiceSpec};
pub use lifecycle::{ContainerState, LifecycleIntent, ObservedService, RuntimeStatus, Transition};
pub use waha::WahaInstance;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Invalid user id: {0}")]
    InvalidUserId(String),
    #[error("Invalid plan type: {0}")]
    InvalidPlanType(String),
    #[error("Invalid session count: {0}")]
    InvalidSessionCount(String),
    #[error("Invalid host configuration: {0}")]
    InvalidHost(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Which of the two fixed remote hosts a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostRole {
    Waha,
    User,
}

impl HostRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostRole::Waha => "waha",
            HostRole::User => "user",
        }
    }
}

impl fmt::Display for HostRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secret half of a host credential pair
#[derive(Clone, PartialEq, Eq)]
pub enum HostSecret {
    KeyFile(PathBuf),
    Password(String),
}

impl fmt::Debug for HostSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostSecret::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
            HostSecret::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: HostSecret,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: HostSecret) -> Self {
        Self {
            username: username.into(),
            secret,
        }
    }
}

/// Immutable description of a remote host, loaded once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub role: HostRole,
    pub address: String,
    pub port: u16,
    pub credentials: Credentials,
}

impl Host {
    pub const DEFAULT_SSH_PORT: u16 = 22;

    pub fn new(
        role: HostRole,
        address: impl Into<String>,
        port: u16,
        credentials: Credentials,
    ) -> Result<Self> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(CoreError::InvalidHost(format!(
                "{} host address cannot be empty",
                role
            )));
        }
        if credentials.username.trim().is_empty() {
            return Err(CoreError::InvalidHost(format!(
                "{} host username cannot be empty",
                role
            )));
        }

        Ok(Self {
            role,
            address,
            port,
            credentials,
        })
    }

    /// `user@address` destination understood by the ssh client
    pub fn destination(&self) -> String {
        format!("{}@{}", self.credentials.username, self.address)
    }
}

/// Tenant identifier, validated so it can be embedded in remote resource names
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub const MAX_LEN: usize = 64;

    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(CoreError::InvalidUserId(
                "user_id cannot be empty".to_string(),
            ));
        }
        if raw.len() > Self::MAX_LEN {
            return Err(CoreError::InvalidUserId(format!(
                "user_id exceeds {} characters",
                Self::MAX_LEN
            )));
        }
        if !raw.starts_with(|c: char| c.is_ascii_alphanumeric()) {
            return Err(CoreError::InvalidUserId(format!(
                "user_id '{}' must start with a letter or digit",
                raw
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(CoreError::InvalidUserId(format!(
                "user_id contains disallowed character {:?}",
                bad
            )));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    #[default]
    Free,
    Basic,
    Pro,
    Enterprise,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Free => "free",
            PlanType::Basic => "basic",
            PlanType::Pro => "pro",
            PlanType::Enterprise => "enterprise",
        }
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, PlanType::Free)
    }
}

impl FromStr for PlanType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "free" => Ok(PlanType::Free),
            "basic" => Ok(PlanType::Basic),
            "pro" => Ok(PlanType::Pro),
            "enterprise" => Ok(PlanType::Enterprise),
            other => Err(CoreError::InvalidPlanType(other.to_string())),
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed action produced by the inbound adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CreateUserContainer { user_id: UserId, plan_type: PlanType },
    StopUserContainer { user_id: UserId },
    RestartUserContainer { user_id: UserId },
    DeleteUserContainer { user_id: UserId },
    CreateWaha { max_sessions: u32 },
    ListWaha,
    FindAvailableWaha { sessions_needed: i64 },
}

impl Command {
    pub fn action_name(&self) -> &'static str {
        match self {
            Command::CreateUserContainer { .. } => "create",
            Command::StopUserContainer { .. } => "stop",
            Command::RestartUserContainer { .. } => "restart",
            Command::DeleteUserContainer { .. } => "delete",
            Command::CreateWaha { .. } => "create_waha",
            Command::ListWaha => "list_waha",
            Command::FindAvailableWaha { .. } => "find_available_waha",
        }
    }

    pub fn target_role(&self) -> HostRole {
        match self {
            Command::CreateUserContainer { .. }
            | Command::StopUserContainer { .. }
            | Command::RestartUserContainer { .. }
            | Command::DeleteUserContainer { .. } => HostRole::User,
            Command::CreateWaha { .. }
            | Command::ListWaha
            | Command::FindAvailableWaha { .. } => HostRole::Waha,
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Command::CreateUserContainer { user_id, .. }
            | Command::StopUserContainer { user_id }
            | Command::RestartUserContainer { user_id }
            | Command::DeleteUserContainer { user_id } => Some(user_id),
            _ => None,
        }
    }
}

/// Output of one remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
    }
}

/// Stable machine-readable error category returned to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transport,
    Remote,
    NotFound,
    InvalidArgument,
    CapacityExceeded,
    ProvisionTimeout,
    UnsupportedAction,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transport => "transport",
            ErrorCategory::Remote => "remote",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::InvalidArgument => "invalid_argument",
            ErrorCategory::CapacityExceeded => "capacity_exceeded",
            ErrorCategory::ProvisionTimeout => "provision_timeout",
            ErrorCategory::UnsupportedAction => "unsupported_action",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Whether a caller may retry the same command unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Transport | ErrorCategory::CapacityExceeded | ErrorCategory::Unknown
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
}

impl ActionResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            category: None,
        }
    }

    pub fn failure(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            category: Some(category),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}
