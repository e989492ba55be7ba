//! Per-tenant lifecycle state machine.
//!
//! The remote host is the only source of truth. `ContainerState::derive`
//! reduces one probe of the tenant's service containers to a single state and
//! `ContainerState::plan` decides what an intent has to do from there.

use crate::container_spec::ServiceKind;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Absent,
    Creating,
    Running,
    Stopped,
    Deleting,
    Failed,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Absent => "absent",
            ContainerState::Creating => "creating",
            ContainerState::Running => "running",
            ContainerState::Stopped => "stopped",
            ContainerState::Deleting => "deleting",
            ContainerState::Failed => "failed",
        }
    }

    /// Collapse the observed service containers into one tenant state.
    ///
    /// All services running is `Running`, all present and none running is
    /// `Stopped`, nothing present is `Absent`, and every other mix is `Failed`.
    pub fn derive(observed: &[ObservedService]) -> Self {
        let present: Vec<&ObservedService> = ServiceKind::ALL
            .iter()
            .filter_map(|kind| observed.iter().find(|o| o.kind == *kind))
            .collect();

        if present.is_empty() {
            return ContainerState::Absent;
        }

        let complete = present.len() == ServiceKind::ALL.len();
        let running = present.iter().filter(|o| o.status.is_running()).count();

        if complete && running == present.len() {
            ContainerState::Running
        } else if complete && running == 0 && present.iter().all(|o| o.status.is_settled()) {
            ContainerState::Stopped
        } else {
            ContainerState::Failed
        }
    }

    pub fn plan(self, intent: LifecycleIntent) -> Transition {
        use ContainerState::*;
        use LifecycleIntent::*;

        match (intent, self) {
            (Create, Running) => Transition::NoOp,
            (Create, _) => Transition::Proceed {
                via: Creating,
                target: Running,
            },
            (Stop, Running) | (Stop, Failed) => Transition::Proceed {
                via: Stopped,
                target: Stopped,
            },
            (Stop, _) => Transition::NoOp,
            (Restart, Absent) => Transition::NotFound,
            (Restart, _) => Transition::Proceed {
                via: Creating,
                target: Running,
            },
            (Delete, _) => Transition::Proceed {
                via: Deleting,
                target: Absent,
            },
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleIntent {
    Create,
    Stop,
    Restart,
    Delete,
}

impl LifecycleIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleIntent::Create => "create",
            LifecycleIntent::Stop => "stop",
            LifecycleIntent::Restart => "restart",
            LifecycleIntent::Delete => "delete",
        }
    }
}

impl fmt::Display for LifecycleIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an intent must do given the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Already in the intent's target state; issue no mutating command
    NoOp,
    Proceed {
        via: ContainerState,
        target: ContainerState,
    },
    NotFound,
}

/// Docker's `State` column for one container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

impl RuntimeStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" => Some(RuntimeStatus::Created),
            "running" => Some(RuntimeStatus::Running),
            "paused" => Some(RuntimeStatus::Paused),
            "restarting" => Some(RuntimeStatus::Restarting),
            "removing" => Some(RuntimeStatus::Removing),
            "exited" => Some(RuntimeStatus::Exited),
            "dead" => Some(RuntimeStatus::Dead),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, RuntimeStatus::Running)
    }

    /// Stopped cleanly and able to be started again
    pub fn is_settled(&self) -> bool {
        matches!(self, RuntimeStatus::Created | RuntimeStatus::Exited)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedService {
    pub kind: ServiceKind,
    pub status: RuntimeStatus,
}
