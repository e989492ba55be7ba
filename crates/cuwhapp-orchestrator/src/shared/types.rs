pub use cuwhapp_core::{
    Command, ContainerState, ExecutionResult, Host, HostRole, PlanType, UserId, WahaInstance,
};

use std::time::Duration;
use tokio::time::Instant;

/// Wall-clock budget shared by every remote call made for one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now() + budget,
        }
    }

    pub fn at(expires_at: Instant) -> Self {
        Self { expires_at }
    }

    /// Time left, or `None` once the deadline has passed
    pub fn remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        if now >= self.expires_at {
            None
        } else {
            Some(self.expires_at - now)
        }
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_none()
    }

    /// Caps a per-call timeout to what is left of the budget
    pub fn cap(&self, timeout: Duration) -> Option<Duration> {
        self.remaining().map(|left| left.min(timeout))
    }
}
