use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{info, warn};

use crate::features::observability::controller::ObservabilityController;
use crate::features::remote_execution::repo::RemoteTransport;
use crate::shared::error::{OrchestratorError, OrchestratorResult, TransportError};
use crate::shared::shell::RemoteCommand;
use crate::shared::types::{Deadline, ExecutionResult, Host};

/// Bounded exponential backoff for transient transport failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Upper bound of the random extra delay, as a fraction of the base delay
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        base.mul_f64(1.0 + extra)
    }
}

/// Executes remote commands with retry, per-attempt timeout and deadline handling
pub struct RemoteExecutor {
    transport: Arc<dyn RemoteTransport>,
    policy: RetryPolicy,
    command_timeout: Duration,
    observability: Arc<ObservabilityController>,
}

impl RemoteExecutor {
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        policy: RetryPolicy,
        command_timeout: Duration,
        observability: Arc<ObservabilityController>,
    ) -> Self {
        Self {
            transport,
            policy,
            command_timeout,
            observability,
        }
    }

    /// Runs `command`, returning the result for any remote exit status.
    ///
    /// Only transport failures are retried. A deadline that runs out while a
    /// command is in flight, or before the next attempt, yields `Unknown`.
    pub async fn execute(
        &self,
        host: &Host,
        command: &RemoteCommand,
        deadline: Deadline,
    ) -> OrchestratorResult<ExecutionResult> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let timeout = deadline.cap(self.command_timeout).ok_or_else(|| {
                OrchestratorError::Unknown(format!(
                    "deadline exceeded before attempt {} on {} host",
                    attempt, host.role
                ))
            })?;

            let started = Instant::now();
            let outcome = self.transport.run(host, command, timeout).await;
            let elapsed = started.elapsed();

            match outcome {
                Ok(result) => {
                    let label = if result.success() {
                        "success"
                    } else {
                        "nonzero_exit"
                    };
                    self.observability
                        .record_remote_command(host.role, label, elapsed.as_secs_f64());
                    info!(
                        host = %host.address,
                        role = %host.role,
                        attempt,
                        exit_code = result.exit_code,
                        duration_ms = elapsed.as_millis() as u64,
                        "Remote command finished"
                    );
                    return Ok(result);
                }
                Err(error) => {
                    self.observability.record_remote_command(
                        host.role,
                        "transport_error",
                        elapsed.as_secs_f64(),
                    );

                    if matches!(error, TransportError::Timeout(_)) && deadline.is_expired() {
                        warn!(host = %host.address, role = %host.role, attempt, "Deadline exceeded while command in flight");
                        return Err(OrchestratorError::Unknown(format!(
                            "deadline exceeded while command was in flight on {} host",
                            host.role
                        )));
                    }

                    if !error.is_transient() || attempt >= self.policy.max_attempts {
                        warn!(
                            host = %host.address,
                            role = %host.role,
                            attempt,
                            error = %error,
                            "Remote command failed"
                        );
                        return Err(OrchestratorError::Transport(error));
                    }

                    let delay = self.policy.delay_for_attempt(attempt);
                    match deadline.remaining() {
                        Some(left) if left > delay => {}
                        _ => {
                            return Err(OrchestratorError::Unknown(format!(
                                "deadline exceeded before retrying after: {}",
                                error
                            )))
                        }
                    }

                    warn!(
                        host = %host.address,
                        role = %host.role,
                        attempt,
                        error = %error,
                        delay_ms = delay.as_millis() as u64,
                        "Transient transport failure, retrying"
                    );
                    self.observability.record_retry(host.role);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Like [`execute`](Self::execute) but a non-zero exit becomes `Remote`
    pub async fn execute_checked(
        &self,
        host: &Host,
        command: &RemoteCommand,
        deadline: Deadline,
    ) -> OrchestratorResult<ExecutionResult> {
        let result = self.execute(host, command, deadline).await?;
        if result.success() {
            Ok(result)
        } else {
            Err(OrchestratorError::Remote {
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            })
        }
    }
}
