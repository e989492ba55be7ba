//! Scripted transport and fixtures shared by feature tests.

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::features::observability::controller::ObservabilityController;
use crate::features::remote_execution::repo::RemoteTransport;
use crate::features::remote_execution::service::{RemoteExecutor, RetryPolicy};
use crate::shared::error::TransportError;
use crate::shared::shell::RemoteCommand;
use crate::shared::types::{ExecutionResult, Host, HostRole};
use cuwhapp_core::{Credentials, HostSecret};

pub fn ok_result(stdout: &str) -> ExecutionResult {
    exit_result(0, stdout, "")
}

pub fn exit_result(exit_code: i32, stdout: &str, stderr: &str) -> ExecutionResult {
    ExecutionResult {
        exit_code,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        duration: Duration::from_millis(1),
        started_at: Utc::now(),
    }
}

pub fn user_host() -> Host {
    Host::new(
        HostRole::User,
        "10.0.0.9",
        22,
        Credentials::new("root", HostSecret::KeyFile(PathBuf::from("/keys/user"))),
    )
    .unwrap()
}

pub fn waha_host() -> Host {
    Host::new(
        HostRole::Waha,
        "10.0.0.3",
        22,
        Credentials::new("root", HostSecret::Password("secret".to_string())),
    )
    .unwrap()
}

/// JSON body of `/api/sessions` holding `count` sessions
pub fn sessions_json(count: usize) -> String {
    let sessions: Vec<serde_json::Value> = (0..count)
        .map(|i| serde_json::json!({"name": format!("session-{i}"), "status": "WORKING"}))
        .collect();
    serde_json::Value::Array(sessions).to_string()
}

#[derive(Debug, Clone)]
pub enum Reply {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    Fail(TransportError),
}

struct Rule {
    needle: String,
    reply: Reply,
    once: bool,
}

/// Transport answering from a list of substring rules.
///
/// Rules are matched in insertion order; `once` rules are consumed by their
/// first match. Commands without a matching rule succeed with empty output.
#[derive(Default)]
pub struct ScriptedTransport {
    rules: Mutex<Vec<Rule>>,
    log: Mutex<Vec<(HostRole, String)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, needle: &str, code: i32, stdout: &str, stderr: &str) -> &Self {
        self.push(needle, Self::exit(code, stdout, stderr), false)
    }

    pub fn once(&self, needle: &str, code: i32, stdout: &str, stderr: &str) -> &Self {
        self.push(needle, Self::exit(code, stdout, stderr), true)
    }

    pub fn fail_once(&self, needle: &str, error: TransportError) -> &Self {
        self.push(needle, Reply::Fail(error), true)
    }

    pub fn commands(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }

    pub fn commands_matching(&self, needle: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|cmd| cmd.contains(needle))
            .collect()
    }

    pub fn roles(&self) -> Vec<HostRole> {
        self.log.lock().unwrap().iter().map(|(role, _)| *role).collect()
    }

    fn exit(code: i32, stdout: &str, stderr: &str) -> Reply {
        Reply::Exit {
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    fn push(&self, needle: &str, reply: Reply, once: bool) -> &Self {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.to_string(),
            reply,
            once,
        });
        self
    }

    fn answer(&self, command: &str) -> Reply {
        let mut rules = self.rules.lock().unwrap();
        let position = rules.iter().position(|rule| command.contains(&rule.needle));
        match position {
            Some(index) if rules[index].once => rules.remove(index).reply,
            Some(index) => rules[index].reply.clone(),
            None => Self::exit(0, "", ""),
        }
    }
}

#[async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn run(
        &self,
        host: &Host,
        command: &RemoteCommand,
        _timeout: Duration,
    ) -> Result<ExecutionResult, TransportError> {
        self.log
            .lock()
            .unwrap()
            .push((host.role, command.as_str().to_string()));

        match self.answer(command.as_str()) {
            Reply::Exit {
                code,
                stdout,
                stderr,
            } => Ok(exit_result(code, &stdout, &stderr)),
            Reply::Fail(error) => Err(error),
        }
    }
}

pub fn test_observability() -> Arc<ObservabilityController> {
    Arc::new(ObservabilityController::with_new_registry().unwrap())
}

pub fn test_executor(transport: Arc<dyn RemoteTransport>) -> Arc<RemoteExecutor> {
    Arc::new(RemoteExecutor::new(
        transport,
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            multiplier: 2.0,
            jitter: 0.0,
        },
        Duration::from_secs(5),
        test_observability(),
    ))
}
