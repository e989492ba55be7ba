use async_trait::async_trait;
use chrono::Utc;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command as ProcessCommand;
use tracing::debug;

use crate::shared::error::TransportError;
use crate::shared::shell::RemoteCommand;
use crate::shared::types::{ExecutionResult, Host};
use cuwhapp_core::HostSecret;

/// Exit status the OpenSSH client reserves for its own failures
pub const SSH_FAILURE_EXIT: i32 = 255;

// sshpass: 5 = invalid password, 6 = unknown host key
const SSHPASS_AUTH_EXIT: i32 = 5;
const SSHPASS_HOST_KEY_EXIT: i32 = 6;

/// Runs one command on one host. Implementations must honor `timeout`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn run(
        &self,
        host: &Host,
        command: &RemoteCommand,
        timeout: Duration,
    ) -> Result<ExecutionResult, TransportError>;
}

/// Transport that shells out to the system OpenSSH client
#[derive(Debug, Clone)]
pub struct OpenSshTransport {
    connect_timeout: Duration,
}

impl OpenSshTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for OpenSshTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

/// Program, arguments and environment for one ssh invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshInvocation {
    pub program: &'static str,
    pub args: Vec<String>,
    pub env: Vec<(&'static str, String)>,
}

impl SshInvocation {
    pub fn build(host: &Host, command: &RemoteCommand, connect_timeout: Duration) -> Self {
        let mut ssh_args = vec![
            "-p".to_string(),
            host.port.to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
        ];

        match &host.credentials.secret {
            HostSecret::KeyFile(path) => {
                ssh_args.extend([
                    "-o".to_string(),
                    "BatchMode=yes".to_string(),
                    "-o".to_string(),
                    "IdentitiesOnly=yes".to_string(),
                    "-i".to_string(),
                    path.display().to_string(),
                ]);
                ssh_args.push(host.destination());
                ssh_args.push(command.as_str().to_string());

                Self {
                    program: "ssh",
                    args: ssh_args,
                    env: Vec::new(),
                }
            }
            HostSecret::Password(password) => {
                ssh_args.extend([
                    "-o".to_string(),
                    "PubkeyAuthentication=no".to_string(),
                    "-o".to_string(),
                    "NumberOfPasswordPrompts=1".to_string(),
                ]);
                ssh_args.push(host.destination());
                ssh_args.push(command.as_str().to_string());

                let mut args = vec!["-e".to_string(), "ssh".to_string()];
                args.extend(ssh_args);

                Self {
                    program: "sshpass",
                    args,
                    env: vec![("SSHPASS", password.clone())],
                }
            }
        }
    }

    pub fn uses_sshpass(&self) -> bool {
        self.program == "sshpass"
    }
}

/// Separates ssh client failures from the remote command's own exit status
pub fn classify_client_failure(
    host: &Host,
    exit_code: i32,
    stderr: &str,
    via_sshpass: bool,
) -> Option<TransportError> {
    let address = host.address.clone();

    if via_sshpass {
        match exit_code {
            SSHPASS_AUTH_EXIT => return Some(TransportError::Auth(address)),
            SSHPASS_HOST_KEY_EXIT => return Some(TransportError::HostKey(address)),
            _ => {}
        }
    }

    if exit_code != SSH_FAILURE_EXIT {
        return None;
    }

    let lowered = stderr.to_ascii_lowercase();
    let error = if lowered.contains("permission denied") || lowered.contains("too many authentication failures") {
        TransportError::Auth(address)
    } else if lowered.contains("host key verification failed")
        || lowered.contains("remote host identification has changed")
    {
        TransportError::HostKey(address)
    } else if lowered.contains("connection reset")
        || lowered.contains("broken pipe")
        || lowered.contains("connection closed")
    {
        TransportError::ConnectionReset(address)
    } else {
        TransportError::Unreachable(address)
    };

    Some(error)
}

#[async_trait]
impl RemoteTransport for OpenSshTransport {
    async fn run(
        &self,
        host: &Host,
        command: &RemoteCommand,
        timeout: Duration,
    ) -> Result<ExecutionResult, TransportError> {
        let invocation = SshInvocation::build(host, command, self.connect_timeout);
        debug!(host = %host.address, role = %host.role, command = %command, "Spawning ssh");

        let mut process = ProcessCommand::new(invocation.program);
        process
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &invocation.env {
            process.env(key, value);
        }

        let started_at = Utc::now();
        let started = Instant::now();
        let child = process
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{}: {}", invocation.program, e)))?;

        // Dropping the child on timeout kills the ssh client.
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(|e| TransportError::ConnectionReset(format!("{}: {}", host.address, e)))?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if let Some(error) =
            classify_client_failure(host, exit_code, &stderr, invocation.uses_sshpass())
        {
            return Err(error);
        }

        Ok(ExecutionResult {
            exit_code,
            stdout,
            stderr,
            duration: started.elapsed(),
            started_at,
        })
    }
}
