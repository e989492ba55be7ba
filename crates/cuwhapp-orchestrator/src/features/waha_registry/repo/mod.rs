//! Docker and HTTP probes against the WAHA host.

use std::sync::Arc;

use cuwhapp_core::container_spec::LABEL_ROLE;
use cuwhapp_core::waha::{
    self, DEFAULT_MAX_SESSIONS, LABEL_ROLE_WAHA, LABEL_WAHA_ID, LABEL_WAHA_MAX_SESSIONS,
    WAHA_CONTAINER_PORT, WAHA_IMAGE, WAHA_NAME_PREFIX, WAHA_NETWORK,
};
use cuwhapp_core::RuntimeStatus;
use tracing::warn;

use crate::features::remote_execution::service::RemoteExecutor;
use crate::shared::error::{OrchestratorError, OrchestratorResult};
use crate::shared::shell::RemoteCommand;
use crate::shared::types::{Deadline, Host};

/// One WAHA container as seen by the scan, before its sessions are counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannedInstance {
    pub id: u32,
    pub running: bool,
    pub max_sessions: u32,
}

pub fn scan_command() -> RemoteCommand {
    RemoteCommand::new("docker")
        .fragment("ps -a")
        .opt("--filter", format!("name={}", WAHA_NAME_PREFIX))
        .opt(
            "--format",
            format!(
                "{{{{.Names}}}}\\t{{{{.State}}}}\\t{{{{.Label \"{}\"}}}}\\t{{{{.Label \"{}\"}}}}",
                LABEL_WAHA_ID, LABEL_WAHA_MAX_SESSIONS
            ),
        )
}

/// Parses scan output into instances sorted by id.
///
/// The id label wins over the name. Containers whose id cannot be resolved
/// are skipped; a missing or unparsable capacity label means the default.
pub fn parse_scan(stdout: &str) -> Vec<ScannedInstance> {
    let mut instances: Vec<ScannedInstance> = Vec::new();

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let mut fields = line.split('\t');
        let name = fields.next().unwrap_or_default();
        let state = fields.next().unwrap_or_default();
        let id_label = fields.next().unwrap_or_default().trim();
        let max_label = fields.next().unwrap_or_default().trim();

        let id = id_label
            .parse::<u32>()
            .ok()
            .filter(|id| *id >= 1)
            .or_else(|| waha::parse_container_name(name));
        let Some(id) = id else {
            warn!(container = %name, "Skipping WAHA container without a usable id");
            continue;
        };
        if instances.iter().any(|i| i.id == id) {
            warn!(container = %name, id, "Duplicate WAHA instance id");
            continue;
        }

        let max_sessions = max_label
            .parse::<u32>()
            .ok()
            .filter(|max| *max >= 1)
            .unwrap_or(DEFAULT_MAX_SESSIONS);
        let running = RuntimeStatus::parse(state).is_some_and(|s| s.is_running());

        instances.push(ScannedInstance {
            id,
            running,
            max_sessions,
        });
    }

    instances.sort_by_key(|i| i.id);
    instances
}

pub fn sessions_command(port: u16) -> RemoteCommand {
    RemoteCommand::new("curl")
        .fragment("-fsS --max-time 5")
        .arg(format!("http://127.0.0.1:{}/api/sessions?all=true", port))
}

/// Number of sessions in an `/api/sessions` response body
pub fn parse_session_count(stdout: &str) -> Result<u32, String> {
    let value: serde_json::Value =
        serde_json::from_str(stdout.trim()).map_err(|e| format!("invalid sessions JSON: {}", e))?;
    let sessions = value
        .as_array()
        .ok_or_else(|| "sessions response is not a JSON array".to_string())?;
    u32::try_from(sessions.len()).map_err(|_| "session count out of range".to_string())
}

pub fn health_command(port: u16) -> RemoteCommand {
    RemoteCommand::new("curl")
        .fragment("-fsS --max-time 3")
        .arg(format!("http://127.0.0.1:{}/api/health", port))
}

pub fn ensure_network_command() -> RemoteCommand {
    RemoteCommand::new("docker")
        .fragment("network inspect")
        .arg(WAHA_NETWORK)
        .quiet()
        .or_else(
            RemoteCommand::new("docker")
                .fragment("network create")
                .arg(WAHA_NETWORK),
        )
}

pub fn run_instance_command(id: u32, host_port: u16, max_sessions: u32) -> RemoteCommand {
    RemoteCommand::new("docker")
        .fragment("run -d")
        .opt("--name", waha::container_name(id))
        .opt("--network", WAHA_NETWORK)
        .opt("--restart", "unless-stopped")
        .opt("--label", format!("{}={}", LABEL_ROLE, LABEL_ROLE_WAHA))
        .opt("--label", format!("{}={}", LABEL_WAHA_ID, id))
        .opt("--label", format!("{}={}", LABEL_WAHA_MAX_SESSIONS, max_sessions))
        .opt("-p", format!("{}:{}", host_port, WAHA_CONTAINER_PORT))
        .opt("-e", "WAHA_PRINT_QR=true")
        .opt("-e", "WAHA_LOG_LEVEL=info")
        .opt("-e", "WAHA_SESSION_STORE_ENABLED=true")
        .opt("-e", "WAHA_SESSION_STORE_PATH=/app/sessions")
        .opt("-e", "WAHA_FILES_MIMETYPES=audio,image,video,document")
        .opt("-e", "WAHA_FILES_LIFETIME=180")
        .opt("-e", format!("WAHA_MAX_SESSIONS={}", max_sessions))
        .opt("-v", format!("{}:/app/sessions", waha::sessions_volume(id)))
        .opt("-v", format!("{}:/app/files", waha::files_volume(id)))
        .arg(WAHA_IMAGE)
}

pub struct WahaHostRepository {
    executor: Arc<RemoteExecutor>,
    host: Host,
}

impl WahaHostRepository {
    pub fn new(executor: Arc<RemoteExecutor>, host: Host) -> Self {
        Self { executor, host }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// All WAHA containers on the host, running or not
    pub async fn scan(&self, deadline: Deadline) -> OrchestratorResult<Vec<ScannedInstance>> {
        let result = self
            .executor
            .execute_checked(&self.host, &scan_command(), deadline)
            .await?;
        Ok(parse_scan(&result.stdout))
    }

    pub async fn session_count(&self, port: u16, deadline: Deadline) -> OrchestratorResult<u32> {
        let result = self
            .executor
            .execute_checked(&self.host, &sessions_command(port), deadline)
            .await?;
        parse_session_count(&result.stdout).map_err(|message| OrchestratorError::Remote {
            exit_code: result.exit_code,
            stderr: message,
        })
    }

    /// Whether the instance answered its health endpoint. Only transport and
    /// deadline failures are errors.
    pub async fn is_healthy(&self, port: u16, deadline: Deadline) -> OrchestratorResult<bool> {
        let result = self
            .executor
            .execute(&self.host, &health_command(port), deadline)
            .await?;
        Ok(result.success())
    }

    pub async fn ensure_network(&self, deadline: Deadline) -> OrchestratorResult<()> {
        self.executor
            .execute_checked(&self.host, &ensure_network_command(), deadline)
            .await
            .map(|_| ())
    }

    pub async fn run_instance(
        &self,
        id: u32,
        host_port: u16,
        max_sessions: u32,
        deadline: Deadline,
    ) -> OrchestratorResult<()> {
        self.executor
            .execute_checked(
                &self.host,
                &run_instance_command(id, host_port, max_sessions),
                deadline,
            )
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::testing::sessions_json;

    #[test]
    fn test_scan_command_shape() {
        assert_eq!(
            scan_command().as_str(),
            "docker ps -a --filter name=cuwhapp-waha- --format '{{.Names}}\\t{{.State}}\\t{{.Label \"cuwhapp.waha.id\"}}\\t{{.Label \"cuwhapp.waha.max_sessions\"}}'"
        );
    }

    #[test]
    fn test_parse_scan_reads_labels_and_legacy_names() {
        let stdout = "cuwhapp-waha-3\trunning\t3\t50\n\
                      cuwhapp-waha-1\trunning\t\t\n\
                      cuwhapp-waha-2\texited\t2\t200\n";
        let instances = parse_scan(stdout);

        assert_eq!(
            instances,
            vec![
                ScannedInstance {
                    id: 1,
                    running: true,
                    max_sessions: 100,
                },
                ScannedInstance {
                    id: 2,
                    running: false,
                    max_sessions: 200,
                },
                ScannedInstance {
                    id: 3,
                    running: true,
                    max_sessions: 50,
                },
            ]
        );
    }

    #[test]
    fn test_parse_scan_skips_unresolvable_names() {
        let instances = parse_scan("cuwhapp-waha-old\trunning\t\t\ncuwhapp-waha-0\trunning\t\t\n");
        assert!(instances.is_empty());
    }

    #[test]
    fn test_parse_session_count() {
        assert_eq!(parse_session_count(&sessions_json(7)), Ok(7));
        assert_eq!(parse_session_count("[]\n"), Ok(0));
        assert!(parse_session_count("{\"error\":\"nope\"}").is_err());
        assert!(parse_session_count("<html>").is_err());
    }

    #[test]
    fn test_run_instance_command_carries_labels_and_volumes() {
        let cmd = run_instance_command(4, 4503, 250);
        let line = cmd.as_str();

        assert!(line.starts_with("docker run -d --name cuwhapp-waha-4 --network cuwhapp-network --restart unless-stopped"));
        assert!(line.contains("--label cuwhapp.role=waha"));
        assert!(line.contains("--label cuwhapp.waha.id=4"));
        assert!(line.contains("--label cuwhapp.waha.max_sessions=250"));
        assert!(line.contains("-p '4503:3000'"));
        assert!(line.contains("-e WAHA_MAX_SESSIONS=250"));
        assert!(line.contains("-e WAHA_PRINT_QR=true"));
        assert!(line.contains("-e WAHA_SESSION_STORE_ENABLED=true"));
        assert!(line.contains("-e WAHA_SESSION_STORE_PATH=/app/sessions"));
        assert!(line.contains("-e WAHA_FILES_MIMETYPES=audio,image,video,document"));
        assert!(line.contains("-e WAHA_FILES_LIFETIME=180"));
        assert!(!line.contains("WAHA_FILES_LIFETIME=0"));
        assert!(line.contains("-v 'waha_sessions_4:/app/sessions'"));
        assert!(line.contains("-v 'waha_files_4:/app/files'"));
        assert!(line.ends_with("'devlikeapro/waha-plus:latest'"));
    }

    #[test]
    fn test_health_and_session_urls_are_loopback() {
        assert_eq!(
            sessions_command(4500).as_str(),
            "curl -fsS --max-time 5 'http://127.0.0.1:4500/api/sessions?all=true'"
        );
        assert_eq!(
            health_command(4501).as_str(),
            "curl -fsS --max-time 3 'http://127.0.0.1:4501/api/health'"
        );
    }
}
