use crate::protocol::ActionRequest;
use cuwhapp_core::waha::DEFAULT_MAX_SESSIONS;
use cuwhapp_core::{ActionResponse, Command, CoreError, ErrorCategory, PlanType, UserId};
use std::convert::TryFrom;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Unknown action: {0}")]
    UnsupportedAction(String),
    #[error("{0}")]
    InvalidArgument(String),
}

impl ProtocolError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProtocolError::UnsupportedAction(_) => ErrorCategory::UnsupportedAction,
            ProtocolError::InvalidArgument(_) => ErrorCategory::InvalidArgument,
        }
    }
}

impl From<CoreError> for ProtocolError {
    fn from(err: CoreError) -> Self {
        ProtocolError::InvalidArgument(err.to_string())
    }
}

impl From<ProtocolError> for ActionResponse {
    fn from(err: ProtocolError) -> Self {
        ActionResponse::failure(err.category(), err.to_string())
    }
}

/// Decode a request body into a typed command
pub fn parse_action(body: &[u8]) -> Result<Command, ProtocolError> {
    let request: ActionRequest = serde_json::from_slice(body)
        .map_err(|e| ProtocolError::InvalidArgument(format!("malformed action body: {}", e)))?;
    Command::try_from(request)
}

impl TryFrom<ActionRequest> for Command {
    type Error = ProtocolError;

    fn try_from(req: ActionRequest) -> Result<Self, Self::Error> {
        let action = req.action.as_deref().unwrap_or("create");

        match action {
            "create" | "create_user_container" => Ok(Command::CreateUserContainer {
                user_id: required_user_id(&req)?,
                plan_type: req
                    .plan_type
                    .as_deref()
                    .map(str::parse::<PlanType>)
                    .transpose()?
                    .unwrap_or_default(),
            }),
            "stop" => Ok(Command::StopUserContainer {
                user_id: required_user_id(&req)?,
            }),
            "restart" => Ok(Command::RestartUserContainer {
                user_id: required_user_id(&req)?,
            }),
            "delete" => Ok(Command::DeleteUserContainer {
                user_id: required_user_id(&req)?,
            }),
            "create_waha" => Ok(Command::CreateWaha {
                max_sessions: max_sessions(req.max_sessions)?,
            }),
            "list_waha" => Ok(Command::ListWaha),
            "find_available_waha" => Ok(Command::FindAvailableWaha {
                sessions_needed: req.sessions_needed.unwrap_or(1),
            }),
            other => Err(ProtocolError::UnsupportedAction(other.to_string())),
        }
    }
}

fn required_user_id(req: &ActionRequest) -> Result<UserId, ProtocolError> {
    let raw = match &req.user_id {
        None | Some(serde_json::Value::Null) => {
            return Err(ProtocolError::InvalidArgument(
                "user_id is required".to_string(),
            ))
        }
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) if n.is_u64() || n.is_i64() => n.to_string(),
        Some(other) => {
            return Err(ProtocolError::InvalidArgument(format!(
                "user_id must be a string, got {}",
                other
            )))
        }
    };

    Ok(UserId::parse(&raw)?)
}

fn max_sessions(raw: Option<i64>) -> Result<u32, ProtocolError> {
    match raw {
        None => Ok(DEFAULT_MAX_SESSIONS),
        Some(value) if value >= 1 => u32::try_from(value).map_err(|_| {
            ProtocolError::InvalidArgument(format!("max_sessions {} is out of range", value))
        }),
        Some(value) => Err(ProtocolError::InvalidArgument(format!(
            "max_sessions must be at least 1, got {}",
            value
        ))),
    }
}
