use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapter::AdapterManifest;
use crate::error::AdapterError;
use crate::model::capability::Capability;
use crate::model::result::{CommandResult, Params};

pub const DEFAULT_ADAPTER_VERSION: &str = "1.0.0";

const MSG_EXECUTE_COMMAND: &str = "execute_command";
const MSG_HEALTH_CHECK: &str = "health_check";
const MSG_DISCONNECT: &str = "disconnect";

/// A command request: type, parameters and optional correlation id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(rename = "type", default)]
    pub command_type: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl CommandEnvelope {
    pub fn new(command_type: impl Into<String>, params: Params) -> Self {
        Self {
            command_type: command_type.into(),
            params,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Lenient parse of a decoded frame: a missing or non-string `type` becomes
    /// `""`, missing or non-object `params` become `{}`, and numeric request ids
    /// are kept in their textual form.
    pub fn from_wire(value: &Value) -> Result<Self, AdapterError> {
        let object = value
            .as_object()
            .ok_or_else(|| AdapterError::JsonDecode("command must be a JSON object".to_string()))?;

        Ok(Self {
            command_type: object
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            params: object
                .get("params")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            request_id: object.get("request_id").and_then(request_id_text),
        })
    }
}

fn request_id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Local-socket response: a [`CommandResult`] plus the echoed request id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl CommandResponse {
    pub fn new(result: CommandResult, request_id: Option<String>) -> Self {
        let success = result.is_success();
        let error = result.error().map(str::to_string);
        Self {
            success,
            data: result.into_data(),
            error,
            request_id,
        }
    }

    pub fn into_result(self) -> CommandResult {
        if self.success {
            return CommandResult::ok_with(self.data);
        }
        CommandResult::fail_with(
            self.error.unwrap_or_else(|| "Unknown error".to_string()),
            self.data,
        )
    }
}

/// Identity and capabilities sent once per connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistrationPayload {
    pub adapter_type: String,
    pub adapter_id: Option<String>,
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(flatten)]
    pub metadata: Params,
}

impl RegistrationPayload {
    pub fn new(adapter_type: impl Into<String>, adapter_id: Option<String>) -> Self {
        Self {
            adapter_type: adapter_type.into(),
            adapter_id,
            version: DEFAULT_ADAPTER_VERSION.to_string(),
            capabilities: Vec::new(),
            commands: Vec::new(),
            metadata: Params::new(),
        }
    }

    /// Merges the adapter's declared capabilities and commands.
    pub fn with_manifest(mut self, manifest: AdapterManifest) -> Self {
        self.capabilities = manifest.capabilities;
        self.commands = manifest.commands;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterStatus {
    #[default]
    Available,
    Busy,
    Error,
}

impl std::fmt::Display for AdapterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            Self::Available => "available",
            Self::Busy => "busy",
            Self::Error => "error",
        };
        write!(f, "{value}")
    }
}

/// Keep-alive status report, regenerated per tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub adapter_id: String,
    #[serde(default)]
    pub status: AdapterStatus,
    #[serde(default)]
    pub active_jobs: u32,
    #[serde(flatten)]
    pub metadata: Params,
}

impl HeartbeatPayload {
    pub fn new(adapter_id: impl Into<String>, active_jobs: u32) -> Self {
        let status = if active_jobs > 0 {
            AdapterStatus::Busy
        } else {
            AdapterStatus::Available
        };
        Self {
            adapter_id: adapter_id.into(),
            status,
            active_jobs,
            metadata: Params::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandResultMessage {
    pub request_id: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub data: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResultMessage {
    pub fn new(request_id: Option<String>, result: CommandResult) -> Self {
        let response = CommandResponse::new(result, None);
        Self {
            request_id,
            success: response.success,
            data: response.data,
            error: response.error,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub request_id: Option<String>,
    pub adapter_healthy: bool,
}

/// Frames the adapter sends over the persistent connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    AdapterRegistration(RegistrationPayload),
    Heartbeat(HeartbeatPayload),
    CommandResult(CommandResultMessage),
    HealthCheckResponse(HealthCheckResponse),
}

/// Frames the hosted server sends to the adapter.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundMessage {
    ExecuteCommand {
        request_id: Option<String>,
        command_type: String,
        params: Params,
    },
    HealthCheck {
        request_id: Option<String>,
    },
    Disconnect,
    /// Any other `type`, or a frame without one.
    Unknown { kind: Option<String> },
}

impl InboundMessage {
    pub fn decode(raw: &str) -> Result<Self, AdapterError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|err| AdapterError::JsonDecode(err.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| AdapterError::JsonDecode("message must be a JSON object".to_string()))?;

        let kind = object.get("type").and_then(Value::as_str);
        let request_id = object.get("request_id").and_then(request_id_text);

        let message = match kind {
            Some(MSG_EXECUTE_COMMAND) => Self::ExecuteCommand {
                request_id,
                command_type: object
                    .get("command_type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                params: object
                    .get("params")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
            },
            Some(MSG_HEALTH_CHECK) => Self::HealthCheck { request_id },
            Some(MSG_DISCONNECT) => Self::Disconnect,
            other => Self::Unknown {
                kind: other.map(str::to_string),
            },
        };

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{
        CommandEnvelope, CommandResponse, CommandResultMessage, HealthCheckResponse,
        HeartbeatPayload, InboundMessage, OutboundMessage, RegistrationPayload,
    };
    use crate::adapter::AdapterManifest;
    use crate::model::capability::Capability;
    use crate::model::result::{CommandResult, Params};

    #[test]
    fn envelope_from_wire_is_lenient() {
        let envelope = CommandEnvelope::from_wire(&json!({
            "type": "create_box",
            "params": {"width": 10, "height": 20, "depth": 30},
            "request_id": "req_123"
        }))
        .expect("object should parse");
        assert_eq!(envelope.command_type, "create_box");
        assert_eq!(envelope.params.len(), 3);
        assert_eq!(envelope.request_id.as_deref(), Some("req_123"));

        let bare = CommandEnvelope::from_wire(&json!({"params": null, "request_id": 7}))
            .expect("object should parse");
        assert_eq!(bare.command_type, "");
        assert!(bare.params.is_empty());
        assert_eq!(bare.request_id.as_deref(), Some("7"));

        assert!(CommandEnvelope::from_wire(&json!([1, 2])).is_err());
    }

    #[test]
    fn response_echoes_request_id() {
        let response = CommandResponse::new(CommandResult::ok(), Some("req_123".to_string()));
        assert_eq!(
            serde_json::to_value(&response).expect("serialize"),
            json!({"success": true, "data": {}, "request_id": "req_123"})
        );
        assert_eq!(response.into_result(), CommandResult::ok());
    }

    #[test]
    fn registration_flattens_metadata() {
        let mut payload = RegistrationPayload::new("freecad", Some("adapter_001".to_string()))
            .with_manifest(AdapterManifest {
                capabilities: vec![Capability::PRIMITIVES],
                commands: vec!["create_box".to_string()],
            });
        payload
            .metadata
            .insert("host_version".to_string(), json!("0.21"));

        let wire = serde_json::to_value(OutboundMessage::AdapterRegistration(payload))
            .expect("serialize");
        assert_eq!(
            wire,
            json!({
                "type": "adapter_registration",
                "adapter_type": "freecad",
                "adapter_id": "adapter_001",
                "version": "1.0.0",
                "capabilities": ["primitives"],
                "commands": ["create_box"],
                "host_version": "0.21"
            })
        );
    }

    #[test]
    fn heartbeat_reports_busy_when_jobs_are_active() {
        let wire = serde_json::to_value(OutboundMessage::Heartbeat(HeartbeatPayload::new(
            "adapter_001",
            2,
        )))
        .expect("serialize");
        assert_eq!(
            wire,
            json!({"type": "heartbeat", "adapter_id": "adapter_001", "status": "busy", "active_jobs": 2})
        );
    }

    #[test]
    fn command_result_message_shape() {
        let message = OutboundMessage::CommandResult(CommandResultMessage::new(
            Some("r1".to_string()),
            CommandResult::fail("Unknown command: spin"),
        ));
        assert_eq!(
            serde_json::to_value(message).expect("serialize"),
            json!({
                "type": "command_result",
                "request_id": "r1",
                "success": false,
                "data": {},
                "error": "Unknown command: spin"
            })
        );

        let health = OutboundMessage::HealthCheckResponse(HealthCheckResponse {
            request_id: Some("h1".to_string()),
            adapter_healthy: true,
        });
        assert_eq!(
            serde_json::to_value(health).expect("serialize"),
            json!({"type": "health_check_response", "request_id": "h1", "adapter_healthy": true})
        );
    }

    #[test]
    fn inbound_messages_decode_by_kind() {
        let execute = InboundMessage::decode(
            r#"{"type":"execute_command","request_id":"r1","command_type":"create_box","params":{"width":10}}"#,
        )
        .expect("decode");
        let mut params = Params::new();
        params.insert("width".to_string(), Value::from(10));
        assert_eq!(
            execute,
            InboundMessage::ExecuteCommand {
                request_id: Some("r1".to_string()),
                command_type: "create_box".to_string(),
                params,
            }
        );

        assert_eq!(
            InboundMessage::decode(r#"{"type":"health_check","request_id":"h1"}"#).expect("decode"),
            InboundMessage::HealthCheck {
                request_id: Some("h1".to_string())
            }
        );
        assert_eq!(
            InboundMessage::decode(r#"{"type":"disconnect"}"#).expect("decode"),
            InboundMessage::Disconnect
        );
        assert_eq!(
            InboundMessage::decode(r#"{"type":"telemetry"}"#).expect("decode"),
            InboundMessage::Unknown {
                kind: Some("telemetry".to_string())
            }
        );
    }

    #[test]
    fn inbound_garbage_is_a_decode_error() {
        assert!(InboundMessage::decode("not json").is_err());
        assert!(InboundMessage::decode("[1,2,3]").is_err());
    }
}
