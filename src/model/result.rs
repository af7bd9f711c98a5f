use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameter and data mapping carried by commands and results.
pub type Params = Map<String, Value>;

const LEGACY_STATUS_KEY: &str = "status";
const LEGACY_ERROR_STATUS: &str = "error";
const LEGACY_ERROR_KEY: &str = "error";
const UNKNOWN_ERROR: &str = "Unknown error";

/// Outcome of a single command execution.
///
/// `Failure` always carries an error message; both variants carry a data
/// mapping, which may be empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireResult", from = "WireResult")]
pub enum CommandResult {
    Success { data: Params },
    Failure { error: String, data: Params },
}

impl CommandResult {
    pub fn ok() -> Self {
        Self::Success { data: Params::new() }
    }

    pub fn ok_with(data: Params) -> Self {
        Self::Success { data }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
            data: Params::new(),
        }
    }

    pub fn fail_with(error: impl Into<String>, data: Params) -> Self {
        Self::Failure {
            error: error.into(),
            data,
        }
    }

    /// Bridges the mapping-shaped return convention into a typed result.
    ///
    /// A mapping whose `status` field equals `"error"` becomes a failure carrying
    /// the mapping's `error` field; anything else is a success wrapping the
    /// mapping unchanged.
    pub fn from_legacy(map: Params) -> Self {
        let is_error = map
            .get(LEGACY_STATUS_KEY)
            .and_then(Value::as_str)
            .is_some_and(|status| status == LEGACY_ERROR_STATUS);

        if !is_error {
            return Self::Success { data: map };
        }

        let error = match map.get(LEGACY_ERROR_KEY) {
            Some(Value::String(message)) => message.clone(),
            Some(Value::Null) | None => UNKNOWN_ERROR.to_string(),
            Some(other) => other.to_string(),
        };
        Self::fail(error)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error.as_str()),
        }
    }

    pub fn data(&self) -> &Params {
        match self {
            Self::Success { data } | Self::Failure { data, .. } => data,
        }
    }

    pub fn into_data(self) -> Params {
        match self {
            Self::Success { data } | Self::Failure { data, .. } => data,
        }
    }

    /// Wire form `{success, data, error?}` as a JSON object.
    pub fn to_wire(&self) -> Params {
        let mut wire = Params::new();
        wire.insert("success".to_string(), Value::Bool(self.is_success()));
        wire.insert("data".to_string(), Value::Object(self.data().clone()));
        if let Some(error) = self.error() {
            wire.insert("error".to_string(), Value::String(error.to_string()));
        }
        wire
    }
}

impl Default for CommandResult {
    fn default() -> Self {
        Self::ok()
    }
}

impl From<()> for CommandResult {
    fn from(_: ()) -> Self {
        Self::ok()
    }
}

impl From<Params> for CommandResult {
    fn from(map: Params) -> Self {
        Self::from_legacy(map)
    }
}

/// Serialized shape of [`CommandResult`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WireResult {
    pub success: bool,
    #[serde(default)]
    pub data: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<CommandResult> for WireResult {
    fn from(result: CommandResult) -> Self {
        match result {
            CommandResult::Success { data } => Self {
                success: true,
                data,
                error: None,
            },
            CommandResult::Failure { error, data } => Self {
                success: false,
                data,
                error: Some(error),
            },
        }
    }
}

impl From<WireResult> for CommandResult {
    fn from(wire: WireResult) -> Self {
        if wire.success {
            return Self::Success { data: wire.data };
        }

        Self::Failure {
            error: wire.error.unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
            data: wire.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{CommandResult, Params};

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn success_wire_form_omits_error() {
        let result = CommandResult::ok_with(params(json!({"value": 42, "name": "Test"})));
        let wire = serde_json::to_value(&result).expect("result should serialize");
        assert_eq!(
            wire,
            json!({"success": true, "data": {"value": 42, "name": "Test"}})
        );
        assert_eq!(Value::Object(result.to_wire()), wire);
    }

    #[test]
    fn failure_wire_form_carries_error_and_context() {
        let result = CommandResult::fail_with(
            "Something went wrong",
            params(json!({"detail": "Additional info"})),
        );
        let wire = serde_json::to_value(&result).expect("result should serialize");
        assert_eq!(
            wire,
            json!({
                "success": false,
                "data": {"detail": "Additional info"},
                "error": "Something went wrong"
            })
        );
    }

    #[test]
    fn wire_round_trip_preserves_triple() {
        for original in [
            CommandResult::ok(),
            CommandResult::ok_with(params(json!({"width": 10}))),
            CommandResult::fail("Object not found"),
        ] {
            let text = serde_json::to_string(&original).expect("serialize");
            let parsed: Value = serde_json::from_str(&text).expect("reparse");
            assert_eq!(
                parsed.get("error").is_some(),
                original.error().is_some(),
                "error key presence must follow the error value"
            );
            let decoded: CommandResult = serde_json::from_str(&text).expect("decode");
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn decoding_failure_without_error_uses_placeholder() {
        let decoded: CommandResult =
            serde_json::from_value(json!({"success": false})).expect("decode");
        assert_eq!(decoded.error(), Some("Unknown error"));
        assert!(decoded.data().is_empty());
    }

    #[test]
    fn legacy_error_mapping_becomes_failure() {
        let result =
            CommandResult::from_legacy(params(json!({"status": "error", "error": "boom"})));
        assert_eq!(result, CommandResult::fail("boom"));

        let missing = CommandResult::from_legacy(params(json!({"status": "error"})));
        assert_eq!(missing.error(), Some("Unknown error"));
    }

    #[test]
    fn legacy_success_mapping_is_wrapped_unchanged() {
        let data = params(json!({"status": "ok", "object_id": "Box001"}));
        let result = CommandResult::from(data.clone());
        assert_eq!(result, CommandResult::ok_with(data));
    }

    #[test]
    fn unit_converts_to_empty_success() {
        let result = CommandResult::from(());
        assert!(result.is_success());
        assert!(result.data().is_empty());
        assert!(result.error().is_none());
    }
}
