use serde_json::Value;

use crate::error::AdapterError;
use crate::model::result::Params;
use crate::protocol::CommandEnvelope;

pub const GET_STATE_COMMAND: &str = "get_state";

/// How commands reach a CAD application.
///
/// Implementations are synchronous; each call is independent.
pub trait Engine: Send + Sync {
    /// Sends `command` and returns the application's raw response.
    fn execute(&self, command: &CommandEnvelope) -> Result<Value, AdapterError>;

    fn health_check(&self) -> bool;

    fn get_state(&self, verbose: bool) -> Result<Value, AdapterError> {
        let mut params = Params::new();
        params.insert("verbose".to_string(), Value::Bool(verbose));
        self.execute(&CommandEnvelope::new(GET_STATE_COMMAND, params))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::{json, Value};

    use super::Engine;
    use crate::error::AdapterError;
    use crate::protocol::CommandEnvelope;

    #[derive(Default)]
    struct RecordingEngine {
        seen: Mutex<Vec<CommandEnvelope>>,
    }

    impl Engine for RecordingEngine {
        fn execute(&self, command: &CommandEnvelope) -> Result<Value, AdapterError> {
            self.seen
                .lock()
                .map_err(|_| AdapterError::InternalPoisoned)?
                .push(command.clone());
            Ok(json!({"success": true, "data": {"objects": []}}))
        }

        fn health_check(&self) -> bool {
            true
        }
    }

    #[test]
    fn get_state_sends_verbose_flag() {
        let engine = RecordingEngine::default();
        let state = engine.get_state(true).expect("recording engine never fails");
        assert_eq!(state["data"]["objects"], json!([]));

        let seen = engine.seen.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].command_type, "get_state");
        assert_eq!(seen[0].params.get("verbose"), Some(&json!(true)));
    }
}
