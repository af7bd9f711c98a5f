use serde::Serialize;
use serde_json::Value;

use crate::error::AdapterError;
use crate::model::result::{CommandResult, WireResult};

pub(crate) const FRAME_DELIMITER: u8 = b'\n';

/// Serializes `message` as one newline-terminated JSON frame.
pub fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>, AdapterError> {
    let mut frame =
        serde_json::to_vec(message).map_err(|err| AdapterError::JsonEncode(err.to_string()))?;
    frame.push(FRAME_DELIMITER);
    Ok(frame)
}

/// Serializes `message` as a websocket text payload.
pub fn encode_text<T: Serialize>(message: &T) -> Result<String, AdapterError> {
    serde_json::to_string(message).map_err(|err| AdapterError::JsonEncode(err.to_string()))
}

/// Parses `buffer` as one complete JSON frame.
///
/// Returns `None` while the buffer does not yet hold a parseable document, so
/// callers can keep reading.
pub fn try_decode_frame(buffer: &[u8]) -> Option<Value> {
    serde_json::from_slice(buffer.trim_ascii()).ok()
}

pub fn decode_frame(buffer: &[u8]) -> Result<Value, AdapterError> {
    serde_json::from_slice(buffer.trim_ascii())
        .map_err(|err| AdapterError::JsonDecode(err.to_string()))
}

/// Splits every complete line off the front of `buffer`, leaving any partial
/// trailing frame in place. Blank lines are dropped.
pub fn drain_lines(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    while let Some(position) = buffer.iter().position(|byte| *byte == FRAME_DELIMITER) {
        let line: Vec<u8> = buffer.drain(..=position).collect();
        let trimmed = line.trim_ascii();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_vec());
        }
    }
    lines
}

/// Interprets a CAD application's response.
///
/// Objects carrying a boolean `success` use the result wire form; any other
/// object goes through the `status`-keyed mapping convention.
pub fn response_to_result(response: Value) -> Result<CommandResult, AdapterError> {
    let Value::Object(map) = response else {
        return Err(AdapterError::JsonDecode(
            "response must be a JSON object".to_string(),
        ));
    };

    if map.get("success").is_some_and(Value::is_boolean) {
        let wire: WireResult = serde_json::from_value(Value::Object(map))
            .map_err(|err| AdapterError::JsonDecode(err.to_string()))?;
        return Ok(wire.into());
    }

    Ok(CommandResult::from_legacy(map))
}
