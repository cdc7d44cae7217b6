//! Preview feed wire format

use crate::errors::{PreviewError, PreviewResult};
use crate::games::types::{Randomness, RequestId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames sent to the sequencer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Ask for the preview of `id`
    Listen { id: RequestId },
}

/// Frames received from the sequencer
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ServerMessage {
    Complete { id: RequestId, result: Value },
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    pub fn to_json(&self) -> PreviewResult<String> {
        serde_json::to_string(self).map_err(|e| PreviewError::Protocol(e.to_string()))
    }
}

impl ServerMessage {
    pub fn from_json(text: &str) -> PreviewResult<Self> {
        serde_json::from_str(text).map_err(|e| PreviewError::Protocol(e.to_string()))
    }
}

/// Pull the 32-byte value out of a preview result.
///
/// Accepts a bare hex string or an object carrying it under `value`.
pub fn randomness_from_result(result: &Value) -> PreviewResult<Randomness> {
    let text = match result {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map
            .get("value")
            .and_then(Value::as_str)
            .ok_or_else(|| PreviewError::Protocol("result has no 'value' field".to_string()))?,
        other => {
            return Err(PreviewError::Protocol(format!(
                "unexpected result shape: {}",
                other
            )))
        }
    };

    let bytes = hex::decode(text.strip_prefix("0x").unwrap_or(text))
        .map_err(|e| PreviewError::Protocol(format!("result is not hex: {}", e)))?;
    if bytes.len() > 32 {
        return Err(PreviewError::Protocol(format!(
            "result has {} bytes, expected at most 32",
            bytes.len()
        )));
    }

    // left-pad like a uint256
    let mut value = [0u8; 32];
    value[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(value)
}
