use picteus_core::current_unix_timestamp_ms;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{TransportError, WireError};

pub const WIRE_ERROR_CODE_INVALID_JSON: &str = "invalid_json";
pub const WIRE_ERROR_CODE_INVALID_CHANNEL: &str = "invalid_channel";
pub const WIRE_ERROR_CODE_INVALID_CONTEXT_ID: &str = "invalid_context_id";
pub const WIRE_ERROR_CODE_MALFORMED_FRAME: &str = "malformed_frame";

const WIRE_FRAME_JSON_ERROR_PREFIX: &str = "failed to parse wire frame JSON";
const WIRE_FRAME_CHANNEL_ERROR: &str = "event frame channel must be non-empty";
const WIRE_FRAME_CONTEXT_ID_ERROR: &str = "frame contextId must be non-empty";

/// A named event, optionally expecting a correlated reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub milliseconds: u64,
}

impl Notification {
    pub fn new(channel: impl Into<String>, value: Value) -> Self {
        Self {
            channel: channel.into(),
            context_id: None,
            value,
            milliseconds: current_unix_timestamp_ms(),
        }
    }

    pub fn with_context_id(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    pub fn expects_reply(&self) -> bool {
        self.context_id.is_some()
    }
}

/// Resolution of a correlated request.
///
/// Encoded as `{"value": ..}`, `{"cancel": reason}` or `{"error": {kind, message}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AckOutcome {
    Value(Value),
    Cancel(String),
    Error(WireError),
}

impl AckOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgement {
    pub context_id: String,
    pub outcome: AckOutcome,
}

/// Unit of exchange on a transport link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireFrame {
    Event(Notification),
    Ack(Acknowledgement),
}

impl WireFrame {
    pub fn context_id(&self) -> Option<&str> {
        match self {
            Self::Event(notification) => notification.context_id.as_deref(),
            Self::Ack(ack) => Some(ack.context_id.as_str()),
        }
    }
}

pub fn parse_wire_frame(raw: &str) -> Result<WireFrame, TransportError> {
    let frame = serde_json::from_str::<WireFrame>(raw).map_err(|error| {
        TransportError::MalformedFrame(format!("{WIRE_FRAME_JSON_ERROR_PREFIX}: {error}"))
    })?;
    match &frame {
        WireFrame::Event(notification) => {
            if notification.channel.trim().is_empty() {
                return Err(TransportError::MalformedFrame(
                    WIRE_FRAME_CHANNEL_ERROR.to_string(),
                ));
            }
            if let Some(context_id) = notification.context_id.as_deref() {
                if context_id.trim().is_empty() {
                    return Err(TransportError::MalformedFrame(
                        WIRE_FRAME_CONTEXT_ID_ERROR.to_string(),
                    ));
                }
            }
        }
        WireFrame::Ack(ack) => {
            if ack.context_id.trim().is_empty() {
                return Err(TransportError::MalformedFrame(
                    WIRE_FRAME_CONTEXT_ID_ERROR.to_string(),
                ));
            }
        }
    }
    Ok(frame)
}

pub fn encode_wire_frame(frame: &WireFrame) -> Result<String, TransportError> {
    serde_json::to_string(frame).map_err(|error| TransportError::Serialization(error.to_string()))
}

/// Recovers `contextId` from a frame that failed to parse, when the JSON itself is readable.
pub fn best_effort_context_id(raw: &str) -> Option<String> {
    let value = serde_json::from_str::<Value>(raw).ok()?;
    let context_id = value
        .as_object()
        .and_then(|object| object.get("contextId"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())?;
    Some(context_id.to_string())
}

pub fn classify_wire_frame_parse_error(error: &TransportError) -> &'static str {
    let message = error.to_string();
    if message.contains(WIRE_FRAME_JSON_ERROR_PREFIX) {
        WIRE_ERROR_CODE_INVALID_JSON
    } else if message.contains(WIRE_FRAME_CHANNEL_ERROR) {
        WIRE_ERROR_CODE_INVALID_CHANNEL
    } else if message.contains(WIRE_FRAME_CONTEXT_ID_ERROR) {
        WIRE_ERROR_CODE_INVALID_CONTEXT_ID
    } else {
        WIRE_ERROR_CODE_MALFORMED_FRAME
    }
}

pub fn build_error_ack_frame(context_id: &str, error: WireError) -> WireFrame {
    WireFrame::Ack(Acknowledgement {
        context_id: context_id.to_string(),
        outcome: AckOutcome::Error(error),
    })
}
