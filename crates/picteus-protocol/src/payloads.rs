use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExtensionError;

/// Handshake payload sent on `connection`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionPayload {
    pub api_key: String,
    pub extension_id: String,
    pub is_open: bool,
}

/// Value of a successful `connection` acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionAccepted {
    #[serde(default)]
    pub settings: Value,
}

/// Case-sensitive log level carried on the `notifications` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ExtensionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(ExtensionError::Decode(format!(
                "unsupported log level '{other}': expected one of debug, info, warn, error"
            ))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub message: String,
    pub level: LogLevel,
}

/// Lifecycle milestone an extension reports to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionReportedStatus {
    Ready,
    Failed,
}

/// Payload of the extension-to-host `notifications` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsPayload {
    pub api_key: String,
    pub extension_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<LogRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExtensionReportedStatus>,
}

impl NotificationsPayload {
    pub fn new(api_key: impl Into<String>, extension_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            extension_id: extension_id.into(),
            log: None,
            context_id: None,
            intent: None,
            value: None,
            status: None,
        }
    }
}

/// Value of the single-image channels (`image.created`, `image.computeTags`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEventValue {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRunCommandValue {
    pub command_id: String,
    pub image_ids: Vec<String>,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRunCommandValue {
    pub command_id: String,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEmbeddingsValue {
    pub text: String,
}

/// Value of `extension.settings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsValue {
    #[serde(default)]
    pub value: Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unit_log_level_is_case_sensitive() {
        assert_eq!("warn".parse::<LogLevel>().expect("warn"), LogLevel::Warn);
        assert!("WARN".parse::<LogLevel>().is_err());
        assert!(serde_json::from_value::<LogLevel>(json!("Info")).is_err());
    }

    #[test]
    fn unit_notifications_payload_omits_absent_fields() {
        let mut payload = NotificationsPayload::new("key", "demo");
        payload.log = Some(LogRecord {
            message: "hello".to_string(),
            level: LogLevel::Info,
        });
        let encoded = serde_json::to_value(&payload).expect("encode");
        assert_eq!(
            encoded,
            json!({
                "apiKey": "key",
                "extensionId": "demo",
                "log": {"message": "hello", "level": "info"}
            })
        );
    }

    #[test]
    fn unit_run_command_values_default_missing_parameters() {
        let image: ImageRunCommandValue =
            serde_json::from_value(json!({"commandId": "convert", "imageIds": ["a", "b"]}))
                .expect("decode image command");
        assert_eq!(image.image_ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(image.parameters, Value::Null);

        let process: ProcessRunCommandValue = serde_json::from_value(
            json!({"commandId": "askForSomething", "parameters": {"x": 1}}),
        )
        .expect("decode process command");
        assert_eq!(process.parameters, json!({"x": 1}));
    }
}
