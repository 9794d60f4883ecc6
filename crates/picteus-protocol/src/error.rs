use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures of the transport channel itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport channel is closed")]
    ChannelClosed,
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
    #[error("frame serialization failed: {0}")]
    Serialization(String),
}

/// Tag carried by every protocol error so callers branch on kind, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Transport,
    HandshakeRejected,
    MalformedIntent,
    UserCancelled,
    Handler,
    Bootstrap,
    InvalidIntentResult,
    IntentTimedOut,
    Lifecycle,
    Decode,
    Api,
    #[serde(other)]
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::HandshakeRejected => "handshakeRejected",
            Self::MalformedIntent => "malformedIntent",
            Self::UserCancelled => "userCancelled",
            Self::Handler => "handler",
            Self::Bootstrap => "bootstrap",
            Self::InvalidIntentResult => "invalidIntentResult",
            Self::IntentTimedOut => "intentTimedOut",
            Self::Lifecycle => "lifecycle",
            Self::Decode => "decode",
            Self::Api => "api",
            Self::Internal => "internal",
        }
    }
}

/// Error as it travels inside an error acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl WireError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Error surfaced to extension code and host callers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtensionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("malformed intent: {0}")]
    MalformedIntent(String),
    #[error("intent cancelled by user: {reason}")]
    UserCancelled { reason: String },
    #[error("handler failed: {0}")]
    Handler(String),
    #[error("extension bootstrap failed: {0}")]
    Bootstrap(String),
    #[error("invalid intent result: {0}")]
    InvalidIntentResult(String),
    #[error("intent timed out after {timeout_ms}ms")]
    IntentTimedOut { timeout_ms: u64 },
    #[error("illegal lifecycle transition from {from} to {to}")]
    Lifecycle { from: String, to: String },
    #[error("failed to decode payload: {0}")]
    Decode(String),
    #[error("api call failed: {0}")]
    Api(String),
}

impl ExtensionError {
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(TransportError::HandshakeRejected(_)) => ErrorKind::HandshakeRejected,
            Self::Transport(_) => ErrorKind::Transport,
            Self::MalformedIntent(_) => ErrorKind::MalformedIntent,
            Self::UserCancelled { .. } => ErrorKind::UserCancelled,
            Self::Handler(_) => ErrorKind::Handler,
            Self::Bootstrap(_) => ErrorKind::Bootstrap,
            Self::InvalidIntentResult(_) => ErrorKind::InvalidIntentResult,
            Self::IntentTimedOut { .. } => ErrorKind::IntentTimedOut,
            Self::Lifecycle { .. } => ErrorKind::Lifecycle,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Api(_) => ErrorKind::Api,
        }
    }

    pub fn is_user_cancelled(&self) -> bool {
        matches!(self, Self::UserCancelled { .. })
    }

    /// Returns the host-provided reason when the user dismissed an intent.
    pub fn cancellation_reason(&self) -> Option<&str> {
        match self {
            Self::UserCancelled { reason } => Some(reason.as_str()),
            _ => None,
        }
    }

    pub fn to_wire(&self) -> WireError {
        let message = match self {
            Self::Transport(error) => error.to_string(),
            Self::MalformedIntent(message)
            | Self::Handler(message)
            | Self::Bootstrap(message)
            | Self::InvalidIntentResult(message)
            | Self::Decode(message)
            | Self::Api(message) => message.clone(),
            Self::UserCancelled { reason } => reason.clone(),
            other => other.to_string(),
        };
        WireError::new(self.kind(), message)
    }

    /// Rebuilds a typed error from an error acknowledgement.
    ///
    /// Kinds that only make sense locally (`transport`, `lifecycle`, `internal`) come back
    /// as [`ExtensionError::Handler`] since the remote side failed while handling.
    pub fn from_wire(error: WireError) -> Self {
        let WireError { kind, message } = error;
        match kind {
            ErrorKind::HandshakeRejected => {
                Self::Transport(TransportError::HandshakeRejected(message))
            }
            ErrorKind::MalformedIntent => Self::MalformedIntent(message),
            ErrorKind::UserCancelled => Self::UserCancelled { reason: message },
            ErrorKind::Bootstrap => Self::Bootstrap(message),
            ErrorKind::InvalidIntentResult => Self::InvalidIntentResult(message),
            ErrorKind::Decode => Self::Decode(message),
            ErrorKind::Api => Self::Api(message),
            ErrorKind::IntentTimedOut
            | ErrorKind::Transport
            | ErrorKind::Handler
            | ErrorKind::Lifecycle
            | ErrorKind::Internal => Self::Handler(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_cancellation_is_distinguished_by_kind() {
        let cancelled = ExtensionError::UserCancelled {
            reason: "Cancelled".to_string(),
        };
        let transport = ExtensionError::Transport(TransportError::ChannelClosed);
        let malformed = ExtensionError::MalformedIntent("Cancelled".to_string());

        assert_eq!(cancelled.kind(), ErrorKind::UserCancelled);
        assert_eq!(cancelled.cancellation_reason(), Some("Cancelled"));
        assert!(cancelled.is_user_cancelled());
        for other in [&transport, &malformed] {
            assert!(!other.is_user_cancelled());
            assert_eq!(other.cancellation_reason(), None);
        }
    }

    #[test]
    fn unit_wire_error_round_trips_known_kinds() {
        let error = ExtensionError::MalformedIntent("expected exactly one branch".to_string());
        let wire = error.to_wire();
        assert_eq!(wire.kind, ErrorKind::MalformedIntent);
        assert_eq!(ExtensionError::from_wire(wire), error);
    }

    #[test]
    fn regression_unknown_wire_error_kind_decodes_as_internal() {
        let wire: WireError =
            serde_json::from_str(r#"{"kind":"somethingNew","message":"boom"}"#).expect("decode");
        assert_eq!(wire.kind, ErrorKind::Internal);
        assert_eq!(
            ExtensionError::from_wire(wire),
            ExtensionError::Handler("boom".to_string())
        );
    }

    #[test]
    fn unit_handshake_rejection_keeps_transport_variant() {
        let error = ExtensionError::from_wire(WireError::new(
            ErrorKind::HandshakeRejected,
            "invalid api key",
        ));
        assert_eq!(error.kind(), ErrorKind::HandshakeRejected);
        assert!(matches!(
            error,
            ExtensionError::Transport(TransportError::HandshakeRejected(_))
        ));
    }
}
