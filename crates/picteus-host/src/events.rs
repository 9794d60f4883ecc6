use picteus_protocol::IntentKind;
use serde_json::Value;

use crate::logs::HostLogEntry;

/// Host-side status of a registered extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionStatus {
    /// Known to the host, never connected.
    Registered,
    /// Handshake accepted; waiting for the extension to report readiness.
    Connected,
    Ready,
    /// The transport was lost or the extension terminated.
    NotReady,
    /// The extension reported a start-up failure.
    Failed,
}

impl ExtensionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Connected => "connected",
            Self::Ready => "ready",
            Self::NotReady => "not_ready",
            Self::Failed => "failed",
        }
    }

    /// Returns true when application events may be delivered.
    pub fn accepts_events(&self) -> bool {
        matches!(self, Self::Connected | Self::Ready)
    }
}

impl std::fmt::Display for ExtensionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an intent presentation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum IntentClosure {
    Resolved(Value),
    Cancelled(String),
    Rejected(String),
}

/// Stream item published to UI consumers through [`crate::ExtensionHost::subscribe`].
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    StatusChanged {
        extension_id: String,
        status: ExtensionStatus,
    },
    Log(HostLogEntry),
    Notification {
        extension_id: String,
        value: Value,
    },
    IntentOpened {
        extension_id: String,
        context_id: String,
        kind: IntentKind,
    },
    IntentClosed {
        extension_id: String,
        context_id: String,
        closure: IntentClosure,
    },
}
