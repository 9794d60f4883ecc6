use std::fmt;

use serde::{Deserialize, Serialize};

/// Handshake channel an extension opens first; the ack carries its settings.
pub const CONNECTION_CHANNEL: &str = "connection";
/// Extension-to-host channel for logs, status reports and free-form values.
pub const NOTIFICATIONS_CHANNEL: &str = "notifications";
/// Extension-to-host channel carrying UI intents.
pub const INTENT_CHANNEL: &str = "extension.intent";
/// Host-to-extension channel pushing updated settings.
pub const SETTINGS_CHANNEL: &str = "extension.settings";
/// Host-to-extension shutdown signal.
pub const TERMINATE_CHANNEL: &str = "extension.terminate";

/// Environment a host passes to a spawned extension process.
pub const PICTEUS_EXTENSION_ID_ENV: &str = "PICTEUS_EXTENSION_ID";
pub const PICTEUS_API_KEY_ENV: &str = "PICTEUS_API_KEY";
pub const PICTEUS_CACHE_DIRECTORY_ENV: &str = "PICTEUS_CACHE_DIRECTORY";
pub const PICTEUS_TERMINATE_GRACE_MS_ENV: &str = "PICTEUS_TERMINATE_GRACE_MS";

/// Channels an extension manifest may subscribe to.
pub const SUBSCRIBABLE_CHANNELS: &[&str] = &[
    "image.created",
    "image.updated",
    "image.deleted",
    "image.computeTags",
    "image.computeFeatures",
    "image.computeEmbeddings",
    "text.computeEmbeddings",
    "image.runCommand",
    "process.runCommand",
];

/// Returns true when `channel` names an application event extensions may subscribe to.
pub fn is_subscribable_channel(channel: &str) -> bool {
    SUBSCRIBABLE_CHANNELS.contains(&channel)
}

/// Application event routed to an extension's `on_event` hook.
///
/// Channel names the runtime does not know are preserved in [`NotificationEvent::Other`]
/// so newer hosts can talk to older extensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationEvent {
    ImageCreated,
    ImageUpdated,
    ImageDeleted,
    ImageComputeTags,
    ImageComputeFeatures,
    ImageComputeEmbeddings,
    TextComputeEmbeddings,
    ImageRunCommand,
    ProcessRunCommand,
    Other(String),
}

impl NotificationEvent {
    pub fn from_channel(channel: &str) -> Self {
        match channel {
            "image.created" => Self::ImageCreated,
            "image.updated" => Self::ImageUpdated,
            "image.deleted" => Self::ImageDeleted,
            "image.computeTags" => Self::ImageComputeTags,
            "image.computeFeatures" => Self::ImageComputeFeatures,
            "image.computeEmbeddings" => Self::ImageComputeEmbeddings,
            "text.computeEmbeddings" => Self::TextComputeEmbeddings,
            "image.runCommand" => Self::ImageRunCommand,
            "process.runCommand" => Self::ProcessRunCommand,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::ImageCreated => "image.created",
            Self::ImageUpdated => "image.updated",
            Self::ImageDeleted => "image.deleted",
            Self::ImageComputeTags => "image.computeTags",
            Self::ImageComputeFeatures => "image.computeFeatures",
            Self::ImageComputeEmbeddings => "image.computeEmbeddings",
            Self::TextComputeEmbeddings => "text.computeEmbeddings",
            Self::ImageRunCommand => "image.runCommand",
            Self::ProcessRunCommand => "process.runCommand",
            Self::Other(raw) => raw.as_str(),
        }
    }

    /// Returns true for events whose value is `{id}` of a single image.
    pub fn is_image_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::ImageCreated
                | Self::ImageUpdated
                | Self::ImageDeleted
                | Self::ImageComputeTags
                | Self::ImageComputeFeatures
                | Self::ImageComputeEmbeddings
        )
    }
}

impl From<String> for NotificationEvent {
    fn from(value: String) -> Self {
        Self::from_channel(&value)
    }
}

impl From<NotificationEvent> for String {
    fn from(value: NotificationEvent) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
