//! Wire model of the Picteus extension protocol.
//!
//! Defines channel names, notifications and acknowledgement frames, the
//! intent union, the payloads exchanged on the `connection` and
//! `notifications` channels, and the error taxonomy shared by the host and
//! extension runtimes.

pub mod channels;
pub mod error;
pub mod frame;
pub mod intent;
pub mod payloads;

pub use channels::{
    is_subscribable_channel, NotificationEvent, CONNECTION_CHANNEL, INTENT_CHANNEL,
    NOTIFICATIONS_CHANNEL, PICTEUS_API_KEY_ENV, PICTEUS_CACHE_DIRECTORY_ENV,
    PICTEUS_EXTENSION_ID_ENV, PICTEUS_TERMINATE_GRACE_MS_ENV, SETTINGS_CHANNEL,
    SUBSCRIBABLE_CHANNELS, TERMINATE_CHANNEL,
};
pub use error::{ErrorKind, ExtensionError, TransportError, WireError};
pub use frame::{
    best_effort_context_id, build_error_ack_frame, classify_wire_frame_parse_error,
    encode_wire_frame, parse_wire_frame, AckOutcome, Acknowledgement, Notification, WireFrame,
    WIRE_ERROR_CODE_INVALID_CHANNEL, WIRE_ERROR_CODE_INVALID_CONTEXT_ID,
    WIRE_ERROR_CODE_INVALID_JSON, WIRE_ERROR_CODE_MALFORMED_FRAME,
};
pub use intent::{
    DialogButtons, DialogContent, DialogType, ImageReference, ImagesContent, Intent,
    IntentEnvelope, IntentKind, ShowContent, ShowType, UiAnchor, UiContent,
};
pub use payloads::{
    ConnectionAccepted, ConnectionPayload, ExtensionReportedStatus, ImageEventValue,
    ImageRunCommandValue, LogLevel, LogRecord, NotificationsPayload, ProcessRunCommandValue,
    SettingsValue, TextEmbeddingsValue,
};
