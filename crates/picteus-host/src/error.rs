use picteus_protocol::{ExtensionError, TransportError};
use thiserror::Error;

/// Failures of host-side extension management.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("extension '{0}' is not registered")]
    UnknownExtension(String),
    #[error("extension '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("extension '{extension_id}' is not connected")]
    NotConnected { extension_id: String },
    #[error("extension '{extension_id}' does not subscribe to '{channel}'")]
    NotSubscribed {
        extension_id: String,
        channel: String,
    },
    #[error("no registered extension provides command '{0}'")]
    UnknownCommand(String),
    #[error("invalid extension manifest: {0}")]
    Manifest(String),
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("failed to persist settings for extension '{extension_id}': {message}")]
    Persistence {
        extension_id: String,
        message: String,
    },
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("extension process error: {0}")]
    Process(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Extension(#[from] ExtensionError),
}
