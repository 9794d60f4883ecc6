//! Host side of the Picteus extension protocol.
//!
//! [`ExtensionHost`] keeps the registry of installed extensions, validates
//! their connection handshakes, routes application events to them, answers
//! their UI intents through a pluggable [`IntentPresenter`], stores their
//! settings, and records their logs. [`ExtensionProcess`] spawns an
//! extension from its manifest and supervises its shutdown.

mod config;
mod error;
mod events;
mod host;
mod intents;
mod logs;
mod presenter;
mod process;
mod registry;
mod settings;

pub use config::{
    HostConfig, DEFAULT_EVENT_CAPACITY, DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_LOG_HISTORY_CAPACITY,
    DEFAULT_TERMINATE_GRACE_MS,
};
pub use error::HostError;
pub use events::{ExtensionStatus, HostEvent, IntentClosure};
pub use host::ExtensionHost;
pub use logs::HostLogEntry;
pub use presenter::{
    CancellingPresenter, IntentPresenter, IntentRequest, PresentationOutcome, CANCELLED_REASON,
};
pub use process::{ExtensionProcess, ProcessExit};
pub use registry::ExtensionIdentity;
