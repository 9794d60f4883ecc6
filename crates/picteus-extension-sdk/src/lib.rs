//! Extension-side runtime for the Picteus extension protocol.
//!
//! An extension implements [`PicteusExtension`] and hands it to
//! [`ExtensionRuntime`], which performs the handshake, drives the lifecycle
//! state machine, dispatches host notifications to the extension's hooks, and
//! exposes a [`Communicator`] for logs, notifications, intents, and the typed
//! host API clients.

mod api;
mod communicator;
mod config;
mod dispatcher;
mod extension;
mod lifecycle;
mod runtime;

pub use api::{
    ApiClients, ApiError, ExtensionApi, ImageApi, ImageFeature, ImageSummary, RepositoryApi,
    RepositorySummary,
};
pub use communicator::Communicator;
pub use config::{
    ExtensionRuntimeConfig, PICTEUS_API_KEY_ENV, PICTEUS_CACHE_DIRECTORY_ENV,
    PICTEUS_EXTENSION_ID_ENV, PICTEUS_TERMINATE_GRACE_MS_ENV,
};
pub use dispatcher::DispatchMetricsSnapshot;
pub use extension::{ExtensionContext, PicteusExtension};
pub use lifecycle::{LifecycleState, LifecycleTracker};
pub use runtime::{ExtensionRuntime, RunReport, TerminationCause};

pub use picteus_protocol::{
    DialogButtons, DialogContent, DialogType, ErrorKind, ExtensionError, ImageReference,
    ImagesContent, Intent, LogLevel, NotificationEvent, ShowContent, ShowType, UiAnchor,
    UiContent,
};
