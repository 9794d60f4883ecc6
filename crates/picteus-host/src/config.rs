use std::path::PathBuf;

pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_TERMINATE_GRACE_MS: u64 = 5_000;
pub const DEFAULT_LOG_HISTORY_CAPACITY: usize = 512;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `HostConfig` used across Picteus components.
pub struct HostConfig {
    pub handshake_timeout_ms: u64,
    pub terminate_grace_ms: u64,
    pub log_history_capacity: usize,
    pub event_capacity: usize,
    /// Where extension settings are persisted; in-memory only when unset.
    pub settings_dir: Option<PathBuf>,
    /// Parent of the per-extension cache directories handed to spawned processes.
    pub cache_root: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            terminate_grace_ms: DEFAULT_TERMINATE_GRACE_MS,
            log_history_capacity: DEFAULT_LOG_HISTORY_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            settings_dir: None,
            cache_root: None,
        }
    }
}

impl HostConfig {
    pub fn with_settings_dir(mut self, settings_dir: impl Into<PathBuf>) -> Self {
        self.settings_dir = Some(settings_dir.into());
        self
    }

    pub fn cache_directory_for(&self, extension_id: &str) -> Option<PathBuf> {
        self.cache_root
            .as_ref()
            .map(|root| root.join(extension_id))
    }
}
