use std::collections::VecDeque;

use picteus_core::current_unix_timestamp_ms;
use picteus_protocol::LogLevel;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
/// Public struct `HostLogEntry` used across Picteus components.
pub struct HostLogEntry {
    pub extension_id: String,
    pub level: LogLevel,
    pub message: String,
    pub milliseconds: u64,
}

impl HostLogEntry {
    pub fn new(extension_id: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            extension_id: extension_id.into(),
            level,
            message: message.into(),
            milliseconds: current_unix_timestamp_ms(),
        }
    }
}

/// Bounded history of extension log records; the oldest entry is evicted first.
#[derive(Debug)]
pub(crate) struct LogHistory {
    capacity: usize,
    entries: VecDeque<HostLogEntry>,
}

impl LogHistory {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, entry: HostLogEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub(crate) fn snapshot(&self, extension_id: Option<&str>) -> Vec<HostLogEntry> {
        self.entries
            .iter()
            .filter(|entry| extension_id.map_or(true, |id| entry.extension_id == id))
            .cloned()
            .collect()
    }
}

/// Re-emits an extension log record through `tracing` at the matching level.
pub(crate) fn forward_to_tracing(entry: &HostLogEntry) {
    let extension_id = entry.extension_id.as_str();
    let message = entry.message.as_str();
    match entry.level {
        LogLevel::Debug => tracing::debug!(extension_id, "{message}"),
        LogLevel::Info => tracing::info!(extension_id, "{message}"),
        LogLevel::Warn => tracing::warn!(extension_id, "{message}"),
        LogLevel::Error => tracing::error!(extension_id, "{message}"),
    }
}
