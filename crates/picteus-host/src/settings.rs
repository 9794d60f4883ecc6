use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use picteus_core::{lock_or_recover, read_json_file, write_json_atomic};
use serde_json::{json, Value};

use crate::error::HostError;

/// Current settings per extension, optionally persisted as `<dir>/<id>.json`.
#[derive(Debug)]
pub(crate) struct SettingsStore {
    dir: Option<PathBuf>,
    values: Mutex<HashMap<String, Value>>,
}

impl SettingsStore {
    pub(crate) fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            values: Mutex::new(HashMap::new()),
        }
    }

    /// Loads persisted settings for a newly registered extension.
    pub(crate) fn load(&self, extension_id: &str) {
        let value = self
            .settings_path(extension_id)
            .and_then(|path| read_persisted_settings(extension_id, &path))
            .unwrap_or_else(|| json!({}));
        lock_or_recover(&self.values).insert(extension_id.to_string(), value);
    }

    pub(crate) fn get(&self, extension_id: &str) -> Option<Value> {
        lock_or_recover(&self.values).get(extension_id).cloned()
    }

    pub(crate) fn replace(&self, extension_id: &str, value: Value) -> Result<(), HostError> {
        if let Some(path) = self.settings_path(extension_id) {
            write_json_atomic(&path, &value).map_err(|error| HostError::Persistence {
                extension_id: extension_id.to_string(),
                message: format!("{error:#}"),
            })?;
        }
        lock_or_recover(&self.values).insert(extension_id.to_string(), value);
        Ok(())
    }

    fn settings_path(&self, extension_id: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{extension_id}.json")))
    }
}

fn read_persisted_settings(extension_id: &str, path: &Path) -> Option<Value> {
    match read_json_file(path) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(
                extension_id,
                path = %path.display(),
                error = %format!("{error:#}"),
                "ignoring unreadable persisted settings"
            );
            None
        }
    }
}
