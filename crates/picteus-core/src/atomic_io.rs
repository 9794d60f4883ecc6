use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::{bail, Context, Result};
use serde_json::Value;

static TEMP_FILE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Stores `value` as pretty JSON; the file is swapped in with a rename.
pub fn write_json_atomic(path: &Path, value: &Value) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    if path.is_dir() {
        bail!("destination path '{}' is a directory", path.display());
    }
    let rendered = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to render JSON for {}", path.display()))?;

    let staging = staging_path(path);
    if let Some(parent) = staging.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(&staging, rendered)
        .with_context(|| format!("failed to stage {}", staging.display()))?;
    if let Err(error) = std::fs::rename(&staging, path) {
        let _ = std::fs::remove_file(&staging);
        return Err(error).with_context(|| format!("failed to replace {}", path.display()));
    }
    Ok(())
}

/// Reads a JSON document; a missing file is `Ok(None)`.
pub fn read_json_file(path: &Path) -> Result<Option<Value>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(error).with_context(|| format!("failed to read {}", path.display()))
        }
    };
    serde_json::from_str(&raw)
        .map(Some)
        .with_context(|| format!("invalid JSON in {}", path.display()))
}

fn staging_path(path: &Path) -> PathBuf {
    let parent = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let stem = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("state");
    parent.join(format!(
        ".{stem}.tmp-{}-{}",
        std::process::id(),
        TEMP_FILE_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    ))
}
