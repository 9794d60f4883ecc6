use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};

use crate::{load_and_validate_extension_manifest, EXTENSION_MANIFEST_FILE_NAME};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `ExtensionListEntry` used across Picteus components.
pub struct ExtensionListEntry {
    pub manifest_path: PathBuf,
    pub id: String,
    pub version: String,
    pub environment: String,
    pub event_count: usize,
    pub command_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `ExtensionListInvalidEntry` used across Picteus components.
pub struct ExtensionListInvalidEntry {
    pub manifest_path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `ExtensionListReport` used across Picteus components.
pub struct ExtensionListReport {
    pub list_root: PathBuf,
    pub entries: Vec<ExtensionListEntry>,
    pub invalid_entries: Vec<ExtensionListInvalidEntry>,
}

/// Discovers the installed extensions under `root`.
///
/// Each `<root>/<dir>/extension.json` is one candidate. A missing root is an
/// empty installation. Manifests that fail validation, and every manifest
/// sharing an id with another one, land in `invalid_entries`.
pub fn list_extension_manifests(root: &Path) -> Result<ExtensionListReport> {
    let mut report = ExtensionListReport {
        list_root: root.to_path_buf(),
        entries: vec![],
        invalid_entries: vec![],
    };
    if !root.exists() {
        return Ok(report);
    }
    if !root.is_dir() {
        bail!(
            "extension list root '{}' is not a directory",
            root.display()
        );
    }

    let mut by_id: BTreeMap<String, Vec<ExtensionListEntry>> = BTreeMap::new();
    for manifest_path in candidate_manifests(root)? {
        match load_and_validate_extension_manifest(&manifest_path) {
            Ok((manifest, summary)) => by_id
                .entry(manifest.id.clone())
                .or_default()
                .push(ExtensionListEntry {
                    manifest_path: summary.manifest_path,
                    id: manifest.id,
                    version: manifest.version,
                    environment: summary.environment,
                    event_count: summary.event_count,
                    command_count: summary.command_count,
                }),
            Err(error) => report.invalid_entries.push(ExtensionListInvalidEntry {
                manifest_path,
                error: format!("{error:#}"),
            }),
        }
    }

    for (id, mut declared) in by_id {
        if declared.len() == 1 {
            report.entries.append(&mut declared);
            continue;
        }
        let paths = declared
            .iter()
            .map(|entry| entry.manifest_path.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        report
            .invalid_entries
            .extend(declared.into_iter().map(|entry| ExtensionListInvalidEntry {
                manifest_path: entry.manifest_path,
                error: format!("extension id '{id}' is declared by several manifests: {paths}"),
            }));
    }
    report
        .invalid_entries
        .sort_by(|left, right| left.manifest_path.cmp(&right.manifest_path));
    Ok(report)
}

fn candidate_manifests(root: &Path) -> Result<Vec<PathBuf>> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(root)
        .with_context(|| format!("failed to read extension root {}", root.display()))?
    {
        let directory = entry
            .with_context(|| format!("failed to read an entry of {}", root.display()))?
            .path();
        let manifest_path = directory.join(EXTENSION_MANIFEST_FILE_NAME);
        if directory.is_dir() && manifest_path.is_file() {
            candidates.push(manifest_path);
        }
    }
    candidates.sort();
    Ok(candidates)
}

pub fn render_extension_list_report(report: &ExtensionListReport) -> String {
    let header = format!(
        "extension list: root={} count={} invalid={}",
        report.list_root.display(),
        report.entries.len(),
        report.invalid_entries.len()
    );
    let valid = report.entries.iter().map(|entry| {
        format!(
            "extension: id={} version={} environment={} events={} commands={} manifest={}",
            entry.id,
            entry.version,
            entry.environment,
            entry.event_count,
            entry.command_count,
            entry.manifest_path.display()
        )
    });
    let invalid = report.invalid_entries.iter().map(|invalid| {
        format!(
            "invalid: manifest={} error={}",
            invalid.manifest_path.display(),
            invalid.error
        )
    });
    std::iter::once(header)
        .chain(valid)
        .chain(invalid)
        .collect::<Vec<_>>()
        .join("\n")
}
