//! Extension manifest model, validation, and discovery for Picteus.
//!
//! An extension ships an `extension.json` manifest describing how to launch
//! it, which application events it subscribes to, the commands it contributes
//! and the JSON Schema of its settings. This crate loads and validates those
//! manifests, renders operator reports, and resolves launch commands for the
//! host's process supervisor.

use std::{
    collections::HashSet,
    fs,
    hash::Hash,
    path::{Component, Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use jsonschema::validator_for;
use picteus_protocol::{is_subscribable_channel, UiAnchor};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

mod list;

pub use list::{
    list_extension_manifests, render_extension_list_report, ExtensionListEntry,
    ExtensionListInvalidEntry, ExtensionListReport,
};

pub const EXTENSION_MANIFEST_FILE_NAME: &str = "extension.json";
const EXTENSION_MANIFEST_SCHEMA_VERSION: u32 = 1;
const EXTENSION_TERMINATE_GRACE_MS_DEFAULT: u64 = 5_000;
const EXTENSION_TERMINATE_GRACE_MS_MAX: u64 = 300_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
/// Enumerates supported `ExtensionEnvironment` values.
pub enum ExtensionEnvironment {
    Process,
    Python,
    Node,
}

impl ExtensionEnvironment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Python => "python",
            Self::Node => "node",
        }
    }

    /// Interpreter that runs the entrypoint, `None` when it is executed directly.
    pub fn interpreter(self) -> Option<&'static str> {
        match self {
            Self::Process => None,
            Self::Python => Some("python3"),
            Self::Node => Some("node"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `ExtensionRuntimeSpec` used across Picteus components.
pub struct ExtensionRuntimeSpec {
    pub environment: ExtensionEnvironment,
    pub entrypoint: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
/// Enumerates supported `CommandTarget` values.
pub enum CommandTarget {
    Process,
    Images,
}

impl CommandTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Images => "images",
        }
    }

    /// Channel the host uses to run a command with this target.
    pub fn channel(self) -> &'static str {
        match self {
            Self::Process => "process.runCommand",
            Self::Images => "image.runCommand",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `ExtensionCommand` used across Picteus components.
pub struct ExtensionCommand {
    pub id: String,
    pub on: CommandTarget,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `ExtensionUiElement` used across Picteus components.
pub struct ExtensionUiElement {
    pub anchor: UiAnchor,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `ExtensionManifest` used across Picteus components.
pub struct ExtensionManifest {
    pub schema_version: u32,
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub runtime: ExtensionRuntimeSpec,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub commands: Vec<ExtensionCommand>,
    #[serde(default = "default_settings_schema")]
    pub settings: Value,
    #[serde(default)]
    pub ui: Vec<ExtensionUiElement>,
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,
}

impl ExtensionManifest {
    /// Returns true when the extension subscribes to `channel`.
    pub fn subscribes_to(&self, channel: &str) -> bool {
        self.events.iter().any(|event| event == channel)
    }

    pub fn command(&self, command_id: &str) -> Option<&ExtensionCommand> {
        self.commands.iter().find(|command| command.id == command_id)
    }
}

fn default_settings_schema() -> Value {
    json!({"type": "object"})
}

fn default_terminate_grace_ms() -> u64 {
    EXTENSION_TERMINATE_GRACE_MS_DEFAULT
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `ExtensionManifestSummary` used across Picteus components.
pub struct ExtensionManifestSummary {
    pub manifest_path: PathBuf,
    pub id: String,
    pub name: String,
    pub version: String,
    pub environment: String,
    pub entrypoint: String,
    pub event_count: usize,
    pub command_count: usize,
    pub ui_count: usize,
    pub terminate_grace_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Program, arguments and working directory used to spawn an extension.
pub struct ExtensionLaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

pub fn load_extension_manifest(path: &Path) -> Result<ExtensionManifest> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read extension manifest {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse extension manifest {}", path.display()))
}

pub fn validate_extension_manifest(path: &Path) -> Result<ExtensionManifestSummary> {
    let (_, summary) = load_and_validate_extension_manifest(path)?;
    Ok(summary)
}

pub fn load_and_validate_extension_manifest(
    path: &Path,
) -> Result<(ExtensionManifest, ExtensionManifestSummary)> {
    let manifest = load_extension_manifest(path)?;
    validate_loaded_extension_manifest(&manifest)?;
    let summary = ExtensionManifestSummary {
        manifest_path: path.to_path_buf(),
        id: manifest.id.clone(),
        name: manifest.name.clone(),
        version: manifest.version.clone(),
        environment: manifest.runtime.environment.as_str().to_string(),
        entrypoint: manifest.runtime.entrypoint.clone(),
        event_count: manifest.events.len(),
        command_count: manifest.commands.len(),
        ui_count: manifest.ui.len(),
        terminate_grace_ms: manifest.terminate_grace_ms,
    };
    Ok((manifest, summary))
}

/// Checks an in-memory manifest; the host uses this for manifests it did not read from disk.
pub fn validate_loaded_extension_manifest(manifest: &ExtensionManifest) -> Result<()> {
    validate_manifest_schema(manifest)?;
    validate_manifest_identifiers(manifest)?;
    validate_entrypoint_path(&manifest.runtime.entrypoint)?;
    validate_events(&manifest.events)?;
    validate_command_registrations(&manifest.commands)?;
    validate_settings_schema(&manifest.settings)?;
    validate_ui_elements(&manifest.ui)?;
    validate_terminate_grace_ms(manifest.terminate_grace_ms)?;
    Ok(())
}

/// Validates `settings` against the manifest's settings schema.
pub fn validate_extension_settings(manifest: &ExtensionManifest, settings: &Value) -> Result<()> {
    let validator = validator_for(&manifest.settings).map_err(|error| {
        anyhow!(
            "extension '{}' settings schema is invalid: {error}",
            manifest.id
        )
    })?;
    let mut errors = validator.iter_errors(settings);
    if let Some(first) = errors.next() {
        bail!("invalid settings for extension '{}': {first}", manifest.id);
    }
    Ok(())
}

pub fn render_extension_manifest_report(
    summary: &ExtensionManifestSummary,
    manifest: &ExtensionManifest,
) -> String {
    let mut events = manifest.events.clone();
    events.sort();
    let mut commands = manifest
        .commands
        .iter()
        .map(|command| {
            format!(
                "{} on={} label={}",
                command.id,
                command.on.as_str(),
                command.label
            )
        })
        .collect::<Vec<_>>();
    commands.sort();
    let ui = manifest
        .ui
        .iter()
        .map(|element| {
            let anchor = match element.anchor {
                UiAnchor::Modal => "modal",
                UiAnchor::Sidebar => "sidebar",
            };
            format!("{anchor} {}", element.url)
        })
        .collect::<Vec<_>>();
    format!(
        "extension show:\n- path: {}\n- id: {}\n- name: {}\n- version: {}\n- environment: {}\n- entrypoint: {}\n- terminate_grace_ms: {}\n- events ({}):\n{}\n- commands ({}):\n{}\n- ui ({}):\n{}",
        summary.manifest_path.display(),
        summary.id,
        summary.name,
        summary.version,
        summary.environment,
        summary.entrypoint,
        summary.terminate_grace_ms,
        summary.event_count,
        render_bullet_lines(&events),
        summary.command_count,
        render_bullet_lines(&commands),
        summary.ui_count,
        render_bullet_lines(&ui)
    )
}

fn render_bullet_lines(items: &[String]) -> String {
    if items.is_empty() {
        return "- none".to_string();
    }
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn load_extension_exec_payload(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read extension payload {}", path.display()))?;
    let payload = serde_json::from_str::<Value>(&raw)
        .with_context(|| format!("failed to parse extension payload {}", path.display()))?;
    if !payload.is_object() {
        bail!("extension payload must be a JSON object");
    }
    Ok(payload)
}

pub fn resolve_extension_entrypoint(manifest_path: &Path, entrypoint: &str) -> Result<PathBuf> {
    validate_entrypoint_path(entrypoint)?;
    let manifest_dir = manifest_directory(manifest_path)?;
    let candidate = manifest_dir.join(entrypoint.trim());
    let resolved = candidate.canonicalize().with_context(|| {
        format!(
            "failed to resolve extension entrypoint {}",
            candidate.display()
        )
    })?;
    if !resolved.starts_with(&manifest_dir) {
        bail!(
            "extension entrypoint '{}' resolves outside manifest directory",
            entrypoint
        );
    }
    if !resolved.is_file() {
        bail!(
            "extension entrypoint '{}' is not a regular file",
            resolved.display()
        );
    }
    Ok(resolved)
}

/// Builds the command line the supervisor spawns for `manifest`.
pub fn build_extension_launch_command(
    manifest_path: &Path,
    manifest: &ExtensionManifest,
) -> Result<ExtensionLaunchCommand> {
    let entrypoint = resolve_extension_entrypoint(manifest_path, &manifest.runtime.entrypoint)?;
    let working_dir = manifest_directory(manifest_path)?;
    let (program, args) = match manifest.runtime.environment.interpreter() {
        None => (entrypoint, manifest.runtime.args.clone()),
        Some(interpreter) => {
            let mut args = Vec::with_capacity(manifest.runtime.args.len() + 1);
            args.push(entrypoint.display().to_string());
            args.extend(manifest.runtime.args.iter().cloned());
            (PathBuf::from(interpreter), args)
        }
    };
    Ok(ExtensionLaunchCommand {
        program,
        args,
        working_dir,
    })
}

fn manifest_directory(manifest_path: &Path) -> Result<PathBuf> {
    let manifest_dir = manifest_path.parent().ok_or_else(|| {
        anyhow!(
            "extension manifest path '{}' has no parent directory",
            manifest_path.display()
        )
    })?;
    let manifest_dir = if manifest_dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        manifest_dir
    };
    manifest_dir.canonicalize().with_context(|| {
        format!(
            "failed to resolve manifest directory {}",
            manifest_dir.display()
        )
    })
}

fn validate_manifest_schema(manifest: &ExtensionManifest) -> Result<()> {
    if manifest.schema_version != EXTENSION_MANIFEST_SCHEMA_VERSION {
        bail!(
            "unsupported extension manifest schema '{}': expected {}",
            manifest.schema_version,
            EXTENSION_MANIFEST_SCHEMA_VERSION
        );
    }
    Ok(())
}

fn validate_manifest_identifiers(manifest: &ExtensionManifest) -> Result<()> {
    validate_non_empty_field("id", &manifest.id)?;
    validate_non_empty_field("name", &manifest.name)?;
    validate_non_empty_field("version", &manifest.version)?;
    if !is_valid_extension_identifier(&manifest.id) {
        bail!(
            "extension manifest id '{}' must contain only lowercase alphanumeric, dash, underscore, or dot characters",
            manifest.id
        );
    }
    Ok(())
}

fn validate_non_empty_field(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("extension manifest '{}' must not be empty", name);
    }
    Ok(())
}

fn validate_entrypoint_path(entrypoint: &str) -> Result<()> {
    let trimmed = entrypoint.trim();
    if trimmed.is_empty() {
        bail!("extension manifest 'entrypoint' must not be empty");
    }
    let path = Path::new(trimmed);
    if path.is_absolute() {
        bail!(
            "extension manifest entrypoint '{}' must be relative",
            trimmed
        );
    }
    for component in path.components() {
        match component {
            Component::ParentDir => {
                bail!(
                    "extension manifest entrypoint '{}' must not contain parent traversals",
                    trimmed
                );
            }
            Component::Prefix(_) | Component::RootDir => {
                bail!(
                    "extension manifest entrypoint '{}' must be relative",
                    trimmed
                );
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(())
}

fn validate_unique<T>(entries: &[T], field_name: &str) -> Result<()>
where
    T: Eq + Hash,
{
    let mut seen = HashSet::new();
    for entry in entries {
        if !seen.insert(entry) {
            bail!(
                "extension manifest '{}' contains duplicate entries",
                field_name
            );
        }
    }
    Ok(())
}

fn validate_events(events: &[String]) -> Result<()> {
    for event in events {
        if !is_subscribable_channel(event) {
            bail!(
                "extension manifest event '{}' is not a subscribable channel",
                event
            );
        }
    }
    validate_unique(events, "events")
}

fn validate_command_registrations(commands: &[ExtensionCommand]) -> Result<()> {
    let mut seen = HashSet::new();
    for command in commands {
        let id = command.id.trim();
        if id.is_empty() {
            bail!("extension manifest command id must not be empty");
        }
        if !is_valid_command_identifier(id) {
            bail!(
                "extension manifest command '{}' must contain only alphanumeric, dash, underscore, or dot characters",
                id
            );
        }
        if !seen.insert(id.to_string()) {
            bail!("extension manifest commands contain duplicate id '{}'", id);
        }
        if command.label.trim().is_empty() {
            bail!(
                "extension manifest command '{}' label must not be empty",
                id
            );
        }
        if let Some(parameters) = command.parameters.as_ref() {
            validate_command_parameters_schema(id, parameters)?;
        }
    }
    Ok(())
}

fn validate_command_parameters_schema(id: &str, schema: &Value) -> Result<()> {
    let schema_object = schema.as_object().ok_or_else(|| {
        anyhow!(
            "extension manifest command '{}' parameters must be a JSON object",
            id
        )
    })?;
    let schema_type = schema_object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            anyhow!(
                "extension manifest command '{}' parameters must include string field 'type'",
                id
            )
        })?;
    if schema_type != "object" {
        bail!(
            "extension manifest command '{}' parameters field 'type' must be 'object'",
            id
        );
    }
    validator_for(schema).map_err(|error| {
        anyhow!(
            "extension manifest command '{}' parameters schema is invalid: {error}",
            id
        )
    })?;
    Ok(())
}

fn validate_settings_schema(schema: &Value) -> Result<()> {
    if !schema.is_object() {
        bail!("extension manifest 'settings' must be a JSON Schema object");
    }
    validator_for(schema)
        .map_err(|error| anyhow!("extension manifest 'settings' schema is invalid: {error}"))?;
    Ok(())
}

fn validate_ui_elements(elements: &[ExtensionUiElement]) -> Result<()> {
    for element in elements {
        if element.url.trim().is_empty() {
            bail!("extension manifest ui url must not be empty");
        }
    }
    Ok(())
}

fn validate_terminate_grace_ms(grace_ms: u64) -> Result<()> {
    if grace_ms == 0 {
        bail!("extension manifest 'terminate_grace_ms' must be greater than 0");
    }
    if grace_ms > EXTENSION_TERMINATE_GRACE_MS_MAX {
        bail!(
            "extension manifest 'terminate_grace_ms' must be <= {}",
            EXTENSION_TERMINATE_GRACE_MS_MAX
        );
    }
    Ok(())
}

/// Lowercase alphanumeric, dash, underscore, or dot.
pub fn is_valid_extension_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|character| {
            character.is_ascii_lowercase()
                || character.is_ascii_digit()
                || character == '-'
                || character == '_'
                || character == '.'
        })
}

fn is_valid_command_identifier(name: &str) -> bool {
    name.chars().all(|character| {
        character.is_ascii_alphanumeric() || character == '-' || character == '_' || character == '.'
    })
}
