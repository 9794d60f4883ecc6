use std::path::PathBuf;

use clap::Parser;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "picteus",
    about = "Inspect Picteus extension manifests and exercise extension processes",
    version
)]
/// Public struct `Cli` used across Picteus components.
pub struct Cli {
    #[arg(
        long = "extension-validate",
        env = "PICTEUS_EXTENSION_VALIDATE",
        conflicts_with = "extension_exec_manifest",
        conflicts_with = "extension_list",
        conflicts_with = "extension_show",
        value_name = "path",
        help = "Validate an extension manifest JSON file and exit"
    )]
    pub extension_validate: Option<PathBuf>,

    #[arg(
        long = "extension-show",
        env = "PICTEUS_EXTENSION_SHOW",
        conflicts_with = "extension_exec_manifest",
        conflicts_with = "extension_list",
        conflicts_with = "extension_validate",
        value_name = "path",
        help = "Print extension manifest metadata, events, commands and UI elements"
    )]
    pub extension_show: Option<PathBuf>,

    #[arg(
        long = "extension-list",
        env = "PICTEUS_EXTENSION_LIST",
        conflicts_with = "extension_exec_manifest",
        conflicts_with = "extension_validate",
        conflicts_with = "extension_show",
        help = "List discovered extension manifests from a root path and exit"
    )]
    pub extension_list: bool,

    #[arg(
        long = "extension-list-root",
        env = "PICTEUS_EXTENSION_LIST_ROOT",
        default_value = ".picteus/extensions",
        requires = "extension_list",
        value_name = "path",
        help = "Root directory scanned by --extension-list"
    )]
    pub extension_list_root: PathBuf,

    #[arg(
        long = "extension-exec-manifest",
        env = "PICTEUS_EXTENSION_EXEC_MANIFEST",
        conflicts_with = "extension_validate",
        conflicts_with = "extension_list",
        conflicts_with = "extension_show",
        requires = "extension_exec_event",
        value_name = "path",
        help = "Spawn the extension from a manifest, deliver one event and exit"
    )]
    pub extension_exec_manifest: Option<PathBuf>,

    #[arg(
        long = "extension-exec-event",
        env = "PICTEUS_EXTENSION_EXEC_EVENT",
        requires = "extension_exec_manifest",
        value_name = "channel",
        help = "Event channel delivered by --extension-exec-manifest (for example image.computeTags)"
    )]
    pub extension_exec_event: Option<String>,

    #[arg(
        long = "extension-exec-payload-file",
        env = "PICTEUS_EXTENSION_EXEC_PAYLOAD_FILE",
        requires = "extension_exec_manifest",
        value_name = "path",
        help = "JSON object file used as the event value; defaults to {}"
    )]
    pub extension_exec_payload_file: Option<PathBuf>,

    #[arg(
        long = "extension-exec-api-key",
        env = "PICTEUS_EXTENSION_EXEC_API_KEY",
        requires = "extension_exec_manifest",
        value_name = "key",
        help = "API key handed to the spawned extension; generated per run when unset"
    )]
    pub extension_exec_api_key: Option<String>,

    #[arg(
        long = "extension-exec-timeout-ms",
        env = "PICTEUS_EXTENSION_EXEC_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        value_name = "ms",
        help = "Upper bound for start-up and for the event reply"
    )]
    pub extension_exec_timeout_ms: u64,

    #[arg(
        long = "extension-terminate-grace-ms",
        env = "PICTEUS_EXTENSION_TERMINATE_GRACE_MS",
        value_parser = parse_positive_u64,
        value_name = "ms",
        help = "Grace period before a terminated extension is killed; defaults to the manifest value"
    )]
    pub extension_terminate_grace_ms: Option<u64>,
}

impl Cli {
    /// Returns true when at least one command flag was given.
    pub fn has_command(&self) -> bool {
        self.extension_validate.is_some()
            || self.extension_show.is_some()
            || self.extension_list
            || self.extension_exec_manifest.is_some()
    }
}
