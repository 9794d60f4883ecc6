//! `picteus` command-line entry points.
//!
//! Flat `--extension-*` flags validate, show and list extension manifests, or
//! spawn one extension process and deliver a single event to it through the
//! host runtime.

mod cli_args;
mod commands;

use anyhow::{bail, Result};

pub use cli_args::Cli;
pub use commands::{
    execute_extension_event, execute_extension_exec_command, execute_extension_list_command,
    execute_extension_show_command, execute_extension_validate_command,
    render_extension_exec_summary, ExtensionExecSummary,
};

/// Runs every command requested on the command line.
pub async fn run_cli(cli: Cli) -> Result<()> {
    if !cli.has_command() {
        bail!("no command requested; see --help");
    }
    execute_extension_validate_command(&cli)?;
    execute_extension_show_command(&cli)?;
    execute_extension_list_command(&cli)?;
    execute_extension_exec_command(&cli).await
}
