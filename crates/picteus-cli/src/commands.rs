use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Context, Result};
use picteus_core::current_unix_timestamp_ms;
use picteus_extensions::{
    list_extension_manifests, load_and_validate_extension_manifest, load_extension_exec_payload,
    render_extension_list_report, render_extension_manifest_report, validate_extension_manifest,
    ExtensionManifest,
};
use picteus_host::{
    CancellingPresenter, ExtensionHost, ExtensionIdentity, ExtensionProcess, ExtensionStatus,
    HostConfig, HostError, HostEvent,
};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

use crate::Cli;

#[derive(Debug, Clone, PartialEq)]
/// Public struct `ExtensionExecSummary` used across Picteus components.
pub struct ExtensionExecSummary {
    pub manifest_path: PathBuf,
    pub id: String,
    pub version: String,
    pub event: String,
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
    pub killed: bool,
    pub response: Value,
}

pub fn execute_extension_validate_command(cli: &Cli) -> Result<()> {
    let Some(path) = cli.extension_validate.as_ref() else {
        return Ok(());
    };
    let summary = validate_extension_manifest(path)?;
    println!(
        "extension validate: path={} id={} version={} environment={} entrypoint={} events={} commands={} ui={} terminate_grace_ms={}",
        summary.manifest_path.display(),
        summary.id,
        summary.version,
        summary.environment,
        summary.entrypoint,
        summary.event_count,
        summary.command_count,
        summary.ui_count,
        summary.terminate_grace_ms
    );
    Ok(())
}

pub fn execute_extension_show_command(cli: &Cli) -> Result<()> {
    let Some(path) = cli.extension_show.as_ref() else {
        return Ok(());
    };
    let (manifest, summary) = load_and_validate_extension_manifest(path)?;
    println!("{}", render_extension_manifest_report(&summary, &manifest));
    Ok(())
}

pub fn execute_extension_list_command(cli: &Cli) -> Result<()> {
    if !cli.extension_list {
        return Ok(());
    }
    let report = list_extension_manifests(&cli.extension_list_root)?;
    println!("{}", render_extension_list_report(&report));
    Ok(())
}

pub async fn execute_extension_exec_command(cli: &Cli) -> Result<()> {
    let Some(manifest_path) = cli.extension_exec_manifest.as_ref() else {
        return Ok(());
    };
    let event = cli
        .extension_exec_event
        .as_deref()
        .ok_or_else(|| anyhow!("--extension-exec-event is required"))?;
    let payload = match cli.extension_exec_payload_file.as_ref() {
        Some(path) => load_extension_exec_payload(path)?,
        None => json!({}),
    };
    let summary = execute_extension_event(
        manifest_path,
        event,
        payload,
        cli.extension_exec_api_key.clone(),
        Duration::from_millis(cli.extension_exec_timeout_ms),
        cli.extension_terminate_grace_ms.map(Duration::from_millis),
    )
    .await?;
    println!("{}", render_extension_exec_summary(&summary));
    println!("extension exec response: {}", summary.response);
    Ok(())
}

pub fn render_extension_exec_summary(summary: &ExtensionExecSummary) -> String {
    format!(
        "extension exec: path={} id={} version={} event={} duration_ms={} exit_code={} killed={}",
        summary.manifest_path.display(),
        summary.id,
        summary.version,
        summary.event,
        summary.duration_ms,
        summary
            .exit_code
            .map_or_else(|| "none".to_string(), |code| code.to_string()),
        summary.killed
    )
}

/// Spawns the extension, waits until it is ready, delivers `event` and shuts it down.
pub async fn execute_extension_event(
    manifest_path: &Path,
    event: &str,
    payload: Value,
    api_key: Option<String>,
    timeout: Duration,
    grace: Option<Duration>,
) -> Result<ExtensionExecSummary> {
    let (manifest, summary) = load_and_validate_extension_manifest(manifest_path)?;
    if !manifest.subscribes_to(event) {
        return Err(HostError::NotSubscribed {
            extension_id: manifest.id.clone(),
            channel: event.to_string(),
        }
        .into());
    }
    let api_key = api_key.unwrap_or_else(|| generate_api_key(&manifest));
    let grace = grace.unwrap_or(Duration::from_millis(manifest.terminate_grace_ms));
    let started = Instant::now();

    let host = ExtensionHost::new(HostConfig::default(), Arc::new(CancellingPresenter));
    host.register_extension(ExtensionIdentity::from_manifest(manifest.clone()), &api_key)?;
    let mut events = host.subscribe();
    let process = ExtensionProcess::spawn(
        manifest_path,
        &manifest,
        &api_key,
        host.config().cache_directory_for(&manifest.id),
    )?;

    let outcome = deliver_event(
        &host,
        &mut events,
        &process,
        &manifest,
        event,
        payload,
        timeout,
    )
    .await;
    let exit = process
        .shutdown(grace)
        .await
        .with_context(|| format!("failed to stop extension '{}'", manifest.id))?;
    let response = outcome?;
    Ok(ExtensionExecSummary {
        manifest_path: summary.manifest_path,
        id: summary.id,
        version: summary.version,
        event: event.to_string(),
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        exit_code: exit.code,
        killed: exit.killed,
        response,
    })
}

async fn deliver_event(
    host: &ExtensionHost,
    events: &mut broadcast::Receiver<HostEvent>,
    process: &ExtensionProcess,
    manifest: &ExtensionManifest,
    event: &str,
    payload: Value,
    timeout: Duration,
) -> Result<Value> {
    let extension_id = host
        .attach(process.channel())
        .await
        .with_context(|| format!("extension '{}' did not connect", manifest.id))?;
    tokio::time::timeout(timeout, wait_until_ready(host, events, &extension_id))
        .await
        .map_err(|_| {
            anyhow!(
                "extension '{extension_id}' did not become ready within {}ms",
                timeout.as_millis()
            )
        })??;
    tracing::debug!(extension_id = %extension_id, event, "delivering event");
    let response = tokio::time::timeout(timeout, host.request(&extension_id, event, payload))
        .await
        .map_err(|_| {
            anyhow!(
                "extension '{extension_id}' did not reply to '{event}' within {}ms",
                timeout.as_millis()
            )
        })??;
    Ok(response)
}

async fn wait_until_ready(
    host: &ExtensionHost,
    events: &mut broadcast::Receiver<HostEvent>,
    extension_id: &str,
) -> Result<()> {
    loop {
        match host.status(extension_id) {
            Some(ExtensionStatus::Ready) => return Ok(()),
            Some(ExtensionStatus::Failed) => {
                let reason = host
                    .logs(Some(extension_id))
                    .into_iter()
                    .last()
                    .map(|entry| entry.message)
                    .unwrap_or_else(|| "no reason reported".to_string());
                bail!("extension '{extension_id}' failed to start: {reason}");
            }
            Some(ExtensionStatus::NotReady) => {
                bail!("extension '{extension_id}' disconnected during start-up")
            }
            _ => {}
        }
        match events.recv().await {
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => bail!("host event stream closed"),
        }
    }
}

fn generate_api_key(manifest: &ExtensionManifest) -> String {
    let digest = Sha256::new()
        .chain_update(manifest.id.as_bytes())
        .chain_update(current_unix_timestamp_ms().to_le_bytes())
        .chain_update(std::process::id().to_le_bytes())
        .finalize();
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}
