use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use picteus_extensions::{build_extension_launch_command, ExtensionManifest};
use picteus_protocol::{
    PICTEUS_API_KEY_ENV, PICTEUS_CACHE_DIRECTORY_ENV, PICTEUS_EXTENSION_ID_ENV,
    PICTEUS_TERMINATE_GRACE_MS_ENV, TERMINATE_CHANNEL,
};
use picteus_transport::{ndjson_link, TransportChannel};
use serde_json::json;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, Command},
    task::JoinHandle,
};

use crate::error::HostError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Public struct `ProcessExit` used across Picteus components.
pub struct ProcessExit {
    pub code: Option<i32>,
    /// True when the process outlived the grace period and was killed.
    pub killed: bool,
}

/// A spawned extension process whose stdio carries the protocol.
pub struct ExtensionProcess {
    extension_id: String,
    child: Child,
    channel: TransportChannel,
    stderr_forwarder: Option<JoinHandle<()>>,
}

impl ExtensionProcess {
    /// Spawns the extension described by `manifest` with the protocol on its stdin/stdout.
    ///
    /// The returned channel is not started; hand it to [`crate::ExtensionHost::attach`].
    pub fn spawn(
        manifest_path: &Path,
        manifest: &ExtensionManifest,
        api_key: &str,
        cache_directory: Option<PathBuf>,
    ) -> Result<Self, HostError> {
        let launch = build_extension_launch_command(manifest_path, manifest)
            .map_err(|error| HostError::Process(format!("{error:#}")))?;
        let mut command = Command::new(&launch.program);
        command
            .args(&launch.args)
            .current_dir(&launch.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env(PICTEUS_EXTENSION_ID_ENV, &manifest.id)
            .env(PICTEUS_API_KEY_ENV, api_key)
            .env(
                PICTEUS_TERMINATE_GRACE_MS_ENV,
                manifest.terminate_grace_ms.to_string(),
            );
        if let Some(cache_directory) = cache_directory {
            std::fs::create_dir_all(&cache_directory).map_err(|error| {
                HostError::Process(format!(
                    "failed to create cache directory {}: {error}",
                    cache_directory.display()
                ))
            })?;
            command.env(PICTEUS_CACHE_DIRECTORY_ENV, cache_directory);
        }

        let mut child = command.spawn().map_err(|error| {
            HostError::Process(format!(
                "failed to spawn extension '{}' ({}): {error}",
                manifest.id,
                launch.program.display()
            ))
        })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(HostError::Process(format!(
                "extension '{}' was spawned without piped stdio",
                manifest.id
            )));
        };
        let stderr_forwarder = child
            .stderr
            .take()
            .map(|stderr| spawn_stderr_forwarder(manifest.id.clone(), stderr));
        let label = format!("host:{}", manifest.id);
        let channel = TransportChannel::new(label.clone(), ndjson_link(&label, stdout, stdin));
        tracing::info!(
            extension_id = %manifest.id,
            pid = child.id().unwrap_or_default(),
            "extension process spawned"
        );
        Ok(Self {
            extension_id: manifest.id.clone(),
            child,
            channel,
            stderr_forwarder,
        })
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    pub fn channel(&self) -> TransportChannel {
        self.channel.clone()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Sends `extension.terminate`, waits up to `grace` for exit, then kills.
    pub async fn shutdown(mut self, grace: Duration) -> Result<ProcessExit, HostError> {
        if self.channel.is_open() {
            let request = self.channel.send_with_ack(TERMINATE_CHANNEL, json!({}));
            if tokio::time::timeout(grace, request).await.is_err() {
                tracing::warn!(
                    extension_id = %self.extension_id,
                    "extension did not acknowledge terminate"
                );
            }
        }
        self.channel.close();
        let exit = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => ProcessExit {
                code: status
                    .map_err(|error| HostError::Process(error.to_string()))?
                    .code(),
                killed: false,
            },
            Err(_) => {
                tracing::warn!(
                    extension_id = %self.extension_id,
                    grace_ms = grace_millis(grace),
                    "extension process outlived grace period; killing"
                );
                self.child
                    .kill()
                    .await
                    .map_err(|error| HostError::Process(error.to_string()))?;
                let status = self
                    .child
                    .wait()
                    .await
                    .map_err(|error| HostError::Process(error.to_string()))?;
                ProcessExit {
                    code: status.code(),
                    killed: true,
                }
            }
        };
        if let Some(forwarder) = self.stderr_forwarder.take() {
            let _ = tokio::time::timeout(Duration::from_millis(200), forwarder).await;
        }
        tracing::info!(
            extension_id = %self.extension_id,
            code = ?exit.code,
            killed = exit.killed,
            "extension process exited"
        );
        Ok(exit)
    }
}

/// `grace` in whole milliseconds, saturating at `u64::MAX`.
pub(crate) fn grace_millis(grace: Duration) -> u64 {
    u64::try_from(grace.as_millis()).unwrap_or(u64::MAX)
}

fn spawn_stderr_forwarder(
    extension_id: String,
    stderr: tokio::process::ChildStderr,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        tracing::info!(extension_id = %extension_id, stream = "stderr", "{trimmed}");
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    tracing::debug!(extension_id = %extension_id, %error, "stderr reader failed");
                    break;
                }
            }
        }
    })
}
