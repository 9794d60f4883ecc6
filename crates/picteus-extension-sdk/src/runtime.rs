use std::{sync::Arc, time::Duration};

use picteus_protocol::{ExtensionError, ExtensionReportedStatus, LogLevel};
use picteus_transport::{ndjson_link, Acknowledger, TransportChannel};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    api::ApiClients,
    communicator::Communicator,
    config::ExtensionRuntimeConfig,
    dispatcher::{DispatchMetricsSnapshot, EventDispatcher},
    extension::{ExtensionContext, PicteusExtension},
    lifecycle::{LifecycleState, LifecycleTracker},
};

/// Enumerates supported `TerminationCause` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    HostRequest,
    ChannelClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `RunReport` used across Picteus components.
pub struct RunReport {
    pub extension_id: String,
    pub final_state: LifecycleState,
    pub cause: TerminationCause,
    pub terminate_timed_out: bool,
    pub dispatch: DispatchMetricsSnapshot,
}

/// Drives one extension instance from start-up to termination.
pub struct ExtensionRuntime {
    config: ExtensionRuntimeConfig,
    apis: ApiClients,
    lifecycle: LifecycleTracker,
}

impl ExtensionRuntime {
    pub fn new(config: ExtensionRuntimeConfig) -> Self {
        Self {
            config,
            apis: ApiClients::default(),
            lifecycle: LifecycleTracker::new(),
        }
    }

    pub fn with_api_clients(mut self, apis: ApiClients) -> Self {
        self.apis = apis;
        self
    }

    /// Observable lifecycle of the instance this runtime drives.
    pub fn lifecycle(&self) -> LifecycleTracker {
        self.lifecycle.clone()
    }

    /// Runs the extension over stdin/stdout, the link a host-spawned process uses.
    pub async fn run_stdio<E>(self, extension: E) -> Result<RunReport, ExtensionError>
    where
        E: PicteusExtension,
    {
        let label = format!("extension:{}", self.config.extension_id);
        let link = ndjson_link(&label, tokio::io::stdin(), tokio::io::stdout());
        self.run(extension, TransportChannel::new(label, link)).await
    }

    /// Runs the lifecycle over `channel` until the host asks to terminate or the channel closes.
    ///
    /// Start-up failures are reported to the host and returned as
    /// [`ExtensionError::Bootstrap`] without `on_ready` ever running.
    pub async fn run<E>(
        self,
        extension: E,
        channel: TransportChannel,
    ) -> Result<RunReport, ExtensionError>
    where
        E: PicteusExtension,
    {
        let extension: Arc<dyn PicteusExtension> = Arc::new(extension);
        let communicator = Communicator::new(channel.clone(), self.config.clone(), self.apis);
        let (terminate_sender, mut terminate_receiver) =
            mpsc::unbounded_channel::<Option<Acknowledger>>();
        let dispatcher = EventDispatcher::new(
            Arc::clone(&extension),
            communicator.clone(),
            self.lifecycle.clone(),
            terminate_sender,
        );
        dispatcher.register(&channel);
        channel.start();

        self.lifecycle.transition(LifecycleState::Initializing)?;
        let context = ExtensionContext::new(communicator.clone());
        if let Err(error) = bootstrap(Arc::clone(&extension), context).await {
            tracing::error!(
                extension_id = %self.config.extension_id,
                %error,
                "extension bootstrap failed"
            );
            if channel.is_open() {
                let _ = communicator.send_log(error.to_string(), LogLevel::Error);
                let _ = communicator.send_status(ExtensionReportedStatus::Failed);
            }
            self.lifecycle.transition(LifecycleState::Terminated)?;
            channel.close();
            return Err(match error {
                ExtensionError::Bootstrap(_) => error,
                other => ExtensionError::Bootstrap(other.to_string()),
            });
        }

        let ready_extension = Arc::clone(&extension);
        let ready_communicator = communicator.clone();
        let ready = tokio::spawn(async move { ready_extension.on_ready(&ready_communicator).await });
        let ready_error = match ready.await {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(error),
            Err(join_error) => Some(ExtensionError::handler(format!(
                "on_ready panicked or was cancelled: {join_error}"
            ))),
        };
        if let Some(error) = ready_error {
            tracing::error!(
                extension_id = %self.config.extension_id,
                %error,
                "extension on_ready failed"
            );
            let _ = communicator.send_log(format!("on_ready failed: {error}"), LogLevel::Error);
        }
        self.lifecycle.transition(LifecycleState::Ready)?;
        if let Err(error) = communicator.send_status(ExtensionReportedStatus::Ready) {
            tracing::warn!(%error, "failed to report ready status");
        }
        tracing::info!(extension_id = %self.config.extension_id, "extension ready");

        let (cause, terminate_ack) = tokio::select! {
            request = terminate_receiver.recv() => match request {
                Some(ack) => (TerminationCause::HostRequest, ack),
                None => (TerminationCause::ChannelClosed, None),
            },
            _ = channel.closed() => (TerminationCause::ChannelClosed, None),
        };

        self.lifecycle.transition(LifecycleState::Terminating)?;
        let grace = Duration::from_millis(self.config.terminate_grace_ms);
        let terminating = Arc::clone(&extension);
        let cleanup = tokio::spawn(async move { terminating.on_terminate().await });
        let abort = cleanup.abort_handle();
        let terminate_timed_out = match tokio::time::timeout(grace, cleanup).await {
            Ok(Ok(Ok(()))) => false,
            Ok(Ok(Err(error))) => {
                tracing::warn!(%error, "extension on_terminate failed");
                false
            }
            Ok(Err(join_error)) => {
                tracing::warn!(%join_error, "extension on_terminate panicked");
                false
            }
            Err(_) => {
                abort.abort();
                tracing::warn!(
                    extension_id = %self.config.extension_id,
                    grace_ms = self.config.terminate_grace_ms,
                    "extension on_terminate exceeded grace period"
                );
                true
            }
        };
        self.lifecycle.transition(LifecycleState::Terminated)?;
        if let Some(ack) = terminate_ack {
            let _ = ack.resolve(Value::Null);
        }
        channel.close();

        Ok(RunReport {
            extension_id: self.config.extension_id,
            final_state: self.lifecycle.current(),
            cause,
            terminate_timed_out,
            dispatch: dispatcher.metrics(),
        })
    }
}

async fn bootstrap(
    extension: Arc<dyn PicteusExtension>,
    context: ExtensionContext,
) -> Result<(), ExtensionError> {
    let initializing = tokio::spawn(async move {
        let initialized = extension.initialize(&context).await?;
        if initialized && !context.is_connected() {
            context.connect().await?;
        }
        Ok::<bool, ExtensionError>(initialized)
    });
    match initializing.await {
        Ok(Ok(true)) => Ok(()),
        Ok(Ok(false)) => Err(ExtensionError::Bootstrap(
            "initialize reported failure".to_string(),
        )),
        Ok(Err(error)) => Err(error),
        Err(join_error) => Err(ExtensionError::Bootstrap(format!(
            "initialize panicked or was cancelled: {join_error}"
        ))),
    }
}
