use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use picteus_protocol::{
    AckOutcome, ConnectionAccepted, ConnectionPayload, ExtensionError, NotificationEvent,
    CONNECTION_CHANNEL,
};
use serde_json::Value;

use crate::{communicator::Communicator, config::ExtensionRuntimeConfig};

/// Lifecycle contract every extension implements.
///
/// Hooks take `&self`: notifications on different channels are handled
/// concurrently, so mutable state belongs behind interior mutability and
/// expensive resources behind an idempotent ensure step such as
/// `tokio::sync::OnceCell`.
#[async_trait]
pub trait PicteusExtension: Send + Sync + 'static {
    /// Bootstraps the instance. Returning `Ok(false)` or an error aborts start-up.
    ///
    /// The default performs the connection handshake.
    async fn initialize(&self, context: &ExtensionContext) -> Result<bool, ExtensionError> {
        context.connect().await?;
        Ok(true)
    }

    /// Runs once after a successful `initialize`, with settings available.
    async fn on_ready(&self, communicator: &Communicator) -> Result<(), ExtensionError> {
        let _ = communicator;
        Ok(())
    }

    async fn on_settings(
        &self,
        communicator: &Communicator,
        settings: &Value,
    ) -> Result<(), ExtensionError> {
        let _ = (communicator, settings);
        Ok(())
    }

    /// Handles one application event. `Some(value)` becomes the reply when the host awaits one.
    async fn on_event(
        &self,
        communicator: &Communicator,
        event: &NotificationEvent,
        value: Value,
    ) -> Result<Option<Value>, ExtensionError> {
        let _ = (communicator, value);
        tracing::debug!(event = %event, "event ignored by extension");
        Ok(None)
    }

    /// Runs once on shutdown, bounded by the terminate grace period.
    async fn on_terminate(&self) -> Result<(), ExtensionError> {
        Ok(())
    }
}

/// What `initialize` gets to work with before the instance is ready.
#[derive(Clone)]
pub struct ExtensionContext {
    communicator: Communicator,
    connected: Arc<AtomicBool>,
}

impl ExtensionContext {
    pub(crate) fn new(communicator: Communicator) -> Self {
        Self {
            communicator,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ExtensionRuntimeConfig {
        self.communicator.config()
    }

    pub fn communicator(&self) -> &Communicator {
        &self.communicator
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Performs the `connection` handshake and stores the settings it returns.
    pub async fn connect(&self) -> Result<Value, ExtensionError> {
        if self.is_connected() {
            return Ok(self.communicator.settings());
        }
        let config = self.communicator.config();
        let payload = serde_json::to_value(ConnectionPayload {
            api_key: config.api_key.clone(),
            extension_id: config.extension_id.clone(),
            is_open: true,
        })
        .map_err(|error| ExtensionError::Decode(error.to_string()))?;
        let timeout = Duration::from_millis(config.handshake_timeout_ms);
        let outcome = tokio::time::timeout(
            timeout,
            self.communicator
                .channel()
                .send_with_ack(CONNECTION_CHANNEL, payload),
        )
        .await
        .map_err(|_| {
            ExtensionError::Bootstrap(format!(
                "handshake timed out after {}ms",
                config.handshake_timeout_ms
            ))
        })??;
        let accepted = match outcome {
            AckOutcome::Value(value) => serde_json::from_value::<ConnectionAccepted>(value)
                .map_err(|error| ExtensionError::Decode(format!("handshake reply: {error}")))?,
            AckOutcome::Cancel(reason) => {
                return Err(ExtensionError::Bootstrap(format!(
                    "handshake cancelled: {reason}"
                )))
            }
            AckOutcome::Error(error) => return Err(ExtensionError::from_wire(error)),
        };
        self.communicator.replace_settings(accepted.settings.clone());
        self.connected.store(true, Ordering::Release);
        tracing::info!(
            extension_id = %config.extension_id,
            "connected to host"
        );
        Ok(accepted.settings)
    }
}
