use std::{
    path::Path,
    sync::{Arc, RwLock},
    time::Duration,
};

use picteus_protocol::{
    AckOutcome, DialogContent, ExtensionError, ExtensionReportedStatus, ImagesContent, Intent,
    IntentEnvelope, LogLevel, LogRecord, NotificationsPayload, ShowContent, UiContent,
    INTENT_CHANNEL, NOTIFICATIONS_CHANNEL,
};
use picteus_transport::TransportChannel;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::{
    api::{ApiClients, ExtensionApi, ImageApi, RepositoryApi},
    config::ExtensionRuntimeConfig,
};

struct CommunicatorInner {
    channel: TransportChannel,
    config: ExtensionRuntimeConfig,
    apis: ApiClients,
    settings: RwLock<Value>,
}

/// Extension-side handle for talking to the host.
///
/// Cheap to clone; every clone shares the same channel and settings.
#[derive(Clone)]
pub struct Communicator {
    inner: Arc<CommunicatorInner>,
}

impl Communicator {
    pub(crate) fn new(
        channel: TransportChannel,
        config: ExtensionRuntimeConfig,
        apis: ApiClients,
    ) -> Self {
        Self {
            inner: Arc::new(CommunicatorInner {
                channel,
                config,
                apis,
                settings: RwLock::new(Value::Null),
            }),
        }
    }

    pub fn extension_id(&self) -> &str {
        &self.inner.config.extension_id
    }

    pub(crate) fn config(&self) -> &ExtensionRuntimeConfig {
        &self.inner.config
    }

    pub(crate) fn channel(&self) -> &TransportChannel {
        &self.inner.channel
    }

    /// Latest settings received from the host.
    pub fn settings(&self) -> Value {
        match self.inner.settings.read() {
            Ok(settings) => settings.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn replace_settings(&self, settings: Value) {
        match self.inner.settings.write() {
            Ok(mut current) => *current = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }
    }

    pub fn cache_directory(&self) -> Option<&Path> {
        self.inner.config.cache_directory.as_deref()
    }

    pub fn images(&self) -> &dyn ImageApi {
        self.inner.apis.images.as_ref()
    }

    pub fn repositories(&self) -> &dyn RepositoryApi {
        self.inner.apis.repositories.as_ref()
    }

    pub fn extensions(&self) -> &dyn ExtensionApi {
        self.inner.apis.extensions.as_ref()
    }

    pub fn send_log(
        &self,
        message: impl Into<String>,
        level: LogLevel,
    ) -> Result<(), ExtensionError> {
        let mut payload = self.notifications_payload();
        payload.log = Some(LogRecord {
            message: message.into(),
            level,
        });
        self.send_notifications_payload(payload)
    }

    /// Sends a free-form value to the host on the `notifications` channel.
    pub fn send_notification(&self, value: Value) -> Result<(), ExtensionError> {
        let mut payload = self.notifications_payload();
        payload.value = Some(value);
        self.send_notifications_payload(payload)
    }

    pub(crate) fn send_status(&self, status: ExtensionReportedStatus) -> Result<(), ExtensionError> {
        let mut payload = self.notifications_payload();
        payload.status = Some(status);
        self.send_notifications_payload(payload)
    }

    /// Asks the host to resolve `intent` and waits for the user's answer.
    ///
    /// A dismissed UI surfaces as [`ExtensionError::UserCancelled`].
    pub async fn launch_intent<T>(&self, intent: Intent) -> Result<T, ExtensionError>
    where
        T: DeserializeOwned,
    {
        let kind = intent.kind();
        let envelope = IntentEnvelope {
            id: self.extension_id().to_string(),
            intent: intent.to_value()?,
        };
        let payload = serde_json::to_value(&envelope)
            .map_err(|error| ExtensionError::Decode(error.to_string()))?;
        tracing::debug!(
            extension_id = %self.extension_id(),
            intent = %kind,
            "launching intent"
        );
        let outcome = self
            .inner
            .channel
            .send_with_ack(INTENT_CHANNEL, payload)
            .await?;
        match outcome {
            AckOutcome::Value(value) => serde_json::from_value::<T>(value).map_err(|error| {
                ExtensionError::Decode(format!("{kind} intent result: {error}"))
            }),
            AckOutcome::Cancel(reason) => Err(ExtensionError::UserCancelled { reason }),
            AckOutcome::Error(error) => Err(ExtensionError::from_wire(error)),
        }
    }

    /// Like [`Communicator::launch_intent`], giving up after `timeout`.
    ///
    /// A reply arriving after the deadline is ignored.
    pub async fn launch_intent_with_timeout<T>(
        &self,
        intent: Intent,
        timeout: Duration,
    ) -> Result<T, ExtensionError>
    where
        T: DeserializeOwned,
    {
        match tokio::time::timeout(timeout, self.launch_intent(intent)).await {
            Ok(result) => result,
            Err(_) => Err(ExtensionError::IntentTimedOut {
                timeout_ms: timeout.as_millis().try_into().unwrap_or(u64::MAX),
            }),
        }
    }

    /// Renders a form from `schema` and returns the submitted object.
    pub async fn ask_parameters(&self, schema: Value) -> Result<Map<String, Value>, ExtensionError> {
        self.launch_intent(Intent::Parameters(schema)).await
    }

    /// Shows a dialog; `true` when the user picked the `yes` button.
    pub async fn ask_dialog(&self, dialog: DialogContent) -> Result<bool, ExtensionError> {
        self.launch_intent(Intent::Dialog(dialog)).await
    }

    pub async fn show(&self, show: ShowContent) -> Result<(), ExtensionError> {
        self.launch_intent(Intent::Show(show)).await
    }

    pub async fn show_images(&self, images: ImagesContent) -> Result<(), ExtensionError> {
        self.launch_intent(Intent::Images(images)).await
    }

    pub async fn open_ui(&self, ui: UiContent) -> Result<(), ExtensionError> {
        self.launch_intent(Intent::Ui(ui)).await
    }

    /// Runs CPU-bound work off the async worker threads.
    pub async fn run_blocking<F, R>(&self, work: F) -> Result<R, ExtensionError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        tokio::task::spawn_blocking(work)
            .await
            .map_err(|error| ExtensionError::handler(format!("blocking task failed: {error}")))
    }

    fn notifications_payload(&self) -> NotificationsPayload {
        NotificationsPayload::new(
            self.inner.config.api_key.clone(),
            self.inner.config.extension_id.clone(),
        )
    }

    fn send_notifications_payload(
        &self,
        payload: NotificationsPayload,
    ) -> Result<(), ExtensionError> {
        let value = serde_json::to_value(&payload)
            .map_err(|error| ExtensionError::Decode(error.to_string()))?;
        self.inner.channel.send(NOTIFICATIONS_CHANNEL, value)?;
        Ok(())
    }
}
