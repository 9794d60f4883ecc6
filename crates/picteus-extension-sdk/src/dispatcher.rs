use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use picteus_protocol::{
    ExtensionError, LogLevel, Notification, NotificationEvent, SettingsValue, SETTINGS_CHANNEL,
    TERMINATE_CHANNEL,
};
use picteus_transport::{Acknowledger, TransportChannel};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{communicator::Communicator, extension::PicteusExtension, lifecycle::LifecycleTracker};

#[derive(Debug, Default)]
struct DispatchCounters {
    delivered: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Public struct `DispatchMetricsSnapshot` used across Picteus components.
pub struct DispatchMetricsSnapshot {
    pub delivered: u64,
    pub completed: u64,
    pub failed: u64,
    pub panicked: u64,
    pub dropped: u64,
}

/// Routes host notifications to the extension's hooks.
pub(crate) struct EventDispatcher {
    extension: Arc<dyn PicteusExtension>,
    communicator: Communicator,
    lifecycle: LifecycleTracker,
    counters: DispatchCounters,
    terminate: Mutex<Option<mpsc::UnboundedSender<Option<Acknowledger>>>>,
}

impl EventDispatcher {
    pub(crate) fn new(
        extension: Arc<dyn PicteusExtension>,
        communicator: Communicator,
        lifecycle: LifecycleTracker,
        terminate: mpsc::UnboundedSender<Option<Acknowledger>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            extension,
            communicator,
            lifecycle,
            counters: DispatchCounters::default(),
            terminate: Mutex::new(Some(terminate)),
        })
    }

    pub(crate) fn register(self: &Arc<Self>, channel: &TransportChannel) {
        let dispatcher = Arc::clone(self);
        channel.on(
            SETTINGS_CHANNEL,
            move |notification: Notification, ack: Option<Acknowledger>| {
                let dispatcher = Arc::clone(&dispatcher);
                async move { dispatcher.dispatch_settings(notification, ack).await }
            },
        );
        let dispatcher = Arc::clone(self);
        channel.on(
            TERMINATE_CHANNEL,
            move |_notification: Notification, ack: Option<Acknowledger>| {
                let dispatcher = Arc::clone(&dispatcher);
                async move { dispatcher.request_termination(ack) }
            },
        );
        let dispatcher = Arc::clone(self);
        channel.on_fallback(move |notification: Notification, ack: Option<Acknowledger>| {
            let dispatcher = Arc::clone(&dispatcher);
            async move { dispatcher.dispatch_event(notification, ack).await }
        });
    }

    pub(crate) fn metrics(&self) -> DispatchMetricsSnapshot {
        DispatchMetricsSnapshot {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    fn request_termination(&self, ack: Option<Acknowledger>) {
        let sender = match self.terminate.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(sender) => {
                let _ = sender.send(ack);
            }
            None => {
                tracing::debug!("duplicate terminate request ignored");
                if let Some(ack) = ack {
                    let _ = ack.resolve(Value::Null);
                }
            }
        }
    }

    async fn dispatch_settings(&self, notification: Notification, ack: Option<Acknowledger>) {
        if !self.await_ready(&notification).await {
            self.reject_not_ready(&notification, ack);
            return;
        }
        let settings = match serde_json::from_value::<SettingsValue>(notification.value) {
            Ok(settings) => settings.value,
            Err(error) => {
                let error = ExtensionError::Decode(format!("settings payload: {error}"));
                self.report_failure(SETTINGS_CHANNEL, &error);
                if let Some(ack) = ack {
                    let _ = ack.fail(error.to_wire());
                }
                return;
            }
        };
        self.communicator.replace_settings(settings.clone());
        let extension = Arc::clone(&self.extension);
        let communicator = self.communicator.clone();
        let result = self
            .isolate(SETTINGS_CHANNEL, async move {
                extension.on_settings(&communicator, &settings).await
            })
            .await;
        self.finish(SETTINGS_CHANNEL, result.map(|()| None), ack);
    }

    async fn dispatch_event(&self, notification: Notification, ack: Option<Acknowledger>) {
        if !self.await_ready(&notification).await {
            self.reject_not_ready(&notification, ack);
            return;
        }
        let event = NotificationEvent::from_channel(&notification.channel);
        let extension = Arc::clone(&self.extension);
        let communicator = self.communicator.clone();
        let invoked = event.clone();
        let value = notification.value;
        let result = self
            .isolate(event.as_str(), async move {
                extension.on_event(&communicator, &invoked, value).await
            })
            .await;
        self.finish(event.as_str(), result, ack);
    }

    async fn await_ready(&self, notification: &Notification) -> bool {
        let ready = self.lifecycle.wait_until_ready().await;
        if ready {
            self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            tracing::warn!(
                channel = %notification.channel,
                state = %self.lifecycle.current(),
                "extension is not ready; dropping notification"
            );
        }
        ready
    }

    fn reject_not_ready(&self, notification: &Notification, ack: Option<Acknowledger>) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        if let Some(ack) = ack {
            let error = ExtensionError::handler(format!(
                "extension is {}; '{}' was not handled",
                self.lifecycle.current(),
                notification.channel
            ));
            let _ = ack.fail(error.to_wire());
        }
    }

    async fn isolate<F, T>(&self, channel: &str, hook: F) -> Result<T, ExtensionError>
    where
        F: std::future::Future<Output = Result<T, ExtensionError>> + Send + 'static,
        T: Send + 'static,
    {
        match tokio::spawn(hook).await {
            Ok(result) => result,
            Err(error) if error.is_panic() => {
                self.counters.panicked.fetch_add(1, Ordering::Relaxed);
                Err(ExtensionError::handler(format!(
                    "handler for '{channel}' panicked"
                )))
            }
            Err(error) => Err(ExtensionError::handler(format!(
                "handler for '{channel}' was cancelled: {error}"
            ))),
        }
    }

    fn finish(
        &self,
        channel: &str,
        result: Result<Option<Value>, ExtensionError>,
        ack: Option<Acknowledger>,
    ) {
        match result {
            Ok(value) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                if let Some(ack) = ack {
                    if let Err(error) = ack.resolve(value.unwrap_or(Value::Null)) {
                        tracing::debug!(channel, %error, "reply could not be delivered");
                    }
                }
            }
            Err(error) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.report_failure(channel, &error);
                if let Some(ack) = ack {
                    let _ = ack.fail(error.to_wire());
                }
            }
        }
    }

    fn report_failure(&self, channel: &str, error: &ExtensionError) {
        tracing::error!(
            extension_id = %self.communicator.extension_id(),
            channel,
            kind = error.kind().as_str(),
            %error,
            "extension handler failed"
        );
        let message = format!("handler for '{channel}' failed: {error}");
        if let Err(send_error) = self.communicator.send_log(message, LogLevel::Error) {
            tracing::debug!(%send_error, "failed to forward handler error to host");
        }
    }
}
