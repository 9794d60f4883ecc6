use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, OnceLock,
    },
    time::Duration,
};

use picteus_core::lock_or_recover;
use picteus_extensions::{
    validate_extension_settings, validate_loaded_extension_manifest, CommandTarget,
};
use picteus_protocol::{
    is_subscribable_channel, AckOutcome, ConnectionPayload, ErrorKind, ExtensionError,
    ExtensionReportedStatus, ImageRunCommandValue, Notification, NotificationsPayload,
    ProcessRunCommandValue, TransportError, WireError, CONNECTION_CHANNEL, INTENT_CHANNEL,
    NOTIFICATIONS_CHANNEL, SETTINGS_CHANNEL, TERMINATE_CHANNEL,
};
use picteus_transport::{Acknowledger, TransportChannel};
use serde_json::{json, Value};
use tokio::sync::{broadcast, oneshot};

use crate::{
    config::HostConfig,
    error::HostError,
    events::{ExtensionStatus, HostEvent, IntentClosure},
    intents::{prepare_intent, settle_intent, IntentStack, PreparedIntent},
    logs::{forward_to_tracing, HostLogEntry, LogHistory},
    presenter::{IntentPresenter, IntentRequest},
    registry::{ExtensionIdentity, ExtensionRegistry},
    settings::SettingsStore,
};

struct HostInner {
    config: HostConfig,
    presenter: Arc<dyn IntentPresenter>,
    registry: ExtensionRegistry,
    settings: SettingsStore,
    logs: Mutex<LogHistory>,
    intents: IntentStack,
    events: broadcast::Sender<HostEvent>,
    notification_sequence: AtomicU64,
}

/// One attached transport, bound to an extension once its handshake succeeds.
struct Session {
    channel: TransportChannel,
    bound: OnceLock<(String, u64)>,
    handshake: Mutex<Option<oneshot::Sender<Result<String, String>>>>,
}

impl Session {
    fn extension_id(&self) -> Option<&str> {
        self.bound.get().map(|(id, _)| id.as_str())
    }
}

/// Host side of the extension protocol.
///
/// Holds the registry of installed extensions, accepts their connections,
/// routes application events to them and answers their intents through an
/// [`IntentPresenter`]. Cheap to clone.
#[derive(Clone)]
pub struct ExtensionHost {
    inner: Arc<HostInner>,
}

impl ExtensionHost {
    pub fn new(config: HostConfig, presenter: Arc<dyn IntentPresenter>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(HostInner {
                settings: SettingsStore::new(config.settings_dir.clone()),
                logs: Mutex::new(LogHistory::new(config.log_history_capacity)),
                config,
                presenter,
                registry: ExtensionRegistry::default(),
                intents: IntentStack::default(),
                events,
                notification_sequence: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    pub fn register_extension(
        &self,
        identity: ExtensionIdentity,
        api_key: impl Into<String>,
    ) -> Result<(), HostError> {
        validate_loaded_extension_manifest(&identity.manifest)
            .map_err(|error| HostError::Manifest(format!("{error:#}")))?;
        let extension_id = identity.id.clone();
        self.inner.registry.register(identity, api_key.into())?;
        self.inner.settings.load(&extension_id);
        tracing::info!(extension_id = %extension_id, "extension registered");
        self.inner.publish(HostEvent::StatusChanged {
            extension_id,
            status: ExtensionStatus::Registered,
        });
        Ok(())
    }

    pub fn status(&self, extension_id: &str) -> Option<ExtensionStatus> {
        self.inner.registry.status(extension_id)
    }

    pub fn extension_ids(&self) -> Vec<String> {
        self.inner.registry.ids()
    }

    pub fn identity(&self, extension_id: &str) -> Option<ExtensionIdentity> {
        self.inner.registry.identity(extension_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.inner.events.subscribe()
    }

    /// Log history, optionally filtered to one extension, oldest first.
    pub fn logs(&self, extension_id: Option<&str>) -> Vec<HostLogEntry> {
        lock_or_recover(&self.inner.logs).snapshot(extension_id)
    }

    /// Context ids of the intents currently shown for `extension_id`, oldest first.
    pub fn open_intents(&self, extension_id: &str) -> Vec<String> {
        self.inner.intents.snapshot(extension_id)
    }

    pub fn settings(&self, extension_id: &str) -> Option<Value> {
        self.inner.settings.get(extension_id)
    }

    /// Serves the protocol on `channel` and waits for the extension's handshake.
    ///
    /// Returns the id of the extension that connected. A rejected or missing
    /// handshake closes the channel.
    pub async fn attach(&self, channel: TransportChannel) -> Result<String, HostError> {
        let (handshake_sender, handshake) = oneshot::channel();
        let session = Arc::new(Session {
            channel: channel.clone(),
            bound: OnceLock::new(),
            handshake: Mutex::new(Some(handshake_sender)),
        });
        self.register_handlers(&session);
        channel.start();

        let timeout = Duration::from_millis(self.inner.config.handshake_timeout_ms);
        let outcome = tokio::select! {
            biased;
            accepted = handshake => match accepted {
                Ok(result) => result,
                Err(_) => Err("handshake handler stopped".to_string()),
            },
            _ = channel.closed() => Err("channel closed before handshake".to_string()),
            _ = tokio::time::sleep(timeout) => Err(format!(
                "no handshake within {}ms",
                self.inner.config.handshake_timeout_ms
            )),
        };
        match outcome {
            Ok(extension_id) => {
                self.watch_disconnect(&session);
                Ok(extension_id)
            }
            Err(reason) => {
                tracing::warn!(transport = %channel.label(), %reason, "extension handshake failed");
                channel.close();
                // The handshake may have bound the session after the deadline fired.
                self.inner.release_session(&session);
                Err(HostError::Handshake(reason))
            }
        }
    }

    /// Sends a fire-and-forget notification to one extension.
    pub fn notify(&self, extension_id: &str, channel: &str, value: Value) -> Result<(), HostError> {
        let link = self.inner.registry.live_channel(extension_id)?;
        link.send(channel, value)?;
        Ok(())
    }

    /// Sends a notification to one extension and waits for its reply.
    ///
    /// Application channels must be subscribed to in the manifest. Failures
    /// reported by the extension arrive as [`HostError::Extension`].
    pub async fn request(
        &self,
        extension_id: &str,
        channel: &str,
        value: Value,
    ) -> Result<Value, HostError> {
        let identity = self
            .inner
            .registry
            .identity(extension_id)
            .ok_or_else(|| HostError::UnknownExtension(extension_id.to_string()))?;
        if is_subscribable_channel(channel) && !identity.manifest.subscribes_to(channel) {
            return Err(HostError::NotSubscribed {
                extension_id: extension_id.to_string(),
                channel: channel.to_string(),
            });
        }
        let link = self.inner.registry.live_channel(extension_id)?;
        tracing::debug!(extension_id, channel, "requesting extension");
        let outcome = link.send_with_ack(channel, value).await?;
        outcome_to_result(outcome)
    }

    /// Delivers `channel` to every live extension subscribing to it; returns their ids.
    pub fn broadcast(&self, channel: &str, value: Value) -> Vec<String> {
        let mut delivered = Vec::new();
        for (extension_id, link) in self.inner.registry.subscribers(channel) {
            match link.send(channel, value.clone()) {
                Ok(()) => delivered.push(extension_id),
                Err(error) => tracing::debug!(
                    extension_id = %extension_id,
                    channel,
                    %error,
                    "broadcast skipped disconnected extension"
                ),
            }
        }
        delivered
    }

    pub async fn run_process_command(
        &self,
        command_id: &str,
        parameters: Value,
    ) -> Result<Value, HostError> {
        let owner = self
            .inner
            .registry
            .command_owner(command_id, CommandTarget::Process)
            .ok_or_else(|| HostError::UnknownCommand(command_id.to_string()))?;
        let value = serde_json::to_value(ProcessRunCommandValue {
            command_id: command_id.to_string(),
            parameters,
        })
        .map_err(|error| HostError::Extension(ExtensionError::Decode(error.to_string())))?;
        self.request(&owner, CommandTarget::Process.channel(), value)
            .await
    }

    pub async fn run_image_command(
        &self,
        command_id: &str,
        image_ids: Vec<String>,
        parameters: Value,
    ) -> Result<Value, HostError> {
        let owner = self
            .inner
            .registry
            .command_owner(command_id, CommandTarget::Images)
            .ok_or_else(|| HostError::UnknownCommand(command_id.to_string()))?;
        let value = serde_json::to_value(ImageRunCommandValue {
            command_id: command_id.to_string(),
            image_ids,
            parameters,
        })
        .map_err(|error| HostError::Extension(ExtensionError::Decode(error.to_string())))?;
        self.request(&owner, CommandTarget::Images.channel(), value)
            .await
    }

    /// Validates, stores and pushes new settings to the extension when it is connected.
    pub async fn set_settings(&self, extension_id: &str, value: Value) -> Result<(), HostError> {
        let identity = self
            .inner
            .registry
            .identity(extension_id)
            .ok_or_else(|| HostError::UnknownExtension(extension_id.to_string()))?;
        validate_extension_settings(&identity.manifest, &value)
            .map_err(|error| HostError::InvalidSettings(format!("{error:#}")))?;
        self.inner.settings.replace(extension_id, value.clone())?;
        let Ok(link) = self.inner.registry.live_channel(extension_id) else {
            tracing::debug!(extension_id, "settings stored; extension not connected");
            return Ok(());
        };
        let outcome = link
            .send_with_ack(SETTINGS_CHANNEL, json!({ "value": value }))
            .await?;
        outcome_to_result(outcome).map(|_| ())
    }

    /// Asks the extension to shut down and closes its channel.
    ///
    /// Returns whether the extension acknowledged within its grace period.
    pub async fn terminate(&self, extension_id: &str) -> Result<bool, HostError> {
        let identity = self
            .inner
            .registry
            .identity(extension_id)
            .ok_or_else(|| HostError::UnknownExtension(extension_id.to_string()))?;
        let Some(link) = self.inner.registry.any_channel(extension_id) else {
            return Ok(false);
        };
        let grace = Duration::from_millis(identity.manifest.terminate_grace_ms);
        let acknowledged =
            match tokio::time::timeout(grace, link.send_with_ack(TERMINATE_CHANNEL, json!({})))
                .await
            {
                Ok(Ok(outcome)) => !outcome.is_error(),
                Ok(Err(error)) => {
                    tracing::debug!(extension_id, %error, "terminate request failed");
                    false
                }
                Err(_) => {
                    tracing::warn!(
                        extension_id,
                        grace_ms = identity.manifest.terminate_grace_ms,
                        "extension did not acknowledge terminate in time"
                    );
                    false
                }
            };
        link.close();
        Ok(acknowledged)
    }

    fn register_handlers(&self, session: &Arc<Session>) {
        let channel = &session.channel;
        let (inner, bound) = (Arc::clone(&self.inner), Arc::clone(session));
        channel.on(
            CONNECTION_CHANNEL,
            move |notification: Notification, ack: Option<Acknowledger>| {
                let (inner, session) = (Arc::clone(&inner), Arc::clone(&bound));
                async move { inner.accept_connection(&session, notification, ack) }
            },
        );
        let (inner, bound) = (Arc::clone(&self.inner), Arc::clone(session));
        channel.on(
            NOTIFICATIONS_CHANNEL,
            move |notification: Notification, ack: Option<Acknowledger>| {
                let (inner, session) = (Arc::clone(&inner), Arc::clone(&bound));
                async move { inner.receive_notification(&session, notification, ack) }
            },
        );
        let (inner, bound) = (Arc::clone(&self.inner), Arc::clone(session));
        channel.on(
            INTENT_CHANNEL,
            move |notification: Notification, ack: Option<Acknowledger>| {
                let (inner, session) = (Arc::clone(&inner), Arc::clone(&bound));
                async move { inner.receive_intent(&session, notification, ack) }
            },
        );
    }

    fn watch_disconnect(&self, session: &Arc<Session>) {
        let inner = Arc::clone(&self.inner);
        let session = Arc::clone(session);
        tokio::spawn(async move {
            session.channel.closed().await;
            inner.release_session(&session);
        });
    }
}

impl HostInner {
    fn publish(&self, event: HostEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Detaches a closed session from the registry. Safe to call more than once.
    fn release_session(&self, session: &Session) {
        let Some((extension_id, attachment)) = session.bound.get() else {
            return;
        };
        let abandoned = self.intents.clear(extension_id);
        if abandoned > 0 {
            tracing::debug!(extension_id = %extension_id, abandoned, "dropped open intents");
        }
        if let Some(status) = self.registry.disconnect(extension_id, *attachment) {
            tracing::info!(extension_id = %extension_id, "extension disconnected");
            self.publish(HostEvent::StatusChanged {
                extension_id: extension_id.clone(),
                status,
            });
        }
    }

    fn accept_connection(
        &self,
        session: &Session,
        notification: Notification,
        ack: Option<Acknowledger>,
    ) {
        let result = self.bind_session(session, notification.value);
        let reply = match &result {
            Ok(extension_id) => {
                let settings = self.settings.get(extension_id).unwrap_or_else(|| json!({}));
                AckOutcome::Value(json!({ "settings": settings }))
            }
            Err(reason) => {
                AckOutcome::Error(WireError::new(ErrorKind::HandshakeRejected, reason.clone()))
            }
        };
        match ack {
            Some(ack) => {
                if let Err(error) = ack.respond(reply) {
                    tracing::debug!(%error, "handshake reply could not be delivered");
                }
            }
            None => tracing::warn!("connection request without contextId"),
        }
        if let Some(waiter) = lock_or_recover(&session.handshake).take() {
            let _ = waiter.send(result);
        }
    }

    fn bind_session(&self, session: &Session, value: Value) -> Result<String, String> {
        let payload = serde_json::from_value::<ConnectionPayload>(value)
            .map_err(|error| format!("malformed connection payload: {error}"))?;
        if !payload.is_open {
            return Err("connection payload must set isOpen".to_string());
        }
        if let Some(bound) = session.extension_id() {
            return Err(format!("channel is already bound to extension '{bound}'"));
        }
        let attachment = self.registry.connect(
            &payload.extension_id,
            &payload.api_key,
            session.channel.clone(),
        )?;
        let _ = session
            .bound
            .set((payload.extension_id.clone(), attachment));
        if !session.channel.is_open() {
            // attach gave up while this handshake was in flight.
            self.release_session(session);
            return Err("channel closed during handshake".to_string());
        }
        tracing::info!(extension_id = %payload.extension_id, attachment, "extension connected");
        self.publish(HostEvent::StatusChanged {
            extension_id: payload.extension_id.clone(),
            status: ExtensionStatus::Connected,
        });
        Ok(payload.extension_id)
    }

    fn receive_notification(
        self: &Arc<Self>,
        session: &Session,
        notification: Notification,
        ack: Option<Acknowledger>,
    ) {
        let accepted = self.apply_notification(session, notification.value);
        match (ack, accepted) {
            (Some(ack), Ok(())) => {
                let _ = ack.resolve(Value::Null);
            }
            (Some(ack), Err(error)) => {
                let _ = ack.fail(error.to_wire());
            }
            (None, Ok(())) => {}
            (None, Err(error)) => tracing::warn!(
                extension_id = session.extension_id().unwrap_or_default(),
                kind = error.kind().as_str(),
                %error,
                "dropping rejected notification"
            ),
        }
    }

    fn apply_notification(
        self: &Arc<Self>,
        session: &Session,
        value: Value,
    ) -> Result<(), ExtensionError> {
        let Some(extension_id) = session.extension_id() else {
            return Err(ExtensionError::Transport(
                TransportError::HandshakeRejected(
                    "notification received before handshake".to_string(),
                ),
            ));
        };
        let payload = serde_json::from_value::<NotificationsPayload>(value)
            .map_err(|error| ExtensionError::Decode(format!("notifications payload: {error}")))?;
        if payload.extension_id != extension_id
            || !self.registry.verify_api_key(extension_id, &payload.api_key)
        {
            tracing::warn!(
                extension_id,
                claimed = %payload.extension_id,
                "rejecting notification with mismatched credentials"
            );
            return Err(ExtensionError::Transport(
                TransportError::HandshakeRejected(
                    "notification credentials do not match the connection".to_string(),
                ),
            ));
        }

        if let Some(log) = payload.log {
            let entry = HostLogEntry::new(extension_id, log.level, log.message);
            forward_to_tracing(&entry);
            lock_or_recover(&self.logs).push(entry.clone());
            self.publish(HostEvent::Log(entry));
        }
        if let Some(status) = payload.status {
            let status = match status {
                ExtensionReportedStatus::Ready => ExtensionStatus::Ready,
                ExtensionReportedStatus::Failed => ExtensionStatus::Failed,
            };
            if self.registry.set_status(extension_id, status) {
                tracing::info!(extension_id, status = %status, "extension status changed");
                self.publish(HostEvent::StatusChanged {
                    extension_id: extension_id.to_string(),
                    status,
                });
            }
        }
        if let Some(value) = payload.value {
            self.publish(HostEvent::Notification {
                extension_id: extension_id.to_string(),
                value,
            });
        }
        if let Some(intent) = payload.intent {
            // Shown without a reply channel; the outcome is only published.
            let context_id = payload.context_id.unwrap_or_else(|| {
                let sequence = self.notification_sequence.fetch_add(1, Ordering::Relaxed) + 1;
                format!("notification-{sequence}")
            });
            match prepare_intent(extension_id, json!({ "id": extension_id, "intent": intent })) {
                Ok(prepared) => {
                    self.present(extension_id.to_string(), context_id, prepared, None);
                }
                Err(error) => {
                    self.publish(HostEvent::IntentClosed {
                        extension_id: extension_id.to_string(),
                        context_id,
                        closure: IntentClosure::Rejected(error.to_string()),
                    });
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    fn receive_intent(
        self: &Arc<Self>,
        session: &Session,
        notification: Notification,
        ack: Option<Acknowledger>,
    ) {
        let Some(ack) = ack else {
            tracing::warn!("intent without contextId ignored");
            return;
        };
        let Some(extension_id) = session.extension_id() else {
            let _ = ack.fail(WireError::new(
                ErrorKind::HandshakeRejected,
                "intent received before handshake",
            ));
            return;
        };
        let context_id = ack.context_id().to_string();
        match prepare_intent(extension_id, notification.value) {
            Ok(prepared) => {
                self.present(extension_id.to_string(), context_id, prepared, Some(ack));
            }
            Err(error) => {
                tracing::warn!(extension_id, context_id = %context_id, %error, "rejecting malformed intent");
                self.publish(HostEvent::IntentClosed {
                    extension_id: extension_id.to_string(),
                    context_id,
                    closure: IntentClosure::Rejected(error.to_string()),
                });
                let _ = ack.fail(error.to_wire());
            }
        }
    }

    /// Shows `prepared` on its own task so later intents are not held back.
    fn present(
        self: &Arc<Self>,
        extension_id: String,
        context_id: String,
        prepared: PreparedIntent,
        ack: Option<Acknowledger>,
    ) {
        self.intents.push(&extension_id, &context_id);
        self.publish(HostEvent::IntentOpened {
            extension_id: extension_id.clone(),
            context_id: context_id.clone(),
            kind: prepared.kind(),
        });
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let presenter = Arc::clone(&inner.presenter);
            let request = IntentRequest {
                extension_id: extension_id.clone(),
                context_id: context_id.clone(),
                intent: prepared.intent.clone(),
            };
            let reply = match tokio::spawn(async move { presenter.present(request).await }).await
            {
                Ok(outcome) => settle_intent(&prepared, outcome),
                Err(error) => AckOutcome::Error(WireError::new(
                    ErrorKind::Handler,
                    format!("intent presenter failed: {error}"),
                )),
            };
            inner.intents.remove(&extension_id, &context_id);
            inner.publish(HostEvent::IntentClosed {
                extension_id: extension_id.clone(),
                context_id: context_id.clone(),
                closure: closure_of(&reply),
            });
            if let Some(ack) = ack {
                if let Err(error) = ack.respond(reply) {
                    tracing::debug!(
                        extension_id = %extension_id,
                        context_id = %context_id,
                        %error,
                        "intent reply could not be delivered"
                    );
                }
            }
        });
    }
}

fn closure_of(reply: &AckOutcome) -> IntentClosure {
    match reply {
        AckOutcome::Value(value) => IntentClosure::Resolved(value.clone()),
        AckOutcome::Cancel(reason) => IntentClosure::Cancelled(reason.clone()),
        AckOutcome::Error(error) => IntentClosure::Rejected(error.message.clone()),
    }
}

fn outcome_to_result(outcome: AckOutcome) -> Result<Value, HostError> {
    match outcome {
        AckOutcome::Value(value) => Ok(value),
        AckOutcome::Cancel(reason) => Err(ExtensionError::UserCancelled { reason }.into()),
        AckOutcome::Error(error) => Err(ExtensionError::from_wire(error).into()),
    }
}
