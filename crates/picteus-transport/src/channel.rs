use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use picteus_core::lock_or_recover;
use picteus_protocol::{
    build_error_ack_frame, AckOutcome, Acknowledgement, ErrorKind, Notification, TransportError,
    WireError, WireFrame,
};
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::{
    link::{FrameSender, LinkEvent, TransportLink},
    registry::CorrelationRegistry,
};

/// Trait contract for code consuming notifications of one channel name.
///
/// `ack` is present when the sender awaits a reply. Dropping it without
/// responding sends an error acknowledgement.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, notification: Notification, ack: Option<Acknowledger>);
}

#[async_trait]
impl<F, Fut> NotificationHandler for F
where
    F: Fn(Notification, Option<Acknowledger>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, notification: Notification, ack: Option<Acknowledger>) {
        (self)(notification, ack).await
    }
}

/// Reply handle for a notification that carried a `contextId`.
pub struct Acknowledger {
    channel: String,
    context_id: String,
    outbound: FrameSender,
    open: watch::Receiver<bool>,
    settled: bool,
}

impl Acknowledger {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn respond(mut self, outcome: AckOutcome) -> Result<(), TransportError> {
        self.settled = true;
        self.send(outcome)
    }

    pub fn resolve(self, value: Value) -> Result<(), TransportError> {
        self.respond(AckOutcome::Value(value))
    }

    pub fn cancel(self, reason: impl Into<String>) -> Result<(), TransportError> {
        self.respond(AckOutcome::Cancel(reason.into()))
    }

    pub fn fail(self, error: WireError) -> Result<(), TransportError> {
        self.respond(AckOutcome::Error(error))
    }

    fn send(&self, outcome: AckOutcome) -> Result<(), TransportError> {
        if !*self.open.borrow() {
            return Err(TransportError::ChannelClosed);
        }
        self.outbound.send(WireFrame::Ack(Acknowledgement {
            context_id: self.context_id.clone(),
            outcome,
        }))
    }
}

impl Drop for Acknowledger {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        tracing::warn!(
            channel = %self.channel,
            context_id = %self.context_id,
            "handler finished without acknowledging; replying with error"
        );
        let error = WireError::new(
            ErrorKind::Handler,
            format!(
                "handler for channel '{}' finished without a reply",
                self.channel
            ),
        );
        let _ = self.send(AckOutcome::Error(error));
    }
}

#[derive(Debug, Default)]
struct ChannelCounters {
    received: AtomicU64,
    handled: AtomicU64,
    panicked: AtomicU64,
    unhandled: AtomicU64,
    malformed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Public struct `ChannelMetricsSnapshot` used across Picteus components.
pub struct ChannelMetricsSnapshot {
    pub received: u64,
    pub handled: u64,
    pub panicked: u64,
    pub unhandled: u64,
    pub malformed: u64,
}

struct ChannelInner {
    label: String,
    outbound: FrameSender,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
    registry: CorrelationRegistry<AckOutcome>,
    handlers: Mutex<HashMap<String, Arc<dyn NotificationHandler>>>,
    fallback: Mutex<Option<Arc<dyn NotificationHandler>>>,
    workers: Mutex<HashMap<String, mpsc::UnboundedSender<Notification>>>,
    open: watch::Sender<bool>,
    counters: ChannelCounters,
}

/// Bidirectional, message-oriented connection carrying named notifications.
///
/// Notifications on one channel name are handled one at a time in arrival
/// order; different channel names are handled concurrently. Requests sent with
/// [`TransportChannel::send_with_ack`] are paired with their acknowledgement
/// through the channel's correlation registry, and are rejected with
/// [`TransportError::ChannelClosed`] when the link goes away.
#[derive(Clone)]
pub struct TransportChannel {
    inner: Arc<ChannelInner>,
}

impl TransportChannel {
    pub fn new(label: impl Into<String>, link: TransportLink) -> Self {
        let label = label.into();
        let (open, _) = watch::channel(true);
        Self {
            inner: Arc::new(ChannelInner {
                registry: CorrelationRegistry::new(label.clone()),
                label,
                outbound: link.outbound,
                inbound: Mutex::new(Some(link.inbound)),
                handlers: Mutex::new(HashMap::new()),
                fallback: Mutex::new(None),
                workers: Mutex::new(HashMap::new()),
                open,
                counters: ChannelCounters::default(),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Registers the handler for `channel`, replacing any previous one.
    pub fn on<H>(&self, channel: &str, handler: H)
    where
        H: NotificationHandler + 'static,
    {
        lock_or_recover(&self.inner.handlers).insert(channel.to_string(), Arc::new(handler));
    }

    /// Registers the handler for channel names without a dedicated handler.
    pub fn on_fallback<H>(&self, handler: H)
    where
        H: NotificationHandler + 'static,
    {
        *lock_or_recover(&self.inner.fallback) = Some(Arc::new(handler));
    }

    /// Starts reading the link. Calling it again has no effect.
    pub fn start(&self) {
        let Some(inbound) = lock_or_recover(&self.inner.inbound).take() else {
            tracing::debug!(transport = %self.inner.label, "transport channel already started");
            return;
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_read_loop(inner, inbound));
    }

    pub fn is_open(&self) -> bool {
        *self.inner.open.borrow()
    }

    /// Resolves once the channel is closed, locally or by the peer.
    pub async fn closed(&self) {
        let mut open = self.inner.open.subscribe();
        let _ = open.wait_for(|is_open| !*is_open).await;
    }

    pub fn close(&self) {
        shutdown(&self.inner, true);
    }

    /// Sends a fire-and-forget notification.
    pub fn send(&self, channel: &str, value: Value) -> Result<(), TransportError> {
        self.send_notification(Notification::new(channel, value))
    }

    /// Sends a notification and waits for the peer's acknowledgement.
    pub async fn send_with_ack(
        &self,
        channel: &str,
        value: Value,
    ) -> Result<AckOutcome, TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed);
        }
        let (context_id, pending) = self.inner.registry.register();
        self.send_notification(Notification::new(channel, value).with_context_id(context_id))?;
        pending.wait().await
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.registry.pending_count()
    }

    pub fn metrics(&self) -> ChannelMetricsSnapshot {
        let counters = &self.inner.counters;
        ChannelMetricsSnapshot {
            received: counters.received.load(Ordering::Relaxed),
            handled: counters.handled.load(Ordering::Relaxed),
            panicked: counters.panicked.load(Ordering::Relaxed),
            unhandled: counters.unhandled.load(Ordering::Relaxed),
            malformed: counters.malformed.load(Ordering::Relaxed),
        }
    }

    fn send_notification(&self, notification: Notification) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed);
        }
        tracing::trace!(
            transport = %self.inner.label,
            channel = %notification.channel,
            context_id = notification.context_id.as_deref().unwrap_or_default(),
            "sending notification"
        );
        self.inner.outbound.send(WireFrame::Event(notification))
    }
}

fn shutdown(inner: &Arc<ChannelInner>, notify_peer: bool) {
    let was_open = inner.open.send_replace(false);
    if !was_open {
        return;
    }
    if notify_peer {
        inner.outbound.send_closed();
    }
    lock_or_recover(&inner.workers).clear();
    // Handlers may hold clones of this channel.
    lock_or_recover(&inner.handlers).clear();
    lock_or_recover(&inner.fallback).take();
    let rejected = inner.registry.close_all(TransportError::ChannelClosed);
    tracing::debug!(
        transport = %inner.label,
        rejected_pending = rejected,
        "transport channel closed"
    );
}

async fn run_read_loop(inner: Arc<ChannelInner>, mut inbound: mpsc::UnboundedReceiver<LinkEvent>) {
    let mut open = inner.open.subscribe();
    loop {
        tokio::select! {
            event = inbound.recv() => match event {
                Some(LinkEvent::Frame(WireFrame::Ack(ack))) => {
                    inner.registry.resolve(&ack.context_id, ack.outcome);
                }
                Some(LinkEvent::Frame(WireFrame::Event(notification))) => {
                    inner.counters.received.fetch_add(1, Ordering::Relaxed);
                    dispatch(&inner, notification);
                }
                Some(LinkEvent::Malformed { context_id, error }) => {
                    inner.counters.malformed.fetch_add(1, Ordering::Relaxed);
                    handle_malformed(&inner, context_id, error);
                }
                Some(LinkEvent::Closed) | None => break,
            },
            _ = open.wait_for(|is_open| !*is_open) => break,
        }
    }
    shutdown(&inner, false);
}

fn handle_malformed(inner: &Arc<ChannelInner>, context_id: Option<String>, error: TransportError) {
    let Some(context_id) = context_id else {
        return;
    };
    if inner.registry.reject(&context_id, error.clone()) {
        return;
    }
    // Not one of ours: the peer may be waiting on this id.
    let frame = build_error_ack_frame(
        &context_id,
        WireError::new(ErrorKind::Decode, error.to_string()),
    );
    let _ = inner.outbound.send(frame);
}

fn dispatch(inner: &Arc<ChannelInner>, notification: Notification) {
    let channel = notification.channel.clone();
    let mut workers = lock_or_recover(&inner.workers);
    let worker = workers
        .entry(channel.clone())
        .or_insert_with(|| spawn_channel_worker(Arc::clone(inner), channel.clone()));
    if let Err(mpsc::error::SendError(notification)) = worker.send(notification) {
        workers.remove(&channel);
        drop(workers);
        reply_unhandled(inner, notification, "channel worker stopped");
    }
}

fn spawn_channel_worker(
    inner: Arc<ChannelInner>,
    channel: String,
) -> mpsc::UnboundedSender<Notification> {
    let (sender, mut receiver) = mpsc::unbounded_channel::<Notification>();
    tokio::spawn(async move {
        while let Some(notification) = receiver.recv().await {
            let handler = lock_or_recover(&inner.handlers)
                .get(&channel)
                .cloned()
                .or_else(|| lock_or_recover(&inner.fallback).clone());
            let Some(handler) = handler else {
                reply_unhandled(&inner, notification, "no handler registered for channel");
                continue;
            };
            let ack = notification
                .context_id
                .clone()
                .map(|context_id| Acknowledger {
                    channel: channel.clone(),
                    context_id,
                    outbound: inner.outbound.clone(),
                    open: inner.open.subscribe(),
                    settled: false,
                });
            let invocation = tokio::spawn(async move { handler.handle(notification, ack).await });
            match invocation.await {
                Ok(()) => {
                    inner.counters.handled.fetch_add(1, Ordering::Relaxed);
                }
                Err(error) if error.is_panic() => {
                    inner.counters.panicked.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        transport = %inner.label,
                        channel = %channel,
                        "notification handler panicked"
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        transport = %inner.label,
                        channel = %channel,
                        %error,
                        "notification handler was cancelled"
                    );
                }
            }
        }
    });
    sender
}

fn reply_unhandled(inner: &Arc<ChannelInner>, notification: Notification, reason: &str) {
    inner.counters.unhandled.fetch_add(1, Ordering::Relaxed);
    tracing::warn!(
        transport = %inner.label,
        channel = %notification.channel,
        reason,
        "dropping notification"
    );
    if let Some(context_id) = notification.context_id.as_deref() {
        let frame = build_error_ack_frame(
            context_id,
            WireError::new(
                ErrorKind::Handler,
                format!("{reason} '{}'", notification.channel),
            ),
        );
        let _ = inner.outbound.send(frame);
    }
}
