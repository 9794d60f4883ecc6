use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use picteus_core::lock_or_recover;
use picteus_protocol::TransportError;
use tokio::sync::oneshot;

const SETTLED_HISTORY_CAPACITY: usize = 256;

type Completion<T> = Result<T, TransportError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Completed,
    Abandoned,
}

struct RegistryState<T> {
    pending: HashMap<String, oneshot::Sender<Completion<T>>>,
    settled: VecDeque<(String, Settlement)>,
}

impl<T> RegistryState<T> {
    fn remember(&mut self, id: String, settlement: Settlement) {
        if self.settled.len() >= SETTLED_HISTORY_CAPACITY {
            self.settled.pop_front();
        }
        self.settled.push_back((id, settlement));
    }

    fn settlement_of(&self, id: &str) -> Option<Settlement> {
        self.settled
            .iter()
            .rev()
            .find(|(settled_id, _)| settled_id == id)
            .map(|(_, settlement)| *settlement)
    }
}

/// Maps outstanding request ids to the tasks awaiting their replies.
///
/// Each id completes at most once. Later completions for the same id, and
/// completions for ids never issued, are ignored and logged.
pub struct CorrelationRegistry<T> {
    prefix: String,
    sequence: AtomicU64,
    state: Arc<Mutex<RegistryState<T>>>,
}

impl<T: Send + 'static> CorrelationRegistry<T> {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            sequence: AtomicU64::new(1),
            state: Arc::new(Mutex::new(RegistryState {
                pending: HashMap::new(),
                settled: VecDeque::with_capacity(SETTLED_HISTORY_CAPACITY),
            })),
        }
    }

    /// Allocates a fresh id and the handle that resolves when the id completes.
    pub fn register(&self) -> (String, PendingReply<T>) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let id = format!("{}-{}", self.prefix, sequence);
        let (sender, receiver) = oneshot::channel();
        lock_or_recover(&self.state)
            .pending
            .insert(id.clone(), sender);
        let pending = PendingReply {
            id: id.clone(),
            receiver: Some(receiver),
            state: Arc::clone(&self.state),
        };
        (id, pending)
    }

    pub fn resolve(&self, id: &str, value: T) -> bool {
        self.complete(id, Ok(value))
    }

    pub fn reject(&self, id: &str, error: TransportError) -> bool {
        self.complete(id, Err(error))
    }

    /// Rejects every pending request with `error`; returns how many were pending.
    pub fn close_all(&self, error: TransportError) -> usize {
        let drained = {
            let mut state = lock_or_recover(&self.state);
            let drained = state.pending.drain().collect::<Vec<_>>();
            for (id, _) in &drained {
                state.remember(id.clone(), Settlement::Completed);
            }
            drained
        };
        let count = drained.len();
        for (_, sender) in drained {
            let _ = sender.send(Err(error.clone()));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        lock_or_recover(&self.state).pending.len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        lock_or_recover(&self.state).pending.contains_key(id)
    }

    fn complete(&self, id: &str, completion: Completion<T>) -> bool {
        let sender = {
            let mut state = lock_or_recover(&self.state);
            match state.pending.remove(id) {
                Some(sender) => {
                    state.remember(id.to_string(), Settlement::Completed);
                    Some(sender)
                }
                None => {
                    match state.settlement_of(id) {
                        Some(Settlement::Completed) => tracing::warn!(
                            context_id = id,
                            "ignoring duplicate completion for correlated request"
                        ),
                        Some(Settlement::Abandoned) => tracing::debug!(
                            context_id = id,
                            "ignoring late completion for abandoned request"
                        ),
                        None => tracing::debug!(
                            context_id = id,
                            "ignoring completion for unknown correlated request"
                        ),
                    }
                    None
                }
            }
        };
        match sender {
            Some(sender) => sender.send(completion).is_ok(),
            None => false,
        }
    }
}

/// Awaitable side of a registered request.
///
/// Dropping it before completion deregisters the id, so a late reply is ignored.
pub struct PendingReply<T> {
    id: String,
    receiver: Option<oneshot::Receiver<Completion<T>>>,
    state: Arc<Mutex<RegistryState<T>>>,
}

impl<T> PendingReply<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn wait(mut self) -> Result<T, TransportError> {
        let Some(receiver) = self.receiver.take() else {
            return Err(TransportError::ChannelClosed);
        };
        match receiver.await {
            Ok(completion) => completion,
            Err(_) => Err(TransportError::ChannelClosed),
        }
    }
}

impl<T> Drop for PendingReply<T> {
    fn drop(&mut self) {
        let mut state = lock_or_recover(&self.state);
        if state.pending.remove(&self.id).is_some() {
            state.remember(self.id.clone(), Settlement::Abandoned);
        }
    }
}
