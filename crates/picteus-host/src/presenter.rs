use async_trait::async_trait;
use picteus_protocol::Intent;
use serde_json::Value;

/// An intent waiting for the user, as handed to the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentRequest {
    pub extension_id: String,
    pub context_id: String,
    pub intent: Intent,
}

/// What the user did with a presented intent.
#[derive(Debug, Clone, PartialEq)]
pub enum PresentationOutcome {
    Submitted(Value),
    Cancelled { reason: String },
}

impl PresentationOutcome {
    /// Answer to a dialog intent.
    pub fn answer(yes: bool) -> Self {
        Self::Submitted(Value::Bool(yes))
    }
}

/// Trait contract for the UI layer that renders intents.
///
/// Several intents may be presented at once; implementations must not assume
/// they are called one at a time.
#[async_trait]
pub trait IntentPresenter: Send + Sync {
    async fn present(&self, request: IntentRequest) -> PresentationOutcome;
}

pub const CANCELLED_REASON: &str = "Cancelled";

/// Presenter for hosts without a UI: every intent is cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct CancellingPresenter;

#[async_trait]
impl IntentPresenter for CancellingPresenter {
    async fn present(&self, request: IntentRequest) -> PresentationOutcome {
        tracing::info!(
            extension_id = %request.extension_id,
            context_id = %request.context_id,
            intent = %request.intent.kind(),
            "no interactive presenter; cancelling intent"
        );
        PresentationOutcome::Cancelled {
            reason: CANCELLED_REASON.to_string(),
        }
    }
}
