use std::{collections::HashMap, sync::Mutex};

use jsonschema::{validator_for, Validator};
use picteus_core::lock_or_recover;
use picteus_protocol::{AckOutcome, ExtensionError, Intent, IntentEnvelope, IntentKind};
use serde_json::Value;

use crate::presenter::PresentationOutcome;

/// An intent that passed validation and may be shown to the user.
pub(crate) struct PreparedIntent {
    pub(crate) intent: Intent,
    parameters: Option<Validator>,
}

impl PreparedIntent {
    pub(crate) fn kind(&self) -> IntentKind {
        self.intent.kind()
    }
}

/// Parses an `extension.intent` payload sent by `extension_id`.
pub(crate) fn prepare_intent(
    extension_id: &str,
    payload: Value,
) -> Result<PreparedIntent, ExtensionError> {
    let envelope = serde_json::from_value::<IntentEnvelope>(payload)
        .map_err(|error| ExtensionError::MalformedIntent(format!("intent envelope: {error}")))?;
    if envelope.id != extension_id {
        return Err(ExtensionError::MalformedIntent(format!(
            "intent id '{}' does not match connected extension '{extension_id}'",
            envelope.id
        )));
    }
    let intent = Intent::from_value(&envelope.intent)?;
    let parameters = match intent.parameters_schema() {
        Some(schema) => Some(validator_for(schema).map_err(|error| {
            ExtensionError::MalformedIntent(format!("intent parameters schema is invalid: {error}"))
        })?),
        None => None,
    };
    Ok(PreparedIntent { intent, parameters })
}

/// Turns the presenter's answer into the acknowledgement sent to the extension.
pub(crate) fn settle_intent(prepared: &PreparedIntent, outcome: PresentationOutcome) -> AckOutcome {
    let value = match outcome {
        PresentationOutcome::Cancelled { reason } => return AckOutcome::Cancel(reason),
        PresentationOutcome::Submitted(value) => value,
    };
    match check_intent_result(prepared, value) {
        Ok(value) => AckOutcome::Value(value),
        Err(error) => AckOutcome::Error(error.to_wire()),
    }
}

fn check_intent_result(prepared: &PreparedIntent, value: Value) -> Result<Value, ExtensionError> {
    let kind = prepared.kind();
    if kind.resolves_to_void() {
        return Ok(Value::Null);
    }
    match kind {
        IntentKind::Dialog => match value {
            Value::Bool(_) => Ok(value),
            other => Err(ExtensionError::InvalidIntentResult(format!(
                "dialog result must be a boolean, got {other}"
            ))),
        },
        _ => {
            if !value.is_object() {
                return Err(ExtensionError::InvalidIntentResult(
                    "parameters result must be a JSON object".to_string(),
                ));
            }
            if let Some(validator) = prepared.parameters.as_ref() {
                let mut errors = validator.iter_errors(&value);
                if let Some(first) = errors.next() {
                    return Err(ExtensionError::InvalidIntentResult(format!(
                        "parameters result does not match schema: {first}"
                    )));
                }
            }
            Ok(value)
        }
    }
}

/// Context ids of the intents currently shown, per extension, oldest first.
#[derive(Debug, Default)]
pub(crate) struct IntentStack {
    open: Mutex<HashMap<String, Vec<String>>>,
}

impl IntentStack {
    pub(crate) fn push(&self, extension_id: &str, context_id: &str) {
        lock_or_recover(&self.open)
            .entry(extension_id.to_string())
            .or_default()
            .push(context_id.to_string());
    }

    /// Removes exactly `context_id`, wherever it sits in the stack.
    pub(crate) fn remove(&self, extension_id: &str, context_id: &str) -> bool {
        let mut open = lock_or_recover(&self.open);
        let Some(stack) = open.get_mut(extension_id) else {
            return false;
        };
        let Some(position) = stack.iter().position(|entry| entry == context_id) else {
            return false;
        };
        stack.remove(position);
        if stack.is_empty() {
            open.remove(extension_id);
        }
        true
    }

    pub(crate) fn snapshot(&self, extension_id: &str) -> Vec<String> {
        lock_or_recover(&self.open)
            .get(extension_id)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn clear(&self, extension_id: &str) -> usize {
        lock_or_recover(&self.open)
            .remove(extension_id)
            .map(|stack| stack.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use picteus_protocol::ErrorKind;
    use serde_json::json;

    use super::*;

    fn envelope(intent: Value) -> Value {
        json!({"id": "tagger", "intent": intent})
    }

    #[test]
    fn unit_prepare_intent_rejects_zero_and_multiple_branches() {
        let empty = prepare_intent("tagger", envelope(json!({}))).err().expect("empty");
        assert_eq!(empty.kind(), ErrorKind::MalformedIntent);

        let both = prepare_intent(
            "tagger",
            envelope(json!({
                "show": {"type": "Image", "id": "i"},
                "ui": {"anchor": "Modal", "url": "https://example.com"}
            })),
        )
        .err()
        .expect("two branches");
        assert_eq!(both.kind(), ErrorKind::MalformedIntent);
        assert!(both.to_string().contains("found 2"));
    }

    #[test]
    fn regression_prepare_intent_rejects_foreign_extension_id() {
        let error = prepare_intent(
            "tagger",
            json!({"id": "other", "intent": {"show": {"type": "Image", "id": "i"}}}),
        )
        .err()
        .expect("foreign id");
        assert!(error.to_string().contains("does not match connected extension"));
    }

    #[test]
    fn regression_prepare_intent_rejects_invalid_parameters_schema() {
        let error = prepare_intent(
            "tagger",
            envelope(json!({"parameters": {"type": "object", "properties": {"x": {"type": 5}}}})),
        )
        .err()
        .expect("bad schema");
        assert_eq!(error.kind(), ErrorKind::MalformedIntent);
    }

    #[test]
    fn functional_settle_intent_validates_parameters_against_schema() {
        let prepared = prepare_intent(
            "tagger",
            envelope(json!({"parameters": {
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }})),
        )
        .expect("prepared");

        let accepted = settle_intent(
            &prepared,
            PresentationOutcome::Submitted(json!({"name": "sunset"})),
        );
        assert_eq!(accepted, AckOutcome::Value(json!({"name": "sunset"})));

        match settle_intent(&prepared, PresentationOutcome::Submitted(json!({}))) {
            AckOutcome::Error(error) => assert_eq!(error.kind, ErrorKind::InvalidIntentResult),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unit_settle_intent_maps_dialog_void_and_cancel() {
        let dialog = prepare_intent(
            "tagger",
            envelope(json!({"dialog": {
                "type": "Question", "title": "t", "description": "d", "buttons": {"yes": "y"}
            }})),
        )
        .expect("dialog");
        assert_eq!(
            settle_intent(&dialog, PresentationOutcome::Submitted(json!(false))),
            AckOutcome::Value(json!(false))
        );
        assert!(settle_intent(&dialog, PresentationOutcome::Submitted(json!("yes"))).is_error());

        let show = prepare_intent(
            "tagger",
            envelope(json!({"show": {"type": "Repository", "id": "r"}})),
        )
        .expect("show");
        assert_eq!(
            settle_intent(&show, PresentationOutcome::Submitted(json!({"ignored": true}))),
            AckOutcome::Value(Value::Null)
        );
        assert_eq!(
            settle_intent(
                &show,
                PresentationOutcome::Cancelled {
                    reason: "Cancelled".to_string()
                }
            ),
            AckOutcome::Cancel("Cancelled".to_string())
        );
    }

    #[test]
    fn unit_intent_stack_removes_exactly_the_completed_entry() {
        let stack = IntentStack::default();
        stack.push("tagger", "a");
        stack.push("tagger", "b");
        stack.push("tagger", "c");

        assert!(stack.remove("tagger", "b"));
        assert!(!stack.remove("tagger", "b"));
        assert_eq!(stack.snapshot("tagger"), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(stack.clear("tagger"), 2);
        assert!(stack.snapshot("tagger").is_empty());
    }
}
