//! The intent union: UI requests an extension asks the host to resolve.
//!
//! Extension code builds an [`Intent`] through the enum, so exactly one branch is
//! always populated. Payloads arriving from the wire go through
//! [`Intent::from_value`], which counts populated branches before anything is
//! presented.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExtensionError;

const INTENT_BRANCHES: &str = "parameters, dialog, show, images, ui";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogType {
    Info,
    Question,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogButtons {
    pub yes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogContent {
    #[serde(rename = "type")]
    pub dialog_type: DialogType,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub buttons: DialogButtons,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShowType {
    ExtensionSettings,
    Image,
    Repository,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowContent {
    #[serde(rename = "type")]
    pub show_type: ShowType,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReference {
    pub image_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagesContent {
    pub images: Vec<ImageReference>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UiAnchor {
    Modal,
    Sidebar,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiContent {
    pub anchor: UiAnchor,
    pub url: String,
}

/// A UI request with exactly one populated branch.
///
/// `parameters` carries a JSON Schema describing the form to render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawIntent")]
pub enum Intent {
    Parameters(Value),
    Dialog(DialogContent),
    Show(ShowContent),
    Images(ImagesContent),
    Ui(UiContent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentKind {
    Parameters,
    Dialog,
    Show,
    Images,
    Ui,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parameters => "parameters",
            Self::Dialog => "dialog",
            Self::Show => "show",
            Self::Images => "images",
            Self::Ui => "ui",
        }
    }

    /// Returns true when the host resolves this kind with `null` rather than user data.
    pub fn resolves_to_void(&self) -> bool {
        matches!(self, Self::Show | Self::Images | Self::Ui)
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Intent {
    pub fn kind(&self) -> IntentKind {
        match self {
            Self::Parameters(_) => IntentKind::Parameters,
            Self::Dialog(_) => IntentKind::Dialog,
            Self::Show(_) => IntentKind::Show,
            Self::Images(_) => IntentKind::Images,
            Self::Ui(_) => IntentKind::Ui,
        }
    }

    pub fn parameters_schema(&self) -> Option<&Value> {
        match self {
            Self::Parameters(schema) => Some(schema),
            _ => None,
        }
    }

    /// Parses an intent received over the wire, enforcing the single-branch rule.
    pub fn from_value(raw: &Value) -> Result<Self, ExtensionError> {
        if !raw.is_object() {
            return Err(ExtensionError::MalformedIntent(
                "intent must be a JSON object".to_string(),
            ));
        }
        let populated = count_populated_branches(raw);
        if populated != 1 {
            return Err(ExtensionError::MalformedIntent(format!(
                "intent must populate exactly one of {INTENT_BRANCHES}; found {populated}"
            )));
        }
        serde_json::from_value::<Intent>(raw.clone())
            .map_err(|error| ExtensionError::MalformedIntent(error.to_string()))
    }

    pub fn to_value(&self) -> Result<Value, ExtensionError> {
        serde_json::to_value(self).map_err(|error| ExtensionError::Decode(error.to_string()))
    }
}

fn count_populated_branches(raw: &Value) -> usize {
    ["parameters", "dialog", "show", "images", "ui"]
        .iter()
        .filter(|branch| raw.get(**branch).is_some_and(|value| !value.is_null()))
        .count()
}

#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct RawIntent {
    #[serde(default)]
    parameters: Option<Value>,
    #[serde(default)]
    dialog: Option<DialogContent>,
    #[serde(default)]
    show: Option<ShowContent>,
    #[serde(default)]
    images: Option<ImagesContent>,
    #[serde(default)]
    ui: Option<UiContent>,
}

#[derive(Debug)]
pub struct IntentShapeError(String);

impl fmt::Display for IntentShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<RawIntent> for Intent {
    type Error = IntentShapeError;

    fn try_from(raw: RawIntent) -> Result<Self, Self::Error> {
        let RawIntent {
            parameters,
            dialog,
            show,
            images,
            ui,
        } = raw;
        let mut branches = Vec::with_capacity(1);
        if let Some(schema) = parameters {
            if !schema.is_object() {
                return Err(IntentShapeError(
                    "intent parameters must be a JSON Schema object".to_string(),
                ));
            }
            branches.push(Intent::Parameters(schema));
        }
        if let Some(dialog) = dialog {
            branches.push(Intent::Dialog(dialog));
        }
        if let Some(show) = show {
            branches.push(Intent::Show(show));
        }
        if let Some(images) = images {
            branches.push(Intent::Images(images));
        }
        if let Some(ui) = ui {
            if ui.url.trim().is_empty() {
                return Err(IntentShapeError("intent ui url must be non-empty".to_string()));
            }
            branches.push(Intent::Ui(ui));
        }
        if branches.len() != 1 {
            return Err(IntentShapeError(format!(
                "intent must populate exactly one of {INTENT_BRANCHES}; found {}",
                branches.len()
            )));
        }
        branches
            .pop()
            .ok_or_else(|| IntentShapeError("intent has no populated branch".to_string()))
    }
}

/// Payload of the `extension.intent` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentEnvelope {
    pub id: String,
    pub intent: Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn unit_intent_serializes_single_branch_object() {
        let intent = Intent::Dialog(DialogContent {
            dialog_type: DialogType::Question,
            title: "Delete".to_string(),
            description: "Remove this image?".to_string(),
            details: None,
            buttons: DialogButtons {
                yes: "Yes".to_string(),
                no: Some("No".to_string()),
            },
        });
        let encoded = intent.to_value().expect("encode");
        assert_eq!(
            encoded,
            json!({
                "dialog": {
                    "type": "Question",
                    "title": "Delete",
                    "description": "Remove this image?",
                    "buttons": {"yes": "Yes", "no": "No"}
                }
            })
        );
        assert_eq!(Intent::from_value(&encoded).expect("decode"), intent);
    }

    #[test]
    fn functional_from_value_accepts_each_branch() {
        let cases = [
            (
                json!({"parameters": {"type": "object", "properties": {}}}),
                IntentKind::Parameters,
            ),
            (
                json!({"show": {"type": "ExtensionSettings", "id": "demo"}}),
                IntentKind::Show,
            ),
            (
                json!({"images": {"images": [{"imageId": "a"}], "title": "Similar"}}),
                IntentKind::Images,
            ),
            (
                json!({"ui": {"anchor": "Modal", "url": "https://example.com"}}),
                IntentKind::Ui,
            ),
        ];
        for (raw, kind) in cases {
            let intent = Intent::from_value(&raw).expect("valid intent");
            assert_eq!(intent.kind(), kind);
        }
    }

    #[test]
    fn regression_intent_enums_use_pascal_case_wire_values() {
        let dialog = Intent::from_value(&json!({
            "dialog": {
                "type": "Question",
                "title": "T",
                "description": "D",
                "buttons": {"yes": "Yes", "no": "No"}
            }
        }))
        .expect("dialog intent");
        let Intent::Dialog(content) = dialog else {
            panic!("expected a dialog intent");
        };
        assert_eq!(content.dialog_type, DialogType::Question);

        let show = Intent::from_value(&json!({"show": {"type": "ExtensionSettings", "id": "x"}}))
            .expect("show intent");
        assert_eq!(
            show.to_value().expect("encode"),
            json!({"show": {"type": "ExtensionSettings", "id": "x"}})
        );
        assert_eq!(
            serde_json::to_value(UiAnchor::Sidebar).expect("anchor"),
            json!("Sidebar")
        );

        let camel = json!({"show": {"type": "extensionSettings", "id": "x"}});
        let lowercase = Intent::from_value(&camel).expect_err("camelCase type is not a wire value");
        assert_eq!(lowercase.kind(), ErrorKind::MalformedIntent);
    }

    #[test]
    fn regression_from_value_rejects_two_populated_branches() {
        let raw = json!({
            "dialog": {
                "type": "Info",
                "title": "t",
                "description": "d",
                "buttons": {"yes": "ok"}
            },
            "show": {"type": "Image", "id": "img-1"}
        });
        let error = Intent::from_value(&raw).expect_err("two branches should fail");
        assert_eq!(error.kind(), ErrorKind::MalformedIntent);
        assert!(error.to_string().contains("found 2"));
    }

    #[test]
    fn regression_from_value_rejects_empty_and_non_object_intents() {
        for raw in [json!({}), json!({"dialog": null}), json!("dialog"), json!([])] {
            let error = Intent::from_value(&raw).expect_err("should be malformed");
            assert_eq!(error.kind(), ErrorKind::MalformedIntent, "{raw}");
        }
    }

    #[test]
    fn regression_from_value_rejects_non_object_parameters_schema() {
        let error = Intent::from_value(&json!({"parameters": "string"}))
            .expect_err("schema must be object");
        assert_eq!(error.kind(), ErrorKind::MalformedIntent);
    }

    #[test]
    fn unit_intent_kind_void_results() {
        assert!(IntentKind::Show.resolves_to_void());
        assert!(IntentKind::Ui.resolves_to_void());
        assert!(IntentKind::Images.resolves_to_void());
        assert!(!IntentKind::Dialog.resolves_to_void());
        assert!(!IntentKind::Parameters.resolves_to_void());
    }
}
