use picteus_extension_sdk::{
    Communicator, DialogButtons, DialogContent, DialogType, ExtensionError, ImageReference,
    ImagesContent, LogLevel, ShowContent, ShowType, UiAnchor, UiContent,
};
use serde::Deserialize;
use serde_json::{json, Value};

pub const ASK_FOR_SOMETHING_COMMAND: &str = "askForSomething";
pub const DIALOG_COMMAND: &str = "dialog";
pub const SHOW_COMMAND: &str = "show";
pub const LOG_DIMENSIONS_COMMAND: &str = "logDimensions";
pub const CONVERT_COMMAND: &str = "convert";

const CHOCOLATE_URL: &str = "https://www.milka.fr";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProcessCommand {
    pub(crate) command_id: String,
    #[serde(default)]
    pub(crate) parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ImageCommand {
    pub(crate) command_id: String,
    pub(crate) image_ids: Vec<String>,
    #[serde(default)]
    pub(crate) parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConvertParameters {
    format: String,
    #[serde(default)]
    strip_metadata: bool,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

/// Form shown by the `askForSomething` command.
pub fn favorite_color_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "favoriteColor": {
                "title": "Favorite color",
                "description": "What is your favorite color?",
                "type": "string",
                "default": "pink"
            },
            "likeChocolate": {
                "title": "Chocolate?",
                "description": "Do you like chocolate?",
                "type": "boolean"
            }
        },
        "required": ["favoriteColor"]
    })
}

pub(crate) async fn run_process_command(
    communicator: &Communicator,
    command: ProcessCommand,
) -> Result<Option<Value>, ExtensionError> {
    communicator.send_log(
        format!(
            "Received a process command with id '{}' with parameters '{}'",
            command.command_id, command.parameters
        ),
        LogLevel::Debug,
    )?;
    match command.command_id.as_str() {
        ASK_FOR_SOMETHING_COMMAND => ask_for_something(communicator).await.map(Some),
        DIALOG_COMMAND => {
            let confirmed = communicator
                .ask_dialog(DialogContent {
                    dialog_type: DialogType::Question,
                    title: "Dialog".to_string(),
                    description: "This is a dialog question".to_string(),
                    details: Some("Please, click the right button.".to_string()),
                    buttons: DialogButtons {
                        yes: "Yes".to_string(),
                        no: Some("No".to_string()),
                    },
                })
                .await?;
            let button = if confirmed { "Yes" } else { "No" };
            communicator.send_log(
                format!("The user clicked the '{button}' button"),
                LogLevel::Info,
            )?;
            Ok(Some(json!({ "confirmed": confirmed })))
        }
        SHOW_COMMAND => show(communicator, &command.parameters).await,
        other => {
            communicator.send_log(format!("Unhandled command '{other}'"), LogLevel::Warn)?;
            Ok(None)
        }
    }
}

async fn ask_for_something(communicator: &Communicator) -> Result<Value, ExtensionError> {
    let answers = communicator
        .ask_parameters(favorite_color_schema())
        .await?;
    let answers = Value::Object(answers);
    communicator.send_log(
        format!("Received the intent result '{answers}'"),
        LogLevel::Info,
    )?;
    if answers["likeChocolate"].as_bool().unwrap_or(false) {
        communicator
            .open_ui(UiContent {
                anchor: UiAnchor::Modal,
                url: CHOCOLATE_URL.to_string(),
            })
            .await?;
    }
    Ok(answers)
}

async fn show(
    communicator: &Communicator,
    parameters: &Value,
) -> Result<Option<Value>, ExtensionError> {
    let raw_type = parameters["type"].as_str().unwrap_or_default();
    let (show_type, id) = match raw_type {
        "extensionSettings" => (
            ShowType::ExtensionSettings,
            communicator.extension_id().to_string(),
        ),
        "image" => {
            let found = communicator.images().search("", 1).await?;
            let Some(image) = found.into_iter().next() else {
                communicator.send_log("There is no image to show", LogLevel::Warn)?;
                return Ok(None);
            };
            (ShowType::Image, image.id)
        }
        "repository" => {
            let repositories = communicator.repositories().list().await?;
            let Some(repository) = repositories.into_iter().next() else {
                communicator.send_log("There is no repository to show", LogLevel::Warn)?;
                return Ok(None);
            };
            (ShowType::Repository, repository.id)
        }
        other => {
            communicator.send_log(format!("Unhandled type '{other}'"), LogLevel::Error)?;
            return Ok(None);
        }
    };
    communicator
        .show(ShowContent {
            show_type,
            id: id.clone(),
        })
        .await?;
    Ok(Some(json!({ "shown": id })))
}

pub(crate) async fn run_image_command(
    communicator: &Communicator,
    command: ImageCommand,
) -> Result<Option<Value>, ExtensionError> {
    communicator.send_log(
        format!(
            "Received an image command with id '{}' for the images with ids '{}'",
            command.command_id,
            command.image_ids.join(", ")
        ),
        LogLevel::Debug,
    )?;
    match command.command_id.as_str() {
        LOG_DIMENSIONS_COMMAND => {
            for image_id in &command.image_ids {
                let image = communicator.images().get(image_id).await?;
                communicator.send_log(
                    format!(
                        "The image with id '{}' and name '{}' has dimensions {}x{}",
                        image.id, image.name, image.width, image.height
                    ),
                    LogLevel::Info,
                )?;
            }
            Ok(None)
        }
        CONVERT_COMMAND => convert(communicator, &command.image_ids, command.parameters).await,
        other => {
            communicator.send_log(format!("Unhandled command '{other}'"), LogLevel::Warn)?;
            Ok(None)
        }
    }
}

async fn convert(
    communicator: &Communicator,
    image_ids: &[String],
    parameters: Value,
) -> Result<Option<Value>, ExtensionError> {
    let parameters = serde_json::from_value::<ConvertParameters>(parameters)
        .map_err(|error| ExtensionError::Decode(format!("convert parameters: {error}")))?;
    let resized = parameters.width.is_some() || parameters.height.is_some();
    if resized && !parameters.strip_metadata {
        communicator
            .ask_dialog(DialogContent {
                dialog_type: DialogType::Error,
                title: "Image Conversion".to_string(),
                description: "When a dimension is specified, the metadata must be stripped."
                    .to_string(),
                details: None,
                buttons: DialogButtons {
                    yes: "OK".to_string(),
                    no: None,
                },
            })
            .await?;
        return Ok(None);
    }

    let mut converted = Vec::with_capacity(image_ids.len());
    for image_id in image_ids {
        let image = communicator.images().get(image_id).await?;
        communicator.send_log(
            format!(
                "Converting the image with id '{}' to {}",
                image.id, parameters.format
            ),
            LogLevel::Debug,
        )?;
        let bytes = communicator
            .images()
            .download(
                image_id,
                Some(&parameters.format),
                parameters.width,
                parameters.height,
            )
            .await?;
        let stored = communicator
            .repositories()
            .store_image(
                &image.repository_id,
                &converted_name(&image.name, &parameters.format),
                bytes,
            )
            .await?;
        converted.push(ImageReference { image_id: stored.id });
    }

    let ids = converted
        .iter()
        .map(|reference| Value::String(reference.image_id.clone()))
        .collect::<Vec<_>>();
    communicator
        .show_images(ImagesContent {
            images: converted,
            title: "Converted images".to_string(),
            description: Some("These are the converted images".to_string()),
        })
        .await?;
    Ok(Some(json!({ "converted": ids })))
}

fn converted_name(name: &str, format: &str) -> String {
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    format!("{stem}.{}", format.to_ascii_lowercase())
}
