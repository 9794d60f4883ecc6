//! Reference Picteus extension.
//!
//! Tags and describes images as they change, computes content embeddings,
//! and exposes process and image commands that drive every intent kind.

mod commands;
mod embeddings;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use picteus_extension_sdk::{
    Communicator, ExtensionContext, ExtensionError, ImageFeature, LogLevel, NotificationEvent,
    PicteusExtension,
};
use serde_json::{json, Value};
use tokio::sync::OnceCell;

pub use commands::{
    favorite_color_schema, ASK_FOR_SOMETHING_COMMAND, CONVERT_COMMAND, DIALOG_COMMAND,
    LOG_DIMENSIONS_COMMAND, SHOW_COMMAND,
};
pub use embeddings::{HashEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};

use commands::{run_image_command, run_process_command, ImageCommand, ProcessCommand};

pub const EXAMPLE_EXTENSION_ID: &str = "example";

/// The reference extension; one instance per process.
#[derive(Debug, Default)]
pub struct ExampleExtension {
    embedder: OnceCell<Arc<HashEmbedder>>,
    embedder_loads: AtomicUsize,
}

impl ExampleExtension {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times the embedder was built; at most once per instance.
    pub fn embedder_loads(&self) -> usize {
        self.embedder_loads.load(Ordering::Acquire)
    }

    async fn embedder(
        &self,
        communicator: &Communicator,
    ) -> Result<Arc<HashEmbedder>, ExtensionError> {
        self.embedder
            .get_or_try_init(|| async {
                self.embedder_loads.fetch_add(1, Ordering::AcqRel);
                let dimensions = communicator.settings()["dimensions"]
                    .as_u64()
                    .and_then(|value| usize::try_from(value).ok())
                    .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS);
                communicator.send_log(
                    format!("Loading the embedding model with {dimensions} dimensions"),
                    LogLevel::Info,
                )?;
                let embedder = communicator
                    .run_blocking(move || HashEmbedder::new(dimensions))
                    .await?;
                Ok::<_, ExtensionError>(Arc::new(embedder))
            })
            .await
            .cloned()
    }

    async fn on_image_changed(
        &self,
        communicator: &Communicator,
        event: &NotificationEvent,
        image_id: &str,
    ) -> Result<Option<Value>, ExtensionError> {
        let extension_id = communicator.extension_id();
        let created_or_updated = matches!(
            event,
            NotificationEvent::ImageCreated | NotificationEvent::ImageUpdated
        );
        if created_or_updated || *event == NotificationEvent::ImageDeleted {
            communicator.send_log(
                format!("The image with id '{image_id}' was touched"),
                LogLevel::Info,
            )?;
        }
        if created_or_updated || *event == NotificationEvent::ImageComputeTags {
            communicator.send_log(
                format!("Setting the tags for the image with id '{image_id}'"),
                LogLevel::Debug,
            )?;
            communicator
                .images()
                .set_tags(extension_id, image_id, vec![extension_id.to_string()])
                .await?;
        }
        if created_or_updated || *event == NotificationEvent::ImageComputeFeatures {
            communicator.send_log(
                format!("Setting the features for the image with id '{image_id}'"),
                LogLevel::Debug,
            )?;
            communicator
                .images()
                .set_features(
                    extension_id,
                    image_id,
                    vec![ImageFeature {
                        feature_type: "other".to_string(),
                        format: "string".to_string(),
                        name: Some(EXAMPLE_EXTENSION_ID.to_string()),
                        value: json!("This is a string"),
                    }],
                )
                .await?;
        }
        if *event == NotificationEvent::ImageComputeEmbeddings {
            let bytes = communicator
                .images()
                .download(image_id, Some("png"), None, None)
                .await?;
            let embedder = self.embedder(communicator).await?;
            let embeddings = communicator
                .run_blocking(move || embedder.embed_image(&bytes))
                .await?;
            communicator
                .images()
                .set_embeddings(extension_id, image_id, embeddings)
                .await?;
        }
        Ok(None)
    }
}

#[async_trait]
impl PicteusExtension for ExampleExtension {
    async fn initialize(&self, context: &ExtensionContext) -> Result<bool, ExtensionError> {
        tracing::debug!(extension_id = %context.config().extension_id, "initializing");
        let settings = context.connect().await?;
        tracing::debug!(extension_id = %context.config().extension_id, %settings, "connected");
        Ok(true)
    }

    async fn on_ready(&self, communicator: &Communicator) -> Result<(), ExtensionError> {
        communicator.send_log(
            format!("The extension '{}' is ready", communicator.extension_id()),
            LogLevel::Info,
        )?;
        communicator.send_notification(json!({"key": "value"}))
    }

    async fn on_settings(
        &self,
        communicator: &Communicator,
        settings: &Value,
    ) -> Result<(), ExtensionError> {
        communicator.send_log(
            format!(
                "The extension with id '{}' was notified that the settings have been set to {settings}",
                communicator.extension_id()
            ),
            LogLevel::Debug,
        )
    }

    async fn on_event(
        &self,
        communicator: &Communicator,
        event: &NotificationEvent,
        value: Value,
    ) -> Result<Option<Value>, ExtensionError> {
        let result = match event {
            event if event.is_image_lifecycle() => {
                let Some(image_id) = value["id"].as_str() else {
                    return Err(ExtensionError::Decode(format!(
                        "{event} value has no image id"
                    )));
                };
                self.on_image_changed(communicator, event, image_id).await
            }
            NotificationEvent::TextComputeEmbeddings => {
                let text = value["text"].as_str().unwrap_or_default().to_string();
                communicator.send_log(
                    format!("Computing text embeddings for the text '{text}'"),
                    LogLevel::Info,
                )?;
                let embedder = self.embedder(communicator).await?;
                let embeddings = communicator
                    .run_blocking(move || embedder.embed_text(&text))
                    .await?;
                Ok(Some(json!(embeddings)))
            }
            NotificationEvent::ProcessRunCommand => {
                let command = serde_json::from_value::<ProcessCommand>(value)
                    .map_err(|error| ExtensionError::Decode(format!("process command: {error}")))?;
                run_process_command(communicator, command).await
            }
            NotificationEvent::ImageRunCommand => {
                let command = serde_json::from_value::<ImageCommand>(value)
                    .map_err(|error| ExtensionError::Decode(format!("image command: {error}")))?;
                run_image_command(communicator, command).await
            }
            other => {
                tracing::debug!(event = %other, "event ignored");
                Ok(None)
            }
        };
        match result {
            Err(error) if error.is_user_cancelled() => {
                let reason = error.cancellation_reason().unwrap_or_default().to_string();
                communicator.send_log(
                    format!("Received the intent error '{error}' with reason '{reason}'"),
                    LogLevel::Error,
                )?;
                Ok(None)
            }
            other => other,
        }
    }

    async fn on_terminate(&self) -> Result<(), ExtensionError> {
        tracing::debug!(
            embedder_loaded = self.embedder.initialized(),
            "terminating"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests;
