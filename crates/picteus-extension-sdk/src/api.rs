//! Typed clients for the host APIs an extension may call back into.
//!
//! Transport of these calls (HTTP in the desktop application) is supplied by
//! the embedder; the runtime only carries the trait objects.

use std::sync::Arc;

use async_trait::async_trait;
use picteus_protocol::ExtensionError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
/// Enumerates supported `ApiError` values.
pub enum ApiError {
    #[error("{api} api is not configured for this extension")]
    NotConfigured { api: &'static str },
    #[error("resource '{0}' not found")]
    NotFound(String),
    #[error("api request failed: {0}")]
    Request(String),
}

impl From<ApiError> for ExtensionError {
    fn from(error: ApiError) -> Self {
        ExtensionError::Api(error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Public struct `ImageSummary` used across Picteus components.
pub struct ImageSummary {
    pub id: String,
    pub repository_id: String,
    pub name: String,
    pub format: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Public struct `RepositorySummary` used across Picteus components.
pub struct RepositorySummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Public struct `ImageFeature` used across Picteus components.
pub struct ImageFeature {
    #[serde(rename = "type")]
    pub feature_type: String,
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub value: Value,
}

#[async_trait]
/// Trait contract for `ImageApi` behavior.
pub trait ImageApi: Send + Sync {
    async fn get(&self, image_id: &str) -> Result<ImageSummary, ApiError>;

    async fn download(
        &self,
        image_id: &str,
        format: Option<&str>,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<Vec<u8>, ApiError>;

    async fn set_tags(
        &self,
        extension_id: &str,
        image_id: &str,
        tags: Vec<String>,
    ) -> Result<(), ApiError>;

    async fn set_features(
        &self,
        extension_id: &str,
        image_id: &str,
        features: Vec<ImageFeature>,
    ) -> Result<(), ApiError>;

    async fn set_embeddings(
        &self,
        extension_id: &str,
        image_id: &str,
        embeddings: Vec<f32>,
    ) -> Result<(), ApiError>;

    async fn search(&self, text: &str, limit: usize) -> Result<Vec<ImageSummary>, ApiError>;
}

#[async_trait]
/// Trait contract for `RepositoryApi` behavior.
pub trait RepositoryApi: Send + Sync {
    async fn list(&self) -> Result<Vec<RepositorySummary>, ApiError>;

    /// Returns the repository with `technical_id`, creating it when missing.
    async fn ensure(&self, technical_id: &str, name: &str)
        -> Result<RepositorySummary, ApiError>;

    async fn store_image(
        &self,
        repository_id: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<ImageSummary, ApiError>;
}

#[async_trait]
/// Trait contract for `ExtensionApi` behavior.
pub trait ExtensionApi: Send + Sync {
    async fn get_settings(&self, extension_id: &str) -> Result<Value, ApiError>;

    async fn set_settings(&self, extension_id: &str, value: Value) -> Result<(), ApiError>;
}

struct UnconfiguredApi;

#[async_trait]
impl ImageApi for UnconfiguredApi {
    async fn get(&self, _image_id: &str) -> Result<ImageSummary, ApiError> {
        Err(ApiError::NotConfigured { api: "image" })
    }

    async fn download(
        &self,
        _image_id: &str,
        _format: Option<&str>,
        _width: Option<u32>,
        _height: Option<u32>,
    ) -> Result<Vec<u8>, ApiError> {
        Err(ApiError::NotConfigured { api: "image" })
    }

    async fn set_tags(
        &self,
        _extension_id: &str,
        _image_id: &str,
        _tags: Vec<String>,
    ) -> Result<(), ApiError> {
        Err(ApiError::NotConfigured { api: "image" })
    }

    async fn set_features(
        &self,
        _extension_id: &str,
        _image_id: &str,
        _features: Vec<ImageFeature>,
    ) -> Result<(), ApiError> {
        Err(ApiError::NotConfigured { api: "image" })
    }

    async fn set_embeddings(
        &self,
        _extension_id: &str,
        _image_id: &str,
        _embeddings: Vec<f32>,
    ) -> Result<(), ApiError> {
        Err(ApiError::NotConfigured { api: "image" })
    }

    async fn search(&self, _text: &str, _limit: usize) -> Result<Vec<ImageSummary>, ApiError> {
        Err(ApiError::NotConfigured { api: "image" })
    }
}

#[async_trait]
impl RepositoryApi for UnconfiguredApi {
    async fn list(&self) -> Result<Vec<RepositorySummary>, ApiError> {
        Err(ApiError::NotConfigured { api: "repository" })
    }

    async fn ensure(
        &self,
        _technical_id: &str,
        _name: &str,
    ) -> Result<RepositorySummary, ApiError> {
        Err(ApiError::NotConfigured { api: "repository" })
    }

    async fn store_image(
        &self,
        _repository_id: &str,
        _name: &str,
        _bytes: Vec<u8>,
    ) -> Result<ImageSummary, ApiError> {
        Err(ApiError::NotConfigured { api: "repository" })
    }
}

#[async_trait]
impl ExtensionApi for UnconfiguredApi {
    async fn get_settings(&self, _extension_id: &str) -> Result<Value, ApiError> {
        Err(ApiError::NotConfigured { api: "extension" })
    }

    async fn set_settings(&self, _extension_id: &str, _value: Value) -> Result<(), ApiError> {
        Err(ApiError::NotConfigured { api: "extension" })
    }
}

/// Host API clients available to an extension through its communicator.
#[derive(Clone)]
pub struct ApiClients {
    pub images: Arc<dyn ImageApi>,
    pub repositories: Arc<dyn RepositoryApi>,
    pub extensions: Arc<dyn ExtensionApi>,
}

impl Default for ApiClients {
    fn default() -> Self {
        let unconfigured = Arc::new(UnconfiguredApi);
        Self {
            images: unconfigured.clone(),
            repositories: unconfigured.clone(),
            extensions: unconfigured,
        }
    }
}

impl ApiClients {
    pub fn with_images(mut self, images: Arc<dyn ImageApi>) -> Self {
        self.images = images;
        self
    }

    pub fn with_repositories(mut self, repositories: Arc<dyn RepositoryApi>) -> Self {
        self.repositories = repositories;
        self
    }

    pub fn with_extensions(mut self, extensions: Arc<dyn ExtensionApi>) -> Self {
        self.extensions = extensions;
        self
    }
}
