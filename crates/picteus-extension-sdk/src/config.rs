use std::path::PathBuf;

use picteus_protocol::ExtensionError;
pub use picteus_protocol::{
    PICTEUS_API_KEY_ENV, PICTEUS_CACHE_DIRECTORY_ENV, PICTEUS_EXTENSION_ID_ENV,
    PICTEUS_TERMINATE_GRACE_MS_ENV,
};

const HANDSHAKE_TIMEOUT_MS_DEFAULT: u64 = 10_000;
const TERMINATE_GRACE_MS_DEFAULT: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `ExtensionRuntimeConfig` used across Picteus components.
pub struct ExtensionRuntimeConfig {
    pub extension_id: String,
    pub api_key: String,
    pub cache_directory: Option<PathBuf>,
    pub handshake_timeout_ms: u64,
    pub terminate_grace_ms: u64,
}

impl Default for ExtensionRuntimeConfig {
    fn default() -> Self {
        Self {
            extension_id: String::new(),
            api_key: String::new(),
            cache_directory: None,
            handshake_timeout_ms: HANDSHAKE_TIMEOUT_MS_DEFAULT,
            terminate_grace_ms: TERMINATE_GRACE_MS_DEFAULT,
        }
    }
}

impl ExtensionRuntimeConfig {
    pub fn new(extension_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            extension_id: extension_id.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Reads the configuration the host passes to a spawned extension process.
    pub fn from_env() -> Result<Self, ExtensionError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ExtensionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    ExtensionError::Bootstrap(format!("environment variable {name} is not set"))
                })
        };
        let extension_id = required(PICTEUS_EXTENSION_ID_ENV)?;
        let api_key = required(PICTEUS_API_KEY_ENV)?;
        let cache_directory = lookup(PICTEUS_CACHE_DIRECTORY_ENV)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        let terminate_grace_ms = match lookup(PICTEUS_TERMINATE_GRACE_MS_ENV) {
            Some(raw) => raw.trim().parse::<u64>().map_err(|error| {
                ExtensionError::Bootstrap(format!(
                    "environment variable {PICTEUS_TERMINATE_GRACE_MS_ENV} is invalid: {error}"
                ))
            })?,
            None => TERMINATE_GRACE_MS_DEFAULT,
        };
        Ok(Self {
            extension_id,
            api_key,
            cache_directory,
            terminate_grace_ms,
            ..Self::default()
        })
    }
}
