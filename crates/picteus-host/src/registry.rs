use std::{collections::BTreeMap, sync::Mutex};

use picteus_core::lock_or_recover;
use picteus_extensions::{CommandTarget, ExtensionManifest};
use picteus_transport::TransportChannel;

use crate::{error::HostError, events::ExtensionStatus};

/// Installed extension as the host knows it. Immutable after registration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionIdentity {
    pub id: String,
    pub name: String,
    pub manifest: ExtensionManifest,
}

impl ExtensionIdentity {
    pub fn from_manifest(manifest: ExtensionManifest) -> Self {
        Self {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            manifest,
        }
    }
}

struct ExtensionEntry {
    identity: ExtensionIdentity,
    api_key: String,
    status: ExtensionStatus,
    channel: Option<TransportChannel>,
    attachment: u64,
}

/// Extension id to identity, credentials, status and live channel.
#[derive(Default)]
pub(crate) struct ExtensionRegistry {
    entries: Mutex<BTreeMap<String, ExtensionEntry>>,
}

impl ExtensionRegistry {
    pub(crate) fn register(
        &self,
        identity: ExtensionIdentity,
        api_key: String,
    ) -> Result<(), HostError> {
        let mut entries = lock_or_recover(&self.entries);
        if entries.contains_key(&identity.id) {
            return Err(HostError::AlreadyRegistered(identity.id));
        }
        entries.insert(
            identity.id.clone(),
            ExtensionEntry {
                identity,
                api_key,
                status: ExtensionStatus::Registered,
                channel: None,
                attachment: 0,
            },
        );
        Ok(())
    }

    /// Validates handshake credentials and binds `channel`; returns the attachment number.
    pub(crate) fn connect(
        &self,
        extension_id: &str,
        api_key: &str,
        channel: TransportChannel,
    ) -> Result<u64, String> {
        let mut entries = lock_or_recover(&self.entries);
        let Some(entry) = entries.get_mut(extension_id) else {
            return Err(format!("unknown extension '{extension_id}'"));
        };
        if entry.api_key != api_key {
            return Err(format!("invalid api key for extension '{extension_id}'"));
        }
        if let Some(existing) = entry.channel.as_ref() {
            if existing.is_open() {
                return Err(format!("extension '{extension_id}' is already connected"));
            }
        }
        entry.attachment += 1;
        entry.channel = Some(channel);
        entry.status = ExtensionStatus::Connected;
        Ok(entry.attachment)
    }

    /// Drops the channel bound by `attachment`; returns the new status when it changed.
    pub(crate) fn disconnect(&self, extension_id: &str, attachment: u64) -> Option<ExtensionStatus> {
        let mut entries = lock_or_recover(&self.entries);
        let entry = entries.get_mut(extension_id)?;
        if entry.attachment != attachment || entry.channel.is_none() {
            return None;
        }
        entry.channel = None;
        if entry.status == ExtensionStatus::Failed {
            return None;
        }
        entry.status = ExtensionStatus::NotReady;
        Some(entry.status)
    }

    pub(crate) fn set_status(&self, extension_id: &str, status: ExtensionStatus) -> bool {
        let mut entries = lock_or_recover(&self.entries);
        match entries.get_mut(extension_id) {
            Some(entry) if entry.status != status => {
                entry.status = status;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn status(&self, extension_id: &str) -> Option<ExtensionStatus> {
        lock_or_recover(&self.entries)
            .get(extension_id)
            .map(|entry| entry.status)
    }

    pub(crate) fn identity(&self, extension_id: &str) -> Option<ExtensionIdentity> {
        lock_or_recover(&self.entries)
            .get(extension_id)
            .map(|entry| entry.identity.clone())
    }

    pub(crate) fn verify_api_key(&self, extension_id: &str, api_key: &str) -> bool {
        lock_or_recover(&self.entries)
            .get(extension_id)
            .is_some_and(|entry| entry.api_key == api_key)
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        lock_or_recover(&self.entries).keys().cloned().collect()
    }

    /// Channel of a connected extension that accepts application events.
    pub(crate) fn live_channel(&self, extension_id: &str) -> Result<TransportChannel, HostError> {
        let entries = lock_or_recover(&self.entries);
        let entry = entries
            .get(extension_id)
            .ok_or_else(|| HostError::UnknownExtension(extension_id.to_string()))?;
        match entry.channel.as_ref() {
            Some(channel) if entry.status.accepts_events() && channel.is_open() => {
                Ok(channel.clone())
            }
            _ => Err(HostError::NotConnected {
                extension_id: extension_id.to_string(),
            }),
        }
    }

    pub(crate) fn any_channel(&self, extension_id: &str) -> Option<TransportChannel> {
        lock_or_recover(&self.entries)
            .get(extension_id)
            .and_then(|entry| entry.channel.clone())
    }

    /// Live channels of extensions whose manifest subscribes to `channel`.
    pub(crate) fn subscribers(&self, channel: &str) -> Vec<(String, TransportChannel)> {
        lock_or_recover(&self.entries)
            .values()
            .filter(|entry| {
                entry.status.accepts_events() && entry.identity.manifest.subscribes_to(channel)
            })
            .filter_map(|entry| {
                entry
                    .channel
                    .as_ref()
                    .filter(|link| link.is_open())
                    .map(|link| (entry.identity.id.clone(), link.clone()))
            })
            .collect()
    }

    pub(crate) fn command_owner(&self, command_id: &str, target: CommandTarget) -> Option<String> {
        lock_or_recover(&self.entries)
            .values()
            .find(|entry| {
                entry
                    .identity
                    .manifest
                    .command(command_id)
                    .is_some_and(|command| command.on == target)
            })
            .map(|entry| entry.identity.id.clone())
    }
}
