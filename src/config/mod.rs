// file: src/config/mod.rs
// version: 2.0.0
// guid: a1b2c3d4-e5f6-4a8b-9c0d-1e2f3a4b5c6d

//! Configuration module for the cloud image builder
//!
//! Handles loading of image entries, guest profiles, transports and
//! provisioning settings.

pub mod guest;
pub mod image;
pub mod loader;
pub mod provisioning;

pub use guest::{GuestProfile, GuestSet, TcpForward};
pub use image::{DestinationSpec, ImageSpec, PublishedImage, SeedPayload, SourceSpec};
pub use provisioning::{PhaseTimeouts, ProvisioningSettings, TransportProfile};

use crate::{error::CloudImageError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top level configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuilderConfig {
    #[serde(default, alias = "system-imaging")]
    pub system_imaging: SystemImaging,
    #[serde(default)]
    pub qemu: QemuSection,
    #[serde(default)]
    pub transports: BTreeMap<String, TransportProfile>,
    #[serde(default)]
    pub provisioning: ProvisioningSettings,
}

/// Buildable images, keyed by entry name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemImaging {
    #[serde(default)]
    pub images: BTreeMap<String, ImageSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QemuSection {
    #[serde(default)]
    pub guests: GuestSet,
}

impl BuilderConfig {
    /// Look up an image entry
    pub fn image(&self, name: &str) -> Result<&ImageSpec> {
        self.system_imaging.images.get(name).ok_or_else(|| {
            CloudImageError::config(format!(
                "missing system_imaging.images.{} entry in configuration file",
                name
            ))
        })
    }

    /// Image entry names matching a case-insensitive fnmatch pattern
    pub fn matching_images(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = loader::fnmatch_regex(pattern)?;
        Ok(self
            .system_imaging
            .images
            .keys()
            .filter(|name| matcher.is_match(name))
            .cloned()
            .collect())
    }

    /// Resolve the transport named by the provisioning settings
    pub fn transport(&self) -> Result<&TransportProfile> {
        let name = &self.provisioning.transport;
        self.transports.get(name).ok_or_else(|| {
            CloudImageError::config(format!(
                "transport '{}' is not defined in configuration file; \
                 for FreeBSD nuage images it is usually freebsd:freebsd",
                name
            ))
        })
    }
}
