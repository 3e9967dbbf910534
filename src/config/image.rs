// file: src/config/image.rs
// version: 2.0.0
// guid: c3d4e5f6-a7b8-4012-8456-789012cdef01

//! Image specification and metadata structures

use crate::{error::CloudImageError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One buildable cloud image, as found under `system_imaging.images`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageSpec {
    /// Label of the guest profile used to provision this image
    #[serde(default)]
    pub system_label: Option<String>,
    /// Where the vendor nuage image comes from
    #[serde(default, alias = "nuage")]
    pub source: Option<SourceSpec>,
    /// Where the provisioned cloud image is published
    #[serde(default, alias = "cloud")]
    pub destination: Option<DestinationSpec>,
}

/// Vendor image source and seed payload locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSpec {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub decompressed_path: Option<PathBuf>,
    #[serde(default)]
    pub metadata_path: Option<PathBuf>,
    #[serde(default)]
    pub userdata_path: Option<PathBuf>,
}

/// Publishing location of the finished image
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestinationSpec {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Metadata and user-data files embedded into the seed volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedPayload {
    pub metadata_path: PathBuf,
    pub userdata_path: PathBuf,
}

impl ImageSpec {
    /// Source descriptor, required
    pub fn source(&self) -> Result<&SourceSpec> {
        self.source
            .as_ref()
            .ok_or_else(|| CloudImageError::config("missing .source entry in configuration file"))
    }

    /// Destination descriptor, required
    pub fn destination(&self) -> Result<&DestinationSpec> {
        self.destination.as_ref().ok_or_else(|| {
            CloudImageError::config("missing .destination entry in configuration file")
        })
    }

    /// Target guest label, required
    pub fn system_label(&self) -> Result<&str> {
        self.system_label
            .as_deref()
            .ok_or_else(|| CloudImageError::config("missing .system_label entry in configuration file"))
    }

    /// Check every required field at once; used by `list` and before a build
    pub fn validate(&self) -> Result<()> {
        let source = self.source()?;
        source.path()?;
        source.payload()?;
        if let Some(url) = &source.url {
            url::Url::parse(url).map_err(|e| {
                CloudImageError::validation(format!("Invalid source url '{}': {}", url, e))
            })?;
        }
        self.destination()?.path()?;
        self.system_label()?;
        Ok(())
    }
}

impl SourceSpec {
    /// Local cache path of the downloaded image
    pub fn path(&self) -> Result<&Path> {
        self.path
            .as_deref()
            .ok_or_else(|| CloudImageError::config("missing .source.path entry in configuration file"))
    }

    /// Remote location, needed only when the cache is empty
    pub fn url(&self) -> Result<&str> {
        self.url
            .as_deref()
            .ok_or_else(|| CloudImageError::config("missing .source.url entry in configuration file"))
    }

    /// Seed payload files
    pub fn payload(&self) -> Result<SeedPayload> {
        let metadata_path = self.metadata_path.clone().ok_or_else(|| {
            CloudImageError::config("missing .source.metadata_path entry in configuration file")
        })?;
        let userdata_path = self.userdata_path.clone().ok_or_else(|| {
            CloudImageError::config("missing .source.userdata_path entry in configuration file")
        })?;

        Ok(SeedPayload {
            metadata_path,
            userdata_path,
        })
    }
}

impl DestinationSpec {
    pub fn path(&self) -> Result<&Path> {
        self.path.as_deref().ok_or_else(|| {
            CloudImageError::config("missing .destination.path entry in configuration file")
        })
    }
}

/// Record of a successfully published cloud image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedImage {
    /// Image entry name from the configuration
    pub name: String,
    /// Guest profile used to provision it
    pub guest: String,
    /// Published path
    pub path: PathBuf,
    /// SHA256 of the published file
    pub checksum: String,
    /// File size in bytes
    pub size_bytes: u64,
    /// Virtual disk size in bytes
    pub virtual_size: u64,
    /// Creation timestamp
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl PublishedImage {
    /// Get human-readable size
    pub fn size_human(&self) -> String {
        format_size(self.size_bytes)
    }
}

/// Format a byte count in human-readable form
pub fn format_size(size_bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size_bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}
