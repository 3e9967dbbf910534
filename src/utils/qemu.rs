// file: src/utils/qemu.rs
// version: 2.0.0
// guid: h9i0j1k2-l3m4-5678-9012-345678hijklm

//! QEMU image utilities

use super::system::SystemUtils;
use crate::{error::CloudImageError, Result};
use std::path::Path;
use tracing::debug;

/// QEMU image utilities
pub struct QemuUtils;

impl QemuUtils {
    /// Get image information using qemu-img info
    pub async fn get_image_info<P: AsRef<Path>>(image_path: P) -> Result<DiskImageInfo> {
        let path = image_path.as_ref();
        let stdout = SystemUtils::run_tool(
            "qemu-img",
            &["info".as_ref(), "--output=json".as_ref(), path.as_os_str()],
        )
        .await?;

        DiskImageInfo::from_json(&stdout)
    }

    /// Create an empty disk image
    pub async fn create_image<P: AsRef<Path>>(path: P, format: &str, size: &str) -> Result<()> {
        SystemUtils::run_tool(
            "qemu-img",
            &[
                "create".as_ref(),
                "-f".as_ref(),
                format.as_ref(),
                path.as_ref().as_os_str(),
                size.as_ref(),
            ],
        )
        .await?;

        debug!("Created {} disk: {}", format, path.as_ref().display());
        Ok(())
    }

    /// Grow an image in place to exactly `size_bytes`
    pub async fn resize<P: AsRef<Path>>(path: P, format: &str, size_bytes: u64) -> Result<()> {
        let size = size_bytes.to_string();
        SystemUtils::run_tool(
            "qemu-img",
            &[
                "resize".as_ref(),
                "-f".as_ref(),
                format.as_ref(),
                path.as_ref().as_os_str(),
                size.as_ref(),
            ],
        )
        .await?;

        debug!("Resized {} to {} bytes", path.as_ref().display(), size_bytes);
        Ok(())
    }
}

/// QEMU image information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskImageInfo {
    pub format: String,
    pub virtual_size: u64,
    pub actual_size: u64,
    pub cluster_size: Option<u64>,
}

impl DiskImageInfo {
    /// Parse `qemu-img info --output=json`
    pub fn from_json(json: &str) -> Result<Self> {
        let info: serde_json::Value = serde_json::from_str(json).map_err(|e| {
            CloudImageError::image(format!("Failed to parse qemu-img output: {}", e))
        })?;

        let virtual_size = info["virtual-size"]
            .as_u64()
            .ok_or_else(|| CloudImageError::image("qemu-img output lacks virtual-size"))?;

        Ok(Self {
            format: info["format"].as_str().unwrap_or("raw").to_string(),
            virtual_size,
            actual_size: info["actual-size"].as_u64().unwrap_or(0),
            cluster_size: info["cluster-size"].as_u64(),
        })
    }
}

/// Parse a qemu-img style size (`12G`, `512M`, `2048`) into bytes
///
/// Suffixes are binary multiples, as qemu-img interprets them.
pub fn parse_size(size: &str) -> Result<u64> {
    let trimmed = size.trim();
    let invalid = || CloudImageError::validation(format!("Invalid disk size: '{}'", size));

    let (digits, shift) = match trimmed.chars().last().ok_or_else(invalid)? {
        'k' | 'K' => (&trimmed[..trimmed.len() - 1], 10),
        'm' | 'M' => (&trimmed[..trimmed.len() - 1], 20),
        'g' | 'G' => (&trimmed[..trimmed.len() - 1], 30),
        't' | 'T' => (&trimmed[..trimmed.len() - 1], 40),
        _ => (trimmed, 0),
    };

    let value: u64 = digits.parse().map_err(|_| invalid())?;
    if value == 0 {
        return Err(invalid());
    }
    value.checked_shl(shift).filter(|v| v >> shift == value).ok_or_else(invalid)
}
