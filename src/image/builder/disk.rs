// file: src/image/builder/disk.rs
// version: 2.0.0
// guid: b1b2b3b4-c5c6-7890-1234-567890bcdefg

//! Boot disk expansion

use crate::utils::qemu::{parse_size, QemuUtils};
use crate::{error::CloudImageError, Result};
use std::path::Path;
use tracing::{debug, info};

/// Grows a guest's boot disk to a fixed capacity; never shrinks it
pub struct DiskExpander {
    target_bytes: u64,
}

impl DiskExpander {
    /// `target` uses qemu-img size syntax, e.g. `12G`
    pub fn new(target: &str) -> Result<Self> {
        Ok(Self {
            target_bytes: parse_size(target)?,
        })
    }

    pub fn target_bytes(&self) -> u64 {
        self.target_bytes
    }

    /// Expand `disk` and return its resulting virtual size
    pub async fn expand(&self, disk: &Path) -> Result<u64> {
        let before = QemuUtils::get_image_info(disk).await?;

        if before.virtual_size >= self.target_bytes {
            debug!(
                "{} is already {} bytes, not resizing to {}",
                disk.display(),
                before.virtual_size,
                self.target_bytes
            );
            return Ok(before.virtual_size);
        }

        QemuUtils::resize(disk, &before.format, self.target_bytes).await?;

        let after = QemuUtils::get_image_info(disk).await?;
        if after.virtual_size < self.target_bytes {
            return Err(CloudImageError::image(format!(
                "{} is {} bytes after resize, expected at least {}",
                disk.display(),
                after.virtual_size,
                self.target_bytes
            )));
        }

        info!(
            "Expanded {} from {} to {} bytes",
            disk.display(),
            before.virtual_size,
            after.virtual_size
        );
        Ok(after.virtual_size)
    }
}
