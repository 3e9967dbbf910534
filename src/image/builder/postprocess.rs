// file: src/image/builder/postprocess.rs
// version: 2.0.0
// guid: d1d2d3d4-e5e6-7890-1234-567890defghi

//! Publishing of the provisioned image with its checksum sidecar

use crate::{error::CloudImageError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// Path of the checksum sidecar for `path`
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".sha256");
    PathBuf::from(name)
}

/// Sibling temporary name used until a file is complete
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".tmp-{}", uuid::Uuid::new_v4().simple()));
    PathBuf::from(name)
}

/// Copies the boot disk to its published path and stamps it
pub struct Finalizer;

impl Finalizer {
    /// Publish `boot_image` at `destination`; returns the destination's SHA-256
    ///
    /// Both the image and `<destination>.sha256` are written next to their
    /// final name and renamed into place, replacing earlier runs.
    pub async fn publish(boot_image: &Path, destination: &Path) -> Result<String> {
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let staged = staging_path(destination);
        if let Err(e) = fs::copy(boot_image, &staged).await {
            let _ = fs::remove_file(&staged).await;
            return Err(CloudImageError::image(format!(
                "copy of {} to {} failed: {}",
                boot_image.display(),
                destination.display(),
                e
            )));
        }
        commit(&staged, destination).await?;
        debug!("Copied {} to {}", boot_image.display(), destination.display());

        let checksum = calculate_checksum(destination).await.map_err(|e| {
            CloudImageError::image(format!(
                "checksum of {} failed: {}",
                destination.display(),
                e
            ))
        })?;

        let sidecar = sidecar_path(destination);
        let staged = staging_path(&sidecar);
        if let Err(e) = fs::write(&staged, format!("{}  {}\n", checksum, destination.display())).await {
            let _ = fs::remove_file(&staged).await;
            return Err(CloudImageError::image(format!(
                "writing checksum file {} failed: {}",
                sidecar.display(),
                e
            )));
        }
        commit(&staged, &sidecar).await?;

        info!("Published {} (sha256 {})", destination.display(), checksum);
        Ok(checksum)
    }
}

/// Rename `staged` onto `target`, discarding `staged` on failure
async fn commit(staged: &Path, target: &Path) -> Result<()> {
    if let Err(e) = fs::rename(staged, target).await {
        let _ = fs::remove_file(staged).await;
        return Err(CloudImageError::image(format!(
            "moving {} into place failed: {}",
            target.display(),
            e
        )));
    }
    Ok(())
}

/// Calculate SHA256 checksum of a file
pub async fn calculate_checksum(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).await?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];

    loop {
        let bytes_read = file.read(&mut buffer).await?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compare `path` against the digest recorded in its `.sha256` sidecar
///
/// Returns the recomputed digest on match.
pub async fn verify_checksum(path: &Path) -> Result<String> {
    let sidecar = sidecar_path(path);
    let recorded = fs::read_to_string(&sidecar).await.map_err(|e| {
        CloudImageError::validation(format!(
            "cannot read checksum file {}: {}",
            sidecar.display(),
            e
        ))
    })?;

    let expected = recorded
        .split_whitespace()
        .next()
        .filter(|digest| digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()))
        .ok_or_else(|| {
            CloudImageError::validation(format!("malformed checksum file {}", sidecar.display()))
        })?
        .to_ascii_lowercase();

    let actual = calculate_checksum(path).await?;
    if actual != expected {
        return Err(CloudImageError::validation(format!(
            "checksum mismatch for {}: recorded {}, computed {}",
            path.display(),
            expected,
            actual
        )));
    }

    Ok(actual)
}
