// file: src/image/builder/fetch.rs
// version: 1.0.0
// guid: 8c41d2e6-7b3a-4f59-a0c8-1e6d93b7f2a4

//! Local cache of the nuage base image

use crate::config::SourceSpec;
use crate::network::ArtifactSource;
use crate::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Ensures the base image is available locally, downloading it at most once
pub struct ArtifactFetcher<'a> {
    source: &'a dyn ArtifactSource,
}

impl<'a> ArtifactFetcher<'a> {
    pub fn new(source: &'a dyn ArtifactSource) -> Self {
        Self { source }
    }

    /// Populate the cache for `spec` and return the path guests should boot from
    ///
    /// When a decompressed path is configured, that is the returned path.
    pub async fn fetch(&self, spec: &SourceSpec) -> Result<PathBuf> {
        let path = spec.path()?;

        if path.exists() {
            debug!("Using cached image: {}", path.display());
        } else {
            let url = spec.url()?;
            ensure_parent(path).await?;
            info!("Fetching {} -> {}", url, path.display());
            self.source.download(url, path).await?;
        }

        let Some(decompressed) = spec.decompressed_path.as_deref() else {
            return Ok(path.to_path_buf());
        };

        if decompressed.exists() {
            debug!("Using cached decompressed image: {}", decompressed.display());
        } else {
            ensure_parent(decompressed).await?;
            self.source.decompress(path, decompressed).await?;
        }

        Ok(decompressed.to_path_buf())
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}
