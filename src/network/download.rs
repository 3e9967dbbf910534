// file: src/network/download.rs
// version: 2.0.0
// guid: u1v2w3x4-y5z6-7890-1234-567890uvwxyz

//! Nuage image download and decompression

use crate::{error::CloudImageError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Where base images come from
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Fetch `url` into `dest`; `dest` only appears once complete
    async fn download(&self, url: &str, dest: &Path) -> Result<()>;

    /// Decompress `src` into `dest`, choosing the codec from the extension of `src`
    async fn decompress(&self, src: &Path, dest: &Path) -> Result<()>;
}

/// Sibling path used while a file is being written
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

/// Compression formats understood by [`NetworkDownloader::decompress`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Zstd,
    Xz,
    Bzip2,
}

impl Compression {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "gz" | "gzip" => Some(Self::Gzip),
            "zst" | "zstd" => Some(Self::Zstd),
            "xz" => Some(Self::Xz),
            "bz2" => Some(Self::Bzip2),
            _ => None,
        }
    }
}

/// HTTP downloader with progress tracking
pub struct NetworkDownloader {
    client: reqwest::Client,
}

impl NetworkDownloader {
    /// Create a new network downloader
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("cloudimage-builder/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Download file with progress bar
    pub async fn download_with_progress(&self, url: &str, dest: &Path) -> Result<()> {
        info!("Downloading: {}", url);

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(CloudImageError::NetworkError(format!(
                "Download of {} failed with status: {}",
                url,
                response.status()
            )));
        }

        let total_size = response.content_length().unwrap_or(0);

        let pb = ProgressBar::new(total_size);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .map_err(|e| CloudImageError::NetworkError(format!("Invalid progress template: {}", e)))?
                .progress_chars("#>-"),
        );

        let mut file = File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            pb.set_position(downloaded);
        }

        file.flush().await?;
        pb.finish_with_message("Download completed");

        debug!("Received {} bytes from {}", downloaded, url);
        Ok(())
    }
}

fn decode_in_place(codec: Compression, src: &Path, dest: &Path) -> Result<()> {
    let input = std::io::BufReader::new(std::fs::File::open(src)?);
    let mut output = std::io::BufWriter::new(std::fs::File::create(dest)?);

    match codec {
        Compression::Gzip => {
            let mut decoder = flate2::read::MultiGzDecoder::new(input);
            std::io::copy(&mut decoder, &mut output)?;
        }
        Compression::Zstd => zstd::stream::copy_decode(input, &mut output)?,
        Compression::Xz => {
            let mut decoder = xz2::read::XzDecoder::new_multi_decoder(input);
            std::io::copy(&mut decoder, &mut output)?;
        }
        Compression::Bzip2 => {
            let mut decoder = bzip2::read::MultiBzDecoder::new(input);
            std::io::copy(&mut decoder, &mut output)?;
        }
    }

    std::io::Write::flush(&mut output)?;
    Ok(())
}

#[async_trait]
impl ArtifactSource for NetworkDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let partial = partial_path(dest);
        if let Err(e) = self.download_with_progress(url, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        tokio::fs::rename(&partial, dest).await?;
        info!("Downloaded to: {}", dest.display());
        Ok(())
    }

    async fn decompress(&self, src: &Path, dest: &Path) -> Result<()> {
        let codec = Compression::from_path(src).ok_or_else(|| {
            CloudImageError::image(format!(
                "Unsupported compression format: {}",
                src.display()
            ))
        })?;

        info!("Decompressing {} ({:?})", src.display(), codec);
        let partial = partial_path(dest);

        let (input, out) = (src.to_path_buf(), partial.clone());
        let result = tokio::task::spawn_blocking(move || decode_in_place(codec, &input, &out))
            .await
            .map_err(|e| CloudImageError::image(format!("Decompression task failed: {}", e)))?;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        tokio::fs::rename(&partial, dest).await?;
        info!("Decompressed to: {}", dest.display());
        Ok(())
    }
}

impl Default for NetworkDownloader {
    fn default() -> Self {
        Self::new()
    }
}
