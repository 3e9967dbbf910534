// file: src/cli/commands.rs
// version: 2.0.0
// guid: g7h8i9j0-k1l2-3456-7890-123456ghijkl

//! Command implementations for the CLI

use crate::{
    config::{image::format_size, loader::ConfigLoader, BuilderConfig},
    error::CloudImageError,
    image::builder::{select_guest, verify_checksum, ImageBuilder},
    utils::{qemu::QemuUtils, system::SystemUtils},
    Result,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Load the configuration file, falling back to the default location
pub fn load_config(path: Option<&Path>) -> Result<BuilderConfig> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(ConfigLoader::default_path);
    ConfigLoader::new().load_config(path)
}

/// Build one entry, or every entry matching `pattern`
pub async fn build_command(
    config: BuilderConfig,
    entry: Option<String>,
    pattern: &str,
    json_output: bool,
) -> Result<()> {
    let entries = match entry {
        Some(entry) => vec![entry],
        None => config.matching_images(pattern)?,
    };

    if entries.is_empty() {
        return Err(CloudImageError::config(format!(
            "no image entries match '{}'",
            pattern
        )));
    }

    info!("Building {} image(s): {}", entries.len(), entries.join(", "));

    let builder = ImageBuilder::new(config);
    let mut published = Vec::with_capacity(entries.len());
    for entry in &entries {
        published.push(builder.build_image(entry).await?);
    }

    if json_output {
        println!("{}", serde_json::to_string_pretty(&published)?);
    } else {
        for image in &published {
            println!(
                "{}  {}  {}  {}",
                image.name,
                image.path.display(),
                image.size_human(),
                image.checksum
            );
        }
    }

    Ok(())
}

/// Row of the `list` output
#[derive(Debug, Serialize)]
pub struct ImageListing {
    pub name: String,
    pub system_label: Option<String>,
    pub guest: Option<String>,
    pub destination: Option<PathBuf>,
    pub problem: Option<String>,
}

/// Describe every configured image entry
pub fn image_listings(config: &BuilderConfig) -> Vec<ImageListing> {
    config
        .system_imaging
        .images
        .iter()
        .map(|(name, spec)| {
            let guest = spec
                .system_label()
                .and_then(|label| select_guest(&config.qemu.guests, label));
            let problem = spec
                .validate()
                .err()
                .map(|e| e.to_string())
                .or_else(|| guest.as_ref().err().map(|e| e.to_string()));

            ImageListing {
                name: name.clone(),
                system_label: spec.system_label.clone(),
                guest: guest.ok().map(|(guest, _)| guest.to_string()),
                destination: spec.destination.as_ref().and_then(|d| d.path.clone()),
                problem,
            }
        })
        .collect()
}

/// List configured image entries
pub async fn list_command(config: &BuilderConfig, json_output: bool) -> Result<()> {
    let listings = image_listings(config);

    if json_output {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }

    if listings.is_empty() {
        info!("No image entries configured");
        return Ok(());
    }

    println!(
        "{:<28} {:<24} {:<16} {}",
        "Entry", "System label", "Guest", "Destination"
    );
    println!("{:-<96}", "");

    for listing in &listings {
        println!(
            "{:<28} {:<24} {:<16} {}",
            listing.name,
            listing.system_label.as_deref().unwrap_or("-"),
            listing.guest.as_deref().unwrap_or("-"),
            listing
                .destination
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string())
        );
        if let Some(problem) = &listing.problem {
            warn!("{}: {}", listing.name, problem);
        }
    }

    info!("Found {} image entries", listings.len());
    Ok(())
}

/// Validate image integrity
pub async fn validate_command(image_path: &Path) -> Result<()> {
    info!("Validating image: {}", image_path.display());

    let checksum = verify_checksum(image_path).await?;
    info!("Checksum matches: {}", checksum);

    match QemuUtils::get_image_info(image_path).await {
        Ok(info) => info!(
            "Format {}, virtual size {}",
            info.format,
            format_size(info.virtual_size)
        ),
        Err(e) => warn!("Could not inspect image: {}", e),
    }

    info!("Image validation successful");
    Ok(())
}

/// Check system prerequisites
pub async fn check_prerequisites_command() -> Result<()> {
    info!("Checking system prerequisites for cloud image builds");

    let missing = SystemUtils::check_prerequisites();

    if missing.is_empty() {
        info!("✓ All required system commands are available");
        return Ok(());
    }

    error!("✗ Missing required commands: {}", missing.join(", "));
    info!("Install missing packages:");
    for cmd in &missing {
        match cmd.as_str() {
            "qemu-system-x86_64" => info!("  sudo apt install qemu-system-x86"),
            "qemu-img" => info!("  sudo apt install qemu-utils"),
            _ => info!("  sudo apt install genisoimage"),
        }
    }

    Err(CloudImageError::validation(format!(
        "Missing {} required dependencies",
        missing.len()
    )))
}
