// file: src/image/builder/seed.rs
// version: 1.0.0
// guid: 6a0e4c8b-3d12-47f5-9e6b-b2f81c5d7a03

//! Cloud-init seed volume (NoCloud `cidata` ISO)

use crate::config::SeedPayload;
use crate::utils::system::{SystemUtils, ISO_TOOLS};
use crate::{error::CloudImageError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Volume label cloud-init's NoCloud datasource looks for
pub const SEED_VOLUME_LABEL: &str = "cidata";
pub const METADATA_FILE: &str = "meta-data";
pub const USERDATA_FILE: &str = "user-data";
pub const SEED_IMAGE: &str = "seed.img";

const SECTOR_SIZE: usize = 2048;
const PVD_SECTOR: usize = 16;

/// Builds `seed.img` inside a guest directory
pub struct SeedVolumeBuilder {
    guest_dir: PathBuf,
}

impl SeedVolumeBuilder {
    pub fn new(guest_dir: impl Into<PathBuf>) -> Self {
        Self {
            guest_dir: guest_dir.into(),
        }
    }

    pub fn seed_path(&self) -> PathBuf {
        self.guest_dir.join(SEED_IMAGE)
    }

    /// Stage the payload next to the guest disk and author a fresh seed volume
    pub async fn build(&self, payload: &SeedPayload) -> Result<PathBuf> {
        fs::create_dir_all(&self.guest_dir).await?;

        let metadata = self.guest_dir.join(METADATA_FILE);
        let userdata = self.guest_dir.join(USERDATA_FILE);
        copy_payload(&payload.metadata_path, &metadata).await?;
        copy_payload(&payload.userdata_path, &userdata).await?;

        let seed = self.seed_path();
        if seed.exists() {
            fs::remove_file(&seed).await?;
        }

        let tool = SystemUtils::find_tool(&ISO_TOOLS).ok_or_else(|| {
            CloudImageError::image(format!(
                "No ISO authoring tool found (tried {})",
                ISO_TOOLS.join(", ")
            ))
        })?;
        debug!("Authoring seed volume with {}", tool.display());

        SystemUtils::run_tool(
            &tool.to_string_lossy(),
            &[
                "-o".as_ref(),
                seed.as_os_str(),
                "-V".as_ref(),
                SEED_VOLUME_LABEL.as_ref(),
                "-J".as_ref(),
                "-R".as_ref(),
                userdata.as_os_str(),
                metadata.as_os_str(),
            ],
        )
        .await?;

        verify_seed(&seed).await?;
        info!("Seed volume ready: {}", seed.display());
        Ok(seed)
    }
}

async fn copy_payload(src: &Path, dest: &Path) -> Result<()> {
    fs::copy(src, dest).await.map_err(|e| {
        CloudImageError::image(format!(
            "Failed to stage seed payload {}: {}",
            src.display(),
            e
        ))
    })?;
    Ok(())
}

/// Check that the volume at `path` is labelled `cidata` and holds exactly the payload
pub async fn verify_seed(path: &Path) -> Result<()> {
    let bytes = fs::read(path).await?;
    let summary = IsoSummary::parse(&bytes)?;

    if summary.volume_id != SEED_VOLUME_LABEL {
        return Err(CloudImageError::image(format!(
            "Seed volume {} is labelled '{}', expected '{}'",
            path.display(),
            summary.volume_id,
            SEED_VOLUME_LABEL
        )));
    }

    let mut names = summary.root_entries.clone();
    names.sort();
    if names != [METADATA_FILE, USERDATA_FILE] {
        return Err(CloudImageError::image(format!(
            "Seed volume {} contains {:?}, expected [{}, {}]",
            path.display(),
            names,
            METADATA_FILE,
            USERDATA_FILE
        )));
    }

    Ok(())
}

/// Label and root listing of an ISO-9660 volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoSummary {
    pub volume_id: String,
    /// Root directory file names, Rock Ridge names where present
    pub root_entries: Vec<String>,
}

impl IsoSummary {
    pub fn parse(image: &[u8]) -> Result<Self> {
        let malformed = |what: &str| CloudImageError::image(format!("Malformed ISO-9660 volume: {}", what));

        let pvd = image
            .get(PVD_SECTOR * SECTOR_SIZE..(PVD_SECTOR + 1) * SECTOR_SIZE)
            .ok_or_else(|| malformed("too short for a volume descriptor"))?;
        if pvd[0] != 1 || &pvd[1..6] != b"CD001" {
            return Err(malformed("missing primary volume descriptor"));
        }

        let volume_id = String::from_utf8_lossy(&pvd[40..72]).trim_end().to_string();

        let root = &pvd[156..190];
        let extent = le_u32(&root[2..6]) as usize;
        let length = le_u32(&root[10..14]) as usize;
        let dir = image
            .get(extent * SECTOR_SIZE..extent * SECTOR_SIZE + length)
            .ok_or_else(|| malformed("root directory out of bounds"))?;

        let mut root_entries = Vec::new();
        let mut offset = 0;
        while offset < dir.len() {
            let record_len = dir[offset] as usize;
            if record_len == 0 {
                // records never straddle a sector; skip the padding
                offset = (offset / SECTOR_SIZE + 1) * SECTOR_SIZE;
                continue;
            }
            let record = dir
                .get(offset..offset + record_len)
                .ok_or_else(|| malformed("truncated directory record"))?;
            if let Some(name) = record_name(record) {
                root_entries.push(name);
            }
            offset += record_len;
        }

        Ok(Self {
            volume_id,
            root_entries,
        })
    }
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Name of a directory record, `None` for `.` and `..`
fn record_name(record: &[u8]) -> Option<String> {
    let name_len = *record.get(32)? as usize;
    let raw = record.get(33..33 + name_len)?;
    if raw == [0] || raw == [1] {
        return None;
    }

    let su_start = 33 + name_len + usize::from(name_len % 2 == 0);
    if let Some(name) = record.get(su_start..).and_then(rock_ridge_name) {
        return Some(name);
    }

    let plain = String::from_utf8_lossy(raw);
    let plain = plain.split(';').next().unwrap_or_default();
    Some(plain.trim_end_matches('.').to_ascii_lowercase())
}

/// Concatenated `NM` entries of a SUSP system use area
fn rock_ridge_name(mut area: &[u8]) -> Option<String> {
    let mut name = Vec::new();
    while area.len() >= 4 {
        let len = area[2] as usize;
        if len < 4 || len > area.len() {
            break;
        }
        if &area[..2] == b"NM" && len >= 5 {
            name.extend_from_slice(&area[5..len]);
        }
        area = &area[len..];
    }

    if name.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&name).into_owned())
    }
}
