// file: src/image/builder/mod.rs
// version: 2.0.0
// guid: e1e2e3e4-f5f6-7890-1234-567890efghij

//! Cloud image build pipeline
//!
//! fetch -> select -> seed -> expand -> provision -> finalize, strictly in
//! that order. The first failing stage ends the run.

use crate::config::{BuilderConfig, GuestProfile, PublishedImage, TransportProfile};
use crate::error::{CloudImageError, Stage};
use crate::logging::with_async_operation_span;
use crate::network::{ArtifactSource, NetworkDownloader, RemoteExecutor, SshTransport};
use crate::utils::{GuestControl, GuestLease, QemuGuest};
use crate::Result;
use std::future::Future;
use tracing::{error, info};

pub mod disk;
pub mod fetch;
pub mod postprocess;
pub mod provision;
pub mod seed;
pub mod selector;

pub use disk::DiskExpander;
pub use fetch::ArtifactFetcher;
pub use postprocess::{calculate_checksum, sidecar_path, verify_checksum, Finalizer};
pub use provision::{ProvisionState, Provisioner};
pub use seed::{IsoSummary, SeedVolumeBuilder};
pub use selector::{select_guest, validate_profiles};

/// Run one pipeline stage inside its operation span, tagging failures with the stage
async fn in_stage<T, Fut>(stage: Stage, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    with_async_operation_span(stage.as_str(), || fut)
        .await
        .map_err(|e| e.in_stage(stage))
}

/// Builds cloud images described by a [`BuilderConfig`]
pub struct ImageBuilder {
    config: BuilderConfig,
    source: Box<dyn ArtifactSource>,
}

impl ImageBuilder {
    /// Create a builder fetching nuage images over HTTP
    pub fn new(config: BuilderConfig) -> Self {
        Self::with_source(config, Box::new(NetworkDownloader::new()))
    }

    pub fn with_source(config: BuilderConfig, source: Box<dyn ArtifactSource>) -> Self {
        Self { config, source }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Build the image entry `entry` with a QEMU guest and SSH transport
    pub async fn build_image(&self, entry: &str) -> Result<PublishedImage> {
        self.build_image_with(
            entry,
            |name, profile| Box::new(QemuGuest::new(name, profile.clone())),
            |transport, profile| {
                Box::new(SshTransport::new(
                    transport.clone(),
                    profile.tcp_forward.host,
                ))
            },
        )
        .await
    }

    /// Build `entry` with caller-supplied guest and transport constructors
    pub async fn build_image_with<G, T>(
        &self,
        entry: &str,
        make_guest: G,
        make_transport: T,
    ) -> Result<PublishedImage>
    where
        G: FnOnce(&str, &GuestProfile) -> Box<dyn GuestControl>,
        T: FnOnce(&TransportProfile, &GuestProfile) -> Box<dyn RemoteExecutor>,
    {
        let spec = self.config.image(entry)?;
        // Reject incomplete entries before anything is downloaded or booted
        spec.validate()?;
        let settings = &self.config.provisioning;
        info!("Building cloud image {}", entry);

        let base_image = in_stage(Stage::Fetch, async {
            ArtifactFetcher::new(self.source.as_ref())
                .fetch(spec.source()?)
                .await
        })
        .await?;

        let (guest_name, profile, transport_profile, lease) = in_stage(Stage::Select, async {
            let (name, profile) = select_guest(&self.config.qemu.guests, spec.system_label()?)?;
            let transport = self.config.transport()?;
            let lease = GuestLease::acquire(&profile.path)?;
            Ok::<_, CloudImageError>((name, profile, transport, lease))
        })
        .await?;

        let mut guest = make_guest(guest_name, profile);

        let seed = in_stage(Stage::Seed, async {
            let payload = spec.source()?.payload()?;
            guest.kill().await?;
            guest.initialize(&base_image).await?;
            SeedVolumeBuilder::new(guest.guest_path())
                .build(&payload)
                .await
        })
        .await?;

        let virtual_size = in_stage(Stage::Expand, async {
            DiskExpander::new(&settings.disk_size)?
                .expand(&guest.boot_image())
                .await
        })
        .await?;

        in_stage(Stage::Provision, async {
            let mut transport = make_transport(transport_profile, profile);
            Provisioner::new(settings)
                .run(guest.as_mut(), transport.as_mut(), &seed)
                .await
        })
        .await?;

        let published = in_stage(Stage::Finalize, async {
            let destination = spec.destination()?.path()?;
            let checksum = Finalizer::publish(&guest.boot_image(), destination).await?;
            let size_bytes = tokio::fs::metadata(destination).await?.len();

            Ok::<_, CloudImageError>(PublishedImage {
                name: entry.to_string(),
                guest: guest_name.to_string(),
                path: destination.to_path_buf(),
                checksum,
                size_bytes,
                virtual_size,
                created_at: chrono::Utc::now(),
            })
        })
        .await?;

        drop(lease);
        info!(
            "Image {} published at {} ({})",
            entry,
            published.path.display(),
            published.size_human()
        );
        Ok(published)
    }

    /// Build `entry` and return a process exit code
    ///
    /// `0` on success, otherwise the POSIX-style code of the first fatal error.
    pub async fn run(&self, entry: &str) -> i32 {
        match self.build_image(entry).await {
            Ok(_) => 0,
            Err(e) => {
                error!("Build of {} failed: {}", entry, e);
                e.errno()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DestinationSpec, ImageSpec, SourceSpec};
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;

    struct NoNetwork;

    #[async_trait]
    impl ArtifactSource for NoNetwork {
        async fn download(&self, url: &str, _dest: &Path) -> Result<()> {
            Err(CloudImageError::NetworkError(format!("offline: {}", url)))
        }

        async fn decompress(&self, src: &Path, _dest: &Path) -> Result<()> {
            Err(CloudImageError::image(format!("cannot decompress {}", src.display())))
        }
    }

    fn config_in(dir: &Path, guest_label: Option<&str>) -> BuilderConfig {
        let mut config = BuilderConfig::default();
        config.system_imaging.images.insert(
            "freebsd-14".to_string(),
            ImageSpec {
                system_label: Some("freebsd-14".to_string()),
                source: Some(SourceSpec {
                    url: Some("https://download.example.org/freebsd-14.qcow2".to_string()),
                    path: Some(dir.join("cache").join("freebsd-14.qcow2")),
                    decompressed_path: None,
                    metadata_path: Some(dir.join("meta-data")),
                    userdata_path: Some(dir.join("user-data")),
                }),
                destination: Some(DestinationSpec {
                    path: Some(dir.join("cloud").join("freebsd-14.qcow2")),
                }),
            },
        );
        config
            .qemu
            .guests
            .push("bsd", GuestProfile::new(guest_label, dir.join("guests").join("bsd")));
        config
    }

    #[tokio::test]
    async fn test_unknown_entry_is_einval() {
        let temp_dir = TempDir::new().unwrap();
        let builder = ImageBuilder::with_source(
            config_in(temp_dir.path(), Some("freebsd-14")),
            Box::new(NoNetwork),
        );
        assert_eq!(builder.run("netbsd-10").await, libc::EINVAL);
    }

    #[tokio::test]
    async fn test_incomplete_entry_fails_before_fetch() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config_in(temp_dir.path(), Some("freebsd-14"));
        config
            .system_imaging
            .images
            .get_mut("freebsd-14")
            .unwrap()
            .destination = None;
        let builder = ImageBuilder::with_source(config, Box::new(NoNetwork));

        let err = builder.build_image("freebsd-14").await.unwrap_err();
        assert_eq!(err.stage(), None);
        assert!(err.is_config());
        assert!(err.to_string().contains(".destination"));
        assert!(!temp_dir.path().join("guests").exists());
        assert_eq!(builder.run("freebsd-14").await, libc::EINVAL);
    }

    #[tokio::test]
    async fn test_fetch_failure_names_stage() {
        let temp_dir = TempDir::new().unwrap();
        let builder = ImageBuilder::with_source(
            config_in(temp_dir.path(), Some("freebsd-14")),
            Box::new(NoNetwork),
        );

        let err = builder.build_image("freebsd-14").await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Fetch));
        assert!(err.to_string().starts_with("fetch stage failed"));
        assert_eq!(builder.run("freebsd-14").await, 1);
    }

    #[tokio::test]
    async fn test_unlabeled_guest_fails_selection() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_in(temp_dir.path(), None);
        let cached = temp_dir.path().join("cache").join("freebsd-14.qcow2");
        std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
        std::fs::write(&cached, b"nuage").unwrap();

        let builder = ImageBuilder::with_source(config, Box::new(NoNetwork));
        let err = builder.build_image("freebsd-14").await.unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Select));
        assert_eq!(err.errno(), libc::EINVAL);
    }

    #[tokio::test]
    async fn test_missing_transport_fails_before_any_boot() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_in(temp_dir.path(), Some("freebsd-14"));
        let cached = temp_dir.path().join("cache").join("freebsd-14.qcow2");
        std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
        std::fs::write(&cached, b"nuage").unwrap();

        let builder = ImageBuilder::with_source(config, Box::new(NoNetwork));
        let err = builder.build_image("freebsd-14").await.unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Select));
        assert!(err.to_string().contains("default_freebsd"));
    }
}
