// file: src/image/builder/provision.rs
// version: 1.0.0
// guid: 9d3f6b20-e815-4c7a-8f42-0a6b5e1c9d77

//! Two-phase guest provisioning
//!
//! The guest first boots attached with the seed volume and `-no-reboot` so
//! its first-boot initializer can settle identity and network, then halts.
//! A second, daemonized boot brings up SSH for the install script, whose last
//! command powers the guest off. The boot disk is then the cloud image.

use crate::config::ProvisioningSettings;
use crate::network::RemoteExecutor;
use crate::utils::GuestControl;
use crate::{error::CloudImageError, Result};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Where a provisioning run currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionState {
    Stopped,
    Initializing,
    AwaitingFirstHalt,
    InstallBoot,
    AwaitingReady,
    Installing,
    AwaitingFinalHalt,
    Provisioned,
    Aborted,
}

impl fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Initializing => "initializing",
            Self::AwaitingFirstHalt => "awaiting first halt",
            Self::InstallBoot => "install boot",
            Self::AwaitingReady => "awaiting ready",
            Self::Installing => "installing",
            Self::AwaitingFinalHalt => "awaiting final halt",
            Self::Provisioned => "provisioned",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// A fatal condition and whether the guest must be force-stopped before reporting it
struct Abort {
    error: CloudImageError,
    kill_guest: bool,
}

impl Abort {
    fn keep_guest(error: CloudImageError) -> Self {
        Self {
            error,
            kill_guest: false,
        }
    }
}

impl From<CloudImageError> for Abort {
    fn from(error: CloudImageError) -> Self {
        Self::keep_guest(error)
    }
}

/// Drives one guest from nuage image to provisioned cloud image
pub struct Provisioner<'a> {
    settings: &'a ProvisioningSettings,
    state: ProvisionState,
}

impl<'a> Provisioner<'a> {
    pub fn new(settings: &'a ProvisioningSettings) -> Self {
        Self {
            settings,
            state: ProvisionState::Stopped,
        }
    }

    pub fn state(&self) -> ProvisionState {
        self.state
    }

    /// Run every phase; on failure the guest is handled by [`Self::abort`]
    pub async fn run(
        &mut self,
        guest: &mut dyn GuestControl,
        transport: &mut dyn RemoteExecutor,
        seed: &Path,
    ) -> Result<()> {
        match self.drive(guest, transport, seed).await {
            Ok(()) => Ok(()),
            Err(abort) => Err(self.abort(guest, abort).await),
        }
    }

    fn transition(&mut self, next: ProvisionState) {
        debug!("Provisioning: {} -> {}", self.state, next);
        self.state = next;
    }

    async fn drive(
        &mut self,
        guest: &mut dyn GuestControl,
        transport: &mut dyn RemoteExecutor,
        seed: &Path,
    ) -> std::result::Result<(), Abort> {
        let timeouts = self.settings.timeouts;
        let seed_arg = seed.display().to_string();

        self.transition(ProvisionState::Stopped);
        guest.kill().await?;

        self.transition(ProvisionState::Initializing);
        info!("Booting {} for first-boot initialization", guest.name());
        guest
            .start(
                false,
                &["-cdrom".to_string(), seed_arg.clone(), "-no-reboot".to_string()],
            )
            .await?;

        self.transition(ProvisionState::AwaitingFirstHalt);
        if !guest.wait_for_termination(timeouts.first_halt()).await? {
            return Err(self.timed_out("first halt", timeouts.first_halt_secs));
        }

        self.transition(ProvisionState::InstallBoot);
        info!("Booting {} for package installation", guest.name());
        guest
            .start(true, &["-cdrom".to_string(), seed_arg])
            .await?;

        self.transition(ProvisionState::AwaitingReady);
        if !guest.is_up(timeouts.ready()).await? {
            return Err(self.timed_out("readiness", timeouts.ready_secs));
        }

        self.transition(ProvisionState::Installing);
        for (step, command) in self.settings.install_commands.iter().enumerate() {
            info!(
                "Install step {}/{}: {}",
                step + 1,
                self.settings.install_commands.len(),
                command
            );
            if let Err(e) = transport.run(command).await {
                let error = match e {
                    remote @ CloudImageError::RemoteCommandError { .. } => remote,
                    other => CloudImageError::RemoteCommandError {
                        command: command.clone(),
                        reason: other.to_string(),
                    },
                };
                return Err(Abort {
                    error,
                    kill_guest: true,
                });
            }
        }

        self.transition(ProvisionState::AwaitingFinalHalt);
        if !guest.wait_for_termination(timeouts.final_halt()).await? {
            return Err(self.timed_out("final halt", timeouts.final_halt_secs));
        }

        self.transition(ProvisionState::Provisioned);
        info!("Guest {} is provisioned", guest.name());
        Ok(())
    }

    fn timed_out(&self, phase: &str, seconds: u64) -> Abort {
        Abort {
            error: CloudImageError::timeout(phase, seconds),
            kill_guest: self.settings.kill_on_timeout,
        }
    }

    /// The single exit path for every fatal condition
    async fn abort(&mut self, guest: &mut dyn GuestControl, abort: Abort) -> CloudImageError {
        let failed_in = self.state;
        self.transition(ProvisionState::Aborted);

        if abort.kill_guest {
            warn!("Force-stopping {} after failure in {}", guest.name(), failed_in);
            if let Err(e) = guest.kill().await {
                warn!("Failed to stop {}: {}", guest.name(), e);
            }
        } else {
            debug!("Leaving {} as is after failure in {}", guest.name(), failed_in);
        }

        abort.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type Events = Arc<Mutex<Vec<String>>>;

    struct FakeGuest {
        events: Events,
        first_halt: bool,
        first_boot_exit: Option<i32>,
        comes_up: bool,
        final_halt: bool,
        halts_seen: usize,
        dir: PathBuf,
    }

    impl FakeGuest {
        fn new(events: &Events) -> Self {
            Self {
                events: events.clone(),
                first_halt: true,
                first_boot_exit: None,
                comes_up: true,
                final_halt: true,
                halts_seen: 0,
                dir: PathBuf::from("/tmp/guests/fake"),
            }
        }

        fn log(&self, event: impl Into<String>) {
            self.events.lock().unwrap().push(event.into());
        }
    }

    #[async_trait]
    impl GuestControl for FakeGuest {
        fn name(&self) -> &str {
            "fake"
        }

        fn guest_path(&self) -> &Path {
            &self.dir
        }

        fn boot_image(&self) -> PathBuf {
            self.dir.join("boot.img")
        }

        async fn kill(&mut self) -> Result<()> {
            self.log("kill");
            Ok(())
        }

        async fn initialize(&mut self, _image: &Path) -> Result<()> {
            self.log("initialize");
            Ok(())
        }

        async fn start(&mut self, daemonize: bool, extra_args: &[String]) -> Result<()> {
            self.log(format!(
                "start daemonize={} {}",
                daemonize,
                extra_args.join(" ")
            ));
            Ok(())
        }

        async fn wait_for_termination(&mut self, timeout: Duration) -> Result<bool> {
            self.log(format!("wait_for_termination {}", timeout.as_secs()));
            self.halts_seen += 1;
            if let (1, Some(code)) = (self.halts_seen, self.first_boot_exit) {
                return Err(CloudImageError::ProcessError {
                    command: "qemu-system-x86_64 (guest fake)".to_string(),
                    exit_code: Some(code),
                    stderr: "qemu: could not open disk".to_string(),
                });
            }
            Ok(if self.halts_seen == 1 {
                self.first_halt
            } else {
                self.final_halt
            })
        }

        async fn is_up(&mut self, timeout: Duration) -> Result<bool> {
            self.log(format!("is_up {}", timeout.as_secs()));
            Ok(self.comes_up)
        }
    }

    struct FakeTransport {
        events: Events,
        fail_at: Option<usize>,
        issued: usize,
    }

    #[async_trait]
    impl RemoteExecutor for FakeTransport {
        async fn run(&mut self, command: &str) -> Result<String> {
            self.events.lock().unwrap().push(format!("run {}", command));
            let step = self.issued;
            self.issued += 1;
            if self.fail_at == Some(step) {
                return Err(CloudImageError::SshError("connection reset".to_string()));
            }
            Ok(String::new())
        }
    }

    fn fixture(fail_at: Option<usize>) -> (Events, FakeGuest, FakeTransport) {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let guest = FakeGuest::new(&events);
        let transport = FakeTransport {
            events: events.clone(),
            fail_at,
            issued: 0,
        };
        (events, guest, transport)
    }

    fn count(events: &Events, prefix: &str) -> usize {
        events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    #[tokio::test]
    async fn test_full_sequence() {
        let settings = ProvisioningSettings::default();
        let (events, mut guest, mut transport) = fixture(None);
        let mut provisioner = Provisioner::new(&settings);

        provisioner
            .run(&mut guest, &mut transport, Path::new("/tmp/guests/fake/seed.img"))
            .await
            .unwrap();

        assert_eq!(provisioner.state(), ProvisionState::Provisioned);
        let expected = vec![
            "kill".to_string(),
            "start daemonize=false -cdrom /tmp/guests/fake/seed.img -no-reboot".to_string(),
            "wait_for_termination 60".to_string(),
            "start daemonize=true -cdrom /tmp/guests/fake/seed.img".to_string(),
            "is_up 60".to_string(),
            format!("run {}", settings.install_commands[0]),
            format!("run {}", settings.install_commands[1]),
            format!("run {}", settings.install_commands[2]),
            "wait_for_termination 60".to_string(),
        ];
        assert_eq!(*events.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_install_failure_kills_once_and_stops_script() {
        let settings = ProvisioningSettings::default();
        let (events, mut guest, mut transport) = fixture(Some(1));
        let mut provisioner = Provisioner::new(&settings);

        let err = provisioner
            .run(&mut guest, &mut transport, Path::new("seed.img"))
            .await
            .unwrap_err();

        assert!(matches!(err, CloudImageError::RemoteCommandError { .. }));
        assert!(err.to_string().contains("sysrc cloudinit_enable=YES"));
        assert_eq!(provisioner.state(), ProvisionState::Aborted);

        let log = events.lock().unwrap().clone();
        assert_eq!(count(&events, "run "), 2);
        assert_eq!(log.last().unwrap(), "kill");
        let failing = log.iter().position(|e| e.contains("sysrc")).unwrap();
        assert_eq!(log[failing + 1..], ["kill".to_string()]);
    }

    #[tokio::test]
    async fn test_readiness_timeout_issues_no_commands() {
        let settings = ProvisioningSettings::default();
        let (events, mut guest, mut transport) = fixture(None);
        guest.comes_up = false;

        let err = Provisioner::new(&settings)
            .run(&mut guest, &mut transport, Path::new("seed.img"))
            .await
            .unwrap_err();

        assert!(matches!(err, CloudImageError::GuestTimeout { .. }));
        assert_eq!(err.to_string(), "Guest readiness timed out after 60 seconds");
        assert_eq!(count(&events, "run "), 0);
        // left running for inspection
        assert_eq!(count(&events, "kill"), 1);
    }

    #[tokio::test]
    async fn test_first_halt_timeout_respects_kill_on_timeout() {
        let mut settings = ProvisioningSettings::default();
        settings.timeouts.first_halt_secs = 5;

        let (events, mut guest, mut transport) = fixture(None);
        guest.first_halt = false;
        let err = Provisioner::new(&settings)
            .run(&mut guest, &mut transport, Path::new("seed.img"))
            .await
            .unwrap_err();
        assert_eq!(err.errno(), libc::ETIMEDOUT);
        assert!(err.to_string().contains("first halt timed out after 5 seconds"));
        assert_eq!(count(&events, "kill"), 1);
        assert_eq!(count(&events, "start"), 1);

        settings.kill_on_timeout = true;
        let (events, mut guest, mut transport) = fixture(None);
        guest.first_halt = false;
        Provisioner::new(&settings)
            .run(&mut guest, &mut transport, Path::new("seed.img"))
            .await
            .unwrap_err();
        assert_eq!(count(&events, "kill"), 2);
        assert_eq!(events.lock().unwrap().last().unwrap(), "kill");
    }

    #[tokio::test]
    async fn test_failed_first_boot_aborts_before_install_boot() {
        let settings = ProvisioningSettings::default();
        let (events, mut guest, mut transport) = fixture(None);
        guest.first_boot_exit = Some(1);
        let mut provisioner = Provisioner::new(&settings);

        let err = provisioner
            .run(&mut guest, &mut transport, Path::new("seed.img"))
            .await
            .unwrap_err();

        assert!(matches!(err, CloudImageError::ProcessError { .. }));
        assert_eq!(err.errno(), 1);
        assert_eq!(provisioner.state(), ProvisionState::Aborted);
        assert_eq!(count(&events, "start"), 1);
        assert_eq!(count(&events, "is_up"), 0);
        assert_eq!(count(&events, "run "), 0);
    }

    #[tokio::test]
    async fn test_final_halt_timeout_after_install() {
        let settings = ProvisioningSettings::default();
        let (events, mut guest, mut transport) = fixture(None);
        guest.final_halt = false;

        let err = Provisioner::new(&settings)
            .run(&mut guest, &mut transport, Path::new("seed.img"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("final halt"));
        assert_eq!(count(&events, "run "), 3);
    }

    #[tokio::test]
    async fn test_custom_install_script() {
        let settings = ProvisioningSettings {
            install_commands: vec!["true".to_string()],
            ..Default::default()
        };
        let (events, mut guest, mut transport) = fixture(None);

        Provisioner::new(&settings)
            .run(&mut guest, &mut transport, Path::new("seed.img"))
            .await
            .unwrap();
        assert_eq!(count(&events, "run "), 1);
    }
}
