// file: src/utils/vm.rs
// version: 2.0.0
// guid: y5z6a7b8-c9d0-1234-5678-901234yzabcd

//! Guest power control
//!
//! [`GuestControl`] is the surface the provisioning pipeline drives; the
//! [`QemuGuest`] implementation runs `qemu-system-*` against a per-guest
//! working directory holding the boot disk, pidfile, monitor socket and
//! serial log.

use super::lease::LEASE_FILE;
use super::qemu::QemuUtils;
use super::system::SystemUtils;
use crate::{config::GuestProfile, error::CloudImageError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Interval between liveness and readiness probes
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

const PID_FILE: &str = "guest.pid";
const MONITOR_SOCKET: &str = "monitor.sock";
const SERIAL_LOG: &str = "serial.log";
const STDERR_LOG: &str = "qemu.stderr";

/// Power control and readiness observation for one virtual machine
#[async_trait]
pub trait GuestControl: Send {
    fn name(&self) -> &str;

    /// Working directory of the guest
    fn guest_path(&self) -> &Path;

    /// Primary boot disk
    fn boot_image(&self) -> PathBuf;

    /// Force-stop the guest; succeeds when nothing is running
    async fn kill(&mut self) -> Result<()>;

    /// Reset the working directory and install `image` as the boot disk
    async fn initialize(&mut self, image: &Path) -> Result<()>;

    /// Boot the guest, either attached to this process or daemonized
    async fn start(&mut self, daemonize: bool, extra_args: &[String]) -> Result<()>;

    /// `true` once the guest has powered off, `false` if `timeout` elapsed first
    ///
    /// An attached guest that exits unsuccessfully is an error.
    async fn wait_for_termination(&mut self, timeout: Duration) -> Result<bool>;

    /// `true` once the guest's remote surface answers, `false` on timeout
    async fn is_up(&mut self, timeout: Duration) -> Result<bool>;
}

/// QEMU-backed guest
pub struct QemuGuest {
    name: String,
    profile: GuestProfile,
    child: Option<Child>,
}

impl QemuGuest {
    pub fn new(name: impl Into<String>, profile: GuestProfile) -> Self {
        Self {
            name: name.into(),
            profile,
            child: None,
        }
    }

    pub fn profile(&self) -> &GuestProfile {
        &self.profile
    }

    fn pid_file(&self) -> PathBuf {
        self.profile.path.join(PID_FILE)
    }

    fn monitor_socket(&self) -> PathBuf {
        self.profile.path.join(MONITOR_SOCKET)
    }

    /// Serial console output of the last boot
    pub fn serial_log(&self) -> PathBuf {
        self.profile.path.join(SERIAL_LOG)
    }

    /// Full qemu argument list for a boot of `format` disk
    pub fn qemu_args(&self, format: &str, daemonize: bool, extra_args: &[String]) -> Vec<String> {
        let p = &self.profile;
        let machine = match &p.machine {
            Some(machine) => format!("{},accel={}", machine, p.accel),
            None => format!("accel={}", p.accel),
        };

        let mut args: Vec<String> = vec![
            "-name".into(),
            self.name.clone(),
            "-machine".into(),
            machine,
        ];
        if let Some(cpu) = &p.cpu {
            args.extend(["-cpu".into(), cpu.clone()]);
        }
        args.extend([
            "-m".into(),
            p.memory.clone(),
            "-smp".into(),
            p.smp.to_string(),
            "-drive".into(),
            format!(
                "file={},format={},if=virtio",
                p.boot_image_path().display(),
                format
            ),
            "-netdev".into(),
            format!(
                "user,id=net0,hostfwd=tcp::{}-:{}",
                p.tcp_forward.host, p.tcp_forward.guest
            ),
            "-device".into(),
            "virtio-net-pci,netdev=net0".into(),
            "-display".into(),
            "none".into(),
            "-serial".into(),
            format!("file:{}", self.serial_log().display()),
            "-monitor".into(),
            format!("unix:{},server,nowait", self.monitor_socket().display()),
            "-pidfile".into(),
            self.pid_file().display().to_string(),
        ]);
        if daemonize {
            args.push("-daemonize".into());
        }
        args.extend(p.extra_args.iter().cloned());
        args.extend(extra_args.iter().cloned());
        args
    }

    fn read_pid(&self) -> Option<libc::pid_t> {
        std::fs::read_to_string(self.pid_file())
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// Stderr of the last attached boot
    pub fn stderr_log(&self) -> PathBuf {
        self.profile.path.join(STDERR_LOG)
    }

    /// Whether a qemu process for this guest is still alive
    ///
    /// Reaps an attached guest; a non-zero exit becomes a process error.
    fn is_running(&mut self) -> Result<bool> {
        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    self.child = None;
                    if !status.success() {
                        return Err(self.exit_error(status));
                    }
                    debug!("Guest {} exited with {}", self.name, status);
                    return Ok(false);
                }
                Ok(None) => return Ok(true),
                Err(e) => {
                    warn!("Failed to poll guest {}: {}", self.name, e);
                    self.child = None;
                }
            }
        }

        Ok(match self.read_pid() {
            Some(pid) => pid_alive(pid),
            None => false,
        })
    }

    fn exit_error(&self, status: std::process::ExitStatus) -> CloudImageError {
        let stderr = std::fs::read_to_string(self.stderr_log())
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        CloudImageError::ProcessError {
            command: format!("{} (guest {})", self.profile.qemu_binary, self.name),
            exit_code: status.code(),
            stderr: if stderr.is_empty() {
                format!("guest exited with {}", status)
            } else {
                stderr
            },
        }
    }

    /// Ask qemu to quit through its monitor socket
    #[cfg(unix)]
    async fn send_monitor_command(&self, command: &str) {
        use tokio::io::AsyncWriteExt;
        use tokio::net::UnixStream;

        match UnixStream::connect(self.monitor_socket()).await {
            Ok(mut stream) => {
                if let Err(e) = stream.write_all(format!("{}\n", command).as_bytes()).await {
                    debug!("Failed to send monitor command: {}", e);
                } else {
                    debug!("Sent monitor command: {}", command);
                }
            }
            Err(e) => debug!("Monitor socket not available: {}", e),
        }
    }

    #[cfg(not(unix))]
    async fn send_monitor_command(&self, _command: &str) {}

    async fn remove_runtime_files(&self) {
        for file in [self.pid_file(), self.monitor_socket()] {
            let _ = tokio::fs::remove_file(file).await;
        }
    }
}

fn pid_alive(pid: libc::pid_t) -> bool {
    if pid <= 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Read the first line a service sends and check for an SSH identification
async fn ssh_banner(port: u16) -> bool {
    let connect = tokio::time::timeout(POLL_INTERVAL, TcpStream::connect(("127.0.0.1", port)));
    let mut stream = match connect.await {
        Ok(Ok(stream)) => stream,
        _ => return false,
    };

    let mut buf = [0u8; 64];
    match tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => buf[..n].starts_with(b"SSH-"),
        _ => false,
    }
}

#[async_trait]
impl GuestControl for QemuGuest {
    fn name(&self) -> &str {
        &self.name
    }

    fn guest_path(&self) -> &Path {
        &self.profile.path
    }

    fn boot_image(&self) -> PathBuf {
        self.profile.boot_image_path()
    }

    async fn kill(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!("Attached guest already gone: {}", e);
            }
        }

        if self.is_running()? {
            self.send_monitor_command("quit").await;
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        if let Some(pid) = self.read_pid() {
            if pid_alive(pid) {
                warn!("Killing guest {} (pid {})", self.name, pid);
                if unsafe { libc::kill(pid, libc::SIGKILL) } != 0 {
                    return Err(CloudImageError::vm(format!(
                        "Failed to kill guest {} (pid {}): {}",
                        self.name,
                        pid,
                        std::io::Error::last_os_error()
                    )));
                }
                let deadline = Instant::now() + Duration::from_secs(5);
                while pid_alive(pid) && Instant::now() < deadline {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        self.remove_runtime_files().await;
        debug!("Guest {} is stopped", self.name);
        Ok(())
    }

    async fn initialize(&mut self, image: &Path) -> Result<()> {
        let dir = self.profile.path.clone();
        tokio::fs::create_dir_all(&dir).await?;

        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name() == LEASE_FILE {
                continue;
            }
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }

        let boot = self.boot_image();
        tokio::fs::copy(image, &boot).await.map_err(|e| {
            CloudImageError::vm(format!(
                "Failed to copy {} to {}: {}",
                image.display(),
                boot.display(),
                e
            ))
        })?;

        info!("Initialized guest {} with {}", self.name, image.display());
        Ok(())
    }

    async fn start(&mut self, daemonize: bool, extra_args: &[String]) -> Result<()> {
        let format = QemuUtils::get_image_info(self.boot_image()).await?.format;
        let args = self.qemu_args(&format, daemonize, extra_args);
        let binary = self.profile.qemu_binary.clone();

        if daemonize {
            SystemUtils::run_tool(&binary, &args).await?;
            info!("Guest {} started in daemon mode", self.name);
        } else {
            debug!("Starting {} {}", binary, args.join(" "));
            let stderr = std::fs::File::create(self.stderr_log())?;
            let child = Command::new(&binary)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::from(stderr))
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| CloudImageError::ProcessError {
                    command: binary.clone(),
                    exit_code: None,
                    stderr: format!("Failed to execute command: {}", e),
                })?;
            self.child = Some(child);
            info!("Guest {} started attached", self.name);
        }

        Ok(())
    }

    async fn wait_for_termination(&mut self, timeout: Duration) -> Result<bool> {
        let started = Instant::now();
        loop {
            if !self.is_running()? {
                self.remove_runtime_files().await;
                return Ok(true);
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL.min(timeout - elapsed)).await;
        }
    }

    async fn is_up(&mut self, timeout: Duration) -> Result<bool> {
        let port = self.profile.tcp_forward.host;
        let started = Instant::now();
        loop {
            if ssh_banner(port).await {
                debug!("Guest {} answers on port {}", self.name, port);
                return Ok(true);
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL.min(timeout - elapsed)).await;
        }
    }
}
