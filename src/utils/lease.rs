// file: src/utils/lease.rs
// version: 1.0.0
// guid: 3e7a1c52-9f04-4b8d-a6e2-5c1d0b7f9a38

//! Exclusive ownership of a guest working directory

use crate::{error::CloudImageError, Result};
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Name of the lease file inside a guest directory
pub const LEASE_FILE: &str = ".lease";

/// Held for as long as one pipeline run owns the guest
///
/// Backed by `flock(LOCK_EX | LOCK_NB)`, so the lease disappears with the
/// process even if it crashes. The file records who holds it.
#[derive(Debug)]
pub struct GuestLease {
    file: File,
    path: PathBuf,
    token: Uuid,
    acquired_at: DateTime<Utc>,
}

impl GuestLease {
    /// Take the lease on `guest_dir`, failing immediately if another run holds it
    pub fn acquire(guest_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(guest_dir).map_err(|e| {
            CloudImageError::LeaseError(format!(
                "failed to create guest directory {}: {}",
                guest_dir.display(),
                e
            ))
        })?;

        let path = guest_dir.join(LEASE_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                CloudImageError::LeaseError(format!(
                    "failed to open lease file {}: {}",
                    path.display(),
                    e
                ))
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;

            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                let holder = std::fs::read_to_string(&path).unwrap_or_default();
                return Err(CloudImageError::LeaseError(
                    if err.kind() == std::io::ErrorKind::WouldBlock {
                        format!(
                            "guest {} is in use by another run ({})",
                            guest_dir.display(),
                            holder.trim()
                        )
                    } else {
                        format!("failed to lock {}: {}", path.display(), err)
                    },
                ));
            }
        }

        let token = Uuid::new_v4();
        let acquired_at = Utc::now();
        file.set_len(0)?;
        writeln!(
            file,
            "{} pid={} since={}",
            token,
            std::process::id(),
            acquired_at.to_rfc3339()
        )?;
        file.flush()?;

        debug!(lease = %path.display(), %token, "Acquired guest lease");

        Ok(Self {
            file,
            path,
            token,
            acquired_at,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }
}

impl Drop for GuestLease {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }

        debug!(lease = %self.path.display(), token = %self.token, "Released guest lease");
    }
}
