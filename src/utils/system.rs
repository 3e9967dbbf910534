// file: src/utils/system.rs
// version: 2.0.0
// guid: w3x4y5z6-a7b8-9012-3456-789012wxyzab

//! Local tool execution and host checks

use crate::{error::CloudImageError, Result};
use std::ffi::OsStr;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, warn};

/// ISO authoring tools sharing the `-o -V -J -R` option set, in preference order
pub const ISO_TOOLS: [&str; 3] = ["mkisofs", "genisoimage", "xorrisofs"];

/// System utility functions
pub struct SystemUtils;

impl SystemUtils {
    /// Check if a command exists in PATH
    pub fn command_exists(command: &str) -> bool {
        which::which(command).is_ok()
    }

    /// First of `candidates` present in PATH
    pub fn find_tool(candidates: &[&str]) -> Option<PathBuf> {
        candidates.iter().find_map(|c| which::which(c).ok())
    }

    /// Run a local tool to completion and return its stdout
    ///
    /// A non-zero exit becomes a `ProcessError` carrying the tool's exit code.
    pub async fn run_tool<S: AsRef<OsStr>>(program: &str, args: &[S]) -> Result<String> {
        let command_line = std::iter::once(program.to_string())
            .chain(args.iter().map(|a| a.as_ref().to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ");
        debug!("Running: {}", command_line);

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| CloudImageError::ProcessError {
                command: command_line.clone(),
                exit_code: None,
                stderr: format!("Failed to execute command: {}", e),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            debug!(
                "Command '{}' failed with exit code {:?}",
                command_line,
                output.status.code()
            );
            return Err(CloudImageError::ProcessError {
                command: command_line,
                exit_code: output.status.code(),
                stderr: if stderr.trim().is_empty() { stdout } else { stderr },
            });
        }

        Ok(stdout)
    }

    /// Check system prerequisites; returns the missing tools
    pub fn check_prerequisites() -> Vec<String> {
        let mut missing: Vec<String> = ["qemu-img", "qemu-system-x86_64"]
            .iter()
            .filter(|cmd| !Self::command_exists(cmd))
            .map(|cmd| cmd.to_string())
            .collect();

        if Self::find_tool(&ISO_TOOLS).is_none() {
            missing.push(ISO_TOOLS.join("|"));
        }

        #[cfg(unix)]
        if !std::path::Path::new("/dev/kvm").exists() {
            warn!("KVM acceleration not available - guest boots will be slower");
        }

        missing
    }
}
