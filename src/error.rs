// file: src/error.rs
// version: 3.0.0
// guid: 57b83a63-07b6-4534-aa6c-51e8797254e0

//! Error types for the cloud image builder

use std::fmt;
use thiserror::Error;

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, CloudImageError>;

/// Pipeline stage that produced a fatal error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Select,
    Seed,
    Expand,
    Provision,
    Finalize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Select => "select",
            Stage::Seed => "seed",
            Stage::Expand => "expand",
            Stage::Provision => "provision",
            Stage::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types for the cloud image builder
#[derive(Error, Debug)]
pub enum CloudImageError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("VM error: {0}")]
    VmError(String),

    #[error("SSH error: {0}")]
    SshError(String),

    #[error("Lease error: {0}")]
    LeaseError(String),

    #[error("Command '{command}' failed (exit code {exit_code:?}): {stderr}")]
    ProcessError {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Guest {phase} timed out after {seconds} seconds")]
    GuestTimeout { phase: String, seconds: u64 },

    #[error("Remote command '{command}' failed: {reason}")]
    RemoteCommandError { command: String, reason: String },

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{stage} stage failed: {source}")]
    StageFailed {
        stage: Stage,
        #[source]
        source: Box<CloudImageError>,
    },
}

impl CloudImageError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a new image error
    pub fn image(msg: impl Into<String>) -> Self {
        Self::ImageError(msg.into())
    }

    /// Create a new VM error
    pub fn vm(msg: impl Into<String>) -> Self {
        Self::VmError(msg.into())
    }

    /// Create a new guest timeout error
    pub fn timeout(phase: impl Into<String>, seconds: u64) -> Self {
        Self::GuestTimeout {
            phase: phase.into(),
            seconds,
        }
    }

    /// Attach the failing pipeline stage
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            already @ Self::StageFailed { .. } => already,
            other => Self::StageFailed {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage the error was raised in, if known
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether this is a configuration problem rather than a runtime failure
    pub fn is_config(&self) -> bool {
        match self {
            Self::ConfigError(_) | Self::ValidationError(_) | Self::YamlError(_) => true,
            Self::StageFailed { source, .. } => source.is_config(),
            _ => false,
        }
    }

    /// POSIX-style exit code for the error
    ///
    /// Configuration problems map to `EINVAL`, failed external tools propagate
    /// their own exit code and guest timeouts map to `ETIMEDOUT`.
    pub fn errno(&self) -> i32 {
        match self {
            Self::StageFailed { source, .. } => source.errno(),
            Self::ConfigError(_) | Self::ValidationError(_) | Self::YamlError(_) => libc::EINVAL,
            Self::ProcessError {
                exit_code: Some(code),
                ..
            } if *code != 0 => *code,
            Self::GuestTimeout { .. } => libc::ETIMEDOUT,
            Self::LeaseError(_) => libc::EBUSY,
            Self::IoError(e) => e.raw_os_error().unwrap_or(libc::EIO),
            _ => 1,
        }
    }
}
