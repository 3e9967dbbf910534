// file: src/lib.rs
// version: 3.0.0
// guid: d82472d1-7f0f-4eb4-b0a3-6e1547103eb4

//! # Cloud Image Builder
//!
//! Converts vendor-supplied nuage disk images into cloud-init enabled cloud
//! images. A QEMU guest boots the image twice: once with a `cidata` seed
//! volume so first-boot initialization can run, then again to install and
//! enable cloud-init over SSH. The resulting disk is published together with
//! a `.sha256` sidecar.

pub mod cli;
pub mod config;
pub mod error;
pub mod image;
pub mod logging;
pub mod network;
pub mod utils;

pub use error::{CloudImageError, Result};

/// Version information for the builder
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
