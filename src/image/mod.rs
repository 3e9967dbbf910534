// file: src/image/mod.rs
// version: 2.0.0
// guid: a1b2c3d4-e5f6-7890-1234-567890abcdef

//! Cloud image building
//!
//! Turns a vendor nuage image into a cloud-init enabled cloud image:
//! - nuage image download and decompression
//! - guest selection and seed volume authoring
//! - two-phase guest provisioning
//! - publishing with a SHA-256 sidecar

pub mod builder;

pub use builder::ImageBuilder;
