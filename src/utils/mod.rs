// file: src/utils/mod.rs
// version: 2.0.0
// guid: v2w3x4y5-z6a7-8901-2345-678901vwxyza

//! Utility modules for system operations

pub mod lease;
pub mod qemu;
pub mod system;
pub mod vm;

pub use lease::GuestLease;
pub use qemu::{DiskImageInfo, QemuUtils};
pub use system::SystemUtils;
pub use vm::{GuestControl, QemuGuest};
