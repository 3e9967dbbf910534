// file: src/config/guest.rs
// version: 1.0.0
// guid: 0b6f2a91-4c3e-4d7a-9b15-7e2c8f1d3a64

//! QEMU guest profiles

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Host to guest TCP forward used to reach the guest's SSH daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpForward {
    pub host: u16,
    pub guest: u16,
}

impl Default for TcpForward {
    fn default() -> Self {
        Self {
            host: 4200,
            guest: 22,
        }
    }
}

/// A named virtual machine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestProfile {
    /// Label matched against an image's `system_label`
    #[serde(default)]
    pub system_label: Option<String>,
    /// Guest working directory holding the boot image, seed and runtime files
    pub path: PathBuf,
    #[serde(default = "default_qemu_binary")]
    pub qemu_binary: String,
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default = "default_smp")]
    pub smp: u32,
    #[serde(default = "default_accel")]
    pub accel: String,
    #[serde(default)]
    pub machine: Option<String>,
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub tcp_forward: TcpForward,
    /// Extra arguments appended to every qemu invocation
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default = "default_boot_image")]
    pub boot_image: String,
}

fn default_qemu_binary() -> String {
    "qemu-system-x86_64".to_string()
}

fn default_memory() -> String {
    "2G".to_string()
}

fn default_smp() -> u32 {
    2
}

fn default_accel() -> String {
    "kvm:tcg".to_string()
}

fn default_boot_image() -> String {
    "boot.img".to_string()
}

impl GuestProfile {
    /// Minimal profile rooted at `path`
    pub fn new(system_label: Option<&str>, path: impl Into<PathBuf>) -> Self {
        Self {
            system_label: system_label.map(str::to_string),
            path: path.into(),
            qemu_binary: default_qemu_binary(),
            memory: default_memory(),
            smp: default_smp(),
            accel: default_accel(),
            machine: None,
            cpu: None,
            tcp_forward: TcpForward::default(),
            extra_args: Vec::new(),
            boot_image: default_boot_image(),
        }
    }

    /// Path of the primary boot disk
    pub fn boot_image_path(&self) -> PathBuf {
        self.path.join(&self.boot_image)
    }
}

/// Guest profiles in configuration order
///
/// Iteration order is the order of the YAML mapping, which makes
/// first-match selection deterministic.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GuestSet(Vec<(String, GuestProfile)>);

impl GuestSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a profile, keeping insertion order
    pub fn push(&mut self, name: impl Into<String>, profile: GuestProfile) {
        self.0.push((name.into(), profile));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &GuestProfile)> {
        self.0.iter().map(|(name, profile)| (name.as_str(), profile))
    }

    pub fn profiles_mut(&mut self) -> impl Iterator<Item = &mut GuestProfile> {
        self.0.iter_mut().map(|(_, profile)| profile)
    }

    pub fn get(&self, name: &str) -> Option<&GuestProfile> {
        self.iter().find(|(n, _)| *n == name).map(|(_, p)| p)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, GuestProfile)> for GuestSet {
    fn from_iter<I: IntoIterator<Item = (String, GuestProfile)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'de> Deserialize<'de> for GuestSet {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct GuestSetVisitor;

        impl<'de> Visitor<'de> for GuestSetVisitor {
            type Value = GuestSet;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of guest names to guest profiles")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<GuestSet, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut guests = GuestSet::new();
                while let Some((name, profile)) = map.next_entry::<String, GuestProfile>()? {
                    guests.push(name, profile);
                }
                Ok(guests)
            }
        }

        deserializer.deserialize_map(GuestSetVisitor)
    }
}
