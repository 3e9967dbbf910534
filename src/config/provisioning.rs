// file: src/config/provisioning.rs
// version: 1.0.0
// guid: 5d2e8c47-1a9b-4f60-b3d2-94c1e7a0f8b5

//! Provisioning settings and transport credentials

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default install script run over the guest transport
pub const DEFAULT_INSTALL_COMMANDS: [&str; 3] = [
    "su -m root -c 'pkg install -y $(pkg search -q cloud-init | head -n1)'",
    "su -m root -c 'sysrc cloudinit_enable=YES'",
    "su -m root -c 'poweroff'",
];

/// Name of the transport used when none is configured
pub const DEFAULT_TRANSPORT: &str = "default_freebsd";

/// Per-phase wait limits, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseTimeouts {
    pub first_halt_secs: u64,
    pub ready_secs: u64,
    pub final_halt_secs: u64,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            first_halt_secs: 60,
            ready_secs: 60,
            final_halt_secs: 60,
        }
    }
}

impl PhaseTimeouts {
    pub fn first_halt(&self) -> Duration {
        Duration::from_secs(self.first_halt_secs)
    }

    pub fn ready(&self) -> Duration {
        Duration::from_secs(self.ready_secs)
    }

    pub fn final_halt(&self) -> Duration {
        Duration::from_secs(self.final_halt_secs)
    }
}

/// How the guest is driven from nuage image to cloud image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningSettings {
    /// Target capacity of the boot disk, qemu-img size syntax
    pub disk_size: String,
    /// Name of the entry under `transports` used for the install script
    pub transport: String,
    pub timeouts: PhaseTimeouts,
    /// Force-stop the guest when a boot phase times out
    pub kill_on_timeout: bool,
    pub install_commands: Vec<String>,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            disk_size: "12G".to_string(),
            transport: DEFAULT_TRANSPORT.to_string(),
            timeouts: PhaseTimeouts::default(),
            kill_on_timeout: false,
            install_commands: DEFAULT_INSTALL_COMMANDS
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

/// Credentials for a privileged remote command channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportProfile {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Defaults to the guest's forwarded SSH port
    #[serde(default)]
    pub port: Option<u16>,
}

/// IPv4 loopback, where qemu user networking forwards ports
fn default_hostname() -> String {
    "127.0.0.1".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_observed_pipeline() {
        let settings = ProvisioningSettings::default();
        assert_eq!(settings.disk_size, "12G");
        assert_eq!(settings.transport, "default_freebsd");
        assert_eq!(settings.timeouts.ready(), Duration::from_secs(60));
        assert!(!settings.kill_on_timeout);
        assert_eq!(settings.install_commands.len(), 3);
        assert!(settings.install_commands[2].contains("poweroff"));
    }

    #[test]
    fn test_partial_settings_fill_defaults() {
        let settings: ProvisioningSettings =
            serde_yaml::from_str("timeouts:\n  ready_secs: 300\n").unwrap();
        assert_eq!(settings.timeouts.ready_secs, 300);
        assert_eq!(settings.timeouts.first_halt_secs, 60);
        assert_eq!(settings.disk_size, "12G");
    }

    #[test]
    fn test_transport_profile_defaults() {
        let transport: TransportProfile =
            serde_yaml::from_str("username: freebsd\npassword: freebsd\n").unwrap();
        assert_eq!(transport.hostname, "127.0.0.1");
        assert_eq!(transport.port, None);
    }
}
