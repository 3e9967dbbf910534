// file: src/config/loader.rs
// version: 2.0.0
// guid: d4e5f6a7-b8c9-4123-8567-890123def012

//! Configuration file loading and environment variable substitution

use super::BuilderConfig;
use crate::{error::CloudImageError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration loader with environment variable substitution
pub struct ConfigLoader {
    env_vars: HashMap<String, String>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self {
            env_vars: std::env::vars().collect(),
        }
    }

    /// Default configuration location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("cloudimage-builder")
            .join("config.yaml")
    }

    /// Load builder configuration from a YAML file
    pub fn load_config<P: AsRef<Path>>(&self, path: P) -> Result<BuilderConfig> {
        let content = fs::read_to_string(&path).map_err(|e| {
            CloudImageError::config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config = self.parse_config(&content)?;
        debug!(
            "Loaded {} image entries and {} guests from {}",
            config.system_imaging.images.len(),
            config.qemu.guests.len(),
            path.as_ref().display()
        );
        Ok(config)
    }

    /// Parse builder configuration from YAML text
    pub fn parse_config(&self, content: &str) -> Result<BuilderConfig> {
        let expanded = self.expand_env_vars(content)?;
        let mut config: BuilderConfig = serde_yaml::from_str(&expanded)?;
        expand_tildes(&mut config);
        Ok(config)
    }

    /// Expand environment variables in configuration content
    fn expand_env_vars(&self, content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| CloudImageError::config(format!("Invalid regex pattern: {}", e)))?;

        let mut result = content.to_string();
        let mut missing_vars = Vec::new();

        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let placeholder = &cap[0];

            if let Some(value) = self.env_vars.get(var_name) {
                result = result.replace(placeholder, value);
            } else if !missing_vars.iter().any(|v| v == var_name) {
                missing_vars.push(var_name.to_string());
            }
        }

        if !missing_vars.is_empty() {
            return Err(CloudImageError::config(format!(
                "Missing environment variables: {}",
                missing_vars.join(", ")
            )));
        }

        Ok(result)
    }

    /// Set environment variable for substitution
    pub fn set_env_var(&mut self, key: String, value: String) {
        self.env_vars.insert(key, value);
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn expand_path(path: &mut PathBuf) {
    if let Some(s) = path.to_str() {
        if s.starts_with('~') {
            *path = PathBuf::from(shellexpand::tilde(s).into_owned());
        }
    }
}

fn expand_opt(path: &mut Option<PathBuf>) {
    if let Some(p) = path.as_mut() {
        expand_path(p);
    }
}

/// Apply `~` expansion to every path field
fn expand_tildes(config: &mut BuilderConfig) {
    for spec in config.system_imaging.images.values_mut() {
        if let Some(source) = spec.source.as_mut() {
            expand_opt(&mut source.path);
            expand_opt(&mut source.decompressed_path);
            expand_opt(&mut source.metadata_path);
            expand_opt(&mut source.userdata_path);
        }
        if let Some(destination) = spec.destination.as_mut() {
            expand_opt(&mut destination.path);
        }
    }

    for profile in config.qemu.guests.profiles_mut() {
        expand_path(&mut profile.path);
    }
}

/// Translate a case-insensitive fnmatch pattern into an anchored regex
pub fn fnmatch_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::from("(?i)^");
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    if c == '\\' || c == '[' {
                        class.push('\\');
                    }
                    class.push(c);
                }
                if closed {
                    re.push('[');
                    re.push_str(&class);
                    re.push(']');
                } else {
                    re.push_str(&regex::escape("["));
                    re.push_str(&regex::escape(class.trim_start_matches('^')));
                }
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');

    Regex::new(&re)
        .map_err(|e| CloudImageError::config(format!("Invalid image pattern '{}': {}", pattern, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_env_var_expansion() {
        let mut loader = ConfigLoader::new();
        loader.set_env_var("TEST_VAR".to_string(), "test_value".to_string());

        let content = "key: ${TEST_VAR}";
        let result = loader.expand_env_vars(content).unwrap();
        assert_eq!(result, "key: test_value");
    }

    #[test]
    fn test_missing_env_var() {
        let loader = ConfigLoader::new();
        let content = "key: ${MISSING_VAR_FOR_CLOUDIMAGE_TEST}";

        let result = loader.expand_env_vars(content);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Missing environment variables"));
    }

    #[test]
    fn test_load_config() -> Result<()> {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
system_imaging:
  images:
    freebsd-14-x86_64:
      system_label: freebsd-14-x86_64
      nuage:
        url: https://download.freebsd.org/FreeBSD-14.qcow2.xz
        path: /tmp/images/FreeBSD-14.qcow2.xz
        decompressed_path: /tmp/images/FreeBSD-14.qcow2
        metadata_path: /tmp/seed/meta-data
        userdata_path: /tmp/seed/user-data
      cloud:
        path: /tmp/cloud/freebsd-14-x86_64.qcow2
qemu:
  guests:
    generic-bsd:
      system_label: freebsd-14-x86_64
      path: /tmp/guests/generic-bsd
transports:
  default_freebsd:
    username: ${{TEST_GUEST_USER}}
    password: freebsd
    port: 4200
provisioning:
  timeouts:
    ready_secs: 120
"#
        )
        .unwrap();

        let mut loader = ConfigLoader::new();
        loader.set_env_var("TEST_GUEST_USER".to_string(), "freebsd".to_string());
        let config = loader.load_config(file.path())?;

        let spec = config.image("freebsd-14-x86_64")?;
        assert_eq!(spec.system_label()?, "freebsd-14-x86_64");
        assert!(spec.validate().is_ok());
        assert_eq!(config.qemu.guests.len(), 1);
        assert_eq!(config.transport()?.username, "freebsd");
        assert_eq!(config.provisioning.timeouts.ready_secs, 120);
        assert_eq!(config.provisioning.timeouts.final_halt_secs, 60);

        Ok(())
    }

    #[test]
    fn test_tilde_paths_are_expanded() -> Result<()> {
        let loader = ConfigLoader::new();
        let config = loader.parse_config(
            r#"
qemu:
  guests:
    g:
      system_label: x
      path: ~/guests/g
"#,
        )?;
        let path = &config.qemu.guests.get("g").unwrap().path;
        assert!(!path.to_string_lossy().starts_with('~'));
        Ok(())
    }

    #[test]
    fn test_fnmatch_regex() {
        let re = fnmatch_regex("debian*").unwrap();
        assert!(re.is_match("debian-12"));
        assert!(re.is_match("Debian-12"));
        assert!(!re.is_match("ubuntu-debian"));

        let re = fnmatch_regex("freebsd-1?-[!a]*").unwrap();
        assert!(re.is_match("freebsd-14-x86_64"));
        assert!(!re.is_match("freebsd-14-arm64"));

        let re = fnmatch_regex("a.b").unwrap();
        assert!(re.is_match("a.b"));
        assert!(!re.is_match("axb"));
    }
}
