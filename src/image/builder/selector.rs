// file: src/image/builder/selector.rs
// version: 1.0.0
// guid: 2f9b7e13-5c6d-4a80-b1e4-7d3c0a8f6e91

//! Guest profile selection

use crate::config::{GuestProfile, GuestSet};
use crate::{error::CloudImageError, Result};
use tracing::debug;

/// Names of every profile that lacks a `system_label`
pub fn validate_profiles(guests: &GuestSet) -> Vec<String> {
    guests
        .iter()
        .filter(|(_, profile)| profile.system_label.is_none())
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Pick the first guest, in configuration order, labelled exactly `system_label`
///
/// The whole set is validated first: a single unlabeled profile fails the
/// selection even when a labelled match exists.
pub fn select_guest<'a>(
    guests: &'a GuestSet,
    system_label: &str,
) -> Result<(&'a str, &'a GuestProfile)> {
    let unlabeled = validate_profiles(guests);
    if !unlabeled.is_empty() {
        return Err(CloudImageError::config(format!(
            "guest profiles without system_label: {}",
            unlabeled.join(", ")
        )));
    }

    let (name, profile) = guests
        .iter()
        .find(|(_, profile)| profile.system_label.as_deref() == Some(system_label))
        .ok_or_else(|| {
            CloudImageError::config(format!(
                "no matching guest for system_label '{}'",
                system_label
            ))
        })?;

    debug!("Selected guest {} for {}", name, system_label);
    Ok((name, profile))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guests(entries: &[(&str, Option<&str>)]) -> GuestSet {
        entries
            .iter()
            .map(|(name, label)| {
                (
                    name.to_string(),
                    GuestProfile::new(*label, format!("/tmp/guests/{}", name)),
                )
            })
            .collect()
    }

    #[test]
    fn test_first_match_in_configuration_order() {
        let set = guests(&[
            ("netbsd", Some("netbsd-10")),
            ("bsd-b", Some("freebsd-14")),
            ("bsd-a", Some("freebsd-14")),
        ]);

        let (name, profile) = select_guest(&set, "freebsd-14").unwrap();
        assert_eq!(name, "bsd-b");
        assert_eq!(profile.path.to_str().unwrap(), "/tmp/guests/bsd-b");
    }

    #[test]
    fn test_unlabeled_profile_fails_even_with_match() {
        let set = guests(&[
            ("bsd", Some("freebsd-14")),
            ("scratch", None),
            ("other", None),
        ]);

        assert_eq!(validate_profiles(&set), vec!["scratch", "other"]);
        let err = select_guest(&set, "freebsd-14").unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("scratch, other"));
    }

    #[test]
    fn test_label_match_is_case_sensitive() {
        let set = guests(&[("bsd", Some("FreeBSD-14"))]);
        let err = select_guest(&set, "freebsd-14").unwrap_err();
        assert!(err.to_string().contains("no matching guest"));
    }

    #[test]
    fn test_empty_set_has_no_match() {
        let set = GuestSet::new();
        assert!(validate_profiles(&set).is_empty());
        assert!(select_guest(&set, "freebsd-14").unwrap_err().is_config());
    }
}
