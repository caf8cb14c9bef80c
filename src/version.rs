//! Version string helpers.

use crate::error::BrowserInstallerError;
use std::cmp::Ordering;

/// Channel tags accepted in place of a version number.
pub fn is_version_tag(version: &str) -> bool {
    matches!(version.trim(), "latest" | "stable")
}

/// Returns the leading milestone of `version`, e.g. `120` for `"120.0.6099.109"`.
pub fn get_milestone(version: &str) -> Result<u32, BrowserInstallerError> {
    version
        .trim()
        .split('.')
        .next()
        .and_then(|m| m.parse::<u32>().ok())
        .ok_or_else(|| BrowserInstallerError::InvalidVersion {
            version: version.to_string(),
        })
}

/// Reduces a user supplied Chrome version to something the build id resolver accepts:
/// a milestone (`"120"`), a build (`"120.0.6099"`) or a full version.
pub fn normalize_chrome_version(version: &str) -> String {
    let parts: Vec<&str> = version.trim().split('.').filter(|p| !p.is_empty()).collect();

    match parts.len() {
        0 => String::new(),
        4.. => parts[..4].join("."),
        3 => parts.join("."),
        _ => parts[0].to_string(),
    }
}

/// Whether an installed `candidate` satisfies the `requested` version.
///
/// `"120"` and `"120.0"` match any `120.*` build, `"120.0.6099"` matches its
/// patches, and a full version only matches itself.
pub fn version_matches(candidate: &str, requested: &str) -> bool {
    let requested = normalize_chrome_version(requested);
    if requested.is_empty() {
        return false;
    }
    candidate == requested || candidate.starts_with(&format!("{requested}."))
}

/// Orders dotted numeric versions part by part, so `120.0.10` > `120.0.9`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.').map(|p| p.parse::<u64>().unwrap_or(0)).collect()
    };
    parse(a).cmp(&parse(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn milestone_of_various_formats() {
        assert_eq!(get_milestone("120").unwrap(), 120);
        assert_eq!(get_milestone("120.0").unwrap(), 120);
        assert_eq!(get_milestone("112.0.5615.49").unwrap(), 112);
        assert!(get_milestone("latest").is_err());
        assert!(get_milestone("").is_err());
    }

    #[test]
    fn recognizes_channel_tags() {
        assert!(is_version_tag("latest"));
        assert!(is_version_tag("stable"));
        assert!(!is_version_tag("120"));
        assert!(!is_version_tag("beta"));
    }

    #[test]
    fn normalizes_chrome_versions() {
        assert_eq!(normalize_chrome_version("120"), "120");
        assert_eq!(normalize_chrome_version("120.0"), "120");
        assert_eq!(normalize_chrome_version("120.0.6099"), "120.0.6099");
        assert_eq!(normalize_chrome_version("120.0.6099.109"), "120.0.6099.109");
    }

    #[test]
    fn matches_by_dotted_prefix() {
        assert!(version_matches("120.0.6099.109", "120"));
        assert!(version_matches("120.0.6099.109", "120.0"));
        assert!(version_matches("120.0.6099.109", "120.0.6099"));
        assert!(version_matches("120.0.6099.109", "120.0.6099.109"));
        assert!(!version_matches("120.0.6099.109", "12"));
        assert!(!version_matches("1200.0.1.1", "120"));
        assert!(!version_matches("120.0.6099.109", "120.0.6099.1"));
    }

    #[test]
    fn compares_numerically() {
        assert_eq!(compare_versions("120.0.10.0", "120.0.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("119.0.1.0", "120"), Ordering::Less);
        assert_eq!(compare_versions("120.0", "120.0"), Ordering::Equal);
    }
}
