//! Host platform detection and the per-platform naming used by download hosts.

use crate::error::BrowserInstallerError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BrowserPlatform {
    Linux,
    LinuxArm,
    Mac,
    MacArm,
    Win32,
    Win64,
}

impl BrowserPlatform {
    /// Detects the platform of the running process.
    pub fn current() -> Result<Self, BrowserInstallerError> {
        Self::from_os_arch(std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn from_os_arch(os: &str, arch: &str) -> Result<Self, BrowserInstallerError> {
        match (os, arch) {
            ("windows", "x86_64") => Ok(BrowserPlatform::Win64),
            ("windows", "x86") => Ok(BrowserPlatform::Win32),
            ("macos", "x86_64") => Ok(BrowserPlatform::Mac),
            ("macos", "aarch64") => Ok(BrowserPlatform::MacArm),
            ("linux", "x86_64") => Ok(BrowserPlatform::Linux),
            ("linux", "aarch64") => Ok(BrowserPlatform::LinuxArm),
            _ => Err(BrowserInstallerError::UnsupportedPlatform(format!("{os}-{arch}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserPlatform::Linux => "linux",
            BrowserPlatform::LinuxArm => "linux_arm",
            BrowserPlatform::Mac => "mac",
            BrowserPlatform::MacArm => "mac_arm",
            BrowserPlatform::Win32 => "win32",
            BrowserPlatform::Win64 => "win64",
        }
    }

    /// Platform folder used by the Chrome for Testing JSON endpoints and bucket.
    /// Chrome for Testing has no Linux arm64 builds.
    pub fn chrome_for_testing_folder(&self) -> Option<&'static str> {
        match self {
            BrowserPlatform::Linux => Some("linux64"),
            BrowserPlatform::LinuxArm => None,
            BrowserPlatform::Mac => Some("mac-x64"),
            BrowserPlatform::MacArm => Some("mac-arm64"),
            BrowserPlatform::Win32 => Some("win32"),
            BrowserPlatform::Win64 => Some("win64"),
        }
    }

    /// Folder name in the Chromium snapshots bucket.
    pub fn chromium_snapshot_folder(&self) -> &'static str {
        match self {
            BrowserPlatform::Linux => "Linux_x64",
            BrowserPlatform::LinuxArm => "Linux_ARM_Cross-Compile",
            BrowserPlatform::Mac => "Mac",
            BrowserPlatform::MacArm => "Mac_Arm",
            BrowserPlatform::Win32 => "Win",
            BrowserPlatform::Win64 => "Win_x64",
        }
    }

    /// Archive stem of Chromium snapshots.
    pub fn chromium_archive(&self) -> &'static str {
        match self {
            BrowserPlatform::Linux | BrowserPlatform::LinuxArm => "chrome-linux",
            BrowserPlatform::Mac | BrowserPlatform::MacArm => "chrome-mac",
            BrowserPlatform::Win32 | BrowserPlatform::Win64 => "chrome-win",
        }
    }

    /// Platform suffix of archives on the pre-113 chromedriver storage.
    pub fn legacy_chromedriver_suffix(&self) -> Option<&'static str> {
        match self {
            BrowserPlatform::Linux => Some("linux64"),
            BrowserPlatform::LinuxArm => None,
            BrowserPlatform::Mac => Some("mac64"),
            BrowserPlatform::MacArm => Some("mac_arm64"),
            BrowserPlatform::Win32 | BrowserPlatform::Win64 => Some("win32"),
        }
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, BrowserPlatform::Win32 | BrowserPlatform::Win64)
    }

    pub fn is_mac(&self) -> bool {
        matches!(self, BrowserPlatform::Mac | BrowserPlatform::MacArm)
    }
}

impl fmt::Display for BrowserPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_os_arch_pairs() {
        assert_eq!(
            BrowserPlatform::from_os_arch("linux", "x86_64").unwrap(),
            BrowserPlatform::Linux
        );
        assert_eq!(
            BrowserPlatform::from_os_arch("macos", "aarch64").unwrap(),
            BrowserPlatform::MacArm
        );
        assert_eq!(
            BrowserPlatform::from_os_arch("windows", "x86").unwrap(),
            BrowserPlatform::Win32
        );
    }

    #[test]
    fn rejects_unknown_pairs() {
        match BrowserPlatform::from_os_arch("freebsd", "x86_64") {
            Err(BrowserInstallerError::UnsupportedPlatform(p)) => assert_eq!(p, "freebsd-x86_64"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn linux_arm_has_no_chrome_for_testing_builds() {
        assert_eq!(BrowserPlatform::LinuxArm.chrome_for_testing_folder(), None);
        assert_eq!(BrowserPlatform::Mac.chrome_for_testing_folder(), Some("mac-x64"));
    }
}
