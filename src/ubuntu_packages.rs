//! Shared libraries Chrome needs on a bare Ubuntu host.

use crate::error::BrowserInstallerError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Runtime dependencies of Chrome for Testing builds.
const CHROME_DEPENDENCIES: &[&str] = &[
    "fonts-liberation",
    "libasound2",
    "libatk-bridge2.0-0",
    "libatk1.0-0",
    "libcairo2",
    "libcups2",
    "libdbus-1-3",
    "libdrm2",
    "libgbm1",
    "libglib2.0-0",
    "libgtk-3-0",
    "libnspr4",
    "libnss3",
    "libpango-1.0-0",
    "libx11-6",
    "libxcb1",
    "libxcomposite1",
    "libxdamage1",
    "libxext6",
    "libxfixes3",
    "libxkbcommon0",
    "libxrandr2",
    "xdg-utils",
];

/// Packages renamed with a `t64` suffix by the 64-bit time_t transition in 24.04.
const T64_RENAMED: &[&str] = &[
    "libasound2",
    "libatk-bridge2.0-0",
    "libatk1.0-0",
    "libcups2",
    "libglib2.0-0",
    "libgtk-3-0",
];

#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn install_packages(&self) -> Result<(), BrowserInstallerError>;
}

pub struct UbuntuPackages {
    os_release_path: PathBuf,
    installed: OnceCell<()>,
}

impl Default for UbuntuPackages {
    fn default() -> Self {
        Self::with_os_release_path(OS_RELEASE_PATH)
    }
}

impl UbuntuPackages {
    pub fn with_os_release_path(path: impl Into<PathBuf>) -> Self {
        Self {
            os_release_path: path.into(),
            installed: OnceCell::new(),
        }
    }

    async fn install_missing(&self) -> Result<(), BrowserInstallerError> {
        let Some(release) = read_os_release(&self.os_release_path).await? else {
            debug!("no os-release file, skipping ubuntu packages");
            return Ok(());
        };
        if release.get("ID").map(String::as_str) != Some("ubuntu") {
            debug!(id = ?release.get("ID"), "not an ubuntu host, skipping ubuntu packages");
            return Ok(());
        }

        let version_id = release.get("VERSION_ID").map(String::as_str).unwrap_or_default();
        let mut missing = Vec::new();
        for package in required_packages(version_id) {
            if !is_installed(&package).await? {
                missing.push(package);
            }
        }

        if missing.is_empty() {
            debug!("all ubuntu dependencies are already installed");
            return Ok(());
        }

        info!(packages = ?missing, "installing ubuntu dependencies");
        apt_install(&missing).await
    }
}

#[async_trait]
impl PackageInstaller for UbuntuPackages {
    async fn install_packages(&self) -> Result<(), BrowserInstallerError> {
        self.installed
            .get_or_try_init(|| self.install_missing())
            .await
            .map(|_| ())
    }
}

/// Parses `KEY=value` lines of an os-release file, unquoting values.
pub fn parse_os_release(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}

async fn read_os_release(path: &Path) -> Result<Option<HashMap<String, String>>, BrowserInstallerError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(parse_os_release(&content))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(BrowserInstallerError::IoError {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Package names for the given Ubuntu `VERSION_ID`.
pub fn required_packages(version_id: &str) -> Vec<String> {
    let major = version_id
        .split('.')
        .next()
        .and_then(|m| m.parse::<u32>().ok())
        .unwrap_or(0);
    let t64 = major >= 24;

    CHROME_DEPENDENCIES
        .iter()
        .map(|package| {
            if t64 && T64_RENAMED.contains(package) {
                format!("{package}t64")
            } else {
                package.to_string()
            }
        })
        .collect()
}

async fn is_installed(package: &str) -> Result<bool, BrowserInstallerError> {
    let dpkg_query = which::which("dpkg-query")
        .map_err(|e| BrowserInstallerError::CommandExecutionError {
            command: "dpkg-query".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, e),
        })?;

    let output = Command::new(&dpkg_query)
        .args(["-W", "-f=${Status}", package])
        .output()
        .await
        .map_err(|e| BrowserInstallerError::CommandExecutionError {
            command: format!("dpkg-query -W {package}"),
            source: e,
        })?;

    Ok(output.status.success() && String::from_utf8_lossy(&output.stdout).contains("install ok installed"))
}

async fn apt_install(packages: &[String]) -> Result<(), BrowserInstallerError> {
    let mut args: Vec<String> = vec![
        "apt-get".into(),
        "install".into(),
        "-y".into(),
        "--no-install-recommends".into(),
    ];
    args.extend(packages.iter().cloned());

    if !is_root().await && which::which("sudo").is_ok() {
        args.insert(0, "sudo".into());
    }

    let command = args.join(" ");
    let output = Command::new(&args[0])
        .args(&args[1..])
        .env("DEBIAN_FRONTEND", "noninteractive")
        .output()
        .await
        .map_err(|e| BrowserInstallerError::CommandExecutionError {
            command: command.clone(),
            source: e,
        })?;

    if !output.status.success() {
        return Err(BrowserInstallerError::CommandFailed {
            command,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

async fn is_root() -> bool {
    match Command::new("id").arg("-u").output().await {
        Ok(output) => String::from_utf8_lossy(&output.stdout).trim() == "0",
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_os_release() {
        let release = parse_os_release(
            "# comment\nNAME=\"Ubuntu\"\nID=ubuntu\nVERSION_ID=\"22.04\"\nPRETTY_NAME='Ubuntu 22.04.4 LTS'\n",
        );
        assert_eq!(release["ID"], "ubuntu");
        assert_eq!(release["VERSION_ID"], "22.04");
        assert_eq!(release["PRETTY_NAME"], "Ubuntu 22.04.4 LTS");
    }

    #[test]
    fn noble_uses_t64_package_names() {
        let jammy = required_packages("22.04");
        let noble = required_packages("24.04");

        assert!(jammy.contains(&"libasound2".to_string()));
        assert!(noble.contains(&"libasound2t64".to_string()));
        assert!(noble.contains(&"libnss3".to_string()));
        assert_eq!(jammy.len(), noble.len());
    }

    #[tokio::test]
    async fn skips_non_ubuntu_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let os_release = dir.path().join("os-release");
        std::fs::write(&os_release, "ID=fedora\nVERSION_ID=40\n").unwrap();

        let packages = UbuntuPackages::with_os_release_path(&os_release);
        packages.install_packages().await.unwrap();
        packages.install_packages().await.unwrap();
    }

    #[tokio::test]
    async fn skips_when_os_release_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let packages = UbuntuPackages::with_os_release_path(dir.path().join("absent"));
        packages.install_packages().await.unwrap();
    }
}
