//! Resolving, probing and installing browser builds from their upstream hosts.
//!
//! Chrome, the headless shell and ChromeDriver come from the Chrome for Testing
//! infrastructure; old milestones are served as Chromium snapshots.

use crate::browser::BrowserName;
use crate::config::InstallerConfig;
use crate::downloader::{self, DownloadProgressCallback};
use crate::error::BrowserInstallerError;
use crate::platform::BrowserPlatform;
use crate::version::is_version_tag;
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Everything needed to locate one build of one browser.
#[derive(Clone)]
pub struct InstallParams {
    pub browser: BrowserName,
    pub platform: BrowserPlatform,
    pub build_id: String,
    pub cache_dir: PathBuf,
    pub progress: Option<DownloadProgressCallback>,
}

impl std::fmt::Debug for InstallParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallParams")
            .field("browser", &self.browser)
            .field("platform", &self.platform)
            .field("build_id", &self.build_id)
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

impl InstallParams {
    pub fn new(
        browser: BrowserName,
        platform: BrowserPlatform,
        build_id: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            browser,
            platform,
            build_id: build_id.into(),
            cache_dir: cache_dir.into(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: DownloadProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Directory a build is unpacked into.
    pub fn install_dir(&self) -> PathBuf {
        self.cache_dir
            .join(self.browser.as_str())
            .join(format!("{}-{}", self.platform, self.build_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledBrowser {
    pub executable_path: PathBuf,
}

#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Turns a milestone, build, full version or tag into a concrete build id.
    async fn resolve_build_id(
        &self,
        browser: BrowserName,
        platform: BrowserPlatform,
        version: &str,
    ) -> Result<String, BrowserInstallerError>;

    /// Whether the archive for `params` is published.
    async fn can_download(&self, params: &InstallParams) -> Result<bool, BrowserInstallerError>;

    /// Downloads and unpacks the build, or returns the existing installation.
    async fn install(&self, params: InstallParams) -> Result<InstalledBrowser, BrowserInstallerError>;
}

#[derive(Debug, Deserialize)]
struct VersionEntry {
    version: String,
}

#[derive(Debug, Deserialize)]
struct LastKnownGoodVersions {
    channels: HashMap<String, VersionEntry>,
}

#[derive(Debug, Deserialize)]
struct LatestVersionsPerMilestone {
    milestones: HashMap<String, VersionEntry>,
}

#[derive(Debug, Deserialize)]
struct LatestPatchVersionsPerBuild {
    builds: HashMap<String, VersionEntry>,
}

#[derive(Debug, Deserialize)]
struct ChromiumMilestone {
    milestone: u32,
    chromium_main_branch_position: Option<u64>,
}

/// Engine backed by the Chrome for Testing endpoints and the Chromium snapshot bucket.
pub struct ChromeForTesting {
    client: ClientWithMiddleware,
    json_base: String,
    download_base: String,
    snapshots_base: String,
    chromium_dash_url: String,
}

impl ChromeForTesting {
    pub fn new(config: &InstallerConfig) -> Self {
        Self::with_client(config, downloader::retrying_client(config.max_retries))
    }

    pub fn with_client(config: &InstallerConfig, client: ClientWithMiddleware) -> Self {
        Self {
            client,
            json_base: config.cft_json_base.trim_end_matches('/').to_string(),
            download_base: config.cft_download_base.trim_end_matches('/').to_string(),
            snapshots_base: config.chromium_snapshots_base.trim_end_matches('/').to_string(),
            chromium_dash_url: config.chromium_dash_url.clone(),
        }
    }

    /// URL of the zip archive for `params`.
    pub fn download_url(&self, params: &InstallParams) -> Result<String, BrowserInstallerError> {
        if params.browser == BrowserName::Chromium {
            return Ok(format!(
                "{}/{}/{}/{}.zip",
                self.snapshots_base,
                params.platform.chromium_snapshot_folder(),
                params.build_id,
                params.platform.chromium_archive(),
            ));
        }
        let folder = cft_folder(params.platform)?;
        Ok(format!(
            "{}/{}/{}/{}-{}.zip",
            self.download_base, params.build_id, folder, params.browser, folder,
        ))
    }

    async fn resolve_chrome_build_id(
        &self,
        browser: BrowserName,
        platform: BrowserPlatform,
        version: &str,
    ) -> Result<String, BrowserInstallerError> {
        let not_found = || BrowserInstallerError::BuildIdNotFound {
            browser: browser.to_string(),
            version: version.to_string(),
            platform: platform.to_string(),
        };

        let parts: Vec<&str> = version.split('.').collect();
        if is_version_tag(version) {
            let url = format!("{}/last-known-good-versions.json", self.json_base);
            let data: LastKnownGoodVersions = downloader::fetch_json(&self.client, &url).await?;
            return data.channels.get("Stable").map(|e| e.version.clone()).ok_or_else(not_found);
        }
        if parts.iter().any(|p| p.parse::<u32>().is_err()) {
            return Err(not_found());
        }

        match parts.len() {
            4 => Ok(version.to_string()),
            3 => {
                let url = format!("{}/latest-patch-versions-per-build.json", self.json_base);
                let data: LatestPatchVersionsPerBuild = downloader::fetch_json(&self.client, &url).await?;
                data.builds.get(version).map(|e| e.version.clone()).ok_or_else(not_found)
            }
            1 => {
                let url = format!("{}/latest-versions-per-milestone.json", self.json_base);
                let data: LatestVersionsPerMilestone = downloader::fetch_json(&self.client, &url).await?;
                data.milestones.get(version).map(|e| e.version.clone()).ok_or_else(not_found)
            }
            _ => Err(not_found()),
        }
    }

    async fn resolve_chromium_build_id(
        &self,
        platform: BrowserPlatform,
        version: &str,
    ) -> Result<String, BrowserInstallerError> {
        let milestone = crate::version::get_milestone(version)?;
        // Values larger than any milestone are already snapshot revisions.
        if !version.contains('.') && milestone > 10_000 {
            return Ok(version.to_string());
        }

        let milestones: Vec<ChromiumMilestone> =
            downloader::fetch_json(&self.client, &self.chromium_dash_url).await?;
        milestones
            .into_iter()
            .find(|m| m.milestone == milestone)
            .and_then(|m| m.chromium_main_branch_position)
            .map(|position| position.to_string())
            .ok_or_else(|| BrowserInstallerError::BuildIdNotFound {
                browser: BrowserName::Chromium.to_string(),
                version: version.to_string(),
                platform: platform.to_string(),
            })
    }
}

#[async_trait]
impl BrowserEngine for ChromeForTesting {
    async fn resolve_build_id(
        &self,
        browser: BrowserName,
        platform: BrowserPlatform,
        version: &str,
    ) -> Result<String, BrowserInstallerError> {
        if browser == BrowserName::Chromium {
            self.resolve_chromium_build_id(platform, version).await
        } else {
            self.resolve_chrome_build_id(browser, platform, version).await
        }
    }

    async fn can_download(&self, params: &InstallParams) -> Result<bool, BrowserInstallerError> {
        let url = self.download_url(params)?;
        let available = downloader::url_exists(&self.client, &url).await?;
        debug!(%url, available, "probed archive");
        Ok(available)
    }

    async fn install(&self, params: InstallParams) -> Result<InstalledBrowser, BrowserInstallerError> {
        let install_dir = params.install_dir();
        let relative = relative_executable_path(params.browser, params.platform)?;
        let existing = install_dir.join(&relative);
        if existing.is_file() {
            debug!(path = %existing.display(), "build already unpacked");
            return Ok(InstalledBrowser { executable_path: existing });
        }

        let url = self.download_url(&params)?;
        debug!(%url, dir = %install_dir.display(), "downloading {}@{}", params.browser, params.build_id);
        let executable_path =
            downloader::download_and_unzip(&self.client, &url, &install_dir, &relative, params.progress.clone())
                .await?;
        downloader::ensure_executable(&executable_path)?;

        Ok(InstalledBrowser { executable_path })
    }
}

fn cft_folder(platform: BrowserPlatform) -> Result<&'static str, BrowserInstallerError> {
    platform
        .chrome_for_testing_folder()
        .ok_or_else(|| BrowserInstallerError::UnsupportedPlatform(platform.to_string()))
}

/// Location of the executable inside an unpacked archive.
pub fn relative_executable_path(
    browser: BrowserName,
    platform: BrowserPlatform,
) -> Result<PathBuf, BrowserInstallerError> {
    if browser == BrowserName::Chromium {
        let archive = platform.chromium_archive();
        let path = if platform.is_mac() {
            Path::new(archive).join("Chromium.app/Contents/MacOS/Chromium")
        } else if platform.is_windows() {
            Path::new(archive).join("chrome.exe")
        } else {
            Path::new(archive).join("chrome")
        };
        return Ok(path);
    }

    let folder = format!("{}-{}", browser, cft_folder(platform)?);
    let dir = Path::new(&folder);
    let path = match browser {
        BrowserName::Chrome if platform.is_mac() => dir.join(
            "Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
        ),
        BrowserName::Chrome if platform.is_windows() => dir.join("chrome.exe"),
        BrowserName::Chrome => dir.join("chrome"),
        _ if platform.is_windows() => dir.join(format!("{}.exe", browser)),
        _ => dir.join(browser.as_str()),
    };
    Ok(path)
}
