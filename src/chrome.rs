//! Installing Chrome for Testing builds and resolving the latest stable version.

use crate::browser::BrowserName;
use crate::chromium::{ChromiumInstaller, LegacyInstaller};
use crate::config::InstallerConfig;
use crate::downloader::{self, DownloadProgressCallback};
use crate::drivers::DriverInstaller;
use crate::drivers::chromedriver::ChromeDriver;
use crate::engine::{BrowserEngine, ChromeForTesting, InstallParams};
use crate::error::BrowserInstallerError;
use crate::platform::BrowserPlatform;
use crate::registry::{InstallFn, LocalRegistry, Registry};
use crate::ubuntu_packages::{PackageInstaller, UbuntuPackages};
use crate::version::{get_milestone, is_version_tag, normalize_chrome_version};
use async_trait::async_trait;
use futures::FutureExt;
use reqwest_middleware::ClientWithMiddleware;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Which optional steps [`ChromeInstaller::install_chrome`] runs besides the browser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// Reinstall even when the registry already has a matching build.
    pub force: bool,
    /// Also install the matching ChromeDriver.
    pub need_web_driver: bool,
    /// Also install the OS libraries Chrome needs (Ubuntu only).
    pub need_ubuntu_packages: bool,
}

/// Where the latest stable version string comes from.
#[async_trait]
pub trait LatestVersionSource: Send + Sync {
    async fn fetch_latest(&self) -> Result<String, BrowserInstallerError>;
}

/// Fetches a plain-text version from a URL with retries.
pub struct RetryingFetcher {
    client: ClientWithMiddleware,
    url: String,
}

impl RetryingFetcher {
    pub fn new(url: impl Into<String>, max_retries: u32) -> Self {
        Self {
            client: downloader::retrying_client(max_retries),
            url: url.into(),
        }
    }
}

#[async_trait]
impl LatestVersionSource for RetryingFetcher {
    async fn fetch_latest(&self) -> Result<String, BrowserInstallerError> {
        let body = downloader::fetch_text(&self.client, &self.url).await?;
        Ok(body.trim().to_string())
    }
}

/// Collaborators of a [`ChromeInstaller`]; every one can be swapped out.
pub struct InstallerParts {
    pub config: InstallerConfig,
    pub platform: BrowserPlatform,
    pub registry: Arc<dyn Registry>,
    pub engine: Arc<dyn BrowserEngine>,
    pub legacy: Arc<dyn LegacyInstaller>,
    pub driver: Arc<dyn DriverInstaller>,
    pub packages: Arc<dyn PackageInstaller>,
    pub latest_source: Arc<dyn LatestVersionSource>,
}

/// Installs Chrome for Testing browsers, their drivers and OS packages into a shared cache.
pub struct ChromeInstaller {
    config: InstallerConfig,
    platform: BrowserPlatform,
    registry: Arc<dyn Registry>,
    engine: Arc<dyn BrowserEngine>,
    legacy: Arc<dyn LegacyInstaller>,
    driver: Arc<dyn DriverInstaller>,
    packages: Arc<dyn PackageInstaller>,
    latest_source: Arc<dyn LatestVersionSource>,
    latest: OnceCell<String>,
    latest_forced: OnceCell<String>,
}

impl ChromeInstaller {
    /// Wires the default collaborators for the current platform.
    pub async fn new(config: InstallerConfig) -> Result<Self, BrowserInstallerError> {
        let platform = BrowserPlatform::current()?;
        let registry: Arc<dyn Registry> = Arc::new(LocalRegistry::open(&config).await?);
        let engine: Arc<dyn BrowserEngine> = Arc::new(ChromeForTesting::new(&config));

        let legacy = Arc::new(ChromiumInstaller::new(
            registry.clone(),
            engine.clone(),
            platform,
            config.browsers_dir.clone(),
            config.chromium_revision_search_limit,
        ));
        let driver = Arc::new(ChromeDriver::new(&config, platform, registry.clone(), engine.clone()));
        let latest_source = Arc::new(RetryingFetcher::new(config.latest_stable_url.clone(), config.max_retries));

        Ok(Self::from_parts(InstallerParts {
            config,
            platform,
            registry,
            engine,
            legacy,
            driver,
            packages: Arc::new(UbuntuPackages::default()),
            latest_source,
        }))
    }

    pub fn from_parts(parts: InstallerParts) -> Self {
        Self {
            config: parts.config,
            platform: parts.platform,
            registry: parts.registry,
            engine: parts.engine,
            legacy: parts.legacy,
            driver: parts.driver,
            packages: parts.packages,
            latest_source: parts.latest_source,
            latest: OnceCell::new(),
            latest_forced: OnceCell::new(),
        }
    }

    pub fn platform(&self) -> BrowserPlatform {
        self.platform
    }

    /// Returns the path to a `browser@version` executable, downloading it only
    /// when the registry has no matching build or `force` is set.
    ///
    /// Milestones older than Chrome for Testing are installed as Chromium.
    /// `"latest"` and `"stable"` always resolve to the current stable build.
    pub async fn install_chrome_browser(
        &self,
        browser: BrowserName,
        version: &str,
        force: bool,
    ) -> Result<PathBuf, BrowserInstallerError> {
        if !matches!(browser, BrowserName::Chrome | BrowserName::ChromeHeadlessShell) {
            return Err(BrowserInstallerError::UnsupportedBrowser(browser.to_string()));
        }

        if !is_version_tag(version) && get_milestone(version)? < self.config.min_chrome_for_testing_version {
            debug!("couldn't install {browser}@{version}, installing chromium instead");
            return self.legacy.install_legacy(version, force).await;
        }

        acquire(
            self.registry.as_ref(),
            &self.engine,
            self.platform,
            &self.config.browsers_dir,
            browser,
            version,
            force,
        )
        .await
    }

    /// Installs the browser and, concurrently, the optional driver and OS
    /// packages. Every step runs to completion; all failures are reported.
    pub async fn install_chrome(
        &self,
        browser: BrowserName,
        version: &str,
        options: InstallOptions,
    ) -> Result<PathBuf, BrowserInstallerError> {
        let driver = async {
            if options.need_web_driver {
                self.driver.install_driver(version, options.force).await.map(Some)
            } else {
                Ok(None)
            }
        };
        let packages = async {
            if options.need_ubuntu_packages {
                self.packages.install_packages().await
            } else {
                Ok(())
            }
        };

        let (browser_path, driver_path, packages) = tokio::join!(
            self.install_chrome_browser(browser, version, options.force),
            driver,
            packages,
        );

        let mut errors = Vec::new();
        match driver_path {
            Ok(Some(path)) => debug!(driver = self.driver.driver_name(), path = %path.display(), "driver ready"),
            Ok(None) => {}
            Err(e) => errors.push(e),
        }
        if let Err(e) = packages {
            errors.push(e);
        }
        let browser_path = match browser_path {
            Ok(path) => path,
            Err(e) => {
                errors.insert(0, e);
                PathBuf::new()
            }
        };

        match errors.len() {
            0 => Ok(browser_path),
            1 => Err(errors.remove(0)),
            _ => Err(BrowserInstallerError::Multiple(errors)),
        }
    }

    /// Latest stable Chrome version. Prefers a locally installed build unless
    /// `force` is set. Successful results are cached per `force` value.
    pub async fn resolve_latest_chrome_version(&self, force: bool) -> Result<String, BrowserInstallerError> {
        let cell = if force { &self.latest_forced } else { &self.latest };

        cell.get_or_try_init(|| async {
            if !force {
                if let Some(local) = self
                    .registry
                    .matched_browser_version(BrowserName::Chrome, self.platform, None)
                    .await
                {
                    debug!(version = %local, "using locally installed chrome as latest");
                    return Ok(local);
                }
            }

            self.latest_source
                .fetch_latest()
                .await
                .map_err(|e| BrowserInstallerError::LatestVersionUnresolved { source: Box::new(e) })
        })
        .await
        .cloned()
    }
}

/// Shared install flow for Chrome for Testing binaries: reuse a registered
/// build, otherwise resolve, check availability, download and register.
///
/// Channel tags never match a registry entry directly; they are resolved to a
/// build id first and that build is looked up instead.
pub(crate) async fn acquire(
    registry: &dyn Registry,
    engine: &Arc<dyn BrowserEngine>,
    platform: BrowserPlatform,
    cache_dir: &Path,
    browser: BrowserName,
    version: &str,
    force: bool,
) -> Result<PathBuf, BrowserInstallerError> {
    let tag = is_version_tag(version);
    if !force && !tag {
        if let Some(existing) = registry.matched_browser_version(browser, platform, Some(version)).await {
            debug!("a locally installed {browser}@{version} was found, skipping the installation");
            return registry.binary_path(browser, platform, &existing).await;
        }
    }

    let normalized = if tag { version.trim().to_string() } else { normalize_chrome_version(version) };
    let build_id = engine.resolve_build_id(browser, platform, &normalized).await?;

    if !force && tag {
        if let Some(existing) = registry.matched_browser_version(browser, platform, Some(&build_id)).await {
            debug!("{browser}@{version} resolved to installed build {existing}, skipping the installation");
            return registry.binary_path(browser, platform, &existing).await;
        }
    }

    let params = InstallParams::new(browser, platform, build_id.clone(), cache_dir);

    if !engine.can_download(&params).await? {
        return Err(BrowserInstallerError::VersionNotInstallable {
            browser: browser.to_string(),
            version: version.to_string(),
        });
    }

    info!(%browser, version, %build_id, "downloading");
    let engine = engine.clone();
    let install: InstallFn = Box::new(move |progress: DownloadProgressCallback| {
        async move {
            let installed = engine.install(params.with_progress(progress)).await?;
            Ok(installed.executable_path)
        }
        .boxed()
    });

    registry.install_binary(browser, platform, &build_id, install).await
}

static DEFAULT_INSTALLER: OnceCell<ChromeInstaller> = OnceCell::const_new();

/// The process-wide installer built from [`InstallerConfig::from_env`].
pub async fn default_installer() -> Result<&'static ChromeInstaller, BrowserInstallerError> {
    DEFAULT_INSTALLER
        .get_or_try_init(|| ChromeInstaller::new(InstallerConfig::from_env()))
        .await
}

/// [`ChromeInstaller::install_chrome`] on the process-wide installer.
pub async fn install_chrome(
    browser: BrowserName,
    version: &str,
    options: InstallOptions,
) -> Result<PathBuf, BrowserInstallerError> {
    default_installer().await?.install_chrome(browser, version, options).await
}

/// [`ChromeInstaller::resolve_latest_chrome_version`] on the process-wide installer.
pub async fn resolve_latest_chrome_version(force: bool) -> Result<String, BrowserInstallerError> {
    default_installer().await?.resolve_latest_chrome_version(force).await
}
