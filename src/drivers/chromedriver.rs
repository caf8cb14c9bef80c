//! ChromeDriver installation.
//!
//! Drivers for milestones served by Chrome for Testing go through the same
//! engine as the browser. Older milestones come from the legacy
//! `chromedriver.storage.googleapis.com` bucket.

use crate::browser::BrowserName;
use crate::chrome::acquire;
use crate::config::InstallerConfig;
use crate::downloader::{self, download_and_unzip};
use crate::drivers::DriverInstaller;
use crate::engine::BrowserEngine;
use crate::error::BrowserInstallerError;
use crate::platform::BrowserPlatform;
use crate::registry::{InstallFn, Registry};
use crate::version::{get_milestone, is_version_tag};
use async_trait::async_trait;
use futures::FutureExt;
use reqwest_middleware::ClientWithMiddleware;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Installs and verifies ChromeDriver.
pub struct ChromeDriver {
    registry: Arc<dyn Registry>,
    engine: Arc<dyn BrowserEngine>,
    client: ClientWithMiddleware,
    platform: BrowserPlatform,
    browsers_dir: PathBuf,
    min_chrome_for_testing_version: u32,
    legacy_base: String,
}

impl ChromeDriver {
    pub fn new(
        config: &InstallerConfig,
        platform: BrowserPlatform,
        registry: Arc<dyn Registry>,
        engine: Arc<dyn BrowserEngine>,
    ) -> Self {
        Self {
            registry,
            engine,
            client: downloader::retrying_client(config.max_retries),
            platform,
            browsers_dir: config.browsers_dir.clone(),
            min_chrome_for_testing_version: config.min_chrome_for_testing_version,
            legacy_base: config.chromedriver_legacy_base.trim_end_matches('/').to_string(),
        }
    }

    /// Drivers for milestones before Chrome for Testing.
    async fn install_legacy_driver(&self, milestone: u32, force: bool) -> Result<PathBuf, BrowserInstallerError> {
        let requested = milestone.to_string();
        if !force {
            if let Some(existing) = self
                .registry
                .matched_browser_version(BrowserName::ChromeDriver, self.platform, Some(&requested))
                .await
            {
                debug!(milestone, "a locally installed chromedriver was found, skipping the installation");
                return self.registry.binary_path(BrowserName::ChromeDriver, self.platform, &existing).await;
            }
        }

        let suffix = self
            .platform
            .legacy_chromedriver_suffix()
            .ok_or_else(|| BrowserInstallerError::UnsupportedPlatform(self.platform.to_string()))?;
        let release_url = format!("{}/LATEST_RELEASE_{}", self.legacy_base, milestone);
        let driver_version = downloader::fetch_text(&self.client, &release_url).await?.trim().to_string();
        if driver_version.is_empty() {
            return Err(BrowserInstallerError::VersionNotInstallable {
                browser: BrowserName::ChromeDriver.to_string(),
                version: requested,
            });
        }

        let url = format!("{}/{}/chromedriver_{}.zip", self.legacy_base, driver_version, suffix);
        let install_dir = self
            .browsers_dir
            .join(BrowserName::ChromeDriver.as_str())
            .join(format!("{}-{}", self.platform, driver_version));
        let executable = PathBuf::from(executable_name(self.platform));
        let client = self.client.clone();

        let install: InstallFn = Box::new(move |progress| {
            async move {
                let existing = install_dir.join(&executable);
                if existing.is_file() {
                    return Ok(existing);
                }
                let path = download_and_unzip(&client, &url, &install_dir, &executable, Some(progress)).await?;
                downloader::ensure_executable(&path)?;
                Ok(path)
            }
            .boxed()
        });

        self.registry
            .install_binary(BrowserName::ChromeDriver, self.platform, &driver_version, install)
            .await
    }
}

#[async_trait]
impl DriverInstaller for ChromeDriver {
    fn driver_name(&self) -> &str {
        "chromedriver"
    }

    async fn install_driver(&self, browser_version: &str, force: bool) -> Result<PathBuf, BrowserInstallerError> {
        let legacy_milestone = if is_version_tag(browser_version) {
            None
        } else {
            Some(get_milestone(browser_version)?).filter(|m| *m < self.min_chrome_for_testing_version)
        };

        let driver_path = if let Some(milestone) = legacy_milestone {
            self.install_legacy_driver(milestone, force).await?
        } else {
            acquire(
                self.registry.as_ref(),
                &self.engine,
                self.platform,
                &self.browsers_dir,
                BrowserName::ChromeDriver,
                browser_version,
                force,
            )
            .await?
        };

        verify_driver(&driver_path).await?;
        Ok(driver_path)
    }
}

fn executable_name(platform: BrowserPlatform) -> &'static str {
    if platform.is_windows() {
        "chromedriver.exe"
    } else {
        "chromedriver"
    }
}

/// Verifies the driver is working by running `--version`.
pub async fn verify_driver(driver_path: &Path) -> Result<(), BrowserInstallerError> {

    let mut command = tokio::process::Command::new(driver_path);
    command.arg("--version");

    let output = command
        .output()
        .await
        .map_err(|e| BrowserInstallerError::CommandExecutionError {
            command: format!("{:?}", command),
            source: e,
        })?;

    if !output.status.success() {
        return Err(BrowserInstallerError::VerificationError(
            "Driver process exited with a non-zero status.".to_string(),
        ));
    }

    let stdout = String::from_utf8(output.stdout).map_err(|e| {
        BrowserInstallerError::CommandOutputParsingError {
            command: format!("{:?}", command),
            source: e,
        }
    })?;

    if !stdout.contains("ChromeDriver") {
        return Err(BrowserInstallerError::VerificationError(format!(
            "Unexpected output during verification: {}",
            stdout.trim()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ChromeForTesting;
    use crate::registry::LocalRegistry;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[cfg(unix)]
    fn fake_driver_zip(entry: &str) -> Vec<u8> {
        crate::downloader::tests::zip_bytes(&[(entry, b"#!/bin/sh\necho 'ChromeDriver 112.0.5615.49 (abc)'\n")])
    }

    async fn driver_for(server: &MockServer, dir: &Path) -> ChromeDriver {
        let mut config = InstallerConfig::with_browsers_dir(dir);
        config.cft_json_base = server.uri();
        config.cft_download_base = format!("{}/dl", server.uri());
        config.chromedriver_legacy_base = format!("{}/legacy", server.uri());
        config.max_retries = 0;
        let registry = Arc::new(LocalRegistry::open(&config).await.unwrap());
        let engine = Arc::new(ChromeForTesting::new(&config));
        ChromeDriver::new(&config, BrowserPlatform::Linux, registry, engine)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn installs_legacy_driver_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/legacy/LATEST_RELEASE_112"))
            .respond_with(ResponseTemplate::new(200).set_body_string("112.0.5615.49\n"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/legacy/112.0.5615.49/chromedriver_linux64.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(fake_driver_zip("chromedriver")))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let driver = driver_for(&server, dir.path()).await;

        let first = driver.install_driver("112", false).await.unwrap();
        let second = driver.install_driver("112.0.5615.49", false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first,
            dir.path().join("chromedriver/linux-112.0.5615.49/chromedriver")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn installs_chrome_for_testing_driver() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/dl/120.0.6099.109/linux64/chromedriver-linux64.zip"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dl/120.0.6099.109/linux64/chromedriver-linux64.zip"))
            .respond_with(
                ResponseTemplate::new(200).set_body_bytes(fake_driver_zip("chromedriver-linux64/chromedriver")),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let driver = driver_for(&server, dir.path()).await;
        let path = driver.install_driver("120.0.6099.109", false).await.unwrap();

        assert!(path.ends_with("chromedriver/linux-120.0.6099.109/chromedriver-linux64/chromedriver"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn latest_tag_installs_current_stable_driver() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/last-known-good-versions.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"timestamp":"x","channels":{"Stable":{"channel":"Stable","version":"131.0.6778.85","revision":"3"}}}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/dl/131.0.6778.85/linux64/chromedriver-linux64.zip"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dl/131.0.6778.85/linux64/chromedriver-linux64.zip"))
            .respond_with(
                ResponseTemplate::new(200).set_body_bytes(fake_driver_zip("chromedriver-linux64/chromedriver")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let driver = driver_for(&server, dir.path()).await;
        let first = driver.install_driver("latest", false).await.unwrap();
        let second = driver.install_driver("latest", false).await.unwrap();

        assert_eq!(first, second);
        assert!(first.ends_with("chromedriver/linux-131.0.6778.85/chromedriver-linux64/chromedriver"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rejects_binary_that_is_not_chromedriver() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("not-a-driver");
        std::fs::write(&fake, "#!/bin/sh\necho 'Google Chrome 120'\n").unwrap();
        downloader::ensure_executable(&fake).unwrap();

        assert!(matches!(
            verify_driver(&fake).await,
            Err(BrowserInstallerError::VerificationError(_))
        ));
    }

    #[tokio::test]
    async fn missing_binary_fails_to_execute() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            verify_driver(&dir.path().join("missing")).await,
            Err(BrowserInstallerError::CommandExecutionError { .. })
        ));
    }
}
