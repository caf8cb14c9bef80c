//! Chromium snapshots for milestones that predate Chrome for Testing.

use crate::browser::BrowserName;
use crate::engine::{BrowserEngine, InstallParams};
use crate::error::BrowserInstallerError;
use crate::platform::BrowserPlatform;
use crate::registry::{InstallFn, Registry};
use crate::version::get_milestone;
use async_trait::async_trait;
use futures::FutureExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Acquisition path used for versions below the Chrome for Testing minimum.
#[async_trait]
pub trait LegacyInstaller: Send + Sync {
    async fn install_legacy(&self, version: &str, force: bool) -> Result<PathBuf, BrowserInstallerError>;
}

pub struct ChromiumInstaller {
    registry: Arc<dyn Registry>,
    engine: Arc<dyn BrowserEngine>,
    platform: BrowserPlatform,
    browsers_dir: PathBuf,
    search_limit: u32,
}

impl ChromiumInstaller {
    pub fn new(
        registry: Arc<dyn Registry>,
        engine: Arc<dyn BrowserEngine>,
        platform: BrowserPlatform,
        browsers_dir: PathBuf,
        search_limit: u32,
    ) -> Self {
        Self {
            registry,
            engine,
            platform,
            browsers_dir,
            search_limit: search_limit.max(1),
        }
    }

    /// Snapshots are not published for every revision; walk down from the
    /// branch position until one is.
    async fn find_downloadable_revision(&self, position: &str) -> Result<Option<String>, BrowserInstallerError> {
        let Ok(position) = position.parse::<u64>() else {
            return Ok(None);
        };

        for offset in 0..u64::from(self.search_limit) {
            let Some(revision) = position.checked_sub(offset) else {
                break;
            };
            let params = InstallParams::new(
                BrowserName::Chromium,
                self.platform,
                revision.to_string(),
                self.browsers_dir.clone(),
            );
            if self.engine.can_download(&params).await? {
                return Ok(Some(revision.to_string()));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl LegacyInstaller for ChromiumInstaller {
    async fn install_legacy(&self, version: &str, force: bool) -> Result<PathBuf, BrowserInstallerError> {
        let milestone = get_milestone(version)?.to_string();

        if !force {
            if let Some(existing) = self
                .registry
                .matched_browser_version(BrowserName::Chromium, self.platform, Some(&milestone))
                .await
            {
                debug!(version, "a locally installed chromium was found, skipping the installation");
                return self.registry.binary_path(BrowserName::Chromium, self.platform, &existing).await;
            }
        }

        let position = self
            .engine
            .resolve_build_id(BrowserName::Chromium, self.platform, version)
            .await?;
        let revision = self
            .find_downloadable_revision(&position)
            .await?
            .ok_or_else(|| BrowserInstallerError::VersionNotInstallable {
                browser: BrowserName::Chromium.to_string(),
                version: version.to_string(),
            })?;
        debug!(version, %revision, "resolved chromium snapshot");

        let engine = self.engine.clone();
        let params = InstallParams::new(BrowserName::Chromium, self.platform, revision, self.browsers_dir.clone());
        let install: InstallFn = Box::new(move |progress| {
            async move {
                let installed = engine.install(params.with_progress(progress)).await?;
                Ok(installed.executable_path)
            }
            .boxed()
        });

        // Recorded by milestone: snapshots carry no version number of their own.
        self.registry
            .install_binary(BrowserName::Chromium, self.platform, &milestone, install)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InstalledBrowser;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeRegistry {
        entries: Mutex<HashMap<String, PathBuf>>,
    }

    #[async_trait]
    impl Registry for FakeRegistry {
        async fn matched_browser_version(
            &self,
            _browser: BrowserName,
            _platform: BrowserPlatform,
            version: Option<&str>,
        ) -> Option<String> {
            let entries = self.entries.lock();
            version.and_then(|v| entries.contains_key(v).then(|| v.to_string()))
        }

        async fn binary_path(
            &self,
            _browser: BrowserName,
            _platform: BrowserPlatform,
            build_id: &str,
        ) -> Result<PathBuf, BrowserInstallerError> {
            Ok(self.entries.lock()[build_id].clone())
        }

        async fn install_binary(
            &self,
            _browser: BrowserName,
            _platform: BrowserPlatform,
            build_id: &str,
            install: InstallFn,
        ) -> Result<PathBuf, BrowserInstallerError> {
            let path = install(Arc::new(|_, _| {})).await?;
            self.entries.lock().insert(build_id.to_string(), path.clone());
            Ok(path)
        }
    }

    /// Publishes snapshots only for revisions in `available`.
    struct SnapshotEngine {
        available: Vec<String>,
        installed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BrowserEngine for SnapshotEngine {
        async fn resolve_build_id(
            &self,
            _browser: BrowserName,
            _platform: BrowserPlatform,
            _version: &str,
        ) -> Result<String, BrowserInstallerError> {
            Ok("1000".to_string())
        }

        async fn can_download(&self, params: &InstallParams) -> Result<bool, BrowserInstallerError> {
            Ok(self.available.contains(&params.build_id))
        }

        async fn install(&self, params: InstallParams) -> Result<InstalledBrowser, BrowserInstallerError> {
            self.installed.lock().push(params.build_id.clone());
            Ok(InstalledBrowser {
                executable_path: params.install_dir().join("chrome"),
            })
        }
    }

    fn installer(available: &[&str]) -> (ChromiumInstaller, Arc<SnapshotEngine>) {
        let engine = Arc::new(SnapshotEngine {
            available: available.iter().map(|s| s.to_string()).collect(),
            installed: Mutex::new(Vec::new()),
        });
        let installer = ChromiumInstaller::new(
            Arc::new(FakeRegistry::default()),
            engine.clone(),
            BrowserPlatform::Linux,
            PathBuf::from("/cache"),
            5,
        );
        (installer, engine)
    }

    #[tokio::test]
    async fn walks_down_to_nearest_snapshot() {
        let (installer, engine) = installer(&["997", "990"]);
        let path = installer.install_legacy("112.0", false).await.unwrap();

        assert_eq!(path, PathBuf::from("/cache/chromium/linux-997/chrome"));
        assert_eq!(*engine.installed.lock(), vec!["997".to_string()]);
    }

    #[tokio::test]
    async fn fails_when_no_snapshot_within_limit() {
        let (installer, engine) = installer(&["990"]);
        let err = installer.install_legacy("112", false).await.unwrap_err();

        match err {
            BrowserInstallerError::VersionNotInstallable { version, .. } => assert_eq!(version, "112"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(engine.installed.lock().is_empty());
    }

    #[tokio::test]
    async fn reuses_installed_milestone_unless_forced() {
        let (installer, engine) = installer(&["1000"]);
        installer.install_legacy("112", false).await.unwrap();
        installer.install_legacy("112.0.5615.49", false).await.unwrap();
        assert_eq!(engine.installed.lock().len(), 1);

        installer.install_legacy("112", true).await.unwrap();
        assert_eq!(engine.installed.lock().len(), 2);
    }
}
