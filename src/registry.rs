//! On-disk record of installed binaries.
//!
//! The registry maps `(browser, platform, build id)` to the executable that was
//! unpacked for it and persists that map as `registry.json` in the browsers
//! directory. Concurrent installs of the same triple inside one process share
//! a single download.

use crate::browser::BrowserName;
use crate::config::InstallerConfig;
use crate::downloader::DownloadProgressCallback;
use crate::error::BrowserInstallerError;
use crate::platform::BrowserPlatform;
use crate::version::{compare_versions, version_matches};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

/// Performs the actual download; receives a callback to report progress to.
pub type InstallFn = Box<
    dyn FnOnce(DownloadProgressCallback) -> BoxFuture<'static, Result<PathBuf, BrowserInstallerError>>
        + Send,
>;

#[async_trait]
pub trait Registry: Send + Sync {
    /// Highest installed build matching `version`, or the highest installed
    /// build at all when `version` is `None`.
    async fn matched_browser_version(
        &self,
        browser: BrowserName,
        platform: BrowserPlatform,
        version: Option<&str>,
    ) -> Option<String>;

    async fn binary_path(
        &self,
        browser: BrowserName,
        platform: BrowserPlatform,
        build_id: &str,
    ) -> Result<PathBuf, BrowserInstallerError>;

    /// Runs `install` and records its result under `build_id`.
    async fn install_binary(
        &self,
        browser: BrowserName,
        platform: BrowserPlatform,
        build_id: &str,
        install: InstallFn,
    ) -> Result<PathBuf, BrowserInstallerError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    binaries: BTreeMap<String, BTreeMap<String, PathBuf>>,
}

fn registry_key(browser: BrowserName, platform: BrowserPlatform) -> String {
    format!("{}_{}", browser, platform)
}

pub struct LocalRegistry {
    browsers_dir: PathBuf,
    registry_path: PathBuf,
    state: Mutex<RegistryFile>,
    in_flight: parking_lot::Mutex<HashMap<String, Arc<OnceCell<PathBuf>>>>,
}

impl LocalRegistry {
    /// Loads `registry.json` from the configured browsers directory. A missing
    /// file is an empty registry; an unreadable one is discarded with a warning.
    pub async fn open(config: &InstallerConfig) -> Result<Self, BrowserInstallerError> {
        let browsers_dir = config.browsers_dir.clone();
        let registry_path = config.registry_path();

        let state = match tokio::fs::read_to_string(&registry_path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %registry_path.display(), error = %e, "ignoring corrupt registry");
                RegistryFile::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RegistryFile::default(),
            Err(e) => {
                return Err(BrowserInstallerError::IoError {
                    path: registry_path,
                    source: e,
                });
            }
        };

        Ok(Self {
            browsers_dir,
            registry_path,
            state: Mutex::new(state),
            in_flight: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    fn resolve_stored(&self, stored: &Path) -> PathBuf {
        if stored.is_absolute() {
            stored.to_path_buf()
        } else {
            self.browsers_dir.join(stored)
        }
    }

    async fn record(
        &self,
        browser: BrowserName,
        platform: BrowserPlatform,
        build_id: &str,
        executable: &Path,
    ) -> Result<(), BrowserInstallerError> {
        let executable = dunce::simplified(executable);
        let stored = executable
            .strip_prefix(dunce::simplified(&self.browsers_dir))
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| executable.to_path_buf());

        let mut state = self.state.lock().await;
        state
            .binaries
            .entry(registry_key(browser, platform))
            .or_default()
            .insert(build_id.to_string(), stored);
        let content = serde_json::to_string_pretty(&*state).map_err(|e| BrowserInstallerError::JsonParseError {
            url: self.registry_path.display().to_string(),
            source: e,
        })?;

        // Held across the write so concurrent records land in order.
        let browsers_dir = self.browsers_dir.clone();
        let registry_path = self.registry_path.clone();
        tokio::task::spawn_blocking(move || persist(&browsers_dir, &registry_path, &content)).await?
    }
}

/// Writes the registry through a temporary file so readers never see a
/// partially written file.
fn persist(browsers_dir: &Path, registry_path: &Path, content: &str) -> Result<(), BrowserInstallerError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |e: std::io::Error| BrowserInstallerError::IoError { path, source: e }
    };

    std::fs::create_dir_all(browsers_dir).map_err(io_err(browsers_dir))?;
    let mut file = tempfile::NamedTempFile::new_in(browsers_dir).map_err(io_err(browsers_dir))?;
    file.write_all(content.as_bytes()).map_err(io_err(file.path()))?;
    file.persist(registry_path)
        .map_err(|e| io_err(registry_path)(e.error))?;
    Ok(())
}

#[async_trait]
impl Registry for LocalRegistry {
    async fn matched_browser_version(
        &self,
        browser: BrowserName,
        platform: BrowserPlatform,
        version: Option<&str>,
    ) -> Option<String> {
        let mut candidates: Vec<(String, PathBuf)> = {
            let state = self.state.lock().await;
            state
                .binaries
                .get(&registry_key(browser, platform))?
                .iter()
                .filter(|(build_id, _)| version.is_none_or(|v| version_matches(build_id, v)))
                .map(|(build_id, stored)| (build_id.clone(), self.resolve_stored(stored)))
                .collect()
        };
        candidates.sort_by(|(a, _), (b, _)| compare_versions(b, a));

        for (build_id, path) in candidates {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Some(build_id);
            }
        }
        None
    }

    async fn binary_path(
        &self,
        browser: BrowserName,
        platform: BrowserPlatform,
        build_id: &str,
    ) -> Result<PathBuf, BrowserInstallerError> {
        let state = self.state.lock().await;
        state
            .binaries
            .get(&registry_key(browser, platform))
            .and_then(|builds| builds.get(build_id))
            .map(|stored| self.resolve_stored(stored))
            .ok_or_else(|| BrowserInstallerError::NotInRegistry {
                browser: browser.to_string(),
                platform: platform.to_string(),
                build_id: build_id.to_string(),
            })
    }

    async fn install_binary(
        &self,
        browser: BrowserName,
        platform: BrowserPlatform,
        build_id: &str,
        install: InstallFn,
    ) -> Result<PathBuf, BrowserInstallerError> {
        let key = format!("{}_{}", registry_key(browser, platform), build_id);
        let cell = self
            .in_flight
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_try_init(|| async move {
                info!(%browser, %platform, build_id, "installing");
                let path = install(logging_progress(browser, build_id)).await?;
                self.record(browser, platform, build_id, &path).await?;
                info!(%browser, build_id, path = %path.display(), "installed");
                Ok::<_, BrowserInstallerError>(path)
            })
            .await
            .cloned();

        let mut in_flight = self.in_flight.lock();
        if in_flight.get(&key).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
            in_flight.remove(&key);
        }

        result
    }
}

/// Progress callback that logs every ten percent of a download.
fn logging_progress(browser: BrowserName, build_id: &str) -> DownloadProgressCallback {
    let build_id = build_id.to_string();
    let last_decile = AtomicU64::new(0);
    Arc::new(move |done, total| {
        let Some(total) = total.filter(|t| *t > 0) else {
            return;
        };
        let decile = done * 10 / total;
        if last_decile.fetch_max(decile, Ordering::Relaxed) < decile {
            debug!(%browser, build_id = %build_id, "downloaded {}%", decile * 10);
        }
    })
}
