//! Installer configuration: where binaries are cached and which endpoints are used.

use serde::Deserialize;
use std::path::PathBuf;

/// Environment variable overriding the browsers cache directory.
pub const BROWSERS_DIR_ENV: &str = "BROWSERS_DIR";

/// First milestone published through Chrome for Testing.
pub const MIN_CHROME_FOR_TESTING_VERSION: u32 = 113;

pub const CHROME_FOR_TESTING_LATEST_STABLE_API_URL: &str =
    "https://googlechromelabs.github.io/chrome-for-testing/LATEST_RELEASE_STABLE";

const CHROME_FOR_TESTING_JSON_BASE: &str = "https://googlechromelabs.github.io/chrome-for-testing";
const CHROME_FOR_TESTING_DOWNLOAD_BASE: &str =
    "https://storage.googleapis.com/chrome-for-testing-public";
const CHROMIUM_SNAPSHOTS_BASE: &str = "https://storage.googleapis.com/chromium-browser-snapshots";
const CHROMIUM_DASH_MILESTONES_URL: &str =
    "https://chromiumdash.appspot.com/fetch_milestones?only_branched=true";
const CHROMEDRIVER_LEGACY_BASE: &str = "https://chromedriver.storage.googleapis.com";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct InstallerConfig {
    /// Root of the local cache; binaries and `registry.json` live here.
    pub browsers_dir: PathBuf,
    /// Milestones below this are installed as Chromium snapshots.
    pub min_chrome_for_testing_version: u32,
    pub latest_stable_url: String,
    pub cft_json_base: String,
    pub cft_download_base: String,
    pub chromium_snapshots_base: String,
    pub chromium_dash_url: String,
    pub chromedriver_legacy_base: String,
    /// Retries for transient HTTP failures.
    pub max_retries: u32,
    /// How many revisions below a branch position are probed for a snapshot.
    pub chromium_revision_search_limit: u32,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            browsers_dir: default_browsers_dir(),
            min_chrome_for_testing_version: MIN_CHROME_FOR_TESTING_VERSION,
            latest_stable_url: CHROME_FOR_TESTING_LATEST_STABLE_API_URL.to_string(),
            cft_json_base: CHROME_FOR_TESTING_JSON_BASE.to_string(),
            cft_download_base: CHROME_FOR_TESTING_DOWNLOAD_BASE.to_string(),
            chromium_snapshots_base: CHROMIUM_SNAPSHOTS_BASE.to_string(),
            chromium_dash_url: CHROMIUM_DASH_MILESTONES_URL.to_string(),
            chromedriver_legacy_base: CHROMEDRIVER_LEGACY_BASE.to_string(),
            max_retries: 3,
            chromium_revision_search_limit: 16,
        }
    }
}

impl InstallerConfig {
    /// Default configuration with `BROWSERS_DIR` applied when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dir) = std::env::var_os(BROWSERS_DIR_ENV).filter(|v| !v.is_empty()) {
            config.browsers_dir = PathBuf::from(dir);
        }
        config
    }

    /// Configuration rooted at `dir`, everything else default.
    pub fn with_browsers_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            browsers_dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn registry_path(&self) -> PathBuf {
        self.browsers_dir.join("registry.json")
    }
}

fn default_browsers_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("browser-installer")
}
