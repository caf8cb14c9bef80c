
// Top-level public modules
pub mod browser;
pub mod chrome;
pub mod chromium;
pub mod config;
pub mod downloader;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod platform;
pub mod registry;
pub mod ubuntu_packages;
pub mod version;

pub use browser::BrowserName;
pub use chrome::{
    ChromeInstaller, InstallOptions, InstallerParts, install_chrome, resolve_latest_chrome_version,
};
pub use config::InstallerConfig;
pub use error::BrowserInstallerError;
pub use platform::BrowserPlatform;
