pub mod chromedriver;

use crate::error::BrowserInstallerError;
use async_trait::async_trait;
use std::path::PathBuf;

#[async_trait]
pub trait DriverInstaller: Send + Sync {

    /// Gets the name of the driver (e.g., "chromedriver").
    fn driver_name(&self) -> &str;

    /// Installs the driver matching `browser_version` and returns its path.
    /// A cached driver is reused unless `force` is set.
    async fn install_driver(&self, browser_version: &str, force: bool) -> Result<PathBuf, BrowserInstallerError>;
}
