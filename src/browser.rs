//! The closed set of binaries this crate knows how to install.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BrowserName {
    Chrome,
    ChromeHeadlessShell,
    Chromium,
    #[serde(rename = "chromedriver")]
    ChromeDriver,
}

impl BrowserName {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserName::Chrome => "chrome",
            BrowserName::ChromeHeadlessShell => "chrome-headless-shell",
            BrowserName::Chromium => "chromium",
            BrowserName::ChromeDriver => "chromedriver",
        }
    }
}

impl fmt::Display for BrowserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_names_match_display() {
        for browser in [
            BrowserName::Chrome,
            BrowserName::ChromeHeadlessShell,
            BrowserName::Chromium,
            BrowserName::ChromeDriver,
        ] {
            let json = serde_json::to_string(&browser).unwrap();
            assert_eq!(json, format!("\"{}\"", browser));
        }
    }
}
