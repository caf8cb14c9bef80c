use thiserror::Error;
use std::path::PathBuf;

/// Error type for all possible failures in the library.
#[derive(Error, Debug)]
pub enum BrowserInstallerError {
    #[error("Failed to execute command '{command}': {source}")]
    CommandExecutionError {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Command '{command}' output could not be parsed: {source}")]
    CommandOutputParsingError {
        command: String,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("Network request failed: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Network request failed after retries: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),

    #[error("Failed to parse JSON response from '{url}': {source}")]
    JsonParseError {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Couldn't parse a milestone from version '{version}'")]
    InvalidVersion {
        version: String,
    },

    #[error(
        "{browser}@{version} can't be installed.\n\
         Probably the version '{version}' is invalid, please try another version.\n\
         Version examples: '120', '120.0'"
    )]
    VersionNotInstallable {
        browser: String,
        version: String,
    },

    #[error("Could not resolve a build id for {browser}@{version} on platform '{platform}'")]
    BuildIdNotFound {
        browser: String,
        version: String,
        platform: String,
    },

    #[error("{browser} build '{build_id}' for platform '{platform}' is not in the registry")]
    NotInRegistry {
        browser: String,
        platform: String,
        build_id: String,
    },

    #[error("Couldn't resolve latest chrome version")]
    LatestVersionUnresolved {
        #[source]
        source: Box<BrowserInstallerError>,
    },

    #[error("I/O error accessing path '{path}': {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decompress zip file to '{path}': {source}")]
    ZipError {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Executable not found in the downloaded archive at '{path}'")]
    ExecutableNotFound {
        path: PathBuf,
    },

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Unsupported browser for this operation: {0}")]
    UnsupportedBrowser(String),

    #[error("An error occurred while verifying the driver: {0}")]
    VerificationError(String),

    #[error("Background task failed: {0}")]
    TaskJoinError(#[from] tokio::task::JoinError),

    #[error("{} installation steps failed:\n{}", .0.len(), format_errors(.0))]
    Multiple(Vec<BrowserInstallerError>),
}

fn format_errors(errors: &[BrowserInstallerError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}
