//! HTTP fetching, archive download and unpacking.

use crate::error::BrowserInstallerError;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

/// Called with `(downloaded_bytes, total_bytes)` while an archive is streamed.
pub type DownloadProgressCallback = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Builds a client that retries transient failures with exponential backoff.
pub fn retrying_client(max_retries: u32) -> ClientWithMiddleware {
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
    ClientBuilder::new(reqwest::Client::new())
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build()
}

/// GETs `url` and returns the body as text. Non-2xx statuses are errors.
pub async fn fetch_text(client: &ClientWithMiddleware, url: &str) -> Result<String, BrowserInstallerError> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.text().await?)
}

/// GETs `url` and deserializes the JSON body.
pub async fn fetch_json<T: DeserializeOwned>(
    client: &ClientWithMiddleware,
    url: &str,
) -> Result<T, BrowserInstallerError> {
    let body = fetch_text(client, url).await?;
    serde_json::from_str(&body).map_err(|e| BrowserInstallerError::JsonParseError {
        url: url.to_string(),
        source: e,
    })
}

/// Whether a HEAD request on `url` succeeds.
pub async fn url_exists(client: &ClientWithMiddleware, url: &str) -> Result<bool, BrowserInstallerError> {
    let response = client.head(url).send().await?;
    Ok(response.status().is_success())
}

/// Downloads the zip at `url`, unpacks it into `install_path` and returns the
/// path of `executable` (relative to `install_path`).
pub async fn download_and_unzip(
    client: &ClientWithMiddleware,
    url: &str,
    install_path: &Path,
    executable: &Path,
    progress: Option<DownloadProgressCallback>,
) -> Result<PathBuf, BrowserInstallerError> {

    // --- 1. Create a temporary directory for the download.
    let temp_dir = tempfile::Builder::new()
        .prefix("browser-installer-")
        .tempdir()
        .map_err(|e| BrowserInstallerError::IoError {
            path: std::env::temp_dir(),
            source: e,
        })?;
    let archive_path = temp_dir.path().join("archive.zip");

    // --- 2. Download the archive to the temporary directory.
    download_file(client, url, &archive_path, progress).await?;

    // --- 3. Unzip into the final installation directory.
    unzip_file(&archive_path, install_path).await?;

    // --- 4. Locate the executable. Fall back to a search by file name in case
    // the archive layout differs from the expected one.
    let expected = install_path.join(executable);
    if expected.is_file() {
        return Ok(expected);
    }
    let file_name = executable
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| BrowserInstallerError::ExecutableNotFound { path: expected.clone() })?;
    find_executable(install_path, file_name)
}

/// Streams `url` into `dest_path`, reporting progress after every chunk.
pub async fn download_file(
    client: &ClientWithMiddleware,
    url: &str,
    dest_path: &Path,
    progress: Option<DownloadProgressCallback>,
) -> Result<(), BrowserInstallerError> {

    if let Some(parent) = dest_path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| BrowserInstallerError::IoError {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }

    let mut response = client.get(url).send().await?.error_for_status()?;
    let total = response.content_length();

    let mut dest_file = File::create(dest_path).await.map_err(|e| BrowserInstallerError::IoError {
        path: dest_path.to_path_buf(),
        source: e,
    })?;

    let mut downloaded: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        dest_file.write_all(&chunk).await.map_err(|e| BrowserInstallerError::IoError {
            path: dest_path.to_path_buf(),
            source: e,
        })?;
        downloaded += chunk.len() as u64;
        if let Some(callback) = &progress {
            callback(downloaded, total);
        }
    }

    dest_file.flush().await.map_err(|e| BrowserInstallerError::IoError {
        path: dest_path.to_path_buf(),
        source: e,
    })?;

    Ok(())
}

/// Decompresses a .zip archive to a specified directory.
///
/// The zip crate is synchronous, so extraction runs under `spawn_blocking`.
pub async fn unzip_file(archive_path: &Path, extract_to: &Path) -> Result<(), BrowserInstallerError> {

    let archive_path_buf = archive_path.to_path_buf();
    let extract_to_buf = extract_to.to_path_buf();

    tokio::task::spawn_blocking(move || extract_zip(&archive_path_buf, &extract_to_buf)).await?
}

fn extract_zip(archive_path: &Path, extract_to: &Path) -> Result<(), BrowserInstallerError> {
    let file = std::fs::File::open(archive_path).map_err(|e| BrowserInstallerError::IoError {
        path: archive_path.to_path_buf(),
        source: e,
    })?;

    let mut archive = zip::ZipArchive::new(file).map_err(|e| BrowserInstallerError::ZipError {
        path: archive_path.to_path_buf(),
        source: e,
    })?;

    std::fs::create_dir_all(extract_to).map_err(|e| BrowserInstallerError::IoError {
        path: extract_to.to_path_buf(),
        source: e,
    })?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| BrowserInstallerError::ZipError {
            path: archive_path.to_path_buf(),
            source: e,
        })?;

        let outpath = match file.enclosed_name() {
            Some(path) => extract_to.join(path),
            None => continue,
        };

        if file.is_dir() {
            std::fs::create_dir_all(&outpath).map_err(|e| BrowserInstallerError::IoError {
                path: outpath.clone(),
                source: e,
            })?;
        } else {
            if let Some(p) = outpath.parent() {
                std::fs::create_dir_all(p).map_err(|e| BrowserInstallerError::IoError {
                    path: p.to_path_buf(),
                    source: e,
                })?;
            }

            let mut outfile = std::fs::File::create(&outpath).map_err(|e| BrowserInstallerError::IoError {
                path: outpath.clone(),
                source: e,
            })?;

            std::io::copy(&mut file, &mut outfile).map_err(|e| BrowserInstallerError::IoError {
                path: outpath.clone(),
                source: e,
            })?;
        }

        // Keep executable bits on Unix-like systems.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode)).map_err(
                    |e| BrowserInstallerError::IoError {
                        path: outpath.clone(),
                        source: e,
                    },
                )?;
            }
        }
    }
    Ok(())
}

/// Searches a directory tree for a file called `name` (`name.exe` on Windows).
pub fn find_executable(search_path: &Path, name: &str) -> Result<PathBuf, BrowserInstallerError> {

    let exe_name = if cfg!(target_os = "windows") && !name.ends_with(".exe") {
        format!("{}.exe", name)
    } else {
        name.to_string()
    };

    for entry in WalkDir::new(search_path) {
        let entry = entry.map_err(|e| BrowserInstallerError::IoError {
            path: e.path().unwrap_or(search_path).to_path_buf(),
            source: e.into_io_error().unwrap_or_else(|| {
                std::io::Error::other("directory walk failed")
            }),
        })?;
        if entry.file_type().is_file() && entry.file_name().to_str() == Some(exe_name.as_str()) {
            return Ok(entry.path().to_path_buf());
        }
    }

    Err(BrowserInstallerError::ExecutableNotFound {
        path: search_path.join(exe_name),
    })
}

/// Marks `path` as executable for its owner. No-op on Windows.
pub fn ensure_executable(path: &Path) -> Result<(), BrowserInstallerError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(path).map_err(|e| BrowserInstallerError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(permissions.mode() | 0o755);
        std::fs::set_permissions(path, permissions).map_err(|e| BrowserInstallerError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
