// casket-net/src/http.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use casket_common::config::Config;
use casket_common::error::{CasketError, Result};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode};
use tokio::fs::File as TokioFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use crate::backend::{DownloadBackend, DownloadRequest};
use crate::validation::{validate_url, verify_checksum};

const CONNECT_TIMEOUT_SECS: u64 = 30;
const USER_AGENT_STRING: &str = "casket package manager (Rust)";

pub(crate) fn build_http_client() -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(CasketError::from)
}

/// Downloads over https into the shared download cache.
pub struct HttpDownloader {
    client: Client,
    downloads_dir: PathBuf,
}

impl HttpDownloader {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: build_http_client()?,
            downloads_dir: config.downloads_dir(),
        })
    }

    fn cached_download(&self, request: &DownloadRequest, path: &Path) -> Option<PathBuf> {
        if !path.is_file() {
            return None;
        }
        let Some(expected) = request.sha256.as_deref() else {
            debug!("Using cached file (no checksum provided): {}", path.display());
            return Some(path.to_path_buf());
        };
        match verify_checksum(path, expected) {
            Ok(()) => {
                debug!("Using valid cached file: {}", path.display());
                Some(path.to_path_buf())
            }
            Err(e) => {
                debug!(
                    "Cached file checksum mismatch ({}): {}. Redownloading.",
                    path.display(),
                    e
                );
                if let Err(remove_err) = fs::remove_file(path) {
                    debug!(
                        "Failed to remove corrupted cached file {}: {}",
                        path.display(),
                        remove_err
                    );
                }
                None
            }
        }
    }
}

#[async_trait]
impl DownloadBackend for HttpDownloader {
    async fn fetch(&self, request: &DownloadRequest) -> Result<PathBuf> {
        let cache_path = self.downloads_dir.join(request.cache_file_name());
        debug!(
            "Preparing to fetch '{}' from {} into {}",
            request.token,
            request.url,
            cache_path.display()
        );
        if let Some(path) = self.cached_download(request, &cache_path) {
            return Ok(path);
        }

        validate_url(&request.url)?;
        fs::create_dir_all(&self.downloads_dir)?;

        let download = download_and_verify(&self.client, request, &cache_path);
        match tokio::time::timeout(request.timeout, download).await {
            Ok(Ok(path)) => Ok(path),
            Ok(Err(e)) => {
                error!("Download failed for '{}' from {}: {}", request.token, request.url, e);
                Err(e)
            }
            Err(_) => Err(CasketError::DownloadError(
                request.token.clone(),
                request.url.clone(),
                format!("Timed out after {}s", request.timeout.as_secs()),
            )),
        }
    }
}

async fn download_and_verify(
    client: &Client,
    request: &DownloadRequest,
    final_path: &Path,
) -> Result<PathBuf> {
    let url = request.url.as_str();
    let temp_path = final_path.with_file_name(format!(".{}.download", request.cache_file_name()));
    if temp_path.exists() {
        if let Err(e) = fs::remove_file(&temp_path) {
            warn!(
                "Could not remove existing temporary file {}: {}",
                temp_path.display(),
                e
            );
        }
    }

    let response = client.get(url).send().await.map_err(|e| {
        CasketError::DownloadError(request.token.clone(), url.to_string(), e.to_string())
    })?;
    let status = response.status();
    debug!("Received HTTP status: {} for {}", status, url);

    if !status.is_success() {
        let reason = match status {
            StatusCode::NOT_FOUND => "Resource not found (404)".to_string(),
            StatusCode::FORBIDDEN => "Access forbidden (403)".to_string(),
            other => format!("HTTP error {other}"),
        };
        return Err(CasketError::DownloadError(
            request.token.clone(),
            url.to_string(),
            reason,
        ));
    }

    let mut temp_file = TokioFile::create(&temp_path).await?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            CasketError::DownloadError(request.token.clone(), url.to_string(), e.to_string())
        })?;
        temp_file.write_all(&chunk).await?;
    }
    temp_file.flush().await?;
    drop(temp_file);

    if let Some(expected) = request.sha256.as_deref() {
        if let Err(e) = verify_checksum(&temp_path, expected) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        debug!("Checksum verified for {}", temp_path.display());
    } else {
        debug!(
            "Skipping checksum verification for {}: none provided.",
            temp_path.display()
        );
    }

    fs::rename(&temp_path, final_path)?;
    debug!("Moved download to final location: {}", final_path.display());
    Ok(final_path.to_path_buf())
}
