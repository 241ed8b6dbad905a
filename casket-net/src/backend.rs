// casket-net/src/backend.rs
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use casket_common::error::{CasketError, Result};
use casket_common::model::Cask;

/// Everything a backend needs to retrieve one cask download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub token: String,
    pub version: String,
    pub url: String,
    pub file_name: String,
    /// Expected digest; `None` skips verification.
    pub sha256: Option<String>,
    pub timeout: Duration,
}

impl DownloadRequest {
    pub fn for_cask(cask: &Cask, verify: bool, timeout: Duration) -> Result<Self> {
        let url = cask.url_str().ok_or_else(|| {
            CasketError::DownloadError(
                cask.token.clone(),
                String::new(),
                "Cask does not declare a download url".to_string(),
            )
        })?;
        Ok(Self {
            token: cask.token.clone(),
            version: cask.version_str(),
            url: url.to_string(),
            file_name: cask.download_file_name(),
            sha256: if verify { cask.sha256_hex() } else { None },
            timeout,
        })
    }

    /// Name of the file in the download cache: `<token>--<version>--<file>`.
    pub fn cache_file_name(&self) -> String {
        format!("{}--{}--{}", self.token, self.version, self.file_name)
    }
}

/// Retrieves a download onto local disk and returns its path.
#[async_trait]
pub trait DownloadBackend: Send + Sync {
    async fn fetch(&self, request: &DownloadRequest) -> Result<PathBuf>;
}
