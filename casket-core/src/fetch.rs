// casket-core/src/fetch.rs
//! Memoized single and batched downloads.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use casket_common::config::Config;
use casket_common::error::{CasketError, Result};
use casket_common::model::Cask;
use casket_net::{DownloadBackend, DownloadRequest};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, instrument, warn};

use crate::stage::QuarantineService;

type FetchKey = (String, String);

/// Outcome of a batch: every cask lands in exactly one of the two lists.
#[derive(Debug, Default)]
pub struct BatchFetchReport {
    pub fetched: HashMap<String, PathBuf>,
    pub failed: Vec<(String, CasketError)>,
}

impl BatchFetchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_tokens(&self) -> Vec<&str> {
        self.failed.iter().map(|(t, _)| t.as_str()).collect()
    }
}

pub struct FetchCoordinator {
    backend: Arc<dyn DownloadBackend>,
    quarantine: Arc<dyn QuarantineService>,
    require_sha: bool,
    quarantine_enabled: bool,
    timeout: Duration,
    concurrency: usize,
    fetched: Mutex<HashMap<FetchKey, PathBuf>>,
}

pub(crate) fn get_panic_message(e: Box<dyn std::any::Any + Send>) -> String {
    match e.downcast_ref::<&'static str>() {
        Some(s) => (*s).to_string(),
        None => match e.downcast_ref::<String>() {
            Some(s) => s.clone(),
            None => "Unknown panic payload".to_string(),
        },
    }
}

impl FetchCoordinator {
    pub fn new(
        config: &Config,
        backend: Arc<dyn DownloadBackend>,
        quarantine: Arc<dyn QuarantineService>,
    ) -> Self {
        Self {
            backend,
            quarantine,
            require_sha: config.require_sha,
            quarantine_enabled: config.quarantine,
            timeout: config.fetch_timeout,
            concurrency: config.download_concurrency.max(1),
            fetched: Mutex::new(HashMap::new()),
        }
    }

    fn key(cask: &Cask) -> FetchKey {
        (cask.token.clone(), cask.version_str())
    }

    fn memoized(&self, key: &FetchKey) -> Result<Option<PathBuf>> {
        let guard = self
            .fetched
            .lock()
            .map_err(|_| CasketError::Generic("fetch memo lock poisoned".to_string()))?;
        Ok(guard.get(key).filter(|p| p.exists()).cloned())
    }

    /// Fails before any network access when a checksum is required but absent.
    pub fn check_checksum_policy(&self, cask: &Cask, force: bool) -> Result<()> {
        if self.require_sha && !force && !cask.has_checksum() {
            return Err(CasketError::ChecksumRequired(cask.token.clone()));
        }
        Ok(())
    }

    #[instrument(skip(self, cask), fields(token = %cask.token))]
    pub async fn fetch(&self, cask: &Cask, force: bool) -> Result<PathBuf> {
        self.check_checksum_policy(cask, force)?;
        let key = Self::key(cask);
        if let Some(path) = self.memoized(&key)? {
            debug!("Reusing fetched download {}", path.display());
            return Ok(path);
        }

        let request = DownloadRequest::for_cask(cask, true, self.timeout)?;
        let path = self.backend.fetch(&request).await?;

        if self.quarantine_enabled && self.quarantine.is_available() {
            if let Err(e) = self.quarantine.mark(&path) {
                warn!("Could not quarantine {}: {}", path.display(), e);
            }
        }

        self.fetched
            .lock()
            .map_err(|_| CasketError::Generic("fetch memo lock poisoned".to_string()))?
            .insert(key, path.clone());
        Ok(path)
    }

    /// Fetches every cask with bounded concurrency and waits for all of them.
    pub async fn fetch_batch(self: &Arc<Self>, casks: &[Arc<Cask>], force: bool) -> BatchFetchReport {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut report = BatchFetchReport::default();

        for cask in casks {
            let coordinator = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let cask = Arc::clone(cask);
            tasks.spawn(async move {
                let token = cask.token.clone();
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => coordinator.fetch(&cask, force).await,
                    Err(e) => Err(CasketError::Generic(format!("download queue closed: {e}"))),
                };
                (token, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((token, Ok(path))) => {
                    report.fetched.insert(token, path);
                }
                Ok((token, Err(e))) => {
                    warn!("Download failed for {}: {}", token, e);
                    report.failed.push((token, e));
                }
                Err(join_error) => {
                    let message = if join_error.is_panic() {
                        get_panic_message(join_error.into_panic())
                    } else {
                        join_error.to_string()
                    };
                    error!("Download task panicked: {}", message);
                }
            }
        }

        // A panicked task never reports its token; count it as failed.
        for cask in casks {
            if !report.fetched.contains_key(&cask.token)
                && !report.failed.iter().any(|(t, _)| t == &cask.token)
            {
                report.failed.push((
                    cask.token.clone(),
                    CasketError::Generic("download task aborted".to_string()),
                ));
            }
        }
        report.failed.sort_by(|a, b| a.0.cmp(&b.0));
        report
    }
}
