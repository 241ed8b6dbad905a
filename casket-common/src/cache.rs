// casket-common/src/cache.rs
// Raw JSON payloads from the definitions API, keyed by file name.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use super::error::{CasketError, Result};
use crate::Config;

/// How long cache entries are considered fresh
const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct Cache {
    cache_dir: PathBuf,
}

impl Cache {
    pub fn new(config: &Config) -> Result<Self> {
        let cache_dir = config.cache_dir();
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)?;
        }
        Ok(Self { cache_dir })
    }

    pub fn get_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.cache_dir.join(filename)
    }

    pub fn store_raw(&self, filename: &str, data: &str) -> Result<()> {
        let path = self.path_for(filename);
        tracing::debug!("Writing listing {}", path.display());
        crate::fs::atomic_write(&path, data.as_bytes())
    }

    pub fn load_raw(&self, filename: &str) -> Result<String> {
        let path = self.path_for(filename);
        tracing::debug!("Reading listing {}", path.display());
        if !path.exists() {
            return Err(CasketError::Cache(format!(
                "no cached listing named {filename}"
            )));
        }

        fs::read_to_string(&path).map_err(|e| CasketError::Cache(format!("IO error: {e}")))
    }

    /// True when the file exists and is younger than the TTL.
    pub fn is_cache_valid(&self, filename: &str) -> Result<bool> {
        let path = self.path_for(filename);
        if !path.exists() {
            return Ok(false);
        }

        let modified_time = fs::metadata(&path)?.modified()?;
        let age = SystemTime::now()
            .duration_since(modified_time)
            .map_err(|e| CasketError::Cache(format!("System time error: {e}")))?;

        Ok(age <= CACHE_TTL)
    }

    pub fn clear_file(&self, filename: &str) -> Result<()> {
        crate::fs::remove_file_if_exists(&self.path_for(filename))
    }
}
