// casket-core/src/stage/quarantine.rs
//! Provenance marking for downloads and everything extracted from them.

use std::path::Path;

use casket_common::error::{CasketError, Result};
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

pub const QUARANTINE_ATTR: &str = "com.apple.quarantine";

pub trait QuarantineService: Send + Sync {
    fn is_available(&self) -> bool;

    /// Tags a freshly downloaded file.
    fn mark(&self, path: &Path) -> Result<()>;

    /// Copies the marker of `from` onto `to` and everything below it.
    fn propagate(&self, from: &Path, to: &Path) -> Result<()>;
}

fn timestamp_hex() -> String {
    format!("{:x}", chrono::Utc::now().timestamp().max(0))
}

/// Extended-attribute quarantine as Gatekeeper reads it.
pub struct XattrQuarantine {
    agent: String,
}

impl XattrQuarantine {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
        }
    }

    /// `flags;timestamp;agent;uuid`, 0081 meaning "downloaded, not yet approved".
    pub fn attribute_value(&self) -> String {
        let uuid = Uuid::new_v4().as_hyphenated().to_string().to_uppercase();
        format!("0081;{};{};{}", timestamp_hex(), self.agent, uuid)
    }
}

impl QuarantineService for XattrQuarantine {
    fn is_available(&self) -> bool {
        cfg!(target_os = "macos") && xattr::SUPPORTED_PLATFORM
    }

    fn mark(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(CasketError::NotFound(format!(
                "Path not found for setting quarantine attribute: {}",
                path.display()
            )));
        }
        let value = self.attribute_value();
        debug!("Setting quarantine on {}: '{}'", path.display(), value);
        xattr::set(path, QUARANTINE_ATTR, value.as_bytes())?;
        Ok(())
    }

    fn propagate(&self, from: &Path, to: &Path) -> Result<()> {
        let Some(value) = xattr::get(from, QUARANTINE_ATTR)? else {
            debug!("{} carries no quarantine marker", from.display());
            return Ok(());
        };
        let mut failures = 0usize;
        for entry in WalkDir::new(to).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry under {}: {}", to.display(), e);
                    failures += 1;
                    continue;
                }
            };
            if entry.path_is_symlink() {
                continue;
            }
            if let Err(e) = xattr::set(entry.path(), QUARANTINE_ATTR, &value) {
                debug!("Could not quarantine {}: {}", entry.path().display(), e);
                failures += 1;
            }
        }
        if failures > 0 {
            debug!(
                "Quarantine propagation to {} skipped {} entries",
                to.display(),
                failures
            );
        }
        Ok(())
    }
}

/// Used when quarantine is disabled or unsupported.
pub struct NoQuarantine;

impl QuarantineService for NoQuarantine {
    fn is_available(&self) -> bool {
        false
    }

    fn mark(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn propagate(&self, _from: &Path, _to: &Path) -> Result<()> {
        Ok(())
    }
}
