// casket-core/src/installer/backup.rs
//! Backups of a staged install, made before it is replaced.

use std::fs;
use std::path::{Path, PathBuf};

use casket_common::config::{Config, BACKUP_SUFFIX};
use casket_common::error::Result;
use tracing::{debug, warn};

use crate::artifacts::helpers::remove_path_robustly;

fn with_suffix(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Staged path and versioned metadata directory of an install.
fn live_paths(config: &Config, token: &str, version: &str) -> [PathBuf; 2] {
    [
        config.cask_version_path(token, version),
        config.metadata_versioned_dir(token, version),
    ]
}

pub fn backup_paths(config: &Config, token: &str, version: &str) -> [PathBuf; 2] {
    live_paths(config, token, version).map(|p| with_suffix(&p))
}

pub fn has_backup(config: &Config, token: &str, version: &str) -> bool {
    backup_paths(config, token, version)
        .iter()
        .any(|p| p.symlink_metadata().is_ok())
}

fn clear(path: &Path) -> Result<()> {
    if path.symlink_metadata().is_ok() && !remove_path_robustly(path, true) {
        return Err(casket_common::error::CasketError::Install(format!(
            "Could not remove {}",
            path.display()
        )));
    }
    Ok(())
}

/// Renames the live install aside. Stale backups are replaced.
pub fn backup(config: &Config, token: &str, version: &str) -> Result<()> {
    debug!("Backing up version {} of {}", version, token);
    for (live, saved) in live_paths(config, token, version)
        .iter()
        .zip(backup_paths(config, token, version).iter())
    {
        clear(saved)?;
        if live.symlink_metadata().is_ok() {
            fs::rename(live, saved)?;
        }
    }
    Ok(())
}

/// Puts the backup back in place of whatever the failed attempt left.
pub fn restore_backup(config: &Config, token: &str, version: &str) -> Result<()> {
    if !has_backup(config, token, version) {
        return Ok(());
    }
    debug!("Restoring backup of version {} of {}", version, token);
    for (live, saved) in live_paths(config, token, version)
        .iter()
        .zip(backup_paths(config, token, version).iter())
    {
        if saved.symlink_metadata().is_err() {
            continue;
        }
        clear(live)?;
        if let Some(parent) = live.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(saved, live)?;
    }
    Ok(())
}

pub fn purge_backup(config: &Config, token: &str, version: &str) {
    for saved in backup_paths(config, token, version) {
        if saved.symlink_metadata().is_ok() {
            debug!("Purging backup {}", saved.display());
            if !remove_path_robustly(&saved, true) {
                warn!("Could not purge backup {}", saved.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_and_restore_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(tmp.path().join("prefix"), tmp.path().join("home"));
        let staged = config.cask_version_path("foo", "1.0");
        let meta = config.metadata_versioned_dir("foo", "1.0");
        fs::create_dir_all(staged.join("Foo.app")).unwrap();
        fs::create_dir_all(&meta).unwrap();
        fs::write(meta.join("marker"), "old").unwrap();

        backup(&config, "foo", "1.0").unwrap();
        assert!(!staged.exists());
        assert!(has_backup(&config, "foo", "1.0"));

        // A failed attempt leaves junk behind.
        fs::create_dir_all(staged.join("Junk.app")).unwrap();
        restore_backup(&config, "foo", "1.0").unwrap();
        assert!(staged.join("Foo.app").is_dir());
        assert!(!staged.join("Junk.app").exists());
        assert_eq!(fs::read_to_string(meta.join("marker")).unwrap(), "old");
        assert!(!has_backup(&config, "foo", "1.0"));
    }

    #[test]
    fn purge_drops_backup() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(tmp.path().join("prefix"), tmp.path().join("home"));
        fs::create_dir_all(config.cask_version_path("foo", "1.0")).unwrap();
        backup(&config, "foo", "1.0").unwrap();
        purge_backup(&config, "foo", "1.0");
        assert!(!has_backup(&config, "foo", "1.0"));
    }
}
