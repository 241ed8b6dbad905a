// casket-core/src/check.rs
//! Installed-state queries over the Caskroom and Cellar.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use casket_common::config::{Config, BACKUP_SUFFIX};
use casket_common::error::Result;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledCask {
    pub token: String,
    pub version: String,
    /// Saved definition from the most recent install.
    pub caskfile: PathBuf,
}

fn handle_dir_entry(res: io::Result<fs::DirEntry>, dir: &Path) -> Option<fs::DirEntry> {
    match res {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!("Error reading entry in {}: {}", dir.display(), e);
            None
        }
    }
}

fn subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|res| handle_dir_entry(res, dir))
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect()
}

fn is_backup(path: &Path) -> bool {
    path.to_string_lossy().ends_with(BACKUP_SUFFIX)
}

/// The saved definition of the current install, if any.
///
/// The newest version directory wins, and inside it the newest timestamp.
pub fn installed_caskfile(config: &Config, token: &str) -> Option<PathBuf> {
    let mut versions: Vec<PathBuf> = subdirs(&config.metadata_main_dir(token))
        .into_iter()
        .filter(|p| !is_backup(p))
        .collect();
    versions.sort_by_key(|p| fs::metadata(p).and_then(|m| m.modified()).ok());

    versions.iter().rev().find_map(|version_dir| {
        let mut stamps = subdirs(version_dir);
        stamps.sort();
        stamps
            .iter()
            .rev()
            .map(|stamp| stamp.join("Casks").join(format!("{token}.json")))
            .find(|file| file.is_file())
    })
}

pub fn is_cask_installed(config: &Config, token: &str) -> bool {
    installed_caskfile(config, token).is_some()
}

pub fn installed_cask_version(config: &Config, token: &str) -> Option<String> {
    // <metadata>/<version>/<timestamp>/Casks/<token>.json
    installed_caskfile(config, token).and_then(|file| {
        file.ancestors()
            .nth(3)
            .and_then(|v| v.file_name())
            .map(|v| v.to_string_lossy().to_string())
    })
}

pub fn installed_casks(config: &Config) -> Result<Vec<InstalledCask>> {
    let caskroom = config.caskroom_dir();
    if !caskroom.is_dir() {
        debug!("Caskroom directory {} does not exist.", caskroom.display());
        return Ok(Vec::new());
    }
    let mut installed = Vec::new();
    for entry in fs::read_dir(&caskroom)? {
        let Some(entry) = handle_dir_entry(entry, &caskroom) else {
            continue;
        };
        let token = entry.file_name().to_string_lossy().to_string();
        if let Some(caskfile) = installed_caskfile(config, &token) {
            let version = installed_cask_version(config, &token).unwrap_or_default();
            installed.push(InstalledCask {
                token,
                version,
                caskfile,
            });
        }
    }
    installed.sort_by(|a, b| a.token.cmp(&b.token));
    Ok(installed)
}

/// A formula counts as installed when any keg exists under `Cellar/<name>`.
pub fn is_formula_installed(config: &Config, name: &str) -> bool {
    let short = name.rsplit('/').next().unwrap_or(name);
    !subdirs(&config.formula_cellar_dir(short)).is_empty()
}
