// casket-core/src/installer/metadata.rs
//! Bookkeeping under `Caskroom/<token>/.metadata`: saved definitions, the
//! per-cask configuration store, the checksum record and the tab.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use casket_common::config::Config;
use casket_common::error::Result;
use casket_common::fs::{remove_dir_all_if_exists, remove_file_if_exists, write_json};
use casket_common::model::tab::RuntimeDependencies;
use casket_common::model::{Cask, CaskTab};
use chrono::Utc;
use tracing::{debug, warn};

pub fn timestamp() -> String {
    Utc::now().format("%Y%m%d%H%M%S%.3f").to_string()
}

/// Saves the definition this install was made from and returns its path.
pub fn save_caskfile(config: &Config, cask: &Cask) -> Result<PathBuf> {
    let path = config
        .metadata_timestamped_dir(&cask.token, &cask.version_str(), &timestamp())
        .join("Casks")
        .join(format!("{}.json", cask.token));
    debug!("Saving definition of {} to {}", cask.token, path.display());
    write_json(&path, cask)?;
    Ok(path)
}

/// The persisted artifact directories; unreadable stores count as empty.
pub fn load_config_store(config: &Config, token: &str) -> BTreeMap<String, PathBuf> {
    let path = config.config_store_path(token);
    if !path.is_file() {
        return BTreeMap::new();
    }
    match casket_common::fs::read_json(&path) {
        Ok(dirs) => dirs,
        Err(e) => {
            warn!("Ignoring unreadable config store {}: {}", path.display(), e);
            BTreeMap::new()
        }
    }
}

pub fn write_config_store(config: &Config, token: &str, dirs: &BTreeMap<String, PathBuf>) -> Result<()> {
    write_json(&config.config_store_path(token), dirs)
}

/// Defaults, overridden by what an earlier install persisted, overridden by
/// directories set explicitly for this run.
pub fn merged_artifact_dirs(config: &Config, token: &str) -> BTreeMap<String, PathBuf> {
    let mut dirs = config.default_artifact_dirs();
    dirs.extend(load_config_store(config, token));
    dirs.extend(config.explicit_dirs.clone());
    dirs
}

pub fn write_download_sha(config: &Config, token: &str, download: &Path) -> Result<()> {
    let sha = casket_net::sha256_file(download)?;
    casket_common::fs::atomic_write(&config.download_sha_path(token), sha.as_bytes())
}

pub fn write_tab(
    config: &Config,
    cask: &Cask,
    installed_as_dependency: bool,
    installed_on_request: bool,
    caskfile: &Path,
) -> Result<()> {
    let tab = CaskTab {
        installed_as_dependency,
        installed_on_request,
        time: Utc::now().timestamp(),
        tap: cask.tap_name().map(str::to_string),
        version: Some(cask.version_str()),
        source: Some(caskfile.to_path_buf()),
        runtime_dependencies: RuntimeDependencies {
            cask: cask.dependency_casks(),
            formula: cask.dependency_formulae(),
        },
    };
    tab.write(&config.tab_path(&cask.token))
}

pub fn load_tab(config: &Config, token: &str) -> Option<CaskTab> {
    match CaskTab::load(&config.tab_path(token)) {
        Ok(tab) => tab,
        Err(e) => {
            warn!("Ignoring unreadable tab for {}: {}", token, e);
            None
        }
    }
}

/// Marks an existing install as explicitly requested.
pub fn set_installed_on_request(config: &Config, token: &str) -> Result<()> {
    let Some(mut tab) = load_tab(config, token) else {
        return Ok(());
    };
    if tab.installed_on_request {
        return Ok(());
    }
    debug!("Marking {} as installed on request", token);
    tab.installed_on_request = true;
    tab.installed_as_dependency = false;
    tab.write(&config.tab_path(token))
}

pub fn remove_bookkeeping(config: &Config, token: &str) -> Result<()> {
    remove_file_if_exists(&config.tab_path(token))?;
    remove_file_if_exists(&config.download_sha_path(token))?;
    remove_file_if_exists(&config.config_store_path(token))
}

fn remove_if_empty(dir: &Path) {
    let empty = fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_none());
    if empty {
        match fs::remove_dir(dir) {
            Ok(()) => debug!("Removed empty directory {}", dir.display()),
            Err(e) => debug!("Could not remove {}: {}", dir.display(), e),
        }
    }
}

/// Removes the staged path and versioned metadata of `version`, then any
/// parent directories that were left empty.
pub fn purge_versioned_files(config: &Config, token: &str, version: &str) -> Result<()> {
    let staged = config.cask_version_path(token, version);
    debug!("Purging files for version {} of Cask {}", version, token);
    if staged.symlink_metadata().is_ok() && !crate::artifacts::helpers::remove_path_robustly(&staged, true) {
        warn!("Could not remove staged files at {}", staged.display());
    }
    remove_dir_all_if_exists(&config.metadata_versioned_dir(token, version))?;
    remove_if_empty(&config.metadata_main_dir(token));
    remove_if_empty(&config.cask_token_path(token));
    Ok(())
}

/// Removes everything under `Caskroom/<token>`.
pub fn purge_caskroom_path(config: &Config, token: &str) -> Result<()> {
    let root = config.cask_token_path(token);
    debug!("Purging all staged versions of Cask {}", token);
    if root.symlink_metadata().is_ok() && !crate::artifacts::helpers::remove_path_robustly(&root, true) {
        warn!("Could not remove {}", root.display());
    }
    Ok(())
}
