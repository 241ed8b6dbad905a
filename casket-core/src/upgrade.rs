// casket-core/src/upgrade.rs
//! Replacing an installed version with a newer one.
//!
//! The old artifacts are uninstalled and the old version is backed up before
//! the new one is staged. A failure puts the backup back and reinstalls the
//! old artifacts; success purges the backup. Forced installs over an existing
//! install go through the same steps.

use std::sync::Arc;

use casket_common::error::{CasketError, Result};
use casket_common::model::Cask;
use tracing::{debug, error, info, warn};

use crate::artifacts::{self, ArtifactContext, UninstallFlags};
use crate::check::{installed_cask_version, installed_casks};
use crate::context::{RunContext, TransactionState};
use crate::installer::{backup, metadata, CaskInstaller, InstallOptions, InstallStatus, TabFlags};

/// An installed cask whose source definition has a different version.
#[derive(Debug, Clone)]
pub struct OutdatedCask {
    pub token: String,
    pub installed_version: String,
    pub latest: Arc<Cask>,
}

/// The installed side of an upgrade in progress.
pub(crate) struct Predecessor {
    cask: Arc<Cask>,
    version: String,
    artifacts: Vec<artifacts::Artifact>,
}

impl CaskInstaller {
    /// Installed casks whose definitions moved on. `latest` casks are never outdated.
    pub fn outdated_casks(&self) -> Result<Vec<OutdatedCask>> {
        let mut outdated = Vec::new();
        for installed in installed_casks(&self.config)? {
            let latest = match self.source.load_cask(&installed.token) {
                Ok(cask) => cask,
                Err(e) => {
                    warn!("Cannot check {} for updates: {}", installed.token, e);
                    continue;
                }
            };
            if latest.is_latest() || latest.version_str() == installed.version {
                continue;
            }
            outdated.push(OutdatedCask {
                token: installed.token,
                installed_version: installed.version,
                latest,
            });
        }
        Ok(outdated)
    }

    /// The install currently recorded for `token`, read from its saved definition.
    pub(crate) fn predecessor(&self, token: &str, version: String) -> Result<Predecessor> {
        let cask = self.installed_definition(token)?;
        Ok(Predecessor {
            artifacts: artifacts::parse_all(&cask)?,
            cask,
            version,
        })
    }

    /// Uninstalls the old artifacts as a successor and backs up the old version.
    /// `force` tolerates old artifacts that have already gone missing.
    pub(crate) fn start_upgrade(&self, old: &Predecessor, force: bool, run: &mut RunContext) -> Result<()> {
        let token = &old.cask.token;
        debug!("Setting aside {} {}", token, old.version);
        let staged = self.config.cask_version_path(token, &old.version);
        let dirs = metadata::merged_artifact_dirs(&self.config, token);
        let ctx = ArtifactContext::new(&old.cask, &self.config, &staged, &dirs);
        let flags = UninstallFlags {
            force,
            successor: true,
            skip: false,
        };
        artifacts::uninstall_artifacts(&old.artifacts, &ctx, run, flags)?;
        backup::backup(&self.config, token, &old.version)
    }

    /// Restores the old version after a failed upgrade. Errors are logged so
    /// the upgrade's own error is the one reported.
    pub(crate) fn revert_upgrade(&self, old: &Predecessor, run: &mut RunContext) {
        let token = &old.cask.token;
        warn!("Reverting upgrade of {}", token);
        run.transition(token, TransactionState::Rollback);
        if let Err(e) = backup::restore_backup(&self.config, token, &old.version) {
            error!("Could not restore backup of {}: {}", token, e);
            return;
        }
        let staged = self.config.cask_version_path(token, &old.version);
        let dirs = metadata::merged_artifact_dirs(&self.config, token);
        let ctx = ArtifactContext::new(&old.cask, &self.config, &staged, &dirs);
        if let Err(e) = artifacts::install_artifacts(&old.artifacts, &ctx, run, true) {
            error!("Could not reinstall artifacts of {} {}: {}", token, old.version, e);
        }
    }

    pub(crate) fn finalize_upgrade(&self, old: &Predecessor) {
        debug!("Purging files of {} {}", old.cask.token, old.version);
        backup::purge_backup(&self.config, &old.cask.token, &old.version);
    }

    /// Upgrades an installed cask to `new`.
    pub async fn upgrade(&self, new: Arc<Cask>, run: &mut RunContext) -> Result<InstallStatus> {
        let token = new.token.clone();
        let Some(old_version) = installed_cask_version(&self.config, &token) else {
            return Err(CasketError::NotInstalled(token));
        };
        if old_version == new.version_str() {
            debug!("{} {} is already up to date", token, old_version);
            return Ok(InstallStatus::AlreadyInstalled);
        }
        info!("Upgrading {} {} -> {}", token, old_version, new.version_str());

        let old = self.predecessor(&token, old_version)?;

        let opts = InstallOptions::default();
        run.transition(&token, TransactionState::Idle);
        self.preflight_checks(&new, &opts, run)?;
        let new_artifacts = artifacts::parse_all(&new)?;
        self.satisfy_dependencies(&new, &opts, run).await?;

        run.transition(&token, TransactionState::Fetch);
        let download = self.fetcher.fetch(&new, false).await?;

        let tab = metadata::load_tab(&self.config, &token);
        let flags = TabFlags {
            installed_as_dependency: tab.as_ref().is_some_and(|t| t.installed_as_dependency),
            installed_on_request: tab.as_ref().is_none_or(|t| t.installed_on_request),
        };

        if let Err(e) = self.start_upgrade(&old, false, run) {
            self.revert_upgrade(&old, run);
            return Err(e);
        }
        match self.stage_and_commit(&new, &new_artifacts, &download, false, flags, run) {
            Ok(()) => {
                self.finalize_upgrade(&old);
                info!("{} was successfully upgraded!", token);
                Ok(InstallStatus::Installed)
            }
            Err(e) => {
                self.revert_upgrade(&old, run);
                Err(e)
            }
        }
    }
}
