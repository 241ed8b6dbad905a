// casket-core/src/installer/uninstall.rs
use std::sync::Arc;

use casket_common::error::{CasketError, Result};
use casket_common::model::Cask;
use tracing::{debug, info, warn};

use super::{metadata, CaskInstaller};
use crate::artifacts::{self, ArtifactContext, UninstallFlags};
use crate::check::{installed_cask_version, installed_caskfile, is_cask_installed};
use crate::context::RunContext;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UninstallOptions {
    pub force: bool,
    /// Also remove the files named by the cask's `zap` stanza.
    pub zap: bool,
    /// The cask is about to be installed again, so its bookkeeping stays.
    pub successor: bool,
}

impl CaskInstaller {
    /// The definition the current install was made from. A saved copy wins;
    /// an unreadable or missing one falls back to the package source.
    pub fn installed_definition(&self, token: &str) -> Result<Arc<Cask>> {
        if let Some(caskfile) = installed_caskfile(&self.config, token) {
            match self.source.load_cask_from_path(&caskfile) {
                Ok(cask) => return Ok(cask),
                Err(e) => warn!(
                    "Saved definition {} is unusable ({}), loading {} from source",
                    caskfile.display(),
                    e,
                    token
                ),
            }
        }
        self.source.load_cask(token)
    }

    pub fn uninstall(&self, token: &str, opts: UninstallOptions, run: &mut RunContext) -> Result<()> {
        if !is_cask_installed(&self.config, token) && !opts.force {
            return Err(CasketError::NotInstalled(token.to_string()));
        }
        info!("Uninstalling Cask {}", token);

        let cask = match self.installed_definition(token) {
            Ok(cask) => cask,
            Err(e) if opts.force => {
                warn!("No usable definition for {} ({}), purging its files", token, e);
                metadata::remove_bookkeeping(&self.config, token)?;
                return metadata::purge_caskroom_path(&self.config, token);
            }
            Err(e) => return Err(e),
        };
        let version = installed_cask_version(&self.config, token).unwrap_or_else(|| cask.version_str());
        let staged = self.config.cask_version_path(token, &version);
        let dirs = metadata::merged_artifact_dirs(&self.config, token);
        let ctx = ArtifactContext::new(&cask, &self.config, &staged, &dirs);
        let artifact_list = artifacts::parse_all(&cask)?;

        let flags = UninstallFlags {
            force: opts.force,
            successor: opts.successor,
            skip: opts.zap,
        };
        artifacts::uninstall_artifacts(&artifact_list, &ctx, run, flags)?;

        if opts.zap && !artifacts::zap_artifacts(&artifact_list, &ctx, run)? {
            run.warn(format!("No zap stanza present for Cask '{token}'"));
        }

        if !opts.successor {
            metadata::remove_bookkeeping(&self.config, token)?;
        }
        metadata::purge_versioned_files(&self.config, token, &version)?;
        if (opts.force || opts.zap) && !opts.successor {
            metadata::purge_caskroom_path(&self.config, token)?;
        }
        debug!("Cask {} uninstalled", token);
        Ok(())
    }
}
