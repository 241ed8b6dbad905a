// casket-core/src/artifacts/moved.rs
//! Bundles moved out of the staged path into a target directory (apps, fonts, plugins, ...).

use std::path::{Path, PathBuf};

use casket_common::error::{CasketError, Result};
use tracing::{debug, warn};

use super::helpers::{expand_tilde, move_path, path_occupied, remove_path_robustly, run_if_available};
use super::{ArtifactContext, UninstallFlags};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Moved {
    /// Stanza key, e.g. `app` or `font`.
    pub stanza: String,
    /// Relative to the staged path.
    pub source: String,
    /// Explicit target; defaults to the source's file name inside `dir_key`.
    pub target: Option<String>,
    pub dir_key: &'static str,
}

impl Moved {
    pub fn source_path(&self, ctx: &ArtifactContext<'_>) -> PathBuf {
        let source = self
            .source
            .replace("$APPDIR", &ctx.dir("appdir").to_string_lossy());
        let path = expand_tilde(&source, ctx.config.home_dir());
        if path.is_absolute() {
            path
        } else {
            ctx.staged_path.join(path)
        }
    }

    pub fn target_path(&self, ctx: &ArtifactContext<'_>) -> PathBuf {
        match self.target.as_deref() {
            Some(target) => {
                let expanded = expand_tilde(target, ctx.config.home_dir());
                if expanded.is_absolute() {
                    expanded
                } else {
                    ctx.dir(self.dir_key).join(expanded)
                }
            }
            None => {
                let name = Path::new(&self.source)
                    .file_name()
                    .map(|n| n.to_os_string())
                    .unwrap_or_else(|| self.source.clone().into());
                ctx.dir(self.dir_key).join(name)
            }
        }
    }

    pub fn describe(&self) -> String {
        format!("{} '{}'", self.stanza, self.source)
    }

    pub fn install(&self, ctx: &ArtifactContext<'_>, force: bool) -> Result<()> {
        let source = self.source_path(ctx);
        let target = self.target_path(ctx);
        if !path_occupied(&source) {
            return Err(CasketError::Install(format!(
                "It seems the {} source '{}' is not there.",
                self.stanza,
                source.display()
            )));
        }
        if path_occupied(&target) {
            let message = format!(
                "It seems there is already a {} at '{}'",
                self.stanza,
                target.display()
            );
            if !force {
                return Err(CasketError::Install(format!("{message}.")));
            }
            warn!("{}; overwriting.", message);
            if !remove_path_robustly(&target, true) {
                return Err(CasketError::Install(format!(
                    "Could not remove existing {}",
                    target.display()
                )));
            }
        }
        debug!("Moving {} '{}' to '{}'", self.stanza, source.display(), target.display());
        move_path(&source, &target)
    }

    /// Moves the target back into the staged path.
    ///
    /// A missing target is fine under `skip` or `force`; an occupied source is
    /// overwritten only under `force`.
    pub fn uninstall(&self, ctx: &ArtifactContext<'_>, flags: UninstallFlags) -> Result<()> {
        let source = self.source_path(ctx);
        let target = self.target_path(ctx);

        if path_occupied(&source) {
            let message = format!(
                "It seems there is already a {} at '{}'",
                self.stanza,
                source.display()
            );
            if !flags.force {
                return Err(CasketError::Install(format!("{message}.")));
            }
            warn!("{}; overwriting.", message);
            remove_path_robustly(&source, true);
        }
        if !path_occupied(&target) {
            if flags.skip || flags.force {
                debug!("{} already gone, nothing to move back", target.display());
                return Ok(());
            }
            return Err(CasketError::Install(format!(
                "It seems the {} source '{}' is not there.",
                self.stanza,
                target.display()
            )));
        }
        debug!(
            "Moving {} '{}' back to '{}'",
            self.stanza,
            target.display(),
            source.display()
        );
        move_path(&target, &source)
    }
}

/// Asks Spotlight to pick up an importer.
pub fn reload_mdimporter(target: &Path) {
    let target = target.to_string_lossy();
    if let Some(out) = run_if_available("mdimport", &["-r", &target]) {
        if !out.status.success() {
            debug!("mdimport -r {} failed", target);
        }
    }
}

/// Resets the QuickLook server so added or removed plugins take effect.
pub fn reload_quicklook() {
    if let Some(out) = run_if_available("qlmanage", &["-r"]) {
        if !out.status.success() {
            debug!("qlmanage -r failed");
        }
    }
}

/// Drops the system's keyboard layout caches after a layout is removed.
pub fn clear_keyboard_layout_cache() {
    if !cfg!(target_os = "macos") {
        return;
    }
    let Ok(paths) = glob::glob("/System/Library/Caches/com.apple.IntlDataCache.le*") else {
        return;
    };
    for path in paths.flatten() {
        if !remove_path_robustly(&path, true) {
            debug!("Could not clear keyboard layout cache {}", path.display());
        }
    }
}
