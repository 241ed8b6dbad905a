// casket-core/src/artifacts/symlinked.rs
//! `binary` and `manpage` stanzas: symlinks pointing back into the staged path.

use std::fs;
#[cfg(unix)]
use std::os::unix::fs as unix_fs;
use std::path::{Path, PathBuf};

use casket_common::error::{CasketError, Result};
use tracing::{debug, warn};

use super::helpers::{expand_tilde, make_executable, path_occupied, remove_path_robustly};
use super::{ArtifactContext, ArtifactPhases, Phases, UninstallFlags};
use crate::context::RunContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symlinked {
    pub stanza: &'static str,
    pub source: String,
    pub target: Option<String>,
    pub dir_key: &'static str,
    /// Sub-directory under the target dir, e.g. `man1`.
    pub subdir: Option<String>,
}

impl Symlinked {
    pub fn binary(source: String, target: Option<String>) -> Self {
        Self {
            stanza: "binary",
            source,
            target,
            dir_key: "binarydir",
            subdir: None,
        }
    }

    /// A manpage is filed under `man<section>`, taken from its extension.
    pub fn manpage(source: String) -> Option<Self> {
        let section = Path::new(&source)
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .filter(|e| e.chars().next().is_some_and(|c| c.is_ascii_digit()))?;
        let section = section.chars().take_while(|c| c.is_ascii_digit()).collect::<String>();
        Some(Self {
            stanza: "manpage",
            source,
            target: None,
            dir_key: "manpagedir",
            subdir: Some(format!("man{section}")),
        })
    }

    pub fn source_path(&self, ctx: &ArtifactContext<'_>) -> PathBuf {
        let source = self
            .source
            .replace("$APPDIR", &ctx.dir("appdir").to_string_lossy())
            .replace("$HOMEBREW_PREFIX", &ctx.config.prefix().to_string_lossy());
        let path = expand_tilde(&source, ctx.config.home_dir());
        if path.is_absolute() {
            path
        } else {
            ctx.staged_path.join(path)
        }
    }

    pub fn target_path(&self, ctx: &ArtifactContext<'_>) -> PathBuf {
        let mut dir = ctx.dir(self.dir_key);
        if let Some(sub) = &self.subdir {
            dir = dir.join(sub);
        }
        match self.target.as_deref() {
            Some(target) => {
                let expanded = expand_tilde(target, ctx.config.home_dir());
                if expanded.is_absolute() {
                    expanded
                } else {
                    dir.join(expanded)
                }
            }
            None => {
                let name = Path::new(&self.source)
                    .file_name()
                    .map(|n| n.to_os_string())
                    .unwrap_or_else(|| self.source.clone().into());
                dir.join(name)
            }
        }
    }
}

fn links_to(link: &Path, source: &Path) -> bool {
    fs::read_link(link).is_ok_and(|dest| dest == source)
}

impl ArtifactPhases for Symlinked {
    fn phases(&self) -> Phases {
        Phases::INSTALL | Phases::UNINSTALL
    }

    fn describe(&self) -> String {
        format!("{} '{}'", self.stanza, self.source)
    }

    fn install(&self, ctx: &ArtifactContext<'_>, _run: &mut RunContext, force: bool) -> Result<()> {
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
            if links_to(&target, &source) {
                debug!("{} already links to {}", target.display(), source.display());
                return Ok(());
            }
            if !force {
                return Err(CasketError::Install(format!(
                    "It seems there is already a {} at '{}'.",
                    self.stanza,
                    target.display()
                )));
            }
            warn!("Overwriting existing {} at {}", self.stanza, target.display());
            if !remove_path_robustly(&target, true) {
                return Err(CasketError::Install(format!(
                    "Could not remove existing {}",
                    target.display()
                )));
            }
        }

        if self.stanza == "binary" {
            make_executable(&source)?;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        debug!("Linking {} -> {}", target.display(), source.display());
        #[cfg(unix)]
        unix_fs::symlink(&source, &target)?;
        #[cfg(not(unix))]
        fs::copy(&source, &target)?;
        Ok(())
    }

    /// Only symlinks are removed; anything else at the target is left alone.
    fn uninstall(
        &self,
        ctx: &ArtifactContext<'_>,
        _run: &mut RunContext,
        _flags: UninstallFlags,
    ) -> Result<()> {
        let target = self.target_path(ctx);
        match target.symlink_metadata() {
            Ok(meta) if meta.file_type().is_symlink() => {
                debug!("Removing {} link {}", self.stanza, target.display());
                fs::remove_file(&target)?;
            }
            Ok(_) => warn!(
                "{} is not a symlink, leaving it in place",
                target.display()
            ),
            Err(_) => debug!("{} already removed", target.display()),
        }
        Ok(())
    }
}
