// casket-core/src/artifacts/mod.rs
//! Cask artifacts as a closed set of variants, each answering only the phases it supports.

pub mod flight;
pub mod helpers;
pub mod installer;
pub mod moved;
pub mod pkg;
pub mod symlinked;
pub mod uninstall;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use casket_common::config::Config;
use casket_common::error::{CasketError, Result};
use casket_common::model::Cask;
use serde_json::Value;
use tracing::{debug, error, warn};

pub use self::flight::{FlightBlock, FlightStage};
pub use self::installer::Installer;
pub use self::moved::Moved;
pub use self::pkg::Pkg;
pub use self::symlinked::Symlinked;
pub use self::uninstall::UninstallDirectives;
use crate::context::RunContext;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Phases: u8 {
        const INSTALL        = 0b0001;
        const UNINSTALL      = 0b0010;
        const POST_UNINSTALL = 0b0100;
        const ZAP            = 0b1000;
    }
}

/// Everything an artifact needs to locate its source and target.
pub struct ArtifactContext<'a> {
    pub cask: &'a Cask,
    pub config: &'a Config,
    pub staged_path: &'a Path,
    pub dirs: &'a BTreeMap<String, PathBuf>,
}

impl<'a> ArtifactContext<'a> {
    pub fn new(
        cask: &'a Cask,
        config: &'a Config,
        staged_path: &'a Path,
        dirs: &'a BTreeMap<String, PathBuf>,
    ) -> Self {
        Self {
            cask,
            config,
            staged_path,
            dirs,
        }
    }

    /// The directory behind `key`, e.g. `appdir`.
    pub fn dir(&self, key: &str) -> PathBuf {
        self.dirs
            .get(key)
            .cloned()
            .or_else(|| self.config.artifact_dirs().remove(key))
            .unwrap_or_else(|| self.config.prefix().to_path_buf())
    }

    /// Top-level directories a path directive may never remove.
    pub fn protected_dirs(&self) -> Vec<PathBuf> {
        let mut protected: Vec<PathBuf> = self.dirs.values().cloned().collect();
        protected.extend(self.config.artifact_dirs().into_values());
        protected.push(self.config.prefix().to_path_buf());
        protected.extend(
            [
                "/Applications",
                "/Library",
                "/System",
                "/Users",
                "/usr",
                "/bin",
                "/sbin",
                "/etc",
                "/opt",
                "/private",
            ]
            .iter()
            .map(PathBuf::from),
        );
        protected
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UninstallFlags {
    pub force: bool,
    /// The cask is being replaced in place (upgrade or reinstall).
    pub successor: bool,
    /// Tolerate artifacts that are already gone.
    pub skip: bool,
}

/// Capability interface shared by every artifact. Unsupported phases are no-ops.
pub trait ArtifactPhases {
    fn phases(&self) -> Phases;

    fn describe(&self) -> String;

    fn install(&self, _ctx: &ArtifactContext<'_>, _run: &mut RunContext, _force: bool) -> Result<()> {
        Ok(())
    }

    fn uninstall(
        &self,
        _ctx: &ArtifactContext<'_>,
        _run: &mut RunContext,
        _flags: UninstallFlags,
    ) -> Result<()> {
        Ok(())
    }

    fn post_uninstall(
        &self,
        _ctx: &ArtifactContext<'_>,
        _run: &mut RunContext,
        _flags: UninstallFlags,
    ) -> Result<()> {
        Ok(())
    }

    fn zap(&self, _ctx: &ArtifactContext<'_>, _run: &mut RunContext) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Artifact {
    Moved(Moved),
    KeyboardLayout(Moved),
    Mdimporter(Moved),
    Qlplugin(Moved),
    Binary(Symlinked),
    Symlink(Symlinked),
    Installer(Installer),
    Pkg(Pkg),
    Uninstall(UninstallDirectives),
    Zap(UninstallDirectives),
    Flight(FlightBlock),
}

impl Artifact {
    pub fn is_binary(&self) -> bool {
        matches!(self, Artifact::Binary(_))
    }
}

impl ArtifactPhases for Artifact {
    fn phases(&self) -> Phases {
        match self {
            Artifact::Moved(_) | Artifact::Mdimporter(_) | Artifact::Qlplugin(_) => {
                Phases::INSTALL | Phases::UNINSTALL
            }
            Artifact::KeyboardLayout(_) => {
                Phases::INSTALL | Phases::UNINSTALL | Phases::POST_UNINSTALL
            }
            Artifact::Binary(s) | Artifact::Symlink(s) => s.phases(),
            Artifact::Installer(i) => i.phases(),
            Artifact::Pkg(p) => p.phases(),
            Artifact::Uninstall(u) => u.phases(),
            Artifact::Zap(_) => Phases::ZAP,
            Artifact::Flight(f) => f.phases(),
        }
    }

    fn describe(&self) -> String {
        match self {
            Artifact::Moved(m)
            | Artifact::KeyboardLayout(m)
            | Artifact::Mdimporter(m)
            | Artifact::Qlplugin(m) => m.describe(),
            Artifact::Binary(s) | Artifact::Symlink(s) => s.describe(),
            Artifact::Installer(i) => i.describe(),
            Artifact::Pkg(p) => p.describe(),
            Artifact::Uninstall(u) => u.describe(),
            Artifact::Zap(_) => "zap".to_string(),
            Artifact::Flight(f) => f.describe(),
        }
    }

    fn install(&self, ctx: &ArtifactContext<'_>, run: &mut RunContext, force: bool) -> Result<()> {
        match self {
            Artifact::Moved(m) | Artifact::KeyboardLayout(m) => m.install(ctx, force),
            Artifact::Mdimporter(m) => {
                m.install(ctx, force)?;
                moved::reload_mdimporter(&m.target_path(ctx));
                Ok(())
            }
            Artifact::Qlplugin(m) => {
                m.install(ctx, force)?;
                moved::reload_quicklook();
                Ok(())
            }
            Artifact::Binary(s) | Artifact::Symlink(s) => s.install(ctx, run, force),
            Artifact::Installer(i) => i.install(ctx, run, force),
            Artifact::Pkg(p) => p.install(ctx, run, force),
            Artifact::Uninstall(u) => u.install(ctx, run, force),
            Artifact::Zap(_) => Ok(()),
            Artifact::Flight(f) => f.install(ctx, run, force),
        }
    }

    fn uninstall(
        &self,
        ctx: &ArtifactContext<'_>,
        run: &mut RunContext,
        flags: UninstallFlags,
    ) -> Result<()> {
        match self {
            Artifact::Moved(m) | Artifact::KeyboardLayout(m) => m.uninstall(ctx, flags),
            Artifact::Mdimporter(m) => m.uninstall(ctx, flags),
            Artifact::Qlplugin(m) => {
                m.uninstall(ctx, flags)?;
                moved::reload_quicklook();
                Ok(())
            }
            Artifact::Binary(s) | Artifact::Symlink(s) => s.uninstall(ctx, run, flags),
            Artifact::Installer(i) => i.uninstall(ctx, run, flags),
            Artifact::Pkg(p) => p.uninstall(ctx, run, flags),
            Artifact::Uninstall(u) => u.uninstall(ctx, run, flags),
            Artifact::Zap(_) => Ok(()),
            Artifact::Flight(f) => f.uninstall(ctx, run, flags),
        }
    }

    fn post_uninstall(
        &self,
        ctx: &ArtifactContext<'_>,
        run: &mut RunContext,
        flags: UninstallFlags,
    ) -> Result<()> {
        match self {
            Artifact::KeyboardLayout(_) => {
                moved::clear_keyboard_layout_cache();
                Ok(())
            }
            Artifact::Uninstall(u) => u.post_uninstall(ctx, run, flags),
            Artifact::Flight(f) => f.post_uninstall(ctx, run, flags),
            _ => Ok(()),
        }
    }

    fn zap(&self, ctx: &ArtifactContext<'_>, run: &mut RunContext) -> Result<()> {
        match self {
            Artifact::Zap(z) => z.zap(ctx, run),
            _ => Ok(()),
        }
    }
}

fn invalid(cask: &Cask, msg: impl Into<String>) -> CasketError {
    CasketError::InvalidDefinition(cask.token.clone(), msg.into())
}

fn moved_dir_key(stanza: &str) -> Option<&'static str> {
    let key = match stanza {
        "app" | "suite" => "appdir",
        "prefpane" => "prefpanedir",
        "font" => "fontdir",
        "colorpicker" => "colorpickerdir",
        "service" => "servicedir",
        "screen_saver" => "screen_saverdir",
        "input_method" => "input_methoddir",
        "dictionary" => "dictionarydir",
        "audio_unit_plugin" => "audio_unit_plugindir",
        "vst_plugin" => "vst_plugindir",
        "vst3_plugin" => "vst3_plugindir",
        "internet_plugin" => "internet_plugindir",
        "keyboard_layout" => "keyboard_layoutdir",
        "mdimporter" => "mdimporterdir",
        "qlplugin" => "qlplugindir",
        // Generic artifacts must name an absolute target.
        "artifact" => "appdir",
        _ => return None,
    };
    Some(key)
}

/// Splits `["source", ..., {"target": ...}]` into its sources and options.
fn sources_and_options(value: &Value) -> (Vec<String>, Option<&serde_json::Map<String, Value>>) {
    match value {
        Value::String(s) => (vec![s.clone()], None),
        Value::Array(items) => {
            let sources = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            let options = items.iter().find_map(|v| v.as_object());
            (sources, options)
        }
        _ => (Vec::new(), None),
    }
}

fn parse_stanza(cask: &Cask, key: &str, value: &Value, out: &mut Vec<Artifact>) -> Result<()> {
    if let Some(dir_key) = moved_dir_key(key) {
        let (sources, options) = sources_and_options(value);
        if sources.is_empty() {
            return Err(invalid(cask, format!("'{key}' stanza names no source")));
        }
        let target = options
            .and_then(|o| o.get("target"))
            .and_then(|t| t.as_str())
            .map(str::to_string);
        if key == "artifact" && !target.as_deref().is_some_and(|t| t.starts_with('/') || t.starts_with('~')) {
            return Err(invalid(cask, "'artifact' stanza needs an absolute target"));
        }
        for source in sources {
            let moved = Moved {
                stanza: key.to_string(),
                source,
                target: target.clone(),
                dir_key,
            };
            out.push(match key {
                "keyboard_layout" => Artifact::KeyboardLayout(moved),
                "mdimporter" => Artifact::Mdimporter(moved),
                "qlplugin" => Artifact::Qlplugin(moved),
                _ => Artifact::Moved(moved),
            });
        }
        return Ok(());
    }

    match key {
        "binary" | "manpage" => {
            let (sources, options) = sources_and_options(value);
            if sources.is_empty() {
                return Err(invalid(cask, format!("'{key}' stanza names no source")));
            }
            let target = options
                .and_then(|o| o.get("target"))
                .and_then(|t| t.as_str())
                .map(str::to_string);
            for source in sources {
                if key == "binary" {
                    out.push(Artifact::Binary(Symlinked::binary(source, target.clone())));
                } else {
                    let manpage = Symlinked::manpage(source)
                        .ok_or_else(|| invalid(cask, "manpage needs a numbered section extension"))?;
                    out.push(Artifact::Symlink(manpage));
                }
            }
        }
        "installer" => {
            for entry in value.as_array().into_iter().flatten() {
                out.push(Artifact::Installer(
                    Installer::from_stanza(entry).map_err(|m| invalid(cask, m))?,
                ));
            }
        }
        "pkg" => {
            let (sources, options) = sources_and_options(value);
            for source in sources {
                out.push(Artifact::Pkg(Pkg::new(source, options)));
            }
        }
        "uninstall" => out.push(Artifact::Uninstall(
            UninstallDirectives::from_stanza("uninstall", value).map_err(|m| invalid(cask, m))?,
        )),
        "zap" => out.push(Artifact::Zap(
            UninstallDirectives::from_stanza("zap", value).map_err(|m| invalid(cask, m))?,
        )),
        "preflight" | "postflight" | "uninstall_preflight" | "uninstall_postflight" => {
            if let Some(block) = FlightBlock::from_stanza(key, value) {
                out.push(Artifact::Flight(block));
            }
        }
        "stage_only" => debug!("{}: stage_only, nothing to install", cask.token),
        other => debug!("{}: ignoring unsupported artifact stanza '{}'", cask.token, other),
    }
    Ok(())
}

/// Parses every artifact stanza of `cask`, keeping declaration order.
pub fn parse_all(cask: &Cask) -> Result<Vec<Artifact>> {
    let mut artifacts = Vec::new();
    for stanza in cask.artifact_stanzas() {
        let Some(obj) = stanza.as_object() else {
            return Err(invalid(cask, format!("artifact stanza is not an object: {stanza}")));
        };
        for (key, value) in obj {
            parse_stanza(cask, key, value, &mut artifacts)?;
        }
    }
    Ok(artifacts)
}

/// Installs artifacts in order. On failure, the artifacts installed so far are
/// uninstalled in reverse before the error is returned. The failing artifact
/// itself is left alone: its target may belong to someone else.
pub fn install_artifacts(
    artifacts: &[Artifact],
    ctx: &ArtifactContext<'_>,
    run: &mut RunContext,
    force: bool,
) -> Result<()> {
    let mut installed: Vec<&Artifact> = Vec::new();
    for artifact in artifacts {
        if !artifact.phases().contains(Phases::INSTALL) {
            continue;
        }
        if artifact.is_binary() && !ctx.config.binaries {
            debug!("Binaries disabled, skipping {}", artifact.describe());
            continue;
        }
        debug!("Installing {}", artifact.describe());
        if let Err(e) = artifact.install(ctx, run, force) {
            error!(
                "Installing {} for {} failed: {}",
                artifact.describe(),
                ctx.cask.token,
                e
            );
            rollback(&installed, ctx, run, force);
            return Err(CasketError::ArtifactInstall {
                token: ctx.cask.token.clone(),
                artifact: artifact.describe(),
                reason: e.to_string(),
            });
        }
        installed.push(artifact);
    }
    Ok(())
}

fn rollback(installed: &[&Artifact], ctx: &ArtifactContext<'_>, run: &mut RunContext, force: bool) {
    let flags = UninstallFlags {
        force,
        successor: false,
        skip: true,
    };
    for artifact in installed.iter().rev() {
        if !artifact.phases().contains(Phases::UNINSTALL) {
            continue;
        }
        debug!("Reverting {}", artifact.describe());
        if let Err(e) = artifact.uninstall(ctx, run, flags) {
            warn!("Could not revert {}: {}", artifact.describe(), e);
        }
    }
}

fn report_or_fail(flags: UninstallFlags, artifact: &Artifact, phase: &str, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if flags.force => {
            warn!("{} of {} failed, continuing: {}", phase, artifact.describe(), e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Uninstalls in reverse declaration order, then runs post-uninstall cleanup.
/// Under `force`, individual failures are logged and skipped.
pub fn uninstall_artifacts(
    artifacts: &[Artifact],
    ctx: &ArtifactContext<'_>,
    run: &mut RunContext,
    flags: UninstallFlags,
) -> Result<()> {
    for artifact in artifacts.iter().rev() {
        if artifact.phases().contains(Phases::UNINSTALL) {
            debug!("Uninstalling {}", artifact.describe());
            let result = artifact.uninstall(ctx, run, flags);
            report_or_fail(flags, artifact, "uninstall", result)?;
        }
    }
    for artifact in artifacts.iter().rev() {
        if artifact.phases().contains(Phases::POST_UNINSTALL) {
            let result = artifact.post_uninstall(ctx, run, flags);
            report_or_fail(flags, artifact, "post-uninstall", result)?;
        }
    }
    Ok(())
}

/// Runs every zap stanza. Returns false when the cask declares none.
pub fn zap_artifacts(
    artifacts: &[Artifact],
    ctx: &ArtifactContext<'_>,
    run: &mut RunContext,
) -> Result<bool> {
    let mut found = false;
    for artifact in artifacts {
        if artifact.phases().contains(Phases::ZAP) {
            found = true;
            if let Err(e) = artifact.zap(ctx, run) {
                warn!("zap for {} failed, continuing: {}", ctx.cask.token, e);
            }
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::*;

    fn cask(artifacts: Value) -> Cask {
        serde_json::from_value(json!({
            "token": "foo",
            "version": "1.0",
            "artifacts": artifacts
        }))
        .unwrap()
    }

    #[test]
    fn parses_the_artifact_catalogue_in_order() {
        let cask = cask(json!([
            {"preflight": ["echo hi"]},
            {"app": ["Foo.app"]},
            {"binary": ["Foo.app/Contents/MacOS/foo", {"target": "foo"}]},
            {"manpage": ["man/foo.1"]},
            {"qlplugin": ["Foo.qlgenerator"]},
            {"uninstall": [{"quit": "com.example.foo"}]},
            {"zap": [{"trash": "~/Library/Foo"}]},
            {"stage_only": true}
        ]));
        let artifacts = parse_all(&cask).unwrap();
        let kinds: Vec<&str> = artifacts
            .iter()
            .map(|a| match a {
                Artifact::Flight(_) => "flight",
                Artifact::Moved(_) => "moved",
                Artifact::Binary(_) => "binary",
                Artifact::Symlink(_) => "symlink",
                Artifact::Qlplugin(_) => "qlplugin",
                Artifact::Uninstall(_) => "uninstall",
                Artifact::Zap(_) => "zap",
                _ => "other",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["flight", "moved", "binary", "symlink", "qlplugin", "uninstall", "zap"]
        );
        assert_eq!(artifacts[6].phases(), Phases::ZAP);
        assert!(!artifacts[5].phases().contains(Phases::INSTALL));
    }

    #[test]
    fn generic_artifact_requires_absolute_target() {
        let bad = cask(json!([{"artifact": ["Foo"]}]));
        assert!(matches!(parse_all(&bad), Err(CasketError::InvalidDefinition(..))));
        let good = cask(json!([{"artifact": ["Foo", {"target": "~/Foo"}]}]));
        assert_eq!(parse_all(&good).unwrap().len(), 1);
    }

    #[test]
    fn failed_install_reverts_earlier_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(tmp.path().join("prefix"), tmp.path().join("home"));
        let staged = tmp.path().join("staged");
        fs::create_dir_all(staged.join("One.app")).unwrap();
        fs::create_dir_all(staged.join("Three.app")).unwrap();
        let apps = tmp.path().join("Applications");
        let mut dirs = BTreeMap::new();
        dirs.insert("appdir".to_string(), apps.clone());

        let cask = cask(json!([
            {"app": ["One.app"]},
            {"app": ["Missing.app"]},
            {"app": ["Three.app"]}
        ]));
        let artifacts = parse_all(&cask).unwrap();
        let ctx = ArtifactContext::new(&cask, &config, &staged, &dirs);
        let mut run = RunContext::new();

        let err = install_artifacts(&artifacts, &ctx, &mut run, false).unwrap_err();
        match err {
            CasketError::ArtifactInstall { token, artifact, .. } => {
                assert_eq!(token, "foo");
                assert!(artifact.contains("Missing.app"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!apps.join("One.app").exists());
        assert!(!apps.join("Three.app").exists());
        assert!(staged.join("One.app").is_dir());
    }

    #[test]
    fn failed_artifact_is_not_reverted() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(tmp.path().join("prefix"), tmp.path().join("home"));
        let staged = tmp.path().join("staged");
        fs::create_dir_all(&staged).unwrap();
        let apps = tmp.path().join("Applications");
        fs::create_dir_all(apps.join("Foo.app")).unwrap();
        fs::write(apps.join("Foo.app/user-file"), "mine").unwrap();
        let mut dirs = BTreeMap::new();
        dirs.insert("appdir".to_string(), apps.clone());

        let cask = cask(json!([{"app": ["Foo.app"]}]));
        let artifacts = parse_all(&cask).unwrap();
        let ctx = ArtifactContext::new(&cask, &config, &staged, &dirs);

        assert!(install_artifacts(&artifacts, &ctx, &mut RunContext::new(), false).is_err());
        assert!(apps.join("Foo.app/user-file").is_file());
        assert!(!staged.join("Foo.app").exists());
    }

    #[test]
    fn binaries_are_skipped_when_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::with_prefix(tmp.path().join("prefix"), tmp.path().join("home"));
        config.binaries = false;
        let staged = tmp.path().join("staged");
        fs::create_dir_all(staged.join("bin")).unwrap();
        fs::write(staged.join("bin/foo"), "#!/bin/sh\n").unwrap();
        let dirs = config.artifact_dirs();

        let cask = cask(json!([{"binary": ["bin/foo"]}]));
        let artifacts = parse_all(&cask).unwrap();
        let ctx = ArtifactContext::new(&cask, &config, &staged, &dirs);
        install_artifacts(&artifacts, &ctx, &mut RunContext::new(), false).unwrap();
        assert!(!config.bin_dir().join("foo").exists());
    }

    #[test]
    fn zap_reports_absence() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(tmp.path().join("prefix"), tmp.path().join("home"));
        let dirs = config.artifact_dirs();
        let cask = cask(json!([{"app": ["Foo.app"]}]));
        let artifacts = parse_all(&cask).unwrap();
        let ctx = ArtifactContext::new(&cask, &config, tmp.path(), &dirs);
        assert!(!zap_artifacts(&artifacts, &ctx, &mut RunContext::new()).unwrap());
    }
}
