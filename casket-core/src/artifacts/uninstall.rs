// casket-core/src/artifacts/uninstall.rs
//! `uninstall` and `zap` directives. Both share one vocabulary; they differ in
//! which phase runs them.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use casket_common::error::{CasketError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use super::helpers::{
    command_failure, expand_path_pattern, is_safe_path, remove_path_robustly, run_if_available,
};
use super::{ArtifactContext, ArtifactPhases, Phases, UninstallFlags};
use crate::context::RunContext;

lazy_static! {
    static ref BUNDLE_ID: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-]*$").unwrap();
    // pkgutil accepts regular expressions, so `*` and `.` pass too.
    static ref PKG_ID: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-*]*$").unwrap();
    static ref SIGNAL: Regex = Regex::new(r"^(SIG)?[A-Z0-9]+$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDirective {
    pub executable: String,
    pub args: Vec<String>,
    pub sudo: bool,
    pub must_succeed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UninstallDirectives {
    pub stanza: &'static str,
    pub early_script: Vec<ScriptDirective>,
    pub launchctl: Vec<String>,
    pub quit: Vec<String>,
    /// (signal, bundle id)
    pub signal: Vec<(String, String)>,
    pub script: Vec<ScriptDirective>,
    pub pkgutil: Vec<String>,
    pub delete: Vec<String>,
    pub trash: Vec<String>,
    pub rmdir: Vec<String>,
}

fn strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn scripts(value: &Value) -> std::result::Result<Vec<ScriptDirective>, String> {
    let entries: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    entries
        .into_iter()
        .map(|entry| match entry {
            Value::String(s) => Ok(ScriptDirective {
                executable: s.clone(),
                args: Vec::new(),
                sudo: false,
                must_succeed: true,
            }),
            Value::Object(o) => Ok(ScriptDirective {
                executable: o
                    .get("executable")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| "script directive missing 'executable'".to_string())?
                    .to_string(),
                args: o.get("args").map(strings).unwrap_or_default(),
                sudo: o.get("sudo").and_then(|v| v.as_bool()).unwrap_or(false),
                must_succeed: o
                    .get("must_succeed")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true),
            }),
            other => Err(format!("unsupported script directive: {other}")),
        })
        .collect()
}

fn signals(value: &Value) -> std::result::Result<Vec<(String, String)>, String> {
    let Some(items) = value.as_array() else {
        return Err(format!("signal directive must be a list: {value}"));
    };
    // Either one pair or a list of pairs.
    if items.len() == 2 && items.iter().all(Value::is_string) {
        let pair = strings(value);
        return Ok(vec![(pair[0].clone(), pair[1].clone())]);
    }
    items
        .iter()
        .map(|pair| match strings(pair).as_slice() {
            [sig, id] => Ok((sig.clone(), id.clone())),
            _ => Err(format!("signal entry must be [signal, bundle_id]: {pair}")),
        })
        .collect()
}

impl UninstallDirectives {
    pub fn from_stanza(stanza: &'static str, value: &Value) -> std::result::Result<Self, String> {
        let mut out = UninstallDirectives {
            stanza,
            ..Default::default()
        };
        let entries: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for entry in entries {
            let Some(obj) = entry.as_object() else {
                return Err(format!("{stanza} entry is not an object: {entry}"));
            };
            for (key, val) in obj {
                match key.as_str() {
                    "early_script" => out.early_script.extend(scripts(val)?),
                    "launchctl" => out.launchctl.extend(strings(val)),
                    "quit" => out.quit.extend(strings(val)),
                    "signal" => out.signal.extend(signals(val)?),
                    "script" => out.script.extend(scripts(val)?),
                    "pkgutil" => out.pkgutil.extend(strings(val)),
                    "delete" => out.delete.extend(strings(val)),
                    "trash" => out.trash.extend(strings(val)),
                    "rmdir" => out.rmdir.extend(strings(val)),
                    other => debug!("Ignoring unsupported {} directive '{}'", stanza, other),
                }
            }
        }
        Ok(out)
    }

    fn run_scripts(
        &self,
        scripts: &[ScriptDirective],
        ctx: &ArtifactContext<'_>,
        flags: UninstallFlags,
    ) -> Result<()> {
        for script in scripts {
            let path = {
                let p = PathBuf::from(&script.executable);
                if p.is_absolute() {
                    p
                } else {
                    ctx.staged_path.join(p)
                }
            };
            if !path.exists() {
                warn!("{} script {} does not exist, skipping", self.stanza, path.display());
                continue;
            }
            let mut cmd = if script.sudo {
                let mut c = Command::new("sudo");
                c.arg(&path);
                c
            } else {
                Command::new(&path)
            };
            cmd.args(&script.args);
            if ctx.staged_path.is_dir() {
                cmd.current_dir(ctx.staged_path);
            }
            debug!("Running {} script {:?}", self.stanza, cmd);
            let output = cmd.output()?;
            if !output.status.success() {
                let msg = command_failure(&script.executable, &output);
                if script.must_succeed && !flags.force {
                    return Err(CasketError::Install(msg));
                }
                warn!("{}", msg);
            }
        }
        Ok(())
    }

    fn run_launchctl(&self) {
        for label in &self.launchctl {
            if !BUNDLE_ID.is_match(label) {
                warn!("Refusing invalid launchctl label '{}'", label);
                continue;
            }
            let loaded = run_if_available("launchctl", &["list", label])
                .is_some_and(|o| o.status.success());
            if !loaded {
                debug!("launchctl job {} is not loaded", label);
                continue;
            }
            debug!("Removing launchctl job {}", label);
            if let Some(out) = run_if_available("launchctl", &["remove", label]) {
                if !out.status.success() {
                    warn!("{}", command_failure("launchctl remove", &out));
                }
            }
        }
    }

    fn run_quit(&self) {
        if !cfg!(target_os = "macos") {
            return;
        }
        for bundle_id in &self.quit {
            if !BUNDLE_ID.is_match(bundle_id) {
                warn!("Refusing invalid bundle id '{}'", bundle_id);
                continue;
            }
            let script = format!("tell application id \"{bundle_id}\" to quit");
            debug!("Quitting {}", bundle_id);
            if let Some(out) = run_if_available("osascript", &["-e", &script]) {
                if !out.status.success() {
                    debug!("Could not quit {}: {}", bundle_id, command_failure("osascript", &out));
                }
            }
        }
    }

    /// Pids of running jobs whose launchd label belongs to `bundle_id`.
    fn running_pids(bundle_id: &str) -> Vec<String> {
        let Some(out) = run_if_available("launchctl", &["list"]) else {
            return Vec::new();
        };
        let app_label = format!("application.{bundle_id}.");
        String::from_utf8_lossy(&out.stdout)
            .lines()
            .filter_map(|line| {
                let cols: Vec<&str> = line.split_whitespace().collect();
                match cols.as_slice() {
                    [pid, _, label] if *pid != "-" && pid.chars().all(|c| c.is_ascii_digit()) => {
                        (*label == bundle_id || label.starts_with(&app_label))
                            .then(|| pid.to_string())
                    }
                    _ => None,
                }
            })
            .collect()
    }

    fn run_signal(&self) {
        for (signal, bundle_id) in &self.signal {
            if !SIGNAL.is_match(signal) || !BUNDLE_ID.is_match(bundle_id) {
                warn!("Refusing invalid signal directive [{}, {}]", signal, bundle_id);
                continue;
            }
            let sig = signal.trim_start_matches("SIG");
            for pid in Self::running_pids(bundle_id) {
                debug!("Sending SIG{} to {} ({})", sig, bundle_id, pid);
                let flag = format!("-{sig}");
                if let Some(out) = run_if_available("kill", &[&flag, &pid]) {
                    if !out.status.success() {
                        debug!("{}", command_failure("kill", &out));
                    }
                }
            }
        }
    }

    fn run_pkgutil(&self) {
        for pattern in &self.pkgutil {
            if !PKG_ID.is_match(pattern) {
                warn!("Refusing invalid pkgutil id '{}'", pattern);
                continue;
            }
            let flag = format!("--pkgs={pattern}");
            let Some(listed) = run_if_available("pkgutil", &[&flag]) else {
                debug!("pkgutil unavailable, skipping {}", pattern);
                continue;
            };
            let receipts = String::from_utf8_lossy(&listed.stdout).to_string();
            for pkg in receipts.lines().map(str::trim).filter(|l| !l.is_empty()) {
                if let Some(files) = run_if_available("pkgutil", &["--only-files", "--files", pkg]) {
                    for file in String::from_utf8_lossy(&files.stdout).lines() {
                        let path = Path::new("/").join(file.trim());
                        if !remove_path_robustly(&path, true) {
                            debug!("Could not remove {} from {}", path.display(), pkg);
                        }
                    }
                }
                debug!("Forgetting package receipt {}", pkg);
                match Command::new("sudo").args(["pkgutil", "--forget", pkg]).output() {
                    Ok(out) if !out.status.success() => {
                        warn!("{}", command_failure("pkgutil --forget", &out))
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Could not run pkgutil --forget {}: {}", pkg, e),
                }
            }
        }
    }

    fn safe_targets(&self, patterns: &[String], ctx: &ArtifactContext<'_>) -> Vec<PathBuf> {
        let home = ctx.config.home_dir();
        let protected = ctx.protected_dirs();
        patterns
            .iter()
            .flat_map(|p| expand_path_pattern(p, home))
            .filter(|path| {
                let safe = is_safe_path(path, home, &protected);
                if !safe {
                    warn!("Refusing to remove unsafe path {}", path.display());
                }
                safe
            })
            .collect()
    }

    fn run_delete(&self, ctx: &ArtifactContext<'_>) {
        for path in self.safe_targets(&self.delete, ctx) {
            debug!("Deleting {}", path.display());
            if !remove_path_robustly(&path, true) {
                warn!("Could not delete {}", path.display());
            }
        }
    }

    fn run_trash(&self, ctx: &ArtifactContext<'_>) {
        for path in self.safe_targets(&self.trash, ctx) {
            if path.symlink_metadata().is_err() {
                continue;
            }
            debug!("Trashing {}", path.display());
            if let Err(e) = trash::delete(&path) {
                warn!("Could not trash {} ({}), deleting instead", path.display(), e);
                remove_path_robustly(&path, true);
            }
        }
    }

    fn run_rmdir(&self, ctx: &ArtifactContext<'_>) {
        for dir in self.safe_targets(&self.rmdir, ctx) {
            if !dir.is_dir() {
                continue;
            }
            let ds_store = dir.join(".DS_Store");
            if ds_store.is_file() {
                let _ = fs::remove_file(&ds_store);
            }
            let empty = fs::read_dir(&dir).is_ok_and(|mut entries| entries.next().is_none());
            if empty {
                debug!("Removing empty directory {}", dir.display());
                if let Err(e) = fs::remove_dir(&dir) {
                    warn!("Could not remove {}: {}", dir.display(), e);
                }
            } else {
                debug!("{} is not empty, keeping it", dir.display());
            }
        }
    }

    /// Everything but `rmdir`, in removal order. A successor keeps the
    /// running app and its jobs alone.
    fn run_main(&self, ctx: &ArtifactContext<'_>, flags: UninstallFlags) -> Result<()> {
        self.run_scripts(&self.early_script, ctx, flags)?;
        if !flags.successor {
            self.run_launchctl();
            self.run_quit();
            self.run_signal();
        }
        self.run_scripts(&self.script, ctx, flags)?;
        self.run_pkgutil();
        self.run_delete(ctx);
        self.run_trash(ctx);
        Ok(())
    }
}

impl ArtifactPhases for UninstallDirectives {
    fn phases(&self) -> Phases {
        if self.stanza == "zap" {
            Phases::ZAP
        } else {
            Phases::UNINSTALL | Phases::POST_UNINSTALL
        }
    }

    fn describe(&self) -> String {
        self.stanza.to_string()
    }

    fn uninstall(
        &self,
        ctx: &ArtifactContext<'_>,
        _run: &mut RunContext,
        flags: UninstallFlags,
    ) -> Result<()> {
        self.run_main(ctx, flags)
    }

    fn post_uninstall(
        &self,
        ctx: &ArtifactContext<'_>,
        _run: &mut RunContext,
        _flags: UninstallFlags,
    ) -> Result<()> {
        self.run_rmdir(ctx);
        Ok(())
    }

    fn zap(&self, ctx: &ArtifactContext<'_>, _run: &mut RunContext) -> Result<()> {
        let flags = UninstallFlags {
            force: true,
            ..Default::default()
        };
        self.run_main(ctx, flags)?;
        self.run_rmdir(ctx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use casket_common::config::Config;
    use casket_common::model::Cask;
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_directive_shapes() {
        let d = UninstallDirectives::from_stanza(
            "uninstall",
            &json!([{
                "quit": "com.example.foo",
                "signal": [["TERM", "com.example.foo"], ["KILL", "com.example.helper"]],
                "pkgutil": ["com.example.foo.*"],
                "script": {"executable": "uninstall.sh", "sudo": true},
                "delete": "/Library/Foo",
                "rmdir": ["~/Library/Foo"],
                "login_item": "Foo"
            }]),
        )
        .unwrap();
        assert_eq!(d.quit, vec!["com.example.foo"]);
        assert_eq!(d.signal.len(), 2);
        assert_eq!(d.signal[1].0, "KILL");
        assert!(d.script[0].sudo);
        assert_eq!(d.delete, vec!["/Library/Foo"]);
        assert_eq!(d.phases(), Phases::UNINSTALL | Phases::POST_UNINSTALL);

        let single = UninstallDirectives::from_stanza("zap", &json!({"signal": ["TERM", "com.x"]}))
            .unwrap();
        assert_eq!(single.signal, vec![("TERM".to_string(), "com.x".to_string())]);
        assert_eq!(single.phases(), Phases::ZAP);
    }

    #[test]
    fn identifiers_are_validated() {
        assert!(BUNDLE_ID.is_match("com.example.foo-bar"));
        assert!(!BUNDLE_ID.is_match("com.example; rm -rf /"));
        assert!(PKG_ID.is_match("com.example.*"));
        assert!(SIGNAL.is_match("TERM"));
        assert!(!SIGNAL.is_match("term"));
    }

    #[test]
    fn zap_deletes_globbed_paths_and_empty_dirs_only() {
        let tmp = tempfile::tempdir().unwrap();
        let home = tmp.path().join("home");
        let config = Config::with_prefix(tmp.path().join("prefix"), home.clone());
        fs::create_dir_all(home.join("Library/Caches/com.example.foo.a")).unwrap();
        fs::create_dir_all(home.join("Library/Caches/com.example.foo.b")).unwrap();
        fs::create_dir_all(home.join("Library/Foo")).unwrap();
        fs::write(home.join("Library/Foo/.DS_Store"), "x").unwrap();
        fs::create_dir_all(home.join("Library/Shared/keep")).unwrap();

        let zap = UninstallDirectives::from_stanza(
            "zap",
            &json!([{
                "delete": ["~/Library/Caches/com.example.foo.*", "~"],
                "rmdir": ["~/Library/Foo", "~/Library/Shared"]
            }]),
        )
        .unwrap();
        let dirs = BTreeMap::new();
        let cask = Cask::default();
        let ctx = ArtifactContext::new(&cask, &config, tmp.path(), &dirs);
        zap.zap(&ctx, &mut RunContext::new()).unwrap();

        assert!(!home.join("Library/Caches/com.example.foo.a").exists());
        assert!(!home.join("Library/Caches/com.example.foo.b").exists());
        assert!(!home.join("Library/Foo").exists());
        assert!(home.join("Library/Shared/keep").is_dir());
        assert!(home.is_dir());
    }

    #[test]
    fn successor_skips_process_directives() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(tmp.path().join("prefix"), tmp.path().join("home"));
        let dirs = BTreeMap::new();
        let cask = Cask::default();
        let ctx = ArtifactContext::new(&cask, &config, tmp.path(), &dirs);
        let target = tmp.path().join("home/Library/Foo.plist");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, "x").unwrap();

        let d = UninstallDirectives::from_stanza(
            "uninstall",
            &json!({"quit": "com.example.foo", "delete": "~/Library/Foo.plist"}),
        )
        .unwrap();
        let flags = UninstallFlags {
            successor: true,
            ..Default::default()
        };
        d.uninstall(&ctx, &mut RunContext::new(), flags).unwrap();
        assert!(!target.exists());
    }
}
