// casket-core/src/artifacts/pkg.rs
use std::process::Command;

use casket_common::error::{CasketError, Result};
use serde_json::{Map, Value};
use tracing::debug;

use super::helpers::command_failure;
use super::{ArtifactContext, ArtifactPhases, Phases};
use crate::context::RunContext;

/// A flat installer package run through the system `installer`.
///
/// Removal is left to the cask's `uninstall pkgutil:` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pkg {
    pub path: String,
    pub allow_untrusted: bool,
}

impl Pkg {
    pub fn new(path: String, options: Option<&Map<String, Value>>) -> Self {
        let allow_untrusted = options
            .and_then(|o| o.get("allow_untrusted"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Self {
            path,
            allow_untrusted,
        }
    }
}

impl ArtifactPhases for Pkg {
    fn phases(&self) -> Phases {
        Phases::INSTALL
    }

    fn describe(&self) -> String {
        format!("pkg '{}'", self.path)
    }

    fn install(&self, ctx: &ArtifactContext<'_>, _run: &mut RunContext, _force: bool) -> Result<()> {
        let pkg_path = ctx.staged_path.join(&self.path);
        if !pkg_path.is_file() {
            return Err(CasketError::Install(format!(
                "pkg source {} not found",
                pkg_path.display()
            )));
        }
        if !cfg!(target_os = "macos") {
            return Err(CasketError::Install(format!(
                "cannot run {} outside macOS",
                pkg_path.display()
            )));
        }

        let mut cmd = Command::new("sudo");
        cmd.arg("installer").arg("-pkg").arg(&pkg_path).arg("-target").arg("/");
        if self.allow_untrusted {
            cmd.arg("-allowUntrusted");
        }
        debug!("Running {:?}", cmd);
        let output = cmd.output()?;
        if !output.status.success() {
            return Err(CasketError::Install(command_failure("installer", &output)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn reads_allow_untrusted() {
        let opts = json!({"allow_untrusted": true});
        let pkg = Pkg::new("Foo.pkg".to_string(), opts.as_object());
        assert!(pkg.allow_untrusted);
        assert!(!Pkg::new("Foo.pkg".to_string(), None).allow_untrusted);
        assert_eq!(pkg.phases(), Phases::INSTALL);
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn refuses_to_install_off_macos() {
        use std::collections::BTreeMap;

        use casket_common::config::Config;
        use casket_common::model::Cask;

        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("Foo.pkg"), b"xar!").unwrap();
        let config = Config::with_prefix(tmp.path().join("prefix"), tmp.path().join("home"));
        let dirs = BTreeMap::new();
        let cask = Cask::default();
        let ctx = ArtifactContext::new(&cask, &config, tmp.path(), &dirs);
        assert!(Pkg::new("Foo.pkg".to_string(), None)
            .install(&ctx, &mut RunContext::new(), false)
            .is_err());
    }
}
