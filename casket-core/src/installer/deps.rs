// casket-core/src/installer/deps.rs
use std::env;
use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use casket_common::config::Config;
use casket_common::error::{CasketError, Result};
use casket_common::model::Formula;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::check::is_formula_installed;

pub const FORMULA_INSTALLER_VAR: &str = "HOMEBREW_FORMULA_INSTALLER";
const DEFAULT_FORMULA_INSTALLER: &str = "brew";

/// The sibling installer for packages built from source or bottles.
#[async_trait]
pub trait FormulaInstaller: Send + Sync {
    fn is_installed(&self, name: &str) -> bool;

    async fn install(&self, formula: &Formula, as_dependency: bool) -> Result<()>;
}

/// Delegates formula installs to an external command.
///
/// Runs `<program> install --formula <name>`. Dependencies are then marked with
/// `<program> tab --no-installed-on-request <name>` so the tool does not treat
/// them as explicitly requested.
pub struct CommandFormulaInstaller {
    program: String,
    config: Config,
}

impl CommandFormulaInstaller {
    pub fn new(config: Config) -> Self {
        let program = env::var(FORMULA_INSTALLER_VAR)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FORMULA_INSTALLER.to_string());
        Self { program, config }
    }

    pub fn with_program(config: Config, program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            config,
        }
    }
}

#[async_trait]
impl FormulaInstaller for CommandFormulaInstaller {
    fn is_installed(&self, name: &str) -> bool {
        is_formula_installed(&self.config, name)
    }

    async fn install(&self, formula: &Formula, as_dependency: bool) -> Result<()> {
        let program = which::which(&self.program).map_err(|_| {
            CasketError::Install(format!(
                "Formula '{}' is required, but '{}' was not found on PATH (set {})",
                formula.name, self.program, FORMULA_INSTALLER_VAR
            ))
        })?;
        debug!(
            "Installing formula {} via {} (dependency: {})",
            formula.full_name(),
            program.display(),
            as_dependency
        );
        let full_name = formula.full_name();
        let output = run(&program, &["install", "--formula", &full_name]).await?;
        if !output.status.success() {
            return Err(CasketError::Install(format!(
                "{} install {} failed: {}",
                self.program,
                formula.name,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        if as_dependency {
            // Older tools lack `tab`; the install itself still counts.
            match run(&program, &["tab", "--no-installed-on-request", &full_name]).await {
                Ok(out) if out.status.success() => {}
                Ok(out) => warn!(
                    "Could not mark {} as a dependency: {}",
                    formula.name,
                    String::from_utf8_lossy(&out.stderr).trim()
                ),
                Err(e) => warn!("Could not mark {} as a dependency: {}", formula.name, e),
            }
        }
        Ok(())
    }
}

async fn run(program: &Path, args: &[&str]) -> Result<Output> {
    Ok(Command::new(program).args(args).output().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_program_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(tmp.path().join("prefix"), tmp.path().join("home"));
        let installer = CommandFormulaInstaller::with_program(config, "definitely-not-a-real-tool");
        let formula = Formula {
            name: "unar".to_string(),
            ..Default::default()
        };
        assert!(!installer.is_installed("unar"));
        assert!(matches!(
            installer.install(&formula, true).await,
            Err(CasketError::Install(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dependencies_are_marked_not_on_request() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(tmp.path().join("prefix"), tmp.path().join("home"));
        let log = tmp.path().join("calls.log");
        let tool = tmp.path().join("fake-brew");
        std::fs::write(
            &tool,
            format!("#!/bin/sh\necho \"$@\" >> '{}'\n", log.display()),
        )
        .unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let installer = CommandFormulaInstaller::with_program(config, tool.to_string_lossy());
        let formula = Formula {
            name: "unar".to_string(),
            ..Default::default()
        };
        installer.install(&formula, true).await.unwrap();
        installer.install(&formula, false).await.unwrap();

        let calls = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = calls.lines().collect();
        assert_eq!(
            lines,
            vec![
                "install --formula unar",
                "tab --no-installed-on-request unar",
                "install --formula unar",
            ]
        );
    }
}
