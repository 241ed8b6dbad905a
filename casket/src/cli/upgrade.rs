// casket/src/cli/upgrade.rs
use casket_common::config::Config;
use casket_common::error::{CasketError, Result};
use casket_core::check::installed_cask_version;
use casket_core::{InstallStatus, OutdatedCask, RunContext};
use clap::Args;
use colored::Colorize;

use crate::cli::{build_installer, finish, print_failure, print_header, print_status, render_run};

#[derive(Args, Debug)]
pub struct UpgradeArgs {
    /// Casks to upgrade; every outdated cask when omitted
    #[arg()]
    pub names: Vec<String>,
}

impl UpgradeArgs {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let installer = build_installer(config)?;
        let mut errors: Vec<(String, CasketError)> = Vec::new();

        let targets: Vec<OutdatedCask> = if self.names.is_empty() {
            installer.outdated_casks()?
        } else {
            let mut targets = Vec::new();
            for name in &self.names {
                let loaded = installer.source().load_cask(name).and_then(|latest| {
                    let installed_version = installed_cask_version(config, &latest.token)
                        .ok_or_else(|| CasketError::NotInstalled(latest.token.clone()))?;
                    Ok(OutdatedCask {
                        token: latest.token.clone(),
                        installed_version,
                        latest,
                    })
                });
                match loaded {
                    Ok(target) => targets.push(target),
                    Err(e) => {
                        print_failure(name, &e);
                        errors.push((name.clone(), e));
                    }
                }
            }
            targets
        };

        if targets.is_empty() && errors.is_empty() {
            println!("No outdated casks to upgrade.");
            return Ok(());
        }
        if !targets.is_empty() {
            print_header(&format!("Upgrading {} outdated package(s)", targets.len()));
        }

        let mut run = RunContext::new();
        for target in targets {
            println!(
                "{} {} -> {}",
                target.token.cyan(),
                target.installed_version,
                target.latest.version_str()
            );
            let status = match installer.upgrade(target.latest, &mut run).await {
                Ok(status) => status,
                Err(e) => InstallStatus::Failed(e),
            };
            print_status("Upgraded", &target.token, &status);
            if let InstallStatus::Failed(e) = status {
                errors.push((target.token, e));
            }
        }

        render_run(run);
        finish("upgrading", errors)
    }
}
