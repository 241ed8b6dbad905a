// casket/src/cli/install.rs
use casket_common::config::Config;
use casket_common::error::{CasketError, Result};
use casket_core::{CaskInstaller, InstallOptions, InstallStatus, RunContext};
use clap::Args;
use colored::Colorize;
use dialoguer::Confirm;
use tracing::{instrument, warn};

use crate::cli::{build_installer, finish, print_header, print_status, render_run};

#[derive(Debug, Args)]
pub struct InstallArgs {
    #[arg(required = true)]
    names: Vec<String>,

    #[arg(long, help = "Overwrite existing artifacts and allow casks without a checksum")]
    force: bool,
    #[arg(long, help = "Do not install cask dependencies")]
    skip_cask_deps: bool,
    #[arg(long, help = "Do not link binaries into the binary directory")]
    no_binaries: bool,
    #[arg(long, help = "Refuse casks that do not declare a sha256 checksum")]
    require_sha: bool,
    #[arg(long, help = "Do not mark downloads and staged files as quarantined")]
    no_quarantine: bool,
    #[arg(long, help = "Show what would be installed and ask before downloading")]
    ask: bool,
}

impl InstallArgs {
    #[instrument(skip(self, config), fields(targets = ?self.names))]
    pub async fn run(&self, config: &Config) -> Result<()> {
        let mut config = config.clone();
        if self.no_binaries {
            config.binaries = false;
        }
        if self.require_sha {
            config.require_sha = true;
        }
        if self.no_quarantine {
            config.quarantine = false;
        }
        let installer = build_installer(&config)?;

        if self.ask && !confirm_plan(&installer, &self.names, self.skip_cask_deps)? {
            println!("Installation cancelled.");
            return Ok(());
        }

        let opts = InstallOptions {
            force: self.force,
            skip_cask_deps: self.skip_cask_deps,
            ..InstallOptions::default()
        };
        let mut run = RunContext::new();
        let report = installer.install_batch(&self.names, opts, &mut run).await;

        let mut errors = Vec::new();
        for (name, status) in report.outcomes {
            print_status("Installed", &name, &status);
            if let InstallStatus::Failed(e) = status {
                errors.push((name, e));
            }
        }
        render_run(run);
        finish("installing", errors)
    }
}

/// Lists each requested cask with the dependencies it would pull in.
fn confirm_plan(installer: &CaskInstaller, names: &[String], skip_cask_deps: bool) -> Result<bool> {
    print_header("Installation plan");
    for name in names {
        let cask = match installer.source().load_cask(name) {
            Ok(cask) => cask,
            Err(e) => {
                warn!("Cannot plan {}: {}", name, e);
                continue;
            }
        };
        println!("{} {}", cask.token.green(), cask.version_str());
        match installer.plan(&cask) {
            Ok(dependencies) => {
                for dependency in dependencies {
                    if skip_cask_deps && dependency.as_cask().is_some() {
                        continue;
                    }
                    println!("  {} {}", "depends on".dimmed(), dependency.full_name());
                }
            }
            Err(e) => println!("  {} {}", "cannot resolve dependencies:".red(), e),
        }
    }
    Confirm::new()
        .with_prompt("Proceed with installation?")
        .default(false)
        .interact()
        .map_err(|e| CasketError::Generic(format!("Could not read confirmation: {e}")))
}
