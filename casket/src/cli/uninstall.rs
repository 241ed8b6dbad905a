// casket/src/cli/uninstall.rs
use casket_common::config::Config;
use casket_common::error::{CasketError, Result};
use casket_core::{RunContext, UninstallOptions};
use clap::Args;
use colored::Colorize;
use tracing::error;

use crate::cli::{build_installer, finish, print_failure, render_run};

#[derive(Args, Debug)]
pub struct Uninstall {
    /// The casks to uninstall
    #[arg(required = true)]
    pub names: Vec<String>,

    #[arg(long, help = "Remove artifacts even when the cask looks damaged or partly removed")]
    pub force: bool,

    /// Also remove files the cask's zap stanza names: user data, caches and
    /// preferences. Use with caution, data will be lost!
    #[arg(long)]
    pub zap: bool,
}

impl Uninstall {
    pub fn run(&self, config: &Config) -> Result<()> {
        let installer = build_installer(config)?;
        let opts = UninstallOptions {
            force: self.force,
            zap: self.zap,
            successor: false,
        };
        let mut run = RunContext::new();
        let mut errors: Vec<(String, CasketError)> = Vec::new();

        for name in &self.names {
            // Names become Caskroom path components.
            if name.contains('/') || name.contains("..") {
                let msg = format!("Invalid cask name '{name}' contains disallowed characters");
                error!("✖ {msg}");
                errors.push((name.clone(), CasketError::Validation(msg)));
                continue;
            }

            println!("Uninstalling {name}...");
            match installer.uninstall(name, opts, &mut run) {
                Ok(()) if self.zap => println!("✓ Uninstalled and zapped {}", name.green()),
                Ok(()) => println!("✓ Uninstalled {}", name.green()),
                Err(e) => {
                    print_failure(name, &e);
                    errors.push((name.clone(), e));
                }
            }
        }

        render_run(run);
        finish("uninstalling", errors)
    }
}
