// casket/src/cli/reinstall.rs
use casket_common::config::Config;
use casket_common::error::Result;
use casket_core::{InstallOptions, InstallStatus, RunContext};
use clap::Args;
use tracing::instrument;

use crate::cli::{build_installer, finish, print_status, render_run};

#[derive(Args, Debug)]
pub struct ReinstallArgs {
    #[arg(required = true)]
    pub names: Vec<String>,
}

impl ReinstallArgs {
    #[instrument(skip(self, config), fields(targets = ?self.names))]
    pub async fn run(&self, config: &Config) -> Result<()> {
        let installer = build_installer(config)?;
        let opts = InstallOptions {
            reinstall: true,
            ..InstallOptions::default()
        };
        let mut run = RunContext::new();
        let report = installer.install_batch(&self.names, opts, &mut run).await;

        let mut errors = Vec::new();
        for (name, status) in report.outcomes {
            print_status("Reinstalled", &name, &status);
            if let InstallStatus::Failed(e) = status {
                errors.push((name, e));
            }
        }
        render_run(run);
        finish("reinstalling", errors)
    }
}
