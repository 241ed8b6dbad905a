// casket/src/cli/fetch.rs
use std::sync::Arc;

use casket_common::config::Config;
use casket_common::error::{CasketError, Result};
use casket_common::model::Cask;
use clap::Args;
use colored::Colorize;

use crate::cli::{build_installer, finish, print_failure};

/// Downloads casks into the cache without installing them.
#[derive(Args, Debug)]
pub struct FetchArgs {
    #[arg(required = true)]
    pub names: Vec<String>,

    #[arg(long, help = "Download even when no checksum is declared and one is required")]
    pub force: bool,
}

impl FetchArgs {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let installer = build_installer(config)?;
        let mut errors: Vec<(String, CasketError)> = Vec::new();
        let mut casks: Vec<Arc<Cask>> = Vec::new();

        for name in &self.names {
            match installer.source().load_cask(name) {
                Ok(cask) => casks.push(cask),
                Err(e) => {
                    print_failure(name, &e);
                    errors.push((name.clone(), e));
                }
            }
        }

        let report = installer.fetcher().fetch_batch(&casks, self.force).await;
        for cask in &casks {
            if let Some(path) = report.fetched.get(&cask.token) {
                println!("✓ Downloaded {}: {}", cask.token.green(), path.display());
            }
        }
        for (token, e) in report.failed {
            print_failure(&token, &e);
            errors.push((token, e));
        }
        finish("fetching", errors)
    }
}
