// casket/src/cli/update.rs
use casket_common::cache::Cache;
use casket_common::config::Config;
use casket_common::error::Result;
use casket_net::api;

use crate::cli::print_header;

/// Refreshes the cached formula and cask listings.
#[derive(clap::Args, Debug)]
pub struct Update {
    /// Download the listings even when the cached copies are fresh
    #[arg(long)]
    pub force: bool,
}

impl Update {
    pub async fn run(&self, config: &Config) -> Result<()> {
        tracing::debug!("Running manual update...");
        let cache = Cache::new(config)?;
        tracing::debug!("Using cache directory: {}", cache.get_dir().display());

        print_header("Updating package lists");
        let refreshed = api::refresh_api_cache(&cache, self.force).await?;
        if refreshed.is_empty() {
            println!("Already up-to-date.");
        } else {
            for file in refreshed {
                println!("Cached {file}");
            }
        }
        println!("Update completed successfully!");
        Ok(())
    }
}
