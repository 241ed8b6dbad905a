// casket/src/cli.rs
//! Command-line surface and the output helpers shared by its commands.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use casket_common::config::Config;
use casket_common::error::{CasketError, Result};
use casket_common::formulary::Formulary;
use casket_core::{
    CaskInstaller, CommandFormulaInstaller, InstallStatus, RunContext, XattrQuarantine,
};
use casket_net::HttpDownloader;
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use tracing::{debug, error};

pub mod fetch;
pub mod install;
pub mod reinstall;
pub mod uninstall;
pub mod update;
pub mod upgrade;

use crate::cli::fetch::FetchArgs;
use crate::cli::install::InstallArgs;
use crate::cli::reinstall::ReinstallArgs;
use crate::cli::uninstall::Uninstall;
use crate::cli::update::Update;
use crate::cli::upgrade::UpgradeArgs;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "casket", bin_name = "casket")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Install(InstallArgs),
    Uninstall(Uninstall),
    Reinstall(ReinstallArgs),
    Upgrade(UpgradeArgs),
    Fetch(FetchArgs),
    Update(Update),
}

impl Command {
    pub async fn run(&self, config: &Config) -> Result<()> {
        match self {
            Self::Install(command) => command.run(config).await,
            Self::Uninstall(command) => command.run(config),
            Self::Reinstall(command) => command.run(config).await,
            Self::Upgrade(command) => command.run(config).await,
            Self::Fetch(command) => command.run(config).await,
            Self::Update(command) => command.run(config).await,
        }
    }

    /// Commands that resolve names against the definition listings.
    pub fn reads_definitions(&self) -> bool {
        matches!(
            self,
            Self::Install(_) | Self::Reinstall(_) | Self::Upgrade(_) | Self::Fetch(_)
        )
    }
}

/// Wires the production collaborators into an installer.
pub fn build_installer(config: &Config) -> Result<CaskInstaller> {
    let source = Arc::new(Formulary::new(config.clone())?);
    let backend = Arc::new(HttpDownloader::new(config)?);
    let formulae = Arc::new(CommandFormulaInstaller::new(config.clone()));
    Ok(CaskInstaller::new(
        config.clone(),
        source,
        backend,
        Arc::new(XattrQuarantine::new("casket")),
        formulae,
    ))
}

pub fn print_header(message: &str) {
    println!("{}{}", "==> ".bold().blue(), message.bold());
}

/// One line per package; failures also go to the error log with a hint.
pub fn print_status(verb: &str, name: &str, status: &InstallStatus) {
    match status {
        InstallStatus::Installed => println!("✓ {} {}", verb, name.green()),
        InstallStatus::AlreadyInstalled => {
            println!("{} {} is already installed", "Warning:".yellow(), name.cyan())
        }
        InstallStatus::Skipped(reason) => println!("- Skipped {}: {}", name.cyan(), reason),
        InstallStatus::Failed(e) => print_failure(name, e),
    }
}

pub fn print_failure(name: &str, e: &CasketError) {
    error!("✖ {}: {}", name.cyan(), e);
    if let Some(hint) = e.remediation(name) {
        eprintln!("  {} {}", "Try:".bold(), hint);
    }
}

/// Prints caveats and messages collected during the run.
pub fn render_run(run: RunContext) {
    for message in run.messages() {
        println!("{message}");
    }
    if !run.caveats().is_empty() {
        print_header("Caveats");
        for (token, caveat) in run.caveats() {
            println!("{}:\n{}", token.cyan(), caveat.trim_end());
        }
    }
    for (label, elapsed) in run.timings() {
        debug!("{} took {}", label, humantime::format_duration(*elapsed));
    }
}

/// Groups failures per package and turns them into the command's error.
pub fn finish(action: &str, errors: Vec<(String, CasketError)>) -> Result<()> {
    if errors.is_empty() {
        return Ok(());
    }
    eprintln!("\n{}:", format!("Finished {action} with errors").yellow());
    let mut by_package: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (name, e) in errors {
        by_package.entry(name).or_default().insert(e.to_string());
    }
    for (name, messages) in by_package {
        eprintln!("Package '{}':", name.cyan());
        for message in messages {
            eprintln!("- {}", message.red());
        }
    }
    Err(CasketError::Generic(
        "One or more packages failed.".to_string(),
    ))
}
