// casket-core/src/installer/mod.rs
//! The install transaction: checks, dependencies, fetch, stage, artifacts, commit.
//!
//! Anything that fails after the first filesystem mutation is compensated for
//! before the error leaves this module: partial stages are purged, installed
//! artifacts are reverted and, when a backup was taken, it is put back.

pub mod backup;
pub mod deps;
pub mod metadata;
pub mod uninstall;

use std::path::Path;
use std::sync::Arc;

use async_recursion::async_recursion;
use casket_common::config::Config;
use casket_common::dependency::DependencyGraphBuilder;
use casket_common::error::{CasketError, Result};
use casket_common::formulary::PackageSource;
use casket_common::model::{Cask, Package};
use casket_net::DownloadBackend;
use tracing::{debug, error, info, warn};

pub use self::deps::{CommandFormulaInstaller, FormulaInstaller};
pub use self::uninstall::UninstallOptions;
use crate::artifacts::{self, ArtifactContext};
use crate::check::{installed_cask_version, is_cask_installed, is_formula_installed};
use crate::context::{RunContext, TransactionState};
use crate::fetch::FetchCoordinator;
use crate::stage::{QuarantineService, Stager};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// Overwrite existing artifacts and lift the checksum requirement.
    pub force: bool,
    pub skip_cask_deps: bool,
    /// Uninstall the current install before installing again.
    pub reinstall: bool,
    pub installed_as_dependency: bool,
}

/// How an install request ended. "Already installed" is an outcome, not an error.
#[derive(Debug, Clone)]
pub enum InstallStatus {
    Installed,
    AlreadyInstalled,
    Skipped(String),
    Failed(CasketError),
}

impl InstallStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, InstallStatus::Failed(_))
    }
}

/// Tab flags carried into the commit step.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TabFlags {
    pub installed_as_dependency: bool,
    pub installed_on_request: bool,
}

pub struct CaskInstaller {
    pub(crate) config: Config,
    pub(crate) source: Arc<dyn PackageSource>,
    pub(crate) fetcher: Arc<FetchCoordinator>,
    stager: Stager,
    formulae: Arc<dyn FormulaInstaller>,
    graph: DependencyGraphBuilder,
}

impl CaskInstaller {
    pub fn new(
        config: Config,
        source: Arc<dyn PackageSource>,
        backend: Arc<dyn DownloadBackend>,
        quarantine: Arc<dyn QuarantineService>,
        formulae: Arc<dyn FormulaInstaller>,
    ) -> Self {
        let fetcher = Arc::new(FetchCoordinator::new(
            &config,
            backend,
            Arc::clone(&quarantine),
        ));
        let stager = Stager::new(quarantine, config.quarantine);
        let graph = DependencyGraphBuilder::new(Arc::clone(&source));
        Self {
            config,
            source,
            fetcher,
            stager,
            formulae,
            graph,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn source(&self) -> &Arc<dyn PackageSource> {
        &self.source
    }

    pub fn fetcher(&self) -> &Arc<FetchCoordinator> {
        &self.fetcher
    }

    /// Transitive dependencies of `cask`, dependencies first.
    pub fn plan(&self, cask: &Arc<Cask>) -> Result<Vec<Package>> {
        self.graph.resolve(&Package::Cask(Arc::clone(cask)))
    }

    /// Read-only checks that must pass before anything is fetched or written.
    pub fn preflight_checks(&self, cask: &Arc<Cask>, opts: &InstallOptions, run: &mut RunContext) -> Result<()> {
        run.transition(&cask.token, TransactionState::PolicyCheck);
        let root = Package::Cask(Arc::clone(cask));
        self.config
            .policy
            .check(&root, || self.graph.resolve(&root), opts.skip_cask_deps)?;
        self.check_conflicts(cask)?;
        self.fetcher.check_checksum_policy(cask, opts.force)?;
        Ok(())
    }

    fn check_conflicts(&self, cask: &Cask) -> Result<()> {
        for other in cask.conflicting_casks() {
            if other != cask.token && is_cask_installed(&self.config, &other) {
                return Err(CasketError::Conflict {
                    token: cask.token.clone(),
                    conflicting: other,
                });
            }
        }
        for formula in cask.conflicting_formulae() {
            if is_formula_installed(&self.config, &formula) {
                return Err(CasketError::Conflict {
                    token: cask.token.clone(),
                    conflicting: formula,
                });
            }
        }
        Ok(())
    }

    /// Installs whatever `cask` depends on that is not already present.
    /// Cask dependencies go through this same transaction.
    pub(crate) async fn satisfy_dependencies(
        &self,
        cask: &Arc<Cask>,
        opts: &InstallOptions,
        run: &mut RunContext,
    ) -> Result<()> {
        let dependencies = self.plan(cask)?;
        if dependencies.is_empty() {
            return Ok(());
        }
        debug!(
            "{} depends on: {}",
            cask.token,
            dependencies
                .iter()
                .map(|d| d.name().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        for dependency in dependencies {
            match dependency {
                Package::Formula(formula) => {
                    if self.formulae.is_installed(&formula.name) {
                        continue;
                    }
                    info!("Installing formula dependency {} for {}", formula.name, cask.token);
                    self.formulae.install(&formula, true).await?;
                }
                Package::Cask(dep) => {
                    if opts.skip_cask_deps {
                        debug!("Skipping cask dependency {}", dep.token);
                        continue;
                    }
                    if is_cask_installed(&self.config, &dep.token) {
                        continue;
                    }
                    info!("Installing cask dependency {} for {}", dep.token, cask.token);
                    let dep_opts = InstallOptions {
                        installed_as_dependency: true,
                        ..InstallOptions::default()
                    };
                    if let InstallStatus::Failed(e) = self.install(dep, dep_opts, run).await? {
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    #[async_recursion]
    pub async fn install(
        &self,
        cask: Arc<Cask>,
        opts: InstallOptions,
        run: &mut RunContext,
    ) -> Result<InstallStatus> {
        let token = cask.token.clone();
        debug!("Installing cask {} ({:?})", token, opts);
        run.transition(&token, TransactionState::Idle);
        let installed = is_cask_installed(&self.config, &token);

        if installed && !opts.reinstall && !opts.force {
            debug!("Cask {} is already installed", token);
            if !opts.installed_as_dependency {
                metadata::set_installed_on_request(&self.config, &token)?;
            }
            return Ok(InstallStatus::AlreadyInstalled);
        }

        self.preflight_checks(&cask, &opts, run)?;
        let artifact_list = artifacts::parse_all(&cask)?;
        self.satisfy_dependencies(&cask, &opts, run).await?;
        if let Some(caveats) = cask.caveats.as_deref() {
            run.add_caveat(&token, caveats);
        }

        run.transition(&token, TransactionState::Fetch);
        let started = run.start_timer();
        let download = self.fetcher.fetch(&cask, opts.force).await?;
        run.finish_timer(format!("{token}: fetch"), started);

        // Keep how the existing install was requested across a reinstall.
        let previous_tab = metadata::load_tab(&self.config, &token);
        if opts.reinstall && installed {
            self.uninstall(
                &token,
                UninstallOptions {
                    force: true,
                    successor: true,
                    ..Default::default()
                },
                run,
            )?;
        }
        let flags = match previous_tab.filter(|_| installed) {
            Some(tab) if opts.reinstall => TabFlags {
                installed_as_dependency: tab.installed_as_dependency,
                installed_on_request: tab.installed_on_request,
            },
            Some(tab) => TabFlags {
                installed_as_dependency: tab.installed_as_dependency && opts.installed_as_dependency,
                installed_on_request: tab.installed_on_request || !opts.installed_as_dependency,
            },
            None => TabFlags {
                installed_as_dependency: opts.installed_as_dependency,
                installed_on_request: !opts.installed_as_dependency,
            },
        };

        // A forced install over a live one replaces it the way an upgrade does,
        // so a failure leaves the old install working.
        let predecessor = match installed_cask_version(&self.config, &token) {
            Some(old_version) if opts.force && !opts.reinstall => {
                Some(self.predecessor(&token, old_version)?)
            }
            _ => None,
        };
        if let Some(old) = &predecessor {
            if let Err(e) = self.start_upgrade(old, true, run) {
                self.revert_upgrade(old, run);
                return Err(e);
            }
        }

        match self.stage_and_commit(&cask, &artifact_list, &download, opts.force, flags, run) {
            Ok(()) => {
                if let Some(old) = &predecessor {
                    self.finalize_upgrade(old);
                }
                info!("{} was successfully installed!", token);
                Ok(InstallStatus::Installed)
            }
            Err(e) => {
                if let Some(old) = &predecessor {
                    self.revert_upgrade(old, run);
                }
                Err(e)
            }
        }
    }

    /// Stage, install artifacts and write bookkeeping. On failure the new
    /// version's files are purged before the error is returned.
    pub(crate) fn stage_and_commit(
        &self,
        cask: &Cask,
        artifact_list: &[artifacts::Artifact],
        download: &Path,
        force: bool,
        flags: TabFlags,
        run: &mut RunContext,
    ) -> Result<()> {
        let token = &cask.token;
        let version = cask.version_str();
        let staged = self.config.cask_version_path(token, &version);

        run.transition(token, TransactionState::Stage);
        let started = run.start_timer();
        if let Err(e) = self.stager.stage(cask, download, &staged) {
            self.purge_after_failure(token, &version, run);
            return Err(e);
        }
        run.finish_timer(format!("{token}: stage"), started);

        run.transition(token, TransactionState::InstallArtifacts);
        let dirs = metadata::merged_artifact_dirs(&self.config, token);
        let ctx = ArtifactContext::new(cask, &self.config, &staged, &dirs);
        let started = run.start_timer();
        if let Err(e) = artifacts::install_artifacts(artifact_list, &ctx, run, force) {
            self.purge_after_failure(token, &version, run);
            return Err(e);
        }
        run.finish_timer(format!("{token}: install artifacts"), started);

        run.transition(token, TransactionState::Commit);
        let commit = || -> Result<()> {
            let caskfile = metadata::save_caskfile(&self.config, cask)?;
            metadata::write_config_store(&self.config, token, &dirs)?;
            metadata::write_download_sha(&self.config, token, download)?;
            metadata::write_tab(
                &self.config,
                cask,
                flags.installed_as_dependency,
                flags.installed_on_request,
                &caskfile,
            )
        };
        if let Err(e) = commit() {
            error!("Writing metadata for {} failed: {}", token, e);
            let flags = artifacts::UninstallFlags {
                force: true,
                skip: true,
                successor: false,
            };
            if let Err(undo) = artifacts::uninstall_artifacts(artifact_list, &ctx, run, flags) {
                warn!("Could not revert artifacts of {}: {}", token, undo);
            }
            self.purge_after_failure(token, &version, run);
            return Err(e);
        }
        Ok(())
    }

    fn purge_after_failure(&self, token: &str, version: &str, run: &mut RunContext) {
        run.transition(token, TransactionState::Rollback);
        if let Err(e) = metadata::purge_versioned_files(&self.config, token, version) {
            warn!("Could not purge staged files of {}: {}", token, e);
        }
    }
}
