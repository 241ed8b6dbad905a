// casket-core/src/batch.rs
//! Installing several casks in one command.
//!
//! Downloads run concurrently up front; staging and artifacts then go one
//! cask at a time. A failure in one cask never aborts the others.

use std::sync::Arc;

use casket_common::error::CasketError;
use casket_common::model::Cask;
use tracing::{debug, error, info};

use crate::check::is_cask_installed;
use crate::context::RunContext;
use crate::installer::{metadata, CaskInstaller, InstallOptions, InstallStatus};

/// Outcome of every requested name, in request order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<(String, InstallStatus)>,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, s)| !s.is_failure())
            .map(|(n, _)| n.as_str())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &CasketError)> {
        self.outcomes.iter().filter_map(|(n, s)| match s {
            InstallStatus::Failed(e) => Some((n.as_str(), e)),
            _ => None,
        })
    }

    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }

    fn set(&mut self, name: &str, status: InstallStatus) {
        if let Some(slot) = self.outcomes.iter_mut().find(|(n, _)| n == name) {
            slot.1 = status;
        }
    }
}

impl CaskInstaller {
    pub async fn install_batch(
        &self,
        names: &[String],
        opts: InstallOptions,
        run: &mut RunContext,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        let mut pending: Vec<(String, Arc<Cask>)> = Vec::new();

        for name in names {
            if report.outcomes.iter().any(|(n, _)| n == name) {
                debug!("Ignoring duplicate request for {}", name);
                continue;
            }
            report
                .outcomes
                .push((name.clone(), InstallStatus::Skipped("not processed".to_string())));

            let cask = match self.source.load_cask(name) {
                Ok(cask) => cask,
                Err(e) => {
                    error!("Could not load {}: {}", name, e);
                    report.set(name, InstallStatus::Failed(e));
                    continue;
                }
            };

            if is_cask_installed(&self.config, &cask.token) && !opts.force && !opts.reinstall {
                info!("Cask {} is already installed", cask.token);
                if let Err(e) = metadata::set_installed_on_request(&self.config, &cask.token) {
                    debug!("Could not update tab of {}: {}", cask.token, e);
                }
                report.set(name, InstallStatus::AlreadyInstalled);
                continue;
            }

            if let Err(e) = self.preflight_checks(&cask, &opts, run) {
                report.set(name, InstallStatus::Failed(e));
                continue;
            }
            pending.push((name.clone(), cask));
        }

        if pending.is_empty() {
            return report;
        }

        let casks: Vec<Arc<Cask>> = pending.iter().map(|(_, c)| Arc::clone(c)).collect();
        let started = run.start_timer();
        let fetched = self.fetcher.fetch_batch(&casks, opts.force).await;
        run.finish_timer("batch fetch", started);

        for (name, cask) in pending {
            if let Some((_, e)) = fetched.failed.iter().find(|(t, _)| *t == cask.token) {
                report.set(&name, InstallStatus::Failed(e.clone()));
                continue;
            }
            // The download is memoized, so the install below reuses it.
            let status = match self.install(cask, opts, run).await {
                Ok(status) => status,
                Err(e) => InstallStatus::Failed(e),
            };
            report.set(&name, status);
        }
        report
    }
}
