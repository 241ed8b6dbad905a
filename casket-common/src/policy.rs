// casket-common/src/policy.rs
//! Operator policy: which taps and packages may be installed.

use std::collections::BTreeSet;
use std::env;

use tracing::debug;

use crate::error::{CasketError, Result};
use crate::model::cask::DEFAULT_CASK_TAP;
use crate::model::formula::DEFAULT_FORMULA_TAP;
use crate::model::{Package, PackageKind};

pub const ALLOWED_TAPS_VAR: &str = "HOMEBREW_ALLOWED_TAPS";
pub const FORBIDDEN_TAPS_VAR: &str = "HOMEBREW_FORBIDDEN_TAPS";
pub const FORBIDDEN_FORMULAE_VAR: &str = "HOMEBREW_FORBIDDEN_FORMULAE";
pub const FORBIDDEN_CASKS_VAR: &str = "HOMEBREW_FORBIDDEN_CASKS";
pub const FORBID_CASKS_VAR: &str = "HOMEBREW_FORBID_CASKS";
pub const FORBIDDEN_OWNER_VAR: &str = "HOMEBREW_FORBIDDEN_OWNER";
pub const FORBIDDEN_OWNER_CONTACT_VAR: &str = "HOMEBREW_FORBIDDEN_OWNER_CONTACT";

const DEFAULT_OWNER: &str = "you";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagePolicy {
    pub allowed_taps: BTreeSet<String>,
    pub forbidden_taps: BTreeSet<String>,
    pub forbidden_formulae: BTreeSet<String>,
    pub forbidden_casks: BTreeSet<String>,
    pub forbid_all_casks: bool,
    pub owner: String,
    pub owner_contact: Option<String>,
}

impl Default for PackagePolicy {
    fn default() -> Self {
        Self {
            allowed_taps: BTreeSet::new(),
            forbidden_taps: BTreeSet::new(),
            forbidden_formulae: BTreeSet::new(),
            forbidden_casks: BTreeSet::new(),
            forbid_all_casks: false,
            owner: DEFAULT_OWNER.to_string(),
            owner_contact: None,
        }
    }
}

/// `user/homebrew-repo` and `user/repo` name the same tap.
fn normalize_tap(raw: &str) -> String {
    let lowered = raw.to_ascii_lowercase();
    match lowered.split_once('/') {
        Some((user, repo)) => {
            format!("{}/{}", user, repo.strip_prefix("homebrew-").unwrap_or(repo))
        }
        None => lowered,
    }
}

fn is_official_tap(tap: &str) -> bool {
    tap == DEFAULT_CASK_TAP || tap == DEFAULT_FORMULA_TAP
}

fn word_set(raw: Option<String>, normalize: fn(&str) -> String) -> BTreeSet<String> {
    raw.map(|s| s.split_whitespace().map(normalize).collect())
        .unwrap_or_default()
}

fn lowercase(s: &str) -> String {
    s.to_ascii_lowercase()
}

impl PackagePolicy {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the policy from any variable lookup; used with the process
    /// environment and with fixed maps in tests.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let forbid_all_casks = non_empty(FORBID_CASKS_VAR)
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(false);
        Self {
            allowed_taps: word_set(non_empty(ALLOWED_TAPS_VAR), normalize_tap),
            forbidden_taps: word_set(non_empty(FORBIDDEN_TAPS_VAR), normalize_tap),
            forbidden_formulae: word_set(non_empty(FORBIDDEN_FORMULAE_VAR), lowercase),
            forbidden_casks: word_set(non_empty(FORBIDDEN_CASKS_VAR), lowercase),
            forbid_all_casks,
            owner: non_empty(FORBIDDEN_OWNER_VAR).unwrap_or_else(|| DEFAULT_OWNER.to_string()),
            owner_contact: non_empty(FORBIDDEN_OWNER_CONTACT_VAR),
        }
    }

    /// No list or flag is set.
    pub fn is_empty(&self) -> bool {
        self.allowed_taps.is_empty()
            && self.forbidden_taps.is_empty()
            && self.forbidden_formulae.is_empty()
            && self.forbidden_casks.is_empty()
            && !self.forbid_all_casks
    }

    /// Checks `root` and, unless `skip_dependencies` is set, everything
    /// `dependencies` returns. The closure is never called for an empty policy.
    pub fn check<F>(&self, root: &Package, dependencies: F, skip_dependencies: bool) -> Result<()>
    where
        F: FnOnce() -> Result<Vec<Package>>,
    {
        if self.is_empty() {
            return Ok(());
        }
        self.check_package(root)?;
        if skip_dependencies {
            return Ok(());
        }
        for dependency in dependencies()? {
            self.check_package(&dependency)?;
        }
        Ok(())
    }

    pub fn check_package(&self, package: &Package) -> Result<()> {
        let tap = normalize_tap(&package.tap());
        if !self.allowed_taps.is_empty()
            && !is_official_tap(&tap)
            && !self.allowed_taps.contains(&tap)
        {
            return Err(self.violation(package, ALLOWED_TAPS_VAR));
        }
        if self.forbidden_taps.contains(&tap) {
            return Err(self.violation(package, FORBIDDEN_TAPS_VAR));
        }

        let (forbidden, variable) = match package.kind() {
            PackageKind::Cask if self.forbid_all_casks => {
                return Err(self.violation(package, FORBID_CASKS_VAR));
            }
            PackageKind::Cask => (&self.forbidden_casks, FORBIDDEN_CASKS_VAR),
            PackageKind::Formula => (&self.forbidden_formulae, FORBIDDEN_FORMULAE_VAR),
        };
        if package
            .identifiers()
            .iter()
            .any(|id| forbidden.contains(id))
        {
            return Err(self.violation(package, variable));
        }
        Ok(())
    }

    fn violation(&self, package: &Package, variable: &str) -> CasketError {
        debug!("{} rejected by {}", package.full_name(), variable);
        CasketError::PolicyViolation {
            package: package.name().to_string(),
            variable: variable.to_string(),
            owner: self.owner.clone(),
            contact: self.owner_contact.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::model::{Cask, Formula};

    fn policy(vars: &[(&str, &str)]) -> PackagePolicy {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PackagePolicy::from_lookup(|key| map.get(key).cloned())
    }

    fn cask(token: &str, tap: Option<&str>) -> Package {
        let cask: Cask = serde_json::from_value(json!({"token": token, "tap": tap})).unwrap();
        Package::Cask(Arc::new(cask))
    }

    fn formula(name: &str) -> Package {
        Package::Formula(Arc::new(Formula {
            name: name.to_string(),
            ..Default::default()
        }))
    }

    fn violated_variable(result: Result<()>) -> String {
        match result {
            Err(CasketError::PolicyViolation { variable, .. }) => variable,
            other => panic!("expected a policy violation, got {other:?}"),
        }
    }

    #[test]
    fn empty_policy_never_computes_dependencies() {
        let policy = policy(&[]);
        assert!(policy.is_empty());
        policy
            .check(
                &cask("foo", None),
                || panic!("dependency closure must not run"),
                false,
            )
            .unwrap();
    }

    #[test]
    fn forbidden_cask_matches_short_and_full_names() {
        let policy = policy(&[(FORBIDDEN_CASKS_VAR, "Qux acme/tools/widget")]);
        assert_eq!(
            violated_variable(policy.check_package(&cask("qux", None))),
            FORBIDDEN_CASKS_VAR
        );
        assert_eq!(
            violated_variable(policy.check_package(&cask("widget", Some("acme/tools")))),
            FORBIDDEN_CASKS_VAR
        );
        policy.check_package(&cask("widget", None)).unwrap();
    }

    #[test]
    fn dependencies_are_checked_unless_skipped() {
        let policy = policy(&[(FORBIDDEN_FORMULAE_VAR, "unar")]);
        let root = cask("foo", None);
        let result = policy.check(&root, || Ok(vec![formula("unar")]), false);
        assert_eq!(violated_variable(result), FORBIDDEN_FORMULAE_VAR);
        policy
            .check(&root, || panic!("skipped dependencies are not loaded"), true)
            .unwrap();
    }

    #[test]
    fn allowed_taps_always_admit_official_taps() {
        let policy = policy(&[(ALLOWED_TAPS_VAR, "acme/homebrew-tools")]);
        policy.check_package(&cask("foo", None)).unwrap();
        policy
            .check_package(&cask("widget", Some("acme/tools")))
            .unwrap();
        assert_eq!(
            violated_variable(policy.check_package(&cask("evil", Some("rogue/taps")))),
            ALLOWED_TAPS_VAR
        );
    }

    #[test]
    fn forbidden_taps_and_blanket_cask_flag() {
        let taps = policy(&[(FORBIDDEN_TAPS_VAR, "rogue/taps")]);
        assert_eq!(
            violated_variable(taps.check_package(&cask("evil", Some("rogue/homebrew-taps")))),
            FORBIDDEN_TAPS_VAR
        );

        let blanket = policy(&[(FORBID_CASKS_VAR, "1")]);
        assert_eq!(
            violated_variable(blanket.check_package(&cask("foo", None))),
            FORBID_CASKS_VAR
        );
        blanket.check_package(&formula("wget")).unwrap();
    }

    #[test]
    fn violation_carries_owner_and_contact() {
        let policy = policy(&[
            (FORBIDDEN_CASKS_VAR, "qux"),
            (FORBIDDEN_OWNER_VAR, "IT"),
            (FORBIDDEN_OWNER_CONTACT_VAR, "it@example.com"),
        ]);
        let err = policy.check_package(&cask("qux", None)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("qux"));
        assert!(message.contains("IT"));
        assert!(message.contains(FORBIDDEN_CASKS_VAR));
        assert!(message.contains("it@example.com"));
    }
}
