// casket-common/src/model/package.rs
use std::fmt;
use std::sync::Arc;

use super::cask::{Cask, DEFAULT_CASK_TAP};
use super::formula::{Formula, DEFAULT_FORMULA_TAP};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PackageKind {
    Formula,
    Cask,
}

impl PackageKind {
    pub fn default_tap(self) -> &'static str {
        match self {
            PackageKind::Formula => DEFAULT_FORMULA_TAP,
            PackageKind::Cask => DEFAULT_CASK_TAP,
        }
    }
}

/// Stable identity of a package across loads: its kind plus the name it was requested by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId {
    pub kind: PackageKind,
    pub name: String,
}

impl PackageId {
    pub fn cask(name: impl Into<String>) -> Self {
        Self {
            kind: PackageKind::Cask,
            name: name.into(),
        }
    }

    pub fn formula(name: impl Into<String>) -> Self {
        Self {
            kind: PackageKind::Formula,
            name: name.into(),
        }
    }

    /// The short name, without any `user/repo/` prefix.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone)]
pub enum Package {
    Formula(Arc<Formula>),
    Cask(Arc<Cask>),
}

impl Package {
    pub fn kind(&self) -> PackageKind {
        match self {
            Package::Formula(_) => PackageKind::Formula,
            Package::Cask(_) => PackageKind::Cask,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Package::Formula(f) => &f.name,
            Package::Cask(c) => &c.token,
        }
    }

    pub fn full_name(&self) -> String {
        match self {
            Package::Formula(f) => f.full_name(),
            Package::Cask(c) => c.full_name(),
        }
    }

    pub fn id(&self) -> PackageId {
        PackageId {
            kind: self.kind(),
            name: self.name().to_string(),
        }
    }

    pub fn version(&self) -> String {
        match self {
            Package::Formula(f) => f.version_str(),
            Package::Cask(c) => c.version_str(),
        }
    }

    /// The tap the definition came from; untapped definitions belong to the official tap.
    pub fn tap(&self) -> String {
        let declared = match self {
            Package::Formula(f) => f.tap_name(),
            Package::Cask(c) => c.tap_name(),
        };
        declared
            .unwrap_or_else(|| self.kind().default_tap())
            .to_ascii_lowercase()
    }

    /// Every spelling a user could have used for this package, lowercased.
    pub fn identifiers(&self) -> Vec<String> {
        let name = self.name().to_ascii_lowercase();
        let mut ids = vec![name.clone(), format!("{}/{}", self.tap(), name)];
        let full = self.full_name().to_ascii_lowercase();
        if !ids.contains(&full) {
            ids.push(full);
        }
        ids
    }

    pub fn declared_dependencies(&self) -> Vec<PackageId> {
        match self {
            Package::Formula(f) => f
                .dependencies
                .iter()
                .map(|d| PackageId::formula(d.clone()))
                .collect(),
            Package::Cask(c) => c
                .dependency_casks()
                .into_iter()
                .map(PackageId::cask)
                .chain(c.dependency_formulae().into_iter().map(PackageId::formula))
                .collect(),
        }
    }

    pub fn as_cask(&self) -> Option<&Arc<Cask>> {
        match self {
            Package::Cask(c) => Some(c),
            Package::Formula(_) => None,
        }
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
