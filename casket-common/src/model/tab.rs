// casket-common/src/model/tab.rs
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDependencies {
    #[serde(default)]
    pub cask: Vec<String>,
    #[serde(default)]
    pub formula: Vec<String>,
}

/// The install receipt kept in a cask's metadata directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaskTab {
    pub installed_as_dependency: bool,
    pub installed_on_request: bool,
    /// Unix seconds.
    pub time: i64,
    #[serde(default)]
    pub tap: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    /// Saved copy of the definition this install was made from.
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(default)]
    pub runtime_dependencies: RuntimeDependencies,
}

impl CaskTab {
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }
        crate::fs::read_json(path).map(Some)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        crate::fs::write_json(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tab_loads_as_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(CaskTab::load(&tmp.path().join("INSTALL_RECEIPT.json"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn tab_persists_flags() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("INSTALL_RECEIPT.json");
        let tab = CaskTab {
            installed_as_dependency: true,
            installed_on_request: false,
            time: 1_700_000_000,
            version: Some("1.0".to_string()),
            runtime_dependencies: RuntimeDependencies {
                cask: vec!["baz".to_string()],
                formula: vec![],
            },
            ..Default::default()
        };
        tab.write(&path).unwrap();
        assert_eq!(CaskTab::load(&path).unwrap(), Some(tab));
    }
}
