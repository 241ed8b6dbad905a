// casket-common/src/model/formula.rs
// Only the parts of a formula definition that dependency resolution reads.
use serde::{Deserialize, Serialize};

pub const DEFAULT_FORMULA_TAP: &str = "homebrew/core";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FormulaVersions {
    #[serde(default)]
    pub stable: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Formula {
    pub name: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub tap: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub versions: FormulaVersions,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Formula {
    pub fn version_str(&self) -> String {
        self.versions
            .stable
            .clone()
            .unwrap_or_else(|| "HEAD".to_string())
    }

    pub fn full_name(&self) -> String {
        match &self.full_name {
            Some(full) if !full.is_empty() => full.clone(),
            _ => self.name.clone(),
        }
    }

    pub fn tap_name(&self) -> Option<&str> {
        self.tap.as_deref().filter(|t| !t.is_empty())
    }
}
