// casket-common/src/model/cask.rs
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const LATEST_VERSION: &str = "latest";
pub const DEFAULT_CASK_TAP: &str = "homebrew/cask";

/// A raw artifact stanza, e.g. `{"app": ["Foo.app"]}`.
pub type ArtifactStanza = serde_json::Value;

/// The `url` field, either a bare string or a map with extra specs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UrlField {
    Simple(String),
    WithSpec {
        url: String,
        #[serde(default)]
        verified: Option<String>,
        #[serde(flatten)]
        other: HashMap<String, serde_json::Value>,
    },
}

/// The `sha256` field: hex, no_check, or per-architecture
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sha256Field {
    Hex(String),
    #[serde(rename_all = "snake_case")]
    NoCheck {
        no_check: bool,
    },
    PerArch(HashMap<String, String>),
}

/// Helper to coerce string-or-list into Vec<String>
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringList {
    One(String),
    Many(Vec<String>),
}

impl Default for StringList {
    fn default() -> Self {
        StringList::Many(Vec::new())
    }
}

impl StringList {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StringList::One(s) => vec![s.clone()],
            StringList::Many(v) => v.clone(),
        }
    }
}

/// `depends_on` block. Only cask and formula edges take part in resolution.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DependsOn {
    #[serde(default)]
    pub cask: StringList,
    #[serde(default)]
    pub formula: StringList,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConflictsWith {
    #[serde(default)]
    pub cask: StringList,
    #[serde(default)]
    pub formula: StringList,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// `container` block: an explicit container type and/or a nested inner container.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContainerSpec {
    #[serde(default)]
    pub nested: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl ContainerSpec {
    /// Formula that must be present before this container type can be opened.
    pub fn required_formula(&self) -> Option<&'static str> {
        match self.kind.as_deref()?.trim_start_matches(':') {
            "rar" => Some("unar"),
            "seven_zip" | "7z" | "sevenzip" => Some("sevenzip"),
            _ => None,
        }
    }
}

/// The Cask model matching Homebrew JSON v2
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Cask {
    pub token: String,

    #[serde(default)]
    pub full_token: Option<String>,
    #[serde(default)]
    pub tap: Option<String>,

    #[serde(default)]
    pub name: Option<Vec<String>>,
    pub version: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,

    #[serde(default)]
    pub artifacts: Option<Vec<ArtifactStanza>>,

    #[serde(default)]
    pub url: Option<UrlField>,

    #[serde(default)]
    pub sha256: Option<Sha256Field>,

    #[serde(default)]
    pub auto_updates: Option<bool>,

    #[serde(default)]
    pub depends_on: Option<DependsOn>,

    #[serde(default)]
    pub conflicts_with: Option<ConflictsWith>,

    #[serde(default)]
    pub container: Option<ContainerSpec>,

    #[serde(default)]
    pub caveats: Option<String>,
}

impl Cask {
    pub fn version_str(&self) -> String {
        self.version
            .clone()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| LATEST_VERSION.to_string())
    }

    pub fn is_latest(&self) -> bool {
        self.version_str() == LATEST_VERSION
    }

    pub fn full_name(&self) -> String {
        match &self.full_token {
            Some(full) if !full.is_empty() => full.clone(),
            _ => self.token.clone(),
        }
    }

    pub fn tap_name(&self) -> Option<&str> {
        self.tap.as_deref().filter(|t| !t.is_empty())
    }

    pub fn url_str(&self) -> Option<&str> {
        let url = match self.url.as_ref()? {
            UrlField::Simple(u) => u.as_str(),
            UrlField::WithSpec { url, .. } => url.as_str(),
        };
        Some(url).filter(|u| !u.is_empty())
    }

    /// Last path segment of the download URL, used when a container is kept as-is.
    pub fn download_file_name(&self) -> String {
        self.url_str()
            .and_then(|u| u.split(['?', '#']).next())
            .and_then(|u| u.rsplit('/').next())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}-download", self.token))
    }

    /// The expected hex digest for this machine, if one is declared.
    pub fn sha256_hex(&self) -> Option<String> {
        match self.sha256.as_ref()? {
            Sha256Field::Hex(s) if s.is_empty() || s.eq_ignore_ascii_case("no_check") => None,
            Sha256Field::Hex(s) => Some(s.clone()),
            Sha256Field::NoCheck { .. } => None,
            Sha256Field::PerArch(map) => {
                let arch = if cfg!(target_arch = "aarch64") {
                    "arm"
                } else {
                    "intel"
                };
                map.get(arch)
                    .or_else(|| map.get(std::env::consts::ARCH))
                    .cloned()
            }
        }
    }

    pub fn has_checksum(&self) -> bool {
        self.sha256_hex().is_some()
    }

    pub fn dependency_casks(&self) -> Vec<String> {
        self.depends_on
            .as_ref()
            .map(|d| d.cask.to_vec())
            .unwrap_or_default()
    }

    /// Declared formula dependencies plus any the container format needs.
    pub fn dependency_formulae(&self) -> Vec<String> {
        let mut formulae = self
            .depends_on
            .as_ref()
            .map(|d| d.formula.to_vec())
            .unwrap_or_default();
        if let Some(required) = self.container.as_ref().and_then(|c| c.required_formula()) {
            if !formulae.iter().any(|f| f == required) {
                formulae.push(required.to_string());
            }
        }
        formulae
    }

    pub fn conflicting_casks(&self) -> Vec<String> {
        self.conflicts_with
            .as_ref()
            .map(|c| c.cask.to_vec())
            .unwrap_or_default()
    }

    pub fn conflicting_formulae(&self) -> Vec<String> {
        self.conflicts_with
            .as_ref()
            .map(|c| c.formula.to_vec())
            .unwrap_or_default()
    }

    pub fn artifact_stanzas(&self) -> &[ArtifactStanza] {
        self.artifacts.as_deref().unwrap_or(&[])
    }

    pub fn has_zap_stanza(&self) -> bool {
        self.artifact_stanzas()
            .iter()
            .any(|a| a.as_object().is_some_and(|o| o.contains_key("zap")))
    }

    pub fn display_name(&self) -> String {
        self.name
            .as_ref()
            .and_then(|names| names.first().cloned())
            .unwrap_or_else(|| self.token.clone())
    }
}
