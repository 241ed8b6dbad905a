use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CasketError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("HTTP Request Error: {0}")]
    Http(#[from] Arc<reqwest::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Cache Error: {0}")]
    Cache(String),

    #[error("No available cask or formula with the name \"{0}\"")]
    NotFound(String),

    #[error("Definition for '{0}' is invalid: {1}")]
    InvalidDefinition(String, String),

    #[error(
        "{package} was forbidden for installation by {owner} in `{variable}`.{}",
        contact_suffix(.contact)
    )]
    PolicyViolation {
        package: String,
        variable: String,
        owner: String,
        contact: Option<String>,
    },

    #[error("'{package}' includes cyclic dependencies on: {}", .cycle.join(", "))]
    DependencyCycle { package: String, cycle: Vec<String> },

    #[error("'{0}' depends on itself")]
    SelfReferentialDependency(String),

    #[error("Download failed for '{0}' from '{1}': {2}")]
    DownloadError(String, String, String),

    #[error("Checksum Mismatch: {0}")]
    ChecksumMismatch(String),

    #[error(
        "Cask '{0}' does not have a sha256 checksum defined and was not installed. \
         This means you have the --require-sha option set, perhaps in your HOMEBREW_CASK_OPTS."
    )]
    ChecksumRequired(String),

    #[error("Staging Error: {0}")]
    Staging(String),

    #[error("Unsupported container: {0}")]
    UnsupportedContainer(String),

    #[error("Failed to install {artifact} for '{token}': {reason}")]
    ArtifactInstall {
        token: String,
        artifact: String,
        reason: String,
    },

    #[error("Cask '{token}' conflicts with '{conflicting}'.")]
    Conflict { token: String, conflicting: String },

    #[error("Cask '{0}' is not installed.")]
    NotInstalled(String),

    #[error("Installation Error: {0}")]
    Install(String),

    #[error("Validation Error: {0}")]
    Validation(String),

    #[error("Generic Error: {0}")]
    Generic(String),
}

fn contact_suffix(contact: &Option<String>) -> String {
    match contact {
        Some(c) if !c.is_empty() => format!("\n{c}"),
        _ => String::new(),
    }
}

impl CasketError {
    /// Errors raised by read-only checks, before anything on disk was touched.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::PolicyViolation { .. }
                | Self::DependencyCycle { .. }
                | Self::SelfReferentialDependency(_)
                | Self::Conflict { .. }
                | Self::ChecksumRequired(_)
                | Self::NotFound(_)
                | Self::InvalidDefinition(..)
        )
    }

    /// Command a user can run to recover from this error, if one applies.
    pub fn remediation(&self, token: &str) -> Option<String> {
        match self {
            Self::ChecksumRequired(_) => Some(format!("casket install --force {token}")),
            Self::Conflict { conflicting, .. } => Some(format!("casket uninstall {conflicting}")),
            Self::Staging(_) | Self::ArtifactInstall { .. } => {
                Some(format!("casket reinstall {token}"))
            }
            Self::NotInstalled(_) => Some(format!("casket install {token}")),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CasketError {
    fn from(err: std::io::Error) -> Self {
        CasketError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for CasketError {
    fn from(err: reqwest::Error) -> Self {
        CasketError::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for CasketError {
    fn from(err: serde_json::Error) -> Self {
        CasketError::Json(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CasketError>;
