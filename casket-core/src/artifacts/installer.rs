// casket-core/src/artifacts/installer.rs
use std::path::{Component, Path};
use std::process::Command;

use casket_common::error::{CasketError, Result};
use serde_json::Value;
use tracing::debug;

use super::helpers::command_failure;
use super::{ArtifactContext, ArtifactPhases, Phases};
use crate::context::RunContext;

/// The `installer` stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Installer {
    /// Leaves a caveat pointing at an installer the user has to run.
    Manual(String),
    Script {
        executable: String,
        args: Vec<String>,
        sudo: bool,
    },
}

// The executable must stay inside the staged path.
fn validate_relative(path: &str) -> std::result::Result<(), String> {
    let p = Path::new(path);
    if p.is_absolute() || p.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(format!("Invalid installer executable: {path}"));
    }
    Ok(())
}

impl Installer {
    pub fn from_stanza(entry: &Value) -> std::result::Result<Self, String> {
        let obj = entry
            .as_object()
            .ok_or_else(|| format!("installer entry is not an object: {entry}"))?;
        if let Some(manual) = obj.get("manual").and_then(|v| v.as_str()) {
            return Ok(Installer::Manual(manual.to_string()));
        }
        let script = obj
            .get("script")
            .ok_or_else(|| "installer stanza missing 'manual' or 'script'".to_string())?;
        let (executable, args, sudo) = match script {
            Value::String(s) => (s.clone(), Vec::new(), false),
            Value::Object(o) => {
                let executable = o
                    .get("executable")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| "installer script missing 'executable'".to_string())?
                    .to_string();
                let args = o
                    .get("args")
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|a| a.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();
                let sudo = o.get("sudo").and_then(|v| v.as_bool()).unwrap_or(false);
                (executable, args, sudo)
            }
            other => return Err(format!("unsupported installer script: {other}")),
        };
        validate_relative(&executable)?;
        Ok(Installer::Script {
            executable,
            args,
            sudo,
        })
    }
}

impl ArtifactPhases for Installer {
    fn phases(&self) -> Phases {
        Phases::INSTALL
    }

    fn describe(&self) -> String {
        match self {
            Installer::Manual(path) => format!("installer manual '{path}'"),
            Installer::Script { executable, .. } => format!("installer script '{executable}'"),
        }
    }

    fn install(&self, ctx: &ArtifactContext<'_>, run: &mut RunContext, _force: bool) -> Result<()> {
        match self {
            Installer::Manual(path) => {
                run.add_caveat(
                    &ctx.cask.token,
                    format!(
                        "To complete the installation of Cask {}, you must also\nrun the installer at:\n  {}",
                        ctx.cask.token,
                        ctx.staged_path.join(path).display()
                    ),
                );
                Ok(())
            }
            Installer::Script {
                executable,
                args,
                sudo,
            } => {
                let script = ctx.staged_path.join(executable);
                if !script.exists() {
                    return Err(CasketError::NotFound(format!(
                        "Installer script not found: {}",
                        script.display()
                    )));
                }
                let mut cmd = if *sudo {
                    let mut c = Command::new("sudo");
                    c.arg(&script);
                    c
                } else {
                    Command::new(&script)
                };
                cmd.args(args).current_dir(ctx.staged_path);
                debug!("Running installer script {:?} for {}", cmd, ctx.cask.token);
                let output = cmd.output()?;
                if !output.status.success() {
                    return Err(CasketError::Install(command_failure(executable, &output)));
                }
                Ok(())
            }
        }
    }
}
