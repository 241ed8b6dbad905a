// casket-core/src/artifacts/flight.rs
use std::process::Command;

use casket_common::error::{CasketError, Result};
use serde_json::Value;
use tracing::debug;

use super::{ArtifactContext, ArtifactPhases, Phases, UninstallFlags};
use crate::context::RunContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightStage {
    Preflight,
    Postflight,
    UninstallPreflight,
    UninstallPostflight,
}

impl FlightStage {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "preflight" => Some(Self::Preflight),
            "postflight" => Some(Self::Postflight),
            "uninstall_preflight" => Some(Self::UninstallPreflight),
            "uninstall_postflight" => Some(Self::UninstallPostflight),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Preflight => "preflight",
            Self::Postflight => "postflight",
            Self::UninstallPreflight => "uninstall_preflight",
            Self::UninstallPostflight => "uninstall_postflight",
        }
    }
}

/// Shell commands run around install or uninstall, with `$STAGEDIR` and
/// `$APPDIR` in the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightBlock {
    pub stage: FlightStage,
    pub commands: Vec<String>,
}

impl FlightBlock {
    /// `null` is what the definitions API emits for blocks it cannot serialize;
    /// those parse to `None`.
    pub fn from_stanza(key: &str, value: &Value) -> Option<Self> {
        let stage = FlightStage::from_key(key)?;
        let commands: Vec<String> = match value {
            Value::String(s) => vec![s.clone()],
            Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        if commands.is_empty() {
            debug!("{} block has no runnable commands", key);
            return None;
        }
        Some(Self { stage, commands })
    }

    fn run(&self, ctx: &ArtifactContext<'_>) -> Result<()> {
        for command in &self.commands {
            debug!("Running {}: {}", self.stage.key(), command);
            let status = Command::new("sh")
                .arg("-c")
                .arg(command)
                .env("STAGEDIR", ctx.staged_path)
                .env("APPDIR", ctx.dir("appdir"))
                .current_dir(ctx.staged_path)
                .status()?;
            if !status.success() {
                return Err(CasketError::Install(format!(
                    "{} failed ({}): {}",
                    self.stage.key(),
                    status,
                    command
                )));
            }
        }
        Ok(())
    }
}

impl ArtifactPhases for FlightBlock {
    fn phases(&self) -> Phases {
        match self.stage {
            FlightStage::Preflight | FlightStage::Postflight => Phases::INSTALL,
            FlightStage::UninstallPreflight => Phases::UNINSTALL,
            FlightStage::UninstallPostflight => Phases::POST_UNINSTALL,
        }
    }

    fn describe(&self) -> String {
        self.stage.key().to_string()
    }

    fn install(&self, ctx: &ArtifactContext<'_>, _run: &mut RunContext, _force: bool) -> Result<()> {
        self.run(ctx)
    }

    fn uninstall(
        &self,
        ctx: &ArtifactContext<'_>,
        _run: &mut RunContext,
        _flags: UninstallFlags,
    ) -> Result<()> {
        self.run(ctx)
    }

    fn post_uninstall(
        &self,
        ctx: &ArtifactContext<'_>,
        _run: &mut RunContext,
        _flags: UninstallFlags,
    ) -> Result<()> {
        self.run(ctx)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::collections::BTreeMap;

    use casket_common::config::Config;
    use casket_common::model::Cask;
    use serde_json::json;

    use super::*;

    #[test]
    fn null_blocks_are_dropped() {
        assert!(FlightBlock::from_stanza("preflight", &Value::Null).is_none());
        assert!(FlightBlock::from_stanza("unknown", &json!(["true"])).is_none());
        let block = FlightBlock::from_stanza("uninstall_postflight", &json!("true")).unwrap();
        assert_eq!(block.phases(), Phases::POST_UNINSTALL);
    }

    #[test]
    fn commands_see_the_staged_path() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(tmp.path().join("prefix"), tmp.path().join("home"));
        let dirs = BTreeMap::new();
        let cask = Cask::default();
        let ctx = ArtifactContext::new(&cask, &config, tmp.path(), &dirs);
        let mut run = RunContext::new();

        let block =
            FlightBlock::from_stanza("preflight", &json!(["touch \"$STAGEDIR/marker\""])).unwrap();
        block.install(&ctx, &mut run, false).unwrap();
        assert!(tmp.path().join("marker").is_file());

        let failing = FlightBlock::from_stanza("postflight", &json!(["exit 1"])).unwrap();
        assert!(failing.install(&ctx, &mut run, false).is_err());
    }
}
