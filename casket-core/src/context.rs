// casket-core/src/context.rs
//! Per-command accumulator for caveats, messages, timings and the transaction trace.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    PolicyCheck,
    Fetch,
    Stage,
    InstallArtifacts,
    Commit,
    Rollback,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Idle => "idle",
            TransactionState::PolicyCheck => "policy-check",
            TransactionState::Fetch => "fetch",
            TransactionState::Stage => "stage",
            TransactionState::InstallArtifacts => "install-artifacts",
            TransactionState::Commit => "commit",
            TransactionState::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
pub struct RunContext {
    caveats: Vec<(String, String)>,
    messages: Vec<String>,
    warnings: Vec<String>,
    timings: Vec<(String, Duration)>,
    transitions: Vec<(String, TransactionState)>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_caveat(&mut self, token: &str, caveat: impl Into<String>) {
        let caveat = caveat.into();
        if caveat.trim().is_empty() {
            return;
        }
        self.caveats.push((token.to_string(), caveat));
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn transition(&mut self, token: &str, state: TransactionState) {
        debug!("[{}] -> {}", token, state);
        self.transitions.push((token.to_string(), state));
    }

    pub fn record_timing(&mut self, label: impl Into<String>, elapsed: Duration) {
        self.timings.push((label.into(), elapsed));
    }

    /// Starts a timer; pass the result to [`RunContext::finish_timer`].
    pub fn start_timer(&self) -> Instant {
        Instant::now()
    }

    pub fn finish_timer(&mut self, label: impl Into<String>, started: Instant) {
        self.record_timing(label, started.elapsed());
    }

    pub fn caveats(&self) -> &[(String, String)] {
        &self.caveats
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn timings(&self) -> &[(String, Duration)] {
        &self.timings
    }

    /// States `token` passed through, in order.
    pub fn states_for(&self, token: &str) -> Vec<TransactionState> {
        self.transitions
            .iter()
            .filter(|(t, _)| t == token)
            .map(|(_, s)| *s)
            .collect()
    }
}
