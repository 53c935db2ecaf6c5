//! Restore state machine.
//!
//! ```text
//! Uninitialized → Downloading → Decompressing → Decoding → Rebuilding → Ready
//!        └────────────┴──────────────┴─────────────┴───────────┴──→ Failed
//! ```
//!
//! Streaming interleaves the phases (a batch is decompressed, decoded and
//! inserted before the next one is read), so the tracked state is the
//! furthest phase reached. It only ever moves forward; `Ready` and `Failed`
//! are terminal.

use std::fmt;
use std::time::{Duration, Instant};

use crate::error::{Phase, Result, SnapshotError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RestoreState {
    Uninitialized,
    Downloading,
    Decompressing,
    Decoding,
    Rebuilding,
    Ready,
    Failed,
}

impl RestoreState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RestoreState::Ready | RestoreState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RestoreState::Uninitialized => "uninitialized",
            RestoreState::Downloading => "downloading",
            RestoreState::Decompressing => "decompressing",
            RestoreState::Decoding => "decoding",
            RestoreState::Rebuilding => "rebuilding",
            RestoreState::Ready => "ready",
            RestoreState::Failed => "failed",
        }
    }

    /// State a restore is in while running the given phase.
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Read => RestoreState::Downloading,
            Phase::Decompress => RestoreState::Decompressing,
            Phase::Decode => RestoreState::Decoding,
            Phase::Rebuild => RestoreState::Rebuilding,
            // Writer phases never occur during a restore.
            Phase::Encode | Phase::Compress | Phase::Write => RestoreState::Uninitialized,
        }
    }
}

impl fmt::Display for RestoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded transition: the state entered and when (relative to the
/// tracker's creation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: RestoreState,
    pub at: Duration,
}

/// Forward-only state tracker for one restore invocation.
#[derive(Debug)]
pub struct StateTracker {
    state: RestoreState,
    started: Instant,
    transitions: Vec<Transition>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            state: RestoreState::Uninitialized,
            started: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> RestoreState {
        self.state
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<Transition> {
        self.transitions
    }

    /// Move to `next`. Moving backwards or out of a terminal state is an
    /// error; re-entering the current state is a no-op.
    pub fn advance(&mut self, next: RestoreState) -> Result<()> {
        if next == self.state {
            return Ok(());
        }
        if self.state.is_terminal() || (next < self.state && next != RestoreState::Failed) {
            return Err(SnapshotError::Configuration(format!(
                "illegal restore transition {} -> {}",
                self.state, next
            )));
        }
        self.enter(next);
        Ok(())
    }

    /// Advance only if `next` is further along than the current state.
    /// Used on the hot path, where phases interleave.
    pub fn reach(&mut self, next: RestoreState) {
        if !self.state.is_terminal() && next > self.state && next != RestoreState::Failed {
            self.enter(next);
        }
    }

    /// Enter `Failed` from any non-terminal state.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.enter(RestoreState::Failed);
        }
    }

    fn enter(&mut self, next: RestoreState) {
        let at = self.started.elapsed();
        tracing::debug!(from = %self.state, to = %next, elapsed_ms = at.as_millis() as u64, "restore state");
        self.state = next;
        self.transitions.push(Transition { state: next, at });
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}
