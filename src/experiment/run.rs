//! Experiment Run - one execution of an `ExperimentSpec`

use std::fmt;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::ExperimentSpec;
use crate::query::QueryWindow;
use crate::{Error, Result};

/// Externally visible status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is created but the recording window has not opened.
    Pending,
    /// Recording window is open or being exported.
    Recording,
    /// Every metric was exported.
    Exported,
    /// Run failed or was cancelled.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Recording => "recording",
            Self::Exported => "exported",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Orchestrator state machine phase.
///
/// ```text
/// Init → Scaling → Stabilizing → Recording → Exporting → CleaningUp → Done
///   └───────┴───────────┴─────────────┴───────────┴────────────┴──→ Failed
/// ```
///
/// Scaling through Exporting may also jump to `CleaningUp` on failure so the
/// workload is always returned to idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Preconditions are being checked.
    Init,
    /// Workload is being scaled to N replicas.
    Scaling,
    /// Fixed wait for steady state.
    Stabilizing,
    /// Recording window open.
    Recording,
    /// Range queries and dataset writes.
    Exporting,
    /// Workload scaled back to zero.
    CleaningUp,
    /// All metrics exported.
    Done,
    /// Unrecoverable failure or cancellation.
    Failed,
}

impl Phase {
    /// Whether the phase is final.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_transition(self, next: Self) -> bool {
        use Phase::{CleaningUp, Done, Exporting, Failed, Init, Recording, Scaling, Stabilizing};
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Failed)
                | (Init, Scaling)
                | (Scaling, Stabilizing)
                | (Stabilizing, Recording)
                | (Recording, Exporting)
                | (Exporting, CleaningUp)
                | (Scaling | Stabilizing | Recording, CleaningUp)
                | (CleaningUp, Done)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Scaling => "scaling",
            Self::Stabilizing => "stabilizing",
            Self::Recording => "recording",
            Self::Exporting => "exporting",
            Self::CleaningUp => "cleaning_up",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A phase entry with the time it was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseChange {
    /// Phase entered.
    pub phase: Phase,
    /// Wall-clock time of the transition.
    pub at: DateTime<Utc>,
}

/// Explicit run value threaded through the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentRun {
    spec: ExperimentSpec,
    status: RunStatus,
    phase: Phase,
    window: Option<QueryWindow>,
    history: Vec<PhaseChange>,
}

impl ExperimentRun {
    /// Create a new run in `Init` / `Pending`.
    #[must_use]
    pub fn new(spec: ExperimentSpec) -> Self {
        Self {
            spec,
            status: RunStatus::Pending,
            phase: Phase::Init,
            window: None,
            history: vec![PhaseChange {
                phase: Phase::Init,
                at: Utc::now(),
            }],
        }
    }

    /// Get the spec.
    #[must_use]
    pub const fn spec(&self) -> &ExperimentSpec {
        &self.spec
    }

    /// Get the current status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Get the current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Get the recording window, once fixed.
    #[must_use]
    pub const fn window(&self) -> Option<&QueryWindow> {
        self.window.as_ref()
    }

    /// Phase transitions so far.
    #[must_use]
    pub fn history(&self) -> &[PhaseChange] {
        &self.history
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the state machine forbids it.
    pub fn advance(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_transition(next) {
            return Err(Error::InvalidTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        self.phase = next;
        self.history.push(PhaseChange {
            phase: next,
            at: Utc::now(),
        });
        match next {
            Phase::Done => self.status = RunStatus::Exported,
            Phase::Failed => self.status = RunStatus::Failed,
            _ => {}
        }
        Ok(())
    }

    /// Open the recording window at `now`, truncated to whole seconds.
    ///
    /// # Errors
    ///
    /// Returns error unless the run is in `Recording` and no window is fixed yet.
    pub fn open_window(&mut self, now: DateTime<Utc>) -> Result<&QueryWindow> {
        if self.phase != Phase::Recording || self.window.is_some() {
            return Err(Error::InvalidTransition {
                from: self.phase.to_string(),
                to: "window open".to_string(),
            });
        }
        let start = now.trunc_subsecs(0);
        let recording = TimeDelta::from_std(self.spec.recording())
            .map_err(|e| Error::Config(format!("recording duration out of range: {e}")))?;
        let step = TimeDelta::from_std(self.spec.step())
            .map_err(|e| Error::Config(format!("step out of range: {e}")))?;
        let window = QueryWindow::new(start, start + recording, step)?;
        self.status = RunStatus::Recording;
        Ok(self.window.insert(window))
    }
}
