//! Lifecycle phases and the phase-state document.
//!
//! Transitions are externally driven: nothing in here fires on its own.
//! Each transition closes the open history entry and appends a new one;
//! history is append-only, with retention applied as consumer policy from
//! [`PacerConfig`]. Progress is a pure function of (phase, step) and never
//! depends on any AI-derived judgment.

use crate::config::PacerConfig;
use crate::error::{PacerError, Result};
use crate::store::{self, Document, PutOutcome};
use crate::tracker::TrackerState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Plan,
    Build,
    Ship,
    Grow,
}

impl Phase {
    pub fn all() -> &'static [Phase] {
        &[Phase::Idle, Phase::Plan, Phase::Build, Phase::Ship, Phase::Grow]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Option<Phase> {
        Phase::all().get(self.index() + 1).copied()
    }

    /// The ordered step set for this phase. Idle has none.
    pub fn steps(self) -> &'static [Step] {
        match self {
            Phase::Idle => &[],
            Phase::Plan => &[Step::Clarify, Step::Research, Step::Scope, Step::Roadmap],
            Phase::Build => &[
                Step::Scaffold,
                Step::FeatureWork,
                Step::Harden,
                Step::Polish,
            ],
            Phase::Ship => &[Step::ReleasePrep, Step::Launch, Step::Announce],
            Phase::Grow => &[Step::CollectFeedback, Step::Measure, Step::Iterate],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Plan => "plan",
            Phase::Build => "build",
            Phase::Ship => "ship",
            Phase::Grow => "grow",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = PacerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(Phase::Idle),
            "plan" => Ok(Phase::Plan),
            "build" => Ok(Phase::Build),
            "ship" => Ok(Phase::Ship),
            "grow" => Ok(Phase::Grow),
            _ => Err(PacerError::InvalidPhase(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Clarify,
    Research,
    Scope,
    Roadmap,
    Scaffold,
    FeatureWork,
    Harden,
    Polish,
    ReleasePrep,
    Launch,
    Announce,
    CollectFeedback,
    Measure,
    Iterate,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Clarify => "clarify",
            Step::Research => "research",
            Step::Scope => "scope",
            Step::Roadmap => "roadmap",
            Step::Scaffold => "scaffold",
            Step::FeatureWork => "feature_work",
            Step::Harden => "harden",
            Step::Polish => "polish",
            Step::ReleasePrep => "release_prep",
            Step::Launch => "launch",
            Step::Announce => "announce",
            Step::CollectFeedback => "collect_feedback",
            Step::Measure => "measure",
            Step::Iterate => "iterate",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Step {
    type Err = PacerError;

    fn from_str(s: &str) -> Result<Self> {
        for phase in Phase::all() {
            if let Some(step) = phase.steps().iter().find(|st| st.as_str() == s) {
                return Ok(*step);
            }
        }
        Err(PacerError::InvalidStep(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// Where the project currently sits: a phase, plus a step for every phase
/// except Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<Step>,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            step: None,
        }
    }
}

impl Position {
    /// Index of the current step within the phase's step set.
    pub fn step_index(self) -> Option<usize> {
        let step = self.step?;
        self.phase.steps().iter().position(|&s| s == step)
    }
}

/// Deterministic progress mapping. Idle is 0; each later phase owns an
/// equal 25-point band, filled linearly by completed steps. An unknown or
/// missing step counts as the first step of its phase.
pub fn progress_percent(position: Position) -> u8 {
    let steps = position.phase.steps();
    if steps.is_empty() {
        return 0;
    }
    const BAND: usize = 25;
    let completed_bands = (position.phase.index() - 1) * BAND;
    let step_index = position.step_index().unwrap_or(0);
    let within = (step_index + 1) * BAND / steps.len();
    (completed_bands + within) as u8
}

// ---------------------------------------------------------------------------
// PhaseState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEntry {
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<Step>,
    pub entered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    #[serde(default, deserialize_with = "crate::store::lenient")]
    pub current: Position,
    #[serde(default, deserialize_with = "crate::store::lenient")]
    pub history: Vec<TransitionEntry>,
    #[serde(default, deserialize_with = "crate::store::lenient")]
    pub started_at: Option<DateTime<Utc>>,
    /// Named pointers to project documents (e.g. "plan" -> "docs/PLAN.md").
    #[serde(default, deserialize_with = "crate::store::lenient")]
    pub docs: BTreeMap<String, String>,
}

impl PhaseState {
    /// Close the open history entry, append one for the new position, and
    /// move `current`.
    pub fn transition_to(&mut self, phase: Phase, step: Option<Step>, now: DateTime<Utc>) {
        if let Some(open) = self.history.last_mut() {
            if open.exited_at.is_none() {
                open.exited_at = Some(now);
                open.duration_secs = Some((now - open.entered_at).num_seconds());
            }
        }
        self.history.push(TransitionEntry {
            phase,
            step,
            entered_at: now,
            exited_at: None,
            duration_secs: None,
        });
        self.current = Position { phase, step };
        if self.started_at.is_none() && phase != Phase::Idle {
            self.started_at = Some(now);
        }
    }

    pub fn set_doc(&mut self, name: &str, path: &str) {
        self.docs.insert(name.to_string(), path.to_string());
    }

    /// Drop the oldest history entries past `retention`. Retention is
    /// consumer policy, applied at transition time, never by the store.
    pub fn trim_history(&mut self, retention: usize) {
        if self.history.len() > retention {
            let excess = self.history.len() - retention;
            self.history.drain(..excess);
        }
    }
}

impl Document for PhaseState {
    const FILENAME: &'static str = crate::paths::PHASE_FILE;

    fn merge(local: Self, disk: Self) -> Self {
        // History entries union by identity; a closed entry outranks the
        // open twin another process still holds.
        let history = store::union_by_key(
            local.history,
            disk.history,
            |e| (e.phase, e.step, e.entered_at),
            |e| (e.entered_at, e.exited_at.unwrap_or(e.entered_at)),
            usize::MAX,
        );
        let mut docs = disk.docs;
        docs.extend(local.docs);
        Self {
            current: local.current,
            history,
            started_at: local.started_at.or(disk.started_at),
            docs,
        }
    }
}

// ---------------------------------------------------------------------------
// Store-backed operations
// ---------------------------------------------------------------------------

/// Load the phase document.
pub fn phase_state(root: &std::path::Path) -> (PhaseState, u64) {
    store::get(root)
}

/// Transition to `phase` at `step` (default: the phase's first step).
pub fn transition(root: &std::path::Path, phase: Phase, step: Option<Step>) -> Result<PutOutcome> {
    let step = match step {
        Some(step) => {
            if !phase.steps().contains(&step) {
                return Err(PacerError::StepPhaseMismatch {
                    phase: phase.to_string(),
                    step: step.to_string(),
                });
            }
            Some(step)
        }
        None => phase.steps().first().copied(),
    };

    let retention = PacerConfig::load(root).history_retention;
    let (_, version) = store::get::<PhaseState>(root);
    let now = Utc::now();
    Ok(store::put(root, Some(version), move |mut state: PhaseState| {
        state.transition_to(phase, step, now);
        state.trim_history(retention);
        state
    }))
}

/// Advance one step within the current phase when the tracker reports all
/// gates passing. Never crosses a phase boundary. Returns the step moved to.
pub fn advance_step(root: &std::path::Path) -> Option<Step> {
    let (tracker, _) = store::get::<TrackerState>(root);
    if !tracker.gates.all_passing() {
        return None;
    }

    let (state, version) = store::get::<PhaseState>(root);
    let next = state
        .current
        .step_index()
        .and_then(|i| state.current.phase.steps().get(i + 1))
        .copied()?;

    let now = Utc::now();
    let outcome = store::put(root, Some(version), move |mut state: PhaseState| {
        // Recompute from the payload the closure actually received; a merge
        // may have moved the position since the outer read.
        if let Some(step) = state
            .current
            .step_index()
            .and_then(|i| state.current.phase.steps().get(i + 1))
            .copied()
        {
            let phase = state.current.phase;
            state.transition_to(phase, Some(step), now);
        }
        state
    });
    outcome.committed.then_some(next)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{self, GateKind, GateStatus};
    use tempfile::TempDir;

    #[test]
    fn phase_ordering_and_next() {
        assert!(Phase::Idle < Phase::Plan);
        assert!(Phase::Ship < Phase::Grow);
        assert_eq!(Phase::Idle.next(), Some(Phase::Plan));
        assert_eq!(Phase::Grow.next(), None);
    }

    #[test]
    fn phase_roundtrip() {
        use std::str::FromStr;
        for phase in Phase::all() {
            assert_eq!(Phase::from_str(phase.as_str()).unwrap(), *phase);
        }
    }

    #[test]
    fn step_parse_rejects_unknown() {
        use std::str::FromStr;
        assert_eq!(Step::from_str("feature_work").unwrap(), Step::FeatureWork);
        assert!(Step::from_str("ship_it").is_err());
    }

    #[test]
    fn every_phase_except_idle_has_steps() {
        for phase in Phase::all() {
            if *phase == Phase::Idle {
                assert!(phase.steps().is_empty());
            } else {
                assert!(!phase.steps().is_empty());
            }
        }
    }

    #[test]
    fn progress_is_deterministic() {
        let pos = |phase, step| Position { phase, step };
        assert_eq!(progress_percent(pos(Phase::Idle, None)), 0);
        assert_eq!(progress_percent(pos(Phase::Plan, Some(Step::Clarify))), 6);
        assert_eq!(progress_percent(pos(Phase::Plan, Some(Step::Roadmap))), 25);
        assert_eq!(progress_percent(pos(Phase::Build, Some(Step::Scaffold))), 31);
        assert_eq!(progress_percent(pos(Phase::Ship, Some(Step::Announce))), 75);
        assert_eq!(progress_percent(pos(Phase::Grow, Some(Step::Iterate))), 100);
        // Same inputs, same answer.
        assert_eq!(
            progress_percent(pos(Phase::Build, Some(Step::Harden))),
            progress_percent(pos(Phase::Build, Some(Step::Harden)))
        );
    }

    #[test]
    fn transition_appends_history_and_closes_prior_entry() {
        let dir = TempDir::new().unwrap();
        transition(dir.path(), Phase::Plan, None).unwrap();
        transition(dir.path(), Phase::Plan, Some(Step::Research)).unwrap();

        let (state, version) = phase_state(dir.path());
        assert_eq!(version, 2);
        assert_eq!(state.current.phase, Phase::Plan);
        assert_eq!(state.current.step, Some(Step::Research));
        assert_eq!(state.history.len(), 2);
        assert!(state.history[0].exited_at.is_some());
        assert!(state.history[0].duration_secs.is_some());
        assert!(state.history[1].exited_at.is_none());
        assert!(state.started_at.is_some());
    }

    #[test]
    fn transition_rejects_step_from_another_phase() {
        let dir = TempDir::new().unwrap();
        let err = transition(dir.path(), Phase::Plan, Some(Step::Launch)).unwrap_err();
        assert!(matches!(err, PacerError::StepPhaseMismatch { .. }));
        let (_, version) = phase_state(dir.path());
        assert_eq!(version, 0);
    }

    #[test]
    fn truncated_payload_reads_as_idle() {
        let dir = TempDir::new().unwrap();
        let path = crate::paths::document_path(dir.path(), crate::paths::PHASE_FILE);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{\"current\":").unwrap();

        let (state, version) = phase_state(dir.path());
        assert_eq!(version, 0);
        assert_eq!(state.current.phase, Phase::Idle);
        assert_eq!(state.current.step, None);
    }

    #[test]
    fn advance_step_requires_all_gates_passing() {
        let dir = TempDir::new().unwrap();
        transition(dir.path(), Phase::Build, Some(Step::Scaffold)).unwrap();

        tracker::record_gate(dir.path(), GateKind::Compiles, GateStatus::Passing);
        tracker::record_gate(dir.path(), GateKind::Tests, GateStatus::Failing);
        tracker::record_gate(dir.path(), GateKind::Lints, GateStatus::Passing);
        assert_eq!(advance_step(dir.path()), None);

        tracker::record_gate(dir.path(), GateKind::Tests, GateStatus::Passing);
        assert_eq!(advance_step(dir.path()), Some(Step::FeatureWork));

        let (state, _) = phase_state(dir.path());
        assert_eq!(state.current.step, Some(Step::FeatureWork));
    }

    #[test]
    fn advance_step_stops_at_final_step() {
        let dir = TempDir::new().unwrap();
        transition(dir.path(), Phase::Ship, Some(Step::Announce)).unwrap();
        for kind in [GateKind::Compiles, GateKind::Tests, GateKind::Lints] {
            tracker::record_gate(dir.path(), kind, GateStatus::Passing);
        }
        assert_eq!(advance_step(dir.path()), None);
        let (state, _) = phase_state(dir.path());
        assert_eq!(state.current.phase, Phase::Ship);
        assert_eq!(state.current.step, Some(Step::Announce));
    }

    #[test]
    fn advance_step_noop_when_idle() {
        let dir = TempDir::new().unwrap();
        for kind in [GateKind::Compiles, GateKind::Tests, GateKind::Lints] {
            tracker::record_gate(dir.path(), kind, GateStatus::Passing);
        }
        assert_eq!(advance_step(dir.path()), None);
    }

    #[test]
    fn two_writers_from_version_zero_both_land() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();

        // Each writer mutates the default it read at version 0, ignoring
        // what the store hands it, as an independent process would.
        let first = store::put(dir.path(), Some(0), move |_: PhaseState| {
            let mut state = PhaseState::default();
            state.transition_to(Phase::Plan, Some(Step::Clarify), now);
            state
        });
        let later = now + chrono::Duration::seconds(3);
        let second = store::put(dir.path(), Some(0), move |_: PhaseState| {
            let mut state = PhaseState::default();
            state.transition_to(Phase::Plan, Some(Step::Research), later);
            state
        });
        assert_eq!((first.version, second.version), (1, 2));

        let (state, version) = phase_state(dir.path());
        assert_eq!(version, 2);
        assert_eq!(state.history.len(), 2);
        assert!(state.history.iter().any(|e| e.step == Some(Step::Clarify)));
        assert!(state.history.iter().any(|e| e.step == Some(Step::Research)));
    }

    #[test]
    fn merge_keeps_history_from_both_sides() {
        let now = Utc::now();
        let mut a = PhaseState::default();
        a.transition_to(Phase::Plan, Some(Step::Clarify), now);
        let mut b = PhaseState::default();
        b.transition_to(Phase::Plan, Some(Step::Research), now + chrono::Duration::seconds(5));

        let merged = PhaseState::merge(b.clone(), a.clone());
        assert_eq!(merged.history.len(), 2);
        assert_eq!(merged.current, b.current);
        assert_eq!(merged.history[0].step, Some(Step::Clarify));
        assert_eq!(merged.history[1].step, Some(Step::Research));
    }

    #[test]
    fn merge_prefers_closed_entry_over_open_twin() {
        let now = Utc::now();
        let mut open = PhaseState::default();
        open.transition_to(Phase::Plan, Some(Step::Clarify), now);

        let mut closed = open.clone();
        closed.transition_to(Phase::Plan, Some(Step::Research), now + chrono::Duration::seconds(9));

        let merged = PhaseState::merge(open, closed);
        let first = &merged.history[0];
        assert_eq!(first.step, Some(Step::Clarify));
        assert!(first.exited_at.is_some());
    }

    #[test]
    fn merge_unions_doc_pointers() {
        let mut a = PhaseState::default();
        a.set_doc("plan", "docs/PLAN.md");
        let mut b = PhaseState::default();
        b.set_doc("notes", "docs/NOTES.md");

        let merged = PhaseState::merge(a, b);
        assert_eq!(merged.docs.len(), 2);
        assert_eq!(merged.docs["plan"], "docs/PLAN.md");
        assert_eq!(merged.docs["notes"], "docs/NOTES.md");
    }

    #[test]
    fn history_respects_config_retention() {
        let dir = TempDir::new().unwrap();
        let config = crate::config::PacerConfig {
            history_retention: 3,
            ..Default::default()
        };
        config.save(dir.path()).unwrap();

        for _ in 0..3 {
            transition(dir.path(), Phase::Plan, Some(Step::Clarify)).unwrap();
            transition(dir.path(), Phase::Plan, Some(Step::Research)).unwrap();
        }
        let (state, _) = phase_state(dir.path());
        assert_eq!(state.history.len(), 3);
    }
}
