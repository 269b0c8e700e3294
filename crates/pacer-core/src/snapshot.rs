//! Read-only projection for the remote dashboard.
//!
//! The dashboard is a downstream consumer: it receives this derived value
//! and never writes back. Collection only reads documents through the
//! store, so it is total and side-effect free.

use crate::phase::{self, Phase, PhaseState, Step};
use crate::store;
use crate::tracker::{GateReport, TrackerState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Events surfaced on the dashboard, newest first.
const EVENT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEvent {
    pub label: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<Step>,
    pub progress_percent: u8,
    pub gates: GateReport,
    pub recent_events: Vec<SnapshotEvent>,
    pub open_errors: usize,
    pub generated_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn collect(root: &Path) -> Snapshot {
        let (phase_state, _) = store::get::<PhaseState>(root);
        let (tracker, _) = store::get::<TrackerState>(root);

        let mut events: Vec<SnapshotEvent> = tracker
            .recent_files
            .iter()
            .map(|f| SnapshotEvent {
                label: format!("touched {}", f.path),
                at: f.touched_at,
            })
            .chain(tracker.recent_tools.iter().map(|t| SnapshotEvent {
                label: format!("ran {} ({})", t.tool, if t.ok { "ok" } else { "failed" }),
                at: t.at,
            }))
            .collect();
        events.sort_by(|a, b| b.at.cmp(&a.at));
        events.truncate(EVENT_LIMIT);

        Snapshot {
            phase: phase_state.current.phase,
            step: phase_state.current.step,
            progress_percent: phase::progress_percent(phase_state.current),
            gates: tracker.gates,
            recent_events: events,
            open_errors: tracker.errors.len(),
            generated_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
