//! Activity tracking: recent file touches and tool runs, error memory,
//! suggestion history, gate results, and stuck detection.
//!
//! Every collection is bounded. Error memory deduplicates by
//! (message, file) identity; re-recording an error counts as a failed fix
//! attempt. Suggestions are kept newest first. All mutations flow through
//! the store's read-modify-write wrappers at the bottom of this module.

use crate::config::PacerConfig;
use crate::store::{self, Document, PutOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

pub const RECENT_EVENT_CAP: usize = 30;
pub const ERROR_MEMORY_CAP: usize = 50;
pub const SUGGESTION_CAP: usize = 20;

// ---------------------------------------------------------------------------
// Gates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Passing,
    Failing,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateKind {
    Compiles,
    Tests,
    Lints,
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateKind::Compiles => "compiles",
            GateKind::Tests => "tests",
            GateKind::Lints => "lints",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateCheck {
    #[serde(default)]
    pub status: GateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReport {
    #[serde(default)]
    pub compiles: GateCheck,
    #[serde(default)]
    pub tests: GateCheck,
    #[serde(default)]
    pub lints: GateCheck,
}

impl GateReport {
    pub fn all_passing(&self) -> bool {
        [self.compiles, self.tests, self.lints]
            .iter()
            .all(|g| g.status == GateStatus::Passing)
    }

    fn check_mut(&mut self, kind: GateKind) -> &mut GateCheck {
        match kind {
            GateKind::Compiles => &mut self.compiles,
            GateKind::Tests => &mut self.tests,
            GateKind::Lints => &mut self.lints,
        }
    }
}

/// Of two observations of the same gate, keep the more recent one. An
/// unchecked gate never beats a checked one; ties favor the committing
/// writer.
fn newer_check(local: GateCheck, disk: GateCheck) -> GateCheck {
    match (local.checked_at, disk.checked_at) {
        (None, Some(_)) => disk,
        (Some(l), Some(d)) if d > l => disk,
        _ => local,
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTouch {
    pub path: String,
    pub touched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRun {
    pub tool: String,
    pub at: DateTime<Utc>,
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMemory {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Times this error was seen again after its first sighting; each
    /// recurrence counts as a failed fix attempt.
    #[serde(default)]
    pub fix_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionResponse {
    pub accepted: bool,
    pub responded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<SuggestionResponse>,
}

// ---------------------------------------------------------------------------
// TrackerState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerState {
    #[serde(default, deserialize_with = "crate::store::lenient")]
    pub recent_files: Vec<FileTouch>,
    #[serde(default, deserialize_with = "crate::store::lenient")]
    pub recent_tools: Vec<ToolRun>,
    #[serde(default, deserialize_with = "crate::store::lenient")]
    pub errors: Vec<ErrorMemory>,
    /// Newest first.
    #[serde(default, deserialize_with = "crate::store::lenient")]
    pub suggestions: Vec<Suggestion>,
    #[serde(default, deserialize_with = "crate::store::lenient")]
    pub gates: GateReport,
    #[serde(default, deserialize_with = "crate::store::lenient")]
    pub phase_entered_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "crate::store::lenient")]
    pub last_progress_at: Option<DateTime<Utc>>,
}

impl TrackerState {
    pub fn record_file_touch(&mut self, path: &str, now: DateTime<Utc>) {
        self.recent_files.push(FileTouch {
            path: path.to_string(),
            touched_at: now,
        });
        cap_oldest(&mut self.recent_files, RECENT_EVENT_CAP);
    }

    pub fn record_tool_run(&mut self, tool: &str, ok: bool, now: DateTime<Utc>) {
        self.recent_tools.push(ToolRun {
            tool: tool.to_string(),
            at: now,
            ok,
        });
        cap_oldest(&mut self.recent_tools, RECENT_EVENT_CAP);
    }

    /// Record an error, deduplicated by (message, file). A repeat bumps
    /// `last_seen` and `fix_attempts`; past the cap the entry with the
    /// oldest `last_seen` is evicted.
    pub fn record_error(&mut self, message: &str, file: Option<&str>, now: DateTime<Utc>) {
        if let Some(existing) = self
            .errors
            .iter_mut()
            .find(|e| e.message == message && e.file.as_deref() == file)
        {
            existing.last_seen = now;
            existing.fix_attempts += 1;
            return;
        }
        self.errors.push(ErrorMemory {
            message: message.to_string(),
            file: file.map(str::to_string),
            first_seen: now,
            last_seen: now,
            fix_attempts: 0,
        });
        if self.errors.len() > ERROR_MEMORY_CAP {
            if let Some(oldest) = self
                .errors
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.last_seen)
                .map(|(i, _)| i)
            {
                self.errors.remove(oldest);
            }
        }
    }

    /// Insert a suggestion at the front. Returns its generated id.
    pub fn record_suggestion(&mut self, text: &str, now: DateTime<Utc>) -> String {
        let id = Uuid::new_v4().to_string();
        self.suggestions.insert(
            0,
            Suggestion {
                id: id.clone(),
                text: text.to_string(),
                created_at: now,
                response: None,
            },
        );
        self.suggestions.truncate(SUGGESTION_CAP);
        id
    }

    /// Attach an accept/reject response. Returns false if the suggestion
    /// has already been evicted.
    pub fn respond_suggestion(&mut self, id: &str, accepted: bool, now: DateTime<Utc>) -> bool {
        match self.suggestions.iter_mut().find(|s| s.id == id) {
            Some(suggestion) => {
                suggestion.response = Some(SuggestionResponse {
                    accepted,
                    responded_at: now,
                });
                true
            }
            None => false,
        }
    }

    pub fn record_gate(&mut self, kind: GateKind, status: GateStatus, now: DateTime<Utc>) {
        let check = self.gates.check_mut(kind);
        check.status = status;
        check.checked_at = Some(now);
    }

    pub fn mark_progress(&mut self, now: DateTime<Utc>) {
        self.last_progress_at = Some(now);
    }

    pub fn enter_phase(&mut self, now: DateTime<Utc>) {
        self.phase_entered_at = Some(now);
        self.last_progress_at = Some(now);
    }

    /// Derived stuck signal: no recorded progress for longer than the
    /// configured window, or any error that keeps coming back after the
    /// allowed number of fix attempts.
    pub fn stuck(&self, now: DateTime<Utc>, config: &PacerConfig) -> Option<StuckReport> {
        let idle_minutes = self
            .last_progress_at
            .map(|t| (now - t).num_minutes())
            .unwrap_or(0);
        let idle = self.last_progress_at.is_some()
            && idle_minutes >= i64::from(config.stuck_after_minutes);
        let repeated_errors: Vec<String> = self
            .errors
            .iter()
            .filter(|e| e.fix_attempts >= config.max_fix_attempts)
            .map(|e| e.message.clone())
            .collect();

        if idle || !repeated_errors.is_empty() {
            Some(StuckReport {
                idle_minutes,
                repeated_errors,
            })
        } else {
            None
        }
    }
}

fn cap_oldest<T>(items: &mut Vec<T>, cap: usize) {
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(..excess);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StuckReport {
    pub idle_minutes: i64,
    pub repeated_errors: Vec<String>,
}

impl Document for TrackerState {
    const FILENAME: &'static str = crate::paths::TRACKER_FILE;

    fn merge(local: Self, disk: Self) -> Self {
        let recent_files = store::union_by_key(
            local.recent_files,
            disk.recent_files,
            |e| (e.path.clone(), e.touched_at),
            |e| e.touched_at,
            RECENT_EVENT_CAP,
        );
        let recent_tools = store::union_by_key(
            local.recent_tools,
            disk.recent_tools,
            |e| (e.tool.clone(), e.at),
            |e| e.at,
            RECENT_EVENT_CAP,
        );
        let errors = store::union_by_key(
            local.errors,
            disk.errors,
            |e| (e.message.clone(), e.file.clone()),
            |e| e.last_seen,
            ERROR_MEMORY_CAP,
        );

        // Suggestions are stored newest first; union in ascending order,
        // then flip back.
        let (mut local_suggestions, mut disk_suggestions) =
            (local.suggestions, disk.suggestions);
        local_suggestions.reverse();
        disk_suggestions.reverse();
        let mut suggestions = store::union_by_key(
            local_suggestions,
            disk_suggestions,
            |s| s.id.clone(),
            |s| (s.created_at, s.response.as_ref().map(|r| r.responded_at)),
            SUGGESTION_CAP,
        );
        suggestions.reverse();

        Self {
            recent_files,
            recent_tools,
            errors,
            suggestions,
            gates: GateReport {
                compiles: newer_check(local.gates.compiles, disk.gates.compiles),
                tests: newer_check(local.gates.tests, disk.gates.tests),
                lints: newer_check(local.gates.lints, disk.gates.lints),
            },
            phase_entered_at: local.phase_entered_at.max(disk.phase_entered_at),
            last_progress_at: local.last_progress_at.max(disk.last_progress_at),
        }
    }
}

// ---------------------------------------------------------------------------
// Store-backed operations
// ---------------------------------------------------------------------------

/// Load the tracker document.
pub fn tracker(root: &Path) -> (TrackerState, u64) {
    store::get(root)
}

fn update<F>(root: &Path, apply: F) -> PutOutcome
where
    F: FnOnce(&mut TrackerState),
{
    let (_, version) = store::get::<TrackerState>(root);
    store::put(root, Some(version), |mut state: TrackerState| {
        apply(&mut state);
        state
    })
}

pub fn record_file_touch(root: &Path, path: &str) -> PutOutcome {
    let now = Utc::now();
    update(root, |t| t.record_file_touch(path, now))
}

pub fn record_tool_run(root: &Path, tool: &str, ok: bool) -> PutOutcome {
    let now = Utc::now();
    update(root, |t| t.record_tool_run(tool, ok, now))
}

pub fn record_error(root: &Path, message: &str, file: Option<&str>) -> PutOutcome {
    let now = Utc::now();
    update(root, |t| t.record_error(message, file, now))
}

pub fn record_suggestion(root: &Path, text: &str) -> PutOutcome {
    let now = Utc::now();
    update(root, |t| {
        t.record_suggestion(text, now);
    })
}

pub fn respond_suggestion(root: &Path, id: &str, accepted: bool) -> PutOutcome {
    let now = Utc::now();
    update(root, |t| {
        t.respond_suggestion(id, accepted, now);
    })
}

pub fn record_gate(root: &Path, kind: GateKind, status: GateStatus) -> PutOutcome {
    let now = Utc::now();
    update(root, |t| t.record_gate(kind, status, now))
}

pub fn mark_progress(root: &Path) -> PutOutcome {
    let now = Utc::now();
    update(root, |t| t.mark_progress(now))
}

pub fn enter_phase(root: &Path) -> PutOutcome {
    let now = Utc::now();
    update(root, |t| t.enter_phase(now))
}

/// Evaluate stuck detection against the persisted tracker and config.
pub fn stuck(root: &Path) -> Option<StuckReport> {
    let (state, _) = tracker(root);
    let config = PacerConfig::load(root);
    state.stuck(Utc::now(), &config)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
