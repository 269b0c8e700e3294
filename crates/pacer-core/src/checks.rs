//! Ad hoc check-status tracking.
//!
//! Arbitrary check keys map to a status with a timestamp and an optional
//! skip reason. Conflicting concurrent writes resolve per key: the newer
//! `updated_at` wins, and keys present on only one side are preserved.

use crate::store::{self, Document, PutOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    #[default]
    Pending,
    Completed,
    Skipped,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckStatus::Pending => "pending",
            CheckStatus::Completed => "completed",
            CheckStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckEntry {
    pub status: CheckStatus,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckStatusMap {
    #[serde(default, deserialize_with = "crate::store::lenient")]
    pub checks: BTreeMap<String, CheckEntry>,
}

impl Document for CheckStatusMap {
    const FILENAME: &'static str = crate::paths::CHECKS_FILE;

    fn merge(local: Self, disk: Self) -> Self {
        let mut checks = disk.checks;
        for (key, entry) in local.checks {
            match checks.get(&key) {
                Some(existing) if existing.updated_at > entry.updated_at => {}
                _ => {
                    checks.insert(key, entry);
                }
            }
        }
        Self { checks }
    }
}

// ---------------------------------------------------------------------------
// Store-backed operations
// ---------------------------------------------------------------------------

/// Load the check-status document.
pub fn checks(root: &Path) -> (CheckStatusMap, u64) {
    store::get(root)
}

/// Set a check's status, stamping `updated_at`.
pub fn set_check(
    root: &Path,
    key: &str,
    status: CheckStatus,
    skip_reason: Option<String>,
) -> PutOutcome {
    let (_, version) = store::get::<CheckStatusMap>(root);
    let key = key.to_string();
    let now = Utc::now();
    store::put(root, Some(version), move |mut map: CheckStatusMap| {
        map.checks.insert(
            key,
            CheckEntry {
                status,
                updated_at: now,
                skip_reason,
            },
        );
        map
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
