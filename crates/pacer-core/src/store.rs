//! Versioned document persistence.
//!
//! One logical document per file under the `.pacer/` state directory, each
//! stored as a `{version, payload}` JSON envelope. Reads are total: a
//! missing or unreadable document decodes to its type default at version 0.
//! Writes go through [`put`], which serializes the next version to a temp
//! file and renames it over the target; a stale version precondition is
//! resolved by merging the candidate against the freshly read on-disk
//! payload rather than failing or overwriting blindly.
//!
//! There is no lock file and no advisory locking. Independent processes
//! (interactive run, background watcher, protocol server) are reconciled
//! by the read-merge-rename loop alone. Scalar fields land last-writer-wins
//! by rename order; append-only collections survive concurrent writers via
//! [`Document::merge`].
//!
//! No other module may open a document file directly.

use crate::error::Result;
use crate::{io, paths};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A unit of persisted state managed by the store.
pub trait Document: Serialize + DeserializeOwned + Default + Clone {
    /// File name of this document inside the state directory.
    const FILENAME: &'static str;

    /// Reconcile a candidate against a payload that reached disk after the
    /// candidate's base version was read. Append-only collections must keep
    /// every entry present on either side.
    fn merge(local: Self, disk: Self) -> Self;
}

/// Commit attempts before a conflicting write gives up (state unchanged).
const COMMIT_ATTEMPTS: u32 = 3;

#[derive(Debug, Serialize)]
struct Envelope<'a, T> {
    version: u64,
    payload: &'a T,
}

/// Outcome of a [`put`]: whether the commit landed, and the document
/// version on disk afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    pub committed: bool,
    pub version: u64,
}

// ---------------------------------------------------------------------------
// Read path
// ---------------------------------------------------------------------------

/// Load a document and its version. Total: absent or malformed content
/// yields `(T::default(), 0)`, never an error.
pub fn get<T: Document>(root: &Path) -> (T, u64) {
    load(&document_path::<T>(root))
}

pub(crate) fn document_path<T: Document>(root: &Path) -> PathBuf {
    paths::document_path(root, T::FILENAME)
}

fn load<T: Document>(path: &Path) -> (T, u64) {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %path.display(), error = %e, "unreadable document, using default");
            }
            return (T::default(), 0);
        }
    };
    match decode::<T>(&raw) {
        Some((payload, version)) => (payload, version),
        None => {
            tracing::debug!(path = %path.display(), "malformed document, using default");
            (T::default(), 0)
        }
    }
}

/// Decode a `{version, payload}` envelope. Any structural problem (wrong
/// top-level shape, missing or non-integer version, non-object payload)
/// returns `None`.
fn decode<T: Document>(raw: &str) -> Option<(T, u64)> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let envelope = value.as_object()?;
    let version = envelope.get("version")?.as_u64()?;
    let payload = envelope.get("payload")?;
    if !payload.is_object() {
        return None;
    }
    let payload = serde_json::from_value(payload.clone()).ok()?;
    Some((payload, version))
}

/// Field-level decode fallback: a field whose value fails to decode is
/// treated as absent. Used with `#[serde(default, deserialize_with = ...)]`
/// on every payload field so one bad field never poisons the document.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Write path
// ---------------------------------------------------------------------------

/// Apply `mutate` to the current payload (or default) and commit the result
/// at the next version.
///
/// When `expected` is supplied and no longer matches the on-disk version at
/// commit time, the candidate is merged against the fresh payload via
/// [`Document::merge`] and the commit retried with version
/// `max(expected, disk) + 1`, up to a fixed bound. Failure is soft: the
/// outcome reports `committed: false` and on-disk state is unchanged.
pub fn put<T, F>(root: &Path, expected: Option<u64>, mutate: F) -> PutOutcome
where
    T: Document,
    F: FnOnce(T) -> T,
{
    let path = document_path::<T>(root);
    let (current, current_version) = load::<T>(&path);
    let mut candidate = mutate(current);
    let base = expected.unwrap_or(current_version);
    // The disk version the candidate has been reconciled against so far.
    let mut reconciled = base;

    for _ in 0..COMMIT_ATTEMPTS {
        // Re-read immediately before renaming: another process may have
        // committed since the version was last observed.
        let (disk, disk_version) = load::<T>(&path);
        if disk_version != reconciled {
            candidate = T::merge(candidate, disk);
            reconciled = disk_version;
            continue;
        }
        let next = base.max(reconciled) + 1;
        return match write_envelope(&path, next, &candidate) {
            Ok(()) => PutOutcome {
                committed: true,
                version: next,
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "commit failed, state unchanged");
                PutOutcome {
                    committed: false,
                    version: disk_version,
                }
            }
        };
    }

    tracing::warn!(path = %path.display(), "version kept advancing, giving up after {COMMIT_ATTEMPTS} attempts");
    let (_, version) = load::<T>(&path);
    PutOutcome {
        committed: false,
        version,
    }
}

fn write_envelope<T: Serialize>(path: &Path, version: u64, payload: &T) -> Result<()> {
    let envelope = Envelope { version, payload };
    let data = serde_json::to_vec_pretty(&envelope)?;
    io::atomic_write(path, &data)
}

// ---------------------------------------------------------------------------
// Merge helpers
// ---------------------------------------------------------------------------

/// Union two append-only collections by stable identity key.
///
/// Entries present on either side survive. When both sides carry the same
/// identity, the entry with the greater `order` value wins (ties favor
/// `local`, the committing writer). The result is sorted by `order` and
/// truncated to `cap`, keeping the most recent entries.
pub(crate) fn union_by_key<T, K, S, FK, FS>(
    local: Vec<T>,
    disk: Vec<T>,
    key: FK,
    order: FS,
    cap: usize,
) -> Vec<T>
where
    K: PartialEq,
    S: Ord + Copy,
    FK: Fn(&T) -> K,
    FS: Fn(&T) -> S,
{
    let mut merged = disk;
    for item in local {
        let k = key(&item);
        match merged.iter().position(|e| key(e) == k) {
            Some(i) => {
                if order(&item) >= order(&merged[i]) {
                    merged[i] = item;
                }
            }
            None => merged.push(item),
        }
    }
    merged.sort_by_key(|e| order(e));
    if merged.len() > cap {
        merged.drain(..merged.len() - cap);
    }
    merged
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
