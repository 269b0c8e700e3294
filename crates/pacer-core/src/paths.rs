use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const PACER_DIR: &str = ".pacer";

pub const PHASE_FILE: &str = "phase.json";
pub const TRACKER_FILE: &str = "tracker.json";
pub const CHECKS_FILE: &str = "checks.json";
pub const CONFIG_FILE: &str = "config.yaml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn pacer_dir(root: &Path) -> PathBuf {
    root.join(PACER_DIR)
}

/// Path of a named document inside the state directory.
pub fn document_path(root: &Path, filename: &str) -> PathBuf {
    pacer_dir(root).join(filename)
}

pub fn config_path(root: &Path) -> PathBuf {
    document_path(root, CONFIG_FILE)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
