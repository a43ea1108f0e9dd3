//! Where taskmerge keeps its files.
//!
//! Per-project settings and logs live in `<project>/.taskmerge/`. The revision
//! history database lives under the user data directory, in a subdirectory
//! named after a hash of the project path, so it survives `git clean`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Per-project directory name.
pub const PROJECT_DIR_NAME: &str = ".taskmerge";

/// Application directory name under user config/data directories.
pub const APP_DIR_NAME: &str = "taskmerge";

/// Config filename.
pub const CONFIG_FILENAME: &str = "config.yaml";

/// Merge event log filename.
pub const MERGE_LOG_FILENAME: &str = "merge-events.jsonl";

/// Last complexity analysis, kept for complexity-driven expansion.
pub const COMPLEXITY_REPORT_FILENAME: &str = "complexity-report.json";

/// Revision history database filename.
pub const HISTORY_DB_FILENAME: &str = "history.sqlite3";

/// The per-project directory, `<project>/.taskmerge`.
#[must_use]
pub fn project_dir(base_dir: &Path) -> PathBuf {
    base_dir.join(PROJECT_DIR_NAME)
}

/// The per-project config file.
#[must_use]
pub fn project_config_path(base_dir: &Path) -> PathBuf {
    project_dir(base_dir).join(CONFIG_FILENAME)
}

/// The per-project merge event log.
#[must_use]
pub fn merge_log_path(base_dir: &Path) -> PathBuf {
    project_dir(base_dir).join(MERGE_LOG_FILENAME)
}

/// The per-project complexity report.
#[must_use]
pub fn complexity_report_path(base_dir: &Path) -> PathBuf {
    project_dir(base_dir).join(COMPLEXITY_REPORT_FILENAME)
}

/// The user-wide fallback config file, if a config directory exists.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILENAME))
}

/// The user data directory for taskmerge.
#[must_use]
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_DIR_NAME))
}

/// The history database for a project.
///
/// Returns `<data dir>/taskmerge/projects/<name>-<hash>/history.sqlite3`, or
/// `None` if the data directory cannot be determined.
#[must_use]
pub fn history_db_path(project: &Path) -> Option<PathBuf> {
    let base = data_dir()?;
    Some(base.join("projects").join(project_dir_name(project)).join(HISTORY_DB_FILENAME))
}

/// Readable, collision-resistant directory name for a project.
///
/// Format: `<last-component>-<hash>`, e.g. `my-project-00a1b2c3d4e5f607`.
fn project_dir_name(project: &Path) -> String {
    let path = project.canonicalize().unwrap_or_else(|_| project.to_path_buf());

    let prefix = path.file_name().and_then(|n| n.to_str()).unwrap_or("project");
    let prefix: String =
        prefix.chars().map(|c| if c.is_alphanumeric() { c } else { '-' }).collect();
    let prefix = prefix.trim_matches('-');

    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    format!("{prefix}-{:016x}", hasher.finish())
}
