//! Configuration management for taskmerge.
//!
//! Settings are read from `.taskmerge/config.yaml` in the project, falling
//! back to `<user config dir>/taskmerge/config.yaml` and then to defaults.

use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_tasks_file() -> PathBuf {
    PathBuf::from("tasks/tasks.json")
}

fn default_separator() -> String {
    "\n\n".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_subtask_count() -> usize {
    3
}

const fn default_complexity_threshold() -> f64 {
    5.0
}

const fn default_max_context_subtasks() -> usize {
    20
}

/// Project configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    /// Task file, relative to the project root.
    #[serde(default = "default_tasks_file")]
    pub tasks_file: PathBuf,

    /// Inserted between existing subtask details and appended text.
    #[serde(default = "default_separator")]
    pub details_separator: String,

    /// Whether appended subtask text gets a timestamp line.
    #[serde(default = "default_true")]
    pub timestamp_appends: bool,

    /// Subtasks requested per expansion when no complexity report applies.
    #[serde(default = "default_subtask_count")]
    pub default_subtask_count: usize,

    /// Complexity score at or above which a task is worth expanding.
    #[serde(default = "default_complexity_threshold")]
    pub complexity_threshold: f64,

    /// Most sibling subtasks listed in an assembled context.
    #[serde(default = "default_max_context_subtasks")]
    pub max_context_subtasks: usize,

    /// Write merge events to `.taskmerge/merge-events.jsonl`.
    #[serde(default)]
    pub debug_logging: bool,

    /// Also keep every committed graph in the revision history database.
    #[serde(default)]
    pub keep_history: bool,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            tasks_file: default_tasks_file(),
            details_separator: default_separator(),
            timestamp_appends: true,
            default_subtask_count: default_subtask_count(),
            complexity_threshold: default_complexity_threshold(),
            max_context_subtasks: default_max_context_subtasks(),
            debug_logging: false,
            keep_history: false,
        }
    }
}

impl ProjectConfig {
    /// Load config from a project directory, returning None if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_from(base_dir: &Path) -> Result<Option<Self>> {
        Self::load_file(&paths::project_config_path(base_dir))
    }

    /// Load config from an explicit file, returning None if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_file(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(serde_yaml::from_str(&content)?))
    }

    /// Resolve the effective config: project file, then user file, then defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn resolve(base_dir: &Path) -> Result<Self> {
        if let Some(config) = Self::load_from(base_dir)? {
            return Ok(config);
        }
        if let Some(user) = paths::user_config_path() {
            if let Some(config) = Self::load_file(&user)? {
                return Ok(config);
            }
        }
        Ok(Self::default())
    }

    /// Save config to a project directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to(&self, base_dir: &Path) -> Result<()> {
        let config_path = paths::project_config_path(base_dir);
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&config_path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// The task file resolved against a project directory.
    #[must_use]
    pub fn tasks_path(&self, base_dir: &Path) -> PathBuf {
        if self.tasks_file.is_absolute() {
            self.tasks_file.clone()
        } else {
            base_dir.join(&self.tasks_file)
        }
    }
}

/// Ensure a project config exists, writing defaults if not.
///
/// # Errors
///
/// Returns an error if config cannot be loaded or saved.
pub fn ensure_config_in(base_dir: &Path) -> Result<ProjectConfig> {
    if let Some(config) = ProjectConfig::load_from(base_dir)? {
        return Ok(config);
    }
    let config = ProjectConfig::default();
    config.save_to(base_dir)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ProjectConfig::default();
        assert_eq!(config.tasks_file, PathBuf::from("tasks/tasks.json"));
        assert_eq!(config.details_separator, "\n\n");
        assert!(config.timestamp_appends);
        assert_eq!(config.default_subtask_count, 3);
        assert!(!config.debug_logging);
        assert!(!config.keep_history);
    }

    #[test]
    fn test_load_not_found() {
        let dir = TempDir::new().unwrap();
        assert!(ProjectConfig::load_from(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let config = ProjectConfig {
            default_subtask_count: 5,
            debug_logging: true,
            ..ProjectConfig::default()
        };
        config.save_to(dir.path()).unwrap();

        let loaded = ProjectConfig::load_from(dir.path()).unwrap().unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = paths::project_config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "timestamp_appends: false\n").unwrap();

        let loaded = ProjectConfig::load_from(dir.path()).unwrap().unwrap();
        assert!(!loaded.timestamp_appends);
        assert_eq!(loaded.max_context_subtasks, 20);
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        let dir = TempDir::new().unwrap();
        let path = paths::project_config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "default_subtask_count: [not a number").unwrap();
        assert!(ProjectConfig::load_from(dir.path()).is_err());
    }

    #[test]
    fn test_ensure_config_writes_defaults_once() {
        let dir = TempDir::new().unwrap();
        let first = ensure_config_in(dir.path()).unwrap();
        assert!(paths::project_config_path(dir.path()).exists());

        let mut changed = first;
        changed.default_subtask_count = 7;
        changed.save_to(dir.path()).unwrap();
        assert_eq!(ensure_config_in(dir.path()).unwrap().default_subtask_count, 7);
    }

    #[test]
    fn test_tasks_path() {
        let config = ProjectConfig::default();
        assert_eq!(config.tasks_path(Path::new("/p")), PathBuf::from("/p/tasks/tasks.json"));
    }
}
