//! Graph persistence.
//!
//! Two stores are provided:
//! - [`JsonGraphStore`]: the `tasks.json` file itself, written atomically
//! - [`SqliteGraphStore`]: every saved revision kept in a `SQLite` database
//!   at `<data dir>/taskmerge/projects/<name>-<hash>/history.sqlite3`

use crate::error::{Error, Result};
use crate::paths;
use crate::tasks::TaskGraph;
use crate::traits::GraphStore;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Task graph stored as pretty-printed JSON.
#[derive(Debug, Clone)]
pub struct JsonGraphStore {
    path: PathBuf,
}

impl JsonGraphStore {
    /// Create a store for the given task file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The task file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GraphStore for JsonGraphStore {
    fn load(&self) -> Result<TaskGraph> {
        if !self.path.exists() {
            return Err(Error::GraphNotFound(self.path.clone()));
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, graph: &TaskGraph, _summary: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // A reader never sees a half-written file: write beside, then rename.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(graph)? + "\n")?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// One stored revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Revision {
    /// Revision number, increasing.
    pub id: i64,
    /// When it was saved (RFC 3339).
    pub saved_at: String,
    /// What the merge changed.
    pub summary: String,
}

/// SQLite-based graph store keeping every revision.
///
/// Each operation opens a new connection to the database file. This avoids
/// thread safety issues and is acceptable for one write per merge.
#[derive(Debug, Clone)]
pub struct SqliteGraphStore {
    db_path: PathBuf,
}

impl SqliteGraphStore {
    /// Create a store for the given project directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory is unknown or the database
    /// cannot be initialized.
    pub fn new(project_dir: &Path) -> Result<Self> {
        let db_path = paths::history_db_path(project_dir).ok_or_else(|| {
            Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "no user data directory"))
        })?;
        Self::with_path(db_path)
    }

    /// Create a store with a specific database path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn with_path(db_path: PathBuf) -> Result<Self> {
        let store = Self { db_path };
        store.init_schema()?;
        Ok(store)
    }

    /// Get the database path.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.open()?;
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS revisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                saved_at TEXT NOT NULL,
                summary TEXT NOT NULL,
                graph_json TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// All revisions, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be read.
    pub fn revisions(&self) -> Result<Vec<Revision>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT id, saved_at, summary FROM revisions ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Revision { id: row.get(0)?, saved_at: row.get(1)?, summary: row.get(2)? })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// The graph as of a given revision.
    ///
    /// # Errors
    ///
    /// Returns an error if the revision does not exist or cannot be parsed.
    pub fn load_revision(&self, id: i64) -> Result<TaskGraph> {
        let conn = self.open()?;
        let json: Option<String> = conn
            .query_row("SELECT graph_json FROM revisions WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        let json = json.ok_or_else(|| Error::InvalidGraph(format!("no revision {id}")))?;
        Ok(serde_json::from_str(&json)?)
    }
}

impl GraphStore for SqliteGraphStore {
    /// The latest revision, or an empty graph if nothing was saved yet.
    fn load(&self) -> Result<TaskGraph> {
        let conn = self.open()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT graph_json FROM revisions ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(TaskGraph::default()),
        }
    }

    fn save(&self, graph: &TaskGraph, summary: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO revisions (saved_at, summary, graph_json) VALUES (?1, ?2, ?3)",
            params![chrono::Utc::now().to_rfc3339(), summary, serde_json::to_string(graph)?],
        )?;
        Ok(())
    }
}
