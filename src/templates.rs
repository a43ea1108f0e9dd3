//! Template loading and rendering using Tera.
//!
//! Context blocks and the markdown export are rendered from templates. The
//! defaults are embedded in the binary; a project can override any of them by
//! placing a file with the same relative name under `.taskmerge/templates/`.

use crate::error::{Error, Result};
use crate::paths;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tera::{Context, Tera};

/// Override directory name inside the project directory.
const TEMPLATES_DIR: &str = "templates";

/// Subtask context: parent, neighbouring siblings, current details.
pub const SUBTASK_CONTEXT: &str = "context/subtask.tera";
/// Expansion context for expand-task.
pub const EXPANSION_CONTEXT: &str = "context/expansion.tera";
/// Update context for update-task.
pub const UPDATE_TASK_CONTEXT: &str = "context/update_task.tera";
/// Task list context for add-task and analyze-complexity.
pub const TASK_LIST_CONTEXT: &str = "context/task_list.tera";
/// Requirements document context for parse-prd.
pub const PRD_CONTEXT: &str = "context/prd.tera";
/// Markdown hierarchy export.
pub const HIERARCHY_EXPORT: &str = "export/hierarchy.tera";

/// Embedded default templates for fallback when files don't exist.
static EMBEDDED_TEMPLATES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();

    m.insert(SUBTASK_CONTEXT, include_str!("../templates/context/subtask.tera"));
    m.insert(EXPANSION_CONTEXT, include_str!("../templates/context/expansion.tera"));
    m.insert(UPDATE_TASK_CONTEXT, include_str!("../templates/context/update_task.tera"));
    m.insert(TASK_LIST_CONTEXT, include_str!("../templates/context/task_list.tera"));
    m.insert(PRD_CONTEXT, include_str!("../templates/context/prd.tera"));
    m.insert(HIERARCHY_EXPORT, include_str!("../templates/export/hierarchy.tera"));

    m
});

/// Global template engine with caching.
static TERA: Lazy<RwLock<Option<Tera>>> = Lazy::new(|| RwLock::new(None));

/// Initialize the template engine.
///
/// Templates under `templates_dir` (default `./.taskmerge/templates`) take
/// precedence; anything missing there comes from the embedded defaults.
///
/// # Errors
///
/// Returns an error if the directory exists but contains invalid templates,
/// or if an embedded template fails to parse.
pub fn init_templates(templates_dir: Option<&Path>) -> Result<()> {
    let dir = templates_dir.map_or_else(
        || paths::project_dir(&std::env::current_dir().unwrap_or_default()).join(TEMPLATES_DIR),
        Path::to_path_buf,
    );

    let mut tera = Tera::default();

    if dir.exists() {
        let glob_pattern = format!("{}/**/*.tera", dir.display());
        tera = Tera::new(&glob_pattern).map_err(|e| {
            Error::Template(format!("Failed to load templates from {}: {e}", dir.display()))
        })?;
    }

    for (name, content) in EMBEDDED_TEMPLATES.iter() {
        if tera.get_template(name).is_err() {
            tera.add_raw_template(name, content)?;
        }
    }

    *TERA.write().map_err(|e| Error::Template(e.to_string()))? = Some(tera);

    Ok(())
}

/// Render a template with the given context.
///
/// Templates are loaded on first use.
///
/// # Errors
///
/// Returns an error if the template doesn't exist or rendering fails.
pub fn render(name: &str, context: &Context) -> Result<String> {
    let needs_init = TERA.read().map_err(|e| Error::Template(e.to_string()))?.is_none();
    if needs_init {
        init_templates(None)?;
    }

    let guard = TERA.read().map_err(|e| Error::Template(e.to_string()))?;
    let tera = guard.as_ref().ok_or_else(|| Error::Template("Templates not initialized".into()))?;
    let rendered = tera
        .render(name, context)
        .map_err(|e| Error::Template(format!("Failed to render template {name}: {e}")))?;
    drop(guard);

    Ok(rendered)
}

/// Reset the template cache, forcing re-initialization on next use.
///
/// # Errors
///
/// Returns an error if the write lock cannot be acquired.
pub fn reset_cache() -> Result<()> {
    *TERA.write().map_err(|e| Error::Template(e.to_string()))? = None;
    Ok(())
}

/// Names of all embedded templates.
#[must_use]
pub fn embedded_template_names() -> Vec<&'static str> {
    EMBEDDED_TEMPLATES.keys().copied().collect()
}
