//! Workflow file loading.
//!
//! Loads one or more YAML files into a single [`Workflow`]: the first
//! document names the workflow, later documents (in the same file or in
//! subsequent files) contribute additional jobs and override vars. Directory
//! arguments are scanned for `*.yml`/`*.yaml`, and a `*` wildcard in a file
//! name matches within its parent directory.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use probe_types::{Job, Workflow, validation};

use crate::error::ProbeError;

/// Partial workflow document; only the first document must carry a name.
#[derive(Debug, Deserialize, Default)]
struct WorkflowDoc {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    vars: indexmap::IndexMap<String, Value>,
    #[serde(default)]
    jobs: Vec<Job>,
}

/// Load a workflow from the given paths.
///
/// Returns the merged workflow (with generated job ids assigned and the
/// identifier rules validated) and the base directory used to resolve
/// embedded-job files, which is the parent of the first file.
pub fn load_workflow(paths: &[PathBuf]) -> Result<(Workflow, PathBuf), ProbeError> {
    let mut files = Vec::new();
    for path in paths {
        files.extend(discover(path)?);
    }
    if files.is_empty() {
        return Err(ProbeError::file("loader.discover", "no workflow files found"));
    }

    let base_dir = files[0]
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut workflow: Option<Workflow> = None;
    for file in &files {
        debug!(file = %file.display(), "loading workflow file");
        let text = std::fs::read_to_string(file).map_err(|error| {
            ProbeError::file("loader.read", "cannot read workflow file")
                .with_context("path", file.display().to_string())
                .with_source(error)
        })?;
        fold_documents(&mut workflow, &text, file)?;
    }

    let mut workflow = workflow.ok_or_else(|| ProbeError::file("loader.parse", "workflow files contain no documents"))?;

    validation::assign_job_ids(&mut workflow);
    validation::validate_workflow(&workflow).map_err(|message| ProbeError::validation("loader.validate", message))?;
    Ok((workflow, base_dir))
}

/// Parse workflow YAML text (possibly multi-document) into one workflow.
pub fn load_workflow_str(text: &str) -> Result<Workflow, ProbeError> {
    let mut workflow = None;
    fold_documents(&mut workflow, text, Path::new("<inline>"))?;
    let mut workflow = workflow.ok_or_else(|| ProbeError::file("loader.parse", "workflow text contains no documents"))?;
    validation::assign_job_ids(&mut workflow);
    validation::validate_workflow(&workflow).map_err(|message| ProbeError::validation("loader.validate", message))?;
    Ok(workflow)
}

fn fold_documents(workflow: &mut Option<Workflow>, text: &str, origin: &Path) -> Result<(), ProbeError> {
    for document in serde_yaml::Deserializer::from_str(text) {
        let doc = WorkflowDoc::deserialize(document).map_err(|error| {
            ProbeError::file("loader.parse", "cannot decode workflow document")
                .with_context("path", origin.display().to_string())
                .with_source(error)
        })?;

        match workflow {
            None => {
                let name = doc.name.ok_or_else(|| {
                    ProbeError::validation("loader.parse", "first workflow document must declare a name")
                        .with_context("path", origin.display().to_string())
                })?;
                *workflow = Some(Workflow {
                    name,
                    description: doc.description,
                    vars: doc.vars,
                    jobs: doc.jobs,
                });
            }
            Some(existing) => {
                for (key, value) in doc.vars {
                    existing.vars.insert(key, value);
                }
                existing.jobs.extend(doc.jobs);
            }
        }
    }
    Ok(())
}

/// Load an embedded job file, trying the documented resolution order:
/// absolute as-is, then relative to the workflow directory, then to its
/// parent, then to the current working directory.
pub fn load_embedded_job(base_dir: &Path, path: &str) -> Result<Job, ProbeError> {
    let resolved = resolve_embedded_path(base_dir, path)?;
    let text = std::fs::read_to_string(&resolved).map_err(|error| {
        ProbeError::file("loader.embedded", "cannot read embedded job file")
            .with_context("path", resolved.display().to_string())
            .with_source(error)
    })?;
    serde_yaml::from_str(&text).map_err(|error| {
        ProbeError::file("loader.embedded", "cannot decode embedded job file")
            .with_context("path", resolved.display().to_string())
            .with_source(error)
    })
}

fn resolve_embedded_path(base_dir: &Path, path: &str) -> Result<PathBuf, ProbeError> {
    let raw = Path::new(path);
    if raw.is_absolute() {
        return Ok(raw.to_path_buf());
    }

    let candidates = [
        base_dir.join(raw),
        base_dir.parent().map(|parent| parent.join(raw)).unwrap_or_else(|| raw.to_path_buf()),
        raw.to_path_buf(),
    ];
    for candidate in &candidates {
        if candidate.is_file() {
            return Ok(candidate.clone());
        }
    }
    Err(ProbeError::file("loader.embedded", "embedded job file not found")
        .with_context("path", path)
        .with_context("base_dir", base_dir.display().to_string()))
}

fn discover(path: &Path) -> Result<Vec<PathBuf>, ProbeError> {
    if path.is_dir() {
        return scan_dir(path, |name| name.ends_with(".yml") || name.ends_with(".yaml"));
    }

    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    if file_name.contains('*') {
        let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let (prefix, suffix) = file_name.split_once('*').unwrap_or((file_name, ""));
        let prefix = prefix.to_string();
        let suffix = suffix.to_string();
        return scan_dir(parent, move |name| name.starts_with(&prefix) && name.ends_with(&suffix));
    }

    if !path.is_file() {
        return Err(ProbeError::file("loader.discover", "workflow file not found")
            .with_context("path", path.display().to_string()));
    }
    Ok(vec![path.to_path_buf()])
}

fn scan_dir(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>, ProbeError> {
    let entries = std::fs::read_dir(dir).map_err(|error| {
        ProbeError::file("loader.discover", "cannot read directory")
            .with_context("path", dir.display().to_string())
            .with_source(error)
    })?;

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|error| {
            ProbeError::file("loader.discover", "cannot read directory entry")
                .with_context("path", dir.display().to_string())
                .with_source(error)
        })?;
        let entry_path = entry.path();
        let name = entry_path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if entry_path.is_file() && keep(name) {
            found.push(entry_path);
        }
    }
    found.sort();
    Ok(found)
}
