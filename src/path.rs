//! Path resolver (C5).
//!
//! Maps `(kind, id, parent?, status?)` to a filesystem path and back, and
//! enumerates a parent's immediate children. For features and hierarchical
//! tasks the caller's `parent` is only a hint: the resolver locates the
//! parent's own file first, so it learns the enclosing project/epic
//! directories rather than trusting a possibly-stale chain.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use walkdir::WalkDir;

use crate::errors::{ErrorCode, TrellisError};
use crate::id;
use crate::model::Kind;

/// An immediate child as returned by directory listings (spec §4.5).
#[derive(Debug, Clone)]
pub struct ChildEntry {
    pub id: String,
    pub title: String,
    pub status: String,
    pub kind: Kind,
    pub created: chrono::DateTime<Local>,
    pub file_path: PathBuf,
}

fn project_dir(resolution_root: &Path, clean_id: &str) -> PathBuf {
    resolution_root.join("projects").join(format!("P-{clean_id}"))
}

fn epic_dir(project_dir: &Path, clean_id: &str) -> PathBuf {
    project_dir.join("epics").join(format!("E-{clean_id}"))
}

fn feature_dir(epic_dir: &Path, clean_id: &str) -> PathBuf {
    epic_dir.join("features").join(format!("F-{clean_id}"))
}

/// Builds the path for a project by id.
pub fn project_path(resolution_root: &Path, clean_id: &str) -> PathBuf {
    project_dir(resolution_root, clean_id).join("project.md")
}

/// Builds the path for an epic given its (already resolved) project dir.
pub fn epic_path(project_dir: &Path, clean_id: &str) -> PathBuf {
    epic_dir(project_dir, clean_id).join("epic.md")
}

/// Builds the path for a feature given its (already resolved) epic dir.
pub fn feature_path(epic_dir: &Path, clean_id: &str) -> PathBuf {
    feature_dir(epic_dir, clean_id).join("feature.md")
}

/// Builds the open-task path under a feature dir, or under the standalone
/// root when `feature_dir` is `None`.
pub fn task_open_path(tasks_root: &Path, clean_id: &str) -> PathBuf {
    tasks_root.join("tasks-open").join(format!("T-{clean_id}.md"))
}

/// Builds the done-task path with a `YYYYMMDD_HHMMSS-` local-time prefix
/// (spec §3.4, §9 open question: local time, not UTC, preserved for
/// compatibility with the reference implementation).
pub fn task_done_path(tasks_root: &Path, clean_id: &str) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    tasks_root.join("tasks-done").join(format!("{stamp}-T-{clean_id}.md"))
}

/// Finds an existing project's directory by id, or `None`.
pub fn find_project_dir(resolution_root: &Path, clean_id: &str) -> Option<PathBuf> {
    let dir = project_dir(resolution_root, clean_id);
    if dir.join("project.md").is_file() {
        Some(dir)
    } else {
        None
    }
}

/// Searches the whole tree for an epic's directory by id, since the
/// enclosing project isn't known up front.
pub fn find_epic_dir(resolution_root: &Path, clean_id: &str) -> Option<PathBuf> {
    let projects_dir = resolution_root.join("projects");
    if !projects_dir.is_dir() {
        return None;
    }
    for entry in WalkDir::new(&projects_dir).min_depth(0).max_depth(10) {
        let entry = entry.ok()?;
        if entry.file_name() == "epic.md" {
            let dir = entry.path().parent()?.to_path_buf();
            if dir.file_name().and_then(|n| n.to_str()) == Some(&format!("E-{clean_id}")) {
                return Some(dir);
            }
        }
    }
    None
}

/// Searches the whole tree for a feature's directory by id.
pub fn find_feature_dir(resolution_root: &Path, clean_id: &str) -> Option<PathBuf> {
    let projects_dir = resolution_root.join("projects");
    if !projects_dir.is_dir() {
        return None;
    }
    for entry in WalkDir::new(&projects_dir).min_depth(0).max_depth(10) {
        let entry = entry.ok()?;
        if entry.file_name() == "feature.md" {
            let dir = entry.path().parent()?.to_path_buf();
            if dir.file_name().and_then(|n| n.to_str()) == Some(&format!("F-{clean_id}")) {
                return Some(dir);
            }
        }
    }
    None
}

/// Locates a task file by id, searching both hierarchical and standalone
/// storage, in either `tasks-open` or `tasks-done`.
pub fn find_task_path(resolution_root: &Path, clean_id: &str) -> Option<PathBuf> {
    let open_name = format!("T-{clean_id}.md");
    let standalone_open = resolution_root.join("tasks-open").join(&open_name);
    if standalone_open.is_file() {
        return Some(standalone_open);
    }
    if let Some(path) = find_done_task(&resolution_root.join("tasks-done"), clean_id) {
        return Some(path);
    }

    let projects_dir = resolution_root.join("projects");
    if !projects_dir.is_dir() {
        return None;
    }
    for entry in WalkDir::new(&projects_dir).min_depth(0).max_depth(20) {
        let entry = entry.ok()?;
        let path = entry.path();
        if !entry.file_type().is_dir() {
            continue;
        }
        if path.file_name().and_then(|n| n.to_str()) == Some("tasks-open") {
            let candidate = path.join(&open_name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        if path.file_name().and_then(|n| n.to_str()) == Some("tasks-done") {
            if let Some(found) = find_done_task(path, clean_id) {
                return Some(found);
            }
        }
    }
    None
}

fn find_done_task(tasks_done_dir: &Path, clean_id: &str) -> Option<PathBuf> {
    if !tasks_done_dir.is_dir() {
        return None;
    }
    let suffix = format!("-T-{clean_id}.md");
    fs::read_dir(tasks_done_dir).ok()?.flatten().find_map(|entry| {
        let name = entry.file_name();
        let name = name.to_str()?;
        if name.ends_with(&suffix) {
            Some(entry.path())
        } else {
            None
        }
    })
}

/// Given any stored object path, recovers `(kind, clean_id)` (spec §8,
/// path↔id bijection law).
pub fn path_to_id(path: &Path) -> Result<(Kind, String), TrellisError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TrellisError::new(ErrorCode::InvalidField, "path has no file name"))?;

    match file_name {
        "project.md" => {
            let dir_name = dir_name_of(path)?;
            let clean = id::clean_prereq(strip_kind_dir(dir_name, "P-")?);
            Ok((Kind::Project, clean))
        }
        "epic.md" => {
            let dir_name = dir_name_of(path)?;
            let clean = id::clean_prereq(strip_kind_dir(dir_name, "E-")?);
            Ok((Kind::Epic, clean))
        }
        "feature.md" => {
            let dir_name = dir_name_of(path)?;
            let clean = id::clean_prereq(strip_kind_dir(dir_name, "F-")?);
            Ok((Kind::Feature, clean))
        }
        name if name.ends_with(".md") => {
            let stem = name.trim_end_matches(".md");
            let task_part = stem
                .rsplit_once("-T-")
                .map(|(_, rest)| format!("T-{rest}"))
                .unwrap_or_else(|| stem.to_string());
            if !task_part.to_ascii_uppercase().starts_with("T-") {
                return Err(TrellisError::new(ErrorCode::InvalidField, "not a recognized object file"));
            }
            Ok((Kind::Task, id::clean_prereq(&task_part)))
        }
        _ => Err(TrellisError::new(ErrorCode::InvalidField, "not a recognized object file")),
    }
}

fn dir_name_of(path: &Path) -> Result<&str, TrellisError> {
    path.parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .ok_or_else(|| TrellisError::new(ErrorCode::InvalidField, "path has no parent directory"))
}

fn strip_kind_dir<'a>(dir_name: &'a str, prefix: &str) -> Result<&'a str, TrellisError> {
    dir_name
        .strip_prefix(prefix)
        .ok_or_else(|| TrellisError::new(ErrorCode::InvalidField, "directory does not match expected kind prefix"))
}

/// Lists the immediate children of a container file (spec §4.5): epics
/// under a project, features under an epic, tasks under a feature.
/// Sorted by `created` ascending. Tasks have no children.
pub fn list_children(header_kind: Kind, container_dir: &Path) -> Vec<ChildEntry> {
    let mut children = Vec::new();
    match header_kind {
        Kind::Project => collect_glob_children(&container_dir.join("epics"), "epic.md", Kind::Epic, &mut children),
        Kind::Epic => {
            collect_glob_children(&container_dir.join("features"), "feature.md", Kind::Feature, &mut children)
        }
        Kind::Feature => {
            collect_task_children(&container_dir.join("tasks-open"), &mut children);
            collect_task_children(&container_dir.join("tasks-done"), &mut children);
        }
        Kind::Task => {}
    }
    children.sort_by(|a, b| a.created.cmp(&b.created));
    children
}

fn collect_glob_children(parent_dir: &Path, file_name: &str, kind: Kind, out: &mut Vec<ChildEntry>) {
    let Ok(entries) = fs::read_dir(parent_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let file_path = entry.path().join(file_name);
        if let Some(child) = load_child_entry(&file_path, kind) {
            out.push(child);
        }
    }
}

fn collect_task_children(tasks_dir: &Path, out: &mut Vec<ChildEntry>) {
    let Ok(entries) = fs::read_dir(tasks_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        if let Some(child) = load_child_entry(&path, Kind::Task) {
            out.push(child);
        }
    }
}

fn load_child_entry(path: &Path, kind: Kind) -> Option<ChildEntry> {
    let text = fs::read_to_string(path).ok()?;
    let file = crate::codec::parse(&text).ok()?;
    Some(ChildEntry {
        id: file.header.clean_id(),
        title: file.header.title,
        status: file.header.status.as_str().to_string(),
        kind,
        created: file.header.created,
        file_path: path.to_path_buf(),
    })
}

/// Recovers the clean project/epic/feature ids a task path is nested
/// under, from the directory structure alone (spec §3.5 layout). Used by
/// the claim scheduler's scope filter, since a task's own `parent` field
/// only names its immediate feature.
pub fn scope_chain(path: &Path) -> (Option<String>, Option<String>, Option<String>) {
    let mut project = None;
    let mut epic = None;
    let mut feature = None;
    for component in path.components() {
        let Some(name) = component.as_os_str().to_str() else {
            continue;
        };
        if let Some(rest) = name.strip_prefix("P-") {
            project = Some(rest.to_string());
        } else if let Some(rest) = name.strip_prefix("E-") {
            epic = Some(rest.to_string());
        } else if let Some(rest) = name.strip_prefix("F-") {
            feature = Some(rest.to_string());
        }
    }
    (project, epic, feature)
}

/// Given an object's own file path, returns the path of the object whose
/// children-listing includes it (the cache key used by [`crate::cache`]):
/// an epic's enclosing project.md, a feature's enclosing epic.md, a
/// hierarchical task's enclosing feature.md. Standalone tasks and
/// projects have no enclosing object and return `None`.
pub fn enclosing_object_path(object_path: &Path) -> Option<PathBuf> {
    let parent_dir = object_path.parent()?;
    match object_path.file_name()?.to_str()? {
        "epic.md" => {
            let epics_dir = parent_dir.parent()?;
            let project_dir = epics_dir.parent()?;
            Some(project_dir.join("project.md"))
        }
        "feature.md" => {
            let features_dir = parent_dir.parent()?;
            let epic_dir = features_dir.parent()?;
            Some(epic_dir.join("epic.md"))
        }
        name if name.ends_with(".md") => {
            let tasks_dir_name = parent_dir.file_name()?.to_str()?;
            if tasks_dir_name != "tasks-open" && tasks_dir_name != "tasks-done" {
                return None;
            }
            let feature_dir = parent_dir.parent()?;
            let feature_md = feature_dir.join("feature.md");
            feature_md.is_file().then_some(feature_md)
        }
        _ => None,
    }
}

/// Enumerates every descendant object file under `container_dir` in
/// stable sorted order (used by cascade delete, spec §4.9).
pub fn list_descendants(container_dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(container_dir)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let name = e.file_name().to_str().unwrap_or("");
            matches!(name, "project.md" | "epic.md" | "feature.md") || name.ends_with(".md")
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    paths.sort();
    paths
}
