//! Object loader / scanner (C7).
//!
//! Walks the planning tree and parses every stored object. Tolerates a
//! partially broken tree: a file that fails to parse is skipped rather
//! than aborting the whole scan (spec §4.7). Tree walking uses `walkdir`,
//! bounded to the four well-known file names so stray Markdown dropped
//! into the tree by hand is ignored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::codec::{self, ObjectFile};
use crate::model::Kind;

/// A loaded object together with the path it was read from.
#[derive(Debug, Clone)]
pub struct LoadedObject {
    pub file: ObjectFile,
    pub path: PathBuf,
}

fn is_object_file(path: &Path) -> bool {
    match path.file_name().and_then(|n| n.to_str()) {
        Some("project.md") | Some("epic.md") | Some("feature.md") => true,
        Some(name) if name.ends_with(".md") => {
            let in_tasks_dir = path
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .map(|n| n == "tasks-open" || n == "tasks-done")
                .unwrap_or(false);
            in_tasks_dir && is_task_filename(name)
        }
        _ => false,
    }
}

fn is_task_filename(name: &str) -> bool {
    let stem = name.trim_end_matches(".md");
    stem.to_ascii_uppercase().starts_with("T-") || stem.contains("-T-")
}

/// Walks `scanning_root`, parsing every recognized object file. Files
/// that fail to parse are silently skipped — `get_all_objects` must
/// tolerate a partially broken tree.
pub fn scan_all(scanning_root: &Path) -> Vec<LoadedObject> {
    let mut objects = Vec::new();
    for entry in WalkDir::new(scanning_root).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !is_object_file(path) {
            continue;
        }
        if let Ok(file) = codec::read(path) {
            objects.push(LoadedObject {
                file,
                path: path.to_path_buf(),
            });
        } else {
            tracing::warn!(target: "trellis::loader", path = %path.display(), "skipping unparseable object file");
        }
    }
    objects
}

/// `get_all_objects`: maps every stored object's clean id to its header,
/// for graph construction and kind/id lookups.
pub fn get_all_objects(scanning_root: &Path) -> BTreeMap<String, crate::model::ObjectHeader> {
    scan_all(scanning_root)
        .into_iter()
        .map(|obj| (obj.file.header.clean_id(), obj.file.header))
        .collect()
}

/// Every task (hierarchical and standalone), loaded from disk.
pub fn scan_tasks(scanning_root: &Path) -> Vec<LoadedObject> {
    scan_all(scanning_root)
        .into_iter()
        .filter(|o| o.file.header.kind == Kind::Task)
        .collect()
}
