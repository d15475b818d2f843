//! Kind inference (C10).
//!
//! `infer_kind` checks the id's prefix first; when absent, it probes the
//! filesystem for a unique match across the four kinds.

use std::path::Path;

use crate::errors::{ErrorCode, TrellisError};
use crate::id;
use crate::model::Kind;
use crate::path as resolver;

/// Infers the kind of `raw_id`, consulting the filesystem when the id
/// carries no recognizable prefix. `resolution_root` is the path-
/// resolution root (see [`crate::id::resolve_planning_roots`]).
pub fn infer_kind(raw_id: &str, resolution_root: &Path) -> Result<Kind, TrellisError> {
    if let Some(kind) = kind_from_prefix(raw_id) {
        return Ok(kind);
    }

    let clean_id = id::clean_prereq_fully(raw_id);
    let mut candidates = Vec::new();

    if resolver::find_project_dir(resolution_root, &clean_id).is_some() {
        candidates.push(Kind::Project);
    }
    if resolver::find_epic_dir(resolution_root, &clean_id).is_some() {
        candidates.push(Kind::Epic);
    }
    if resolver::find_feature_dir(resolution_root, &clean_id).is_some() {
        candidates.push(Kind::Feature);
    }
    if resolver::find_task_path(resolution_root, &clean_id).is_some() {
        candidates.push(Kind::Task);
    }

    match candidates.len() {
        1 => Ok(candidates[0]),
        0 => Err(TrellisError::new(
            ErrorCode::InvalidField,
            format!("could not infer kind for id '{raw_id}': no matching object found"),
        )
        .with_id(clean_id)),
        _ => {
            let names: Vec<&str> = candidates.iter().map(Kind::as_str).collect();
            Err(TrellisError::new(
                ErrorCode::InvalidField,
                format!(
                    "ambiguous id '{raw_id}': matches multiple kinds: {}",
                    names.join(", ")
                ),
            )
            .with_id(clean_id))
        }
    }
}

fn kind_from_prefix(raw_id: &str) -> Option<Kind> {
    let lowered = raw_id.to_ascii_lowercase();
    if lowered.starts_with("p-") {
        Some(Kind::Project)
    } else if lowered.starts_with("e-") {
        Some(Kind::Epic)
    } else if lowered.starts_with("f-") {
        Some(Kind::Feature)
    } else if lowered.starts_with("t-") {
        Some(Kind::Task)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn infers_from_prefix_without_touching_disk() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(infer_kind("T-anything", tmp.path()).unwrap(), Kind::Task);
        assert_eq!(infer_kind("p-anything", tmp.path()).unwrap(), Kind::Project);
    }

    #[test]
    fn infers_from_filesystem_when_prefix_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let open_dir = tmp.path().join("tasks-open");
        fs::create_dir_all(&open_dir).unwrap();
        fs::write(open_dir.join("T-bare.md"), "x").unwrap();

        assert_eq!(infer_kind("bare", tmp.path()).unwrap(), Kind::Task);
    }

    #[test]
    fn fails_when_no_candidate_matches() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(infer_kind("nonexistent", tmp.path()).is_err());
    }
}
