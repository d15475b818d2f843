//! Claim scheduler (C11).
//!
//! Exposes one operation, `claim_next`, implementing the parameter
//! rules, selection algorithm, and atomic claim effect in spec §4.11.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::cache::ChildrenCache;
use crate::codec::{self, ObjectFile};
use crate::errors::{ErrorCode, TrellisError};
use crate::graph::DependencyGraph;
use crate::id;
use crate::loader;
use crate::model::Status;
use crate::path;

static SCOPE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[PEF]-[A-Za-z0-9_-]+$").unwrap());

/// Parameters accepted by `claimNextTask` (spec §6.2).
#[derive(Debug, Default, Clone)]
pub struct ClaimParams {
    pub worktree: Option<String>,
    pub scope: Option<String>,
    pub task_id: Option<String>,
    pub force: bool,
}

/// The outcome of a successful claim.
#[derive(Debug, Clone)]
pub struct ClaimResult {
    pub file: ObjectFile,
    pub path: std::path::PathBuf,
}

/// Selects and claims the next task, or claims a specific one by id.
pub fn claim_next(
    scanning_root: &std::path::Path,
    cache: &ChildrenCache,
    params: ClaimParams,
) -> Result<ClaimResult, TrellisError> {
    validate_params(&params)?;

    let tasks = loader::scan_tasks(scanning_root);

    if let Some(raw_task_id) = &params.task_id {
        return claim_by_id(cache, tasks, raw_task_id, params.force, params.worktree.as_deref());
    }

    claim_best_in_scope(cache, tasks, params.scope.as_deref(), params.worktree.as_deref())
}

fn validate_params(params: &ClaimParams) -> Result<(), TrellisError> {
    if params.scope.is_some() && params.task_id.is_some() {
        return Err(TrellisError::new(
            ErrorCode::InvalidField,
            "scope and taskId are mutually exclusive",
        ));
    }
    if params.force && params.task_id.is_none() {
        return Err(TrellisError::new(
            ErrorCode::InvalidField,
            "force=true requires taskId",
        ));
    }
    if let Some(scope) = &params.scope {
        validate_scope(scope)?;
    }
    Ok(())
}

/// Validates a `scope` parameter against `^[PEF]-[A-Za-z0-9_-]+$` (spec
/// §4.11, §6.2). Shared with `listBacklog`'s scope filter.
pub fn validate_scope(scope: &str) -> Result<(), TrellisError> {
    if SCOPE_RE.is_match(scope) {
        Ok(())
    } else {
        Err(TrellisError::new(
            ErrorCode::InvalidField,
            format!("Invalid scope '{scope}': must match ^[PEF]-[A-Za-z0-9_-]+$"),
        ))
    }
}

fn claim_by_id(
    cache: &ChildrenCache,
    tasks: Vec<loader::LoadedObject>,
    raw_task_id: &str,
    force: bool,
    worktree: Option<&str>,
) -> Result<ClaimResult, TrellisError> {
    let clean_id = id::normalize(raw_task_id, crate::model::Kind::Task);
    if clean_id.is_empty() {
        return Err(TrellisError::new(
            ErrorCode::InvalidField,
            format!("invalid task id '{raw_task_id}'"),
        ));
    }

    let statuses = status_index(&tasks);
    let graph = DependencyGraph::from_headers(tasks.iter().map(|t| &t.file.header));

    let found = tasks
        .into_iter()
        .find(|t| t.file.header.clean_id() == clean_id)
        .ok_or_else(|| {
            TrellisError::new(ErrorCode::InvalidField, format!("task '{clean_id}' not found")).with_id(clean_id.clone())
        })?;

    if !force {
        if found.file.header.status != Status::Open {
            return Err(TrellisError::new(
                ErrorCode::InvalidStatusTransition,
                format!(
                    "task '{clean_id}' is not open (status: {})",
                    found.file.header.status
                ),
            )
            .with_id(clean_id));
        }
        if !graph.prerequisites_done(&statuses, &clean_id) {
            return Err(TrellisError::new(
                ErrorCode::PrerequisitesIncomplete,
                format!("task '{clean_id}' has incomplete prerequisites"),
            )
            .with_id(clean_id));
        }
    }

    apply_claim(cache, found, worktree)
}

fn claim_best_in_scope(
    cache: &ChildrenCache,
    tasks: Vec<loader::LoadedObject>,
    scope: Option<&str>,
    worktree: Option<&str>,
) -> Result<ClaimResult, TrellisError> {
    let statuses = status_index(&tasks);
    let graph = DependencyGraph::from_headers(tasks.iter().map(|t| &t.file.header));

    let scoped: Vec<loader::LoadedObject> = tasks
        .into_iter()
        .filter(|t| task_in_scope(t, scope))
        .filter(|t| t.file.header.status == Status::Open)
        .filter(|t| graph.prerequisites_done(&statuses, &t.file.header.clean_id()))
        .collect();

    let best = scoped
        .into_iter()
        .min_by(|a, b| {
            let rank_a = a.file.header.priority.rank();
            let rank_b = b.file.header.priority.rank();
            rank_a
                .cmp(&rank_b)
                .then_with(|| a.file.header.created.cmp(&b.file.header.created))
        })
        .ok_or_else(|| {
            let message = match scope {
                Some(s) => format!("no available task in scope '{s}'"),
                None => "no available task".to_string(),
            };
            TrellisError::new(ErrorCode::NoAvailableTask, message)
        })?;

    apply_claim(cache, best, worktree)
}

/// Whether `task` falls within `scope` (spec §4.11): a project scope
/// also admits every standalone task; epic/feature scopes admit only
/// hierarchical tasks nested under them.
pub fn task_in_scope(task: &loader::LoadedObject, scope: Option<&str>) -> bool {
    let Some(scope) = scope else {
        return true;
    };
    let standalone = task.file.header.parent.is_none();
    let (project, epic, feature) = path::scope_chain(&task.path);

    let Some(clean_scope) = scope.get(2..) else {
        return false;
    };
    match scope.as_bytes()[0] {
        b'P' => standalone || project.as_deref() == Some(clean_scope),
        b'E' => !standalone && epic.as_deref() == Some(clean_scope),
        b'F' => !standalone && feature.as_deref() == Some(clean_scope),
        _ => false,
    }
}

fn status_index(tasks: &[loader::LoadedObject]) -> HashMap<String, Status> {
    tasks
        .iter()
        .map(|t| (t.file.header.clean_id(), t.file.header.status))
        .collect()
}

fn apply_claim(
    cache: &ChildrenCache,
    mut found: loader::LoadedObject,
    worktree: Option<&str>,
) -> Result<ClaimResult, TrellisError> {
    let was_done = found.file.header.status == Status::Done;
    found.file.header.status = Status::InProgress;
    if let Some(w) = worktree {
        found.file.header.worktree = Some(w.to_string());
    }
    found.file.header.updated = chrono::Local::now();

    // A force-claim may reopen a `done` task (spec §4.11). Invariant 5
    // ("a task file lives in tasks-done/ iff its status is done") means
    // the file has to move back to tasks-open/, not just change status
    // in place.
    let target_path = if was_done {
        let tasks_root = found
            .path
            .parent()
            .and_then(std::path::Path::parent)
            .ok_or_else(|| TrellisError::new(ErrorCode::InvalidField, "task has no containing tasks directory"))?
            .to_path_buf();
        path::task_open_path(&tasks_root, &found.file.header.clean_id())
    } else {
        found.path.clone()
    };

    codec::write(&target_path, &found.file)?;
    if target_path != found.path {
        codec::remove_if_exists(&found.path)?;
    }

    if let Some(cache_key) = path::enclosing_object_path(&found.path) {
        cache.invalidate(&cache_key);
    }
    if let Some(cache_key) = path::enclosing_object_path(&target_path) {
        cache.invalidate(&cache_key);
    }

    Ok(ClaimResult {
        file: found.file,
        path: target_path,
    })
}
