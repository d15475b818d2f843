//! Tool handlers (C12).
//!
//! Surfaces the seven operations in spec §6.2. Each handler validates
//! its parameters, resolves the planning root, runs security checks,
//! performs loads/writes through the codec/path resolver, invokes the
//! relevant policy module, invalidates the children cache as needed, and
//! returns a plain result struct — no handler holds state across calls
//! beyond the [`Engine`] it is called on (the children cache and the
//! resolved root).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::cache::ChildrenCache;
use crate::codec::{self, ObjectFile};
use crate::errors::{ErrorCode, TrellisError};
use crate::graph::{self, DependencyGraph, RollbackSnapshot};
use crate::id;
use crate::inference;
use crate::lifecycle;
use crate::loader;
use crate::model::{self, Kind, ObjectHeader, PatchValue, Priority, Status, CURRENT_SCHEMA_VERSION};
use crate::path as resolver;
use crate::scheduler::{self, ClaimParams};
use crate::security;

/// Runtime context a tool call is invoked against: the resolved planning
/// root and the injected children cache (spec §9: "global singleton →
/// injected dependency", so tests can construct independent engines).
pub struct Engine {
    pub scanning_root: PathBuf,
    pub resolution_root: PathBuf,
    pub cache: ChildrenCache,
    pub auto_create_dirs: bool,
}

impl Engine {
    pub fn new(project_root: &Path) -> Self {
        Self::with_cache(project_root, ChildrenCache::default())
    }

    pub fn with_cache(project_root: &Path, cache: ChildrenCache) -> Self {
        let roots = id::resolve_planning_roots(project_root);
        Self {
            scanning_root: roots.scanning_root,
            resolution_root: roots.resolution_root,
            cache,
            auto_create_dirs: true,
        }
    }

    fn ensure_dirs(&self) -> Result<(), TrellisError> {
        if !self.auto_create_dirs {
            return Ok(());
        }
        fs::create_dir_all(self.resolution_root.join("projects")).map_err(TrellisError::from)?;
        fs::create_dir_all(self.resolution_root.join("tasks-open")).map_err(TrellisError::from)?;
        fs::create_dir_all(self.resolution_root.join("tasks-done")).map_err(TrellisError::from)?;
        Ok(())
    }

    fn locate_object_path(&self, kind: Kind, clean_id: &str) -> Result<PathBuf, TrellisError> {
        let found = match kind {
            Kind::Project => resolver::find_project_dir(&self.resolution_root, clean_id).map(|d| d.join("project.md")),
            Kind::Epic => resolver::find_epic_dir(&self.resolution_root, clean_id).map(|d| d.join("epic.md")),
            Kind::Feature => resolver::find_feature_dir(&self.resolution_root, clean_id).map(|d| d.join("feature.md")),
            Kind::Task => resolver::find_task_path(&self.resolution_root, clean_id),
        };
        let path = found.ok_or_else(|| {
            TrellisError::new(ErrorCode::InvalidField, format!("no {kind} found for id '{clean_id}'"))
                .with_id(clean_id.to_string())
                .with_kind(kind.as_str())
        })?;
        security::check_symlink_escape(&path, &self.scanning_root)?;
        Ok(path)
    }

    fn invalidate_for(&self, object_path: &Path) {
        if let Some(cache_key) = resolver::enclosing_object_path(object_path) {
            self.cache.invalidate(&cache_key);
        }
    }

    // ------------------------------------------------------------------
    // createObject
    // ------------------------------------------------------------------

    pub fn create_object(&self, params: CreateParams) -> Result<CreateResult, TrellisError> {
        self.ensure_dirs()?;

        if params.title.trim().is_empty() {
            return Err(TrellisError::new(ErrorCode::MissingRequiredField, "title"));
        }
        if let Some(raw_id) = &params.id {
            security::validate_id(raw_id, "id")?;
        }
        if let Some(raw_parent) = &params.parent {
            security::validate_id(raw_parent, "parent")?;
            security::check_suspicious_parent(raw_parent)?;
        }

        let (base_clean_id, generated) = match &params.id {
            Some(raw) => (id::normalize(raw, params.kind), false),
            None => (id::normalize(&params.title, params.kind), true),
        };
        if base_clean_id.is_empty() {
            return Err(TrellisError::new(ErrorCode::InvalidField, "could not derive a valid id"));
        }

        let clean_parent = params.parent.as_deref().map(id::clean_prereq_fully);
        let parent_dir = self.locate_parent_dir(params.kind, clean_parent.as_deref())?;
        let parent_exists = clean_parent.is_none() || parent_dir.is_some();

        let (clean_id, path) =
            self.resolve_create_path(params.kind, &base_clean_id, parent_dir.as_deref(), generated)?;
        security::check_symlink_escape(&path, &self.scanning_root)?;

        let status = parse_status_or_default(params.status.as_deref(), params.kind)?;
        let priority = parse_priority_or_default(params.priority.as_deref())?;
        let prerequisites = params.prerequisites.unwrap_or_default();

        let parent_field = clean_parent.as_ref().map(|p| match params.kind {
            Kind::Epic => format!("P-{p}"),
            Kind::Feature => format!("E-{p}"),
            Kind::Task => format!("F-{p}"),
            Kind::Project => p.clone(),
        });

        let now = Local::now();
        let header = ObjectHeader {
            kind: params.kind,
            id: format!("{}{}", params.kind.prefix(), clean_id),
            parent: parent_field,
            status,
            title: params.title.clone(),
            priority,
            prerequisites,
            worktree: None,
            created: now,
            updated: now,
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
        };
        model::validate_header(&header, parent_exists)?;

        let body = format!("{}\n\n### Log\n\n", params.description.unwrap_or_default().trim_end());

        let existing = loader::get_all_objects(&self.scanning_root);
        let existing_graph = DependencyGraph::from_headers(existing.values());
        graph::check_no_cycle(&existing_graph, &clean_id, &header.prerequisites)?;

        let file = ObjectFile { header, body };
        codec::write(&path, &file)?;

        let after = loader::get_all_objects(&self.scanning_root);
        let graph_after = DependencyGraph::from_headers(after.values());
        if graph_after.find_cycle().is_some() {
            let _ = codec::remove_if_exists(&path);
            self.invalidate_for(&path);
            return Err(TrellisError::new(
                ErrorCode::CircularDependency,
                format!("circular dependency detected creating '{clean_id}'"),
            )
            .with_id(clean_id));
        }

        self.invalidate_for(&path);

        Ok(CreateResult {
            id: clean_id,
            kind: params.kind,
            title: file.header.title,
            status: file.header.status,
            file_path: path,
            created: file.header.created,
        })
    }

    fn locate_parent_dir(&self, kind: Kind, clean_parent: Option<&str>) -> Result<Option<PathBuf>, TrellisError> {
        match (kind, clean_parent) {
            (Kind::Project, Some(_)) => Err(TrellisError::new(ErrorCode::ParentInvalid, "project may not have a parent")),
            (Kind::Project, None) => Ok(None),
            (Kind::Epic, None) => Err(TrellisError::new(ErrorCode::ParentInvalid, "epic requires a parent project")),
            (Kind::Epic, Some(p)) => Ok(resolver::find_project_dir(&self.resolution_root, p)),
            (Kind::Feature, None) => Err(TrellisError::new(ErrorCode::ParentInvalid, "feature requires a parent epic")),
            (Kind::Feature, Some(p)) => Ok(resolver::find_epic_dir(&self.resolution_root, p)),
            (Kind::Task, None) => Ok(None),
            (Kind::Task, Some(p)) => Ok(resolver::find_feature_dir(&self.resolution_root, p)),
        }
    }

    fn resolve_create_path(
        &self,
        kind: Kind,
        base_clean_id: &str,
        parent_dir: Option<&Path>,
        generated: bool,
    ) -> Result<(String, PathBuf), TrellisError> {
        let build_path = |clean_id: &str| -> PathBuf {
            match kind {
                Kind::Project => resolver::project_path(&self.resolution_root, clean_id),
                Kind::Epic => resolver::epic_path(parent_dir.unwrap_or(&self.resolution_root), clean_id),
                Kind::Feature => resolver::feature_path(parent_dir.unwrap_or(&self.resolution_root), clean_id),
                Kind::Task => {
                    resolver::task_open_path(parent_dir.unwrap_or(&self.resolution_root), clean_id)
                }
            }
        };

        if !generated {
            let path = build_path(base_clean_id);
            if path.exists() || (kind == Kind::Task && resolver::find_task_path(&self.resolution_root, base_clean_id).is_some()) {
                return Err(
                    TrellisError::new(ErrorCode::InvalidField, format!("id '{base_clean_id}' already exists"))
                        .with_id(base_clean_id.to_string()),
                );
            }
            return Ok((base_clean_id.to_string(), path));
        }

        let path = build_path(base_clean_id);
        let exists = path.exists()
            || (kind == Kind::Task && resolver::find_task_path(&self.resolution_root, base_clean_id).is_some());
        if !exists {
            return Ok((base_clean_id.to_string(), path));
        }
        for suffix in 1..10_000 {
            let candidate_id = format!("{base_clean_id}-{suffix}");
            let candidate_path = build_path(&candidate_id);
            let taken = candidate_path.exists()
                || (kind == Kind::Task && resolver::find_task_path(&self.resolution_root, &candidate_id).is_some());
            if !taken {
                return Ok((candidate_id, candidate_path));
            }
        }
        Err(TrellisError::new(ErrorCode::InvalidField, "could not generate a unique id"))
    }

    // ------------------------------------------------------------------
    // getObject
    // ------------------------------------------------------------------

    pub fn get_object(&self, raw_id: &str) -> Result<GetResult, TrellisError> {
        security::validate_id(raw_id, "id")?;
        let kind = inference::infer_kind(raw_id, &self.resolution_root)?;
        let clean_id = id::normalize(raw_id, kind);
        let path = self.locate_object_path(kind, &clean_id)?;
        let file = codec::read(&path)?;

        let yaml = serde_yaml_ng::to_string(&file.header)
            .map_err(|e| TrellisError::new(ErrorCode::InvalidField, format!("failed to serialize header: {e}")))?;

        let container_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let path_for_cache = path.clone();
        let children = self
            .cache
            .get_or_scan(&path_for_cache, || resolver::list_children(file.header.kind, container_dir))
            .into_iter()
            .map(|c| ChildSummary {
                id: c.id,
                title: c.title,
                status: c.status,
                kind: c.kind,
                created: c.created,
            })
            .collect();

        Ok(GetResult {
            yaml,
            body: file.body,
            kind,
            id: clean_id,
            children,
        })
    }

    // ------------------------------------------------------------------
    // updateObject
    // ------------------------------------------------------------------

    pub fn update_object(&self, params: UpdateParams) -> Result<UpdateResult, TrellisError> {
        if params.yaml_patch.is_none() && params.body_patch.is_none() {
            return Err(TrellisError::new(
                ErrorCode::MissingRequiredField,
                "at least one of yamlPatch or bodyPatch is required",
            ));
        }
        security::validate_id(&params.id, "id")?;
        let kind = inference::infer_kind(&params.id, &self.resolution_root)?;
        let clean_id = id::normalize(&params.id, kind);
        let path = self.locate_object_path(kind, &clean_id)?;
        let original = codec::read(&path)?;

        if let Some(patch) = &params.yaml_patch {
            security::reject_privileged_fields(patch.keys().map(String::as_str))?;
            if let Some(PatchValue::String(parent_val)) = patch.get("parent") {
                security::check_suspicious_parent(parent_val)?;
            }
            if kind == Kind::Task {
                if let Some(PatchValue::String(status_val)) = patch.get("status") {
                    if status_val == "done" {
                        return Err(TrellisError::new(
                            ErrorCode::InvalidStatusTransition,
                            "updateObject may not set a task's status to done; use completeTask",
                        ));
                    }
                }
            }
        }

        let wants_delete = params
            .yaml_patch
            .as_ref()
            .and_then(|p| p.get("status"))
            .map(|v| matches!(v, PatchValue::String(s) if s == lifecycle::DELETE_SENTINEL))
            .unwrap_or(false);
        if wants_delete {
            return self.cascade_delete(kind, &clean_id, &path, params.force);
        }

        let mut map = model::header_to_patch_map(&original.header)?;
        if let Some(patch) = params.yaml_patch.clone() {
            model::deep_merge(&mut map, patch);
        }
        map.insert("updated".to_string(), PatchValue::String(Local::now().to_rfc3339()));
        let new_header = model::patch_map_to_header(map)?;

        let parent_exists = self.parent_still_exists(kind, new_header.parent.as_deref());
        model::validate_header(&new_header, parent_exists)?;

        if new_header.status != original.header.status {
            lifecycle::validate_transition(kind, original.header.status, new_header.status)?;
        }

        let new_body = params.body_patch.clone().unwrap_or_else(|| original.body.clone());
        let new_file = ObjectFile {
            header: new_header.clone(),
            body: new_body,
        };

        let existing = loader::get_all_objects(&self.scanning_root);
        let existing_graph = DependencyGraph::from_headers(existing.values());
        graph::check_no_cycle(&existing_graph, &clean_id, &new_file.header.prerequisites)?;

        let snapshot = RollbackSnapshot::Updated {
            path: path.clone(),
            previous: original.clone(),
        };
        codec::write(&path, &new_file)?;

        let after = loader::get_all_objects(&self.scanning_root);
        let graph_after = DependencyGraph::from_headers(after.values());
        if graph_after.find_cycle().is_some() {
            snapshot.rollback();
            self.invalidate_for(&path);
            return Err(TrellisError::new(
                ErrorCode::CircularDependency,
                format!("circular dependency detected updating '{clean_id}'; rolled back"),
            )
            .with_id(clean_id));
        }

        self.invalidate_for(&path);

        let changes = compute_changed_fields(params.yaml_patch.as_ref(), params.body_patch.is_some());
        Ok(UpdateResult {
            id: clean_id,
            kind,
            updated: new_header.updated,
            changes,
        })
    }

    fn parent_still_exists(&self, kind: Kind, parent: Option<&str>) -> bool {
        let Some(parent) = parent else {
            return true;
        };
        let clean_parent = id::clean_prereq_fully(parent);
        match kind {
            Kind::Project => false,
            Kind::Epic => resolver::find_project_dir(&self.resolution_root, &clean_parent).is_some(),
            Kind::Feature => resolver::find_epic_dir(&self.resolution_root, &clean_parent).is_some(),
            Kind::Task => resolver::find_feature_dir(&self.resolution_root, &clean_parent).is_some(),
        }
    }

    fn cascade_delete(
        &self,
        kind: Kind,
        clean_id: &str,
        path: &Path,
        force: bool,
    ) -> Result<UpdateResult, TrellisError> {
        if kind == Kind::Task {
            return Err(TrellisError::new(ErrorCode::InvalidField, "tasks cannot be cascade-deleted"));
        }
        let container_dir = path
            .parent()
            .ok_or_else(|| TrellisError::new(ErrorCode::CascadeError, "object has no containing directory"))?;
        security::check_symlink_escape(container_dir, &self.scanning_root)?;

        let descendants = resolver::list_descendants(container_dir);
        if !force {
            for descendant_path in &descendants {
                if let Ok(file) = codec::read(descendant_path) {
                    if file.header.kind == Kind::Task
                        && matches!(file.header.status, Status::InProgress | Status::Review)
                    {
                        return Err(TrellisError::new(
                            ErrorCode::ProtectedObject,
                            format!(
                                "cannot delete '{clean_id}': descendant task '{}' is {}",
                                file.header.clean_id(),
                                file.header.status
                            ),
                        )
                        .with_id(clean_id.to_string()));
                    }
                }
            }
        }

        fs::remove_dir_all(container_dir)
            .map_err(|e| TrellisError::new(ErrorCode::CascadeError, format!("failed to remove '{clean_id}': {e}")).with_id(clean_id.to_string()))?;

        self.invalidate_for(path);

        Ok(UpdateResult {
            id: clean_id.to_string(),
            kind,
            updated: Local::now(),
            changes: vec!["status".to_string()],
        })
    }

    // ------------------------------------------------------------------
    // listBacklog
    // ------------------------------------------------------------------

    pub fn list_backlog(&self, params: ListParams) -> Result<Vec<TaskSummary>, TrellisError> {
        if let Some(scope) = &params.scope {
            scheduler::validate_scope(scope)?;
        }
        let status_filter = params.status.as_deref().map(parse_status_strict).transpose()?;
        let priority_filter = params.priority.as_deref().map(parse_priority_strict).transpose()?;

        let mut tasks: Vec<TaskSummary> = loader::scan_tasks(&self.scanning_root)
            .into_iter()
            .filter(|t| scheduler::task_in_scope(t, params.scope.as_deref()))
            .filter(|t| status_filter.map(|s| t.file.header.status == s).unwrap_or(true))
            .filter(|t| priority_filter.map(|p| t.file.header.priority == p).unwrap_or(true))
            .map(|t| TaskSummary {
                id: t.file.header.clean_id(),
                title: t.file.header.title,
                status: t.file.header.status,
                priority: t.file.header.priority,
                parent: t.file.header.parent,
                file_path: t.path,
                created: t.file.header.created,
                updated: t.file.header.updated,
            })
            .collect();

        if params.sort_by_priority {
            tasks.sort_by(|a, b| a.priority.rank().cmp(&b.priority.rank()).then_with(|| a.created.cmp(&b.created)));
        }

        Ok(tasks)
    }

    // ------------------------------------------------------------------
    // claimNextTask
    // ------------------------------------------------------------------

    pub fn claim_next_task(&self, params: ClaimParams) -> Result<ClaimTaskResult, TrellisError> {
        let result = scheduler::claim_next(&self.scanning_root, &self.cache, params)?;
        Ok(ClaimTaskResult {
            task: result.file.header,
            file_path: result.path,
        })
    }

    // ------------------------------------------------------------------
    // completeTask
    // ------------------------------------------------------------------

    pub fn complete_task(&self, params: CompleteParams) -> Result<CompleteResult, TrellisError> {
        security::validate_id(&params.task_id, "taskId")?;
        let clean_id = id::normalize(&params.task_id, Kind::Task);
        let path = resolver::find_task_path(&self.resolution_root, &clean_id)
            .ok_or_else(|| TrellisError::new(ErrorCode::InvalidField, format!("task '{clean_id}' not found")).with_id(clean_id.clone()))?;
        security::check_symlink_escape(&path, &self.scanning_root)?;

        let mut file = codec::read(&path)?;
        if !lifecycle::can_complete(file.header.status) {
            return Err(TrellisError::new(
                ErrorCode::InvalidStatusTransition,
                format!(
                    "completeTask requires status in-progress or review (was '{}')",
                    file.header.status
                ),
            )
            .with_id(clean_id));
        }

        file.body = append_log_entry(&file.body, params.summary.as_deref(), params.files_changed.as_deref());
        file.header.status = Status::Done;
        file.header.updated = Local::now();

        let tasks_root = path
            .parent()
            .and_then(Path::parent)
            .ok_or_else(|| TrellisError::new(ErrorCode::CascadeError, "task has no containing tasks directory"))?;
        let new_path = resolver::task_done_path(tasks_root, &clean_id);

        codec::write(&new_path, &file)?;
        codec::remove_if_exists(&path)?;

        self.invalidate_for(&path);
        self.invalidate_for(&new_path);

        Ok(CompleteResult {
            task: file.header,
            validation_status: "done".to_string(),
            file_path: new_path,
        })
    }

    // ------------------------------------------------------------------
    // getNextReviewableTask
    // ------------------------------------------------------------------

    pub fn get_next_reviewable_task(&self) -> Result<Option<ObjectHeader>, TrellisError> {
        let mut review_tasks: Vec<_> = loader::scan_tasks(&self.scanning_root)
            .into_iter()
            .filter(|t| t.file.header.status == Status::Review)
            .collect();

        review_tasks.sort_by(|a, b| {
            a.file
                .header
                .updated
                .cmp(&b.file.header.updated)
                .then_with(|| a.file.header.priority.rank().cmp(&b.file.header.priority.rank()))
        });

        Ok(review_tasks.into_iter().next().map(|t| t.file.header))
    }
}

fn append_log_entry(body: &str, summary: Option<&str>, files_changed: Option<&[String]>) -> String {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    let mut entry = format!("\n- {timestamp}: {}\n", summary.unwrap_or("(no summary provided)"));
    if let Some(files) = files_changed {
        if !files.is_empty() {
            entry.push_str("  Files changed:\n");
            for f in files {
                entry.push_str(&format!("  - {f}\n"));
            }
        }
    }

    match body.find("### Log") {
        Some(idx) => {
            let after_heading = idx + "### Log".len();
            let (head, tail) = body.split_at(after_heading);
            format!("{head}{entry}{tail}")
        }
        None => format!("{}\n### Log\n{entry}", body.trim_end()),
    }
}

fn compute_changed_fields(yaml_patch: Option<&BTreeMap<String, PatchValue>>, body_changed: bool) -> Vec<String> {
    let mut changes: Vec<String> = yaml_patch.map(|p| p.keys().cloned().collect()).unwrap_or_default();
    if body_changed {
        changes.push("body".to_string());
    }
    changes
}

fn parse_status_or_default(raw: Option<&str>, kind: Kind) -> Result<Status, TrellisError> {
    match raw {
        None => Ok(kind.default_status()),
        Some(s) => s.parse::<Status>().map_err(|_| invalid_status_error(s, kind)),
    }
}

fn parse_status_strict(raw: &str) -> Result<Status, TrellisError> {
    raw.parse::<Status>()
        .map_err(|_| TrellisError::new(ErrorCode::InvalidField, format!("Invalid status '{raw}'")))
}

fn invalid_status_error(raw: &str, kind: Kind) -> TrellisError {
    let allowed: Vec<&str> = kind.allowed_statuses().iter().map(Status::as_str).collect();
    TrellisError::new(
        ErrorCode::InvalidField,
        format!("Invalid status '{raw}' for {kind}. Must be one of: {}", allowed.join(", ")),
    )
}

fn parse_priority_or_default(raw: Option<&str>) -> Result<Priority, TrellisError> {
    match raw {
        None => Ok(Priority::default()),
        Some(s) => s.parse::<Priority>().map_err(|_| {
            TrellisError::new(
                ErrorCode::InvalidField,
                format!("Invalid priority '{s}'. Must be one of: high, normal, low"),
            )
        }),
    }
}

fn parse_priority_strict(raw: &str) -> Result<Priority, TrellisError> {
    raw.parse::<Priority>()
        .map_err(|_| TrellisError::new(ErrorCode::InvalidField, format!("Invalid priority '{raw}'")))
}

// ----------------------------------------------------------------------
// Request / response shapes (spec §6.2, §9: "explicit request structs
// per tool").
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CreateParams {
    pub kind: Kind,
    pub title: String,
    pub id: Option<String>,
    pub parent: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub prerequisites: Option<Vec<String>>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateResult {
    pub id: String,
    pub kind: Kind,
    pub title: String,
    pub status: Status,
    pub file_path: PathBuf,
    pub created: DateTime<Local>,
}

#[derive(Debug, Clone)]
pub struct ChildSummary {
    pub id: String,
    pub title: String,
    pub status: String,
    pub kind: Kind,
    pub created: DateTime<Local>,
}

#[derive(Debug, Clone)]
pub struct GetResult {
    pub yaml: String,
    pub body: String,
    pub kind: Kind,
    pub id: String,
    pub children: Vec<ChildSummary>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateParams {
    pub id: String,
    pub yaml_patch: Option<BTreeMap<String, PatchValue>>,
    pub body_patch: Option<String>,
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct UpdateResult {
    pub id: String,
    pub kind: Kind,
    pub updated: DateTime<Local>,
    pub changes: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub scope: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub sort_by_priority: bool,
}

#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub id: String,
    pub title: String,
    pub status: Status,
    pub priority: Priority,
    pub parent: Option<String>,
    pub file_path: PathBuf,
    pub created: DateTime<Local>,
    pub updated: DateTime<Local>,
}

#[derive(Debug, Clone)]
pub struct ClaimTaskResult {
    pub task: ObjectHeader,
    pub file_path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct CompleteParams {
    pub task_id: String,
    pub summary: Option<String>,
    pub files_changed: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct CompleteResult {
    pub task: ObjectHeader,
    pub validation_status: String,
    pub file_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(tmp: &std::path::Path) -> Engine {
        Engine::new(tmp)
    }

    #[test]
    fn create_project_then_epic_then_feature_then_task() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());

        let project = engine
            .create_object(CreateParams {
                kind: Kind::Project,
                title: "Web Platform".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(project.id, "web-platform");

        let epic = engine
            .create_object(CreateParams {
                kind: Kind::Epic,
                title: "Users".to_string(),
                parent: Some(project.id.clone()),
                ..Default::default()
            })
            .unwrap();

        let feature = engine
            .create_object(CreateParams {
                kind: Kind::Feature,
                title: "Login".to_string(),
                parent: Some(epic.id.clone()),
                ..Default::default()
            })
            .unwrap();

        let task = engine
            .create_object(CreateParams {
                kind: Kind::Task,
                title: "Implement auth".to_string(),
                parent: Some(feature.id.clone()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(task.status, Status::Open);
        assert!(task.file_path.to_string_lossy().contains("tasks-open"));
    }

    #[test]
    fn create_fails_when_parent_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let err = engine
            .create_object(CreateParams {
                kind: Kind::Epic,
                title: "Orphan".to_string(),
                parent: Some("nonexistent".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ParentNotExist);
    }

    #[test]
    fn duplicate_generated_id_gets_numeric_suffix() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let first = engine
            .create_object(CreateParams {
                kind: Kind::Project,
                title: "Docs".to_string(),
                ..Default::default()
            })
            .unwrap();
        let second = engine
            .create_object(CreateParams {
                kind: Kind::Project,
                title: "Docs".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(first.id, "docs");
        assert_eq!(second.id, "docs-1");
    }

    #[test]
    fn get_object_returns_children() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let project = engine
            .create_object(CreateParams {
                kind: Kind::Project,
                title: "Web".to_string(),
                ..Default::default()
            })
            .unwrap();
        engine
            .create_object(CreateParams {
                kind: Kind::Epic,
                title: "Users".to_string(),
                parent: Some(project.id.clone()),
                ..Default::default()
            })
            .unwrap();

        let got = engine.get_object(&project.id).unwrap();
        assert_eq!(got.children.len(), 1);
        assert_eq!(got.children[0].kind, Kind::Epic);
    }

    #[test]
    fn update_preserves_body_when_only_header_touched() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let project = engine
            .create_object(CreateParams {
                kind: Kind::Project,
                title: "Web".to_string(),
                description: Some("Initial description".to_string()),
                ..Default::default()
            })
            .unwrap();

        let before = engine.get_object(&project.id).unwrap();

        let mut patch = BTreeMap::new();
        patch.insert("title".to_string(), PatchValue::String("Web Renamed".to_string()));
        engine
            .update_object(UpdateParams {
                id: project.id.clone(),
                yaml_patch: Some(patch),
                body_patch: None,
                force: false,
            })
            .unwrap();

        let after = engine.get_object(&project.id).unwrap();
        assert_eq!(after.body, before.body);
        assert!(after.yaml.contains("Web Renamed"));
    }

    #[test]
    fn update_cannot_set_task_status_to_done_directly() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let task = engine
            .create_object(CreateParams {
                kind: Kind::Task,
                title: "Standalone".to_string(),
                ..Default::default()
            })
            .unwrap();

        let mut patch = BTreeMap::new();
        patch.insert("status".to_string(), PatchValue::String("done".to_string()));
        let err = engine
            .update_object(UpdateParams {
                id: task.id,
                yaml_patch: Some(patch),
                body_patch: None,
                force: false,
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidStatusTransition);
    }

    #[test]
    fn cross_system_cycle_is_rejected_and_rolled_back() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let project = engine
            .create_object(CreateParams {
                kind: Kind::Project,
                title: "Web".to_string(),
                ..Default::default()
            })
            .unwrap();
        let epic = engine
            .create_object(CreateParams {
                kind: Kind::Epic,
                title: "Users".to_string(),
                parent: Some(project.id.clone()),
                ..Default::default()
            })
            .unwrap();
        let feature = engine
            .create_object(CreateParams {
                kind: Kind::Feature,
                title: "Login".to_string(),
                parent: Some(epic.id.clone()),
                ..Default::default()
            })
            .unwrap();
        let hier = engine
            .create_object(CreateParams {
                kind: Kind::Task,
                title: "T A".to_string(),
                parent: Some(feature.id.clone()),
                ..Default::default()
            })
            .unwrap();
        let _standalone = engine
            .create_object(CreateParams {
                kind: Kind::Task,
                title: "T B".to_string(),
                prerequisites: Some(vec![hier.id.clone()]),
                ..Default::default()
            })
            .unwrap();

        let mut patch = BTreeMap::new();
        patch.insert(
            "prerequisites".to_string(),
            PatchValue::List(vec![PatchValue::String("t-b".to_string())]),
        );
        let err = engine
            .update_object(UpdateParams {
                id: hier.id.clone(),
                yaml_patch: Some(patch),
                body_patch: None,
                force: false,
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CircularDependency);

        let after = engine.get_object(&hier.id).unwrap();
        assert!(after.yaml.contains("prerequisites: []"));
    }

    #[test]
    fn cascade_delete_blocked_then_forced() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let project = engine
            .create_object(CreateParams {
                kind: Kind::Project,
                title: "Web".to_string(),
                ..Default::default()
            })
            .unwrap();
        let epic = engine
            .create_object(CreateParams {
                kind: Kind::Epic,
                title: "Users".to_string(),
                parent: Some(project.id.clone()),
                ..Default::default()
            })
            .unwrap();
        let feature = engine
            .create_object(CreateParams {
                kind: Kind::Feature,
                title: "Login".to_string(),
                parent: Some(epic.id.clone()),
                ..Default::default()
            })
            .unwrap();
        let task = engine
            .create_object(CreateParams {
                kind: Kind::Task,
                title: "Do it".to_string(),
                parent: Some(feature.id.clone()),
                ..Default::default()
            })
            .unwrap();

        // move task to review
        let mut patch = BTreeMap::new();
        patch.insert("status".to_string(), PatchValue::String("in-progress".to_string()));
        engine
            .update_object(UpdateParams {
                id: task.id.clone(),
                yaml_patch: Some(patch),
                body_patch: None,
                force: false,
            })
            .unwrap();
        let mut patch = BTreeMap::new();
        patch.insert("status".to_string(), PatchValue::String("review".to_string()));
        engine
            .update_object(UpdateParams {
                id: task.id.clone(),
                yaml_patch: Some(patch),
                body_patch: None,
                force: false,
            })
            .unwrap();

        let mut delete_patch = BTreeMap::new();
        delete_patch.insert("status".to_string(), PatchValue::String("deleted".to_string()));
        let err = engine
            .update_object(UpdateParams {
                id: feature.id.clone(),
                yaml_patch: Some(delete_patch.clone()),
                body_patch: None,
                force: false,
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ProtectedObject);

        engine
            .update_object(UpdateParams {
                id: feature.id,
                yaml_patch: Some(delete_patch),
                body_patch: None,
                force: true,
            })
            .unwrap();

        assert!(engine.get_object(&task.id).is_err());
    }

    #[test]
    fn complete_task_moves_file_to_tasks_done() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let task = engine
            .create_object(CreateParams {
                kind: Kind::Task,
                title: "Ship it".to_string(),
                ..Default::default()
            })
            .unwrap();

        let mut patch = BTreeMap::new();
        patch.insert("status".to_string(), PatchValue::String("in-progress".to_string()));
        engine
            .update_object(UpdateParams {
                id: task.id.clone(),
                yaml_patch: Some(patch),
                body_patch: None,
                force: false,
            })
            .unwrap();

        let result = engine
            .complete_task(CompleteParams {
                task_id: task.id.clone(),
                summary: Some("done".to_string()),
                files_changed: Some(vec!["src/lib.rs".to_string()]),
            })
            .unwrap();

        assert_eq!(result.task.status, Status::Done);
        assert!(result.file_path.to_string_lossy().contains("tasks-done"));
        assert!(!result.file_path.to_string_lossy().contains("tasks-open"));
    }

    #[test]
    fn get_next_reviewable_task_sorts_by_updated_then_priority() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let a = engine
            .create_object(CreateParams {
                kind: Kind::Task,
                title: "A".to_string(),
                ..Default::default()
            })
            .unwrap();
        let b = engine
            .create_object(CreateParams {
                kind: Kind::Task,
                title: "B".to_string(),
                ..Default::default()
            })
            .unwrap();

        for id in [&a.id, &b.id] {
            let mut patch = BTreeMap::new();
            patch.insert("status".to_string(), PatchValue::String("in-progress".to_string()));
            engine
                .update_object(UpdateParams {
                    id: id.clone(),
                    yaml_patch: Some(patch),
                    body_patch: None,
                    force: false,
                })
                .unwrap();
            let mut patch = BTreeMap::new();
            patch.insert("status".to_string(), PatchValue::String("review".to_string()));
            engine
                .update_object(UpdateParams {
                    id: id.clone(),
                    yaml_patch: Some(patch),
                    body_patch: None,
                    force: false,
                })
                .unwrap();
        }

        let next = engine.get_next_reviewable_task().unwrap();
        assert!(next.is_some());
    }
}
