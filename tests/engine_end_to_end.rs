//! End-to-end scenarios over [`trellis_core::handlers::Engine`], each
//! driving the on-disk planning tree through a sequence of public
//! operations rather than poking at internals directly.

use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use trellis_core::errors::ErrorCode;
use trellis_core::handlers::{CompleteParams, CreateParams, Engine, ListParams, UpdateParams};
use trellis_core::model::{Kind, PatchValue, Status};
use trellis_core::scheduler::ClaimParams;

fn new_engine() -> (tempfile::TempDir, Engine) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let engine = Engine::new(tmp.path());
    (tmp, engine)
}

fn set_status(engine: &Engine, id: &str, status: &str) {
    let mut patch = BTreeMap::new();
    patch.insert("status".to_string(), PatchValue::String(status.to_string()));
    engine
        .update_object(UpdateParams {
            id: id.to_string(),
            yaml_patch: Some(patch),
            body_patch: None,
            force: false,
        })
        .expect("status update should succeed");
}

/// `listBacklog` with `sortByPriority` orders high before normal before
/// low, and within a priority tier by creation order.
#[test]
fn list_backlog_orders_by_priority_then_creation() {
    let (_tmp, engine) = new_engine();

    let low = engine
        .create_object(CreateParams {
            kind: Kind::Task,
            title: "Clean up docs".to_string(),
            priority: Some("low".to_string()),
            ..Default::default()
        })
        .expect("create low task");
    let high = engine
        .create_object(CreateParams {
            kind: Kind::Task,
            title: "Fix outage".to_string(),
            priority: Some("high".to_string()),
            ..Default::default()
        })
        .expect("create high task");
    let normal_first = engine
        .create_object(CreateParams {
            kind: Kind::Task,
            title: "Normal first".to_string(),
            ..Default::default()
        })
        .expect("create normal task 1");
    let normal_second = engine
        .create_object(CreateParams {
            kind: Kind::Task,
            title: "Normal second".to_string(),
            ..Default::default()
        })
        .expect("create normal task 2");

    let backlog = engine
        .list_backlog(ListParams {
            sort_by_priority: true,
            ..Default::default()
        })
        .expect("list_backlog should succeed");

    let ids: Vec<&str> = backlog.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![high.id.as_str(), normal_first.id.as_str(), normal_second.id.as_str(), low.id.as_str()],
        "expected high priority first, then normal tasks in creation order, then low"
    );
}

/// Creating a standalone task whose prerequisite depends back on it,
/// via `updateObject`, must be rejected and leave the original file
/// untouched (spec §4.7, §9 rollback).
#[test]
fn circular_prerequisite_across_hierarchy_and_standalone_is_rejected() {
    let (_tmp, engine) = new_engine();

    let project = engine
        .create_object(CreateParams {
            kind: Kind::Project,
            title: "Web Platform".to_string(),
            ..Default::default()
        })
        .expect("create project");
    let epic = engine
        .create_object(CreateParams {
            kind: Kind::Epic,
            title: "Accounts".to_string(),
            parent: Some(project.id.clone()),
            ..Default::default()
        })
        .expect("create epic");
    let feature = engine
        .create_object(CreateParams {
            kind: Kind::Feature,
            title: "Signup".to_string(),
            parent: Some(epic.id.clone()),
            ..Default::default()
        })
        .expect("create feature");
    let hierarchical_task = engine
        .create_object(CreateParams {
            kind: Kind::Task,
            title: "Build signup form".to_string(),
            parent: Some(feature.id.clone()),
            ..Default::default()
        })
        .expect("create hierarchical task");
    let standalone_task = engine
        .create_object(CreateParams {
            kind: Kind::Task,
            title: "Ad hoc cleanup".to_string(),
            prerequisites: Some(vec![hierarchical_task.id.clone()]),
            ..Default::default()
        })
        .expect("create standalone task depending on hierarchical task");

    let mut patch = BTreeMap::new();
    patch.insert(
        "prerequisites".to_string(),
        PatchValue::List(vec![PatchValue::String(standalone_task.id.clone())]),
    );
    let err = engine
        .update_object(UpdateParams {
            id: hierarchical_task.id.clone(),
            yaml_patch: Some(patch),
            body_patch: None,
            force: false,
        })
        .expect_err("a cross-hierarchy cycle must be rejected");
    assert_eq!(err.code, ErrorCode::CircularDependency);

    let reloaded = engine.get_object(&hierarchical_task.id).expect("reload hierarchical task");
    assert!(
        reloaded.yaml.contains("prerequisites: []"),
        "rejected update must roll back, leaving prerequisites untouched"
    );
}

/// Force-claiming a specific task bypasses the open-status and
/// prerequisites-done checks, but a claim without `force` on a task
/// that is already in progress is rejected.
#[test]
fn force_claim_bypasses_prerequisites_and_status_checks() {
    let (_tmp, engine) = new_engine();

    let blocker = engine
        .create_object(CreateParams {
            kind: Kind::Task,
            title: "Blocking task".to_string(),
            ..Default::default()
        })
        .expect("create blocking task");
    let blocked = engine
        .create_object(CreateParams {
            kind: Kind::Task,
            title: "Blocked task".to_string(),
            prerequisites: Some(vec![blocker.id.clone()]),
            ..Default::default()
        })
        .expect("create blocked task");

    let without_force = engine
        .claim_next_task(ClaimParams {
            task_id: Some(blocked.id.clone()),
            ..Default::default()
        })
        .expect_err("claiming a task with incomplete prerequisites should fail without force");
    assert_eq!(without_force.code, ErrorCode::PrerequisitesIncomplete);

    let claimed = engine
        .claim_next_task(ClaimParams {
            task_id: Some(blocked.id.clone()),
            force: true,
            worktree: Some("wt-blocked".to_string()),
            ..Default::default()
        })
        .expect("force claim should bypass incomplete prerequisites");
    assert_eq!(claimed.task.status, Status::InProgress);
    assert_eq!(claimed.task.worktree.as_deref(), Some("wt-blocked"));

    let second_attempt = engine
        .claim_next_task(ClaimParams {
            task_id: Some(blocked.id.clone()),
            ..Default::default()
        })
        .expect_err("a non-forced claim on an in-progress task should fail");
    assert_eq!(second_attempt.code, ErrorCode::InvalidStatusTransition);
}

/// Soft-deleting (via `status: deleted`) a feature with an in-progress
/// descendant task is blocked unless `force` is set, and a forced
/// delete removes the whole subtree.
#[test]
fn cascade_delete_protects_active_descendants_unless_forced() {
    let (_tmp, engine) = new_engine();

    let project = engine
        .create_object(CreateParams {
            kind: Kind::Project,
            title: "Web Platform".to_string(),
            ..Default::default()
        })
        .expect("create project");
    let epic = engine
        .create_object(CreateParams {
            kind: Kind::Epic,
            title: "Accounts".to_string(),
            parent: Some(project.id.clone()),
            ..Default::default()
        })
        .expect("create epic");
    let feature = engine
        .create_object(CreateParams {
            kind: Kind::Feature,
            title: "Signup".to_string(),
            parent: Some(epic.id.clone()),
            ..Default::default()
        })
        .expect("create feature");
    let task = engine
        .create_object(CreateParams {
            kind: Kind::Task,
            title: "Build signup form".to_string(),
            parent: Some(feature.id.clone()),
            ..Default::default()
        })
        .expect("create task");

    set_status(&engine, &task.id, "in-progress");

    let mut delete_patch = BTreeMap::new();
    delete_patch.insert("status".to_string(), PatchValue::String("deleted".to_string()));
    let blocked = engine
        .update_object(UpdateParams {
            id: feature.id.clone(),
            yaml_patch: Some(delete_patch.clone()),
            body_patch: None,
            force: false,
        })
        .expect_err("deleting a feature with an in-progress task must be blocked");
    assert_eq!(blocked.code, ErrorCode::ProtectedObject);
    assert!(engine.get_object(&task.id).is_ok(), "blocked delete must not touch the subtree");

    engine
        .update_object(UpdateParams {
            id: feature.id.clone(),
            yaml_patch: Some(delete_patch),
            body_patch: None,
            force: true,
        })
        .expect("forced delete should succeed");

    assert!(engine.get_object(&feature.id).is_err(), "feature should no longer resolve after cascade delete");
    assert!(engine.get_object(&task.id).is_err(), "descendant task should be removed along with its feature");
}

/// An epic-scoped claim only sees hierarchical tasks nested under that
/// epic; a standalone task with no parent is invisible to it even
/// though a project-scoped claim would pick it up.
#[test]
fn epic_scope_excludes_standalone_tasks() {
    let (_tmp, engine) = new_engine();

    let project = engine
        .create_object(CreateParams {
            kind: Kind::Project,
            title: "Web Platform".to_string(),
            ..Default::default()
        })
        .expect("create project");
    let epic = engine
        .create_object(CreateParams {
            kind: Kind::Epic,
            title: "Accounts".to_string(),
            parent: Some(project.id.clone()),
            ..Default::default()
        })
        .expect("create epic");
    let feature = engine
        .create_object(CreateParams {
            kind: Kind::Feature,
            title: "Signup".to_string(),
            parent: Some(epic.id.clone()),
            ..Default::default()
        })
        .expect("create feature");
    let hierarchical_task = engine
        .create_object(CreateParams {
            kind: Kind::Task,
            title: "Hierarchical task".to_string(),
            parent: Some(feature.id.clone()),
            ..Default::default()
        })
        .expect("create hierarchical task");
    let _standalone_task = engine
        .create_object(CreateParams {
            kind: Kind::Task,
            title: "Standalone task".to_string(),
            ..Default::default()
        })
        .expect("create standalone task");

    let scope = format!("E-{}", epic.id);
    let claimed = engine
        .claim_next_task(ClaimParams {
            scope: Some(scope.clone()),
            ..Default::default()
        })
        .expect("epic-scoped claim should find the hierarchical task");
    assert_eq!(claimed.task.clean_id(), hierarchical_task.id);

    let exhausted = engine
        .claim_next_task(ClaimParams {
            scope: Some(scope),
            ..Default::default()
        })
        .expect_err("epic scope must not fall through to the standalone task");
    assert_eq!(exhausted.code, ErrorCode::NoAvailableTask);
}

/// Completing a task appends a log entry to its body, sets status to
/// `done`, and relocates the file from `tasks-open/` to `tasks-done/`;
/// it is then surfaced by neither `claimNextTask` nor `listBacklog`'s
/// open-status filter.
#[test]
fn complete_task_moves_file_and_records_log_entry() {
    let (_tmp, engine) = new_engine();

    let task = engine
        .create_object(CreateParams {
            kind: Kind::Task,
            title: "Ship the release".to_string(),
            ..Default::default()
        })
        .expect("create task");
    set_status(&engine, &task.id, "in-progress");

    let completed = engine
        .complete_task(CompleteParams {
            task_id: task.id.clone(),
            summary: Some("Shipped v1".to_string()),
            files_changed: Some(vec!["src/main.rs".to_string(), "CHANGELOG.md".to_string()]),
        })
        .expect("complete_task should succeed from in-progress");

    assert_eq!(completed.task.status, Status::Done);
    let path_str = completed.file_path.to_string_lossy();
    assert!(path_str.contains("tasks-done"), "completed task file must live under tasks-done/");
    assert!(!path_str.contains("tasks-open"), "completed task file must no longer live under tasks-open/");

    let reloaded = engine.get_object(&task.id).expect("reload completed task");
    assert!(reloaded.body.contains("Shipped v1"), "log entry summary should be appended to the body");
    assert!(reloaded.body.contains("src/main.rs"), "log entry should list changed files");

    let err = engine
        .claim_next_task(ClaimParams::default())
        .expect_err("no open task remains to claim");
    assert_eq!(err.code, ErrorCode::NoAvailableTask);

    let open_backlog = engine
        .list_backlog(ListParams {
            status: Some("open".to_string()),
            ..Default::default()
        })
        .expect("list_backlog filtered to open");
    assert!(open_backlog.is_empty(), "a done task must not appear in the open-status backlog filter");
}
