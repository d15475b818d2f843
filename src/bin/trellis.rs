//! `trellis` CLI: delegates to `trellis_core` through the same tool
//! contracts a remote caller would use (spec §6.3). Two subcommands:
//! `init` scaffolds a planning root on disk, `serve` stands up a small
//! local HTTP façade over the seven tool operations.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use trellis_core::config::Settings;
use trellis_core::handlers::{ClaimTaskResult, CompleteParams, CreateParams, Engine, ListParams, UpdateParams};
use trellis_core::model::{Kind, ObjectHeader};

#[derive(Parser)]
#[command(name = "trellis", about = "File-backed project-management engine for developer agents")]
struct Cli {
    /// Path to a TOML settings file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the configured log level.
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Force verbose (debug) logging, overriding settings.
    #[arg(long, global = true, overrides_with = "no_debug")]
    debug: bool,
    #[arg(long, global = true, hide = true)]
    no_debug: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scaffold `planning/projects`, `planning/tasks-open`, and
    /// `planning/tasks-done` under `path` (default: current directory).
    Init {
        path: Option<PathBuf>,
    },
    /// Serve the seven tool operations over a local HTTP endpoint.
    Serve {
        /// `HOST:PORT` to bind, overriding settings.
        #[arg(long)]
        http: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut settings = match Settings::load(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };
    if let Some(level) = &cli.log_level {
        settings.log_level = level.clone();
    }
    if cli.debug {
        settings.debug_mode = true;
    }
    init_tracing(&settings);

    match cli.command {
        Command::Init { path } => run_init(path.unwrap_or_else(|| PathBuf::from("."))),
        Command::Serve { http } => run_serve(settings, http),
    }
}

fn init_tracing(settings: &Settings) {
    let default_filter = if settings.debug_mode { "debug" } else { settings.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn run_init(path: PathBuf) -> ExitCode {
    let planning_root = if path.file_name().map(|n| n == "planning").unwrap_or(false) {
        path
    } else {
        path.join("planning")
    };

    for dir in ["projects", "tasks-open", "tasks-done"] {
        if let Err(e) = std::fs::create_dir_all(planning_root.join(dir)) {
            eprintln!("failed to create '{}': {e}", planning_root.join(dir).display());
            return ExitCode::from(2);
        }
    }
    println!("initialized planning root at {}", planning_root.display());
    ExitCode::SUCCESS
}

fn run_serve(settings: Settings, http_override: Option<String>) -> ExitCode {
    let bind = http_override.unwrap_or_else(|| format!("{}:{}", settings.host, settings.port));
    let addr: SocketAddr = match bind.parse() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("invalid --http address '{bind}': {e}");
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::from(2);
        }
    };

    let engine = Arc::new(Engine::new(&settings.planning_root));
    let app = build_router(engine);

    runtime.block_on(async move {
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("failed to bind {addr}: {e}");
                return ExitCode::from(2);
            }
        };
        tracing::info!(%addr, "trellis serve listening");
        match axum::serve(listener, app).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("server error: {e}");
                ExitCode::from(2)
            }
        }
    })
}

fn build_router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/tools/createObject", post(create_object))
        .route("/tools/getObject", post(get_object))
        .route("/tools/updateObject", post(update_object))
        .route("/tools/listBacklog", post(list_backlog))
        .route("/tools/claimNextTask", post(claim_next_task))
        .route("/tools/completeTask", post(complete_task))
        .route("/tools/getNextReviewableTask", post(get_next_reviewable_task))
        .with_state(engine)
}

fn header_json(header: &ObjectHeader) -> Value {
    json!({
        "kind": header.kind.as_str(),
        "id": header.id,
        "parent": header.parent,
        "status": header.status.as_str(),
        "title": header.title,
        "priority": header.priority.as_str(),
        "prerequisites": header.prerequisites,
        "worktree": header.worktree,
        "created": header.created.to_rfc3339(),
        "updated": header.updated.to_rfc3339(),
        "schema_version": header.schema_version,
    })
}

fn error_response(err: trellis_core::errors::TrellisError) -> Json<Value> {
    Json(json!({
        "error": {
            "code": err.code.as_str(),
            "message": err.message,
            "object_id": err.object_id,
            "object_kind": err.object_kind,
        }
    }))
}

#[derive(serde::Deserialize)]
struct CreateRequest {
    kind: String,
    title: String,
    #[serde(rename = "projectRoot")]
    project_root: Option<String>,
    id: Option<String>,
    parent: Option<String>,
    status: Option<String>,
    priority: Option<String>,
    prerequisites: Option<Vec<String>>,
    description: Option<String>,
}

async fn create_object(State(engine): State<Arc<Engine>>, Json(req): Json<CreateRequest>) -> Json<Value> {
    let kind = match req.kind.parse::<Kind>() {
        Ok(k) => k,
        Err(()) => {
            return Json(json!({"error": {"code": "INVALID_FIELD", "message": format!("Invalid kind '{}'", req.kind)}}));
        }
    };
    let _ = req.project_root;
    match engine.create_object(CreateParams {
        kind,
        title: req.title,
        id: req.id,
        parent: req.parent,
        status: req.status,
        priority: req.priority,
        prerequisites: req.prerequisites,
        description: req.description,
    }) {
        Ok(r) => Json(json!({
            "id": r.id,
            "kind": r.kind.as_str(),
            "title": r.title,
            "status": r.status.as_str(),
            "file_path": r.file_path.display().to_string(),
            "created": r.created.to_rfc3339(),
        })),
        Err(e) => error_response(e),
    }
}

#[derive(serde::Deserialize)]
struct GetRequest {
    id: String,
}

async fn get_object(State(engine): State<Arc<Engine>>, Json(req): Json<GetRequest>) -> Json<Value> {
    match engine.get_object(&req.id) {
        Ok(r) => Json(json!({
            "yaml": r.yaml,
            "body": r.body,
            "kind": r.kind.as_str(),
            "id": r.id,
            "children": r.children.iter().map(|c| json!({
                "id": c.id,
                "title": c.title,
                "status": c.status,
                "kind": c.kind.as_str(),
                "created": c.created.to_rfc3339(),
            })).collect::<Vec<_>>(),
        })),
        Err(e) => error_response(e),
    }
}

#[derive(serde::Deserialize)]
struct UpdateRequest {
    id: String,
    #[serde(rename = "yamlPatch")]
    yaml_patch: Option<std::collections::BTreeMap<String, trellis_core::model::PatchValue>>,
    #[serde(rename = "bodyPatch")]
    body_patch: Option<String>,
    #[serde(default)]
    force: bool,
}

async fn update_object(State(engine): State<Arc<Engine>>, Json(req): Json<UpdateRequest>) -> Json<Value> {
    match engine.update_object(UpdateParams {
        id: req.id,
        yaml_patch: req.yaml_patch,
        body_patch: req.body_patch,
        force: req.force,
    }) {
        Ok(r) => Json(json!({
            "id": r.id,
            "kind": r.kind.as_str(),
            "updated": r.updated.to_rfc3339(),
            "changes": r.changes,
        })),
        Err(e) => error_response(e),
    }
}

#[derive(serde::Deserialize, Default)]
struct ListRequest {
    scope: Option<String>,
    status: Option<String>,
    priority: Option<String>,
    #[serde(rename = "sortByPriority", default = "default_true")]
    sort_by_priority: bool,
}

fn default_true() -> bool {
    true
}

async fn list_backlog(State(engine): State<Arc<Engine>>, Json(req): Json<ListRequest>) -> Json<Value> {
    match engine.list_backlog(ListParams {
        scope: req.scope,
        status: req.status,
        priority: req.priority,
        sort_by_priority: req.sort_by_priority,
    }) {
        Ok(tasks) => Json(json!({
            "tasks": tasks.iter().map(|t| json!({
                "id": t.id,
                "title": t.title,
                "status": t.status.as_str(),
                "priority": t.priority.as_str(),
                "parent": t.parent,
                "file_path": t.file_path.display().to_string(),
                "created": t.created.to_rfc3339(),
                "updated": t.updated.to_rfc3339(),
            })).collect::<Vec<_>>(),
        })),
        Err(e) => error_response(e),
    }
}

#[derive(serde::Deserialize, Default)]
struct ClaimRequest {
    worktree: Option<String>,
    scope: Option<String>,
    #[serde(rename = "taskId")]
    task_id: Option<String>,
    #[serde(default)]
    force: bool,
}

async fn claim_next_task(State(engine): State<Arc<Engine>>, Json(req): Json<ClaimRequest>) -> Json<Value> {
    match engine.claim_next_task(trellis_core::scheduler::ClaimParams {
        worktree: req.worktree,
        scope: req.scope,
        task_id: req.task_id,
        force: req.force,
    }) {
        Ok(ClaimTaskResult { task, file_path }) => Json(json!({
            "task": header_json(&task),
            "claimed_status": task.status.as_str(),
            "worktree": task.worktree,
            "file_path": file_path.display().to_string(),
        })),
        Err(e) => error_response(e),
    }
}

#[derive(serde::Deserialize)]
struct CompleteRequest {
    #[serde(rename = "taskId")]
    task_id: String,
    summary: Option<String>,
    #[serde(rename = "filesChanged")]
    files_changed: Option<Vec<String>>,
}

async fn complete_task(State(engine): State<Arc<Engine>>, Json(req): Json<CompleteRequest>) -> Json<Value> {
    match engine.complete_task(CompleteParams {
        task_id: req.task_id,
        summary: req.summary,
        files_changed: req.files_changed,
    }) {
        Ok(r) => Json(json!({
            "task": header_json(&r.task),
            "validation_status": r.validation_status,
            "file_path": r.file_path.display().to_string(),
        })),
        Err(e) => error_response(e),
    }
}

async fn get_next_reviewable_task(State(engine): State<Arc<Engine>>) -> Json<Value> {
    match engine.get_next_reviewable_task() {
        Ok(Some(header)) => Json(json!({ "task": header_json(&header) })),
        Ok(None) => Json(json!({ "task": Value::Null })),
        Err(e) => error_response(e),
    }
}
