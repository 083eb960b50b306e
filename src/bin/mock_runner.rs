//! Mock runner backend binary for integration testing
//!
//! Implements a minimal version of the backend control-plane so the
//! harness can be tested without the real backend: static projects
//! loaded from a YAML config directory, call-triggered pipelines whose
//! shell steps actually execute, and per-run event channels delivered
//! over WebSocket as tagged JSON frames.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex, RwLock};

#[derive(Parser)]
#[command(name = "mock-runner", about = "Mock runner backend for harness tests")]
struct Args {
    /// Port to listen on
    #[arg(long)]
    port: u16,

    /// Configuration directory containing config.yaml
    #[arg(long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let projects = match load_config(&args.config) {
        Ok(projects) => projects,
        Err(message) => {
            eprintln!("mock-runner: {message}");
            std::process::exit(1);
        }
    };

    let state = Arc::new(AppState {
        config_dir: args.config,
        projects: RwLock::new(projects),
        channels: Mutex::new(HashMap::new()),
        runs: Mutex::new(Vec::new()),
        next_id: AtomicU64::new(1),
    });

    let app = Router::new()
        .route("/ping", get(ping))
        .route("/reload", post(reload))
        .route("/projects/list", get(list_projects))
        .route("/projects/pipelines/list", get(list_pipelines))
        .route("/projects/actions/list", get(list_actions))
        .route("/call", post(call))
        .route("/runs/list", get(list_runs))
        .route("/runs/logs", get(run_logs))
        .route("/ws/{client_id}", get(ws_client))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", args.port))
        .await
        .expect("failed to bind mock runner port");
    eprintln!("mock-runner listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.expect("server failed");
}

// === Configuration ===

#[derive(Debug, Deserialize)]
struct ConfigDocument {
    projects_store: ProjectsStore,
}

#[derive(Debug, Deserialize)]
struct ProjectsStore {
    #[serde(default)]
    projects: BTreeMap<String, ProjectEntry>,
}

#[derive(Debug, Deserialize)]
struct ProjectEntry {
    config: ProjectBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ProjectBody {
    #[serde(default)]
    pipelines: BTreeMap<String, PipelineBody>,
    #[serde(default)]
    actions: BTreeMap<String, Vec<ActionBody>>,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PipelineBody {
    #[serde(default)]
    jobs: BTreeMap<String, JobBody>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct JobBody {
    #[serde(default, rename = "do")]
    task: Option<String>,
    #[serde(default)]
    steps: Vec<StepBody>,
}

#[derive(Debug, Clone, Deserialize)]
struct StepBody {
    #[serde(default)]
    #[allow(dead_code)]
    name: Option<String>,
    run: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ActionBody {
    #[serde(default)]
    on: Option<String>,
    #[serde(default)]
    run_pipelines: Option<Vec<String>>,
}

fn load_config(dir: &Path) -> Result<BTreeMap<String, ProjectBody>, String> {
    let path = dir.join("config.yaml");
    let content = std::fs::read_to_string(&path)
        .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
    let document: ConfigDocument =
        serde_yaml::from_str(&content).map_err(|err| format!("invalid config: {err}"))?;
    Ok(document
        .projects_store
        .projects
        .into_iter()
        .map(|(id, entry)| (id, entry.config))
        .collect())
}

// === State ===

struct AppState {
    config_dir: PathBuf,
    projects: RwLock<BTreeMap<String, ProjectBody>>,
    /// run id / streaming session id -> event channel
    channels: Mutex<HashMap<String, Arc<RunChannel>>>,
    runs: Mutex<Vec<RunRecord>>,
    next_id: AtomicU64,
}

struct RunRecord {
    run_id: String,
    project: String,
    pipeline: String,
    status: Value,
}

/// Frame history plus live fan-out for one run or streaming session.
/// History snapshot and subscription happen under the same lock as
/// pushes, so a WebSocket client sees every frame exactly once.
struct RunChannel {
    inner: std::sync::Mutex<ChannelState>,
    live: broadcast::Sender<(String, bool)>,
}

struct ChannelState {
    history: Vec<String>,
    done: bool,
}

impl RunChannel {
    fn new() -> Arc<Self> {
        let (live, _) = broadcast::channel(256);
        Arc::new(Self {
            inner: std::sync::Mutex::new(ChannelState {
                history: Vec::new(),
                done: false,
            }),
            live,
        })
    }

    fn push(&self, frame: String, done: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.history.push(frame.clone());
        if done {
            inner.done = true;
        }
        let _ = self.live.send((frame, done));
    }

    fn snapshot(&self) -> (Vec<String>, bool) {
        let inner = self.inner.lock().unwrap();
        (inner.history.clone(), inner.done)
    }

    fn snapshot_and_subscribe(&self) -> (Vec<String>, bool, broadcast::Receiver<(String, bool)>) {
        let inner = self.inner.lock().unwrap();
        (inner.history.clone(), inner.done, self.live.subscribe())
    }
}

// === Frames ===

fn log_frame(pipeline: &str, job_id: &str, text: &str) -> String {
    json!({
        "Log": {
            "pipeline": pipeline,
            "job_id": job_id,
            "text": text,
            "timestamp": chrono::Utc::now(),
        }
    })
    .to_string()
}

fn status_frame(pipeline: &str, status: Value) -> String {
    json!({"Status": {"pipeline": pipeline, "status": status}}).to_string()
}

fn done_frame() -> String {
    json!({"Done": null}).to_string()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"message": message}))).into_response()
}

// === Handlers ===

async fn ping() -> &'static str {
    "pong"
}

async fn reload(State(state): State<Arc<AppState>>) -> Response {
    match load_config(&state.config_dir) {
        Ok(projects) => {
            *state.projects.write().await = projects;
            Json(json!({})).into_response()
        }
        Err(message) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &message),
    }
}

async fn list_projects(State(state): State<Arc<AppState>>) -> Response {
    let projects = state.projects.read().await;
    let list: Vec<Value> = projects
        .iter()
        .map(|(id, body)| {
            let mut entry = json!({"id": id});
            if let Some(params) = &body.params {
                entry["params"] = params.clone();
            }
            entry
        })
        .collect();
    Json(json!({"projects": list})).into_response()
}

#[derive(Deserialize)]
struct ProjectQuery {
    project_id: String,
}

async fn list_pipelines(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProjectQuery>,
) -> Response {
    let projects = state.projects.read().await;
    let Some(project) = projects.get(&query.project_id) else {
        return error_response(
            StatusCode::NOT_FOUND,
            &format!("project {} not found", query.project_id),
        );
    };
    let pipelines: Vec<Value> = project
        .pipelines
        .iter()
        .map(|(id, pipeline)| json!({"id": id, "jobs": pipeline.jobs.keys().collect::<Vec<_>>()}))
        .collect();
    Json(json!({"pipelines": pipelines})).into_response()
}

async fn list_actions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProjectQuery>,
) -> Response {
    let projects = state.projects.read().await;
    let Some(project) = projects.get(&query.project_id) else {
        return error_response(
            StatusCode::NOT_FOUND,
            &format!("project {} not found", query.project_id),
        );
    };
    let actions: Vec<Value> = project
        .actions
        .keys()
        .map(|id| json!({"id": id}))
        .collect();
    Json(json!({"actions": actions})).into_response()
}

#[derive(Deserialize)]
struct CallBody {
    project_id: String,
    trigger_id: String,
    #[serde(default)]
    dry_run: bool,
    #[serde(default)]
    #[allow(dead_code)]
    params: Option<Value>,
}

async fn call(State(state): State<Arc<AppState>>, Json(body): Json<CallBody>) -> Response {
    let pipelines = {
        let projects = state.projects.read().await;
        let Some(project) = projects.get(&body.project_id) else {
            return error_response(
                StatusCode::NOT_FOUND,
                &format!("project {} not found", body.project_id),
            );
        };
        let Some(actions) = project.actions.get(&body.trigger_id) else {
            return error_response(
                StatusCode::NOT_FOUND,
                &format!("action {} not found", body.trigger_id),
            );
        };

        let mut pipelines: Vec<(String, PipelineBody)> = Vec::new();
        for action in actions {
            if action.on.as_deref().map_or(true, |on| on == "call") {
                for pipeline_id in action.run_pipelines.clone().unwrap_or_default() {
                    if let Some(pipeline) = project.pipelines.get(&pipeline_id) {
                        pipelines.push((pipeline_id, pipeline.clone()));
                    }
                }
            }
        }
        pipelines
    };

    let run_id = format!("run-{}", state.next_id.fetch_add(1, Ordering::SeqCst));
    let channel = RunChannel::new();
    state
        .channels
        .lock()
        .await
        .insert(run_id.clone(), Arc::clone(&channel));
    {
        let mut runs = state.runs.lock().await;
        for (pipeline_id, _) in &pipelines {
            runs.push(RunRecord {
                run_id: run_id.clone(),
                project: body.project_id.clone(),
                pipeline: pipeline_id.clone(),
                status: json!("Pending"),
            });
        }
    }

    tokio::spawn(execute_run(
        Arc::clone(&state),
        channel,
        run_id.clone(),
        pipelines,
        body.dry_run,
    ));

    (StatusCode::ACCEPTED, Json(json!({"run_id": run_id}))).into_response()
}

async fn execute_run(
    state: Arc<AppState>,
    channel: Arc<RunChannel>,
    run_id: String,
    pipelines: Vec<(String, PipelineBody)>,
    dry_run: bool,
) {
    let mut failed = false;

    for (pipeline_id, pipeline) in &pipelines {
        set_run_status(&state, &run_id, pipeline_id, json!("Running")).await;
        channel.push(status_frame(pipeline_id, json!("Running")), false);

        if dry_run {
            continue;
        }

        for (job_id, job) in &pipeline.jobs {
            if job.task.as_deref().map_or(false, |task| task != "run") {
                continue;
            }
            for step in &job.steps {
                let output = tokio::process::Command::new("sh")
                    .arg("-c")
                    .arg(&step.run)
                    .output()
                    .await;
                match output {
                    Ok(output) => {
                        for line in String::from_utf8_lossy(&output.stdout).lines() {
                            channel.push(log_frame(pipeline_id, job_id, line), false);
                        }
                        for line in String::from_utf8_lossy(&output.stderr).lines() {
                            channel.push(log_frame(pipeline_id, job_id, line), false);
                        }
                        if !output.status.success() {
                            failed = true;
                        }
                    }
                    Err(err) => {
                        channel.push(
                            log_frame(pipeline_id, job_id, &format!("failed to run step: {err}")),
                            false,
                        );
                        failed = true;
                    }
                }
            }
        }
    }

    let outcome = if failed {
        json!({"Finished": "Failure"})
    } else {
        json!({"Finished": "Success"})
    };
    for (pipeline_id, _) in &pipelines {
        set_run_status(&state, &run_id, pipeline_id, outcome.clone()).await;
        channel.push(status_frame(pipeline_id, outcome.clone()), false);
    }
    channel.push(done_frame(), true);
}

async fn set_run_status(state: &AppState, run_id: &str, pipeline: &str, status: Value) {
    let mut runs = state.runs.lock().await;
    for run in runs.iter_mut() {
        if run.run_id == run_id && run.pipeline == pipeline {
            run.status = status.clone();
        }
    }
}

#[derive(Deserialize)]
struct RunsQuery {
    project_id: Option<String>,
    pipeline_id: Option<String>,
}

async fn list_runs(State(state): State<Arc<AppState>>, Query(query): Query<RunsQuery>) -> Response {
    let runs = state.runs.lock().await;
    let list: Vec<Value> = runs
        .iter()
        .filter(|run| {
            query
                .project_id
                .as_deref()
                .map_or(true, |project| run.project == project)
        })
        .filter(|run| {
            query
                .pipeline_id
                .as_deref()
                .map_or(true, |pipeline| run.pipeline == pipeline)
        })
        .map(|run| {
            json!({
                "run_id": run.run_id,
                "project": run.project,
                "pipeline": run.pipeline,
                "status": run.status,
            })
        })
        .collect();
    Json(json!({"runs": list})).into_response()
}

#[derive(Deserialize)]
struct RunLogsQuery {
    #[allow(dead_code)]
    project: String,
    #[allow(dead_code)]
    pipeline: String,
    run: String,
}

/// Open a replay streaming session for a run's buffered logs. The
/// response names the session, not the run; the client follows up on
/// `/ws/{session_id}`.
async fn run_logs(State(state): State<Arc<AppState>>, Query(query): Query<RunLogsQuery>) -> Response {
    let source = state.channels.lock().await.get(&query.run).cloned();
    let Some(source) = source else {
        return error_response(
            StatusCode::NOT_FOUND,
            &format!("run {} not found", query.run),
        );
    };

    let (history, _done) = source.snapshot();
    let session_id = format!("session-{}", state.next_id.fetch_add(1, Ordering::SeqCst));
    let session = RunChannel::new();
    let done = done_frame();
    for frame in history {
        if frame != done {
            session.push(frame, false);
        }
    }
    session.push(done, true);

    state
        .channels
        .lock()
        .await
        .insert(session_id.clone(), session);

    Json(json!({"run_id": session_id})).into_response()
}

async fn ws_client(
    UrlPath(client_id): UrlPath<String>,
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let channel = state.channels.lock().await.get(&client_id).cloned();
    match channel {
        Some(channel) => ws.on_upgrade(move |socket| stream_channel(socket, channel)),
        None => error_response(
            StatusCode::NOT_FOUND,
            &format!("no stream for {client_id}"),
        ),
    }
}

async fn stream_channel(mut socket: WebSocket, channel: Arc<RunChannel>) {
    let (history, done, mut live) = channel.snapshot_and_subscribe();

    for frame in history {
        if socket.send(Message::Text(frame.into())).await.is_err() {
            return;
        }
    }
    if done {
        // Everything already delivered; closing the socket is expected
        // after the Done frame.
        return;
    }

    while let Ok((frame, is_done)) = live.recv().await {
        if socket.send(Message::Text(frame.into())).await.is_err() {
            return;
        }
        if is_done {
            break;
        }
    }
}
