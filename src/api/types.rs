//! Wire types for the runner backend control-plane API
//!
//! Pipelines and actions are passed through, not interpreted: beyond the
//! `id` everything is kept as an opaque JSON map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Project metadata as returned by `GET /projects/list`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectMetadata {
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A pipeline definition within a project (opaque beyond its id)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pipeline {
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A trigger within a project (opaque beyond its id)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One execution of a pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub run_id: String,
    #[serde(default)]
    pub project: Option<String>,
    pub pipeline: String,
    pub status: RunStatus,
}

impl Run {
    /// A run is terminal once it carries a `Finished` status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Run status: `Pending`/`Running` are transient, `Finished` is terminal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Running,
    Finished(RunOutcome),
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Finished(_))
    }
}

/// Terminal outcome of a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure,
    Cancelled,
}

/// Body for `POST /call`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    pub project_id: String,
    pub trigger_id: String,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Response carrying the id to keep following (`POST /call`, `GET /runs/logs`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinueResponse {
    pub run_id: String,
}

/// Error payload the backend attaches to non-2xx responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectsListResponse {
    pub projects: Vec<ProjectMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelinesListResponse {
    pub pipelines: Vec<Pipeline>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionsListResponse {
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunsListResponse {
    pub runs: Vec<Run>,
}

/// Query for `GET /projects/pipelines/list` and `GET /projects/actions/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectScopedQuery {
    pub project_id: String,
}

/// Query for `GET /runs/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunsListQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
}

/// Query for `GET /runs/logs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunsLogsQuery {
    pub project: String,
    pub pipeline: String,
    pub run: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_wire_format() {
        let pending: RunStatus = serde_json::from_str("\"Pending\"").unwrap();
        assert_eq!(pending, RunStatus::Pending);
        assert!(!pending.is_terminal());

        let finished: RunStatus = serde_json::from_str("{\"Finished\":\"Success\"}").unwrap();
        assert_eq!(finished, RunStatus::Finished(RunOutcome::Success));
        assert!(finished.is_terminal());

        let back = serde_json::to_string(&RunStatus::Finished(RunOutcome::Cancelled)).unwrap();
        assert_eq!(back, "{\"Finished\":\"Cancelled\"}");
    }

    #[test]
    fn run_deserializes_without_project() {
        let run: Run = serde_json::from_str(
            r#"{"run_id":"run-1","pipeline":"build","status":"Running"}"#,
        )
        .unwrap();
        assert_eq!(run.run_id, "run-1");
        assert_eq!(run.project, None);
        assert!(!run.is_terminal());
    }

    #[test]
    fn project_metadata_keeps_opaque_fields() {
        let meta: ProjectMetadata =
            serde_json::from_str(r#"{"id":"p1","owner":"tests","weight":3}"#).unwrap();
        assert_eq!(meta.id, "p1");
        assert_eq!(meta.extra.get("owner").and_then(Value::as_str), Some("tests"));
    }

    #[test]
    fn call_request_omits_missing_params() {
        let request = CallRequest {
            project_id: "p1".into(),
            trigger_id: "t1".into(),
            dry_run: false,
            params: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("params"));
    }
}
