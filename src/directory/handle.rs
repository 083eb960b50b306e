//! Project-scoped operations
//!
//! A [`ProjectHandle`] binds a project id to the API client; every
//! operation is a thin translation to one control-plane call. Pipeline
//! and action lookups are linear scans of the list — there is no
//! secondary index, which is fine at test scale.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::api::types::{
    Action, ActionsListResponse, CallRequest, ContinueResponse, Pipeline, PipelinesListResponse,
    ProjectMetadata, ProjectScopedQuery, Run, RunsListQuery, RunsListResponse, RunsLogsQuery,
};
use crate::api::ApiClient;
use crate::common::Result;
use crate::stream::RunLogStream;

/// Options for triggering an action
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Resolve the trigger without executing anything
    pub dry_run: bool,
    /// Free-form parameters forwarded to the trigger
    pub params: Option<Value>,
}

/// Handle for one project in the directory
///
/// Clones share the cached metadata, so a directory refresh is visible
/// through every handle for the same id.
#[derive(Debug, Clone)]
pub struct ProjectHandle {
    api: ApiClient,
    project_id: String,
    metadata: Arc<Mutex<ProjectMetadata>>,
}

impl ProjectHandle {
    pub(crate) fn new(api: ApiClient, metadata: ProjectMetadata) -> Self {
        Self {
            api,
            project_id: metadata.id.clone(),
            metadata: Arc::new(Mutex::new(metadata)),
        }
    }

    /// Project id this handle is scoped to
    pub fn id(&self) -> &str {
        &self.project_id
    }

    /// Snapshot of the cached metadata
    pub fn metadata(&self) -> ProjectMetadata {
        self.metadata
            .lock()
            .expect("project metadata lock poisoned")
            .clone()
    }

    pub(crate) fn update_metadata(&self, metadata: ProjectMetadata) {
        *self
            .metadata
            .lock()
            .expect("project metadata lock poisoned") = metadata;
    }

    fn scope(&self) -> ProjectScopedQuery {
        ProjectScopedQuery {
            project_id: self.project_id.clone(),
        }
    }

    /// List this project's pipelines
    pub async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        let response: PipelinesListResponse = self
            .api
            .get_json("/projects/pipelines/list", Some(&self.scope()))
            .await?;
        Ok(response.pipelines)
    }

    /// Find one pipeline by id
    pub async fn get_pipeline(&self, pipeline_id: &str) -> Result<Option<Pipeline>> {
        let pipelines = self.list_pipelines().await?;
        Ok(pipelines.into_iter().find(|p| p.id == pipeline_id))
    }

    /// List this project's actions
    pub async fn list_actions(&self) -> Result<Vec<Action>> {
        let response: ActionsListResponse = self
            .api
            .get_json("/projects/actions/list", Some(&self.scope()))
            .await?;
        Ok(response.actions)
    }

    /// Find one action by id
    pub async fn get_action(&self, action_id: &str) -> Result<Option<Action>> {
        let actions = self.list_actions().await?;
        Ok(actions.into_iter().find(|a| a.id == action_id))
    }

    /// Trigger an action. The backend acknowledges acceptance (202)
    /// before the run necessarily completes; the returned run id is the
    /// handle for observing it.
    pub async fn call_action(&self, action_id: &str, options: CallOptions) -> Result<String> {
        let request = CallRequest {
            project_id: self.project_id.clone(),
            trigger_id: action_id.to_string(),
            dry_run: options.dry_run,
            params: options.params,
        };
        let response: ContinueResponse = self.api.post_json("/call", Some(&request)).await?;
        tracing::debug!(
            project = %self.project_id,
            action = action_id,
            run_id = %response.run_id,
            "action accepted"
        );
        Ok(response.run_id)
    }

    /// List this project's runs, optionally narrowed to one pipeline
    pub async fn list_runs(&self, pipeline_id: Option<&str>) -> Result<Vec<Run>> {
        let query = RunsListQuery {
            project_id: Some(self.project_id.clone()),
            pipeline_id: pipeline_id.map(str::to_string),
        };
        let response: RunsListResponse = self.api.get_json("/runs/list", Some(&query)).await?;
        Ok(response.runs)
    }

    /// Find one run by pipeline and run id
    pub async fn get_run(&self, pipeline_id: &str, run_id: &str) -> Result<Option<Run>> {
        let runs = self.list_runs(Some(pipeline_id)).await?;
        Ok(runs.into_iter().find(|r| r.run_id == run_id))
    }

    /// Follow a live run's event channel by its run id
    pub async fn follow_run(&self, run_id: &str) -> Result<RunLogStream> {
        RunLogStream::open(&self.api.ws_url(&format!("/ws/{run_id}"))).await
    }

    /// Open a replay streaming session for a run's logs. The backend
    /// answers with a session id — not necessarily the run id — and the
    /// channel is opened on that session.
    pub async fn stream_run_logs(&self, pipeline_id: &str, run_id: &str) -> Result<RunLogStream> {
        let query = RunsLogsQuery {
            project: self.project_id.clone(),
            pipeline: pipeline_id.to_string(),
            run: run_id.to_string(),
        };
        let session: ContinueResponse = self.api.get_json("/runs/logs", Some(&query)).await?;
        tracing::debug!(run_id, session = %session.run_id, "opening log replay session");
        RunLogStream::open(&self.api.ws_url(&format!("/ws/{}", session.run_id))).await
    }
}
