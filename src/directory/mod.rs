//! Cached directory of the backend's projects
//!
//! The cache is owned state on the directory value — never process
//! global — and is only mutated by [`ProjectDirectory::list`] and
//! [`ProjectDirectory::invalidate`]. Lookups pass ids verbatim; there is
//! deliberately no attribute-style access or name mangling.

pub mod handle;
pub mod waiter;

use std::collections::HashMap;

use crate::api::types::{ProjectMetadata, ProjectsListResponse};
use crate::api::ApiClient;
use crate::common::{Error, Result};

pub use handle::{CallOptions, ProjectHandle};
pub use waiter::RunWaiter;

/// Cached view of the backend's current projects
pub struct ProjectDirectory {
    api: ApiClient,
    handles: HashMap<String, ProjectHandle>,
    /// Whether `list` ran since construction or the last invalidation
    primed: bool,
}

impl ProjectDirectory {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            handles: HashMap::new(),
            primed: false,
        }
    }

    /// Fetch the full project list and refresh the handle cache: a known
    /// id keeps its handle (metadata refreshed in place, visible through
    /// existing clones), a new id gets a fresh handle. Handles for
    /// projects absent from the fresh list are NOT removed — ids stay
    /// resolvable until an explicit reload/invalidation.
    pub async fn list(&mut self) -> Result<Vec<ProjectMetadata>> {
        let response: ProjectsListResponse =
            self.api.get_json("/projects/list", None::<&()>).await?;

        for project in &response.projects {
            match self.handles.get(&project.id) {
                Some(handle) => handle.update_metadata(project.clone()),
                None => {
                    self.handles.insert(
                        project.id.clone(),
                        ProjectHandle::new(self.api.clone(), project.clone()),
                    );
                }
            }
        }
        self.primed = true;

        Ok(response.projects)
    }

    /// Metadata for one project. A cold cache triggers one `list`
    /// refresh before concluding absence.
    pub async fn get(&mut self, project_id: &str) -> Result<Option<ProjectMetadata>> {
        if !self.primed {
            self.list().await?;
        }
        Ok(self.handles.get(project_id).map(ProjectHandle::metadata))
    }

    /// Handle for one project, with the same refresh-on-cold policy as
    /// [`ProjectDirectory::get`]
    pub async fn handle(&mut self, project_id: &str) -> Result<ProjectHandle> {
        if !self.primed {
            self.list().await?;
        }
        self.handles
            .get(project_id)
            .cloned()
            .ok_or_else(|| Error::not_found("project", project_id))
    }

    /// Drop all cached handles and metadata unconditionally. Must be
    /// called after a configuration reload, since ids may be reused with
    /// different content.
    pub fn invalidate(&mut self) {
        tracing::debug!(cached = self.handles.len(), "invalidating project directory");
        self.handles.clear();
        self.primed = false;
    }

    /// Ask the backend to reload its configuration, then invalidate the
    /// cache so nothing stale survives the reload
    pub async fn reload(&mut self) -> Result<()> {
        self.api.reload().await?;
        self.invalidate();
        Ok(())
    }
}
