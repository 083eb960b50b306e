//! Declarative backend configuration fixtures
//!
//! Builds the configuration document the backend consumes: a YAML file
//! with top-level `projects_store.projects` keyed by project id, each
//! entry embedding the project definition plus an access-token list.
//! Tests describe projects declaratively and write the document into a
//! scratch directory that becomes the instance's config dir.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::Result;

/// A full backend configuration: a set of projects
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFixture {
    #[serde(default)]
    pub projects: Vec<ProjectFixture>,
}

impl ConfigFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, project: ProjectFixture) -> Self {
        self.projects.push(project);
        self
    }

    /// Render the backend's configuration document
    pub fn document(&self) -> ConfigDocument {
        let projects = self
            .projects
            .iter()
            .map(|project| {
                (
                    project.id.clone(),
                    ProjectEntry {
                        config: ProjectBody {
                            pipelines: project.pipelines.clone(),
                            actions: project.actions.clone(),
                            params: project.params.clone(),
                        },
                        tokens: vec![TokenEntry::full_access()],
                    },
                )
            })
            .collect();

        ConfigDocument {
            projects_store: ProjectsStore {
                kind: "static".to_string(),
                projects,
            },
            tokens: vec![TokenEntry::full_access()],
        }
    }

    /// Write `config.yaml` into `dir` and return its path
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join("config.yaml");
        std::fs::write(&path, serde_yaml::to_string(&self.document())?)?;
        Ok(path)
    }
}

/// One project definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFixture {
    pub id: String,
    #[serde(default)]
    pub pipelines: BTreeMap<String, PipelineFixture>,
    #[serde(default)]
    pub actions: BTreeMap<String, Vec<ActionFixture>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl ProjectFixture {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            pipelines: BTreeMap::new(),
            actions: BTreeMap::new(),
            params: None,
        }
    }

    pub fn with_pipeline(mut self, id: impl Into<String>, pipeline: PipelineFixture) -> Self {
        self.pipelines.insert(id.into(), pipeline);
        self
    }

    pub fn with_action(mut self, id: impl Into<String>, action: ActionFixture) -> Self {
        self.actions.entry(id.into()).or_default().push(action);
        self
    }
}

/// A pipeline: a set of jobs plus optional stage/link structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineFixture {
    #[serde(default)]
    pub jobs: BTreeMap<String, JobFixture>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<String>>,
}

impl PipelineFixture {
    pub fn with_job(mut self, id: impl Into<String>, job: JobFixture) -> Self {
        self.jobs.insert(id.into(), job);
        self
    }

    /// A one-job pipeline running a single shell step
    pub fn shell(job_id: impl Into<String>, step_name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::default().with_job(
            job_id,
            JobFixture::run(vec![StepFixture {
                name: Some(step_name.into()),
                run: command.into(),
            }]),
        )
    }
}

/// A job inside a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFixture {
    #[serde(rename = "do")]
    pub task: String,
    #[serde(default)]
    pub steps: Vec<StepFixture>,
}

impl JobFixture {
    /// A shell job executing `steps` in order
    pub fn run(steps: Vec<StepFixture>) -> Self {
        Self {
            task: "run".to_string(),
            steps,
        }
    }
}

/// One shell step of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFixture {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub run: String,
}

/// One trigger definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionFixture {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_pipelines: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl ActionFixture {
    /// A call-triggered action running the given pipelines
    pub fn on_call<I, S>(pipelines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            on: Some("call".to_string()),
            run_pipelines: Some(pipelines.into_iter().map(Into::into).collect()),
            params: None,
        }
    }
}

// === The configuration document as the backend reads it ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub projects_store: ProjectsStore,
    pub tokens: Vec<TokenEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectsStore {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub config: ProjectBody,
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectBody {
    #[serde(default)]
    pub pipelines: BTreeMap<String, PipelineFixture>,
    #[serde(default)]
    pub actions: BTreeMap<String, Vec<ActionFixture>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub permissions: Vec<String>,
}

impl TokenEntry {
    pub fn full_access() -> Self {
        Self {
            permissions: vec![
                "read".to_string(),
                "write".to_string(),
                "execute".to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_renders_an_empty_store() {
        let yaml = serde_yaml::to_string(&ConfigFixture::new().document()).unwrap();
        assert!(yaml.contains("projects_store"));
        assert!(yaml.contains("type: static"));
    }

    #[test]
    fn project_entries_carry_config_and_tokens() {
        let config = ConfigFixture::new().with_project(
            ProjectFixture::new("pipeline-test")
                .with_pipeline(
                    "action-pipeline",
                    PipelineFixture::shell("echo-job", "echo", "echo 'Action executed'"),
                )
                .with_action("test-action", ActionFixture::on_call(["action-pipeline"])),
        );

        let document = config.document();
        let entry = document
            .projects_store
            .projects
            .get("pipeline-test")
            .expect("project missing from document");
        assert_eq!(entry.tokens[0].permissions, ["read", "write", "execute"]);
        assert!(entry.config.pipelines.contains_key("action-pipeline"));
        assert_eq!(
            entry.config.actions["test-action"][0].on.as_deref(),
            Some("call")
        );

        let yaml = serde_yaml::to_string(&document).unwrap();
        assert!(yaml.contains("do: run"));
        assert!(yaml.contains("run: echo 'Action executed'"));
    }

    #[test]
    fn write_to_creates_config_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = ConfigFixture::new().write_to(dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), "config.yaml");
        assert!(path.exists());
    }

    #[test]
    fn document_round_trips_through_yaml() {
        let config = ConfigFixture::new()
            .with_project(ProjectFixture::new("p1").with_pipeline(
                "pipe",
                PipelineFixture::shell("job", "step", "true"),
            ));
        let yaml = serde_yaml::to_string(&config.document()).unwrap();
        let parsed: ConfigDocument = serde_yaml::from_str(&yaml).unwrap();
        assert!(parsed.projects_store.projects.contains_key("p1"));
        assert_eq!(
            parsed.projects_store.projects["p1"].config.pipelines["pipe"]
                .jobs["job"]
                .steps[0]
                .run,
            "true"
        );
    }
}
