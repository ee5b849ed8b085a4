//! Workflow document model.
//!
//! The serde shape mirrors the published JSON schema: canonical
//! PascalCase keys, `Vars` accepting both the bare-string and record
//! forms, and `Steps`/`Dependencies` as name-keyed maps. Runtime-only
//! state (ids, scratch paths, cancellation, cleanup hooks, clients) is
//! skipped during (de)serialization, so serializing a populated workflow
//! yields the canonical printed form.

use crate::core::error::WfError;
use crate::core::gcp::{ComputeClient, StorageClient, StorageLogWriter};
use crate::core::types::ErrorCategory;
use crate::core::workflow::registry::ResourceRegistry;
use crate::core::workflow::step::Step;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Teardown callback registered by a step; drained LIFO at workflow exit.
pub type CleanupHook = Pin<Box<dyn Future<Output = Result<(), WfError>> + Send>>;

/// A workflow variable. Parses from either a bare string or the full
/// `{Value, Required, Description}` record; always serializes as the
/// record form.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Var {
    pub value: String,
    pub required: bool,
    pub description: String,
}

impl<'de> Deserialize<'de> for Var {
    fn deserialize<D>(deserializer: D) -> Result<Var, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum VarSpec {
            Plain(String),
            Full {
                #[serde(rename = "Value", default)]
                value: String,
                #[serde(rename = "Required", default)]
                required: bool,
                #[serde(rename = "Description", default)]
                description: String,
            },
        }
        Ok(match VarSpec::deserialize(deserializer)? {
            VarSpec::Plain(value) => Var {
                value,
                ..Default::default()
            },
            VarSpec::Full {
                value,
                required,
                description,
            } => Var {
                value,
                required,
                description,
            },
        })
    }
}

impl Serialize for Var {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Var", 3)?;
        state.serialize_field("Value", &self.value)?;
        state.serialize_field("Required", &self.required)?;
        state.serialize_field("Description", &self.description)?;
        state.end()
    }
}

/// A parsed workflow: a DAG of steps plus the variables, sources, and
/// scratch-space bookkeeping they share.
#[derive(Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Workflow {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Project", default)]
    pub project: String,
    #[serde(rename = "Zone", default)]
    pub zone: String,
    #[serde(rename = "GCSPath", default)]
    pub gcs_path: String,
    #[serde(rename = "OAuthPath", default, skip_serializing_if = "Option::is_none")]
    pub oauth_path: Option<String>,
    #[serde(rename = "Vars", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, Var>,
    #[serde(rename = "Sources", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sources: BTreeMap<String, String>,
    #[serde(rename = "Steps", default)]
    pub steps: BTreeMap<String, Step>,
    #[serde(rename = "Dependencies", default)]
    pub dependencies: BTreeMap<String, Vec<String>>,

    // Derived at populate.
    #[serde(skip)]
    pub(crate) id: String,
    #[serde(skip)]
    pub(crate) username: String,
    #[serde(skip)]
    pub(crate) workflow_dir: PathBuf,
    #[serde(skip)]
    pub(crate) bucket: String,
    #[serde(skip)]
    pub(crate) scratch_path: String,
    #[serde(skip)]
    pub(crate) sources_path: String,
    #[serde(skip)]
    pub(crate) logs_path: String,
    #[serde(skip)]
    pub(crate) outs_path: String,
    #[serde(skip)]
    pub(crate) autovars: BTreeMap<String, String>,
    #[serde(skip)]
    pub(crate) populated: bool,
    #[serde(skip)]
    pub(crate) validated: bool,

    // Runtime-only; nested workflows share these with the root.
    #[serde(skip)]
    pub(crate) cancel: CancellationToken,
    #[serde(skip)]
    pub(crate) cleanup_hooks: Arc<Mutex<Vec<CleanupHook>>>,
    #[serde(skip)]
    pub(crate) registry: Arc<ResourceRegistry>,
    #[serde(skip)]
    pub compute: Option<Arc<dyn ComputeClient>>,
    #[serde(skip)]
    pub storage: Option<Arc<dyn StorageClient>>,
    #[serde(skip)]
    pub(crate) log_writer: Option<Arc<StorageLogWriter>>,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("project", &self.project)
            .field("zone", &self.zone)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Workflow {
    pub fn new() -> Workflow {
        Workflow::default()
    }

    /// The workflow's generated id token (empty before populate).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The scratch bucket (empty before populate).
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object prefix of the scratch area within the bucket.
    pub fn scratch_path(&self) -> &str {
        &self.scratch_path
    }

    pub fn workflow_dir(&self) -> &std::path::Path {
        &self.workflow_dir
    }

    /// Handle to the workflow's cancellation signal. Cancelling it stops
    /// the workflow: queued steps never start, running steps observe the
    /// signal, and cleanup still runs.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Insert a fresh step under `name`.
    pub fn new_step(&mut self, name: &str) -> Result<&mut Step, WfError> {
        if self.steps.contains_key(name) {
            return Err(WfError::new(
                ErrorCategory::SchemaError,
                format!("cannot create step \"{}\": step already exists", name),
            ));
        }
        let mut step = Step::default();
        step.name = name.to_string();
        self.steps.insert(name.to_string(), step);
        Ok(self.steps.get_mut(name).unwrap())
    }

    /// Record that `step` depends on each of `deps`. Both endpoints must
    /// already exist; duplicate edges coalesce.
    pub fn add_dependency(&mut self, step: &str, deps: &[&str]) -> Result<(), WfError> {
        if !self.steps.contains_key(step) {
            return Err(WfError::new(
                ErrorCategory::DependencyError,
                format!("cannot add dependency: step \"{}\" does not exist", step),
            ));
        }
        for dep in deps {
            if !self.steps.contains_key(*dep) {
                return Err(WfError::new(
                    ErrorCategory::DependencyError,
                    format!("cannot add dependency: step \"{}\" does not exist", dep),
                ));
            }
        }
        let entry = self.dependencies.entry(step.to_string()).or_default();
        for dep in deps {
            if !entry.iter().any(|d| d == dep) {
                entry.push((*dep).to_string());
            }
        }
        Ok(())
    }

    /// Set the value of the named variable, creating the entry if absent.
    pub fn add_var(&mut self, name: &str, value: &str) {
        self.vars
            .entry(name.to_string())
            .or_default()
            .value = value.to_string();
    }

    /// Push a teardown callback; hooks run in reverse registration order
    /// once the workflow reaches any terminal path.
    pub fn add_cleanup_hook<F>(&self, hook: F)
    where
        F: Future<Output = Result<(), WfError>> + Send + 'static,
    {
        self.cleanup_hooks.lock().unwrap().push(Box::pin(hook));
    }

    pub fn set_log_writer(&mut self, writer: Arc<StorageLogWriter>) {
        self.log_writer = Some(writer);
    }

    pub(crate) fn compute_client(&self) -> Result<&Arc<dyn ComputeClient>, WfError> {
        self.compute.as_ref().ok_or_else(|| {
            WfError::new(ErrorCategory::RunError, "no compute client configured")
        })
    }

    pub(crate) fn storage_client(&self) -> Result<&Arc<dyn StorageClient>, WfError> {
        self.storage.as_ref().ok_or_else(|| {
            WfError::new(ErrorCategory::RunError, "no storage client configured")
        })
    }

    pub(crate) fn gs_url(&self, object: &str) -> String {
        format!("gs://{}/{}", self.bucket, object)
    }

    /// Emit one human-readable log line to tracing and, when configured,
    /// the workflow's storage log stream.
    pub(crate) async fn log(&self, msg: &str) {
        tracing::info!(workflow = %self.name, "{}", msg);
        if let Some(writer) = &self.log_writer {
            if let Err(err) = writer.write_line(&format!("[{}]: {}", self.name, msg)).await {
                tracing::warn!(workflow = %self.name, error = %err, "failed to write workflow log");
            }
        }
    }
}
