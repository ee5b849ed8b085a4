use crate::core::error::WfError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::executor;
use crate::core::workflow::lifecycle::NestMode;
use crate::core::workflow::schema::Workflow;
use crate::core::workflow::steps::StepAction;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// SubWorkflow step: run another workflow as an isolated child. The
/// child gets its own variable namespace, scratch area (nested under the
/// parent's), registries, and cleanup hooks, but shares the parent's
/// clients and cancellation signal.
#[derive(Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SubWorkflow {
    #[serde(rename = "Path")]
    pub path: String,
    #[serde(rename = "Vars", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, String>,
    #[serde(skip)]
    pub(crate) workflow: Option<Box<Workflow>>,
}

impl SubWorkflow {
    /// The loaded child workflow, if any.
    pub fn workflow(&self) -> Option<&Workflow> {
        self.workflow.as_deref()
    }

    fn child(&self) -> Result<&Workflow, WfError> {
        self.workflow.as_deref().ok_or_else(|| {
            WfError::new(
                ErrorCategory::SchemaError,
                format!("subworkflow \"{}\" was never loaded", self.path),
            )
        })
    }
}

#[async_trait]
impl StepAction for SubWorkflow {
    async fn populate(&mut self, step_name: &str, w: &Workflow) -> Result<(), WfError> {
        let child = self.workflow.as_deref_mut().ok_or_else(|| {
            WfError::new(
                ErrorCategory::SchemaError,
                format!("subworkflow \"{}\" was never loaded", self.path),
            )
        })?;
        child.name = step_name.to_string();
        child.project = w.project.clone();
        child.zone = w.zone.clone();
        child.oauth_path = w.oauth_path.clone();
        child.gcs_path = format!("gs://{}/{}", w.bucket, w.scratch_path);
        child.username = w.username.clone();
        child.compute = w.compute.clone();
        child.storage = w.storage.clone();
        child.cancel = w.cancel.clone();
        for (k, v) in &self.vars {
            child.add_var(k, v);
        }
        child.populate_inner(NestMode::Sub).await
    }

    fn validate(&mut self, _step_name: &str, _w: &Workflow) -> Result<(), WfError> {
        self.workflow
            .as_deref_mut()
            .ok_or_else(|| {
                WfError::new(ErrorCategory::SchemaError, "subworkflow was never loaded")
            })?
            .validate_inner()
    }

    async fn run(&self, _step_name: &str, w: &Workflow) -> Result<(), WfError> {
        let child = self.child()?;
        w.log(&format!("running subworkflow \"{}\"", child.name)).await;
        let result = async {
            child.upload_sources().await?;
            executor::traverse_dag(child).await
        }
        .await;
        // The child's resources are torn down before the owning step
        // returns, whatever the outcome.
        child.cleanup().await;
        result
    }
}
