use crate::core::error::WfError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::executor;
use crate::core::workflow::lifecycle::NestMode;
use crate::core::workflow::schema::Workflow;
use crate::core::workflow::steps::StepAction;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// IncludeWorkflow step: splice another workflow into the parent's
/// namespace. The child shares the parent's id, scratch paths, registries,
/// and cleanup-hook list; its sources bubble up into the parent.
#[derive(Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct IncludeWorkflow {
    #[serde(rename = "Path")]
    pub path: String,
    #[serde(rename = "Vars", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, String>,
    #[serde(skip)]
    pub(crate) workflow: Option<Box<Workflow>>,
}

impl IncludeWorkflow {
    /// The loaded child workflow, if any.
    pub fn workflow(&self) -> Option<&Workflow> {
        self.workflow.as_deref()
    }

    fn missing(&self) -> WfError {
        WfError::new(
            ErrorCategory::SchemaError,
            format!("included workflow \"{}\" was never loaded", self.path),
        )
    }
}

#[async_trait]
impl StepAction for IncludeWorkflow {
    async fn populate(&mut self, step_name: &str, w: &Workflow) -> Result<(), WfError> {
        let child = self.workflow.as_deref_mut().ok_or_else(|| {
            WfError::new(
                ErrorCategory::SchemaError,
                format!("included workflow \"{}\" was never loaded", self.path),
            )
        })?;
        child.id = w.id.clone();
        child.name = step_name.to_string();
        child.project = w.project.clone();
        child.zone = w.zone.clone();
        child.oauth_path = w.oauth_path.clone();
        child.gcs_path = w.gcs_path.clone();
        child.username = w.username.clone();
        child.bucket = w.bucket.clone();
        child.scratch_path = w.scratch_path.clone();
        child.sources_path = w.sources_path.clone();
        child.logs_path = w.logs_path.clone();
        child.outs_path = w.outs_path.clone();
        child.compute = w.compute.clone();
        child.storage = w.storage.clone();
        child.cancel = w.cancel.clone();
        child.cleanup_hooks = w.cleanup_hooks.clone();
        child.registry = w.registry.clone();
        child.log_writer = w.log_writer.clone();
        for (k, v) in &self.vars {
            child.add_var(k, v);
        }
        child.populate_inner(NestMode::Include).await
    }

    fn validate(&mut self, _step_name: &str, _w: &Workflow) -> Result<(), WfError> {
        self.workflow
            .as_deref_mut()
            .ok_or_else(|| {
                WfError::new(
                    ErrorCategory::SchemaError,
                    "included workflow was never loaded",
                )
            })?
            .validate_inner()
    }

    async fn run(&self, _step_name: &str, w: &Workflow) -> Result<(), WfError> {
        let child = self.workflow.as_deref().ok_or_else(|| self.missing())?;
        w.log(&format!("running included workflow \"{}\"", child.name))
            .await;
        // Sources were bubbled up and uploaded by the parent; cleanup
        // hooks land on the shared list and drain with the parent's.
        executor::traverse_dag(child).await
    }
}
