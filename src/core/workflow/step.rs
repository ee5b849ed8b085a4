//! The scheduling wrapper around a workflow step.
//!
//! A `Step` carries scheduling metadata (name, timeout) and exactly one
//! populated operation variant; populate/validate/run dispatch uniformly
//! to that variant.

use crate::core::error::WfError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::duration::{format_duration, parse_duration};
use crate::core::workflow::schema::Workflow;
use crate::core::workflow::steps::copy_gcs_objects::CopyGCSObjects;
use crate::core::workflow::steps::create_disks::CreateDisks;
use crate::core::workflow::steps::create_images::CreateImages;
use crate::core::workflow::steps::create_instances::CreateInstances;
use crate::core::workflow::steps::delete_resources::DeleteResources;
use crate::core::workflow::steps::include_workflow::IncludeWorkflow;
use crate::core::workflow::steps::sub_workflow::SubWorkflow;
use crate::core::workflow::steps::wait_for_instances_signal::WaitForInstancesSignal;
use crate::core::workflow::steps::StepAction;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub(crate) const DEFAULT_TIMEOUT: &str = "10m";

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Step {
    #[serde(skip)]
    pub(crate) name: String,
    #[serde(rename = "Timeout", default)]
    pub timeout: String,
    #[serde(skip)]
    pub(crate) parsed_timeout: Duration,

    #[serde(rename = "CreateDisks", default, skip_serializing_if = "Option::is_none")]
    pub create_disks: Option<CreateDisks>,
    #[serde(
        rename = "CreateInstances",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub create_instances: Option<CreateInstances>,
    #[serde(
        rename = "WaitForInstancesSignal",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub wait_for_instances_signal: Option<WaitForInstancesSignal>,
    #[serde(
        rename = "CreateImages",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub create_images: Option<CreateImages>,
    #[serde(
        rename = "DeleteResources",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub delete_resources: Option<DeleteResources>,
    #[serde(
        rename = "CopyGCSObjects",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub copy_gcs_objects: Option<CopyGCSObjects>,
    #[serde(
        rename = "SubWorkflow",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sub_workflow: Option<SubWorkflow>,
    #[serde(
        rename = "IncludeWorkflow",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub include_workflow: Option<IncludeWorkflow>,

    #[cfg(test)]
    #[serde(skip)]
    pub(crate) test_step: Option<crate::core::workflow::steps::test_step::TestStep>,
}

impl Step {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn actions(&self) -> Vec<&dyn StepAction> {
        let mut actions: Vec<&dyn StepAction> = Vec::new();
        if let Some(a) = &self.create_disks {
            actions.push(a);
        }
        if let Some(a) = &self.create_instances {
            actions.push(a);
        }
        if let Some(a) = &self.wait_for_instances_signal {
            actions.push(a);
        }
        if let Some(a) = &self.create_images {
            actions.push(a);
        }
        if let Some(a) = &self.delete_resources {
            actions.push(a);
        }
        if let Some(a) = &self.copy_gcs_objects {
            actions.push(a);
        }
        if let Some(a) = &self.sub_workflow {
            actions.push(a);
        }
        if let Some(a) = &self.include_workflow {
            actions.push(a);
        }
        #[cfg(test)]
        if let Some(a) = &self.test_step {
            actions.push(a);
        }
        actions
    }

    fn actions_mut(&mut self) -> Vec<&mut dyn StepAction> {
        let mut actions: Vec<&mut dyn StepAction> = Vec::new();
        if let Some(a) = &mut self.create_disks {
            actions.push(a);
        }
        if let Some(a) = &mut self.create_instances {
            actions.push(a);
        }
        if let Some(a) = &mut self.wait_for_instances_signal {
            actions.push(a);
        }
        if let Some(a) = &mut self.create_images {
            actions.push(a);
        }
        if let Some(a) = &mut self.delete_resources {
            actions.push(a);
        }
        if let Some(a) = &mut self.copy_gcs_objects {
            actions.push(a);
        }
        if let Some(a) = &mut self.sub_workflow {
            actions.push(a);
        }
        if let Some(a) = &mut self.include_workflow {
            actions.push(a);
        }
        #[cfg(test)]
        if let Some(a) = &mut self.test_step {
            actions.push(a);
        }
        actions
    }

    fn exactly_one_error(&self, count: usize) -> WfError {
        WfError::new(
            ErrorCategory::SchemaError,
            format!(
                "step \"{}\" must have exactly one step type defined, found {}",
                self.name, count
            ),
        )
    }

    /// The step's single operation variant; zero or multiple populated
    /// variants is a schema error.
    pub(crate) fn action(&self) -> Result<&dyn StepAction, WfError> {
        let actions = self.actions();
        if actions.len() != 1 {
            return Err(self.exactly_one_error(actions.len()));
        }
        Ok(actions.into_iter().next().unwrap())
    }

    pub(crate) fn action_mut(&mut self) -> Result<&mut dyn StepAction, WfError> {
        let count = self.actions().len();
        if count != 1 {
            return Err(self.exactly_one_error(count));
        }
        Ok(self.actions_mut().into_iter().next().unwrap())
    }

    /// Materialize the timeout (default 10m) and run the variant's
    /// populate hook.
    pub(crate) async fn populate(&mut self, w: &Workflow) -> Result<(), WfError> {
        if self.timeout.is_empty() {
            self.timeout = DEFAULT_TIMEOUT.to_string();
        }
        self.parsed_timeout = parse_duration(&self.timeout)?;
        let name = self.name.clone();
        self.action_mut()?.populate(&name, w).await
    }

    pub(crate) fn validate(&mut self, w: &Workflow) -> Result<(), WfError> {
        let name = self.name.clone();
        self.action_mut()?.validate(&name, w)
    }

    /// Run the variant under the step's timeout. Variant errors come back
    /// wrapped as `step "<name>": <err>`; a variant that does not return
    /// within the timeout yields the timeout error and its work is
    /// dropped at the cancellation point it is suspended on.
    pub(crate) async fn run(&self, w: &Workflow) -> Result<(), WfError> {
        w.log(&format!(
            "running step \"{}\" (timeout {})",
            self.name,
            format_duration(self.parsed_timeout)
        ))
        .await;
        let action = self.action()?;
        match tokio::time::timeout(self.parsed_timeout, action.run(&self.name, w)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(WfError::wrap_step(&self.name, err)),
            Err(_) => Err(WfError::new(
                ErrorCategory::TimeoutError,
                format!(
                    "step \"{}\" did not stop in specified timeout of {}",
                    self.name,
                    format_duration(self.parsed_timeout)
                ),
            )),
        }
    }
}
