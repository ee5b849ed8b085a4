//! Step operation variants.
//!
//! Each variant implements the three lifecycle hooks of [`StepAction`]:
//! populate derives names and defaults, validate checks preconditions
//! against the workflow's registries without remote side effects, and run
//! performs the operation, honoring cancellation and registering cleanup
//! hooks for everything it creates.

pub mod copy_gcs_objects;
pub mod create_disks;
pub mod create_images;
pub mod create_instances;
pub mod delete_resources;
pub mod include_workflow;
pub mod sub_workflow;
pub mod wait_for_instances_signal;

#[cfg(test)]
pub mod test_step;

use crate::core::error::WfError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::schema::Workflow;
use async_trait::async_trait;
use regex::Regex;
use std::future::Future;
use std::sync::OnceLock;

/// Lifecycle hooks shared by every step variant.
#[async_trait]
pub trait StepAction: Send + Sync {
    /// Complete derived fields from the enclosing workflow.
    async fn populate(&mut self, step_name: &str, w: &Workflow) -> Result<(), WfError>;
    /// Check preconditions against the workflow's state. Must not perform
    /// remote side effects.
    fn validate(&mut self, step_name: &str, w: &Workflow) -> Result<(), WfError>;
    /// Execute the operation. May block on remote I/O; must observe the
    /// workflow's cancellation signal promptly.
    async fn run(&self, step_name: &str, w: &Workflow) -> Result<(), WfError>;
}

impl std::fmt::Debug for dyn StepAction + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<dyn StepAction>")
    }
}

fn resource_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z]([-a-z0-9]*[a-z0-9])?$").unwrap())
}

/// Check a workflow-local resource name against the cloud naming rule.
pub(crate) fn check_resource_name(kind: &str, name: &str) -> Result<(), WfError> {
    if !resource_name_re().is_match(name) {
        return Err(WfError::new(
            ErrorCategory::ValidationError,
            format!(
                "{} name \"{}\" must start with a lowercase letter and only contain lowercase letters, numbers, and hyphens",
                kind, name
            ),
        ));
    }
    Ok(())
}

/// Await `fut`, bailing out with a canceled error as soon as the
/// workflow's cancellation signal fires.
pub(crate) async fn with_cancel<F, T>(w: &Workflow, fut: F) -> Result<T, WfError>
where
    F: Future<Output = Result<T, WfError>>,
{
    let cancel_token = w.cancel_token();
    tokio::select! {
        _ = cancel_token.cancelled() => Err(WfError::canceled("step canceled")),
        res = fut => res,
    }
}

pub(crate) fn is_false(b: &bool) -> bool {
    !*b
}
