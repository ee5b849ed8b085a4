//! In-crate test double for exercising the scheduler without cloud calls.

use crate::core::error::WfError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::schema::Workflow;
use crate::core::workflow::steps::StepAction;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records its own execution and optionally sleeps, fails, or registers
/// a cleanup hook, so tests can assert ordering and teardown.
#[derive(Clone, Default)]
pub struct TestStep {
    /// Sleep this long before returning from run.
    pub delay: Option<Duration>,
    /// Fail run with this message.
    pub error: Option<String>,
    /// Fail populate with this message.
    pub populate_error: Option<String>,
    /// Fail validate with this message.
    pub validate_error: Option<String>,
    /// Shared call log; run appends the step name on entry.
    pub log: Option<Arc<Mutex<Vec<String>>>>,
    /// Register a cleanup hook that appends `cleanup:<name>` to `log`.
    pub register_cleanup: bool,
}

impl TestStep {
    pub fn logging(log: Arc<Mutex<Vec<String>>>) -> TestStep {
        TestStep {
            log: Some(log),
            ..Default::default()
        }
    }
}

#[async_trait]
impl StepAction for TestStep {
    async fn populate(&mut self, _step_name: &str, _w: &Workflow) -> Result<(), WfError> {
        match &self.populate_error {
            Some(msg) => Err(WfError::new(ErrorCategory::PopulateError, msg.clone())),
            None => Ok(()),
        }
    }

    fn validate(&mut self, _step_name: &str, _w: &Workflow) -> Result<(), WfError> {
        match &self.validate_error {
            Some(msg) => Err(WfError::new(ErrorCategory::ValidationError, msg.clone())),
            None => Ok(()),
        }
    }

    async fn run(&self, step_name: &str, w: &Workflow) -> Result<(), WfError> {
        if let Some(log) = &self.log {
            log.lock().unwrap().push(step_name.to_string());
        }
        if let Some(delay) = self.delay {
            let cancel_token = w.cancel_token();
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    return Err(WfError::canceled("step canceled"));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if self.register_cleanup {
            if let Some(log) = &self.log {
                let log = log.clone();
                let name = step_name.to_string();
                w.add_cleanup_hook(async move {
                    log.lock().unwrap().push(format!("cleanup:{}", name));
                    Ok(())
                });
            }
        }
        match &self.error {
            Some(msg) => Err(WfError::new(ErrorCategory::RunError, msg.clone())),
            None => Ok(()),
        }
    }
}
