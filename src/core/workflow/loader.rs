//! Loading workflow documents from disk.

use crate::core::error::WfError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::schema::Workflow;
use std::fs;
use std::path::{Path, PathBuf};

impl Workflow {
    /// Read and decode a workflow file, recording its directory and
    /// recursively loading every Sub/Include child workflow. No variable
    /// substitution happens at load time.
    pub fn from_file(path: &Path) -> Result<Workflow, WfError> {
        let abs = absolute(path)?;
        let data = fs::read_to_string(&abs)
            .map_err(|err| WfError::io(format!("failed to read {}: {}", abs.display(), err)))?;
        let mut workflow = parse(&data, &abs)?;
        workflow.workflow_dir = abs
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        if let Some(oauth) = workflow.oauth_path.take() {
            workflow.oauth_path = if Path::new(&oauth).is_absolute() {
                Some(oauth)
            } else {
                Some(workflow.workflow_dir.join(&oauth).display().to_string())
            };
        }
        hydrate_children(&mut workflow)?;
        Ok(workflow)
    }
}

fn absolute(path: &Path) -> Result<PathBuf, WfError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|err| WfError::io(format!("failed to resolve working directory: {}", err)))
}

fn parse(data: &str, path: &Path) -> Result<Workflow, WfError> {
    serde_json::from_str(data).map_err(|err| {
        let category = match err.classify() {
            serde_json::error::Category::Data => ErrorCategory::SchemaError,
            _ => ErrorCategory::SyntaxError,
        };
        let kind = match category {
            ErrorCategory::SchemaError => "invalid workflow",
            _ => "JSON syntax error",
        };
        WfError::new(category, format!("{}: {}: {}", path.display(), kind, err))
    })
}

fn hydrate_children(workflow: &mut Workflow) -> Result<(), WfError> {
    let dir = workflow.workflow_dir.clone();
    for step in workflow.steps.values_mut() {
        if let Some(sub) = &mut step.sub_workflow {
            sub.workflow = Some(Box::new(load_child(&dir, &sub.path)?));
        }
        if let Some(include) = &mut step.include_workflow {
            include.workflow = Some(Box::new(load_child(&dir, &include.path)?));
        }
    }
    Ok(())
}

fn load_child(parent_dir: &Path, path: &str) -> Result<Workflow, WfError> {
    let child_path = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        parent_dir.join(path)
    };
    Workflow::from_file(&child_path)
}
