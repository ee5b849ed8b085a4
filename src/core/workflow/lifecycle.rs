//! Workflow lifecycle: populate, validate, run, print, cleanup.

use crate::core::error::WfError;
use crate::core::gcp::storage::{split_gcs_path, StorageLogWriter};
use crate::core::types::ErrorCategory;
use crate::core::workflow::executor;
use crate::core::workflow::name::rand_id;
use crate::core::workflow::schema::{CleanupHook, Workflow};
use crate::core::workflow::substitute::{find_unresolved, Replacer};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::OnceLock;

/// Reserved variable names the engine resolves itself; user vars with
/// these names never make it into the substitution table.
pub(crate) const AUTOVAR_NAMES: &[&str] = &[
    "ID",
    "DATE",
    "NAME",
    "ZONE",
    "PROJECT",
    "WFDIR",
    "SOURCESPATH",
    "LOGSPATH",
    "OUTSPATH",
    "USERNAME",
];

const SCRATCH_BUCKET_SUFFIX: &str = "-daisy-bkt";
const SCRATCH_DIR_PREFIX: &str = "daisy";
const WORKFLOW_ID_LEN: usize = 5;

/// How a workflow relates to the one populating it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NestMode {
    Root,
    Sub,
    Include,
}

fn workflow_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9-]*$").unwrap())
}

impl Workflow {
    /// Resolve variables, materialize timeouts and scratch paths, and run
    /// every step's populate hook. Idempotent for populated workflows.
    pub async fn populate(&mut self) -> Result<(), WfError> {
        self.populate_inner(NestMode::Root).await
    }

    pub(crate) async fn populate_inner(&mut self, mode: NestMode) -> Result<(), WfError> {
        if self.populated {
            return Ok(());
        }
        if self.id.is_empty() {
            self.id = rand_id(WORKFLOW_ID_LEN);
        }
        if self.username.is_empty() {
            self.username = std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".to_string());
        }
        let now = chrono::Utc::now();

        // Pass 1: user variables. Names shadowing an autovar are skipped
        // so the autovar pass resolves them instead.
        let mut pairs = Vec::new();
        for (name, var) in &self.vars {
            if var.required && var.value.is_empty() {
                return Err(WfError::new(
                    ErrorCategory::PopulateError,
                    format!("required var \"{}\" is unset", name),
                ));
            }
            if AUTOVAR_NAMES.contains(&name.as_str()) {
                continue;
            }
            pairs.push((format!("${{{}}}", name), var.value.clone()));
        }
        Replacer::new(pairs).apply(self);

        if mode != NestMode::Include {
            self.populate_scratch_paths(&now, mode).await?;
        }

        if self.log_writer.is_none() {
            if let Some(storage) = &self.storage {
                self.log_writer = Some(Arc::new(StorageLogWriter::new(
                    storage.clone(),
                    self.bucket.clone(),
                    format!("{}/{}.log", self.logs_path, self.name),
                )));
            }
        }

        // Pass 2: autovars, computed from the var-resolved fields.
        let mut autovars = BTreeMap::new();
        autovars.insert("ID".to_string(), self.id.clone());
        autovars.insert("DATE".to_string(), now.format("%Y%m%d").to_string());
        autovars.insert("NAME".to_string(), self.name.clone());
        autovars.insert("ZONE".to_string(), self.zone.clone());
        autovars.insert("PROJECT".to_string(), self.project.clone());
        autovars.insert(
            "WFDIR".to_string(),
            self.workflow_dir.display().to_string(),
        );
        autovars.insert("SOURCESPATH".to_string(), self.gs_url(&self.sources_path));
        autovars.insert("LOGSPATH".to_string(), self.gs_url(&self.logs_path));
        autovars.insert("OUTSPATH".to_string(), self.gs_url(&self.outs_path));
        autovars.insert("USERNAME".to_string(), self.username.clone());
        let pairs = autovars
            .iter()
            .map(|(k, v)| (format!("${{{}}}", k), v.clone()))
            .collect();
        Replacer::new(pairs).apply(self);
        self.autovars = autovars;

        // Steps are taken out of the map so their hooks can read the
        // workflow while mutating themselves.
        let mut steps = std::mem::take(&mut self.steps);
        let mut result = Ok(());
        for (name, step) in steps.iter_mut() {
            step.name = name.clone();
            if let Err(err) = step.populate(self).await {
                result = Err(err);
                break;
            }
        }
        self.steps = steps;
        result?;

        self.bubble_included_sources()?;
        self.populated = true;
        Ok(())
    }

    async fn populate_scratch_paths(
        &mut self,
        now: &chrono::DateTime<chrono::Utc>,
        mode: NestMode,
    ) -> Result<(), WfError> {
        if mode == NestMode::Root && self.gcs_path.is_empty() {
            self.bucket = format!("{}{}", self.project, SCRATCH_BUCKET_SUFFIX);
            if let Some(storage) = &self.storage {
                storage.ensure_bucket(&self.project, &self.bucket).await?;
            }
            self.gcs_path = format!("gs://{}", self.bucket);
        }
        let (bucket, prefix) = split_gcs_path(&self.gcs_path)?;
        self.bucket = bucket;
        let scratch = format!(
            "{}-{}-{}-{}",
            SCRATCH_DIR_PREFIX,
            self.name,
            now.format("%Y%m%d"),
            self.id
        );
        self.scratch_path = if prefix.is_empty() {
            scratch
        } else {
            format!("{}/{}", prefix, scratch)
        };
        self.sources_path = format!("{}/sources", self.scratch_path);
        self.logs_path = format!("{}/logs", self.scratch_path);
        self.outs_path = format!("{}/outs", self.scratch_path);
        Ok(())
    }

    /// Copy each included child's sources into this workflow's namespace,
    /// resolving relative paths against the child's directory.
    fn bubble_included_sources(&mut self) -> Result<(), WfError> {
        let mut bubbled = Vec::new();
        for step in self.steps.values() {
            let child = match &step.include_workflow {
                Some(include) => match &include.workflow {
                    Some(child) => child,
                    None => continue,
                },
                None => continue,
            };
            for (name, origin) in &child.sources {
                if origin.is_empty() {
                    continue;
                }
                let resolved = if split_gcs_path(origin).is_ok() || Path::new(origin).is_absolute()
                {
                    origin.clone()
                } else {
                    child.workflow_dir.join(origin).display().to_string()
                };
                bubbled.push((name.clone(), resolved));
            }
        }
        for (name, origin) in bubbled {
            if self.sources.contains_key(&name) {
                return Err(WfError::new(
                    ErrorCategory::PopulateError,
                    format!("source \"{}\" already exists in workflow", name),
                ));
            }
            self.sources.insert(name, origin);
        }
        Ok(())
    }

    /// Check required fields, populate, then validate the DAG and every
    /// step. Any failure cancels the workflow's signal before returning.
    pub async fn validate(&mut self) -> Result<(), WfError> {
        if let Err(err) = self.validate_required_fields() {
            self.cancel.cancel();
            return Err(err.with_prefix("error validating workflow"));
        }
        if let Err(err) = self.populate_inner(NestMode::Root).await {
            self.cancel.cancel();
            return Err(err.with_prefix("error populating workflow"));
        }
        if let Err(err) = self.validate_inner() {
            self.cancel.cancel();
            return Err(err);
        }
        Ok(())
    }

    fn validate_required_fields(&self) -> Result<(), WfError> {
        if !workflow_name_re().is_match(&self.name) {
            return Err(WfError::validation(
                "workflow field 'Name' must start with a letter and only contain letters, numbers, and hyphens",
            ));
        }
        if self.project.is_empty() {
            return Err(WfError::validation("workflow field 'Project' cannot be empty"));
        }
        if self.zone.is_empty() {
            return Err(WfError::validation("workflow field 'Zone' cannot be empty"));
        }
        if self.steps.is_empty() {
            return Err(WfError::validation("workflow must have at least one step"));
        }
        Ok(())
    }

    /// Graph and per-step validation, shared by root and nested
    /// workflows. Steps validate in dependency order so cross-step
    /// resource references resolve against already-validated steps.
    pub(crate) fn validate_inner(&mut self) -> Result<(), WfError> {
        if self.validated {
            return Ok(());
        }
        if let Some((token, source)) = find_unresolved(self) {
            return Err(WfError::new(
                ErrorCategory::UnresolvedVarError,
                format!("Unresolved var \"{}\" found in \"{}\"", token, source),
            ));
        }
        self.validate_sources()?;
        let order = executor::validate_dag(self)?;
        let mut steps = std::mem::take(&mut self.steps);
        let mut result = Ok(());
        for name in order {
            let step = steps.get_mut(&name).expect("validated order names a step");
            if let Err(err) = step.validate(self) {
                result = Err(err);
                break;
            }
        }
        self.steps = steps;
        if result.is_ok() {
            self.validated = true;
        }
        result
    }

    fn validate_sources(&self) -> Result<(), WfError> {
        for (name, origin) in &self.sources {
            if origin.is_empty() || split_gcs_path(origin).is_ok() {
                continue;
            }
            let path = if Path::new(origin).is_absolute() {
                Path::new(origin).to_path_buf()
            } else {
                self.workflow_dir.join(origin)
            };
            if !path.exists() {
                return Err(WfError::validation(format!(
                    "source \"{}\": file does not exist: {}",
                    name,
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// Validate, upload sources, execute the DAG, and tear down. Returns
    /// the first step or scheduler error; cleanup always runs once the
    /// DAG has started.
    pub async fn run(&mut self) -> Result<(), WfError> {
        self.validate().await?;
        self.log("workflow started").await;
        let result = async {
            self.upload_sources().await?;
            executor::traverse_dag(self).await
        }
        .await;
        match &result {
            Ok(()) => self.log("workflow completed successfully").await,
            Err(err) => {
                self.cancel.cancel();
                self.log(&format!("error running workflow: {}", err)).await;
            }
        }
        self.cleanup().await;
        result
    }

    /// Upload every source into the scratch area's `sources/` prefix.
    pub(crate) async fn upload_sources(&self) -> Result<(), WfError> {
        if self.sources.is_empty() {
            return Ok(());
        }
        let storage = self.storage_client()?;
        for (name, origin) in &self.sources {
            if origin.is_empty() {
                continue;
            }
            let dst_object = format!("{}/{}", self.sources_path, name);
            if let Ok((src_bucket, src_object)) = split_gcs_path(origin) {
                storage
                    .copy_object(&src_bucket, &src_object, &self.bucket, &dst_object)
                    .await?;
                continue;
            }
            let path = if Path::new(origin).is_absolute() {
                Path::new(origin).to_path_buf()
            } else {
                self.workflow_dir.join(origin)
            };
            let data = tokio::fs::read(&path).await.map_err(|err| {
                WfError::io(format!(
                    "source \"{}\": failed to read {}: {}",
                    name,
                    path.display(),
                    err
                ))
            })?;
            storage
                .write_object(&self.bucket, &dst_object, data)
                .await?;
        }
        Ok(())
    }

    /// Drain cleanup hooks in reverse registration order. Hook failures
    /// are logged and never become the workflow's error.
    pub(crate) async fn cleanup(&self) {
        let hooks: Vec<CleanupHook> = {
            let mut guard = self.cleanup_hooks.lock().unwrap();
            guard.drain(..).rev().collect()
        };
        for hook in hooks {
            if let Err(err) = hook.await {
                tracing::warn!(workflow = %self.name, error = %err, "cleanup hook failed");
                if let Some(writer) = &self.log_writer {
                    let _ = writer
                        .write_line(&format!("[{}]: cleanup error: {}", self.name, err))
                        .await;
                }
            }
        }
    }

    /// Populate, then render the canonical JSON form of the fully
    /// resolved workflow.
    pub async fn canonical_json(&mut self) -> Result<String, WfError> {
        self.populate_inner(NestMode::Root).await?;
        serde_json::to_string_pretty(self).map_err(|err| {
            WfError::new(
                ErrorCategory::SchemaError,
                format!("failed to serialize workflow: {}", err),
            )
        })
    }

    /// Populate, then print the canonical JSON form to stdout.
    pub async fn print(&mut self) -> Result<(), WfError> {
        let rendered = self.canonical_json().await?;
        println!("{}", rendered);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::workflow::steps::sub_workflow::SubWorkflow;
    use crate::core::workflow::steps::test_step::TestStep;
    use crate::core::workflow::steps::include_workflow::IncludeWorkflow;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn test_workflow() -> Workflow {
        let mut w = Workflow::new();
        w.name = "test-wf".to_string();
        w.project = "test-project".to_string();
        w.zone = "test-zone".to_string();
        w.gcs_path = "gs://test-bucket".to_string();
        w
    }

    fn add_test_step(w: &mut Workflow, name: &str, test: TestStep) {
        let step = w.new_step(name).unwrap();
        step.test_step = Some(test);
    }

    #[tokio::test]
    async fn populate_resolves_vars_then_autovars() {
        let mut w = Workflow::new();
        w.name = "${wf_name}".to_string();
        w.project = "bar-project".to_string();
        w.zone = "wf-zone".to_string();
        w.vars.insert(
            "bucket".to_string(),
            crate::core::workflow::schema::Var {
                value: "wf-bucket".to_string(),
                required: true,
                ..Default::default()
            },
        );
        w.add_var("step_name", "step1");
        w.add_var("timeout", "60m");
        w.add_var("wf_name", "wf-name");
        w.add_var("test-var", "${ZONE}-this-should-populate-${NAME}");
        let mut step = crate::core::workflow::step::Step::default();
        step.timeout = "${timeout}".to_string();
        step.test_step = Some(TestStep::default());
        w.steps.insert("${NAME}-${step_name}".to_string(), step);

        w.populate().await.unwrap();

        assert_eq!(w.name, "wf-name");
        assert_eq!(w.gcs_path, "gs://bar-project-daisy-bkt");
        assert_eq!(w.bucket, "bar-project-daisy-bkt");
        assert_eq!(w.vars["test-var"].value, "wf-zone-this-should-populate-wf-name");

        let step = &w.steps["wf-name-step1"];
        assert_eq!(step.name(), "wf-name-step1");
        assert_eq!(step.timeout, "60m");
        assert_eq!(step.parsed_timeout, Duration::from_secs(3600));

        assert!(w.scratch_path.starts_with("daisy-wf-name-"));
        assert!(w.scratch_path.ends_with(&w.id));
        assert_eq!(w.sources_path, format!("{}/sources", w.scratch_path));
        assert_eq!(w.logs_path, format!("{}/logs", w.scratch_path));
        assert_eq!(w.outs_path, format!("{}/outs", w.scratch_path));
        assert_eq!(w.autovars["NAME"], "wf-name");
        assert_eq!(w.autovars["ID"], w.id);
    }

    #[tokio::test]
    async fn populate_is_idempotent() {
        let mut w = test_workflow();
        add_test_step(&mut w, "s0", TestStep::default());
        w.populate().await.unwrap();
        let id = w.id.clone();
        let scratch = w.scratch_path.clone();
        w.populate().await.unwrap();
        assert_eq!(w.id, id);
        assert_eq!(w.scratch_path, scratch);
    }

    #[tokio::test]
    async fn populate_requires_required_vars() {
        let mut w = test_workflow();
        add_test_step(&mut w, "s0", TestStep::default());
        w.vars.insert(
            "needed".to_string(),
            crate::core::workflow::schema::Var {
                required: true,
                ..Default::default()
            },
        );
        let err = w.populate().await.unwrap_err();
        assert_eq!(err.to_string(), "required var \"needed\" is unset");
    }

    #[tokio::test]
    async fn autovars_shadow_user_vars() {
        let mut w = test_workflow();
        w.add_var("NAME", "evil");
        add_test_step(&mut w, "${NAME}-suffix", TestStep::default());
        w.populate().await.unwrap();
        assert!(w.steps.contains_key("test-wf-suffix"));
        assert!(!w.steps.contains_key("evil-suffix"));
    }

    #[tokio::test]
    async fn populate_surfaces_step_populate_errors() {
        let mut w = test_workflow();
        add_test_step(
            &mut w,
            "s0",
            TestStep {
                populate_error: Some("bad populate".to_string()),
                ..Default::default()
            },
        );
        let err = w.populate().await.unwrap_err();
        assert_eq!(err.to_string(), "bad populate");
    }

    #[tokio::test]
    async fn validate_rejects_bad_workflow_names() {
        let mut w = test_workflow();
        w.name = "1".to_string();
        add_test_step(&mut w, "s0", TestStep::default());
        let err = w.validate().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "error validating workflow: workflow field 'Name' must start with a letter and only contain letters, numbers, and hyphens"
        );
        assert!(w.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn validate_reports_populate_errors() {
        let mut w = test_workflow();
        add_test_step(&mut w, "s0", TestStep::default());
        w.steps.get_mut("s0").unwrap().timeout = "10".to_string();
        let err = w.validate().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "error populating workflow: time: missing unit in duration 10"
        );
        assert!(w.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn validate_reports_unresolved_vars() {
        let mut w = test_workflow();
        w.project = "${var}".to_string();
        add_test_step(&mut w, "s0", TestStep::default());
        let err = w.validate().await.unwrap_err();
        assert_eq!(err.to_string(), "Unresolved var \"${var}\" found in \"${var}\"");
        assert!(w.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn run_executes_and_cleans_up() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut w = test_workflow();
        add_test_step(
            &mut w,
            "s0",
            TestStep {
                log: Some(log.clone()),
                register_cleanup: true,
                ..Default::default()
            },
        );
        add_test_step(&mut w, "s1", TestStep::logging(log.clone()));
        w.add_dependency("s1", &["s0"]).unwrap();

        w.run().await.unwrap();
        let calls = log.lock().unwrap().clone();
        assert_eq!(calls, vec!["s0", "s1", "cleanup:s0"]);
        assert!(w.cleanup_hooks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_returns_the_first_step_error_after_cleanup() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut w = test_workflow();
        add_test_step(
            &mut w,
            "s0",
            TestStep {
                log: Some(log.clone()),
                register_cleanup: true,
                ..Default::default()
            },
        );
        add_test_step(
            &mut w,
            "s1",
            TestStep {
                error: Some("failure".to_string()),
                ..Default::default()
            },
        );
        w.add_dependency("s1", &["s0"]).unwrap();

        let err = w.run().await.unwrap_err();
        assert_eq!(err.to_string(), "step \"s1\": failure");
        let calls = log.lock().unwrap().clone();
        assert!(calls.iter().any(|c| c == "cleanup:s0"));
    }

    #[tokio::test]
    async fn include_shares_namespace_and_bubbles_sources() {
        let mut child = Workflow::new();
        child.sources.insert("startup".to_string(), "gs://b/path/obj".to_string());
        let mut child_step = crate::core::workflow::step::Step::default();
        child_step.test_step = Some(TestStep::default());
        child.steps.insert("child-step".to_string(), child_step);

        let mut w = test_workflow();
        let step = w.new_step("include-step").unwrap();
        step.include_workflow = Some(IncludeWorkflow {
            path: String::new(),
            vars: Default::default(),
            workflow: Some(Box::new(child)),
        });

        w.populate().await.unwrap();

        assert_eq!(w.sources["startup"], "gs://b/path/obj");
        let include = w.steps["include-step"].include_workflow.as_ref().unwrap();
        let child = include.workflow.as_deref().unwrap();
        assert_eq!(child.id, w.id);
        assert_eq!(child.bucket, w.bucket);
        assert_eq!(child.scratch_path, w.scratch_path);
        assert_eq!(child.name, "include-step");
        assert_eq!(child.autovars["NAME"], "include-step");
    }

    #[tokio::test]
    async fn include_source_collisions_are_rejected() {
        let mut child = Workflow::new();
        child.sources.insert("startup".to_string(), "gs://b/obj".to_string());

        let mut w = test_workflow();
        w.sources.insert("startup".to_string(), "gs://other/obj".to_string());
        let step = w.new_step("include-step").unwrap();
        step.include_workflow = Some(IncludeWorkflow {
            path: String::new(),
            vars: Default::default(),
            workflow: Some(Box::new(child)),
        });

        let err = w.populate().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "source \"startup\" already exists in workflow"
        );
    }

    #[tokio::test]
    async fn sub_workflows_are_isolated_but_nested_in_scratch() {
        let mut child = Workflow::new();
        let mut child_step = crate::core::workflow::step::Step::default();
        child_step.test_step = Some(TestStep::default());
        child.steps.insert("child-step".to_string(), child_step);

        let mut w = test_workflow();
        let step = w.new_step("sub-step").unwrap();
        step.sub_workflow = Some(SubWorkflow {
            path: String::new(),
            vars: [("key".to_string(), "value".to_string())].into(),
            workflow: Some(Box::new(child)),
        });

        w.populate().await.unwrap();

        let sub = w.steps["sub-step"].sub_workflow.as_ref().unwrap();
        let child = sub.workflow.as_deref().unwrap();
        assert_ne!(child.id, w.id);
        assert_eq!(child.bucket, w.bucket);
        assert!(child.scratch_path.starts_with(&w.scratch_path));
        assert_ne!(child.scratch_path, w.scratch_path);
        assert_eq!(child.vars["key"].value, "value");
        assert!(!w.vars.contains_key("key"));
    }

    #[tokio::test]
    async fn canonical_json_uses_the_published_key_order() {
        let mut w = test_workflow();
        add_test_step(&mut w, "s0", TestStep::default());
        let rendered = w.canonical_json().await.unwrap();
        let name_at = rendered.find("\"Name\"").unwrap();
        let project_at = rendered.find("\"Project\"").unwrap();
        let zone_at = rendered.find("\"Zone\"").unwrap();
        let gcs_at = rendered.find("\"GCSPath\"").unwrap();
        let steps_at = rendered.find("\"Steps\"").unwrap();
        let deps_at = rendered.find("\"Dependencies\"").unwrap();
        assert!(name_at < project_at && project_at < zone_at);
        assert!(zone_at < gcs_at && gcs_at < steps_at && steps_at < deps_at);
        // Steps always render their materialized timeout.
        assert!(rendered.contains("\"Timeout\": \"10m\""));
        // Missing dependencies render as an empty object.
        assert!(rendered.contains("\"Dependencies\": {}"));
    }
}
