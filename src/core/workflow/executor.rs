//! DAG validation and concurrent traversal.

use crate::core::error::WfError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::schema::Workflow;
use futures::stream::{FuturesUnordered, StreamExt};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Check that every dependency endpoint names a step and that the graph
/// is acyclic. Returns the step names in dependency order.
pub(crate) fn validate_dag(w: &Workflow) -> Result<Vec<String>, WfError> {
    for (step, deps) in &w.dependencies {
        if !w.steps.contains_key(step) {
            return Err(WfError::new(
                ErrorCategory::DependencyError,
                format!("dependencies reference undefined step \"{}\"", step),
            ));
        }
        for dep in deps {
            if !w.steps.contains_key(dep) {
                return Err(WfError::new(
                    ErrorCategory::DependencyError,
                    format!("dependencies reference undefined step \"{}\"", dep),
                ));
            }
        }
    }

    let mut graph = DiGraph::<&str, ()>::new();
    let mut nodes = HashMap::new();
    for name in w.steps.keys() {
        nodes.insert(name.as_str(), graph.add_node(name.as_str()));
    }
    for (step, deps) in &w.dependencies {
        for dep in deps {
            graph.add_edge(nodes[dep.as_str()], nodes[step.as_str()], ());
        }
    }
    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(|n| graph[n].to_string()).collect()),
        Err(cycle) => Err(WfError::new(
            ErrorCategory::DependencyError,
            format!(
                "dependency cycle detected involving step \"{}\"",
                graph[cycle.node_id()]
            ),
        )),
    }
}

/// Execute the workflow's steps concurrently along dependency edges.
///
/// Every step gets its own task; a task starts once all of its
/// dependencies completed successfully. The first error cancels the
/// workflow's signal: queued steps never start, running steps observe
/// the signal through their contexts, and the traversal returns only
/// after every in-flight task has come back.
pub(crate) async fn traverse_dag(w: &Workflow) -> Result<(), WfError> {
    let mut pending: BTreeMap<&str, HashSet<&str>> = w
        .steps
        .keys()
        .map(|name| {
            let deps: HashSet<&str> = w
                .dependencies
                .get(name)
                .map(|d| d.iter().map(String::as_str).collect())
                .unwrap_or_default();
            (name.as_str(), deps)
        })
        .collect();
    let mut running = FuturesUnordered::new();
    let mut first_err: Option<WfError> = None;

    loop {
        if !w.cancel.is_cancelled() {
            let ready: Vec<&str> = pending
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(name, _)| *name)
                .collect();
            for name in ready {
                pending.remove(name);
                let step = &w.steps[name];
                running.push(async move { (name, step.run(w).await) });
            }
        }

        if running.is_empty() {
            if w.cancel.is_cancelled() || pending.is_empty() {
                break;
            }
            // Unreachable after validation; defends against a graph whose
            // remaining steps can never become runnable.
            return Err(WfError::new(
                ErrorCategory::DependencyError,
                "workflow deadlocked: no steps are runnable",
            ));
        }

        let (name, result) = running.next().await.expect("running set is non-empty");
        match result {
            Ok(()) => {
                for deps in pending.values_mut() {
                    deps.remove(name);
                }
            }
            Err(err) => {
                w.cancel.cancel();
                if first_err.is_none() {
                    first_err = Some(err);
                } else {
                    w.log(&format!("error running step \"{}\": {}", name, err)).await;
                }
            }
        }
    }

    if let Some(err) = first_err {
        return Err(err);
    }
    if w.cancel.is_cancelled() {
        return Err(WfError::canceled("workflow canceled"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::workflow::steps::test_step::TestStep;
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
        step.parsed_timeout = Duration::from_secs(60);
        step.timeout = "60s".to_string();
        step.test_step = Some(test);
    }

    fn call_index(log: &[String], name: &str) -> Option<usize> {
        log.iter().position(|entry| entry == name)
    }

    #[test]
    fn dag_validation_rejects_unknown_endpoints() {
        let mut w = test_workflow();
        add_test_step(&mut w, "s0", TestStep::default());
        w.dependencies
            .insert("s0".to_string(), vec!["ghost".to_string()]);
        let err = validate_dag(&w).unwrap_err();
        assert_eq!(
            err.to_string(),
            "dependencies reference undefined step \"ghost\""
        );
    }

    #[test]
    fn dag_validation_rejects_cycles() {
        let mut w = test_workflow();
        add_test_step(&mut w, "s0", TestStep::default());
        add_test_step(&mut w, "s1", TestStep::default());
        w.add_dependency("s0", &["s1"]).unwrap();
        w.add_dependency("s1", &["s0"]).unwrap();
        let err = validate_dag(&w).unwrap_err();
        assert_eq!(err.category, ErrorCategory::DependencyError);
        assert!(err.to_string().starts_with("dependency cycle detected"));
    }

    #[test]
    fn dag_validation_orders_dependencies_first() {
        let mut w = test_workflow();
        for name in ["s0", "s1", "s2"] {
            add_test_step(&mut w, name, TestStep::default());
        }
        w.add_dependency("s2", &["s1"]).unwrap();
        w.add_dependency("s1", &["s0"]).unwrap();
        let order = validate_dag(&w).unwrap();
        assert!(call_index(&order, "s0") < call_index(&order, "s1"));
        assert!(call_index(&order, "s1") < call_index(&order, "s2"));
    }

    #[tokio::test]
    async fn linear_dag_runs_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut w = test_workflow();
        for name in ["s0", "s1", "s2"] {
            add_test_step(&mut w, name, TestStep::logging(log.clone()));
        }
        w.add_dependency("s1", &["s0"]).unwrap();
        w.add_dependency("s2", &["s1"]).unwrap();

        traverse_dag(&w).await.unwrap();
        let calls = log.lock().unwrap().clone();
        assert_eq!(calls, vec!["s0", "s1", "s2"]);
    }

    #[tokio::test]
    async fn diamond_dag_joins_before_the_sink() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut w = test_workflow();
        for name in ["s0", "s1", "s2", "s3"] {
            add_test_step(&mut w, name, TestStep::logging(log.clone()));
        }
        w.add_dependency("s1", &["s0"]).unwrap();
        w.add_dependency("s2", &["s0"]).unwrap();
        w.add_dependency("s3", &["s1", "s2"]).unwrap();

        traverse_dag(&w).await.unwrap();
        let calls = log.lock().unwrap().clone();
        assert_eq!(calls.len(), 4);
        assert_eq!(call_index(&calls, "s0"), Some(0));
        assert!(call_index(&calls, "s3") > call_index(&calls, "s1"));
        assert!(call_index(&calls, "s3") > call_index(&calls, "s2"));
    }

    #[tokio::test]
    async fn mid_run_failure_cancels_downstream_steps() {
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
                log: Some(log.clone()),
                register_cleanup: true,
                ..Default::default()
            },
        );
        add_test_step(
            &mut w,
            "s2",
            TestStep {
                log: Some(log.clone()),
                error: Some("failure".to_string()),
                ..Default::default()
            },
        );
        add_test_step(&mut w, "s3", TestStep::logging(log.clone()));
        w.add_dependency("s1", &["s0"]).unwrap();
        w.add_dependency("s2", &["s0"]).unwrap();
        w.add_dependency("s3", &["s1", "s2"]).unwrap();

        let err = traverse_dag(&w).await.unwrap_err();
        assert_eq!(err.to_string(), "step \"s2\": failure");

        w.cleanup().await;
        let calls = log.lock().unwrap().clone();
        assert!(!calls.iter().any(|c| c == "s3"), "s3 must never start");
        assert_eq!(calls.iter().filter(|c| *c == "cleanup:s0").count(), 1);
        assert_eq!(calls.iter().filter(|c| *c == "cleanup:s1").count(), 1);
    }

    #[tokio::test]
    async fn caller_cancellation_stops_the_workflow() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut w = test_workflow();
        add_test_step(
            &mut w,
            "slow",
            TestStep {
                log: Some(log.clone()),
                delay: Some(Duration::from_secs(30)),
                ..Default::default()
            },
        );
        add_test_step(&mut w, "after", TestStep::logging(log.clone()));
        w.add_dependency("after", &["slow"]).unwrap();

        let token = w.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let err = traverse_dag(&w).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::CanceledError);
        assert!(!log.lock().unwrap().iter().any(|c| c == "after"));
    }

    #[tokio::test]
    async fn cleanup_hooks_run_lifo_and_survive_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let w = test_workflow();
        for name in ["first", "second"] {
            let log = log.clone();
            let name = name.to_string();
            w.add_cleanup_hook(async move {
                log.lock().unwrap().push(name);
                Ok(())
            });
        }
        w.add_cleanup_hook(async { Err(WfError::new(ErrorCategory::CleanupError, "hook failed")) });

        w.cleanup().await;
        let calls = log.lock().unwrap().clone();
        assert_eq!(calls, vec!["second", "first"]);
    }
}
