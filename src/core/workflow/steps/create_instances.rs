use crate::core::error::WfError;
use crate::core::gcp::compute;
use crate::core::types::ErrorCategory;
use crate::core::workflow::name::gen_name;
use crate::core::workflow::schema::Workflow;
use crate::core::workflow::steps::{check_resource_name, is_false, with_cancel, StepAction};
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const DEFAULT_MACHINE_TYPE: &str = "n1-standard-1";
const STARTUP_SCRIPT_KEY: &str = "startup-script-url";

/// CreateInstances step: boot one or more instances on previously
/// created disks.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateInstances(pub Vec<InstanceSpec>);

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceSpec {
    #[serde(rename = "Name")]
    pub name: String,
    /// Workflow-local names of the disks to attach, in attach order; the
    /// first disk is the boot disk.
    #[serde(rename = "Disks", default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<String>,
    #[serde(rename = "MachineType", default, skip_serializing_if = "String::is_empty")]
    pub machine_type: String,
    /// Name of a workflow source uploaded to scratch and served to the
    /// instance as its startup script.
    #[serde(
        rename = "StartupScript",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub startup_script: String,
    #[serde(rename = "Metadata", default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    #[serde(rename = "Zone", default, skip_serializing_if = "String::is_empty")]
    pub zone: String,
    #[serde(rename = "NoCleanup", default, skip_serializing_if = "is_false")]
    pub no_cleanup: bool,
    #[serde(rename = "ExactName", default, skip_serializing_if = "is_false")]
    pub exact_name: bool,
    #[serde(skip)]
    pub(crate) real_name: String,
}

#[async_trait]
impl StepAction for CreateInstances {
    async fn populate(&mut self, step_name: &str, w: &Workflow) -> Result<(), WfError> {
        for instance in &mut self.0 {
            if instance.zone.is_empty() {
                instance.zone = w.zone.clone();
            }
            if instance.machine_type.is_empty() {
                instance.machine_type = DEFAULT_MACHINE_TYPE.to_string();
            }
            instance.real_name = if instance.exact_name {
                instance.name.clone()
            } else {
                gen_name(&instance.name, &w.name, w.id())
            };
            if !instance.startup_script.is_empty() {
                let url = w.gs_url(&format!("{}/{}", w.sources_path, instance.startup_script));
                instance
                    .metadata
                    .insert(STARTUP_SCRIPT_KEY.to_string(), url);
            }
            w.registry.instances.register(
                &instance.name,
                &instance.real_name,
                &instance.zone,
                step_name,
                instance.no_cleanup,
            )?;
        }
        Ok(())
    }

    fn validate(&mut self, step_name: &str, w: &Workflow) -> Result<(), WfError> {
        for instance in &self.0 {
            check_resource_name("instance", &instance.name)?;
            if instance.disks.is_empty() {
                return Err(WfError::validation(format!(
                    "step \"{}\": instance \"{}\" must attach at least one disk",
                    step_name, instance.name
                )));
            }
            for disk in &instance.disks {
                if !w.registry.disks.contains(disk) {
                    return Err(WfError::validation(format!(
                        "step \"{}\": instance \"{}\" references undefined disk \"{}\"",
                        step_name, instance.name, disk
                    )));
                }
            }
            if !instance.startup_script.is_empty()
                && !w.sources.contains_key(&instance.startup_script)
            {
                return Err(WfError::validation(format!(
                    "step \"{}\": instance \"{}\" startup script \"{}\" is not a workflow source",
                    step_name, instance.name, instance.startup_script
                )));
            }
        }
        Ok(())
    }

    async fn run(&self, _step_name: &str, w: &Workflow) -> Result<(), WfError> {
        let client = w.compute_client()?;
        try_join_all(self.0.iter().map(|instance| async move {
            let attached = instance
                .disks
                .iter()
                .map(|d| w.registry.disks.real_name(d).unwrap_or_else(|| d.clone()))
                .collect();
            let payload = compute::Instance {
                name: instance.real_name.clone(),
                zone: instance.zone.clone(),
                machine_type: instance.machine_type.clone(),
                disks: attached,
                metadata: instance.metadata.clone(),
            };
            w.log(&format!(
                "CreateInstances: creating instance \"{}\"",
                instance.real_name
            ))
            .await;
            with_cancel(w, client.create_instance(&w.project, &payload)).await?;
            w.registry.instances.mark_created(&instance.name);
            if !instance.no_cleanup {
                let client = client.clone();
                let registry = w.registry.clone();
                let project = w.project.clone();
                let zone = instance.zone.clone();
                let logical = instance.name.clone();
                let real = instance.real_name.clone();
                w.add_cleanup_hook(async move {
                    if registry.instances.is_deleted(&logical) {
                        return Ok(());
                    }
                    client
                        .delete_instance(&project, &zone, &real)
                        .await
                        .map_err(|e| {
                            WfError::new(
                                ErrorCategory::CleanupError,
                                format!("failed to delete instance \"{}\": {}", real, e),
                            )
                        })
                });
            }
            Ok(())
        }))
        .await?;
        Ok(())
    }
}
