use crate::core::error::WfError;
use crate::core::workflow::schema::Workflow;
use crate::core::workflow::steps::{with_cancel, StepAction};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// DeleteResources step: dispose of named workflow resources early.
/// Deleted resources are marked in the registry so cleanup skips them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteResources {
    #[serde(rename = "Instances", default, skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<String>,
    #[serde(rename = "Disks", default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<String>,
    #[serde(rename = "Images", default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

#[async_trait]
impl StepAction for DeleteResources {
    async fn populate(&mut self, _step_name: &str, _w: &Workflow) -> Result<(), WfError> {
        Ok(())
    }

    fn validate(&mut self, step_name: &str, w: &Workflow) -> Result<(), WfError> {
        let prefix = |e: WfError| e.with_prefix(&format!("step \"{}\"", step_name));
        for name in &self.instances {
            w.registry.instances.schedule_delete(name).map_err(prefix)?;
        }
        for name in &self.disks {
            w.registry.disks.schedule_delete(name).map_err(prefix)?;
        }
        for name in &self.images {
            w.registry.images.schedule_delete(name).map_err(prefix)?;
        }
        Ok(())
    }

    async fn run(&self, _step_name: &str, w: &Workflow) -> Result<(), WfError> {
        let client = w.compute_client()?;

        // Instances first so their disks detach before disk deletion.
        for name in &self.instances {
            if let Some(entry) = w.registry.instances.entry(name) {
                w.log(&format!(
                    "DeleteResources: deleting instance \"{}\"",
                    entry.real_name
                ))
                .await;
                with_cancel(
                    w,
                    client.delete_instance(&w.project, &entry.zone, &entry.real_name),
                )
                .await?;
                w.registry.instances.mark_deleted(name);
            }
        }
        for name in &self.disks {
            if let Some(entry) = w.registry.disks.entry(name) {
                w.log(&format!(
                    "DeleteResources: deleting disk \"{}\"",
                    entry.real_name
                ))
                .await;
                with_cancel(
                    w,
                    client.delete_disk(&w.project, &entry.zone, &entry.real_name),
                )
                .await?;
                w.registry.disks.mark_deleted(name);
            }
        }
        for name in &self.images {
            if let Some(entry) = w.registry.images.entry(name) {
                w.log(&format!(
                    "DeleteResources: deleting image \"{}\"",
                    entry.real_name
                ))
                .await;
                with_cancel(w, client.delete_image(&w.project, &entry.real_name)).await?;
                w.registry.images.mark_deleted(name);
            }
        }
        Ok(())
    }
}
