use crate::core::error::WfError;
use crate::core::gcp::compute;
use crate::core::types::ErrorCategory;
use crate::core::workflow::name::gen_name;
use crate::core::workflow::schema::Workflow;
use crate::core::workflow::steps::{check_resource_name, is_false, with_cancel, StepAction};
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

const DEFAULT_DISK_TYPE: &str = "pd-standard";

/// CreateDisks step: create one or more persistent disks.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateDisks(pub Vec<DiskSpec>);

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiskSpec {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "SourceImage", default, skip_serializing_if = "String::is_empty")]
    pub source_image: String,
    #[serde(rename = "SizeGb", default, skip_serializing_if = "String::is_empty")]
    pub size_gb: String,
    #[serde(rename = "Type", default, skip_serializing_if = "String::is_empty")]
    pub disk_type: String,
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
impl StepAction for CreateDisks {
    async fn populate(&mut self, step_name: &str, w: &Workflow) -> Result<(), WfError> {
        for disk in &mut self.0 {
            if disk.zone.is_empty() {
                disk.zone = w.zone.clone();
            }
            if disk.disk_type.is_empty() {
                disk.disk_type = DEFAULT_DISK_TYPE.to_string();
            }
            disk.real_name = if disk.exact_name {
                disk.name.clone()
            } else {
                gen_name(&disk.name, &w.name, w.id())
            };
            w.registry
                .disks
                .register(&disk.name, &disk.real_name, &disk.zone, step_name, disk.no_cleanup)?;
        }
        Ok(())
    }

    fn validate(&mut self, step_name: &str, _w: &Workflow) -> Result<(), WfError> {
        for disk in &self.0 {
            check_resource_name("disk", &disk.name)?;
            if disk.source_image.is_empty() && disk.size_gb.is_empty() {
                return Err(WfError::validation(format!(
                    "step \"{}\": disk \"{}\" must provide either SourceImage or SizeGb",
                    step_name, disk.name
                )));
            }
            if !disk.size_gb.is_empty() && disk.size_gb.parse::<i64>().is_err() {
                return Err(WfError::validation(format!(
                    "step \"{}\": disk \"{}\": cannot parse SizeGb \"{}\"",
                    step_name, disk.name, disk.size_gb
                )));
            }
        }
        Ok(())
    }

    async fn run(&self, _step_name: &str, w: &Workflow) -> Result<(), WfError> {
        let client = w.compute_client()?;
        try_join_all(self.0.iter().map(|disk| async move {
            let payload = compute::Disk {
                name: disk.real_name.clone(),
                zone: disk.zone.clone(),
                source_image: disk.source_image.clone(),
                size_gb: disk.size_gb.parse().unwrap_or(0),
                disk_type: disk.disk_type.clone(),
            };
            w.log(&format!("CreateDisks: creating disk \"{}\"", disk.real_name))
                .await;
            with_cancel(w, client.create_disk(&w.project, &payload)).await?;
            w.registry.disks.mark_created(&disk.name);
            if !disk.no_cleanup {
                let client = client.clone();
                let registry = w.registry.clone();
                let project = w.project.clone();
                let zone = disk.zone.clone();
                let logical = disk.name.clone();
                let real = disk.real_name.clone();
                w.add_cleanup_hook(async move {
                    if registry.disks.is_deleted(&logical) {
                        return Ok(());
                    }
                    client
                        .delete_disk(&project, &zone, &real)
                        .await
                        .map_err(|e| {
                            WfError::new(
                                ErrorCategory::CleanupError,
                                format!("failed to delete disk \"{}\": {}", real, e),
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
