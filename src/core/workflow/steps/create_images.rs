use crate::core::error::WfError;
use crate::core::gcp::compute;
use crate::core::gcp::storage::split_gcs_path;
use crate::core::types::ErrorCategory;
use crate::core::workflow::name::gen_name;
use crate::core::workflow::schema::Workflow;
use crate::core::workflow::steps::{check_resource_name, is_false, with_cancel, StepAction};
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

/// CreateImages step: bake images from disks or storage files.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateImages(pub Vec<ImageSpec>);

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageSpec {
    #[serde(rename = "Name")]
    pub name: String,
    /// Workflow-local disk name, or a fully-qualified disk URL.
    #[serde(rename = "SourceDisk", default, skip_serializing_if = "String::is_empty")]
    pub source_disk: String,
    /// `gs://` path of a raw image tarball.
    #[serde(rename = "SourceFile", default, skip_serializing_if = "String::is_empty")]
    pub source_file: String,
    #[serde(rename = "NoCleanup", default, skip_serializing_if = "is_false")]
    pub no_cleanup: bool,
    #[serde(rename = "ExactName", default, skip_serializing_if = "is_false")]
    pub exact_name: bool,
    #[serde(skip)]
    pub(crate) real_name: String,
}

impl ImageSpec {
    fn disk_is_local_ref(&self) -> bool {
        !self.source_disk.is_empty() && !self.source_disk.contains('/')
    }
}

#[async_trait]
impl StepAction for CreateImages {
    async fn populate(&mut self, step_name: &str, w: &Workflow) -> Result<(), WfError> {
        for image in &mut self.0 {
            image.real_name = if image.exact_name {
                image.name.clone()
            } else {
                gen_name(&image.name, &w.name, w.id())
            };
            w.registry.images.register(
                &image.name,
                &image.real_name,
                "",
                step_name,
                image.no_cleanup,
            )?;
        }
        Ok(())
    }

    fn validate(&mut self, step_name: &str, w: &Workflow) -> Result<(), WfError> {
        for image in &self.0 {
            check_resource_name("image", &image.name)?;
            match (image.source_disk.is_empty(), image.source_file.is_empty()) {
                (true, true) | (false, false) => {
                    return Err(WfError::validation(format!(
                        "step \"{}\": image \"{}\" must provide either SourceDisk or SourceFile",
                        step_name, image.name
                    )));
                }
                _ => {}
            }
            if image.disk_is_local_ref() && !w.registry.disks.contains(&image.source_disk) {
                return Err(WfError::validation(format!(
                    "step \"{}\": image \"{}\" references undefined disk \"{}\"",
                    step_name, image.name, image.source_disk
                )));
            }
            if !image.source_file.is_empty() {
                split_gcs_path(&image.source_file)?;
            }
        }
        Ok(())
    }

    async fn run(&self, _step_name: &str, w: &Workflow) -> Result<(), WfError> {
        let client = w.compute_client()?;
        try_join_all(self.0.iter().map(|image| async move {
            let source_disk = if image.disk_is_local_ref() {
                w.registry
                    .disks
                    .real_name(&image.source_disk)
                    .unwrap_or_else(|| image.source_disk.clone())
            } else {
                image.source_disk.clone()
            };
            let payload = compute::Image {
                name: image.real_name.clone(),
                source_disk,
                source_file: image.source_file.clone(),
            };
            w.log(&format!(
                "CreateImages: creating image \"{}\"",
                image.real_name
            ))
            .await;
            with_cancel(w, client.create_image(&w.project, &payload)).await?;
            w.registry.images.mark_created(&image.name);
            if !image.no_cleanup {
                let client = client.clone();
                let registry = w.registry.clone();
                let project = w.project.clone();
                let logical = image.name.clone();
                let real = image.real_name.clone();
                w.add_cleanup_hook(async move {
                    if registry.images.is_deleted(&logical) {
                        return Ok(());
                    }
                    client.delete_image(&project, &real).await.map_err(|e| {
                        WfError::new(
                            ErrorCategory::CleanupError,
                            format!("failed to delete image \"{}\": {}", real, e),
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
