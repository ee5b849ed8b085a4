use crate::core::error::WfError;
use crate::core::gcp::storage::split_gcs_path;
use crate::core::workflow::schema::Workflow;
use crate::core::workflow::steps::{with_cancel, StepAction};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// CopyGCSObjects step: server-side object copies between `gs://` paths.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CopyGCSObjects(pub Vec<GCSCopy>);

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GCSCopy {
    #[serde(rename = "Source")]
    pub source: String,
    #[serde(rename = "Destination")]
    pub destination: String,
}

#[async_trait]
impl StepAction for CopyGCSObjects {
    async fn populate(&mut self, _step_name: &str, _w: &Workflow) -> Result<(), WfError> {
        Ok(())
    }

    fn validate(&mut self, step_name: &str, _w: &Workflow) -> Result<(), WfError> {
        for copy in &self.0 {
            split_gcs_path(&copy.source)
                .map_err(|e| e.with_prefix(&format!("step \"{}\": Source", step_name)))?;
            split_gcs_path(&copy.destination)
                .map_err(|e| e.with_prefix(&format!("step \"{}\": Destination", step_name)))?;
        }
        Ok(())
    }

    async fn run(&self, _step_name: &str, w: &Workflow) -> Result<(), WfError> {
        let client = w.storage_client()?;
        for copy in &self.0 {
            let (src_bucket, src_object) = split_gcs_path(&copy.source)?;
            let (dst_bucket, dst_object) = split_gcs_path(&copy.destination)?;
            w.log(&format!(
                "CopyGCSObjects: copying {} to {}",
                copy.source, copy.destination
            ))
            .await;
            with_cancel(
                w,
                client.copy_object(&src_bucket, &src_object, &dst_bucket, &dst_object),
            )
            .await?;
        }
        Ok(())
    }
}
