//! Compute-service contract: the resource shapes the engine materializes
//! and the operations step variants invoke on them.

use crate::core::error::WfError;
use async_trait::async_trait;
use std::collections::HashMap;

/// A disk as handed to the compute service.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Disk {
    pub name: String,
    pub zone: String,
    pub source_image: String,
    pub size_gb: i64,
    pub disk_type: String,
}

/// An instance as handed to the compute service. `disks` carries the
/// fully-resolved names of the disks to attach, in attach order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Instance {
    pub name: String,
    pub zone: String,
    pub machine_type: String,
    pub disks: Vec<String>,
    pub metadata: HashMap<String, String>,
}

/// An image as handed to the compute service. Exactly one of
/// `source_disk` / `source_file` is set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Image {
    pub name: String,
    pub source_disk: String,
    pub source_file: String,
}

/// A chunk of serial-port output, plus the offset to resume reading from.
#[derive(Clone, Debug, Default)]
pub struct SerialOutput {
    pub contents: String,
    pub next: i64,
}

/// Operations the engine requires from the compute service.
#[async_trait]
pub trait ComputeClient: Send + Sync {
    async fn create_disk(&self, project: &str, disk: &Disk) -> Result<(), WfError>;
    async fn delete_disk(&self, project: &str, zone: &str, name: &str) -> Result<(), WfError>;

    async fn create_instance(&self, project: &str, instance: &Instance) -> Result<(), WfError>;
    async fn delete_instance(&self, project: &str, zone: &str, name: &str) -> Result<(), WfError>;
    async fn instance_stopped(&self, project: &str, zone: &str, name: &str)
        -> Result<bool, WfError>;
    async fn serial_port_output(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        port: i64,
        start: i64,
    ) -> Result<SerialOutput, WfError>;

    async fn create_image(&self, project: &str, image: &Image) -> Result<(), WfError>;
    async fn delete_image(&self, project: &str, name: &str) -> Result<(), WfError>;
}
