//! In-memory cloud clients shared by the integration tests.

use async_trait::async_trait;
use gantry::core::gcp::compute::{ComputeClient, Disk, Image, Instance, SerialOutput};
use gantry::core::gcp::storage::StorageClient;
use gantry::WfError;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Records every compute call; creations and deletions always succeed.
#[derive(Default)]
pub struct MockCompute {
    pub calls: Mutex<Vec<String>>,
    /// Text returned by every serial-port read.
    pub serial_text: Mutex<String>,
}

impl MockCompute {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ComputeClient for MockCompute {
    async fn create_disk(&self, _project: &str, disk: &Disk) -> Result<(), WfError> {
        self.record(format!("create_disk:{}", disk.name));
        Ok(())
    }

    async fn delete_disk(&self, _project: &str, _zone: &str, name: &str) -> Result<(), WfError> {
        self.record(format!("delete_disk:{}", name));
        Ok(())
    }

    async fn create_instance(&self, _project: &str, instance: &Instance) -> Result<(), WfError> {
        self.record(format!("create_instance:{}", instance.name));
        Ok(())
    }

    async fn delete_instance(
        &self,
        _project: &str,
        _zone: &str,
        name: &str,
    ) -> Result<(), WfError> {
        self.record(format!("delete_instance:{}", name));
        Ok(())
    }

    async fn instance_stopped(
        &self,
        _project: &str,
        _zone: &str,
        name: &str,
    ) -> Result<bool, WfError> {
        self.record(format!("instance_stopped:{}", name));
        Ok(true)
    }

    async fn serial_port_output(
        &self,
        _project: &str,
        _zone: &str,
        name: &str,
        _port: i64,
        start: i64,
    ) -> Result<SerialOutput, WfError> {
        self.record(format!("serial_port_output:{}", name));
        let contents = self.serial_text.lock().unwrap().clone();
        let next = start + contents.len() as i64;
        Ok(SerialOutput { contents, next })
    }

    async fn create_image(&self, _project: &str, image: &Image) -> Result<(), WfError> {
        self.record(format!("create_image:{}", image.name));
        Ok(())
    }

    async fn delete_image(&self, _project: &str, name: &str) -> Result<(), WfError> {
        self.record(format!("delete_image:{}", name));
        Ok(())
    }
}

/// In-memory object store keyed by `bucket/object`.
#[derive(Default)]
pub struct MockStorage {
    pub buckets: Mutex<Vec<String>>,
    pub objects: Mutex<BTreeMap<String, Vec<u8>>>,
    pub copies: Mutex<Vec<(String, String)>>,
}

impl MockStorage {
    pub fn object(&self, bucket: &str, object: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&format!("{}/{}", bucket, object))
            .cloned()
    }

    pub fn object_names(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl StorageClient for MockStorage {
    async fn ensure_bucket(&self, _project: &str, bucket: &str) -> Result<(), WfError> {
        let mut buckets = self.buckets.lock().unwrap();
        if !buckets.iter().any(|b| b == bucket) {
            buckets.push(bucket.to_string());
        }
        Ok(())
    }

    async fn write_object(
        &self,
        bucket: &str,
        object: &str,
        data: Vec<u8>,
    ) -> Result<(), WfError> {
        self.objects
            .lock()
            .unwrap()
            .insert(format!("{}/{}", bucket, object), data);
        Ok(())
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_object: &str,
        dst_bucket: &str,
        dst_object: &str,
    ) -> Result<(), WfError> {
        let src = format!("{}/{}", src_bucket, src_object);
        let dst = format!("{}/{}", dst_bucket, dst_object);
        let mut objects = self.objects.lock().unwrap();
        let data = objects.get(&src).cloned().unwrap_or_default();
        objects.insert(dst.clone(), data);
        self.copies.lock().unwrap().push((src, dst));
        Ok(())
    }
}
