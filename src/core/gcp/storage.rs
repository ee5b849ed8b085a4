//! Object-storage contract and the append-on-write log sink.

use crate::core::error::WfError;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Operations the engine requires from the storage service.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Create the bucket if it does not already exist.
    async fn ensure_bucket(&self, project: &str, bucket: &str) -> Result<(), WfError>;
    /// Write an object, replacing any previous contents.
    async fn write_object(&self, bucket: &str, object: &str, data: Vec<u8>)
        -> Result<(), WfError>;
    /// Server-side copy of one object.
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_object: &str,
        dst_bucket: &str,
        dst_object: &str,
    ) -> Result<(), WfError>;
}

/// Split a `gs://bucket/object` URL into bucket and object parts.
pub fn split_gcs_path(path: &str) -> Result<(String, String), WfError> {
    let rest = path.strip_prefix("gs://").ok_or_else(|| {
        WfError::new(
            ErrorCategory::SchemaError,
            format!("\"{}\" is not a valid GCS path", path),
        )
    })?;
    let (bucket, object) = match rest.split_once('/') {
        Some((b, o)) => (b, o.trim_end_matches('/')),
        None => (rest, ""),
    };
    if bucket.is_empty() {
        return Err(WfError::new(
            ErrorCategory::SchemaError,
            format!("\"{}\" is not a valid GCS path", path),
        ));
    }
    Ok((bucket.to_string(), object.to_string()))
}

/// Append-on-write log sink backed by a single storage object.
///
/// Every `write_line` appends to an in-memory buffer and rewrites the
/// backing object with the cumulative contents, so the object always
/// holds the full log so far.
pub struct StorageLogWriter {
    client: Arc<dyn StorageClient>,
    bucket: String,
    object: String,
    buf: Mutex<String>,
}

impl StorageLogWriter {
    pub fn new(client: Arc<dyn StorageClient>, bucket: String, object: String) -> Self {
        StorageLogWriter {
            client,
            bucket,
            object,
            buf: Mutex::new(String::new()),
        }
    }

    pub async fn write_line(&self, line: &str) -> Result<(), WfError> {
        let snapshot = {
            let mut buf = self.buf.lock().unwrap();
            buf.push_str(line);
            buf.push('\n');
            buf.clone()
        };
        self.client
            .write_object(&self.bucket, &self.object, snapshot.into_bytes())
            .await
    }

    /// Cumulative contents written so far.
    pub fn contents(&self) -> String {
        self.buf.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_bucket_and_object() {
        assert_eq!(
            split_gcs_path("gs://some-bucket/images").unwrap(),
            ("some-bucket".to_string(), "images".to_string())
        );
        assert_eq!(
            split_gcs_path("gs://some-bucket").unwrap(),
            ("some-bucket".to_string(), String::new())
        );
        assert_eq!(
            split_gcs_path("gs://b/a/deep/path/").unwrap(),
            ("b".to_string(), "a/deep/path".to_string())
        );
    }

    #[test]
    fn rejects_non_gcs_paths() {
        assert!(split_gcs_path("/local/path").is_err());
        assert!(split_gcs_path("gs://").is_err());
    }
}
