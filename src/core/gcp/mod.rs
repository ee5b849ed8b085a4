//! Cloud collaborator contracts consumed by the engine.
//!
//! The engine never talks to an API directly: step variants call these
//! traits, and callers inject real or test implementations.
pub mod compute;
pub mod storage;

pub use compute::ComputeClient;
pub use storage::{split_gcs_path, StorageClient, StorageLogWriter};
