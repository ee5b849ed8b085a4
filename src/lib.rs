//! Declarative DAG workflow engine for cloud image-build pipelines.
//!
//! A workflow is a JSON document describing a directed acyclic graph of
//! cloud-infrastructure steps (create disks, boot instances, wait on
//! serial-port signals, bake images, copy objects, delete resources, or
//! nest other workflows). The engine parses the document, resolves
//! `${var}` references, validates the graph, provisions ephemeral scratch
//! space, executes steps concurrently along dependency edges, and tears
//! down every resource it created on any terminal path.

pub mod core;

pub use crate::core::error::WfError;
pub use crate::core::workflow::schema::Workflow;

pub type Result<T> = std::result::Result<T, WfError>;
