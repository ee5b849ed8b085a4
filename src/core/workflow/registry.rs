//! Per-workflow resource name registries.
//!
//! Steps register the resources they will create during populate (name
//! uniqueness), validate consults the registry for cross-step references,
//! and run marks creation/deletion so cleanup knows what still exists.

use crate::core::error::WfError;
use crate::core::types::ErrorCategory;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Clone, Debug)]
pub struct ResourceEntry {
    pub real_name: String,
    pub zone: String,
    pub step_name: String,
    pub no_cleanup: bool,
    pub created: bool,
    pub deleted: bool,
    pub delete_scheduled: bool,
}

/// One named resource kind (disks, instances, images).
#[derive(Default)]
pub struct ResourceMap {
    kind: &'static str,
    entries: Mutex<HashMap<String, ResourceEntry>>,
}

impl ResourceMap {
    fn new(kind: &'static str) -> Self {
        ResourceMap {
            kind,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a resource under its workflow-local name. Duplicate
    /// registrations are a populate error.
    pub fn register(
        &self,
        name: &str,
        real_name: &str,
        zone: &str,
        step_name: &str,
        no_cleanup: bool,
    ) -> Result<(), WfError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(name) {
            return Err(WfError::new(
                ErrorCategory::PopulateError,
                format!("{} \"{}\" is defined more than once", self.kind, name),
            ));
        }
        entries.insert(
            name.to_string(),
            ResourceEntry {
                real_name: real_name.to_string(),
                zone: zone.to_string(),
                step_name: step_name.to_string(),
                no_cleanup,
                created: false,
                deleted: false,
                delete_scheduled: false,
            },
        );
        Ok(())
    }

    pub fn entry(&self, name: &str) -> Option<ResourceEntry> {
        self.entries.lock().unwrap().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.lock().unwrap().contains_key(name)
    }

    pub fn real_name(&self, name: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .get(name)
            .map(|e| e.real_name.clone())
    }

    pub fn mark_created(&self, name: &str) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(name) {
            entry.created = true;
        }
    }

    /// Record that a delete step will dispose of this resource; a second
    /// delete of the same resource is a validation error.
    pub fn schedule_delete(&self, name: &str) -> Result<(), WfError> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(name).ok_or_else(|| {
            WfError::validation(format!(
                "cannot delete {} \"{}\", not found in workflow",
                self.kind, name
            ))
        })?;
        if entry.delete_scheduled {
            return Err(WfError::validation(format!(
                "{} \"{}\" is already scheduled for deletion",
                self.kind, name
            )));
        }
        entry.delete_scheduled = true;
        Ok(())
    }

    pub fn mark_deleted(&self, name: &str) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(name) {
            entry.deleted = true;
        }
    }

    pub fn is_deleted(&self, name: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(name)
            .map(|e| e.deleted)
            .unwrap_or(false)
    }
}

/// Name registries for every resource kind a workflow can own.
pub struct ResourceRegistry {
    pub disks: ResourceMap,
    pub instances: ResourceMap,
    pub images: ResourceMap,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        ResourceRegistry {
            disks: ResourceMap::new("disk"),
            instances: ResourceMap::new("instance"),
            images: ResourceMap::new("image"),
        }
    }
}
