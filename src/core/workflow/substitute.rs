//! Variable substitution over the workflow tree.
//!
//! [`Substitute`] is a visitor defined over the document model: it hands
//! every reachable string field and every string map key to a callback,
//! recursing through records, sequences, and maps but never into nested
//! child workflows (those populate themselves). Fields are classed as
//! identifier-like or free-form; unresolved `${token}` references are an
//! error only in identifier-like positions, free-form text passes
//! through as literals.

use crate::core::workflow::schema::{Var, Workflow};
use crate::core::workflow::step::Step;
use crate::core::workflow::steps::copy_gcs_objects::{CopyGCSObjects, GCSCopy};
use crate::core::workflow::steps::create_disks::{CreateDisks, DiskSpec};
use crate::core::workflow::steps::create_images::{CreateImages, ImageSpec};
use crate::core::workflow::steps::create_instances::{CreateInstances, InstanceSpec};
use crate::core::workflow::steps::delete_resources::DeleteResources;
use crate::core::workflow::steps::include_workflow::IncludeWorkflow;
use crate::core::workflow::steps::sub_workflow::SubWorkflow;
use crate::core::workflow::steps::wait_for_instances_signal::{
    InstanceSignal, SerialOutputSpec, WaitForInstancesSignal,
};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldClass {
    /// Identifiers, names, paths: a leftover `${token}` here is an error.
    Ident,
    /// Free-form text (metadata values, descriptions, serial matches):
    /// unknown tokens pass through.
    Free,
}

pub type Visitor<'a> = dyn FnMut(&mut String, FieldClass) + 'a;

/// Visitor over every substitutable string in a value.
pub trait Substitute {
    fn walk(&mut self, visit: &mut Visitor<'_>);
}

impl Substitute for String {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        visit(self, FieldClass::Ident);
    }
}

impl<T: Substitute> Substitute for Option<T> {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        if let Some(value) = self {
            value.walk(visit);
        }
    }
}

impl<T: Substitute> Substitute for Vec<T> {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        for item in self {
            item.walk(visit);
        }
    }
}

impl<T: Substitute> Substitute for BTreeMap<String, T> {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        let entries = std::mem::take(self);
        for (mut key, mut value) in entries {
            visit(&mut key, FieldClass::Ident);
            value.walk(visit);
            self.insert(key, value);
        }
    }
}

/// Metadata-style map: keys are identifiers, values are free-form.
fn walk_free_map(map: &mut HashMap<String, String>, visit: &mut Visitor<'_>) {
    let entries = std::mem::take(map);
    for (mut key, mut value) in entries {
        visit(&mut key, FieldClass::Ident);
        visit(&mut value, FieldClass::Free);
        map.insert(key, value);
    }
}

impl Substitute for Var {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        visit(&mut self.value, FieldClass::Ident);
        visit(&mut self.description, FieldClass::Free);
    }
}

impl Substitute for Workflow {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        visit(&mut self.name, FieldClass::Ident);
        visit(&mut self.project, FieldClass::Ident);
        visit(&mut self.zone, FieldClass::Ident);
        visit(&mut self.gcs_path, FieldClass::Ident);
        self.oauth_path.walk(visit);
        self.vars.walk(visit);
        self.sources.walk(visit);
        self.steps.walk(visit);
        self.dependencies.walk(visit);
    }
}

impl Substitute for Step {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        visit(&mut self.timeout, FieldClass::Ident);
        self.create_disks.walk(visit);
        self.create_instances.walk(visit);
        self.wait_for_instances_signal.walk(visit);
        self.create_images.walk(visit);
        self.delete_resources.walk(visit);
        self.copy_gcs_objects.walk(visit);
        self.sub_workflow.walk(visit);
        self.include_workflow.walk(visit);
    }
}

impl Substitute for CreateDisks {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        self.0.walk(visit);
    }
}

impl Substitute for DiskSpec {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        visit(&mut self.name, FieldClass::Ident);
        visit(&mut self.source_image, FieldClass::Ident);
        visit(&mut self.size_gb, FieldClass::Ident);
        visit(&mut self.disk_type, FieldClass::Ident);
        visit(&mut self.zone, FieldClass::Ident);
    }
}

impl Substitute for CreateInstances {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        self.0.walk(visit);
    }
}

impl Substitute for InstanceSpec {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        visit(&mut self.name, FieldClass::Ident);
        self.disks.walk(visit);
        visit(&mut self.machine_type, FieldClass::Ident);
        visit(&mut self.startup_script, FieldClass::Ident);
        walk_free_map(&mut self.metadata, visit);
        visit(&mut self.zone, FieldClass::Ident);
    }
}

impl Substitute for WaitForInstancesSignal {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        self.0.walk(visit);
    }
}

impl Substitute for InstanceSignal {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        visit(&mut self.name, FieldClass::Ident);
        visit(&mut self.interval, FieldClass::Ident);
        self.serial_output.walk(visit);
    }
}

impl Substitute for SerialOutputSpec {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        visit(&mut self.success_match, FieldClass::Free);
        visit(&mut self.failure_match, FieldClass::Free);
    }
}

impl Substitute for CreateImages {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        self.0.walk(visit);
    }
}

impl Substitute for ImageSpec {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        visit(&mut self.name, FieldClass::Ident);
        visit(&mut self.source_disk, FieldClass::Ident);
        visit(&mut self.source_file, FieldClass::Ident);
    }
}

impl Substitute for DeleteResources {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        self.instances.walk(visit);
        self.disks.walk(visit);
        self.images.walk(visit);
    }
}

impl Substitute for CopyGCSObjects {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        self.0.walk(visit);
    }
}

impl Substitute for GCSCopy {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        visit(&mut self.source, FieldClass::Ident);
        visit(&mut self.destination, FieldClass::Ident);
    }
}

// Nested child workflows are deliberately not walked; they substitute
// themselves during their own populate.
impl Substitute for SubWorkflow {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        visit(&mut self.path, FieldClass::Ident);
        self.vars.walk(visit);
    }
}

impl Substitute for IncludeWorkflow {
    fn walk(&mut self, visit: &mut Visitor<'_>) {
        visit(&mut self.path, FieldClass::Ident);
        self.vars.walk(visit);
    }
}

/// Ordered, single-pass string replacer. Patterns are tried left to
/// right at each position; replacement text is never re-scanned, so
/// substitution terminates even for self-referential values.
pub struct Replacer {
    pairs: Vec<(String, String)>,
}

impl Replacer {
    pub fn new(pairs: Vec<(String, String)>) -> Replacer {
        Replacer { pairs }
    }

    pub fn replace(&self, s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        let mut rest = s;
        'scan: while !rest.is_empty() {
            for (pattern, replacement) in &self.pairs {
                if !pattern.is_empty() && rest.starts_with(pattern.as_str()) {
                    out.push_str(replacement);
                    rest = &rest[pattern.len()..];
                    continue 'scan;
                }
            }
            let ch = rest.chars().next().unwrap();
            out.push(ch);
            rest = &rest[ch.len_utf8()..];
        }
        out
    }

    /// Apply the replacement table over every substitutable string.
    pub fn apply<T: Substitute>(&self, value: &mut T) {
        value.walk(&mut |s, _| {
            let replaced = self.replace(s);
            if replaced != *s {
                *s = replaced;
            }
        });
    }
}

fn var_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{[A-Za-z_][A-Za-z0-9_]*\}").unwrap())
}

/// Find the first `${token}` left in an identifier-like position, along
/// with the string it appears in.
pub fn find_unresolved<T: Substitute>(value: &mut T) -> Option<(String, String)> {
    let mut found = None;
    value.walk(&mut |s, class| {
        if found.is_some() || class == FieldClass::Free {
            return;
        }
        if let Some(m) = var_token_re().find(s) {
            found = Some((m.as_str().to_string(), s.clone()));
        }
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(k: &str, v: &str) -> (String, String) {
        (format!("${{{}}}", k), v.to_string())
    }

    #[test]
    fn replaces_left_to_right_without_rescanning() {
        let r = Replacer::new(vec![pair("a", "${b}"), pair("b", "nope")]);
        // The replacement text is not re-scanned.
        assert_eq!(r.replace("x-${a}-y"), "x-${b}-y");
    }

    #[test]
    fn earlier_pairs_win() {
        let r = Replacer::new(vec![pair("a", "first"), pair("a", "second")]);
        assert_eq!(r.replace("${a}"), "first");
    }

    #[test]
    fn substitutes_map_keys_and_values() {
        let mut map: BTreeMap<String, String> = BTreeMap::new();
        map.insert("${k}-step".to_string(), "${v}".to_string());
        let r = Replacer::new(vec![pair("k", "boot"), pair("v", "disk")]);
        r.apply(&mut map);
        assert_eq!(map.get("boot-step").map(String::as_str), Some("disk"));
    }

    #[test]
    fn unresolved_detection_reports_token_and_string() {
        let mut w = Workflow::new();
        w.project = "${var}".to_string();
        let (token, source) = find_unresolved(&mut w).unwrap();
        assert_eq!(token, "${var}");
        assert_eq!(source, "${var}");
    }

    #[test]
    fn free_form_fields_keep_unknown_tokens() {
        let mut spec = SerialOutputSpec {
            port: 1,
            success_match: "done ${not_a_var}".to_string(),
            failure_match: String::new(),
        };
        assert!(find_unresolved(&mut spec).is_none());
        let r = Replacer::new(vec![pair("x", "y")]);
        r.apply(&mut spec);
        assert_eq!(spec.success_match, "done ${not_a_var}");
    }
}
