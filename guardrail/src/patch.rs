//! Two-way strategic merge patch generation
//!
//! Compares the serialized original and mutated objects and keeps only what
//! changed. Changed scalars and objects without a merge key are replaced whole,
//! removed fields are set to `null`, and lists that the schema keys by a field
//! (containers by `name`, volume mounts by `mountPath`, ...) are patched per
//! element so that concurrent additions made by others survive.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::Result;
use crate::error::Error;
use crate::resource::ResourceKind;

/// Strategic merge directive marking a keyed list element for removal
const PATCH_DIRECTIVE: &str = "$patch";

const WORKLOAD_MERGE_KEYS: &[(&str, &str)] = &[
    ("metadata.ownerReferences", "uid"),
    ("spec.template.spec.containers", "name"),
    ("spec.template.spec.containers.env", "name"),
    ("spec.template.spec.containers.ports", "containerPort"),
    ("spec.template.spec.containers.volumeMounts", "mountPath"),
    ("spec.template.spec.initContainers", "name"),
    ("spec.template.spec.initContainers.env", "name"),
    ("spec.template.spec.initContainers.ports", "containerPort"),
    ("spec.template.spec.initContainers.volumeMounts", "mountPath"),
    ("spec.template.spec.volumes", "name"),
    ("spec.template.spec.imagePullSecrets", "name"),
];

const ROUTE_MERGE_KEYS: &[(&str, &str)] = &[("metadata.ownerReferences", "uid")];

const ENDPOINT_MERGE_KEYS: &[(&str, &str)] = &[
    ("metadata.ownerReferences", "uid"),
    ("spec.ports", "port"),
];

/// Which list fields merge by key, addressed by dotted path
///
/// List elements do not add a path segment: the volume mounts of every
/// container live at `spec.template.spec.containers.volumeMounts`.
#[derive(Debug, Clone, Copy)]
pub struct SchemaHints {
    merge_keys: &'static [(&'static str, &'static str)],
}

impl SchemaHints {
    pub const fn for_kind(kind: ResourceKind) -> Self {
        let merge_keys = match kind {
            ResourceKind::Workload => WORKLOAD_MERGE_KEYS,
            ResourceKind::Route => ROUTE_MERGE_KEYS,
            ResourceKind::Endpoint => ENDPOINT_MERGE_KEYS,
        };
        Self { merge_keys }
    }

    /// Hints without any keyed list: every changed list is replaced
    pub const fn none() -> Self {
        Self { merge_keys: &[] }
    }

    pub fn merge_key(&self, path: &str) -> Option<&'static str> {
        self.merge_keys
            .iter()
            .find(|(field, _)| *field == path)
            .map(|(_, key)| *key)
    }
}

/// Partial document holding only the changed fields of an object
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PatchDocument(Map<String, Value>);

impl PatchDocument {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Makes the patch apply only to the given object revision
    ///
    /// The store rejects the patch with a conflict once the object moved on.
    #[must_use]
    pub fn with_precondition(mut self, resource_version: &str) -> Self {
        let metadata = self
            .0
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(metadata) = metadata {
            metadata.insert(
                "resourceVersion".to_string(),
                Value::String(resource_version.to_string()),
            );
        }
        self
    }

    /// Number of leaf values carried by the patch
    pub fn len(&self) -> usize {
        fn leaves(value: &Value) -> usize {
            match value {
                Value::Object(map) => map.values().map(leaves).sum(),
                Value::Array(items) => items.iter().map(leaves).sum(),
                _ => 1,
            }
        }
        self.0.values().map(leaves).sum()
    }
}

/// Computes the patch that turns `original` into `mutated`
///
/// The result is empty exactly when both serialize to the same document.
pub fn compute_patch<T: Serialize>(
    original: &T,
    mutated: &T,
    hints: &SchemaHints,
) -> Result<PatchDocument> {
    let original = serde_json::to_value(original)?;
    let mutated = serde_json::to_value(mutated)?;
    compute_value_patch(&original, &mutated, hints)
}

/// [`compute_patch`] over already serialized objects
pub fn compute_value_patch(
    original: &Value,
    mutated: &Value,
    hints: &SchemaHints,
) -> Result<PatchDocument> {
    let (Value::Object(original), Value::Object(mutated)) = (original, mutated) else {
        return Err(Error::PatchComputationError(
            "objects must serialize to JSON maps".to_string(),
        ));
    };

    check_identity(original, mutated)?;
    Ok(PatchDocument(diff_maps(original, mutated, "", hints)))
}

fn check_identity(original: &Map<String, Value>, mutated: &Map<String, Value>) -> Result<()> {
    let field = |map: &Map<String, Value>, path: &[&str]| -> Option<Value> {
        let mut value = map.get(path[0])?;
        for segment in &path[1..] {
            value = value.get(segment)?;
        }
        Some(value.clone())
    };

    for path in [
        &["kind"][..],
        &["metadata", "name"][..],
        &["metadata", "namespace"][..],
    ] {
        if field(original, path) != field(mutated, path) {
            return Err(Error::PatchComputationError(format!(
                "identity field {} changed",
                path.join(".")
            )));
        }
    }

    Ok(())
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn diff_maps(
    original: &Map<String, Value>,
    mutated: &Map<String, Value>,
    path: &str,
    hints: &SchemaHints,
) -> Map<String, Value> {
    let mut patch = Map::new();

    for (key, new) in mutated {
        match original.get(key) {
            None if new.is_null() => {}
            None => {
                patch.insert(key.clone(), new.clone());
            }
            Some(old) if old == new => {}
            Some(old) => {
                if let Some(change) = diff_values(old, new, &child_path(path, key), hints) {
                    patch.insert(key.clone(), change);
                }
            }
        }
    }

    for key in original.keys() {
        if !mutated.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }

    patch
}

fn diff_values(old: &Value, new: &Value, path: &str, hints: &SchemaHints) -> Option<Value> {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => {
            let patch = diff_maps(old, new, path, hints);
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        (Value::Array(old), Value::Array(new)) => match hints.merge_key(path) {
            Some(merge_key) => diff_keyed_lists(old, new, merge_key, path, hints),
            None => Some(Value::Array(new.clone())),
        },
        _ => Some(new.clone()),
    }
}

/// Indexes list elements by their merge key
///
/// `None` when an element is not an object, lacks the key, or repeats it; such
/// lists cannot be merged by key and are replaced instead.
fn index_by_key<'a>(
    items: &'a [Value],
    merge_key: &str,
) -> Option<Vec<(&'a Value, &'a Map<String, Value>)>> {
    let mut index: Vec<(&Value, &Map<String, Value>)> = Vec::with_capacity(items.len());
    for item in items {
        let element = item.as_object()?;
        let key = element.get(merge_key)?;
        if index.iter().any(|(seen, _)| *seen == key) {
            return None;
        }
        index.push((key, element));
    }
    Some(index)
}

fn diff_keyed_lists(
    old: &[Value],
    new: &[Value],
    merge_key: &str,
    path: &str,
    hints: &SchemaHints,
) -> Option<Value> {
    let (Some(old_index), Some(new_index)) =
        (index_by_key(old, merge_key), index_by_key(new, merge_key))
    else {
        return Some(Value::Array(new.to_vec()));
    };

    let mut items = Vec::new();

    for (key, element) in &new_index {
        match old_index.iter().find(|(old_key, _)| old_key == key) {
            None => items.push(Value::Object((*element).clone())),
            Some((_, old_element)) if old_element == element => {}
            Some((_, old_element)) => {
                let mut change = diff_maps(old_element, element, path, hints);
                change.insert(merge_key.to_string(), (*key).clone());
                items.push(Value::Object(change));
            }
        }
    }

    for (key, _) in &old_index {
        if !new_index.iter().any(|(new_key, _)| new_key == key) {
            let mut removal = Map::new();
            removal.insert(merge_key.to_string(), (*key).clone());
            removal.insert(
                PATCH_DIRECTIVE.to_string(),
                Value::String("delete".to_string()),
            );
            items.push(Value::Object(removal));
        }
    }

    (!items.is_empty()).then_some(Value::Array(items))
}
