//! Path-addressed attribute storage.
//!
//! Attributes are a JSON tree keyed at the top level by attribute name. Nested
//! values are addressed with `/`-delimited paths (`"attrs/body/fill"`) or
//! segment lists; numeric segments address array items.
//!
//! Writes merge by default: setting `a/b/c` leaves a sibling `a/b/d` intact.
//! Pass [`SetOptions::rewrite`] to replace the value at the path instead.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{GraphError, GraphResult};

/// Delimiter between path segments.
pub const PATH_DELIMITER: char = '/';

/// Largest array index a write may address.
///
/// Writing past the end of an array pads it with nulls, so the index is
/// bounded to keep a single path from allocating without limit.
pub const MAX_ARRAY_INDEX: usize = 65_535;

/// A route into the attribute tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttrPath {
    segments: Vec<String>,
}

impl AttrPath {
    /// Parse a `/`-delimited path.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path.split(PATH_DELIMITER).map(str::to_owned).collect(),
        }
    }

    /// Build a path from individual segments.
    ///
    /// An empty segment list addresses the empty top-level key.
    #[must_use]
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Self {
                segments: vec![String::new()],
            };
        }
        Self { segments }
    }

    /// The same path nested under `prefix` (e.g. `attrs`).
    #[must_use]
    pub fn prefixed(&self, prefix: &str) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.push(prefix.to_owned());
        segments.extend(self.segments.iter().cloned());
        Self { segments }
    }

    /// All segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The top-level attribute key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.segments[0]
    }

    /// Segments below the top-level key.
    #[must_use]
    pub fn nested(&self) -> &[String] {
        &self.segments[1..]
    }

    /// Whether this path addresses a top-level key only.
    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.segments.len() == 1
    }

    /// Segment-wise prefix test (`a/b` is a prefix of `a/b/c`, not of `a/bc`).
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl fmt::Display for AttrPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl From<&str> for AttrPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

impl From<String> for AttrPath {
    fn from(path: String) -> Self {
        Self::parse(&path)
    }
}

impl From<&String> for AttrPath {
    fn from(path: &String) -> Self {
        Self::parse(path)
    }
}

impl From<&AttrPath> for AttrPath {
    fn from(path: &AttrPath) -> Self {
        path.clone()
    }
}

impl From<Vec<String>> for AttrPath {
    fn from(segments: Vec<String>) -> Self {
        Self::from_segments(segments)
    }
}

impl From<&[&str]> for AttrPath {
    fn from(segments: &[&str]) -> Self {
        Self::from_segments(segments.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for AttrPath {
    fn from(segments: [&str; N]) -> Self {
        Self::from_segments(segments)
    }
}

/// Options accompanying an attribute write.
///
/// `annotations` is an open bag that callers can use to tag a write (for
/// example with the id of the cell that propagated it); it is forwarded
/// untouched in the resulting [`AttributeChange`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetOptions {
    /// Replace the value at the path instead of merging into it.
    pub rewrite: bool,
    /// Apply the write without publishing a change event.
    pub silent: bool,
    /// Caller-supplied annotations.
    pub annotations: Map<String, Value>,
}

impl SetOptions {
    /// Options with `rewrite` enabled.
    #[must_use]
    pub fn rewrite() -> Self {
        Self {
            rewrite: true,
            ..Self::default()
        }
    }

    /// Options with `silent` enabled.
    #[must_use]
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    /// Add an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Read an annotation.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&Value> {
        self.annotations.get(key)
    }
}

/// A change to one top-level attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeChange {
    /// Top-level key that changed.
    pub key: String,
    /// Full path of the write that produced the change, if it was nested.
    pub path: Option<String>,
    /// Value before the write.
    pub previous: Option<Value>,
    /// Value after the write (`None` when the key was removed).
    pub current: Option<Value>,
    /// Options passed to the write.
    pub options: SetOptions,
}

/// Key/value attribute container with nested path access.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeStore {
    values: Map<String, Value>,
}

impl AttributeStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from an existing map.
    #[must_use]
    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Borrow the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Full snapshot of the attribute tree.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        Value::Object(self.values.clone())
    }

    /// Whether a top-level key is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Top-level keys.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Read the value at `path`.
    #[must_use]
    pub fn get(&self, path: impl Into<AttrPath>) -> Option<&Value> {
        let path = path.into();
        let mut current = self.values.get(path.key())?;
        for segment in path.nested() {
            current = lookup(current, segment)?;
        }
        Some(current)
    }

    /// Deep-merge `value` into the tree at `path`.
    ///
    /// With `rewrite` the value at the path is replaced instead. Returns the
    /// resulting change, or `None` when the tree is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvalidPath`] when a non-numeric segment addresses
    /// into an array, or a numeric one exceeds [`MAX_ARRAY_INDEX`].
    pub fn set(
        &mut self,
        path: impl Into<AttrPath>,
        value: Value,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        let path = path.into();
        let previous = self.values.get(path.key()).cloned();
        let mut updated = previous.clone().unwrap_or(Value::Null);

        let slot = descend_or_create(&mut updated, path.nested(), &path)?;
        if options.rewrite {
            *slot = value;
        } else {
            deep_merge(slot, value);
        }

        Ok(self.commit(&path, previous, Some(updated), options))
    }

    /// Replace a whole top-level value.
    pub fn replace(
        &mut self,
        key: &str,
        value: Value,
        options: &SetOptions,
    ) -> Option<AttributeChange> {
        let path = AttrPath::parse(key);
        let previous = self.values.get(key).cloned();
        self.commit(&path, previous, Some(value), options)
    }

    /// Remove the value at `path`.
    ///
    /// Nested removals work on a deep copy of the top-level value, so values
    /// previously handed out are never mutated in place. Removing an array
    /// item leaves a `null` hole; list helpers splice instead.
    pub fn unset(
        &mut self,
        path: impl Into<AttrPath>,
        options: &SetOptions,
    ) -> Option<AttributeChange> {
        let path = path.into();
        let previous = self.values.get(path.key()).cloned();
        let previous_value = previous.as_ref()?;

        if path.is_top_level() {
            return self.commit(&path, previous, None, options);
        }

        let mut updated = previous_value.clone();
        let (last, parents) = path.nested().split_last()?;
        let mut parent = &mut updated;
        for segment in parents {
            parent = lookup_mut(parent, segment)?;
        }
        match parent {
            Value::Object(map) => {
                map.remove(last.as_str());
            }
            Value::Array(items) => {
                let slot = last.parse::<usize>().ok().and_then(|i| items.get_mut(i))?;
                *slot = Value::Null;
            }
            _ => return None,
        }

        self.commit(&path, previous, Some(updated), options)
    }

    fn commit(
        &mut self,
        path: &AttrPath,
        previous: Option<Value>,
        current: Option<Value>,
        options: &SetOptions,
    ) -> Option<AttributeChange> {
        if previous == current {
            return None;
        }
        let key = path.key().to_owned();
        match &current {
            Some(value) => {
                self.values.insert(key.clone(), value.clone());
            }
            None => {
                self.values.remove(&key);
            }
        }
        Some(AttributeChange {
            key,
            path: (!path.is_top_level()).then(|| path.to_string()),
            previous,
            current,
            options: options.clone(),
        })
    }
}

fn lookup<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn lookup_mut<'a>(value: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get_mut(i)),
        _ => None,
    }
}

/// Walk `segments` from `root`, creating containers that are missing.
///
/// A missing container becomes an array when the segment addressing into it is
/// numeric, an object otherwise.
fn descend_or_create<'a>(
    root: &'a mut Value,
    segments: &[String],
    path: &AttrPath,
) -> GraphResult<&'a mut Value> {
    let mut current = root;
    for segment in segments {
        let index = segment.parse::<usize>().ok();
        if !current.is_object() && !current.is_array() {
            *current = if index.is_some() {
                Value::Array(Vec::new())
            } else {
                Value::Object(Map::new())
            };
        }
        current = match current {
            Value::Object(map) => map.entry(segment.clone()).or_insert(Value::Null),
            Value::Array(items) => {
                let Some(index) = index else {
                    return Err(GraphError::InvalidPath(path.to_string()));
                };
                if items.len() <= index {
                    let len = index
                        .checked_add(1)
                        .filter(|_| index <= MAX_ARRAY_INDEX)
                        .ok_or_else(|| GraphError::InvalidPath(path.to_string()))?;
                    items.resize(len, Value::Null);
                }
                &mut items[index]
            }
            _ => return Err(GraphError::InvalidPath(path.to_string())),
        };
    }
    Ok(current)
}

/// Merge `source` into `target`.
///
/// Objects merge per key and arrays per index; anything else is replaced.
pub fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(source)) => {
            for (index, value) in source.into_iter().enumerate() {
                match target.get_mut(index) {
                    Some(existing) => deep_merge(existing, value),
                    None => target.push(value),
                }
            }
        }
        (target, source) => *target = source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_merges_sibling_leaves() {
        let mut store = AttributeStore::new();
        let opts = SetOptions::default();
        store.set("a/b/c", json!(5), &opts).expect("set c");
        store.set("a/b/d", json!(6), &opts).expect("set d");

        assert_eq!(store.get("a/b/c"), Some(&json!(5)));
        assert_eq!(store.get("a/b/d"), Some(&json!(6)));
    }

    #[test]
    fn test_rewrite_replaces_target() {
        let mut store = AttributeStore::new();
        let opts = SetOptions::default();
        store.set("a/b/c", json!(5), &opts).expect("set c");
        store
            .set("a/b", json!({ "d": 7 }), &SetOptions::rewrite())
            .expect("rewrite");

        assert_eq!(store.get("a/b/c"), None);
        assert_eq!(store.get("a/b/d"), Some(&json!(7)));
    }

    #[test]
    fn test_numeric_segments_create_arrays() {
        let mut store = AttributeStore::new();
        store
            .set("series/1/value", json!(3), &SetOptions::default())
            .expect("set");

        assert_eq!(store.get("series"), Some(&json!([null, { "value": 3 }])));
        assert_eq!(store.get(["series", "1", "value"]), Some(&json!(3)));
    }

    #[test]
    fn test_out_of_range_index_is_rejected() {
        let mut store = AttributeStore::new();
        let opts = SetOptions::default();
        store.set("list", json!([1, 2]), &opts).expect("set");

        let overflow = store.set("list/18446744073709551615", json!(1), &opts);
        assert!(matches!(overflow, Err(GraphError::InvalidPath(_))));
        let huge = store.set("fresh/99999999999", json!(1), &opts);
        assert!(matches!(huge, Err(GraphError::InvalidPath(_))));

        assert_eq!(store.get("list"), Some(&json!([1, 2])));
        assert_eq!(store.get("fresh"), None);

        let edge = format!("list/{MAX_ARRAY_INDEX}");
        store.set(edge.as_str(), json!(3), &opts).expect("set at limit");
        assert_eq!(store.get(edge.as_str()), Some(&json!(3)));
    }

    #[test]
    fn test_named_segment_into_array_is_rejected() {
        let mut store = AttributeStore::new();
        let opts = SetOptions::default();
        store.set("list", json!([1, 2]), &opts).expect("set");
        let result = store.set("list/name", json!(1), &opts);
        assert!(matches!(result, Err(GraphError::InvalidPath(_))));
        assert_eq!(store.get("list"), Some(&json!([1, 2])));
    }

    #[test]
    fn test_set_reports_change_scoped_to_key() {
        let mut store = AttributeStore::new();
        let change = store
            .set("position/x", json!(10), &SetOptions::default())
            .expect("set")
            .expect("change");

        assert_eq!(change.key, "position");
        assert_eq!(change.path.as_deref(), Some("position/x"));
        assert_eq!(change.previous, None);
        assert_eq!(change.current, Some(json!({ "x": 10 })));
    }

    #[test]
    fn test_noop_write_reports_nothing() {
        let mut store = AttributeStore::new();
        let opts = SetOptions::default();
        store.set("size/width", json!(10), &opts).expect("set");
        let change = store.set("size/width", json!(10), &opts).expect("set");
        assert!(change.is_none());
    }

    #[test]
    fn test_unset_nested_does_not_touch_snapshot() {
        let mut store = AttributeStore::new();
        let opts = SetOptions::default();
        store
            .set("attrs", json!({ "body": { "fill": "red", "stroke": "blue" } }), &opts)
            .expect("set");
        let before = store.snapshot();

        let change = store.unset("attrs/body/fill", &opts).expect("change");
        assert_eq!(change.key, "attrs");
        assert_eq!(store.get("attrs/body"), Some(&json!({ "stroke": "blue" })));
        assert_eq!(before["attrs"]["body"]["fill"], json!("red"));
    }

    #[test]
    fn test_unset_missing_is_noop() {
        let mut store = AttributeStore::new();
        assert!(store.unset("nothing/here", &SetOptions::default()).is_none());
        assert!(store.unset("nothing", &SetOptions::default()).is_none());
    }

    #[test]
    fn test_deep_merge_arrays_by_index() {
        let mut target = json!([{ "a": 1 }, { "b": 2 }]);
        deep_merge(&mut target, json!([{ "c": 3 }]));
        assert_eq!(target, json!([{ "a": 1, "c": 3 }, { "b": 2 }]));
    }

    #[test]
    fn test_path_prefix_is_segment_wise() {
        let path = AttrPath::parse("position/x");
        assert!(path.starts_with(&AttrPath::parse("position")));
        assert!(!AttrPath::parse("positions").starts_with(&AttrPath::parse("position")));
        assert_eq!(path.prefixed("attrs").to_string(), "attrs/position/x");
    }
}
