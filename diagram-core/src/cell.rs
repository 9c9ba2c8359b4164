//! Cells - the addressable nodes of a diagram.
//!
//! A [`Cell`] is either an element or a link (see [`CellKind`]). All of its
//! state lives in an [`AttributeStore`]; the graph-managed keys `parent` and
//! `embeds` can only be written by the embedding operations on
//! [`Graph`](crate::Graph), and `id` is fixed at construction.

use std::borrow::Borrow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::attributes::{AttrPath, AttributeChange, AttributeStore, SetOptions};
use crate::registry::KindRegistry;
use crate::{GraphError, GraphResult};

/// Attribute holding the dotted kind string.
pub const TYPE_KEY: &str = "type";
/// Attribute holding the stacking order.
pub const Z_KEY: &str = "z";
/// Attribute holding the parent id.
pub const PARENT_KEY: &str = "parent";
/// Attribute holding the ordered child ids.
pub const EMBEDS_KEY: &str = "embeds";
/// Attribute holding the rendering-attribute tree.
pub const ATTRS_KEY: &str = "attrs";
/// Key of the id in exported documents.
pub const ID_KEY: &str = "id";

/// Unique identifier for a cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    /// Create a new unique cell ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CellId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CellId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for CellId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&CellId> for CellId {
    fn from(id: &CellId) -> Self {
        id.clone()
    }
}

impl Borrow<str> for CellId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<CellId> for Value {
    fn from(id: CellId) -> Self {
        Self::String(id.0)
    }
}

/// Whether a cell is an element or a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    /// A node that can embed other cells.
    Element,
    /// A connection between two endpoints.
    Link,
}

/// A connection point declared in a cell's `attrs` tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    /// Port identifier.
    pub id: String,
    /// Everything else declared alongside the id.
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

/// Collect the ports declared under `attrs/<selector>/port`.
///
/// `port` is either the id itself or an object carrying an `id`.
#[must_use]
pub fn extract_ports(attrs: Option<&Value>) -> BTreeMap<String, Port> {
    let mut ports = BTreeMap::new();
    let Some(Value::Object(selectors)) = attrs else {
        return ports;
    };
    for selector in selectors.values() {
        let Some(port) = selector.get("port") else {
            continue;
        };
        match port {
            Value::Object(fields) => {
                let Some(id) = fields.get(ID_KEY).and_then(scalar_to_string) else {
                    continue;
                };
                let mut data = fields.clone();
                data.remove(ID_KEY);
                ports.insert(id.clone(), Port { id, data });
            }
            Value::Null | Value::Bool(false) => {}
            other => {
                if let Some(id) = scalar_to_string(other) {
                    ports.insert(
                        id.clone(),
                        Port {
                            id,
                            data: Map::new(),
                        },
                    );
                }
            }
        }
    }
    ports
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A diagram cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    id: CellId,
    kind: CellKind,
    attributes: AttributeStore,
    ports: BTreeMap<String, Port>,
}

impl Cell {
    /// Create a detached cell of the given kind and type string.
    #[must_use]
    pub fn new(kind: CellKind, type_name: &str) -> Self {
        let mut attributes = Map::new();
        attributes.insert(TYPE_KEY.to_owned(), Value::String(type_name.to_owned()));
        if kind == CellKind::Link {
            attributes.insert("source".to_owned(), Value::Object(Map::new()));
            attributes.insert("target".to_owned(), Value::Object(Map::new()));
        }
        Self::from_parts(CellId::new(), kind, attributes)
    }

    /// Create a detached element.
    #[must_use]
    pub fn element(type_name: &str) -> Self {
        Self::new(CellKind::Element, type_name)
    }

    /// Create a detached link.
    #[must_use]
    pub fn link(type_name: &str) -> Self {
        Self::new(CellKind::Link, type_name)
    }

    /// Assemble a cell from an id, kind and full attribute map.
    ///
    /// The map may carry `parent`/`embeds` (e.g. a previously exported
    /// document); the graph rebuilds its hierarchy index from them on insert.
    #[must_use]
    pub fn from_parts(id: CellId, kind: CellKind, mut attributes: Map<String, Value>) -> Self {
        attributes.remove(ID_KEY);
        let ports = extract_ports(attributes.get(ATTRS_KEY));
        Self {
            id,
            kind,
            attributes: AttributeStore::from_map(attributes),
            ports,
        }
    }

    /// Use an explicit id instead of the generated one.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<CellId>) -> Self {
        self.id = id.into();
        self
    }

    /// Merge `value` at `path` while building a detached cell.
    ///
    /// Writes to graph-managed keys are ignored.
    #[must_use]
    pub fn with_prop(mut self, path: impl Into<AttrPath>, value: Value) -> Self {
        let path = path.into();
        if let Err(e) = self.set_prop(&path, value, &SetOptions::silent()) {
            tracing::warn!("Ignoring initial value for {path}: {e}");
        }
        self
    }

    /// Merge `value` under `attrs/<path>` while building a detached cell.
    #[must_use]
    pub fn with_attr(self, path: impl Into<AttrPath>, value: Value) -> Self {
        let path = path.into().prefixed(ATTRS_KEY);
        self.with_prop(path, value)
    }

    /// The cell id.
    #[must_use]
    pub fn id(&self) -> &CellId {
        &self.id
    }

    /// Element or link.
    #[must_use]
    pub const fn kind(&self) -> CellKind {
        self.kind
    }

    /// The dotted kind string stored in `type`.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.attributes
            .get(TYPE_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Whether this cell is a link.
    #[must_use]
    pub fn is_link(&self) -> bool {
        self.kind == CellKind::Link
    }

    /// Whether this cell is an element.
    #[must_use]
    pub fn is_element(&self) -> bool {
        self.kind == CellKind::Element
    }

    /// Stacking order (0 when unset).
    #[must_use]
    pub fn z(&self) -> i64 {
        self.attributes
            .get(Z_KEY)
            .and_then(Value::as_f64)
            .map_or(0, |z| {
                #[allow(clippy::cast_possible_truncation)]
                {
                    z as i64
                }
            })
    }

    /// Whether `z` has been assigned.
    #[must_use]
    pub fn has_z(&self) -> bool {
        self.attributes.contains(Z_KEY)
    }

    /// Id of the embedding parent, if any.
    #[must_use]
    pub fn parent_id(&self) -> Option<CellId> {
        self.attributes
            .get(PARENT_KEY)
            .and_then(Value::as_str)
            .map(CellId::from)
    }

    /// Ids of directly embedded cells, in stored order.
    #[must_use]
    pub fn embed_ids(&self) -> Vec<CellId> {
        self.attributes
            .get(EMBEDS_KEY)
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_str).map(CellId::from).collect())
            .unwrap_or_default()
    }

    /// Whether the cell has an embedding parent.
    #[must_use]
    pub fn is_embedded(&self) -> bool {
        self.parent_id().is_some()
    }

    /// Direct-parent check, usable without a graph.
    ///
    /// See [`Graph::is_embedded_in`](crate::Graph::is_embedded_in) for the
    /// transitive version.
    #[must_use]
    pub fn is_embedded_in(&self, cell: &CellId) -> bool {
        self.parent_id().as_ref() == Some(cell)
    }

    /// Ports declared in `attrs`.
    #[must_use]
    pub fn ports(&self) -> &BTreeMap<String, Port> {
        &self.ports
    }

    /// Whether a port with the given id is declared.
    #[must_use]
    pub fn has_port(&self, id: &str) -> bool {
        self.ports.contains_key(id)
    }

    /// Borrow the attribute store.
    #[must_use]
    pub fn store(&self) -> &AttributeStore {
        &self.attributes
    }

    /// Full attribute snapshot, including the id.
    #[must_use]
    pub fn attributes(&self) -> Value {
        let mut snapshot = self.attributes.as_map().clone();
        snapshot.insert(ID_KEY.to_owned(), self.id.clone().into());
        Value::Object(snapshot)
    }

    /// Read a top-level attribute.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        if key.is_empty() {
            return None;
        }
        self.attributes.get(AttrPath::from_segments([key]))
    }

    /// Read a nested attribute.
    #[must_use]
    pub fn prop(&self, path: impl Into<AttrPath>) -> Option<&Value> {
        self.attributes.get(path)
    }

    /// Read a value under `attrs`.
    #[must_use]
    pub fn attr(&self, path: impl Into<AttrPath>) -> Option<&Value> {
        self.attributes.get(path.into().prefixed(ATTRS_KEY))
    }

    /// Replace a whole top-level attribute.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::ReservedAttribute`] for graph-managed keys.
    pub fn set(
        &mut self,
        key: &str,
        value: Value,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        check_writable(key)?;
        let change = self.attributes.replace(key, value, options);
        Ok(self.after_write(change))
    }

    /// Merge `value` at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::ReservedAttribute`] for graph-managed keys and
    /// [`GraphError::InvalidPath`] for paths that cannot be traversed.
    pub fn set_prop(
        &mut self,
        path: impl Into<AttrPath>,
        value: Value,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        let path = path.into();
        check_writable(path.key())?;
        let change = self.attributes.set(&path, value, options)?;
        Ok(self.after_write(change))
    }

    /// Merge `value` under `attrs/<path>`.
    ///
    /// # Errors
    ///
    /// See [`Cell::set_prop`].
    pub fn set_attr(
        &mut self,
        path: impl Into<AttrPath>,
        value: Value,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        self.set_prop(path.into().prefixed(ATTRS_KEY), value, options)
    }

    /// Remove a top-level attribute.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::ReservedAttribute`] for graph-managed keys.
    pub fn unset(&mut self, key: &str, options: &SetOptions) -> GraphResult<Option<AttributeChange>> {
        self.remove_prop(AttrPath::from_segments([key]), options)
    }

    /// Remove the value at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::ReservedAttribute`] for graph-managed keys.
    pub fn remove_prop(
        &mut self,
        path: impl Into<AttrPath>,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        let path = path.into();
        check_writable(path.key())?;
        let change = self.attributes.unset(&path, options);
        Ok(self.after_write(change))
    }

    /// Remove the value under `attrs/<path>`.
    ///
    /// # Errors
    ///
    /// See [`Cell::remove_prop`].
    pub fn remove_attr(
        &mut self,
        path: impl Into<AttrPath>,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        self.remove_prop(path.into().prefixed(ATTRS_KEY), options)
    }

    /// Write a graph-managed key (`parent`, `embeds`).
    pub(crate) fn set_structural(
        &mut self,
        key: &str,
        value: Option<Value>,
        options: &SetOptions,
    ) -> Option<AttributeChange> {
        match value {
            Some(value) => self.attributes.replace(key, value, options),
            None => self.attributes.unset(AttrPath::from_segments([key]), options),
        }
    }

    /// Recompute derived state after a write.
    fn after_write(&mut self, change: Option<AttributeChange>) -> Option<AttributeChange> {
        if change.as_ref().is_some_and(|c| c.key == ATTRS_KEY) {
            self.ports = extract_ports(self.attributes.get(ATTRS_KEY));
        }
        change
    }

    /// Copy this cell under a fresh id, detached and without embeds.
    #[must_use]
    pub fn shallow_clone(&self) -> Self {
        let mut attributes = self.attributes.as_map().clone();
        attributes.remove(PARENT_KEY);
        attributes.remove(EMBEDS_KEY);
        Self::from_parts(CellId::new(), self.kind, attributes)
    }

    /// Export the cell, omitting `attrs` leaves equal to its kind defaults.
    ///
    /// Object-valued properties (such as `style`) are compared per key one
    /// level down rather than as whole objects.
    #[must_use]
    pub fn to_json(&self, registry: &KindRegistry) -> Value {
        let default_attrs = registry
            .get(self.type_name())
            .and_then(|kind| kind.defaults().get(ATTRS_KEY))
            .and_then(Value::as_object);

        let mut json = Map::new();
        json.insert(ID_KEY.to_owned(), self.id.clone().into());
        for (key, value) in self.attributes.as_map() {
            if key != ATTRS_KEY {
                json.insert(key.clone(), value.clone());
            }
        }
        let attrs = self.attributes.get(ATTRS_KEY).and_then(Value::as_object);
        json.insert(
            ATTRS_KEY.to_owned(),
            Value::Object(trim_default_attrs(attrs, default_attrs)),
        );
        Value::Object(json)
    }
}

fn check_writable(key: &str) -> GraphResult<()> {
    if matches!(key, ID_KEY | PARENT_KEY | EMBEDS_KEY) {
        return Err(GraphError::ReservedAttribute(key.to_owned()));
    }
    Ok(())
}

fn trim_default_attrs(
    attrs: Option<&Map<String, Value>>,
    defaults: Option<&Map<String, Value>>,
) -> Map<String, Value> {
    let mut trimmed = Map::new();
    let Some(attrs) = attrs else {
        return trimmed;
    };

    for (selector, attr) in attrs {
        let Value::Object(attr) = attr else {
            continue;
        };
        let default_attr = defaults.and_then(|d| d.get(selector));
        let mut kept = Map::new();

        for (name, value) in attr {
            let default_value = default_attr.and_then(|d| d.get(name));
            if let Value::Object(group) = value {
                let mut kept_group = Map::new();
                for (sub_name, sub_value) in group {
                    if default_value.and_then(|d| d.get(sub_name)) != Some(sub_value) {
                        kept_group.insert(sub_name.clone(), sub_value.clone());
                    }
                }
                if !kept_group.is_empty() {
                    kept.insert(name.clone(), Value::Object(kept_group));
                }
            } else if default_value != Some(value) {
                kept.insert(name.clone(), value.clone());
            }
        }

        if !kept.is_empty() {
            trimmed.insert(selector.clone(), Value::Object(kept));
        }
    }
    trimmed
}
