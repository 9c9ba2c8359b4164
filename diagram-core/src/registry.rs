//! Kind registry keyed by dotted type strings.
//!
//! A kind names the defaults a cell starts from. Kinds can extend other kinds,
//! inheriting their defaults (deep, child wins).

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::cell::{Cell, CellId, CellKind, ID_KEY, TYPE_KEY};
use crate::{GraphError, GraphResult};

/// Default attributes and element/link split for one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct KindDefinition {
    kind: CellKind,
    defaults: Map<String, Value>,
}

impl KindDefinition {
    /// Element or link.
    #[must_use]
    pub const fn kind(&self) -> CellKind {
        self.kind
    }

    /// Declared default attributes (including `type`).
    #[must_use]
    pub fn defaults(&self) -> &Map<String, Value> {
        &self.defaults
    }
}

/// Registry of cell kinds.
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: HashMap<String, KindDefinition>,
}

impl KindRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind with its defaults, replacing any previous definition.
    pub fn define(&mut self, type_name: &str, kind: CellKind, defaults: Value) {
        let mut defaults = match defaults {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if kind == CellKind::Link {
            defaults
                .entry("source")
                .or_insert_with(|| Value::Object(Map::new()));
            defaults
                .entry("target")
                .or_insert_with(|| Value::Object(Map::new()));
        }
        defaults.insert(TYPE_KEY.to_owned(), Value::String(type_name.to_owned()));
        tracing::debug!("Registered cell kind {type_name} ({kind:?})");
        self.kinds
            .insert(type_name.to_owned(), KindDefinition { kind, defaults });
    }

    /// Register a kind that inherits the defaults of `base`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownKind`] if `base` is not registered.
    pub fn extend(&mut self, base: &str, type_name: &str, defaults: Value) -> GraphResult<()> {
        let parent = self
            .kinds
            .get(base)
            .ok_or_else(|| GraphError::UnknownKind(base.to_owned()))?;
        let mut merged = Value::Object(parent.defaults.clone());
        merge_defaults(&mut merged, defaults);
        let kind = parent.kind;
        self.define(type_name, kind, merged);
        Ok(())
    }

    /// Look up a kind.
    #[must_use]
    pub fn get(&self, type_name: &str) -> Option<&KindDefinition> {
        self.kinds.get(type_name)
    }

    /// Whether a kind is registered.
    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.kinds.contains_key(type_name)
    }

    /// Create a detached cell of a registered kind, starting from its defaults.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownKind`] if the kind is not registered.
    pub fn create(&self, type_name: &str) -> GraphResult<Cell> {
        self.create_with(type_name, Map::new())
    }

    /// Create a detached cell whose `attributes` are merged over the defaults.
    ///
    /// Arrays in `attributes` replace default arrays rather than merging by
    /// index. An `id` entry is used as the cell id.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownKind`] if the kind is not registered.
    pub fn create_with(&self, type_name: &str, attributes: Map<String, Value>) -> GraphResult<Cell> {
        let definition = self
            .kinds
            .get(type_name)
            .ok_or_else(|| GraphError::UnknownKind(type_name.to_owned()))?;
        Ok(build(definition.kind, &definition.defaults, attributes))
    }

    /// Rebuild a cell from an exported document.
    ///
    /// Registered kinds get their defaults back; unregistered kinds are
    /// accepted as-is, and are links when the document has `source` and
    /// `target` keys.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownKind`] when the document has no string
    /// `type`.
    pub fn cell_from_json(&self, document: Value) -> GraphResult<Cell> {
        let Value::Object(attributes) = document else {
            return Err(GraphError::UnknownKind("<not an object>".to_owned()));
        };
        let type_name = attributes
            .get(TYPE_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| GraphError::UnknownKind("<missing type>".to_owned()))?
            .to_owned();

        match self.kinds.get(&type_name) {
            Some(definition) => Ok(build(definition.kind, &definition.defaults, attributes)),
            None => {
                let kind = if attributes.contains_key("source") && attributes.contains_key("target")
                {
                    CellKind::Link
                } else {
                    CellKind::Element
                };
                Ok(build(kind, &Map::new(), attributes))
            }
        }
    }
}

fn build(kind: CellKind, defaults: &Map<String, Value>, mut attributes: Map<String, Value>) -> Cell {
    let id = attributes
        .remove(ID_KEY)
        .and_then(|id| id.as_str().map(CellId::from))
        .unwrap_or_default();
    let mut merged = Value::Object(defaults.clone());
    merge_defaults(&mut merged, Value::Object(attributes));
    let merged = match merged {
        Value::Object(merged) => merged,
        _ => Map::new(),
    };
    Cell::from_parts(id, kind, merged)
}

/// Merge where arrays replace instead of merging by index.
fn merge_defaults(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => merge_defaults(existing, value),
                    None => {
                        target.insert(key, value);
                    }
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

    fn registry() -> KindRegistry {
        let mut registry = KindRegistry::new();
        registry.define(
            "standard.Rectangle",
            CellKind::Element,
            json!({
                "size": { "width": 100, "height": 40 },
                "attrs": { "body": { "fill": "#ffffff", "stroke": "#000000" } }
            }),
        );
        registry.define("standard.Link", CellKind::Link, json!({ "labels": [] }));
        registry
    }

    #[test]
    fn test_create_applies_defaults() {
        let cell = registry()
            .create_with("standard.Rectangle", {
                let mut attrs = Map::new();
                attrs.insert("size".into(), json!({ "width": 10 }));
                attrs
            })
            .expect("create");

        assert_eq!(cell.type_name(), "standard.Rectangle");
        assert_eq!(cell.prop("size"), Some(&json!({ "width": 10, "height": 40 })));
        assert_eq!(cell.attr("body/fill"), Some(&json!("#ffffff")));
    }

    #[test]
    fn test_unknown_kind() {
        let result = registry().create("nope.Nothing");
        assert!(matches!(result, Err(GraphError::UnknownKind(_))));
    }

    #[test]
    fn test_extend_inherits_defaults() {
        let mut registry = registry();
        registry
            .extend(
                "standard.Rectangle",
                "app.Card",
                json!({ "attrs": { "body": { "fill": "#eeeeee" } } }),
            )
            .expect("extend");

        let card = registry.create("app.Card").expect("create");
        assert_eq!(card.attr("body/fill"), Some(&json!("#eeeeee")));
        assert_eq!(card.attr("body/stroke"), Some(&json!("#000000")));
        assert_eq!(card.type_name(), "app.Card");
    }

    #[test]
    fn test_to_json_omits_defaults() {
        let registry = registry();
        let mut cell = registry.create("standard.Rectangle").expect("create");
        cell.set_attr("body/stroke", json!("red"), &crate::SetOptions::default())
            .expect("set");

        let json = cell.to_json(&registry);
        assert_eq!(json["attrs"], json!({ "body": { "stroke": "red" } }));
        assert_eq!(json["size"], json!({ "width": 100, "height": 40 }));
        assert_eq!(json["id"], json!(cell.id().as_str()));
    }

    #[test]
    fn test_cell_from_json_round_trips_kind() {
        let registry = registry();
        let link = registry
            .cell_from_json(json!({
                "id": "l1",
                "type": "custom.Wire",
                "source": { "id": "a" },
                "target": { "x": 5, "y": 5 }
            }))
            .expect("parse");
        assert!(link.is_link());
        assert_eq!(link.id().as_str(), "l1");

        let rect = registry
            .cell_from_json(json!({ "id": "r1", "type": "standard.Rectangle" }))
            .expect("parse");
        assert!(rect.is_element());
        assert_eq!(rect.attr("body/fill"), Some(&json!("#ffffff")));
    }
}
