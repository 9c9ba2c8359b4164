//! Links: cells connecting two endpoints.
//!
//! A link stores its endpoints in the `source` and `target` attributes. An
//! endpoint either references a cell (optionally one of its ports) or is a
//! free point. Link-only accessors on [`Cell`] fail with
//! [`GraphError::NotALink`] when called on an element; graph-level
//! resolution ([`Graph::get_source_cell`] and friends) returns `None`
//! instead.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::attributes::{AttributeChange, SetOptions};
use crate::cell::{Cell, CellId, ID_KEY, PARENT_KEY};
use crate::graph::Graph;
use crate::{GraphError, GraphResult};

const LABELS_KEY: &str = "labels";
const VERTICES_KEY: &str = "vertices";
const ROUTER_KEY: &str = "router";
const CONNECTOR_KEY: &str = "connector";
const PORT_KEY: &str = "port";

/// A 2D point in diagram coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

impl Point {
    /// Create a point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Read `x`/`y` from a JSON object; missing coordinates are 0.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let coordinate = |key| value.get(key).and_then(Value::as_f64).unwrap_or(0.0);
        Self::new(coordinate("x"), coordinate("y"))
    }

    /// `{ "x": .., "y": .. }`, with integral coordinates written as integers.
    #[must_use]
    pub fn to_value(self) -> Value {
        json!({ "x": number(self.x), "y": number(self.y) })
    }

    /// Offset by `(dx, dy)`.
    #[must_use]
    pub fn translate(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    /// Scale relative to `origin`.
    #[must_use]
    pub fn scale(self, sx: f64, sy: f64, origin: Self) -> Self {
        Self::new(
            origin.x + (self.x - origin.x) * sx,
            origin.y + (self.y - origin.y) * sy,
        )
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

/// Overwrite the coordinates of a point-like value, keeping its other keys.
fn place(value: Option<&Value>, point: Point) -> Value {
    let mut object = match value {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    object.insert("x".to_owned(), number(point.x));
    object.insert("y".to_owned(), number(point.y));
    Value::Object(object)
}

/// One end of a link.
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    /// A free point.
    Point(Point),
    /// A reference to a cell, optionally to one of its ports.
    Cell {
        /// Referenced cell.
        id: CellId,
        /// Referenced port.
        port: Option<String>,
        /// Anything else stored with the endpoint (anchors, magnets, ...).
        extra: Map<String, Value>,
    },
}

impl Endpoint {
    /// A free point.
    #[must_use]
    pub const fn point(x: f64, y: f64) -> Self {
        Self::Point(Point::new(x, y))
    }

    /// A reference to a cell.
    #[must_use]
    pub fn cell(id: impl Into<CellId>) -> Self {
        Self::Cell {
            id: id.into(),
            port: None,
            extra: Map::new(),
        }
    }

    /// A reference to a port of a cell.
    #[must_use]
    pub fn port(id: impl Into<CellId>, port: impl Into<String>) -> Self {
        Self::Cell {
            id: id.into(),
            port: Some(port.into()),
            extra: Map::new(),
        }
    }

    /// Interpret a stored endpoint value.
    ///
    /// A value with a non-empty `id` references a cell; anything else is a
    /// point.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        match endpoint_id(Some(value)) {
            Some(id) => {
                let mut extra = value.as_object().cloned().unwrap_or_default();
                extra.remove(ID_KEY);
                extra.remove(PORT_KEY);
                Self::Cell {
                    id,
                    port: endpoint_port(Some(value)),
                    extra,
                }
            }
            None => Self::Point(Point::from_value(value)),
        }
    }

    /// The stored form of this endpoint.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Point(point) => point.to_value(),
            Self::Cell { id, port, extra } => {
                let mut object = extra.clone();
                object.insert(ID_KEY.to_owned(), id.clone().into());
                if let Some(port) = port {
                    object.insert(PORT_KEY.to_owned(), Value::String(port.clone()));
                }
                Value::Object(object)
            }
        }
    }

    /// Referenced cell id, if any.
    #[must_use]
    pub fn id(&self) -> Option<&CellId> {
        match self {
            Self::Cell { id, .. } => Some(id),
            Self::Point(_) => None,
        }
    }

    /// Referenced port, if any.
    #[must_use]
    pub fn port_id(&self) -> Option<&str> {
        match self {
            Self::Cell { port, .. } => port.as_deref(),
            Self::Point(_) => None,
        }
    }

    /// Whether this endpoint is a free point.
    #[must_use]
    pub const fn is_point(&self) -> bool {
        matches!(self, Self::Point(_))
    }

    /// Whether two endpoints reference the same cell and port.
    ///
    /// Missing ports compare equal, and so do two free points whatever their
    /// coordinates.
    #[must_use]
    pub fn ends_equal(a: &Self, b: &Self) -> bool {
        a.id() == b.id() && a.port_id() == b.port_id()
    }
}

impl From<Point> for Endpoint {
    fn from(point: Point) -> Self {
        Self::Point(point)
    }
}

impl From<Endpoint> for Value {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_value()
    }
}

/// Which end of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum End {
    /// The `source` attribute.
    Source,
    /// The `target` attribute.
    Target,
}

impl End {
    /// Attribute key of this end.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Target => "target",
        }
    }
}

/// Id referenced by a stored endpoint value.
pub(crate) fn endpoint_id(value: Option<&Value>) -> Option<CellId> {
    match value?.get(ID_KEY)? {
        Value::String(id) if !id.is_empty() => Some(CellId::from(id.as_str())),
        Value::Number(id) => Some(CellId::from(id.to_string())),
        _ => None,
    }
}

/// Port referenced by a stored endpoint value.
pub(crate) fn endpoint_port(value: Option<&Value>) -> Option<String> {
    match value?.get(PORT_KEY)? {
        Value::String(port) if !port.is_empty() => Some(port.clone()),
        Value::Number(port) => Some(port.to_string()),
        _ => None,
    }
}

/// Named router or connector with its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedConfig {
    /// Registered name.
    pub name: String,
    /// Arguments passed to it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

/// Array position for a read or overwrite; negative counts from the end.
fn read_index(index: isize, len: usize) -> Option<usize> {
    if index >= 0 {
        usize::try_from(index).ok()
    } else {
        len.checked_sub(index.unsigned_abs())
    }
}

/// Insertion position; `None` appends and `-1` means after the last item.
fn insert_index(index: Option<isize>, len: usize) -> usize {
    let len_signed = isize::try_from(len).unwrap_or(isize::MAX);
    let index = match index {
        None => len_signed,
        Some(i) if i < 0 => len_signed + i + 1,
        Some(i) => i,
    };
    let index = if index < 0 { (len_signed + index).max(0) } else { index };
    usize::try_from(index).map_or(0, |i| i.min(len))
}

/// Removal position; `None` removes the last item.
fn remove_index(index: Option<isize>, len: usize) -> Option<usize> {
    let len_signed = isize::try_from(len).ok()?;
    let index = index.unwrap_or(-1);
    let index = if index < 0 { (len_signed + index).max(0) } else { index };
    usize::try_from(index).ok().filter(|i| *i < len)
}

impl Cell {
    fn require_link(&self) -> GraphResult<()> {
        if self.is_link() {
            Ok(())
        } else {
            Err(GraphError::NotALink(self.id().clone()))
        }
    }

    /// Id referenced by one end, or `None` for points and elements.
    pub(crate) fn end_id(&self, end: End) -> Option<CellId> {
        if !self.is_link() {
            return None;
        }
        endpoint_id(self.get(end.key()))
    }

    /// Typed endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements.
    pub fn endpoint(&self, end: End) -> GraphResult<Endpoint> {
        self.require_link()?;
        Ok(self
            .get(end.key())
            .map_or(Endpoint::point(0.0, 0.0), Endpoint::from_value))
    }

    /// The source endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements.
    pub fn source(&self) -> GraphResult<Endpoint> {
        self.endpoint(End::Source)
    }

    /// The target endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements.
    pub fn target(&self) -> GraphResult<Endpoint> {
        self.endpoint(End::Target)
    }

    /// Replace one endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements.
    pub fn set_endpoint(
        &mut self,
        end: End,
        endpoint: &Endpoint,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        self.require_link()?;
        self.set(end.key(), endpoint.to_value(), options)
    }

    /// Replace both endpoints with the point `(0, 0)`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements.
    pub fn disconnect(&mut self, options: &SetOptions) -> GraphResult<Vec<AttributeChange>> {
        self.require_link()?;
        let origin = Endpoint::point(0.0, 0.0);
        let mut changes = Vec::new();
        for end in [End::Source, End::Target] {
            changes.extend(self.set_endpoint(end, &origin, options)?);
        }
        Ok(changes)
    }

    // Labels

    /// All labels (empty when unset).
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements.
    pub fn labels(&self) -> GraphResult<Vec<Value>> {
        self.list(LABELS_KEY)
    }

    /// Whether the link has at least one label.
    #[must_use]
    pub fn has_labels(&self) -> bool {
        self.get(LABELS_KEY)
            .and_then(Value::as_array)
            .is_some_and(|labels| !labels.is_empty())
    }

    /// The label at `index`; negative indexes count from the end.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements.
    pub fn label(&self, index: isize) -> GraphResult<Option<&Value>> {
        self.item(LABELS_KEY, index)
    }

    /// Merge `label` into the label at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements and
    /// [`GraphError::InvalidPath`] when a negative index points before the
    /// first label.
    pub fn set_label(
        &mut self,
        index: isize,
        label: Value,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        self.set_item(LABELS_KEY, index, label, options)
    }

    /// Replace all labels.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements.
    pub fn set_labels(
        &mut self,
        labels: Vec<Value>,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        self.require_link()?;
        self.set(LABELS_KEY, Value::Array(labels), options)
    }

    /// Insert a label; `None` or `-1` appends.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::MissingArgument`] for a `null` label and
    /// [`GraphError::NotALink`] for elements.
    pub fn insert_label(
        &mut self,
        index: Option<isize>,
        label: Value,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        if label.is_null() {
            return Err(GraphError::MissingArgument("label"));
        }
        let mut labels = self.labels()?;
        let index = insert_index(index, labels.len());
        labels.insert(index, label);
        self.set_labels(labels, options)
    }

    /// Append a label.
    ///
    /// # Errors
    ///
    /// See [`Cell::insert_label`].
    pub fn append_label(
        &mut self,
        label: Value,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        self.insert_label(Some(-1), label, options)
    }

    /// Remove a label; `None` removes the last one.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements.
    pub fn remove_label(
        &mut self,
        index: Option<isize>,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        let mut labels = self.labels()?;
        let Some(index) = remove_index(index, labels.len()) else {
            return Ok(None);
        };
        labels.remove(index);
        self.set_labels(labels, options)
    }

    // Vertices

    /// Route points between source and target.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements.
    pub fn vertices(&self) -> GraphResult<Vec<Point>> {
        Ok(self.list(VERTICES_KEY)?.iter().map(Point::from_value).collect())
    }

    /// The vertex at `index`; negative indexes count from the end.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements.
    pub fn vertex(&self, index: isize) -> GraphResult<Option<Point>> {
        Ok(self.item(VERTICES_KEY, index)?.map(Point::from_value))
    }

    /// Move the vertex at `index`.
    ///
    /// # Errors
    ///
    /// See [`Cell::set_label`].
    pub fn set_vertex(
        &mut self,
        index: isize,
        vertex: Point,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        self.set_item(VERTICES_KEY, index, vertex.to_value(), options)
    }

    /// Replace all vertices.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements.
    pub fn set_vertices(
        &mut self,
        vertices: &[Point],
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        self.require_link()?;
        let vertices = vertices.iter().map(|v| v.to_value()).collect();
        self.set(VERTICES_KEY, Value::Array(vertices), options)
    }

    /// Insert a vertex; `None` or `-1` appends.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements.
    pub fn insert_vertex(
        &mut self,
        index: Option<isize>,
        vertex: Point,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        let mut vertices = self.list(VERTICES_KEY)?;
        let index = insert_index(index, vertices.len());
        vertices.insert(index, vertex.to_value());
        self.set(VERTICES_KEY, Value::Array(vertices), options)
    }

    /// Remove a vertex; `None` removes the last one.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements.
    pub fn remove_vertex(
        &mut self,
        index: Option<isize>,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        let mut vertices = self.list(VERTICES_KEY)?;
        let Some(index) = remove_index(index, vertices.len()) else {
            return Ok(None);
        };
        vertices.remove(index);
        self.set(VERTICES_KEY, Value::Array(vertices), options)
    }

    fn list(&self, key: &str) -> GraphResult<Vec<Value>> {
        self.require_link()?;
        Ok(self
            .get(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    fn item(&self, key: &str, index: isize) -> GraphResult<Option<&Value>> {
        self.require_link()?;
        let len = self.get(key).and_then(Value::as_array).map_or(0, Vec::len);
        Ok(read_index(index, len).and_then(|i| self.prop([key, i.to_string().as_str()])))
    }

    fn set_item(
        &mut self,
        key: &str,
        index: isize,
        value: Value,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        self.require_link()?;
        let len = self.get(key).and_then(Value::as_array).map_or(0, Vec::len);
        let index =
            read_index(index, len).ok_or_else(|| GraphError::InvalidPath(format!("{key}/{index}")))?;
        self.set_prop([key, index.to_string().as_str()], value, options)
    }

    // Router and connector

    /// The configured router.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements and
    /// [`GraphError::Serialization`] if the stored value has no `name`.
    pub fn router(&self) -> GraphResult<Option<NamedConfig>> {
        self.named(ROUTER_KEY)
    }

    /// Configure the router.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements.
    pub fn set_router(
        &mut self,
        name: &str,
        args: Option<Value>,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        self.set_named(ROUTER_KEY, name, args, options)
    }

    /// The configured connector.
    ///
    /// # Errors
    ///
    /// See [`Cell::router`].
    pub fn connector(&self) -> GraphResult<Option<NamedConfig>> {
        self.named(CONNECTOR_KEY)
    }

    /// Configure the connector.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements.
    pub fn set_connector(
        &mut self,
        name: &str,
        args: Option<Value>,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        self.set_named(CONNECTOR_KEY, name, args, options)
    }

    fn named(&self, key: &str) -> GraphResult<Option<NamedConfig>> {
        self.require_link()?;
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    fn set_named(
        &mut self,
        key: &str,
        name: &str,
        args: Option<Value>,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        self.require_link()?;
        let config = NamedConfig {
            name: name.to_owned(),
            args,
        };
        self.set(key, serde_json::to_value(config)?, options)
    }

    // Transformations

    /// Map every free point of the link (point endpoints and vertices).
    ///
    /// Endpoints that reference cells are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements.
    pub fn apply_to_points<F>(
        &mut self,
        mut transform: F,
        options: &SetOptions,
    ) -> GraphResult<Vec<AttributeChange>>
    where
        F: FnMut(Point) -> Point,
    {
        self.require_link()?;
        let mut changes = Vec::new();

        for end in [End::Source, End::Target] {
            let current = self.get(end.key());
            if endpoint_id(current).is_some() {
                continue;
            }
            let point = current.map(Point::from_value).unwrap_or_default();
            let moved = place(current, transform(point));
            changes.extend(self.set(end.key(), moved, options)?);
        }

        let vertices = self.list(VERTICES_KEY)?;
        if !vertices.is_empty() {
            let moved = vertices
                .iter()
                .map(|vertex| place(Some(vertex), transform(Point::from_value(vertex))))
                .collect();
            changes.extend(self.set(VERTICES_KEY, Value::Array(moved), options)?);
        }

        Ok(changes)
    }

    /// Move every free point by `(dx, dy)`.
    ///
    /// The write is annotated with `translate_by`, `tx` and `ty` so observers
    /// can tell a translation from other edits.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements.
    pub fn translate(
        &mut self,
        dx: f64,
        dy: f64,
        options: &SetOptions,
    ) -> GraphResult<Vec<AttributeChange>> {
        let mut options = options.clone();
        if options.annotation("translate_by").is_none() {
            options = options.with_annotation("translate_by", self.id().clone());
        }
        let options = options.with_annotation("tx", dx).with_annotation("ty", dy);
        self.apply_to_points(|point| point.translate(dx, dy), &options)
    }

    /// Scale every free point relative to `origin`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotALink`] for elements.
    pub fn scale(
        &mut self,
        sx: f64,
        sy: f64,
        origin: Point,
        options: &SetOptions,
    ) -> GraphResult<Vec<AttributeChange>> {
        self.apply_to_points(|point| point.scale(sx, sy, origin), options)
    }
}

impl Graph {
    /// The live cell referenced by a link's source.
    #[must_use]
    pub fn get_source_cell(&self, link: &CellId) -> Option<&Cell> {
        self.end_cell(link, End::Source)
    }

    /// The live cell referenced by a link's target.
    #[must_use]
    pub fn get_target_cell(&self, link: &CellId) -> Option<&Cell> {
        self.end_cell(link, End::Target)
    }

    fn end_cell(&self, link: &CellId, end: End) -> Option<&Cell> {
        let id = self.get_cell(link)?.end_id(end)?;
        self.get_cell(&id)
    }

    /// The first element reached by following sources through links.
    #[must_use]
    pub fn get_source_element(&self, link: &CellId) -> Option<&Cell> {
        self.end_element(link, End::Source)
    }

    /// The first element reached by following targets through links.
    #[must_use]
    pub fn get_target_element(&self, link: &CellId) -> Option<&Cell> {
        self.end_element(link, End::Target)
    }

    fn end_element(&self, link: &CellId, end: End) -> Option<&Cell> {
        let mut visited = std::collections::HashSet::new();
        let mut current = self.get_cell(link)?;
        loop {
            if !visited.insert(current.id().clone()) {
                return None;
            }
            current = self.end_cell(current.id(), end)?;
            if current.is_element() {
                return Some(current);
            }
        }
    }

    /// Whether a link connects a cell to itself.
    ///
    /// With `deep`, a link between a cell and one of its descendants counts
    /// too. Point endpoints never loop.
    #[must_use]
    pub fn has_loop(&self, link: &CellId, deep: bool) -> bool {
        let Some(cell) = self.get_cell(link) else {
            return false;
        };
        let (Some(source), Some(target)) = (cell.end_id(End::Source), cell.end_id(End::Target))
        else {
            return false;
        };
        if source == target {
            return true;
        }
        deep && self.contains(&source)
            && self.contains(&target)
            && (self.is_embedded_in(&source, &target) || self.is_embedded_in(&target, &source))
    }

    /// Replace one endpoint of a live link.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CellNotFound`] or [`GraphError::NotALink`].
    pub fn set_endpoint(
        &mut self,
        link: &CellId,
        end: End,
        endpoint: &Endpoint,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        Ok(self
            .update(link, |cell| cell.set_endpoint(end, endpoint, options))?
            .pop())
    }

    /// Replace the source of a live link.
    ///
    /// # Errors
    ///
    /// See [`Graph::set_endpoint`].
    pub fn set_source(
        &mut self,
        link: &CellId,
        endpoint: &Endpoint,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        self.set_endpoint(link, End::Source, endpoint, options)
    }

    /// Replace the target of a live link.
    ///
    /// # Errors
    ///
    /// See [`Graph::set_endpoint`].
    pub fn set_target(
        &mut self,
        link: &CellId,
        endpoint: &Endpoint,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        self.set_endpoint(link, End::Target, endpoint, options)
    }

    /// Embed a link into the cell that owns the relationship it draws.
    ///
    /// With both ends resolved to elements, the new parent is the target when
    /// the ends coincide or the source sits inside the target, the source when
    /// the target sits inside it, and their common ancestor otherwise. The
    /// link leaves its previous parent when that differs. Returns the new
    /// parent.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CellNotFound`], [`GraphError::NotALink`], or an
    /// embedding error.
    pub fn reparent(&mut self, link: &CellId) -> GraphResult<Option<CellId>> {
        let cell = self
            .get_cell(link)
            .ok_or_else(|| GraphError::CellNotFound(link.clone()))?;
        if !cell.is_link() {
            return Err(GraphError::NotALink(link.clone()));
        }

        let source = self.get_source_element(link).map(|c| c.id().clone());
        let target = self.get_target_element(link).map(|c| c.id().clone());
        let new_parent = match (source, target) {
            (Some(source), Some(target)) => {
                if source == target || self.is_embedded_in(&source, &target) {
                    Some(target)
                } else if self.is_embedded_in(&target, &source) {
                    Some(source)
                } else {
                    self.get_common_ancestor(&[source, target])
                }
            }
            _ => None,
        };

        match self.hierarchy.parent(link).cloned() {
            Some(previous) if !self.contains(&previous) => {
                self.hierarchy.detach(link);
                self.write_structural(link, PARENT_KEY, None, &SetOptions::default());
            }
            Some(previous) if new_parent.as_ref() != Some(&previous) => {
                self.unembed(&previous, link)?;
            }
            _ => {}
        }
        if let Some(parent) = &new_parent {
            if !self.is_child_of(link, parent) {
                self.embed(parent, link)?;
            }
        }

        tracing::debug!("Reparented link {link} to {new_parent:?}");
        Ok(new_parent)
    }

    /// Common ancestor of the link and its resolved end elements.
    #[must_use]
    pub fn get_relationship_ancestor(&self, link: &CellId) -> Option<CellId> {
        if !self.get_cell(link).is_some_and(Cell::is_link) {
            return None;
        }
        let mut cells = vec![link.clone()];
        cells.extend(self.get_source_element(link).map(|c| c.id().clone()));
        cells.extend(self.get_target_element(link).map(|c| c.id().clone()));
        self.get_common_ancestor(&cells)
    }

    /// Whether the link and both of its ends are inside `cell`.
    #[must_use]
    pub fn is_relationship_embedded_in(&self, link: &CellId, cell: &CellId) -> bool {
        self.get_relationship_ancestor(link)
            .is_some_and(|ancestor| ancestor == *cell || self.is_embedded_in(&ancestor, cell))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> Cell {
        Cell::link("basic.Link")
    }

    fn opts() -> SetOptions {
        SetOptions::default()
    }

    #[test]
    fn test_endpoint_parsing() {
        let cell = Endpoint::from_value(&json!({ "id": "a", "port": "in", "anchor": { "name": "center" } }));
        assert_eq!(cell.id(), Some(&CellId::from("a")));
        assert_eq!(cell.port_id(), Some("in"));
        assert_eq!(
            cell.to_value(),
            json!({ "id": "a", "port": "in", "anchor": { "name": "center" } })
        );

        let point = Endpoint::from_value(&json!({ "x": 5 }));
        assert_eq!(point, Endpoint::point(5.0, 0.0));
        assert_eq!(point.to_value(), json!({ "x": 5, "y": 0 }));
    }

    #[test]
    fn test_ends_equal() {
        assert!(Endpoint::ends_equal(&Endpoint::cell("a"), &Endpoint::cell("a")));
        assert!(!Endpoint::ends_equal(&Endpoint::cell("a"), &Endpoint::port("a", "p")));
        assert!(Endpoint::ends_equal(&Endpoint::port("a", "p"), &Endpoint::port("a", "p")));
        assert!(!Endpoint::ends_equal(&Endpoint::cell("a"), &Endpoint::cell("b")));
    }

    #[test]
    fn test_link_api_rejects_elements() {
        let mut element = Cell::element("basic.Rect");
        assert!(matches!(element.source(), Err(GraphError::NotALink(_))));
        assert!(matches!(element.labels(), Err(GraphError::NotALink(_))));
        assert!(matches!(
            element.translate(1.0, 1.0, &opts()),
            Err(GraphError::NotALink(_))
        ));
    }

    #[test]
    fn test_label_helpers() {
        let mut link = link();
        assert!(!link.has_labels());
        link.append_label(json!({ "text": "a" }), &opts()).expect("append");
        link.append_label(json!({ "text": "c" }), &opts()).expect("append");
        link.insert_label(Some(1), json!({ "text": "b" }), &opts())
            .expect("insert");
        link.insert_label(Some(-1), json!({ "text": "d" }), &opts())
            .expect("insert at end");

        let texts: Vec<Value> = link
            .labels()
            .expect("labels")
            .iter()
            .map(|l| l["text"].clone())
            .collect();
        assert_eq!(texts, vec![json!("a"), json!("b"), json!("c"), json!("d")]);
        assert_eq!(link.label(-1).expect("label"), Some(&json!({ "text": "d" })));

        link.set_label(0, json!({ "position": 0.5 }), &opts()).expect("set");
        assert_eq!(
            link.label(0).expect("label"),
            Some(&json!({ "text": "a", "position": 0.5 }))
        );

        link.remove_label(None, &opts()).expect("remove last");
        link.remove_label(Some(0), &opts()).expect("remove first");
        assert_eq!(link.labels().expect("labels").len(), 2);

        assert!(matches!(
            link.insert_label(None, Value::Null, &opts()),
            Err(GraphError::MissingArgument("label"))
        ));
    }

    #[test]
    fn test_vertex_helpers() {
        let mut link = link();
        link.insert_vertex(None, Point::new(1.0, 1.0), &opts()).expect("insert");
        link.insert_vertex(Some(0), Point::new(0.0, 0.0), &opts()).expect("insert");
        link.set_vertex(-1, Point::new(2.0, 3.0), &opts()).expect("set");

        assert_eq!(
            link.vertices().expect("vertices"),
            vec![Point::new(0.0, 0.0), Point::new(2.0, 3.0)]
        );
        assert_eq!(link.remove_vertex(Some(5), &opts()).expect("remove"), None);
        link.remove_vertex(Some(0), &opts()).expect("remove");
        assert_eq!(link.vertex(0).expect("vertex"), Some(Point::new(2.0, 3.0)));
    }

    #[test]
    fn test_router_and_connector() {
        let mut link = link();
        assert_eq!(link.router().expect("router"), None);
        link.set_router("manhattan", Some(json!({ "step": 10 })), &opts())
            .expect("set router");
        link.set_connector("rounded", None, &opts()).expect("set connector");

        let router = link.router().expect("router").expect("configured");
        assert_eq!(router.name, "manhattan");
        assert_eq!(router.args, Some(json!({ "step": 10 })));
        assert_eq!(link.prop("connector"), Some(&json!({ "name": "rounded" })));
    }

    #[test]
    fn test_translate_moves_only_free_points() {
        let mut link = link()
            .with_prop("source", json!({ "id": "a" }))
            .with_prop("target", json!({ "x": 10, "y": 10 }))
            .with_prop("vertices", json!([{ "x": 1, "y": 2 }]));

        let changes = link.translate(5.0, -5.0, &opts()).expect("translate");
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].options.annotation("tx"), Some(&json!(5.0)));
        assert_eq!(link.prop("source"), Some(&json!({ "id": "a" })));
        assert_eq!(link.target().expect("target"), Endpoint::point(15.0, 5.0));
        assert_eq!(link.vertices().expect("vertices"), vec![Point::new(6.0, -3.0)]);
    }

    #[test]
    fn test_scale_around_origin() {
        let mut link = link()
            .with_prop("source", json!({ "x": 10, "y": 10 }))
            .with_prop("target", json!({ "x": 20, "y": 0 }));
        link.scale(2.0, 0.5, Point::new(10.0, 0.0), &opts())
            .expect("scale");
        assert_eq!(link.source().expect("source"), Endpoint::point(10.0, 5.0));
        assert_eq!(link.target().expect("target"), Endpoint::point(30.0, 0.0));
    }

    #[test]
    fn test_disconnect() {
        let mut link = link()
            .with_prop("source", json!({ "id": "a" }))
            .with_prop("target", json!({ "id": "b" }));
        let changes = link.disconnect(&opts()).expect("disconnect");
        assert_eq!(changes.len(), 2);
        assert!(link.source().expect("source").is_point());
        assert!(link.target().expect("target").is_point());
    }

    #[test]
    fn test_index_helpers() {
        assert_eq!(insert_index(None, 3), 3);
        assert_eq!(insert_index(Some(-1), 3), 3);
        assert_eq!(insert_index(Some(-2), 3), 2);
        assert_eq!(insert_index(Some(10), 3), 3);
        assert_eq!(remove_index(None, 3), Some(2));
        assert_eq!(remove_index(Some(3), 3), None);
        assert_eq!(remove_index(None, 0), None);
        assert_eq!(read_index(-1, 3), Some(2));
        assert_eq!(read_index(-4, 3), None);
    }
}
