//! The graph: an owning arena of cells.
//!
//! [`Graph`] owns every live [`Cell`], keeps them sorted by `z`, indexes link
//! connectivity and the embedding hierarchy, and publishes a [`GraphEvent`]
//! for every effective mutation. Live cells are only mutated through the
//! graph so that those indexes never go stale.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use serde_json::{json, Map, Value};

use crate::attributes::{AttrPath, AttributeChange, SetOptions};
use crate::cell::{extract_ports, Cell, CellId, ATTRS_KEY, Z_KEY};
use crate::config::GraphConfig;
use crate::event::{BatchEvent, GraphEvent, Listener, ListenerId};
use crate::hierarchy::{EmbeddedOptions, Hierarchy};
use crate::link::{endpoint_id, endpoint_port, End};
use crate::registry::KindRegistry;
use crate::transition::Transitions;
use crate::{GraphError, GraphResult};

/// Conversion of a cell mutation result into the changes it produced.
pub trait IntoChanges {
    /// The changes, in the order they were applied.
    fn into_changes(self) -> Vec<AttributeChange>;
}

impl IntoChanges for Option<AttributeChange> {
    fn into_changes(self) -> Vec<AttributeChange> {
        self.into_iter().collect()
    }
}

impl IntoChanges for Vec<AttributeChange> {
    fn into_changes(self) -> Vec<AttributeChange> {
        self
    }
}

/// Options for connectivity queries and graph searches.
///
/// With neither `inbound` nor `outbound` set, both directions are used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct ConnectionOptions {
    /// Follow links that end at the cell.
    pub inbound: bool,
    /// Follow links that start at the cell.
    pub outbound: bool,
    /// Also consider links of the cell's deep embedded elements.
    pub deep: bool,
    /// With `deep`, keep links whose both ends are inside the embedded set.
    pub include_enclosed: bool,
    /// Follow link-to-link connections transitively.
    pub indirect: bool,
    /// Search breadth-first instead of depth-first.
    pub breadth_first: bool,
}

impl ConnectionOptions {
    /// Inbound direction only.
    #[must_use]
    pub fn inbound_only() -> Self {
        Self {
            inbound: true,
            ..Self::default()
        }
    }

    /// Outbound direction only.
    #[must_use]
    pub fn outbound_only() -> Self {
        Self {
            outbound: true,
            ..Self::default()
        }
    }

    /// Enable `deep`.
    #[must_use]
    pub const fn with_deep(mut self) -> Self {
        self.deep = true;
        self
    }

    /// Enable `breadth_first`.
    #[must_use]
    pub const fn with_breadth_first(mut self) -> Self {
        self.breadth_first = true;
        self
    }

    /// Effective `(inbound, outbound)` pair.
    #[must_use]
    pub const fn directions(&self) -> (bool, bool) {
        if !self.inbound && !self.outbound {
            (true, true)
        } else {
            (self.inbound, self.outbound)
        }
    }
}

#[derive(Default)]
struct LinkCollector {
    links: Vec<CellId>,
    seen: HashSet<CellId>,
}

impl LinkCollector {
    fn insert(&mut self, id: &CellId) -> bool {
        if self.seen.insert(id.clone()) {
            self.links.push(id.clone());
            true
        } else {
            false
        }
    }
}

/// A collection of cells with hierarchy, connectivity and notifications.
pub struct Graph {
    pub(crate) cells: HashMap<CellId, Cell>,
    /// Live ids, stable-sorted by `z`.
    order: Vec<CellId>,
    pub(crate) hierarchy: Hierarchy,
    /// Link ids keyed by their source cell id.
    out_links: HashMap<CellId, Vec<CellId>>,
    /// Link ids keyed by their target cell id.
    in_links: HashMap<CellId, Vec<CellId>>,
    registry: KindRegistry,
    pub(crate) config: GraphConfig,
    batches: HashMap<String, usize>,
    batch_depth: usize,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
    pub(crate) transitions: Transitions,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("order", &self.order)
            .field("hierarchy", &self.hierarchy)
            .field("config", &self.config)
            .field("batches", &self.batches)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Create an empty graph with the default configuration.
    ///
    /// Transitions run on a built-in [`ManualScheduler`](crate::ManualScheduler),
    /// reachable through [`Graph::manual_scheduler`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    /// Create an empty graph with the given configuration.
    #[must_use]
    pub fn with_config(config: GraphConfig) -> Self {
        Self {
            cells: HashMap::new(),
            order: Vec::new(),
            hierarchy: Hierarchy::default(),
            out_links: HashMap::new(),
            in_links: HashMap::new(),
            registry: KindRegistry::new(),
            transitions: Transitions::new(config.transition),
            config,
            batches: HashMap::new(),
            batch_depth: 0,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    /// Use the given kind registry.
    #[must_use]
    pub fn with_registry(mut self, registry: KindRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// The graph configuration.
    #[must_use]
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// The kind registry used for creation and export.
    #[must_use]
    pub fn registry(&self) -> &KindRegistry {
        &self.registry
    }

    /// Mutable access to the kind registry.
    pub fn registry_mut(&mut self) -> &mut KindRegistry {
        &mut self.registry
    }

    /// Create a detached cell of a registered kind.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownKind`] if the kind is not registered.
    pub fn create_cell(&self, type_name: &str) -> GraphResult<Cell> {
        self.registry.create(type_name)
    }

    // ---------------------------------------------------------------------
    // Listeners
    // ---------------------------------------------------------------------

    /// Register a listener for every graph event.
    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&GraphEvent) + 'static,
    {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener, _)| *listener != id);
        self.listeners.len() != before
    }

    pub(crate) fn emit(&mut self, event: &GraphEvent) {
        for (_, listener) in &mut self.listeners {
            listener(event);
        }
    }

    // ---------------------------------------------------------------------
    // Batches
    // ---------------------------------------------------------------------

    /// Open a named batch.
    pub fn start_batch(&mut self, name: &str) {
        self.open_batch(name, None, Map::new());
    }

    /// Open a named batch carrying a payload for observers.
    pub fn start_batch_with(&mut self, name: &str, data: Map<String, Value>) {
        self.open_batch(name, None, data);
    }

    /// Close a named batch.
    pub fn stop_batch(&mut self, name: &str) {
        self.close_batch(name, None);
    }

    /// Whether a batch with this name is open.
    #[must_use]
    pub fn has_active_batch(&self, name: &str) -> bool {
        self.batches.get(name).is_some_and(|count| *count > 0)
    }

    /// Whether any batch is open.
    #[must_use]
    pub fn has_any_active_batch(&self) -> bool {
        self.batches.values().any(|count| *count > 0)
    }

    pub(crate) fn open_batch(&mut self, name: &str, cell: Option<&CellId>, data: Map<String, Value>) {
        *self.batches.entry(name.to_owned()).or_insert(0) += 1;
        self.batch_depth += 1;
        self.emit(&GraphEvent::BatchStart(BatchEvent {
            name: name.to_owned(),
            cell: cell.cloned(),
            data,
        }));
    }

    pub(crate) fn close_batch(&mut self, name: &str, cell: Option<&CellId>) {
        match self.batches.get_mut(name) {
            Some(count) if *count > 0 => *count -= 1,
            _ => tracing::warn!("Stopping batch {name} that was never started"),
        }
        self.emit(&GraphEvent::BatchStop(BatchEvent {
            name: name.to_owned(),
            cell: cell.cloned(),
            data: Map::new(),
        }));
        if self.batch_depth > 0 {
            self.batch_depth -= 1;
            if self.batch_depth == 0 {
                self.emit(&GraphEvent::BatchComplete);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Insertion and removal
    // ---------------------------------------------------------------------

    /// Add a detached cell, making it live.
    ///
    /// A cell without `z` is placed in front of every other cell. `parent`
    /// and `embeds` carried by the cell (e.g. from an exported document) are
    /// taken into the hierarchy index once they agree with the live cells.
    ///
    /// A link keeps the parent it arrives with. Its embedding is recomputed
    /// by [`Graph::reparent`], which runs when `source` or `target` changes
    /// and can be called directly after adding.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateId`] if a cell with the same id is live,
    /// and [`GraphError::InvalidDocument`] if its `parent`/`embeds` contradict
    /// the live cells or close an embedding cycle.
    pub fn add_cell(&mut self, cell: Cell) -> GraphResult<CellId> {
        if self.cells.contains_key(cell.id()) {
            return Err(GraphError::DuplicateId(cell.id().clone()));
        }
        self.check_hierarchy(std::slice::from_ref(&cell), true)?;
        let id = self.insert(cell);
        self.emit(&GraphEvent::Add { cell: id.clone() });
        Ok(id)
    }

    /// Add several cells inside an `add` batch.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateId`] before adding anything if any id is
    /// live or repeated, and [`GraphError::InvalidDocument`] if the cells'
    /// `parent`/`embeds` disagree or form a cycle.
    pub fn add_cells(&mut self, cells: Vec<Cell>) -> GraphResult<Vec<CellId>> {
        self.check_new_ids(&cells)?;
        self.check_hierarchy(&cells, true)?;
        if cells.is_empty() {
            return Ok(Vec::new());
        }
        self.open_batch("add", None, Map::new());
        let mut ids = Vec::with_capacity(cells.len());
        for cell in cells {
            let id = self.insert(cell);
            self.emit(&GraphEvent::Add { cell: id.clone() });
            ids.push(id);
        }
        self.close_batch("add", None);
        Ok(ids)
    }

    /// Replace every cell at once, publishing a single `Reset` event.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateId`] if `cells` repeats an id and
    /// [`GraphError::InvalidDocument`] if their embedding records disagree or
    /// form a cycle; the graph is left unchanged in both cases.
    pub fn reset_cells(&mut self, cells: Vec<Cell>) -> GraphResult<()> {
        let mut seen = HashSet::new();
        for cell in &cells {
            if !seen.insert(cell.id().clone()) {
                return Err(GraphError::DuplicateId(cell.id().clone()));
            }
        }
        self.check_hierarchy(&cells, false)?;
        let ids: Vec<CellId> = self.order.clone();
        for id in &ids {
            self.cancel_cell_transitions(id);
        }
        self.cells.clear();
        self.order.clear();
        self.hierarchy.clear();
        self.out_links.clear();
        self.in_links.clear();
        for cell in cells {
            self.insert(cell);
        }
        tracing::debug!("Reset graph with {} cell(s)", self.cells.len());
        self.emit(&GraphEvent::Reset);
        Ok(())
    }

    fn check_new_ids(&self, cells: &[Cell]) -> GraphResult<()> {
        let mut seen = HashSet::new();
        for cell in cells {
            if self.cells.contains_key(cell.id()) || !seen.insert(cell.id().clone()) {
                return Err(GraphError::DuplicateId(cell.id().clone()));
            }
        }
        Ok(())
    }

    /// Check that incoming `parent`/`embeds` records mirror each other and
    /// contain no cycle. With `live`, the current cells take part as well.
    /// References to cells that are not known yet are left alone.
    fn check_hierarchy(&self, cells: &[Cell], live: bool) -> GraphResult<()> {
        let incoming: HashMap<&CellId, &Cell> = cells.iter().map(|cell| (cell.id(), cell)).collect();
        let existing = live.then_some(&self.cells);

        for cell in cells {
            let id = cell.id();
            let parent = cell.parent_id();
            let embeds = cell.embed_ids();

            if let Some(parent) = &parent {
                if let Some(owner) = known_cell(&incoming, existing, parent) {
                    if !owner.embed_ids().contains(id) {
                        return Err(GraphError::InvalidDocument(format!(
                            "{id} names parent {parent}, which does not embed it"
                        )));
                    }
                }
            }
            for child in &embeds {
                if let Some(embedded) = known_cell(&incoming, existing, child) {
                    if embedded.parent_id().as_ref() != Some(id) {
                        return Err(GraphError::InvalidDocument(format!(
                            "{id} embeds {child}, which names another parent"
                        )));
                    }
                }
            }
            if live {
                if let Some(recorded) = self.hierarchy.parent(id) {
                    if parent.as_ref() != Some(recorded) {
                        return Err(GraphError::InvalidDocument(format!(
                            "{recorded} embeds {id}, which names another parent"
                        )));
                    }
                }
                if let Some(child) = self.hierarchy.children(id).iter().find(|c| !embeds.contains(c)) {
                    return Err(GraphError::InvalidDocument(format!(
                        "{child} names parent {id}, which does not embed it"
                    )));
                }
            }

            let mut chain = HashSet::from([id.clone()]);
            let mut current = parent;
            while let Some(ancestor) = current {
                if !chain.insert(ancestor.clone()) {
                    return Err(GraphError::InvalidDocument(format!(
                        "embedding cycle through {ancestor}"
                    )));
                }
                current = known_cell(&incoming, existing, &ancestor).and_then(Cell::parent_id);
            }
        }
        Ok(())
    }

    fn insert(&mut self, mut cell: Cell) -> CellId {
        if !cell.has_z() {
            let z = self.max_z_index() + 1;
            cell.set_structural(Z_KEY, Some(json!(z)), &SetOptions::silent());
        }
        let id = cell.id().clone();

        if let Some(parent) = cell.parent_id() {
            self.hierarchy.attach(&parent, &id, None);
        }
        for child in cell.embed_ids() {
            self.hierarchy.attach(&id, &child, None);
        }
        if cell.is_link() {
            if let Some(source) = cell.end_id(End::Source) {
                push_unique(self.out_links.entry(source).or_default(), &id);
            }
            if let Some(target) = cell.end_id(End::Target) {
                push_unique(self.in_links.entry(target).or_default(), &id);
            }
        }

        tracing::debug!("Added {} {id} at z {}", cell.type_name(), cell.z());
        self.cells.insert(id.clone(), cell);
        self.order.push(id.clone());
        self.sort_order();
        id
    }

    /// Remove a cell, cascading inside a `remove` batch.
    ///
    /// The cell is unembedded from its parent, its embedded cells are removed
    /// recursively, and its connected links are removed (or disconnected when
    /// [`GraphConfig::disconnect_links_on_remove`] is set). Every removed cell
    /// is returned detached, in removal order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CellNotFound`] if the cell is not live.
    pub fn remove_cell(&mut self, id: &CellId) -> GraphResult<Vec<Cell>> {
        if !self.cells.contains_key(id) {
            return Err(GraphError::CellNotFound(id.clone()));
        }
        let disconnect = self.config.disconnect_links_on_remove;
        self.open_batch("remove", Some(id), Map::new());
        let mut removed = Vec::new();
        self.remove_cascade(id, disconnect, &mut removed);
        self.close_batch("remove", Some(id));
        tracing::debug!("Removed {} cell(s) starting at {id}", removed.len());
        Ok(removed)
    }

    /// Remove several cells inside one `remove` batch.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CellNotFound`] before removing anything if any id
    /// is not live.
    pub fn remove_cells(&mut self, ids: &[CellId]) -> GraphResult<Vec<Cell>> {
        if let Some(missing) = ids.iter().find(|id| !self.cells.contains_key(*id)) {
            return Err(GraphError::CellNotFound(missing.clone()));
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.open_batch("remove", None, Map::new());
        let mut removed = Vec::new();
        for id in ids {
            if self.cells.contains_key(id) {
                removed.append(&mut self.remove_cell(id)?);
            }
        }
        self.close_batch("remove", None);
        Ok(removed)
    }

    /// Remove every cell, links first, inside a `clear` batch.
    pub fn clear(&mut self) -> Vec<Cell> {
        if self.cells.is_empty() {
            return Vec::new();
        }
        self.open_batch("clear", None, Map::new());
        let mut ids = self.order.clone();
        ids.sort_by_key(|id| self.cells.get(id).is_some_and(Cell::is_element));
        let mut removed = Vec::new();
        for id in &ids {
            if let Ok(mut cells) = self.remove_cell(id) {
                removed.append(&mut cells);
            }
        }
        self.close_batch("clear", None);
        removed
    }

    fn remove_cascade(&mut self, id: &CellId, disconnect: bool, removed: &mut Vec<Cell>) {
        if !self.cells.contains_key(id) {
            return;
        }
        if let Some(parent) = self.hierarchy.parent(id).cloned() {
            if self.cells.contains_key(&parent) {
                self.detach_child(&parent, id, &SetOptions::default());
            } else {
                self.hierarchy.detach(id);
            }
        }
        for child in self.hierarchy.children(id).to_vec() {
            self.remove_cascade(&child, disconnect, removed);
        }
        for link in self.get_connected_links(id, &ConnectionOptions::default()) {
            if disconnect {
                self.disconnect_link_from(&link, id);
            } else {
                self.remove_cascade(&link, disconnect, removed);
            }
        }
        self.cancel_cell_transitions(id);
        if let Some(cell) = self.detach(id) {
            self.emit(&GraphEvent::Remove { cell: id.clone() });
            removed.push(cell);
        }
    }

    /// Drop a cell from every index without cascading.
    fn detach(&mut self, id: &CellId) -> Option<Cell> {
        let cell = self.cells.remove(id)?;
        self.order.retain(|other| other != id);
        self.hierarchy.forget(id);
        if cell.is_link() {
            if let Some(source) = cell.end_id(End::Source) {
                remove_from_index(&mut self.out_links, &source, id);
            }
            if let Some(target) = cell.end_id(End::Target) {
                remove_from_index(&mut self.in_links, &target, id);
            }
        }
        Some(cell)
    }

    // ---------------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------------

    /// Look up a live cell.
    #[must_use]
    pub fn get_cell(&self, id: &CellId) -> Option<&Cell> {
        self.cells.get(id)
    }

    /// Whether a cell is live.
    #[must_use]
    pub fn contains(&self, id: &CellId) -> bool {
        self.cells.contains_key(id)
    }

    /// Live ids in z order.
    #[must_use]
    pub fn ids(&self) -> &[CellId] {
        &self.order
    }

    /// All cells in z order.
    #[must_use]
    pub fn get_cells(&self) -> Vec<&Cell> {
        self.order.iter().filter_map(|id| self.cells.get(id)).collect()
    }

    /// All elements in z order.
    #[must_use]
    pub fn get_elements(&self) -> Vec<&Cell> {
        self.get_cells().into_iter().filter(|c| c.is_element()).collect()
    }

    /// All links in z order.
    #[must_use]
    pub fn get_links(&self) -> Vec<&Cell> {
        self.get_cells().into_iter().filter(|c| c.is_link()).collect()
    }

    /// The back-most cell.
    #[must_use]
    pub fn get_first_cell(&self) -> Option<&Cell> {
        self.order.first().and_then(|id| self.cells.get(id))
    }

    /// The front-most cell.
    #[must_use]
    pub fn get_last_cell(&self) -> Option<&Cell> {
        self.order.last().and_then(|id| self.cells.get(id))
    }

    /// Number of live cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the graph has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Lowest `z` (0 for an empty graph).
    #[must_use]
    pub fn min_z_index(&self) -> i64 {
        self.get_first_cell().map_or(0, Cell::z)
    }

    /// Highest `z` (0 for an empty graph).
    #[must_use]
    pub fn max_z_index(&self) -> i64 {
        self.get_last_cell().map_or(0, Cell::z)
    }

    /// Position of a cell in z order.
    pub(crate) fn order_index(&self, id: &CellId) -> Option<usize> {
        self.order.iter().position(|other| other == id)
    }

    fn sort_order(&mut self) {
        let cells = &self.cells;
        self.order.sort_by_key(|id| cells.get(id).map_or(0, Cell::z));
    }

    // ---------------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------------

    /// Mutate a live cell and publish what changed.
    ///
    /// Every change is published as [`GraphEvent::Change`] (unless silent),
    /// then the graph reacts to it: `z` re-sorts, `source`/`target` re-index
    /// and reparent the link, and `attrs` removes links attached to ports
    /// that disappeared.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CellNotFound`] if the cell is not live, or the
    /// error returned by `mutate`.
    pub fn update<F, R>(&mut self, id: &CellId, mutate: F) -> GraphResult<Vec<AttributeChange>>
    where
        F: FnOnce(&mut Cell) -> GraphResult<R>,
        R: IntoChanges,
    {
        let cell = self
            .cells
            .get_mut(id)
            .ok_or_else(|| GraphError::CellNotFound(id.clone()))?;
        let changes = mutate(cell)?.into_changes();
        self.dispatch_changes(id, &changes);
        Ok(changes)
    }

    /// Replace a whole top-level attribute of a live cell.
    ///
    /// # Errors
    ///
    /// See [`Graph::update`] and [`Cell::set`].
    pub fn set(
        &mut self,
        id: &CellId,
        key: &str,
        value: Value,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        Ok(self.update(id, |cell| cell.set(key, value, options))?.pop())
    }

    /// Merge a value at a path of a live cell.
    ///
    /// # Errors
    ///
    /// See [`Graph::update`] and [`Cell::set_prop`].
    pub fn set_prop(
        &mut self,
        id: &CellId,
        path: impl Into<AttrPath>,
        value: Value,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        Ok(self.update(id, |cell| cell.set_prop(path, value, options))?.pop())
    }

    /// Merge a value under `attrs` of a live cell.
    ///
    /// # Errors
    ///
    /// See [`Graph::update`] and [`Cell::set_attr`].
    pub fn set_attr(
        &mut self,
        id: &CellId,
        path: impl Into<AttrPath>,
        value: Value,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        Ok(self.update(id, |cell| cell.set_attr(path, value, options))?.pop())
    }

    /// Remove a top-level attribute of a live cell.
    ///
    /// # Errors
    ///
    /// See [`Graph::update`] and [`Cell::unset`].
    pub fn unset(
        &mut self,
        id: &CellId,
        key: &str,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        Ok(self.update(id, |cell| cell.unset(key, options))?.pop())
    }

    /// Remove the value at a path of a live cell.
    ///
    /// # Errors
    ///
    /// See [`Graph::update`] and [`Cell::remove_prop`].
    pub fn remove_prop(
        &mut self,
        id: &CellId,
        path: impl Into<AttrPath>,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        Ok(self.update(id, |cell| cell.remove_prop(path, options))?.pop())
    }

    /// Remove the value under `attrs` of a live cell.
    ///
    /// # Errors
    ///
    /// See [`Graph::update`] and [`Cell::remove_attr`].
    pub fn remove_attr(
        &mut self,
        id: &CellId,
        path: impl Into<AttrPath>,
        options: &SetOptions,
    ) -> GraphResult<Option<AttributeChange>> {
        Ok(self.update(id, |cell| cell.remove_attr(path, options))?.pop())
    }

    /// Write a graph-managed key and publish the change.
    pub(crate) fn write_structural(
        &mut self,
        id: &CellId,
        key: &str,
        value: Option<Value>,
        options: &SetOptions,
    ) {
        let Some(cell) = self.cells.get_mut(id) else {
            return;
        };
        if let Some(change) = cell.set_structural(key, value, options) {
            self.dispatch_changes(id, std::slice::from_ref(&change));
        }
    }

    fn dispatch_changes(&mut self, id: &CellId, changes: &[AttributeChange]) {
        for change in changes {
            if !change.options.silent {
                self.emit(&GraphEvent::change(id.clone(), change.clone()));
            }
            match change.key.as_str() {
                Z_KEY => {
                    self.sort_order();
                    if !change.options.silent {
                        self.emit(&GraphEvent::Sort);
                    }
                }
                "source" | "target" if self.cells.get(id).is_some_and(Cell::is_link) => {
                    let end = if change.key == "source" {
                        End::Source
                    } else {
                        End::Target
                    };
                    self.reindex_end(
                        id,
                        end,
                        endpoint_id(change.previous.as_ref()),
                        endpoint_id(change.current.as_ref()),
                    );
                    self.reparent_after_endpoint_change(id);
                }
                ATTRS_KEY => self.remove_links_to_removed_ports(id, change.previous.as_ref()),
                _ => {}
            }
        }
    }

    fn reindex_end(
        &mut self,
        link: &CellId,
        end: End,
        previous: Option<CellId>,
        current: Option<CellId>,
    ) {
        let index = match end {
            End::Source => &mut self.out_links,
            End::Target => &mut self.in_links,
        };
        if let Some(previous) = previous {
            remove_from_index(index, &previous, link);
        }
        if let Some(current) = current {
            push_unique(index.entry(current).or_default(), link);
        }
    }

    fn reparent_after_endpoint_change(&mut self, link: &CellId) {
        if let Err(e) = self.reparent(link) {
            tracing::warn!("Could not reparent link {link}: {e}");
        }
    }

    /// Remove links whose source or target port no longer exists on `id`.
    fn remove_links_to_removed_ports(&mut self, id: &CellId, previous_attrs: Option<&Value>) {
        let Some(cell) = self.cells.get(id) else {
            return;
        };
        let removed_ports: HashSet<String> = extract_ports(previous_attrs)
            .into_keys()
            .filter(|port| !cell.has_port(port))
            .collect();
        if removed_ports.is_empty() {
            return;
        }
        tracing::debug!("Ports {removed_ports:?} removed from {id}");

        let mut stale = Vec::new();
        for (end, options) in [
            (End::Target, ConnectionOptions::inbound_only()),
            (End::Source, ConnectionOptions::outbound_only()),
        ] {
            for link_id in self.get_connected_links(id, &options) {
                let Some(link) = self.cells.get(&link_id) else {
                    continue;
                };
                let port = endpoint_port(link.get(end.key()));
                if link.end_id(end).as_ref() == Some(id)
                    && port.is_some_and(|port| removed_ports.contains(&port))
                {
                    stale.push(link_id);
                }
            }
        }
        for link_id in stale {
            if self.cells.contains_key(&link_id) {
                if let Err(e) = self.remove_cell(&link_id) {
                    tracing::warn!("Could not remove link {link_id}: {e}");
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Connectivity
    // ---------------------------------------------------------------------

    /// Links connected to a cell.
    ///
    /// Links are returned once each, self-loops included, in discovery order.
    #[must_use]
    pub fn get_connected_links(&self, id: &CellId, options: &ConnectionOptions) -> Vec<CellId> {
        let (inbound, outbound) = options.directions();
        let mut collector = LinkCollector::default();
        if outbound {
            self.collect_outbound(id, options, &mut collector);
        }
        if inbound {
            self.collect_inbound(id, options, &mut collector);
        }

        if options.deep {
            let embedded = self.get_embedded_cells(id, &EmbeddedOptions::deep());
            let enclosed: HashSet<CellId> = embedded
                .iter()
                .filter(|cell| self.cells.get(*cell).is_some_and(Cell::is_element))
                .cloned()
                .collect();

            for cell_id in embedded.iter().filter(|cell| enclosed.contains(*cell)) {
                let mut candidates: Vec<&CellId> = Vec::new();
                if outbound {
                    candidates.extend(self.out_links.get(cell_id).into_iter().flatten());
                }
                if inbound {
                    candidates.extend(self.in_links.get(cell_id).into_iter().flatten());
                }
                for link_id in candidates {
                    if collector.seen.contains(link_id) {
                        continue;
                    }
                    let Some(link) = self.cells.get(link_id) else {
                        continue;
                    };
                    let inside = |end| link.end_id(end).is_some_and(|end| enclosed.contains(&end));
                    if !options.include_enclosed && inside(End::Source) && inside(End::Target) {
                        continue;
                    }
                    collector.insert(link_id);
                }
            }
        }

        collector.links
    }

    fn collect_outbound(&self, id: &CellId, options: &ConnectionOptions, collector: &mut LinkCollector) {
        let (inbound, outbound) = options.directions();
        for link_id in self.out_links.get(id).into_iter().flatten() {
            if !self.cells.contains_key(link_id) || !collector.insert(link_id) {
                continue;
            }
            if options.indirect {
                if inbound {
                    self.collect_inbound(link_id, options, collector);
                }
                if outbound {
                    self.collect_outbound(link_id, options, collector);
                }
            }
        }
        if options.indirect {
            if let Some(target) = self.get_target_cell(id).filter(|cell| cell.is_link()) {
                let target = target.id().clone();
                if collector.insert(&target) {
                    self.collect_outbound(&target, options, collector);
                }
            }
        }
    }

    fn collect_inbound(&self, id: &CellId, options: &ConnectionOptions, collector: &mut LinkCollector) {
        let (inbound, outbound) = options.directions();
        for link_id in self.in_links.get(id).into_iter().flatten() {
            if !self.cells.contains_key(link_id) || !collector.insert(link_id) {
                continue;
            }
            if options.indirect {
                if inbound {
                    self.collect_inbound(link_id, options, collector);
                }
                if outbound {
                    self.collect_outbound(link_id, options, collector);
                }
            }
        }
        if options.indirect {
            if let Some(source) = self.get_source_cell(id).filter(|cell| cell.is_link()) {
                let source = source.id().clone();
                if collector.insert(&source) {
                    self.collect_inbound(&source, options, collector);
                }
            }
        }
    }

    /// Elements connected to a cell by a link.
    ///
    /// With `deep`, links of embedded elements count and neighbors embedded in
    /// the cell itself are skipped, unless the link is a loop.
    #[must_use]
    pub fn get_neighbors(&self, id: &CellId, options: &ConnectionOptions) -> Vec<CellId> {
        let (inbound, outbound) = options.directions();
        let mut neighbors = Vec::new();
        let mut seen = HashSet::new();

        for link_id in self.get_connected_links(id, options) {
            let Some(link) = self.cells.get(&link_id) else {
                continue;
            };
            let looped = self.has_loop(&link_id, options.deep);
            let ends = [(inbound, End::Source), (outbound, End::Target)];
            for (wanted, end) in ends {
                let Some(candidate) = link.end_id(end).filter(|_| wanted) else {
                    continue;
                };
                if seen.contains(&candidate) || !self.cells.get(&candidate).is_some_and(Cell::is_element) {
                    continue;
                }
                let accept = looped
                    || (candidate != *id && (!options.deep || !self.is_embedded_in(&candidate, id)));
                if accept {
                    seen.insert(candidate.clone());
                    neighbors.push(candidate);
                }
            }
        }

        if self.cells.get(id).is_some_and(Cell::is_link) {
            let ends = [
                (inbound, self.get_source_cell(id)),
                (outbound, self.get_target_cell(id)),
            ];
            for (wanted, cell) in ends {
                if let Some(cell) = cell.filter(|cell| wanted && cell.is_element()) {
                    if seen.insert(cell.id().clone()) {
                        neighbors.push(cell.id().clone());
                    }
                }
            }
        }

        neighbors
    }

    /// Whether `other` is connected to `id` by a link in the given directions.
    #[must_use]
    pub fn is_neighbor(&self, id: &CellId, other: &CellId, options: &ConnectionOptions) -> bool {
        let (inbound, outbound) = options.directions();
        self.get_connected_links(id, options).iter().any(|link_id| {
            self.cells.get(link_id).is_some_and(|link| {
                (inbound && link.end_id(End::Source).as_ref() == Some(other))
                    || (outbound && link.end_id(End::Target).as_ref() == Some(other))
            })
        })
    }

    /// The given cells plus the links between them and the endpoints of the
    /// given links. With `deep`, embedded cells are included too.
    #[must_use]
    pub fn get_subgraph(&self, ids: &[CellId], options: &ConnectionOptions) -> Vec<CellId> {
        let mut subgraph = Vec::new();
        let mut members: HashSet<CellId> = HashSet::new();
        let mut elements = Vec::new();
        let mut links = Vec::new();

        let mut admit = |id: &CellId,
                         subgraph: &mut Vec<CellId>,
                         elements: &mut Vec<CellId>,
                         links: &mut Vec<CellId>| {
            let Some(cell) = self.cells.get(id) else {
                return;
            };
            if members.insert(id.clone()) {
                subgraph.push(id.clone());
                if cell.is_link() {
                    links.push(id.clone());
                } else {
                    elements.push(id.clone());
                }
            }
        };

        for id in ids {
            admit(id, &mut subgraph, &mut elements, &mut links);
            if options.deep {
                for embedded in self.get_embedded_cells(id, &EmbeddedOptions::deep()) {
                    admit(&embedded, &mut subgraph, &mut elements, &mut links);
                }
            }
        }

        for link_id in links.clone() {
            let Some(link) = self.cells.get(&link_id) else {
                continue;
            };
            for end in [End::Source, End::Target] {
                if let Some(end_id) = link.end_id(end) {
                    let mut ignored = Vec::new();
                    admit(&end_id, &mut subgraph, &mut elements, &mut ignored);
                }
            }
        }

        let members_snapshot: HashSet<CellId> = subgraph.iter().cloned().collect();
        let mut added: HashSet<CellId> = HashSet::new();
        for element in &elements {
            for link_id in self.get_connected_links(element, options) {
                if members_snapshot.contains(&link_id) || added.contains(&link_id) {
                    continue;
                }
                let Some(link) = self.cells.get(&link_id) else {
                    continue;
                };
                let connects = |end| {
                    link.end_id(end)
                        .is_some_and(|end| members_snapshot.contains(&end))
                };
                if connects(End::Source) && connects(End::Target) {
                    added.insert(link_id.clone());
                    subgraph.push(link_id);
                }
            }
        }

        subgraph
    }

    // ---------------------------------------------------------------------
    // Search
    // ---------------------------------------------------------------------

    /// Breadth-first search over neighbors.
    ///
    /// `visit` receives each element once with the number of levels crossed to
    /// reach it; returning `false` skips that element's neighbors.
    pub fn bfs<F>(&self, start: &CellId, mut visit: F, options: &ConnectionOptions)
    where
        F: FnMut(&CellId, usize) -> bool,
    {
        if !self.cells.contains_key(start) {
            return;
        }
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([(start.clone(), 0_usize)]);
        while let Some((next, distance)) = queue.pop_front() {
            if !visited.insert(next.clone()) {
                continue;
            }
            if !visit(&next, distance) {
                continue;
            }
            for neighbor in self.get_neighbors(&next, options) {
                queue.push_back((neighbor, distance + 1));
            }
        }
    }

    /// Depth-first search over neighbors. See [`Graph::bfs`].
    pub fn dfs<F>(&self, start: &CellId, mut visit: F, options: &ConnectionOptions)
    where
        F: FnMut(&CellId, usize) -> bool,
    {
        if !self.cells.contains_key(start) {
            return;
        }
        let mut visited = HashSet::new();
        let mut stack = vec![(start.clone(), 0_usize)];
        while let Some((next, distance)) = stack.pop() {
            if !visited.insert(next.clone()) {
                continue;
            }
            if !visit(&next, distance) {
                continue;
            }
            let neighbors = self.get_neighbors(&next, options);
            stack.extend(neighbors.into_iter().rev().map(|n| (n, distance + 1)));
        }
    }

    /// [`Graph::bfs`] or [`Graph::dfs`] depending on `breadth_first`.
    pub fn search<F>(&self, start: &CellId, visit: F, options: &ConnectionOptions)
    where
        F: FnMut(&CellId, usize) -> bool,
    {
        if options.breadth_first {
            self.bfs(start, visit, options);
        } else {
            self.dfs(start, visit, options);
        }
    }

    /// Every element reachable by following links forwards.
    #[must_use]
    pub fn get_successors(&self, id: &CellId, options: &ConnectionOptions) -> Vec<CellId> {
        let options = ConnectionOptions {
            inbound: false,
            outbound: true,
            ..*options
        };
        self.reachable(id, &options)
    }

    /// Every element reachable by following links backwards.
    #[must_use]
    pub fn get_predecessors(&self, id: &CellId, options: &ConnectionOptions) -> Vec<CellId> {
        let options = ConnectionOptions {
            inbound: true,
            outbound: false,
            ..*options
        };
        self.reachable(id, &options)
    }

    fn reachable(&self, id: &CellId, options: &ConnectionOptions) -> Vec<CellId> {
        let mut found = Vec::new();
        self.search(
            id,
            |cell, _| {
                if cell != id {
                    found.push(cell.clone());
                }
                true
            },
            options,
        );
        found
    }

    /// Whether `other` is reachable from `id` following links forwards.
    #[must_use]
    pub fn is_successor(&self, id: &CellId, other: &CellId) -> bool {
        self.get_successors(id, &ConnectionOptions::default())
            .contains(other)
    }

    /// Whether `id` is reachable from `other` following links forwards.
    #[must_use]
    pub fn is_predecessor(&self, id: &CellId, other: &CellId) -> bool {
        self.get_predecessors(id, &ConnectionOptions::default())
            .contains(other)
    }

    /// Elements with no inbound links.
    #[must_use]
    pub fn get_sources(&self) -> Vec<CellId> {
        self.get_elements()
            .into_iter()
            .map(|cell| cell.id().clone())
            .filter(|id| self.is_source(id))
            .collect()
    }

    /// Elements with no outbound links.
    #[must_use]
    pub fn get_sinks(&self) -> Vec<CellId> {
        self.get_elements()
            .into_iter()
            .map(|cell| cell.id().clone())
            .filter(|id| self.is_sink(id))
            .collect()
    }

    /// Whether no link ends at `id`.
    #[must_use]
    pub fn is_source(&self, id: &CellId) -> bool {
        self.in_links.get(id).is_none_or(Vec::is_empty)
    }

    /// Whether no link starts at `id`.
    #[must_use]
    pub fn is_sink(&self, id: &CellId) -> bool {
        self.out_links.get(id).is_none_or(Vec::is_empty)
    }

    /// Remove every link connected to a cell.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CellNotFound`] if the cell is not live.
    pub fn remove_links(&mut self, id: &CellId) -> GraphResult<Vec<Cell>> {
        if !self.cells.contains_key(id) {
            return Err(GraphError::CellNotFound(id.clone()));
        }
        let mut removed = Vec::new();
        for link in self.get_connected_links(id, &ConnectionOptions::default()) {
            if self.cells.contains_key(&link) {
                removed.append(&mut self.remove_cell(&link)?);
            }
        }
        Ok(removed)
    }

    /// Detach every link connected to a cell, replacing the endpoint that
    /// references it with the point `(0, 0)`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CellNotFound`] if the cell is not live.
    pub fn disconnect_links(&mut self, id: &CellId) -> GraphResult<()> {
        if !self.cells.contains_key(id) {
            return Err(GraphError::CellNotFound(id.clone()));
        }
        for link in self.get_connected_links(id, &ConnectionOptions::default()) {
            self.disconnect_link_from(&link, id);
        }
        Ok(())
    }

    fn disconnect_link_from(&mut self, link: &CellId, id: &CellId) {
        let Some(cell) = self.cells.get(link) else {
            return;
        };
        let end = if cell.end_id(End::Source).as_ref() == Some(id) {
            End::Source
        } else {
            End::Target
        };
        let point = json!({ "x": 0, "y": 0 });
        if let Err(e) = self.update(link, |cell| cell.set(end.key(), point, &SetOptions::default())) {
            tracing::warn!("Could not disconnect link {link}: {e}");
        }
    }

    // ---------------------------------------------------------------------
    // Serialization
    // ---------------------------------------------------------------------

    /// Export every cell in z order as `{ "cells": [...] }`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let cells: Vec<Value> = self
            .get_cells()
            .into_iter()
            .map(|cell| cell.to_json(&self.registry))
            .collect();
        json!({ "cells": cells })
    }

    /// Replace the graph contents with an exported document.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvalidDocument`] if there is no `cells` array,
    /// or the error of the first cell that cannot be rebuilt.
    pub fn from_json(&mut self, document: Value) -> GraphResult<()> {
        let Value::Object(mut document) = document else {
            return Err(GraphError::InvalidDocument("expected an object".to_owned()));
        };
        let Some(Value::Array(cells)) = document.remove("cells") else {
            return Err(GraphError::InvalidDocument(
                "graph JSON must contain a cells array".to_owned(),
            ));
        };
        let cells = cells
            .into_iter()
            .map(|cell| self.registry.cell_from_json(cell))
            .collect::<GraphResult<Vec<_>>>()?;
        self.reset_cells(cells)
    }
}

fn known_cell<'a>(
    incoming: &HashMap<&CellId, &'a Cell>,
    existing: Option<&'a HashMap<CellId, Cell>>,
    id: &CellId,
) -> Option<&'a Cell> {
    incoming
        .get(id)
        .copied()
        .or_else(|| existing.and_then(|cells| cells.get(id)))
}

fn push_unique(ids: &mut Vec<CellId>, id: &CellId) {
    if !ids.contains(id) {
        ids.push(id.clone());
    }
}

fn remove_from_index(index: &mut HashMap<CellId, Vec<CellId>>, key: &CellId, id: &CellId) {
    if let Some(ids) = index.get_mut(key) {
        ids.retain(|other| other != id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::cell::{EMBEDS_KEY, PARENT_KEY};
    use crate::link::Endpoint;

    fn element(id: &str) -> Cell {
        Cell::element("basic.Rect").with_id(id)
    }

    fn link(id: &str, source: &str, target: &str) -> Cell {
        Cell::link("basic.Link")
            .with_id(id)
            .with_prop("source", json!({ "id": source }))
            .with_prop("target", json!({ "id": target }))
    }

    fn record(graph: &mut Graph) -> Rc<RefCell<Vec<GraphEvent>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        graph.subscribe(move |event| sink.borrow_mut().push(event.clone()));
        events
    }

    #[test]
    fn test_add_assigns_increasing_z() {
        let mut graph = Graph::new();
        let a = graph.add_cell(element("a")).expect("add a");
        let b = graph.add_cell(element("b")).expect("add b");

        assert_eq!(graph.get_cell(&a).map(Cell::z), Some(1));
        assert_eq!(graph.get_cell(&b).map(Cell::z), Some(2));
        assert_eq!(graph.max_z_index(), 2);
        assert_eq!(graph.min_z_index(), 1);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut graph = Graph::new();
        graph.add_cell(element("a")).expect("add");
        let result = graph.add_cell(element("a"));
        assert!(matches!(result, Err(GraphError::DuplicateId(_))));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_z_change_resorts() {
        let mut graph = Graph::new();
        let a = graph.add_cell(element("a")).expect("add");
        graph.add_cell(element("b")).expect("add");
        let events = record(&mut graph);

        graph
            .set(&a, "z", json!(10), &SetOptions::default())
            .expect("set z");

        assert_eq!(graph.get_last_cell().map(Cell::id), Some(&a));
        assert!(events.borrow().contains(&GraphEvent::Sort));
    }

    #[test]
    fn test_connected_links_dedupes_self_loop() {
        let mut graph = Graph::new();
        graph.add_cell(element("a")).expect("add");
        graph.add_cell(link("l", "a", "a")).expect("add");

        let links = graph.get_connected_links(&CellId::from("a"), &ConnectionOptions::default());
        assert_eq!(links, vec![CellId::from("l")]);
    }

    #[test]
    fn test_remove_cascades_to_links() {
        let mut graph = Graph::new();
        graph.add_cell(element("a")).expect("add");
        graph.add_cell(element("b")).expect("add");
        graph.add_cell(link("l", "a", "b")).expect("add");

        let removed = graph.remove_cell(&CellId::from("a")).expect("remove");
        let ids: Vec<&str> = removed.iter().map(|c| c.id().as_str()).collect();
        assert_eq!(ids, vec!["l", "a"]);
        assert!(!graph.contains(&CellId::from("l")));
        assert!(graph.is_source(&CellId::from("b")));
    }

    #[test]
    fn test_remove_disconnects_when_configured() {
        let config = GraphConfig {
            disconnect_links_on_remove: true,
            ..GraphConfig::default()
        };
        let mut graph = Graph::with_config(config);
        graph.add_cell(element("a")).expect("add");
        graph.add_cell(element("b")).expect("add");
        graph.add_cell(link("l", "a", "b")).expect("add");

        graph.remove_cell(&CellId::from("a")).expect("remove");
        let link = graph.get_cell(&CellId::from("l")).expect("link survives");
        assert_eq!(link.source().expect("source"), Endpoint::point(0.0, 0.0));
    }

    #[test]
    fn test_endpoint_change_reindexes() {
        let mut graph = Graph::new();
        graph.add_cell(element("a")).expect("add");
        graph.add_cell(element("b")).expect("add");
        graph.add_cell(link("l", "a", "b")).expect("add");

        graph
            .set(&CellId::from("l"), "target", json!({ "id": "a" }), &SetOptions::default())
            .expect("set target");

        assert!(graph.is_sink(&CellId::from("b")));
        assert!(graph.is_source(&CellId::from("b")));
        assert!(!graph.is_source(&CellId::from("a")));
    }

    #[test]
    fn test_removed_port_removes_links() {
        let mut graph = Graph::new();
        graph
            .add_cell(element("a").with_attr("out/port", json!("out")))
            .expect("add");
        graph
            .add_cell(element("b").with_attr("in/port", json!({ "id": "in" })))
            .expect("add");
        graph
            .add_cell(
                Cell::link("basic.Link")
                    .with_id("l")
                    .with_prop("source", json!({ "id": "a", "port": "out" }))
                    .with_prop("target", json!({ "id": "b", "port": "in" })),
            )
            .expect("add");
        graph.add_cell(link("other", "a", "b")).expect("add");

        graph
            .remove_attr(&CellId::from("b"), "in/port", &SetOptions::default())
            .expect("remove port");

        assert!(!graph.contains(&CellId::from("l")));
        assert!(graph.contains(&CellId::from("other")));
    }

    #[test]
    fn test_batches_nest_and_complete_once() {
        let mut graph = Graph::new();
        let events = record(&mut graph);

        graph.start_batch("outer");
        graph.start_batch("inner");
        assert!(graph.has_active_batch("inner"));
        graph.stop_batch("inner");
        assert!(!graph.has_active_batch("inner"));
        assert!(graph.has_any_active_batch());
        graph.stop_batch("outer");

        let completes = events
            .borrow()
            .iter()
            .filter(|e| **e == GraphEvent::BatchComplete)
            .count();
        assert_eq!(completes, 1);
    }

    #[test]
    fn test_clear_removes_links_first() {
        let mut graph = Graph::new();
        graph.add_cell(link("l", "a", "b")).expect("add");
        graph.add_cell(element("a")).expect("add");
        graph.add_cell(element("b")).expect("add");

        let removed = graph.clear();
        assert_eq!(removed.first().map(|c| c.id().as_str()), Some("l"));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_neighbors_and_search() {
        let mut graph = Graph::new();
        for id in ["a", "b", "c", "d"] {
            graph.add_cell(element(id)).expect("add");
        }
        graph.add_cell(link("ab", "a", "b")).expect("add");
        graph.add_cell(link("bc", "b", "c")).expect("add");
        graph.add_cell(link("dc", "d", "c")).expect("add");

        let a = CellId::from("a");
        let c = CellId::from("c");
        assert_eq!(
            graph.get_neighbors(&CellId::from("b"), &ConnectionOptions::default()),
            vec![CellId::from("c"), CellId::from("a")]
        );
        assert_eq!(
            graph.get_successors(&a, &ConnectionOptions::default()),
            vec![CellId::from("b"), c.clone()]
        );
        assert!(graph.is_successor(&a, &c));
        assert!(!graph.is_successor(&c, &a));
        assert_eq!(graph.get_sources(), vec![a, CellId::from("d")]);
        assert_eq!(graph.get_sinks(), vec![c]);
    }

    #[test]
    fn test_subgraph_includes_link_endpoints_and_inner_links() {
        let mut graph = Graph::new();
        for id in ["a", "b", "c"] {
            graph.add_cell(element(id)).expect("add");
        }
        graph.add_cell(link("ab", "a", "b")).expect("add");
        graph.add_cell(link("bc", "b", "c")).expect("add");

        let from_link = graph.get_subgraph(&[CellId::from("ab")], &ConnectionOptions::default());
        assert_eq!(
            from_link,
            vec![CellId::from("ab"), CellId::from("a"), CellId::from("b")]
        );

        let from_elements = graph.get_subgraph(
            &[CellId::from("a"), CellId::from("b")],
            &ConnectionOptions::default(),
        );
        assert!(from_elements.contains(&CellId::from("ab")));
        assert!(!from_elements.contains(&CellId::from("bc")));
    }

    #[test]
    fn test_inconsistent_embedding_documents_rejected() {
        let mut graph = Graph::new();
        graph.add_cell(element("keep")).expect("add");
        let before = graph.to_json();

        let cycle = json!({ "cells": [
            { "type": "basic.Rect", "id": "a", "parent": "b", "embeds": ["b"] },
            { "type": "basic.Rect", "id": "b", "parent": "a", "embeds": ["a"] },
        ] });
        assert!(matches!(graph.from_json(cycle), Err(GraphError::InvalidDocument(_))));

        let mismatch = json!({ "cells": [
            { "type": "basic.Rect", "id": "a", "embeds": [] },
            { "type": "basic.Rect", "id": "b", "parent": "a" },
        ] });
        assert!(matches!(graph.from_json(mismatch), Err(GraphError::InvalidDocument(_))));

        let own_parent = json!({ "cells": [
            { "type": "basic.Rect", "id": "a", "parent": "a", "embeds": ["a"] },
        ] });
        assert!(matches!(graph.from_json(own_parent), Err(GraphError::InvalidDocument(_))));

        assert_eq!(graph.to_json(), before);
    }

    #[test]
    fn test_added_child_must_match_live_parent() {
        let mut graph = Graph::new();
        graph.add_cell(element("p")).expect("add");

        let mut child = element("c");
        child.set_structural(PARENT_KEY, Some(json!("p")), &SetOptions::silent());
        assert!(matches!(graph.add_cell(child), Err(GraphError::InvalidDocument(_))));
        assert!(!graph.contains(&CellId::from("c")));

        // Cells arriving before their parent are linked up once it lands.
        let mut early = element("e");
        early.set_structural(PARENT_KEY, Some(json!("q")), &SetOptions::silent());
        graph.add_cell(early).expect("add child first");
        let mut parent = element("q");
        parent.set_structural(EMBEDS_KEY, Some(json!(["e"])), &SetOptions::silent());
        graph.add_cell(parent).expect("add parent");
        assert_eq!(
            graph.get_parent_cell(&CellId::from("e")).map(Cell::id),
            Some(&CellId::from("q"))
        );

        let orphaned = element("r");
        let mut claims = element("s");
        claims.set_structural(PARENT_KEY, Some(json!("r")), &SetOptions::silent());
        assert!(matches!(
            graph.add_cells(vec![orphaned, claims]),
            Err(GraphError::InvalidDocument(_))
        ));
        assert!(!graph.contains(&CellId::from("r")));
    }

    #[test]
    fn test_added_link_keeps_parent_until_reparented() {
        let mut graph = Graph::new();
        for id in ["g", "x", "y"] {
            graph.add_cell(element(id)).expect("add");
        }
        graph.embed(&CellId::from("g"), &CellId::from("x")).expect("embed");
        graph.embed(&CellId::from("g"), &CellId::from("y")).expect("embed");
        graph.add_cell(link("l", "x", "y")).expect("add");
        assert!(graph.get_parent_cell(&CellId::from("l")).is_none());

        assert_eq!(
            graph.reparent(&CellId::from("l")).expect("reparent"),
            Some(CellId::from("g"))
        );
        assert_eq!(
            graph.get_parent_cell(&CellId::from("l")).map(Cell::id),
            Some(&CellId::from("g"))
        );
    }

    #[test]
    fn test_json_round_trip() {
        let mut graph = Graph::new();
        graph.add_cell(element("a")).expect("add");
        graph.add_cell(element("b")).expect("add");
        graph.add_cell(link("l", "a", "b")).expect("add");
        graph.embed(&CellId::from("a"), &CellId::from("b")).expect("embed");

        let document = graph.to_json();
        let mut restored = Graph::new();
        restored.from_json(document.clone()).expect("restore");

        assert_eq!(restored.len(), 3);
        assert_eq!(restored.to_json(), document);
        assert_eq!(
            restored.get_parent_cell(&CellId::from("b")).map(Cell::id),
            Some(&CellId::from("a"))
        );
        assert!(matches!(
            restored.from_json(json!({ "nodes": [] })),
            Err(GraphError::InvalidDocument(_))
        ));
    }
}
