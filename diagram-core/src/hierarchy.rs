//! Parent/child embedding.
//!
//! The [`Hierarchy`] index is the source of truth for traversal; the `parent`
//! and `embeds` attributes of each cell mirror it so that exported documents
//! carry the structure. Embedding is kept acyclic: a cell can never become
//! its own ancestor.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::{Map, Value};

use crate::attributes::SetOptions;
use crate::cell::{Cell, CellId, EMBEDS_KEY, PARENT_KEY};
use crate::graph::Graph;
use crate::{GraphError, GraphResult};

/// Adjacency index of the embedding relation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hierarchy {
    parents: HashMap<CellId, CellId>,
    children: HashMap<CellId, Vec<CellId>>,
}

impl Hierarchy {
    /// Direct parent of a cell.
    #[must_use]
    pub fn parent(&self, id: &CellId) -> Option<&CellId> {
        self.parents.get(id)
    }

    /// Direct children of a cell, in embed order.
    #[must_use]
    pub fn children(&self, id: &CellId) -> &[CellId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Record `child` under `parent`, at `index` or at the end.
    ///
    /// A child already listed under `parent` keeps its position; a child
    /// recorded under another parent is moved.
    pub(crate) fn attach(&mut self, parent: &CellId, child: &CellId, index: Option<usize>) {
        if self.parents.get(child) != Some(parent) {
            self.detach(child);
        }
        self.parents.insert(child.clone(), parent.clone());
        let siblings = self.children.entry(parent.clone()).or_default();
        if siblings.contains(child) {
            return;
        }
        let index = index.map_or(siblings.len(), |i| i.min(siblings.len()));
        siblings.insert(index, child.clone());
    }

    /// Remove `child` from its parent. Returns the former parent.
    pub(crate) fn detach(&mut self, child: &CellId) -> Option<CellId> {
        let parent = self.parents.remove(child)?;
        if let Some(siblings) = self.children.get_mut(&parent) {
            siblings.retain(|id| id != child);
            if siblings.is_empty() {
                self.children.remove(&parent);
            }
        }
        Some(parent)
    }

    /// Drop a removed cell's own entries. Its children stay recorded under
    /// it until they are removed or re-embedded.
    pub(crate) fn forget(&mut self, id: &CellId) {
        self.detach(id);
        if self.children.get(id).is_some_and(Vec::is_empty) {
            self.children.remove(id);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.parents.clear();
        self.children.clear();
    }
}

/// Options for [`Graph::get_embedded_cells`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedOptions {
    /// Return every descendant instead of direct children only.
    pub deep: bool,
    /// Traverse descendants breadth-first instead of depth-first (the
    /// default).
    pub breadth_first: bool,
    /// Order siblings by `z` instead of embed order.
    pub sort_siblings: bool,
}

impl Default for EmbeddedOptions {
    fn default() -> Self {
        Self {
            deep: false,
            breadth_first: false,
            sort_siblings: false,
        }
    }
}

impl EmbeddedOptions {
    /// Every descendant, depth-first.
    #[must_use]
    pub fn deep() -> Self {
        Self {
            deep: true,
            ..Self::default()
        }
    }

    /// Every descendant, breadth-first.
    #[must_use]
    pub fn deep_breadth_first() -> Self {
        Self {
            deep: true,
            breadth_first: true,
            ..Self::default()
        }
    }

    /// Enable `sort_siblings`.
    #[must_use]
    pub const fn sorted(mut self) -> Self {
        self.sort_siblings = true;
        self
    }
}

impl Graph {
    /// Embed `child` into `parent` inside an `embed` batch.
    ///
    /// # Errors
    ///
    /// See [`Graph::embed_cells`].
    pub fn embed(&mut self, parent: &CellId, child: &CellId) -> GraphResult<()> {
        self.embed_cells(parent, std::slice::from_ref(child), &SetOptions::default())
    }

    /// Embed several cells into `parent` inside one `embed` batch.
    ///
    /// Every check runs before anything is written.
    ///
    /// # Errors
    ///
    /// - [`GraphError::CellNotFound`] if any cell is not live.
    /// - [`GraphError::RecursiveEmbedding`] if a child is `parent` itself or
    ///   one of its ancestors.
    /// - [`GraphError::AlreadyEmbedded`] if a child has another parent.
    pub fn embed_cells(
        &mut self,
        parent: &CellId,
        children: &[CellId],
        options: &SetOptions,
    ) -> GraphResult<()> {
        self.require(parent)?;
        for child in children {
            self.require(child)?;
            if child == parent || self.is_embedded_in(parent, child) {
                return Err(GraphError::RecursiveEmbedding {
                    parent: parent.clone(),
                    child: child.clone(),
                });
            }
            if let Some(current) = self.hierarchy.parent(child) {
                if current != parent {
                    return Err(GraphError::AlreadyEmbedded {
                        child: child.clone(),
                        current: current.clone(),
                    });
                }
            }
        }

        self.open_batch("embed", Some(parent), Map::new());
        for child in children {
            let index = self.embed_position(parent, child);
            self.hierarchy.attach(parent, child, Some(index));
            self.write_structural(child, PARENT_KEY, Some(parent.clone().into()), options);
            tracing::debug!("Embedded {child} into {parent}");
        }
        self.sync_embeds(parent, options);
        self.close_batch("embed", Some(parent));
        Ok(())
    }

    /// Unembed `child` from `parent` inside an `unembed` batch.
    ///
    /// # Errors
    ///
    /// See [`Graph::unembed_cells`].
    pub fn unembed(&mut self, parent: &CellId, child: &CellId) -> GraphResult<()> {
        self.unembed_cells(parent, std::slice::from_ref(child), &SetOptions::default())
    }

    /// Unembed several cells from `parent` inside one `unembed` batch.
    ///
    /// Cells that are not children of `parent` are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CellNotFound`] if `parent` is not live.
    pub fn unembed_cells(
        &mut self,
        parent: &CellId,
        children: &[CellId],
        options: &SetOptions,
    ) -> GraphResult<()> {
        self.require(parent)?;
        self.open_batch("unembed", Some(parent), Map::new());
        for child in children {
            if self.hierarchy.parent(child) == Some(parent) {
                self.hierarchy.detach(child);
                self.write_structural(child, PARENT_KEY, None, options);
                tracing::debug!("Unembedded {child} from {parent}");
            }
        }
        self.sync_embeds(parent, options);
        self.close_batch("unembed", Some(parent));
        Ok(())
    }

    /// Unembed one child without validation, used by the removal cascade.
    pub(crate) fn detach_child(&mut self, parent: &CellId, child: &CellId, options: &SetOptions) {
        self.open_batch("unembed", Some(parent), Map::new());
        self.hierarchy.detach(child);
        self.write_structural(child, PARENT_KEY, None, options);
        self.sync_embeds(parent, options);
        self.close_batch("unembed", Some(parent));
    }

    /// Where a new child goes: elements before links, otherwise appended.
    fn embed_position(&self, parent: &CellId, child: &CellId) -> usize {
        let siblings = self.hierarchy.children(parent);
        if self.cells.get(child).is_some_and(Cell::is_link) {
            return siblings.len();
        }
        siblings
            .iter()
            .position(|id| self.cells.get(id).is_some_and(Cell::is_link))
            .unwrap_or(siblings.len())
    }

    /// Mirror the index into the parent's `embeds` attribute.
    fn sync_embeds(&mut self, parent: &CellId, options: &SetOptions) {
        let embeds: Vec<Value> = self
            .hierarchy
            .children(parent)
            .iter()
            .cloned()
            .map(Value::from)
            .collect();
        self.write_structural(parent, EMBEDS_KEY, Some(Value::Array(embeds)), options);
    }

    fn require(&self, id: &CellId) -> GraphResult<()> {
        if self.cells.contains_key(id) {
            Ok(())
        } else {
            Err(GraphError::CellNotFound(id.clone()))
        }
    }

    /// The live parent of a cell.
    #[must_use]
    pub fn get_parent_cell(&self, id: &CellId) -> Option<&Cell> {
        self.hierarchy.parent(id).and_then(|parent| self.cells.get(parent))
    }

    /// Ancestor ids, nearest first.
    #[must_use]
    pub fn get_ancestors(&self, id: &CellId) -> Vec<CellId> {
        let mut ancestors = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.get_parent_cell(id);
        while let Some(parent) = current {
            if !seen.insert(parent.id().clone()) {
                tracing::warn!("Embedding cycle detected above {id}");
                break;
            }
            ancestors.push(parent.id().clone());
            current = self.get_parent_cell(parent.id());
        }
        ancestors
    }

    /// Embedded cell ids.
    ///
    /// Direct children come in embed order. Deep traversal lists every
    /// descendant breadth-first or depth-first (pre-order), without the cell
    /// itself.
    #[must_use]
    pub fn get_embedded_cells(&self, id: &CellId, options: &EmbeddedOptions) -> Vec<CellId> {
        if !self.cells.contains_key(id) {
            return Vec::new();
        }
        if !options.deep {
            return self.live_children(id, options.sort_siblings);
        }

        let mut cells = Vec::new();
        let mut seen = HashSet::from([id.clone()]);
        if options.breadth_first {
            let mut queue = VecDeque::from([id.clone()]);
            while let Some(current) = queue.pop_front() {
                for child in self.live_children(&current, options.sort_siblings) {
                    if seen.insert(child.clone()) {
                        cells.push(child.clone());
                        queue.push_back(child);
                    }
                }
            }
        } else {
            let mut stack = self.live_children(id, options.sort_siblings);
            stack.reverse();
            while let Some(current) = stack.pop() {
                if !seen.insert(current.clone()) {
                    continue;
                }
                let mut children = self.live_children(&current, options.sort_siblings);
                children.reverse();
                cells.push(current);
                stack.extend(children);
            }
        }
        cells
    }

    fn live_children(&self, id: &CellId, sort_siblings: bool) -> Vec<CellId> {
        let mut children: Vec<CellId> = self
            .hierarchy
            .children(id)
            .iter()
            .filter(|child| {
                let live = self.cells.contains_key(*child);
                if !live {
                    tracing::warn!("Skipping dangling embedded id {child} of {id}");
                }
                live
            })
            .cloned()
            .collect();
        if sort_siblings {
            children.sort_by_key(|child| self.cells.get(child).map_or(0, Cell::z));
        }
        children
    }

    /// Whether `id` is a descendant of `ancestor`.
    #[must_use]
    pub fn is_embedded_in(&self, id: &CellId, ancestor: &CellId) -> bool {
        self.get_ancestors(id).contains(ancestor)
    }

    /// Whether `id` is a direct child of `parent`.
    #[must_use]
    pub fn is_child_of(&self, id: &CellId, parent: &CellId) -> bool {
        self.hierarchy.parent(id) == Some(parent)
    }

    /// Whether a cell has a parent.
    #[must_use]
    pub fn is_embedded(&self, id: &CellId) -> bool {
        self.hierarchy.parent(id).is_some()
    }

    /// The nearest cell that is an ancestor of every given cell.
    ///
    /// The cells themselves do not count: two siblings share their parent,
    /// and a parent and its child share the parent's parent.
    #[must_use]
    pub fn get_common_ancestor(&self, ids: &[CellId]) -> Option<CellId> {
        if ids.is_empty() {
            return None;
        }
        let mut chains: Vec<Vec<CellId>> = ids.iter().map(|id| self.get_ancestors(id)).collect();
        chains.sort_by_key(Vec::len);
        let (shortest, rest) = chains.split_first()?;
        shortest
            .iter()
            .find(|candidate| rest.iter().all(|chain| chain.contains(candidate)))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph_with(ids: &[&str]) -> Graph {
        let mut graph = Graph::new();
        for id in ids {
            graph
                .add_cell(Cell::element("basic.Rect").with_id(*id))
                .expect("add");
        }
        graph
    }

    fn id(s: &str) -> CellId {
        CellId::from(s)
    }

    #[test]
    fn test_embed_mirrors_attributes() {
        let mut graph = graph_with(&["a", "b"]);
        graph.embed(&id("a"), &id("b")).expect("embed");

        let a = graph.get_cell(&id("a")).expect("a");
        let b = graph.get_cell(&id("b")).expect("b");
        assert_eq!(a.embed_ids(), vec![id("b")]);
        assert_eq!(b.parent_id(), Some(id("a")));
        assert!(graph.is_child_of(&id("b"), &id("a")));

        graph.embed(&id("a"), &id("b")).expect("embed twice");
        assert_eq!(graph.get_embedded_cells(&id("a"), &EmbeddedOptions::default()), vec![id("b")]);
    }

    #[test]
    fn test_recursive_embedding_rejected() {
        let mut graph = graph_with(&["a", "b", "c"]);
        assert!(matches!(
            graph.embed(&id("a"), &id("a")),
            Err(GraphError::RecursiveEmbedding { .. })
        ));

        graph.embed(&id("a"), &id("b")).expect("embed");
        graph.embed(&id("b"), &id("c")).expect("embed");
        let before = graph.hierarchy.clone();
        assert!(matches!(
            graph.embed(&id("c"), &id("a")),
            Err(GraphError::RecursiveEmbedding { .. })
        ));
        assert_eq!(graph.hierarchy, before);
    }

    #[test]
    fn test_already_embedded_rejected() {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph.embed(&id("a"), &id("c")).expect("embed");
        let result = graph.embed(&id("b"), &id("c"));
        assert!(matches!(result, Err(GraphError::AlreadyEmbedded { .. })));
        assert_eq!(graph.get_parent_cell(&id("c")).map(Cell::id), Some(&id("a")));
    }

    #[test]
    fn test_links_go_after_elements() {
        let mut graph = graph_with(&["p", "e1"]);
        graph.add_cell(Cell::link("basic.Link").with_id("l")).expect("add");
        graph
            .add_cell(Cell::element("basic.Rect").with_id("e2"))
            .expect("add");

        graph
            .embed_cells(&id("p"), &[id("l"), id("e1"), id("e2")], &SetOptions::default())
            .expect("embed");
        assert_eq!(
            graph.get_cell(&id("p")).expect("p").embed_ids(),
            vec![id("e1"), id("e2"), id("l")]
        );
    }

    #[test]
    fn test_unembed_clears_parent() {
        let mut graph = graph_with(&["a", "b"]);
        graph.embed(&id("a"), &id("b")).expect("embed");
        graph.unembed(&id("a"), &id("b")).expect("unembed");

        assert!(!graph.is_embedded(&id("b")));
        assert!(graph.get_cell(&id("b")).expect("b").parent_id().is_none());
        assert_eq!(graph.get_cell(&id("a")).expect("a").prop("embeds"), Some(&json!([])));
    }

    #[test]
    fn test_deep_traversal_orders() {
        // r
        // ├── a
        // │   └── a1
        // └── b
        let mut graph = graph_with(&["r", "a", "b", "a1"]);
        graph.embed(&id("r"), &id("a")).expect("embed");
        graph.embed(&id("r"), &id("b")).expect("embed");
        graph.embed(&id("a"), &id("a1")).expect("embed");

        let bfs = graph.get_embedded_cells(&id("r"), &EmbeddedOptions::deep_breadth_first());
        let dfs = graph.get_embedded_cells(&id("r"), &EmbeddedOptions::deep());
        assert_eq!(bfs, vec![id("a"), id("b"), id("a1")]);
        assert_eq!(dfs, vec![id("a"), id("a1"), id("b")]);

        let defaulted = EmbeddedOptions {
            deep: true,
            ..EmbeddedOptions::default()
        };
        assert_eq!(graph.get_embedded_cells(&id("r"), &defaulted), dfs);
    }

    #[test]
    fn test_sort_siblings_by_z() {
        let mut graph = graph_with(&["r", "a", "b"]);
        graph.embed(&id("r"), &id("a")).expect("embed");
        graph.embed(&id("r"), &id("b")).expect("embed");
        graph
            .set(&id("a"), "z", json!(100), &SetOptions::default())
            .expect("z");

        let sorted = graph.get_embedded_cells(&id("r"), &EmbeddedOptions::default().sorted());
        assert_eq!(sorted, vec![id("b"), id("a")]);
    }

    #[test]
    fn test_ancestors_and_common_ancestor() {
        let mut graph = graph_with(&["g", "x", "y", "z"]);
        graph.embed(&id("g"), &id("x")).expect("embed");
        graph.embed(&id("g"), &id("y")).expect("embed");
        graph.embed(&id("x"), &id("z")).expect("embed");

        assert_eq!(graph.get_ancestors(&id("z")), vec![id("x"), id("g")]);
        assert!(graph.is_embedded_in(&id("z"), &id("g")));
        assert!(!graph.is_child_of(&id("z"), &id("g")));
        assert_eq!(graph.get_common_ancestor(&[id("z"), id("y")]), Some(id("g")));
        assert_eq!(graph.get_common_ancestor(&[id("g"), id("y")]), None);
    }
}
