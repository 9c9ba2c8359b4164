//! Cloning cells together with their embedded subtree and links.
//!
//! Clones are detached: add them to a graph with [`Graph::add_cells`]. Every
//! reference between cloned cells (`parent`, `embeds`, link endpoints) is
//! rewritten to the clone ids; references to cells outside the cloned set are
//! left pointing at the originals.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::attributes::SetOptions;
use crate::cell::{Cell, CellId, EMBEDS_KEY, ID_KEY, PARENT_KEY};
use crate::graph::{ConnectionOptions, Graph};
use crate::hierarchy::EmbeddedOptions;
use crate::link::End;
use crate::{GraphError, GraphResult};

/// Options for [`Graph::clone_cell`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloneOptions {
    /// Clone the embedded subtree and the links touching it.
    pub deep: bool,
    /// Also clone links with only one end inside the cloned set. `None` uses
    /// [`CloneConfig::include_external_links`](crate::CloneConfig::include_external_links).
    pub include_external_links: Option<bool>,
}

impl CloneOptions {
    /// Deep clone with the configured link policy.
    #[must_use]
    pub fn deep() -> Self {
        Self {
            deep: true,
            include_external_links: None,
        }
    }
}

/// The result of one clone operation: original ids mapped to detached clones.
#[derive(Debug, Clone, Default)]
pub struct CloneSession {
    ids: HashMap<CellId, CellId>,
    entries: Vec<(CellId, Cell)>,
}

impl CloneSession {
    fn record(&mut self, original: &CellId, clone: Cell) -> bool {
        if self.ids.contains_key(original) {
            return false;
        }
        self.ids.insert(original.clone(), clone.id().clone());
        self.entries.push((original.clone(), clone));
        true
    }

    /// Id of the clone made for `original`.
    #[must_use]
    pub fn clone_id(&self, original: &CellId) -> Option<&CellId> {
        self.ids.get(original)
    }

    /// The clone made for `original`.
    #[must_use]
    pub fn get(&self, original: &CellId) -> Option<&Cell> {
        self.entries
            .iter()
            .find(|(id, _)| id == original)
            .map(|(_, clone)| clone)
    }

    /// Whether `original` was cloned.
    #[must_use]
    pub fn contains(&self, original: &CellId) -> bool {
        self.ids.contains_key(original)
    }

    /// Original id to clone id.
    #[must_use]
    pub fn mapping(&self) -> &HashMap<CellId, CellId> {
        &self.ids
    }

    /// The clones, in cloning order.
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.entries.iter().map(|(_, clone)| clone)
    }

    /// Take the clones, in cloning order.
    #[must_use]
    pub fn into_cells(self) -> Vec<Cell> {
        self.entries.into_iter().map(|(_, clone)| clone).collect()
    }

    /// Number of clones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was cloned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Graph {
    /// Clone a live cell.
    ///
    /// A shallow clone copies the attributes under a fresh id without
    /// `parent`/`embeds`. A deep clone also clones every embedded cell and
    /// each link touching a cloned element exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CellNotFound`] if the cell is not live.
    pub fn clone_cell(&self, id: &CellId, options: &CloneOptions) -> GraphResult<CloneSession> {
        let cell = self
            .get_cell(id)
            .ok_or_else(|| GraphError::CellNotFound(id.clone()))?;
        if !options.deep {
            let mut session = CloneSession::default();
            session.record(id, cell.shallow_clone());
            return Ok(session);
        }

        let include_external = options
            .include_external_links
            .unwrap_or(self.config.clone.include_external_links);

        let mut ids = vec![id.clone()];
        ids.extend(self.get_embedded_cells(id, &EmbeddedOptions::deep()));
        let members: HashSet<CellId> = ids.iter().cloned().collect();

        let mut links = Vec::new();
        for member in &ids {
            if !self.get_cell(member).is_some_and(Cell::is_element) {
                continue;
            }
            for link_id in self.get_connected_links(member, &ConnectionOptions::default()) {
                if members.contains(&link_id) || links.contains(&link_id) {
                    continue;
                }
                let Some(link) = self.get_cell(&link_id) else {
                    continue;
                };
                let inside = |end| link.end_id(end).is_some_and(|end| members.contains(&end));
                if include_external || (inside(End::Source) && inside(End::Target)) {
                    links.push(link_id);
                }
            }
        }
        ids.extend(links);

        self.clone_set(&ids)
    }

    /// Clone an arbitrary set of live cells, rewiring references among them.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CellNotFound`] if any id is not live.
    pub fn clone_cells(&self, ids: &[CellId]) -> GraphResult<CloneSession> {
        self.clone_set(ids)
    }

    /// Clone the result of [`Graph::get_subgraph`].
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CellNotFound`] if any id is not live.
    pub fn clone_subgraph(
        &self,
        ids: &[CellId],
        options: &ConnectionOptions,
    ) -> GraphResult<CloneSession> {
        if let Some(missing) = ids.iter().find(|id| !self.contains(id)) {
            return Err(GraphError::CellNotFound(missing.clone()));
        }
        self.clone_set(&self.get_subgraph(ids, options))
    }

    fn clone_set(&self, ids: &[CellId]) -> GraphResult<CloneSession> {
        let mut session = CloneSession::default();
        for id in ids {
            let cell = self
                .get_cell(id)
                .ok_or_else(|| GraphError::CellNotFound(id.clone()))?;
            session.record(id, cell.shallow_clone());
        }

        let silent = SetOptions::silent();
        let CloneSession { ids: mapping, entries } = &mut session;
        for (original, clone) in entries.iter_mut() {
            if let Some(parent) = self.hierarchy.parent(original).and_then(|p| mapping.get(p)) {
                clone.set_structural(PARENT_KEY, Some(parent.clone().into()), &silent);
            }
            let embeds: Vec<Value> = self
                .hierarchy
                .children(original)
                .iter()
                .filter_map(|child| mapping.get(child))
                .map(|child| child.clone().into())
                .collect();
            if !embeds.is_empty() {
                clone.set_structural(EMBEDS_KEY, Some(Value::Array(embeds)), &silent);
            }

            if clone.is_link() {
                for end in [End::Source, End::Target] {
                    let Some(target) = clone.end_id(end).and_then(|id| mapping.get(&id)) else {
                        continue;
                    };
                    let mut endpoint = clone.get(end.key()).cloned().unwrap_or_default();
                    if let Value::Object(object) = &mut endpoint {
                        object.insert(ID_KEY.to_owned(), target.clone().into());
                    }
                    clone.set(end.key(), endpoint, &silent)?;
                }
            }
        }

        tracing::debug!("Cloned {} cell(s)", session.len());
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn id(s: &str) -> CellId {
        CellId::from(s)
    }

    fn element(id: &str) -> Cell {
        Cell::element("basic.Rect").with_id(id)
    }

    fn link(id: &str, source: &str, target: &str) -> Cell {
        Cell::link("basic.Link")
            .with_id(id)
            .with_prop("source", json!({ "id": source, "port": "p" }))
            .with_prop("target", json!({ "id": target }))
    }

    fn container() -> Graph {
        let mut graph = Graph::new();
        for cell in ["r", "d1", "d2", "outside"] {
            graph.add_cell(element(cell)).expect("add");
        }
        graph.embed(&id("r"), &id("d1")).expect("embed");
        graph.embed(&id("r"), &id("d2")).expect("embed");
        graph.add_cell(link("inner", "d1", "d2")).expect("add");
        graph.add_cell(link("external", "d2", "outside")).expect("add");
        graph
    }

    #[test]
    fn test_shallow_clone() {
        let graph = container();
        let session = graph
            .clone_cell(&id("r"), &CloneOptions::default())
            .expect("clone");
        assert_eq!(session.len(), 1);
        let clone = session.get(&id("r")).expect("clone of r");
        assert_ne!(clone.id(), &id("r"));
        assert!(clone.embed_ids().is_empty());
    }

    #[test]
    fn test_deep_clone_rewires_inner_links() {
        let graph = container();
        let session = graph.clone_cell(&id("r"), &CloneOptions::deep()).expect("clone");
        assert_eq!(session.len(), 5);

        let d1 = session.clone_id(&id("d1")).expect("d1 cloned");
        let d2 = session.clone_id(&id("d2")).expect("d2 cloned");
        let root = session.get(&id("r")).expect("r cloned");
        assert_eq!(root.embed_ids(), vec![d1.clone(), d2.clone()]);
        assert_eq!(
            session.get(&id("d1")).and_then(Cell::parent_id).as_ref(),
            session.clone_id(&id("r"))
        );

        let inner = session.get(&id("inner")).expect("inner cloned");
        assert_eq!(inner.prop("source"), Some(&json!({ "id": d1.as_str(), "port": "p" })));
        assert_eq!(inner.end_id(End::Target).as_ref(), Some(d2));

        let external = session.get(&id("external")).expect("external cloned");
        assert_eq!(external.end_id(End::Target), Some(id("outside")));
    }

    #[test]
    fn test_deep_clone_can_skip_external_links() {
        let graph = container();
        let options = CloneOptions {
            deep: true,
            include_external_links: Some(false),
        };
        let session = graph.clone_cell(&id("r"), &options).expect("clone");
        assert!(session.contains(&id("inner")));
        assert!(!session.contains(&id("external")));
    }

    #[test]
    fn test_self_loop_cloned_once() {
        let mut graph = Graph::new();
        graph.add_cell(element("a")).expect("add");
        graph.add_cell(link("loop", "a", "a")).expect("add");

        let session = graph.clone_cell(&id("a"), &CloneOptions::deep()).expect("clone");
        let links: Vec<&Cell> = session.cells().filter(|c| c.is_link()).collect();
        assert_eq!(links.len(), 1);
        let a = session.clone_id(&id("a"));
        assert_eq!(links[0].end_id(End::Source).as_ref(), a);
        assert_eq!(links[0].end_id(End::Target).as_ref(), a);
    }

    #[test]
    fn test_repeated_clones_are_disjoint_and_addable() {
        let mut graph = container();
        let first = graph.clone_cell(&id("r"), &CloneOptions::deep()).expect("clone");
        let second = graph.clone_cell(&id("r"), &CloneOptions::deep()).expect("clone");

        let first_ids: HashSet<&CellId> = first.mapping().values().collect();
        assert!(second.mapping().values().all(|id| !first_ids.contains(id)));

        let root = first.clone_id(&id("r")).cloned().expect("root");
        graph.add_cells(first.into_cells()).expect("add clones");
        assert_eq!(graph.get_embedded_cells(&root, &EmbeddedOptions::default()).len(), 2);
    }

    #[test]
    fn test_clone_subgraph() {
        let graph = container();
        let session = graph
            .clone_subgraph(&[id("external")], &ConnectionOptions::default())
            .expect("clone");
        assert_eq!(session.len(), 3);
        let external = session.get(&id("external")).expect("link cloned");
        assert_eq!(external.end_id(End::Target).as_ref(), session.clone_id(&id("outside")));

        assert!(matches!(
            graph.clone_cells(&[id("missing")]),
            Err(GraphError::CellNotFound(_))
        ));
    }
}
