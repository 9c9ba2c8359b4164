//! Stacking order: bringing cells to the front or sending them to the back.

use serde_json::{json, Map};

use crate::attributes::SetOptions;
use crate::cell::{Cell, CellId, Z_KEY};
use crate::graph::Graph;
use crate::hierarchy::EmbeddedOptions;
use crate::{GraphError, GraphResult};

/// Options for [`Graph::to_front`] and [`Graph::to_back`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZOrderOptions {
    /// Move the cell's embedded descendants along with it.
    pub deep: bool,
    /// Collect descendants breadth-first (depth-first otherwise).
    pub breadth_first: bool,
    /// Keep descendants in front of their ancestors. `None` uses
    /// [`GraphConfig::foreground_embeds`](crate::GraphConfig::foreground_embeds).
    pub foreground_embeds: Option<bool>,
}

impl Default for ZOrderOptions {
    fn default() -> Self {
        Self {
            deep: false,
            breadth_first: true,
            foreground_embeds: None,
        }
    }
}

impl ZOrderOptions {
    /// The cell and all of its descendants.
    #[must_use]
    pub fn deep() -> Self {
        Self {
            deep: true,
            ..Self::default()
        }
    }
}

impl Graph {
    /// Place a cell (and with `deep` its descendants) above every other cell.
    ///
    /// Nothing is written when the cells already occupy the top positions
    /// with consecutive `z` values.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CellNotFound`] if the cell is not live.
    pub fn to_front(&mut self, id: &CellId, options: &ZOrderOptions) -> GraphResult<()> {
        let cells = self.z_order_set(id, options)?;
        let count = to_i64(cells.len());
        let max_z = self.max_z_index();
        let expected_start = max_z - count + 1;

        let in_place = self.order_index(&cells[0]) == Some(self.len() - cells.len())
            && self.is_consecutive(&cells, expected_start);
        if in_place {
            return Ok(());
        }

        tracing::debug!("Moving {} cell(s) to the front from {id}", cells.len());
        self.assign_z(id, "to-front", &cells, max_z + 1)
    }

    /// Place a cell (and with `deep` its descendants) below every other cell.
    ///
    /// Nothing is written when the cells already occupy the bottom positions
    /// with consecutive `z` values.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CellNotFound`] if the cell is not live.
    pub fn to_back(&mut self, id: &CellId, options: &ZOrderOptions) -> GraphResult<()> {
        let cells = self.z_order_set(id, options)?;
        let count = to_i64(cells.len());
        let min_z = self.min_z_index();

        let in_place =
            self.order_index(&cells[0]) == Some(0) && self.is_consecutive(&cells, min_z);
        if in_place {
            return Ok(());
        }

        tracing::debug!("Moving {} cell(s) to the back from {id}", cells.len());
        self.assign_z(id, "to-back", &cells, min_z - count)
    }

    /// The ordered set of cells to restack. Never empty.
    fn z_order_set(&self, id: &CellId, options: &ZOrderOptions) -> GraphResult<Vec<CellId>> {
        if !self.contains(id) {
            return Err(GraphError::CellNotFound(id.clone()));
        }
        let foreground = options
            .foreground_embeds
            .unwrap_or(self.config.foreground_embeds);

        let mut cells = vec![id.clone()];
        if options.deep {
            let embedded = EmbeddedOptions {
                deep: true,
                breadth_first: options.breadth_first,
                sort_siblings: foreground,
            };
            cells.extend(self.get_embedded_cells(id, &embedded));
        }
        if !foreground {
            cells.sort_by_key(|cell| self.get_cell(cell).map_or(0, Cell::z));
        }
        Ok(cells)
    }

    fn is_consecutive(&self, cells: &[CellId], start: i64) -> bool {
        cells
            .iter()
            .zip(start..)
            .all(|(cell, z)| self.get_cell(cell).is_some_and(|c| c.z() == z))
    }

    fn assign_z(&mut self, id: &CellId, batch: &str, cells: &[CellId], start: i64) -> GraphResult<()> {
        self.open_batch(batch, Some(id), Map::new());
        let mut result = Ok(());
        for (cell, z) in cells.iter().zip(start..) {
            if let Err(e) = self.set(cell, Z_KEY, json!(z), &SetOptions::default()) {
                result = Err(e);
                break;
            }
        }
        self.close_batch(batch, Some(id));
        result
    }
}

fn to_i64(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}
