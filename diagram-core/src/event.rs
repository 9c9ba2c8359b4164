//! Notifications published by a [`Graph`](crate::Graph).
//!
//! Observers (a view layer, an undo recorder, a sync bridge) subscribe with
//! [`Graph::subscribe`](crate::Graph::subscribe) and receive every event in
//! the order the mutations happened. Batch brackets let them coalesce the
//! low-level changes of one structural operation.

use serde_json::{Map, Value};

use crate::attributes::{AttributeChange, SetOptions};
use crate::CellId;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

/// How a transition ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The final frame was written.
    Completed,
    /// The transition was stopped or superseded before completing.
    Cancelled,
}

/// Batch bracket payload.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEvent {
    /// Batch name (`embed`, `remove`, `to-front`, ...).
    pub name: String,
    /// Cell that opened the batch, for cell-scoped batches.
    pub cell: Option<CellId>,
    /// Caller-supplied payload.
    pub data: Map<String, Value>,
}

/// A graph notification.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    /// A cell became live.
    Add {
        /// The added cell.
        cell: CellId,
    },
    /// A cell was removed and detached.
    Remove {
        /// The removed cell.
        cell: CellId,
    },
    /// A top-level attribute of a live cell changed.
    Change {
        /// The changed cell.
        cell: CellId,
        /// Top-level attribute key.
        key: String,
        /// Full path of the write, for nested writes.
        path: Option<String>,
        /// Value before the change.
        previous: Option<Value>,
        /// Value after the change.
        current: Option<Value>,
        /// Options of the write.
        options: SetOptions,
    },
    /// The z-ordered cell collection was re-sorted.
    Sort,
    /// The whole cell collection was replaced.
    Reset,
    /// A batch was opened.
    BatchStart(BatchEvent),
    /// A batch was closed.
    BatchStop(BatchEvent),
    /// The outermost open batch was closed.
    BatchComplete,
    /// A transition started running.
    TransitionStart {
        /// Animated cell.
        cell: CellId,
        /// Animated path.
        path: String,
    },
    /// A transition ended.
    TransitionEnd {
        /// Animated cell.
        cell: CellId,
        /// Animated path.
        path: String,
        /// Completion or cancellation.
        outcome: TransitionOutcome,
    },
}

impl GraphEvent {
    /// Build a change event from an attribute change.
    #[must_use]
    pub fn change(cell: CellId, change: AttributeChange) -> Self {
        Self::Change {
            cell,
            key: change.key,
            path: change.path,
            previous: change.previous,
            current: change.current,
            options: change.options,
        }
    }

    /// The cell this event concerns, if any.
    #[must_use]
    pub fn cell(&self) -> Option<&CellId> {
        match self {
            Self::Add { cell }
            | Self::Remove { cell }
            | Self::Change { cell, .. }
            | Self::TransitionStart { cell, .. }
            | Self::TransitionEnd { cell, .. } => Some(cell),
            Self::BatchStart(batch) | Self::BatchStop(batch) => batch.cell.as_ref(),
            Self::Sort | Self::Reset | Self::BatchComplete => None,
        }
    }

    /// Whether this is a change of `key`.
    #[must_use]
    pub fn is_change_of(&self, key: &str) -> bool {
        matches!(self, Self::Change { key: k, .. } if k == key)
    }
}

/// Boxed event listener.
pub type Listener = Box<dyn FnMut(&GraphEvent)>;
