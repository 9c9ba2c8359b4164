//! Error types for graph operations.

use thiserror::Error;

use crate::CellId;

/// Result type for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors that can occur in graph operations.
///
/// Resolution failures (an endpoint pointing at a removed cell, a parent id on
/// a detached cell) are not errors; they surface as `None` or empty results.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Cell not found in the graph.
    #[error("Cell not found: {0}")]
    CellNotFound(CellId),

    /// A cell with the same id is already part of the graph.
    #[error("Duplicate cell id: {0}")]
    DuplicateId(CellId),

    /// Embedding would make a cell its own ancestor.
    #[error("Recursive embedding not allowed: {child} into {parent}")]
    RecursiveEmbedding {
        /// The would-be parent.
        parent: CellId,
        /// The would-be child.
        child: CellId,
    },

    /// The child is already embedded in another cell.
    #[error("Cell {child} is already embedded in {current}")]
    AlreadyEmbedded {
        /// The cell being embedded.
        child: CellId,
        /// Its current parent.
        current: CellId,
    },

    /// Attempt to write an attribute that is managed by the graph.
    #[error("Attribute '{0}' cannot be set directly")]
    ReservedAttribute(String),

    /// A required argument was missing (e.g. inserting a null label).
    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    /// A link-only operation was issued on an element.
    #[error("Cell {0} is not a link")]
    NotALink(CellId),

    /// The attribute path could not be parsed or traversed.
    #[error("Invalid attribute path: {0}")]
    InvalidPath(String),

    /// No kind is registered under the given type string.
    #[error("Unknown cell kind: {0}")]
    UnknownKind(String),

    /// A graph document is missing required structure.
    #[error("Invalid graph document: {0}")]
    InvalidDocument(String),

    /// A transition cannot interpolate between its start and end values.
    #[error("Cannot animate {path}: {reason}")]
    InvalidTransition {
        /// The animated path.
        path: String,
        /// What was wrong with the values.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
