//! # Diagram Core
//!
//! Structural model for node-and-edge diagrams: cells with path-addressed
//! attributes, links with endpoints, parent/child embedding, stacking order,
//! deep cloning and animated attribute transitions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                    Graph                    │
//! ├─────────────────────────────────────────────┤
//! │  Cells            │  Indexes                │
//! │  - Elements       │  - z order              │
//! │  - Links          │  - source/target links  │
//! │  - Attributes     │  - embedding hierarchy  │
//! ├─────────────────────────────────────────────┤
//! │  Events & batches │  Transitions            │
//! │  - Add/Remove     │  - Timing functions     │
//! │  - Change/Sort    │  - Interpolators        │
//! │  - Batch brackets │  - Frame scheduler port │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Cells are created detached, become live with [`Graph::add_cell`], and are
//! mutated through the graph so that every index stays consistent and every
//! change is published to subscribers.
//!
//! ```
//! use diagram_core::{Cell, Graph, ConnectionOptions};
//! use serde_json::json;
//!
//! let mut graph = Graph::new();
//! let a = graph.add_cell(Cell::element("basic.Rect")).unwrap();
//! let b = graph.add_cell(Cell::element("basic.Rect")).unwrap();
//! graph
//!     .add_cell(
//!         Cell::link("basic.Link")
//!             .with_prop("source", json!({ "id": a.as_str() }))
//!             .with_prop("target", json!({ "id": b.as_str() })),
//!     )
//!     .unwrap();
//!
//! assert!(graph.is_neighbor(&a, &b, &ConnectionOptions::default()));
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod attributes;
pub mod cell;
pub mod clone;
pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod hierarchy;
pub mod link;
pub mod registry;
pub mod transition;
pub mod zorder;

pub use attributes::{AttrPath, AttributeChange, AttributeStore, SetOptions, MAX_ARRAY_INDEX};
pub use cell::{Cell, CellId, CellKind, Port};
pub use clone::{CloneOptions, CloneSession};
pub use config::{CloneConfig, GraphConfig, TransitionConfig};
pub use error::{GraphError, GraphResult};
pub use event::{BatchEvent, GraphEvent, Listener, ListenerId, TransitionOutcome};
pub use graph::{ConnectionOptions, Graph, IntoChanges};
pub use hierarchy::{EmbeddedOptions, Hierarchy};
pub use link::{End, Endpoint, NamedConfig, Point};
pub use registry::{KindDefinition, KindRegistry};
pub use transition::{
    FrameHandle, FrameScheduler, Interpolation, ManualScheduler, TimingFunction,
    TransitionOptions,
};
pub use zorder::ZOrderOptions;

/// Diagram core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
