//! Graph behaviour configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::GraphResult;

/// Configuration for a [`Graph`](crate::Graph).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Replace the endpoints of links connected to a removed cell with a point
    /// instead of removing the links.
    pub disconnect_links_on_remove: bool,
    /// Keep embedded cells in front of their parent when reordering deeply.
    pub foreground_embeds: bool,
    /// Transition timing defaults.
    pub transition: TransitionConfig,
    /// Deep clone behaviour.
    pub clone: CloneConfig,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            disconnect_links_on_remove: false,
            foreground_embeds: true,
            transition: TransitionConfig::default(),
            clone: CloneConfig::default(),
        }
    }
}

impl GraphConfig {
    /// Parse a configuration document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON for this type.
    pub fn from_json(json: &str) -> GraphResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Default timing for transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionConfig {
    /// Transition duration in milliseconds.
    pub duration_ms: u64,
    /// Delay before the first frame, in milliseconds.
    pub delay_ms: u64,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            duration_ms: 100,
            delay_ms: 10,
        }
    }
}

impl TransitionConfig {
    /// Duration as a [`Duration`].
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Delay as a [`Duration`].
    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Deep clone behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloneConfig {
    /// Clone links that have only one endpoint inside the cloned set.
    pub include_external_links: bool,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            include_external_links: true,
        }
    }
}
