//! Run statistics.
//!
//! Reach is derived from node state alone and recomputed after every step.
//! The surfaced `engagedCount` counts *reached* nodes (`visit_count > 0`),
//! not nodes in the `Engaged` state. Consumers depend on that name.

use serde::{Deserialize, Serialize};

use crate::graph::AgentGraph;

/// Reach summary of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reach {
    /// `round(100 * reached / total)`
    pub reach_percent: u32,
    /// Nodes with `visit_count > 0`
    pub engaged_count: usize,
}

impl Reach {
    /// Compute reach over the current node states
    pub fn of(graph: &AgentGraph) -> Self {
        let total = graph.len();
        let reached = graph.nodes().filter(|n| n.is_reached()).count();

        let reach_percent = if total == 0 {
            0
        } else {
            (100.0 * reached as f64 / total as f64).round() as u32
        };

        Self {
            reach_percent,
            engaged_count: reached,
        }
    }
}

/// Progress of a run as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    /// Completed steps
    pub step: u32,
    /// Step budget
    pub max_steps: u32,
    /// Reach summary after `step`
    #[serde(flatten)]
    pub reach: Reach,
}

impl RunStats {
    /// Stats for `graph` after `step` of `max_steps`
    pub fn new(graph: &AgentGraph, step: u32, max_steps: u32) -> Self {
        Self {
            step,
            max_steps,
            reach: Reach::of(graph),
        }
    }

    /// Fraction of the step budget consumed
    pub fn progress(&self) -> f64 {
        if self.max_steps == 0 {
            return 1.0;
        }
        f64::from(self.step) / f64::from(self.max_steps)
    }
}
