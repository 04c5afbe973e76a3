//! Agent graph model.
//!
//! Holds the fixed node set of one simulation run together with its
//! full-mesh edge set. The graph is pure bookkeeping: it exposes reads
//! (active nodes, engaged nodes, everyone-but-me) and mutation primitives,
//! and leaves every decision to the [`engine`](crate::engine).
//!
//! Edges are generated once, one per unordered pair, and exist for layout
//! only. Propagation never consults them: any node may receive a message
//! from any active node, including after [`AgentGraph::disconnect`].
//!
//! # State Machine
//!
//! ```text
//!                 targeted                 engage = true
//!   [Inactive] ─────────────> [Active] ─────────────────> [Engaged]
//!        ^                      │  ^                          │
//!        │    engage = false    │  │    idle reactivation     │
//!        └──────────────────────┘  └──────────────────────────┘
//! ```
//!
//! `Engaged -> Inactive` is never a legal direct transition.

use std::collections::HashSet;
use std::fmt;

use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ViewsError};

/// Propagation state of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// At rest. Not carrying the message.
    #[default]
    Inactive,
    /// Carrying the message; will ask the oracle this step.
    Active,
    /// Chose to spread at least once. Only reactivation brings it back.
    Engaged,
}

impl NodeState {
    /// Whether a direct transition from `self` to `next` is legal.
    pub fn can_transition_to(self, next: NodeState) -> bool {
        !matches!((self, next), (NodeState::Engaged, NodeState::Inactive))
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Inactive => write!(f, "inactive"),
            NodeState::Active => write!(f, "active"),
            NodeState::Engaged => write!(f, "engaged"),
        }
    }
}

/// An agent as supplied by the caller starting a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Identifier, unique within the run.
    pub id: String,
    /// Display label.
    pub name: String,
    /// Persona archetype, used by the LLM oracle prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_type: Option<String>,
    /// Personality description, used by the LLM oracle prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl AgentSpec {
    /// Create a spec with just an id and a name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            persona_type: None,
            description: None,
        }
    }

    /// Set the persona archetype
    pub fn with_persona_type(mut self, persona_type: impl Into<String>) -> Self {
        self.persona_type = Some(persona_type.into());
        self
    }

    /// Set the personality description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// One agent in a running simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentNode {
    /// Identifier, unique within the run.
    pub id: String,
    /// Display label. Not used by the algorithm.
    pub name: String,
    /// Persona archetype.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_type: Option<String>,
    /// Personality description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Current propagation state.
    pub state: NodeState,
    /// Steps in which this node chose to engage.
    pub engagement_score: u32,
    /// Times this node was selected as a target (the seed starts at 1).
    pub visit_count: u32,
    /// Last rationale returned for this node.
    pub last_reason: Option<String>,
}

impl AgentNode {
    fn from_spec(spec: AgentSpec) -> Self {
        Self {
            id: spec.id,
            name: spec.name,
            persona_type: spec.persona_type,
            description: spec.description,
            state: NodeState::Inactive,
            engagement_score: 0,
            visit_count: 0,
            last_reason: None,
        }
    }

    /// Whether the message has ever reached this node
    pub fn is_reached(&self) -> bool {
        self.visit_count > 0
    }
}

/// Fixed agent set with a cosmetic full-mesh edge set.
#[derive(Debug, Clone)]
pub struct AgentGraph {
    graph: UnGraph<AgentNode, ()>,
}

impl AgentGraph {
    /// Minimum number of agents a run needs
    pub const MIN_NODES: usize = 2;

    /// Build a graph with one edge for every unordered pair of agents.
    ///
    /// Rejects fewer than [`Self::MIN_NODES`] agents, empty ids and
    /// duplicate ids.
    pub fn full_mesh(agents: Vec<AgentSpec>) -> Result<Self> {
        if agents.len() < Self::MIN_NODES {
            return Err(ViewsError::InvalidInput(format!(
                "at least {} agents are required, got {}",
                Self::MIN_NODES,
                agents.len()
            )));
        }

        let mut seen = HashSet::with_capacity(agents.len());
        for agent in &agents {
            if agent.id.trim().is_empty() {
                return Err(ViewsError::InvalidInput("agent id must not be empty".into()));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(ViewsError::InvalidInput(format!(
                    "duplicate agent id: {}",
                    agent.id
                )));
            }
        }

        let n = agents.len();
        let mut graph = UnGraph::with_capacity(n, n * (n - 1) / 2);
        for agent in agents {
            graph.add_node(AgentNode::from_spec(agent));
        }
        for i in 0..n {
            for j in (i + 1)..n {
                graph.add_edge(NodeIndex::new(i), NodeIndex::new(j), ());
            }
        }

        Ok(Self { graph })
    }

    /// Number of agents
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Always false for a constructed graph
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Agent at `idx`
    pub fn node(&self, idx: NodeIndex) -> &AgentNode {
        &self.graph[idx]
    }

    /// All node indices, in insertion order
    pub fn indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// All agents, in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &AgentNode> + '_ {
        self.graph.node_weights()
    }

    /// Look up an agent by id
    pub fn find(&self, id: &str) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .find(|&idx| self.graph[idx].id == id)
    }

    /// Nodes currently in `state`, in insertion order
    pub fn in_state(&self, state: NodeState) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph[idx].state == state)
            .collect()
    }

    /// Nodes currently `Active`
    pub fn active(&self) -> Vec<NodeIndex> {
        self.in_state(NodeState::Active)
    }

    /// Nodes currently `Engaged`
    pub fn engaged(&self) -> Vec<NodeIndex> {
        self.in_state(NodeState::Engaged)
    }

    /// Every node except `idx`. Edges play no part in this.
    pub fn others(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.graph.node_indices().filter(|&i| i != idx).collect()
    }

    /// Cosmetic edges as id pairs
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.graph.raw_edges().iter().map(|edge| {
            (
                self.graph[edge.source()].id.as_str(),
                self.graph[edge.target()].id.as_str(),
            )
        })
    }

    /// Number of cosmetic edges
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Whether a cosmetic edge joins `a` and `b`
    pub fn has_edge(&self, a: NodeIndex, b: NodeIndex) -> bool {
        self.graph.find_edge(a, b).is_some()
    }

    /// Remove the cosmetic edge between `a` and `b`.
    ///
    /// Returns whether an edge was removed. Reachability is unchanged.
    pub fn disconnect(&mut self, a: NodeIndex, b: NodeIndex) -> bool {
        match self.graph.find_edge(a, b) {
            Some(edge) => self.graph.remove_edge(edge).is_some(),
            None => false,
        }
    }

    /// Move `idx` to `state`, returning the previous state.
    pub fn set_state(&mut self, idx: NodeIndex, state: NodeState) -> NodeState {
        let node = &mut self.graph[idx];
        debug_assert!(
            node.state.can_transition_to(state),
            "illegal transition {} -> {} for {}",
            node.state,
            state,
            node.id
        );
        std::mem::replace(&mut node.state, state)
    }

    /// Count one more visit
    pub fn record_visit(&mut self, idx: NodeIndex) {
        self.graph[idx].visit_count += 1;
    }

    /// Count one more engagement
    pub fn record_engagement(&mut self, idx: NodeIndex) {
        self.graph[idx].engagement_score += 1;
    }

    /// Store the last oracle rationale
    pub fn record_reason(&mut self, idx: NodeIndex, reason: impl Into<String>) {
        self.graph[idx].last_reason = Some(reason.into());
    }

    /// Owned copy of every agent, in insertion order
    pub fn snapshot(&self) -> Vec<AgentNode> {
        self.graph.node_weights().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(ids: &[&str]) -> Vec<AgentSpec> {
        ids.iter()
            .map(|id| AgentSpec::new(*id, id.to_uppercase()))
            .collect()
    }

    #[test]
    fn test_full_mesh_edge_count() {
        let graph = AgentGraph::full_mesh(specs(&["a", "b", "c", "d"])).unwrap();
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.edge_count(), 6);

        let pairs: Vec<_> = graph.edges().collect();
        assert!(pairs.contains(&("a", "b")));
        assert!(pairs.contains(&("c", "d")));
        assert!(pairs.iter().all(|(a, b)| a != b));
    }

    #[test]
    fn test_rejects_small_graphs() {
        assert!(matches!(
            AgentGraph::full_mesh(vec![]),
            Err(ViewsError::InvalidInput(_))
        ));
        assert!(matches!(
            AgentGraph::full_mesh(specs(&["solo"])),
            Err(ViewsError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let err = AgentGraph::full_mesh(specs(&["a", "b", "a"])).unwrap_err();
        assert!(err.to_string().contains("duplicate agent id: a"));
    }

    #[test]
    fn test_rejects_blank_ids() {
        assert!(AgentGraph::full_mesh(specs(&["a", "  "])).is_err());
    }

    #[test]
    fn test_nodes_start_inactive() {
        let graph = AgentGraph::full_mesh(specs(&["a", "b", "c"])).unwrap();
        assert!(graph
            .nodes()
            .all(|n| n.state == NodeState::Inactive && n.visit_count == 0));
        assert!(graph.active().is_empty());
        assert!(graph.engaged().is_empty());
    }

    #[test]
    fn test_others_ignores_edges() {
        let mut graph = AgentGraph::full_mesh(specs(&["a", "b", "c"])).unwrap();
        let a = graph.find("a").unwrap();
        let c = graph.find("c").unwrap();

        assert!(graph.disconnect(a, c));
        assert!(!graph.has_edge(a, c));
        assert!(!graph.disconnect(a, c));

        let others: Vec<_> = graph.others(a).into_iter().map(|i| graph.node(i).id.clone()).collect();
        assert_eq!(others, vec!["b", "c"]);
    }

    #[test]
    fn test_mutations() {
        let mut graph = AgentGraph::full_mesh(specs(&["a", "b"])).unwrap();
        let b = graph.find("b").unwrap();

        assert_eq!(graph.set_state(b, NodeState::Active), NodeState::Inactive);
        graph.record_visit(b);
        graph.record_visit(b);
        graph.record_engagement(b);
        graph.record_reason(b, "sounds fun");

        let node = graph.node(b);
        assert_eq!(node.state, NodeState::Active);
        assert_eq!(node.visit_count, 2);
        assert_eq!(node.engagement_score, 1);
        assert_eq!(node.last_reason.as_deref(), Some("sounds fun"));
        assert!(node.is_reached());
        assert_eq!(graph.active(), vec![b]);
    }

    #[test]
    fn test_engaged_cannot_drop_to_inactive() {
        assert!(!NodeState::Engaged.can_transition_to(NodeState::Inactive));
        assert!(NodeState::Engaged.can_transition_to(NodeState::Active));
        assert!(NodeState::Inactive.can_transition_to(NodeState::Active));
        assert!(NodeState::Active.can_transition_to(NodeState::Inactive));
    }

    #[test]
    fn test_node_serializes_camel_case() {
        let graph = AgentGraph::full_mesh(specs(&["a", "b"])).unwrap();
        let json = serde_json::to_value(graph.snapshot()).unwrap();
        assert_eq!(json[0]["visitCount"], 0);
        assert_eq!(json[0]["engagementScore"], 0);
        assert_eq!(json[0]["state"], "inactive");
        assert!(json[0]["lastReason"].is_null());
    }
}
