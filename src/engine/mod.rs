//! Propagation engine.
//!
//! A [`Simulation`] spreads one seed message across a fixed set of agents.
//! Every step, each `Active` agent asks the [`DecisionOracle`] whether it
//! engages; engaging agents pass the message on to 1-3 targets, preferring
//! agents the message has not reached yet.
//!
//! # Step Algorithm
//!
//! ```text
//!  ┌──────────────┐  none active   ┌──────────────────────────────┐
//!  │ collect A =  │ ─────────────> │ p = 0.3: wake one engaged    │
//!  │ active nodes │                │ node, A = {it}; else idle    │
//!  └──────┬───────┘                └──────────────┬───────────────┘
//!         v                                       │
//!  ┌──────────────────────────────┐               │
//!  │ fan out one oracle call per  │ <─────────────┘
//!  │ node in A, wait for all      │   (barrier: no mutation before)
//!  └──────┬───────────────────────┘
//!         v
//!  ┌──────────────────────────────┐
//!  │ apply verdicts in A order;   │  failed calls become fallback
//!  │ engaged nodes pick targets   │  verdicts here
//!  └──────┬───────────────────────┘
//!         v
//!     step += 1, recompute stats
//! ```
//!
//! # Target Selection
//!
//! An engaging node picks `base + bonus` targets, `base` uniform in {1, 2}
//! and `bonus = 1` when the verdict priority exceeds the high-priority
//! threshold. Candidates are every other node, unvisited ones first. Target
//! `j` is `candidates[min(j, len - 1)]`, so when there are fewer candidates
//! than targets the last candidate is visited repeatedly, with one event per
//! visit. Visit statistics depend on this, so it is kept as is.
//!
//! Edges never restrict the candidate set.
//!
//! # Concurrency
//!
//! Steps are strictly sequential. Within a step the oracle calls run
//! concurrently and nothing is mutated until all of them have resolved;
//! the mutation pass is single-threaded. Each simulation owns its graph.

mod events;
mod random;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::error::{OracleError, Result, ViewsError};
use crate::graph::{AgentGraph, AgentNode, AgentSpec, NodeState};
use crate::oracle::{DecisionOracle, OracleRequest, Verdict};
use crate::stats::RunStats;

pub use events::{EventSink, NullSink, StepEvent, TransmissionEvent};
pub use random::{RandomSource, RngSource};

/// Tunables of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationParams {
    /// Steps the run always consumes (unless cancelled)
    pub max_steps: u32,
    /// Chance that an idle step wakes one engaged node
    pub reactivation_probability: f64,
    /// Priority above which an engaging node gets one extra target
    pub high_priority_threshold: f64,
    /// Pause after each step, for presentation only
    pub settle_delay: Duration,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            max_steps: 50,
            reactivation_probability: 0.3,
            high_priority_threshold: 0.7,
            settle_delay: Duration::ZERO,
        }
    }
}

impl From<&SimulationConfig> for SimulationParams {
    fn from(config: &SimulationConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            reactivation_probability: config.reactivation_probability,
            high_priority_threshold: config.high_priority_threshold,
            settle_delay: config.settle_delay(),
        }
    }
}

impl SimulationParams {
    /// Set the step budget
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Set the pause after each step
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(ViewsError::InvalidInput("max_steps must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.reactivation_probability) {
            return Err(ViewsError::InvalidInput(format!(
                "reactivation_probability must be in [0, 1], got {}",
                self.reactivation_probability
            )));
        }
        Ok(())
    }
}

/// Cooperative cancellation flag, checked before every step.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop before its next step
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`cancel`](Self::cancel) was called
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Steps remain
    Running,
    /// All `max_steps` steps ran
    Completed,
    /// Stopped early by its caller
    Cancelled,
}

/// Verdict applied to one node during a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictRecord {
    /// Node the verdict was for
    pub node_id: String,
    /// The verdict (possibly a fallback)
    pub verdict: Verdict,
    /// Whether the oracle failed and the fallback was used
    pub fallback: bool,
}

/// What one step did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Step counter after this step
    pub step: u32,
    /// Node woken by idle reactivation, if any
    pub reactivated: Option<String>,
    /// Verdicts in application order
    pub verdicts: Vec<VerdictRecord>,
    /// Transmissions in selection order
    pub events: Vec<TransmissionEvent>,
    /// Stats after this step
    pub stats: RunStats,
}

impl StepOutcome {
    /// Whether the step changed nothing but the counter
    pub fn is_idle(&self) -> bool {
        self.verdicts.is_empty()
    }
}

/// Result of a run, final or in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Lifecycle state
    pub status: RunStatus,
    /// Step counter and reach
    pub stats: RunStats,
    /// Id of the seed node
    pub seed: String,
    /// Seed message
    pub message: String,
    /// Node states in insertion order
    pub nodes: Vec<AgentNode>,
}

/// One propagation run over its own agent graph.
pub struct Simulation {
    graph: AgentGraph,
    message: String,
    step: u32,
    params: SimulationParams,
    seed: NodeIndex,
    oracle: Arc<dyn DecisionOracle>,
    rng: Box<dyn RandomSource>,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("nodes", &self.graph.len())
            .field("step", &self.step)
            .field("max_steps", &self.params.max_steps)
            .field("seed", &self.graph.node(self.seed).id)
            .field("oracle", &self.oracle.name())
            .finish_non_exhaustive()
    }
}

impl Simulation {
    /// Create a run and activate a uniformly chosen seed node.
    ///
    /// Rejects fewer than two agents, duplicate ids, a blank message and a
    /// zero step budget. Nothing is created on error.
    pub fn new(
        agents: Vec<AgentSpec>,
        message: impl Into<String>,
        params: SimulationParams,
        oracle: Arc<dyn DecisionOracle>,
        mut rng: Box<dyn RandomSource>,
    ) -> Result<Self> {
        let message = message.into();
        if message.trim().is_empty() {
            return Err(ViewsError::InvalidInput("message must not be empty".into()));
        }
        params.validate()?;
        let mut graph = AgentGraph::full_mesh(agents)?;

        let seed = NodeIndex::new(rng.next_index(graph.len()));
        graph.set_state(seed, NodeState::Active);
        graph.record_visit(seed);

        tracing::info!(
            nodes = graph.len(),
            seed = %graph.node(seed).id,
            max_steps = params.max_steps,
            oracle = oracle.name(),
            "Simulation created"
        );

        Ok(Self {
            graph,
            message,
            step: 0,
            params,
            seed,
            oracle,
            rng,
        })
    }

    /// The agent graph
    pub fn graph(&self) -> &AgentGraph {
        &self.graph
    }

    /// Completed steps
    pub fn step(&self) -> u32 {
        self.step
    }

    /// Run parameters
    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    /// Seed message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Id of the seed node
    pub fn seed_id(&self) -> &str {
        &self.graph.node(self.seed).id
    }

    /// Whether the step budget is used up
    pub fn is_finished(&self) -> bool {
        self.step >= self.params.max_steps
    }

    /// Current stats
    pub fn stats(&self) -> RunStats {
        RunStats::new(&self.graph, self.step, self.params.max_steps)
    }

    /// Snapshot of the run under `status`
    pub fn report(&self, status: RunStatus) -> RunReport {
        RunReport {
            status,
            stats: self.stats(),
            seed: self.seed_id().to_string(),
            message: self.message.clone(),
            nodes: self.graph.snapshot(),
        }
    }

    /// Execute one step. Returns `None` once the budget is used up.
    pub async fn step_once(&mut self) -> Option<StepOutcome> {
        if self.is_finished() {
            return None;
        }

        let mut active = self.graph.active();
        let mut reactivated = None;
        if active.is_empty() {
            if let Some(idx) = self.try_reactivate() {
                reactivated = Some(self.graph.node(idx).id.clone());
                active = vec![idx];
            }
        }

        let requests: Vec<OracleRequest> = active
            .iter()
            .map(|&idx| OracleRequest::for_node(self.graph.node(idx), &self.message))
            .collect();
        let results = consult(Arc::clone(&self.oracle), requests).await;

        let mut verdicts = Vec::with_capacity(active.len());
        let mut events = Vec::new();
        for (&idx, result) in active.iter().zip(results) {
            let (verdict, fallback) = match result {
                Ok(verdict) => (verdict, false),
                Err(e) => {
                    tracing::warn!(
                        node = %self.graph.node(idx).id,
                        error = %e,
                        "Oracle failed, using fallback verdict"
                    );
                    (Verdict::fallback(self.rng.as_mut()), true)
                },
            };
            self.apply(idx, &verdict, &mut events);
            verdicts.push(VerdictRecord {
                node_id: self.graph.node(idx).id.clone(),
                verdict,
                fallback,
            });
        }

        self.step += 1;
        let stats = self.stats();
        tracing::debug!(
            step = self.step,
            deciding = verdicts.len(),
            transmissions = events.len(),
            reach = stats.reach.reach_percent,
            "Step complete"
        );

        Some(StepOutcome {
            step: self.step,
            reactivated,
            verdicts,
            events,
            stats,
        })
    }

    /// Run until the budget is used up or `cancel` fires.
    ///
    /// Cancellation is checked before each step, so a cancelled run always
    /// reports a whole number of completed steps. The task yields between
    /// steps even when no settle delay is configured.
    pub async fn run(&mut self, sink: &mut dyn EventSink, cancel: &CancelToken) -> RunReport {
        while !self.is_finished() {
            if cancel.is_cancelled() {
                tracing::info!(step = self.step, "Simulation cancelled");
                return self.report(RunStatus::Cancelled);
            }

            let Some(outcome) = self.step_once().await else {
                break;
            };
            for event in &outcome.events {
                sink.transmit(outcome.step, event);
            }
            sink.step_completed(&outcome, self);

            if self.is_finished() {
                break;
            }
            if self.params.settle_delay.is_zero() {
                // Hand the worker back between steps
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.params.settle_delay).await;
            }
        }

        let report = self.report(RunStatus::Completed);
        tracing::info!(
            steps = report.stats.step,
            reach = report.stats.reach.reach_percent,
            "Simulation completed"
        );
        report
    }

    fn try_reactivate(&mut self) -> Option<NodeIndex> {
        let engaged = self.graph.engaged();
        if engaged.is_empty() {
            return None;
        }
        if self.rng.next_unit() >= self.params.reactivation_probability {
            return None;
        }
        let idx = engaged[self.rng.next_index(engaged.len())];
        self.graph.set_state(idx, NodeState::Active);
        tracing::debug!(node = %self.graph.node(idx).id, "Reactivated idle engaged node");
        Some(idx)
    }

    fn apply(&mut self, idx: NodeIndex, verdict: &Verdict, events: &mut Vec<TransmissionEvent>) {
        self.graph.record_reason(idx, verdict.reason.clone());

        if !verdict.engage {
            self.graph.set_state(idx, NodeState::Inactive);
            return;
        }

        self.graph.set_state(idx, NodeState::Engaged);
        self.graph.record_engagement(idx);

        let count = self.target_count(verdict.priority);
        let source = self.graph.node(idx).id.clone();
        for target in self.select_targets(idx, count) {
            events.push(TransmissionEvent::new(
                source.clone(),
                self.graph.node(target).id.clone(),
            ));
            if self.graph.node(target).state != NodeState::Engaged {
                self.graph.set_state(target, NodeState::Active);
            }
            self.graph.record_visit(target);
        }
    }

    fn target_count(&mut self, priority: f64) -> usize {
        let base = 1 + self.rng.next_index(2);
        let bonus = usize::from(priority > self.params.high_priority_threshold);
        base + bonus
    }

    /// Unvisited nodes first, then visited ones; the index is clamped to
    /// the last candidate.
    fn select_targets(&self, source: NodeIndex, count: usize) -> Vec<NodeIndex> {
        let (mut candidates, visited): (Vec<_>, Vec<_>) = self
            .graph
            .others(source)
            .into_iter()
            .partition(|&idx| self.graph.node(idx).visit_count == 0);
        candidates.extend(visited);

        let last = candidates.len() - 1;
        (0..count).map(|j| candidates[j.min(last)]).collect()
    }
}

/// Fan out one call per request and wait for every result.
async fn consult(
    oracle: Arc<dyn DecisionOracle>,
    requests: Vec<OracleRequest>,
) -> Vec<std::result::Result<Verdict, OracleError>> {
    join_all(requests.iter().map(|request| oracle.decide(request))).await
}
