//! End-to-end propagation tests.
//!
//! These drive whole runs through the public API with scripted and seeded
//! randomness and check the observable transmissions and stats.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use views::oracle::FALLBACK_REASON;
use views::{
    AgentGraph, AgentSpec, CancelToken, DecisionOracle, EventSink, NodeState, NullSink,
    OracleError, OracleRequest, RandomOracle, RandomSource, RngSource, RunStatus, Simulation,
    SimulationParams, StepEvent, StepOutcome, TransmissionEvent, Verdict,
};

/// Replays scripted draws
struct Script {
    units: VecDeque<f64>,
    indices: VecDeque<usize>,
}

impl Script {
    fn boxed(units: &[f64], indices: &[usize]) -> Box<dyn RandomSource> {
        Box::new(Self {
            units: units.iter().copied().collect(),
            indices: indices.iter().copied().collect(),
        })
    }
}

impl RandomSource for Script {
    fn next_unit(&mut self) -> f64 {
        self.units.pop_front().expect("unit script exhausted")
    }

    fn next_index(&mut self, len: usize) -> usize {
        let idx = self.indices.pop_front().expect("index script exhausted");
        assert!(idx < len, "scripted index {idx} out of range {len}");
        idx
    }
}

/// Answers every request with the same verdict
struct Always(Verdict);

#[async_trait]
impl DecisionOracle for Always {
    async fn decide(&self, _request: &OracleRequest) -> Result<Verdict, OracleError> {
        Ok(self.0.clone())
    }
}

/// Fails for one persona, engages everyone else
struct FailsFor(&'static str);

#[async_trait]
impl DecisionOracle for FailsFor {
    async fn decide(&self, request: &OracleRequest) -> Result<Verdict, OracleError> {
        if request.persona_id == self.0 {
            Err(OracleError::Timeout)
        } else {
            Ok(Verdict::engage("worth sharing", 0.9))
        }
    }
}

fn abc() -> Vec<AgentSpec> {
    vec![
        AgentSpec::new("A", "Alice").with_persona_type("researcher"),
        AgentSpec::new("B", "Bob").with_persona_type("engineer"),
        AgentSpec::new("C", "Carol").with_persona_type("designer"),
    ]
}

fn crowd(n: usize) -> Vec<AgentSpec> {
    (0..n)
        .map(|i| AgentSpec::new(format!("agent-{i}"), format!("Agent {i}")))
        .collect()
}

fn state_of(sim: &Simulation, id: &str) -> NodeState {
    let g = sim.graph();
    g.node(g.find(id).unwrap()).state
}

/// Test an engaging seed with high priority reaches both other nodes
#[tokio::test]
async fn test_high_priority_seed_reaches_everyone() {
    let mut sim = Simulation::new(
        abc(),
        "Free pizza in the lobby",
        SimulationParams::default().with_max_steps(1),
        Arc::new(Always(Verdict::engage("everyone loves pizza", 0.9))),
        // seed A, base = 1
        Script::boxed(&[], &[0, 0]),
    )
    .unwrap();

    let mut events: Vec<StepEvent> = Vec::new();
    let report = sim.run(&mut events, &CancelToken::new()).await;

    assert_eq!(
        events,
        vec![
            StepEvent {
                step: 1,
                event: TransmissionEvent::new("A", "B"),
            },
            StepEvent {
                step: 1,
                event: TransmissionEvent::new("A", "C"),
            },
        ]
    );
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.stats.step, 1);
    assert_eq!(report.stats.reach.reach_percent, 100);
    assert_eq!(report.stats.reach.engaged_count, 3);
    assert_eq!(state_of(&sim, "A"), NodeState::Engaged);
    assert_eq!(state_of(&sim, "B"), NodeState::Active);
    assert_eq!(state_of(&sim, "C"), NodeState::Active);
}

/// Test a rejecting seed ends the spread for good
#[tokio::test]
async fn test_rejecting_seed_stalls_run() {
    let mut sim = Simulation::new(
        abc(),
        "Meeting moved to 3pm",
        SimulationParams::default().with_max_steps(5),
        Arc::new(Always(Verdict::reject("not interesting", 0.1))),
        // only the seed draw; nothing is ever engaged so idle steps draw nothing
        Script::boxed(&[], &[0]),
    )
    .unwrap();

    let first = sim.step_once().await.unwrap();
    assert!(first.events.is_empty());
    assert_eq!(state_of(&sim, "A"), NodeState::Inactive);
    assert_eq!(first.stats.reach.engaged_count, 1);
    assert_eq!(first.stats.reach.reach_percent, 33);

    let mut events: Vec<StepEvent> = Vec::new();
    let report = sim.run(&mut events, &CancelToken::new()).await;
    assert!(events.is_empty());
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.stats.step, 5);
    assert_eq!(report.stats.reach, first.stats.reach);
    assert_eq!(
        report.nodes[0].last_reason.as_deref(),
        Some("not interesting")
    );
}

/// Test one failing oracle call does not hold back the others
#[tokio::test]
async fn test_oracle_failure_is_isolated() {
    let mut sim = Simulation::new(
        abc(),
        "Server room is flooding",
        SimulationParams::default().with_max_steps(2),
        Arc::new(FailsFor("B")),
        // seed A; A base 1; C base 1. B's fallback draws 0.2 -> reject
        Script::boxed(&[0.2], &[0, 0, 0]),
    )
    .unwrap();

    sim.step_once().await.unwrap();
    let outcome = sim.step_once().await.unwrap();

    assert_eq!(outcome.verdicts.len(), 2);
    let b = &outcome.verdicts[0];
    assert_eq!(b.node_id, "B");
    assert!(b.fallback);
    assert!(!b.verdict.engage);
    assert_eq!(b.verdict.reason, FALLBACK_REASON);
    assert!((b.verdict.priority - 0.5).abs() < f64::EPSILON);

    let c = &outcome.verdicts[1];
    assert_eq!(c.node_id, "C");
    assert!(!c.fallback);
    assert!(c.verdict.engage);

    // every other node is visited, so candidates fall back to insertion order
    assert_eq!(
        outcome.events,
        vec![TransmissionEvent::new("C", "A"), TransmissionEvent::new("C", "B")]
    );
    assert_eq!(state_of(&sim, "A"), NodeState::Engaged);
    assert_eq!(state_of(&sim, "B"), NodeState::Active);
    assert_eq!(state_of(&sim, "C"), NodeState::Engaged);
}

/// Test a fallback verdict can also engage
#[tokio::test]
async fn test_fallback_can_engage() {
    let agents = vec![AgentSpec::new("B", "Bob"), AgentSpec::new("A", "Alice")];
    let mut sim = Simulation::new(
        agents,
        "Coffee machine fixed",
        SimulationParams::default().with_max_steps(1),
        Arc::new(FailsFor("B")),
        // seed B; fallback draws 0.7 -> engage at 0.5, base 1
        Script::boxed(&[0.7], &[0, 0]),
    )
    .unwrap();

    let outcome = sim.step_once().await.unwrap();
    assert!(outcome.verdicts[0].fallback);
    assert!(outcome.verdicts[0].verdict.engage);
    assert_eq!(outcome.events, vec![TransmissionEvent::new("B", "A")]);
}

/// Cancels once a given step has completed
struct CancelAfter {
    step: u32,
    token: CancelToken,
    seen: Vec<u32>,
}

impl EventSink for CancelAfter {
    fn transmit(&mut self, _step: u32, _event: &TransmissionEvent) {}

    fn step_completed(&mut self, outcome: &StepOutcome, _simulation: &Simulation) {
        self.seen.push(outcome.step);
        if outcome.step == self.step {
            self.token.cancel();
        }
    }
}

/// Test cancelling mid-run reports exactly the completed steps
#[tokio::test]
async fn test_cancel_mid_run_reports_completed_steps() {
    let mut sim = Simulation::new(
        crowd(6),
        "Fire drill at noon",
        SimulationParams::default().with_max_steps(20),
        Arc::new(RandomOracle::seeded(7)),
        Box::new(RngSource::seeded(7)),
    )
    .unwrap();

    let token = CancelToken::new();
    let mut sink = CancelAfter {
        step: 3,
        token: token.clone(),
        seen: Vec::new(),
    };
    let report = sim.run(&mut sink, &token).await;

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.stats.step, 3);
    assert_eq!(sink.seen, vec![1, 2, 3]);
    assert_eq!(sim.step(), 3);
}

/// Engages after a delay, tracking how many calls overlap
#[derive(Default)]
struct Slow {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl DecisionOracle for Slow {
    async fn decide(&self, _request: &OracleRequest) -> Result<Verdict, OracleError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Verdict::engage("passing it on", 0.9))
    }
}

/// Test all active nodes are consulted at once, not one after another
#[tokio::test]
async fn test_oracle_calls_overlap_within_a_step() {
    let oracle = Arc::new(Slow::default());
    let mut sim = Simulation::new(
        abc(),
        "Office closes early on Friday",
        SimulationParams::default().with_max_steps(2),
        Arc::clone(&oracle) as Arc<dyn DecisionOracle>,
        // seed A, A base 1; then B and C each base 1
        Script::boxed(&[], &[0, 0, 0, 0]),
    )
    .unwrap();

    sim.step_once().await.unwrap();
    assert_eq!(oracle.peak.load(Ordering::SeqCst), 1);

    let outcome = sim.step_once().await.unwrap();
    assert_eq!(outcome.verdicts.len(), 2);
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 3);
    assert_eq!(oracle.peak.load(Ordering::SeqCst), 2);
    assert_eq!(oracle.in_flight.load(Ordering::SeqCst), 0);
}

/// Publishes the latest completed step
struct Progress(Arc<AtomicU32>);

impl EventSink for Progress {
    fn transmit(&mut self, _step: u32, _event: &TransmissionEvent) {}

    fn step_completed(&mut self, outcome: &StepOutcome, _simulation: &Simulation) {
        self.0.store(outcome.step, Ordering::SeqCst);
    }
}

/// Test a run with an instant oracle still lets other tasks in between steps
#[tokio::test]
async fn test_run_yields_between_steps() {
    const STEPS: u32 = 1_000_000;

    let mut sim = Simulation::new(
        crowd(2),
        "Printer on floor two is fixed",
        SimulationParams::default().with_max_steps(STEPS),
        Arc::new(RandomOracle::seeded(13)),
        Box::new(RngSource::seeded(13)),
    )
    .unwrap();

    let progress = Arc::new(AtomicU32::new(0));
    let mut sink = Progress(Arc::clone(&progress));
    let token = CancelToken::new();
    let run_token = token.clone();
    let handle = tokio::spawn(async move { sim.run(&mut sink, &run_token).await });

    // Single-threaded runtime: this only wakes if the run gives the thread back
    tokio::time::sleep(Duration::from_millis(1)).await;
    let seen = progress.load(Ordering::SeqCst);
    assert!(seen < STEPS, "run finished inside one poll");

    token.cancel();
    let report = handle.await.unwrap();
    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(report.stats.step >= seen);
    assert!(report.stats.step < STEPS);
}

/// Test every step advances the counter by exactly one until the budget
#[tokio::test]
async fn test_step_counter_is_exact() {
    let mut sim = Simulation::new(
        crowd(4),
        "Parking lot closed tomorrow",
        SimulationParams::default().with_max_steps(8),
        Arc::new(RandomOracle::seeded(3)),
        Box::new(RngSource::seeded(3)),
    )
    .unwrap();

    for expected in 1..=8 {
        let outcome = sim.step_once().await.unwrap();
        assert_eq!(outcome.step, expected);
        assert_eq!(outcome.stats.step, expected);
        assert_eq!(outcome.stats.max_steps, 8);
    }
    assert!(sim.is_finished());
    assert!(sim.step_once().await.is_none());
    assert_eq!(sim.step(), 8);
}

/// Test seeded runs are reproducible
#[tokio::test]
async fn test_seeded_runs_repeat() {
    async fn transmissions(seed: u64) -> Vec<StepEvent> {
        let mut sim = Simulation::new(
            crowd(5),
            "New snacks in the kitchen",
            SimulationParams::default().with_max_steps(12),
            Arc::new(RandomOracle::seeded(seed)),
            Box::new(RngSource::new(ChaCha8Rng::seed_from_u64(seed))),
        )
        .unwrap();
        let mut events = Vec::new();
        sim.run(&mut events, &CancelToken::new()).await;
        events
    }

    assert_eq!(transmissions(42).await, transmissions(42).await);
}

/// Test removing edges never changes who can be targeted
#[test]
fn test_edges_do_not_gate_candidates() {
    let mut graph = AgentGraph::full_mesh(abc()).unwrap();
    let a = graph.find("A").unwrap();
    let b = graph.find("B").unwrap();

    assert_eq!(graph.edge_count(), 3);
    assert!(graph.disconnect(a, b));
    assert!(!graph.has_edge(a, b));
    assert_eq!(graph.edge_count(), 2);
    assert!(graph.others(a).contains(&b));
    assert!(graph.others(b).contains(&a));
}

/// Test a run with a settle delay still completes
#[tokio::test]
async fn test_settle_delay_between_steps() {
    let mut sim = Simulation::new(
        abc(),
        "Elevator out of service",
        SimulationParams::default()
            .with_max_steps(3)
            .with_settle_delay(std::time::Duration::from_millis(5)),
        Arc::new(RandomOracle::seeded(11)),
        Box::new(RngSource::seeded(11)),
    )
    .unwrap();

    let report = sim.run(&mut NullSink, &CancelToken::new()).await;
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.stats.step, 3);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Visits, engagements and reach never go down, and every engaging
    /// verdict emits between one and three transmissions.
    #[test]
    fn prop_counters_are_monotonic(n in 2usize..9, steps in 1u32..25, seed in any::<u64>()) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let mut sim = Simulation::new(
                crowd(n),
                "Quarterly results are out",
                SimulationParams::default().with_max_steps(steps),
                Arc::new(RandomOracle::seeded(seed)),
                Box::new(RngSource::new(ChaCha8Rng::seed_from_u64(seed))),
            )
            .unwrap();

            let mut prev_nodes = sim.graph().snapshot();
            let mut prev_reach = sim.stats().reach.reach_percent;

            while let Some(outcome) = sim.step_once().await {
                let nodes = sim.graph().snapshot();
                for (before, after) in prev_nodes.iter().zip(&nodes) {
                    prop_assert!(after.visit_count >= before.visit_count);
                    prop_assert!(after.engagement_score >= before.engagement_score);
                }
                prop_assert!(outcome.stats.reach.reach_percent >= prev_reach);
                prop_assert!(outcome.stats.reach.reach_percent <= 100);

                let engaging = outcome.verdicts.iter().filter(|r| r.verdict.engage).count();
                prop_assert!(outcome.events.len() >= engaging);
                prop_assert!(outcome.events.len() <= 3 * engaging);
                for event in &outcome.events {
                    prop_assert_ne!(&event.from, &event.to);
                }

                prev_nodes = nodes;
                prev_reach = outcome.stats.reach.reach_percent;
            }
            prop_assert_eq!(sim.step(), steps);
            Ok(())
        })?;
    }
}
