//! Server state and run management.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use super::config::ServerConfig;
use crate::engine::{
    CancelToken, EventSink, RngSource, RunReport, RunStatus, Simulation, SimulationParams,
    StepEvent, StepOutcome, TransmissionEvent,
};
use crate::error::{Result, ViewsError};
use crate::graph::AgentSpec;
use crate::oracle::DecisionOracle;
use crate::stats::RunStats;

/// Application state shared across handlers
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Run manager
    pub runs: RunManager,
    /// Oracle shared by every run
    pub oracle: Arc<dyn DecisionOracle>,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(config: ServerConfig, oracle: Arc<dyn DecisionOracle>) -> Self {
        Self {
            config,
            runs: RunManager::new(),
            oracle,
            start_time: Instant::now(),
        }
    }

    /// Get server uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Validate and launch a run with this server's defaults
    pub async fn start_run(&self, request: StartRun) -> Result<RunRecord> {
        if request.nodes.len() > self.config.max_agents {
            return Err(ViewsError::InvalidInput(format!(
                "at most {} agents per run, got {}",
                self.config.max_agents,
                request.nodes.len()
            )));
        }

        let mut params = self.config.simulation.clone();
        if let Some(max_steps) = request.max_steps {
            params.max_steps = max_steps;
        }
        if params.max_steps > self.config.max_steps {
            return Err(ViewsError::InvalidInput(format!(
                "at most {} steps per run, got {}",
                self.config.max_steps, params.max_steps
            )));
        }
        let seed = request.seed.or(self.config.seed);

        self.runs
            .start(request.nodes, request.message, params, Arc::clone(&self.oracle), seed)
            .await
    }
}

/// Body of a start request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRun {
    /// Agents taking part
    pub nodes: Vec<AgentSpec>,
    /// Message to spread
    pub message: String,
    /// Step budget (server default when absent)
    #[serde(default, alias = "maxSteps")]
    pub max_steps: Option<u32>,
    /// RNG seed for a reproducible run
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Public view of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier
    pub run_id: String,
    /// When the run was created
    pub started_at: DateTime<Utc>,
    /// Latest published report
    #[serde(flatten)]
    pub report: RunReport,
}

/// Publishes progress of one spawned run.
struct RunSink {
    events: Arc<Mutex<Vec<StepEvent>>>,
    report: watch::Sender<RunReport>,
}

impl EventSink for RunSink {
    fn transmit(&mut self, step: u32, event: &TransmissionEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(StepEvent {
                step,
                event: event.clone(),
            });
        }
    }

    fn step_completed(&mut self, _outcome: &StepOutcome, simulation: &Simulation) {
        self.report.send_replace(simulation.report(RunStatus::Running));
    }
}

/// A run tracked by the manager
struct RunEntry {
    started_at: DateTime<Utc>,
    cancel: CancelToken,
    report: watch::Receiver<RunReport>,
    events: Arc<Mutex<Vec<StepEvent>>>,
    task: JoinHandle<()>,
}

impl RunEntry {
    fn record(&self, run_id: &str) -> RunRecord {
        RunRecord {
            run_id: run_id.to_string(),
            started_at: self.started_at,
            report: self.report.borrow().clone(),
        }
    }

    fn is_finished(&self) -> bool {
        self.report.borrow().status != RunStatus::Running
    }
}

/// Owns every spawned run. Runs never share a graph.
pub struct RunManager {
    /// Runs by ID
    runs: Arc<RwLock<HashMap<String, RunEntry>>>,
    /// Finished runs kept for inspection before the oldest are dropped
    max_retained: usize,
}

impl Default for RunManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RunManager {
    /// Create new run manager
    pub fn new() -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
            max_retained: 256,
        }
    }

    /// Set how many finished runs are retained
    pub fn with_max_retained(mut self, max_retained: usize) -> Self {
        self.max_retained = max_retained;
        self
    }

    /// Validate and spawn a run. Invalid input never creates an entry.
    pub async fn start(
        &self,
        nodes: Vec<AgentSpec>,
        message: String,
        params: SimulationParams,
        oracle: Arc<dyn DecisionOracle>,
        seed: Option<u64>,
    ) -> Result<RunRecord> {
        let rng = Box::new(RngSource::maybe_seeded(seed));
        let mut simulation = Simulation::new(nodes, message, params, oracle, rng)?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = watch::channel(simulation.report(RunStatus::Running));
        let events = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancelToken::new();

        let mut sink = RunSink {
            events: Arc::clone(&events),
            report: tx,
        };
        let task_cancel = cancel.clone();
        let task_id = run_id.clone();
        let task = tokio::spawn(async move {
            let report = simulation.run(&mut sink, &task_cancel).await;
            tracing::info!(
                run = %task_id,
                status = ?report.status,
                step = report.stats.step,
                "Run finished"
            );
            sink.report.send_replace(report);
        });

        let entry = RunEntry {
            started_at: Utc::now(),
            cancel,
            report: rx,
            events,
            task,
        };
        let record = entry.record(&run_id);

        let mut runs = self.runs.write().await;
        Self::evict_finished(&mut runs, self.max_retained);
        runs.insert(run_id, entry);
        Ok(record)
    }

    /// Latest stats of a run
    pub async fn stats(&self, id: &str) -> Result<RunStats> {
        let runs = self.runs.read().await;
        let entry = runs
            .get(id)
            .ok_or_else(|| ViewsError::RunNotFound(id.to_string()))?;
        let stats = entry.report.borrow().stats;
        Ok(stats)
    }

    /// Latest full record of a run
    pub async fn get(&self, id: &str) -> Result<RunRecord> {
        let runs = self.runs.read().await;
        runs.get(id)
            .map(|entry| entry.record(id))
            .ok_or_else(|| ViewsError::RunNotFound(id.to_string()))
    }

    /// Transmissions emitted so far, in order
    pub async fn events(&self, id: &str) -> Result<Vec<StepEvent>> {
        let runs = self.runs.read().await;
        let entry = runs
            .get(id)
            .ok_or_else(|| ViewsError::RunNotFound(id.to_string()))?;
        let events = entry
            .events
            .lock()
            .map_err(|_| ViewsError::Server("event log poisoned".into()))?
            .clone();
        Ok(events)
    }

    /// Stop a run before its next step and wait for its final report.
    ///
    /// Cancelling a finished run returns its final report unchanged.
    pub async fn cancel(&self, id: &str) -> Result<RunRecord> {
        let (mut rx, started_at) = {
            let runs = self.runs.read().await;
            let entry = runs
                .get(id)
                .ok_or_else(|| ViewsError::RunNotFound(id.to_string()))?;
            entry.cancel.cancel();
            (entry.report.clone(), entry.started_at)
        };

        let report = rx
            .wait_for(|report| report.status != RunStatus::Running)
            .await
            .map_err(|_| ViewsError::Server(format!("run {id} stopped without a report")))?
            .clone();

        Ok(RunRecord {
            run_id: id.to_string(),
            started_at,
            report,
        })
    }

    /// Forget a run, aborting it if it is still going
    pub async fn remove(&self, id: &str) -> bool {
        match self.runs.write().await.remove(id) {
            Some(entry) => {
                entry.task.abort();
                true
            },
            None => false,
        }
    }

    /// Number of tracked runs
    pub async fn count(&self) -> usize {
        self.runs.read().await.len()
    }

    /// Number of runs still stepping
    pub async fn running(&self) -> usize {
        self.runs
            .read()
            .await
            .values()
            .filter(|entry| !entry.is_finished())
            .count()
    }

    /// Get all run IDs
    pub async fn list_ids(&self) -> Vec<String> {
        self.runs.read().await.keys().cloned().collect()
    }

    fn evict_finished(runs: &mut HashMap<String, RunEntry>, max_retained: usize) {
        let mut finished: Vec<(String, DateTime<Utc>)> = runs
            .iter()
            .filter(|(_, entry)| entry.is_finished())
            .map(|(id, entry)| (id.clone(), entry.started_at))
            .collect();
        if finished.len() < max_retained {
            return;
        }
        finished.sort_by_key(|(_, started_at)| *started_at);
        let excess = finished.len() + 1 - max_retained;
        for (id, _) in finished.into_iter().take(excess) {
            runs.remove(&id);
        }
    }
}
