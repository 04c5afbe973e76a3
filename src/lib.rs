//! # Views - LLM-driven Message Propagation
//!
//! Simulates how a single message spreads through a group of chat personas.
//! Each persona that currently carries the message asks a decision oracle
//! (normally an LLM playing that persona) whether it would engage and pass
//! it on. Engaging personas forward the message to one to three others,
//! more when they care a lot, preferring people who have not heard it yet.
//!
//! ## Features
//!
//! - **Bounded diffusion**: every run consumes exactly `max_steps` steps
//!   unless cancelled
//! - **Concurrent oracle fan-out**: one call per active agent per step,
//!   joined at a barrier before any state changes
//! - **Failure tolerant**: oracle failures become random fallback verdicts
//! - **Deterministic when asked**: all randomness behind [`RandomSource`]
//! - **Run control server**: start, inspect and cancel runs over HTTP
//!
//! ## Node Lifecycle
//!
//! ```text
//!                 targeted                 engage = true
//!   [Inactive] ─────────────> [Active] ─────────────────> [Engaged]
//!        ^                      │  ^                          │
//!        │    engage = false    │  │    idle reactivation     │
//!        └──────────────────────┘  └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use views::{AgentSpec, CancelToken, NullSink, RandomOracle, RngSource, Simulation, SimulationParams};
//!
//! let agents = vec![
//!     AgentSpec::new("ana", "Ana").with_persona_type("gossip"),
//!     AgentSpec::new("ben", "Ben").with_persona_type("skeptic"),
//!     AgentSpec::new("cai", "Cai"),
//! ];
//!
//! let mut sim = Simulation::new(
//!     agents,
//!     "The library is giving away free books on Friday",
//!     SimulationParams::default().with_max_steps(10),
//!     Arc::new(RandomOracle::seeded(1)),
//!     Box::new(RngSource::seeded(1)),
//! )?;
//!
//! let report = sim.run(&mut NullSink, &CancelToken::new()).await;
//! println!("reach: {}%", report.stats.reach.reach_percent);
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: Step loop, target selection, cancellation
//! - [`graph`]: Agent nodes and the cosmetic full-mesh edge set
//! - [`oracle`]: Decision oracle trait and LLM/HTTP/random backends
//! - [`stats`]: Reach statistics
//! - [`server`]: HTTP run control (Axum-based)
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod oracle;
pub mod server;
pub mod stats;

// Re-exports for convenience
pub use config::Config;
pub use engine::{
    CancelToken, EventSink, NullSink, RandomSource, RngSource, RunReport, RunStatus, Simulation,
    SimulationParams, StepEvent, StepOutcome, TransmissionEvent,
};
pub use error::{OracleError, Result, ViewsError};
pub use graph::{AgentGraph, AgentNode, AgentSpec, NodeState};
pub use oracle::{DecisionOracle, HttpOracle, LlmOracle, OracleRequest, RandomOracle, Verdict};
pub use server::{AppState, ServerConfig};
pub use stats::{Reach, RunStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
