//! Views CLI binary.
//!
//! Message propagation simulator for multi-agent chat sandboxes.
//!
//! # Commands
//!
//! - `run` - Run one simulation locally and print transmissions
//! - `decide` - Ask the configured oracle for a single verdict
//! - `serve` - Start the HTTP run-control server

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use views::{
    config::{Config, OracleKind},
    engine::{CancelToken, EventSink, RngSource, Simulation, SimulationParams, StepOutcome},
    graph::AgentSpec,
    oracle::{build_oracle, OracleRequest},
    server::{serve, AppState, ServerConfig},
    TransmissionEvent, VERSION,
};

#[derive(Parser)]
#[command(name = "views")]
#[command(version = VERSION)]
#[command(about = "Views - LLM-driven message propagation simulator", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/views/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one simulation and print every transmission
    Run {
        /// Message to spread
        #[arg(short, long)]
        message: String,

        /// JSON file with an array of {id, name, persona_type?, description?}
        #[arg(short, long)]
        nodes: Option<PathBuf>,

        /// Number of built-in personas to use when no node file is given
        #[arg(short, long, default_value = "7")]
        agents: usize,

        /// Step budget
        #[arg(short, long)]
        steps: Option<u32>,

        /// RNG seed for a reproducible run
        #[arg(long)]
        seed: Option<u64>,

        /// Oracle: llm, http or random
        #[arg(short, long)]
        oracle: Option<String>,

        /// Pause between steps in milliseconds
        #[arg(long)]
        settle_ms: Option<u64>,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ask the oracle whether one persona would engage
    Decide {
        /// Persona id
        #[arg(long)]
        persona: String,

        /// Persona display name
        #[arg(long)]
        name: Option<String>,

        /// Persona archetype
        #[arg(long)]
        persona_type: Option<String>,

        /// Personality description
        #[arg(long)]
        description: Option<String>,

        /// Message to judge
        #[arg(short, long)]
        message: String,

        /// Oracle: llm, http or random
        #[arg(short, long)]
        oracle: Option<String>,
    },

    /// Start the HTTP run-control server
    Serve {
        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Listen host
        #[arg(long)]
        host: Option<String>,

        /// Bind to all interfaces
        #[arg(long)]
        bind_all: bool,

        /// Oracle: llm, http or random
        #[arg(short, long)]
        oracle: Option<String>,

        /// Disable CORS
        #[arg(long)]
        no_cors: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            message,
            nodes,
            agents,
            steps,
            seed,
            oracle,
            settle_ms,
            json,
        } => {
            apply_oracle(&mut config, oracle.as_deref())?;
            if let Some(steps) = steps {
                config.simulation.max_steps = steps;
            }
            if let Some(seed) = seed {
                config.simulation.seed = Some(seed);
            }
            if let Some(ms) = settle_ms {
                config.simulation.settle_delay_ms = ms;
            }
            let agents = match nodes {
                Some(path) => read_nodes(&path)?,
                None => default_cast(agents),
            };
            cmd_run(&config, agents, message, json)
        },

        Commands::Decide {
            persona,
            name,
            persona_type,
            description,
            message,
            oracle,
        } => {
            apply_oracle(&mut config, oracle.as_deref())?;
            let request = OracleRequest {
                persona_id: persona,
                message,
                persona_name: name,
                persona_type,
                description,
            };
            cmd_decide(&config, &request)
        },

        Commands::Serve {
            port,
            host,
            bind_all,
            oracle,
            no_cors,
        } => {
            apply_oracle(&mut config, oracle.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            if no_cors {
                config.server.cors = false;
            }
            cmd_serve(&config, bind_all)
        },
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn apply_oracle(config: &mut Config, oracle: Option<&str>) -> anyhow::Result<()> {
    if let Some(kind) = oracle {
        config.oracle.kind = kind.parse::<OracleKind>()?;
    }
    Ok(())
}

fn read_nodes(path: &Path) -> anyhow::Result<Vec<AgentSpec>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Built-in personas, cycled when more agents are requested
fn default_cast(count: usize) -> Vec<AgentSpec> {
    const CAST: [(&str, &str, &str); 7] = [
        ("Alice", "AI researcher", "Curious and analytical; cares about machine learning and ethics."),
        ("Bob", "software engineer", "Pragmatic and friendly; loves clean code and hates hype."),
        ("Carol", "UX designer", "Creative and empathetic; enthusiastic about anything people-facing."),
        ("David", "philosopher", "Skeptical and logical; questions every claim before repeating it."),
        ("Emma", "entrepreneur", "Optimistic and driven; shares anything with social impact."),
        ("Frank", "comedian", "Witty and observant; spreads whatever he can joke about."),
        ("Grace", "mediator", "Calm and diplomatic; avoids spreading divisive rumours."),
    ];

    (0..count)
        .map(|i| {
            let (name, persona_type, description) = CAST[i % CAST.len()];
            let round = i / CAST.len();
            let (id, name) = if round == 0 {
                (name.to_lowercase(), name.to_string())
            } else {
                (
                    format!("{}-{}", name.to_lowercase(), round + 1),
                    format!("{name} {}", round + 1),
                )
            };
            AgentSpec::new(id, name)
                .with_persona_type(persona_type)
                .with_description(description)
        })
        .collect()
}

/// Prints transmissions and per-step stats to stdout
struct ConsoleSink {
    quiet: bool,
}

impl EventSink for ConsoleSink {
    fn transmit(&mut self, step: u32, event: &TransmissionEvent) {
        if !self.quiet {
            println!("  [{step:>3}] {} -> {}", event.from, event.to);
        }
    }

    fn step_completed(&mut self, outcome: &StepOutcome, _simulation: &Simulation) {
        if self.quiet {
            return;
        }
        if let Some(node) = &outcome.reactivated {
            println!("  [{:>3}] {node} wakes up", outcome.step);
        }
        for record in &outcome.verdicts {
            println!(
                "  [{:>3}] {} {} (priority {:.2}{}): {}",
                outcome.step,
                record.node_id,
                if record.verdict.engage { "engages" } else { "passes" },
                record.verdict.priority,
                if record.fallback { ", fallback" } else { "" },
                record.verdict.reason,
            );
        }
        println!(
            "Step {}/{}: reach {}% ({} reached)",
            outcome.stats.step,
            outcome.stats.max_steps,
            outcome.stats.reach.reach_percent,
            outcome.stats.reach.engaged_count,
        );
    }
}

fn cmd_run(
    config: &Config,
    agents: Vec<AgentSpec>,
    message: String,
    json: bool,
) -> anyhow::Result<()> {
    let oracle = build_oracle(&config.oracle, config.simulation.seed)?;
    let params = SimulationParams::from(&config.simulation);
    let rng = Box::new(RngSource::maybe_seeded(config.simulation.seed));
    let mut simulation = Simulation::new(agents, message, params, oracle, rng)?;

    if !json {
        println!(
            "Seeding \"{}\" at {} ({} agents, {} steps)",
            simulation.message(),
            simulation.seed_id(),
            simulation.graph().len(),
            simulation.params().max_steps,
        );
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(async {
        let cancel = CancelToken::new();
        let ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ctrl_c.cancel();
            }
        });

        let mut sink = ConsoleSink { quiet: json };
        simulation.run(&mut sink, &cancel).await
    });

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!(
            "{:?} after {} steps: reach {}% ({} of {} agents)",
            report.status,
            report.stats.step,
            report.stats.reach.reach_percent,
            report.stats.reach.engaged_count,
            report.nodes.len(),
        );
        for node in &report.nodes {
            println!(
                "  {:<12} {:<9} visits {:>2}  engagements {:>2}",
                node.id,
                node.state.to_string(),
                node.visit_count,
                node.engagement_score,
            );
        }
    }

    Ok(())
}

fn cmd_decide(config: &Config, request: &OracleRequest) -> anyhow::Result<()> {
    let oracle = build_oracle(&config.oracle, config.simulation.seed)?;
    let runtime = tokio::runtime::Runtime::new()?;
    let verdict = runtime.block_on(async {
        tokio::time::timeout(
            config.oracle.timeout() + Duration::from_secs(1),
            oracle.decide(request),
        )
        .await
    })??;

    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}

fn cmd_serve(config: &Config, bind_all: bool) -> anyhow::Result<()> {
    let mut server_config = ServerConfig::from_config(config);
    if bind_all {
        server_config = server_config.bind_all();
    }

    let oracle = build_oracle(&config.oracle, config.simulation.seed)?;
    tracing::info!(
        "Starting Views server on {} (oracle: {}, max_steps: {})",
        server_config.addr,
        oracle.name(),
        server_config.simulation.max_steps
    );

    let state = Arc::new(AppState::new(server_config, oracle));

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async { serve(state).await.map_err(|e| anyhow::anyhow!("{}", e)) })
}
