//! Server configuration.

use std::net::SocketAddr;

use crate::config::Config;
use crate::engine::SimulationParams;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub addr: SocketAddr,
    /// Default parameters for new runs
    pub simulation: SimulationParams,
    /// Fixed RNG seed for every run (random when unset)
    pub seed: Option<u64>,
    /// Maximum agents per run
    pub max_agents: usize,
    /// Maximum step budget per run
    pub max_steps: u32,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Enable request logging
    pub logging: bool,
    /// CORS enabled
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            simulation: SimulationParams::default(),
            seed: None,
            max_agents: 500,
            max_steps: 10_000,
            max_body_size: 1024 * 1024, // 1MB
            logging: true,
            cors_enabled: true,
        }
    }
}

impl ServerConfig {
    /// Build from the file/env configuration
    pub fn from_config(config: &Config) -> Self {
        let addr = config
            .server
            .listen_addr()
            .parse()
            .unwrap_or_else(|_| Self::default().addr);
        Self {
            addr,
            simulation: SimulationParams::from(&config.simulation),
            seed: config.simulation.seed,
            max_steps: config.simulation.max_steps.max(Self::default().max_steps),
            cors_enabled: config.server.cors,
            ..Self::default()
        }
    }

    /// Create with custom port
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }

    /// Bind to all interfaces
    pub fn bind_all(mut self) -> Self {
        self.addr = SocketAddr::from(([0, 0, 0, 0], self.addr.port()));
        self
    }

    /// Set address directly
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Set default run parameters
    pub fn with_simulation(mut self, params: SimulationParams) -> Self {
        self.simulation = params;
        self
    }

    /// Fix the RNG seed of every run
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Cap the step budget a run may request
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Disable logging
    pub fn without_logging(mut self) -> Self {
        self.logging = false;
        self
    }

    /// Disable CORS
    pub fn without_cors(mut self) -> Self {
        self.cors_enabled = false;
        self
    }
}
