//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`VIEWS_*`)
//! - CLI arguments (for the `views` binary)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ViewsError};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Propagation parameters
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Decision oracle configuration
    #[serde(default)]
    pub oracle: OracleConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: HttpConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ViewsError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| ViewsError::Config(format!("Failed to parse config: {e}")))
    }

    /// Default config file location (`<config dir>/views/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("views").join("config.toml"))
    }

    /// Load from `path` (or the default location if it exists), then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(default)?,
                _ => Self::default(),
            },
        };

        Ok(base.with_env())
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Apply environment variable overrides on top of `self`
    pub fn with_env(mut self) -> Self {
        // Simulation settings
        if let Some(val) = env_parse("VIEWS_MAX_STEPS") {
            self.simulation.max_steps = val;
        }
        if let Some(val) = env_parse("VIEWS_SETTLE_DELAY_MS") {
            self.simulation.settle_delay_ms = val;
        }
        if let Some(val) = env_parse("VIEWS_SEED") {
            self.simulation.seed = Some(val);
        }

        // Oracle settings
        if let Ok(kind) = std::env::var("VIEWS_ORACLE") {
            if let Ok(kind) = kind.parse() {
                self.oracle.kind = kind;
            }
        }
        if let Ok(base_url) = std::env::var("VIEWS_LLM_BASE_URL") {
            self.oracle.base_url = base_url;
        }
        if let Ok(model) = std::env::var("VIEWS_LLM_MODEL") {
            self.oracle.model = model;
        }
        if let Ok(key) = std::env::var("VIEWS_LLM_API_KEY") {
            self.oracle.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("VIEWS_ORACLE_URL") {
            self.oracle.decide_url = Some(url);
        }
        if let Some(val) = env_parse("VIEWS_ORACLE_TIMEOUT_SECS") {
            self.oracle.timeout_secs = val;
        }

        // Server settings
        if let Ok(host) = std::env::var("VIEWS_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse("VIEWS_PORT") {
            self.server.port = port;
        }

        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Propagation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Steps per run
    pub max_steps: u32,

    /// Chance that an idle step wakes one engaged node
    pub reactivation_probability: f64,

    /// Priority above which an engaging node gets one extra target
    pub high_priority_threshold: f64,

    /// Pause between steps, for presentation
    pub settle_delay_ms: u64,

    /// Fixed RNG seed (random when unset)
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            reactivation_probability: 0.3,
            high_priority_threshold: 0.7,
            settle_delay_ms: 0,
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Settle delay as a `Duration`
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Which decision oracle to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleKind {
    /// OpenAI-compatible chat completions
    #[default]
    Llm,
    /// Remote decide-engagement service
    Http,
    /// Offline coin flips
    Random,
}

impl std::str::FromStr for OracleKind {
    type Err = ViewsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "llm" => Ok(OracleKind::Llm),
            "http" => Ok(OracleKind::Http),
            "random" => Ok(OracleKind::Random),
            other => Err(ViewsError::Config(format!(
                "Unknown oracle kind: {other} (expected llm, http or random)"
            ))),
        }
    }
}

/// Decision oracle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Oracle implementation
    pub kind: OracleKind,

    /// Base URL of the OpenAI-compatible API (without `/chat/completions`)
    pub base_url: String,

    /// Chat model
    pub model: String,

    /// API key (prefer `VIEWS_LLM_API_KEY`)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Sampling temperature
    pub temperature: f32,

    /// Completion token limit for one verdict
    pub max_tokens: u32,

    /// Full URL of a remote decide-engagement endpoint (for `kind = "http"`)
    pub decide_url: Option<String>,

    /// Per-call timeout in seconds
    pub timeout_secs: u64,

    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            kind: OracleKind::Llm,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 150,
            decide_url: None,
            timeout_secs: 60,
            connect_timeout_secs: 10,
        }
    }
}

impl OracleConfig {
    /// Per-call timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Connect timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Enable permissive CORS (the dashboard is served from another origin)
    pub cors: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors: true,
        }
    }
}

impl HttpConfig {
    /// Get the full listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
