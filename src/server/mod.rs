//! Views HTTP server.
//!
//! Exposes run control over HTTP:
//! - Start, inspect and cancel propagation runs
//! - Stream-friendly transmission logs for the dashboard
//! - A passthrough to the configured decision oracle
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use views::server::{serve, AppState, ServerConfig};
//! use views::oracle::RandomOracle;
//!
//! let config = ServerConfig::default().with_port(8000);
//! let state = Arc::new(AppState::new(config, Arc::new(RandomOracle::new())));
//! serve(state).await?;
//! ```

mod config;
mod handlers;
mod state;

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::error::{Result, ViewsError};

pub use config::ServerConfig;
pub use handlers::{create_router, health_check};
pub use state::{AppState, RunManager, RunRecord, StartRun};

/// Bind to the configured address and serve until the process stops
pub async fn serve(state: Arc<AppState>) -> Result<()> {
    let addr = state.config.addr;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ViewsError::Server(format!("Failed to bind to {addr}: {e}")))?;

    tracing::info!("Views server listening on http://{}", addr);

    axum::serve(listener, create_router(state))
        .await
        .map_err(|e| ViewsError::Server(format!("Server error: {e}")))
}
