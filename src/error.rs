//! Views error types.
//!
//! # Error Classification
//!
//! Errors in this crate fall into three groups:
//!
//! - **Rejected input**: a run is never created from an invalid request
//!   (`InvalidInput`). The caller sees these directly.
//! - **Oracle failures**: transport, timeout and parse failures of the
//!   decision oracle (`OracleError`). The propagation engine never lets these
//!   escape a step; they are converted into fallback verdicts. They surface
//!   only through the oracle API itself (e.g. the `/decide-engagement` route).
//! - **Host failures**: configuration, I/O and server errors of the process
//!   embedding the engine.
//!
//! Cancellation is not an error. A cancelled run is a normal terminal state.

use thiserror::Error;

/// Decision oracle failures.
///
/// Every variant is recoverable from the engine's point of view.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    /// The request never produced a response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The oracle answered with a non-success status.
    #[error("Oracle returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (possibly truncated).
        body: String,
    },

    /// The oracle did not answer in time.
    #[error("Oracle request timed out")]
    Timeout,

    /// The oracle answered but the verdict could not be read.
    #[error("Malformed oracle response: {0}")]
    MalformedResponse(String),

    /// No persona profile is known for the requested id.
    #[error("Unknown persona: {0}")]
    UnknownPersona(String),
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OracleError::Timeout
        } else if err.is_decode() {
            OracleError::MalformedResponse(err.to_string())
        } else {
            OracleError::Transport(err.to_string())
        }
    }
}

/// Views errors.
#[derive(Error, Debug)]
pub enum ViewsError {
    /// A run request was rejected before the run was created.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No run is registered under the given id.
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Decision oracle error.
    ///
    /// Only returned by direct oracle calls, never by a running simulation.
    #[error("Oracle error: {0}")]
    Oracle(#[source] OracleError),

    /// Server-side error.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Views operations
pub type Result<T> = std::result::Result<T, ViewsError>;

impl From<OracleError> for ViewsError {
    fn from(err: OracleError) -> Self {
        ViewsError::Oracle(err)
    }
}

impl From<toml::de::Error> for ViewsError {
    fn from(err: toml::de::Error) -> Self {
        ViewsError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oracle_error_keeps_source() {
        let err: ViewsError = OracleError::MalformedResponse("not json".into()).into();
        assert!(matches!(err, ViewsError::Oracle(_)));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(
            err.to_string(),
            "Oracle error: Malformed oracle response: not json"
        );
    }

    #[test]
    fn test_toml_error_maps_to_config() {
        let parsed: std::result::Result<toml::Value, _> = toml::from_str("= broken");
        let err: ViewsError = parsed.unwrap_err().into();
        assert!(matches!(err, ViewsError::Config(_)));
    }
}
