//! Error types for the risk engine
//!
//! Almost every variant here is non-fatal: the engine converts it into
//! degraded data at the narrowest scope and logs it. Only cancellation is
//! ever returned to a caller.

use thiserror::Error;

/// Risk engine error
#[derive(Debug, Error)]
pub enum Error {
    /// Feature extractor query failed
    #[error("Extraction error in {extractor}: {reason}")]
    Extraction {
        /// Extractor name
        extractor: &'static str,
        /// Failure description
        reason: String,
    },

    /// Feature extractor exceeded its time budget
    #[error("Extractor {extractor} timed out after {timeout_ms}ms")]
    ExtractorTimeout {
        /// Extractor name
        extractor: &'static str,
        /// Configured budget
        timeout_ms: u64,
    },

    /// A single fraud pattern could not be evaluated
    #[error("Pattern {pattern_id} evaluation failed: {reason}")]
    PatternEvaluation {
        /// Pattern id
        pattern_id: String,
        /// Failure description
        reason: String,
    },

    /// A scoring model failed
    #[error("Model {model} failed: {reason}")]
    Model {
        /// Model name
        model: &'static str,
        /// Failure description
        reason: String,
    },

    /// Historical event store error
    #[error("Event store error: {0}")]
    Store(String),

    /// Pattern repository error
    #[error("Pattern repository error: {0}")]
    PatternRepository(String),

    /// Audit write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Session/rate-limit controller call failed
    #[error("Mitigation error: {0}")]
    Mitigation(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Evaluation cancelled by the caller
    #[error("Evaluation cancelled")]
    Cancelled,

    /// Unexpected fault escaping the scoring pipeline
    #[error("Catastrophic error: {0}")]
    Catastrophic(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parse error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
