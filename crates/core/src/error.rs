//! Error types for the question pipeline.

use thiserror::Error;

/// Failures of a single reasoning-engine call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Reasoning engine rate limit reached")]
    RateLimited,

    #[error("Reasoning engine rejected the credentials ({0})")]
    Unauthorized(u16),

    #[error("Network error talking to the reasoning engine: {0}")]
    Network(String),

    #[error("Reasoning engine call timed out after {0}s")]
    Timeout(u64),

    #[error("Reasoning engine error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Unusable reasoning engine output: {0}")]
    Malformed(String),
}

/// Recoverable failure of one answer tier. The orchestrator records it and moves on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TierError {
    #[error("generation failed: {0}")]
    Generation(#[from] EngineError),

    #[error("generated query rejected: {0}")]
    Rejected(String),

    #[error("query execution failed: {0}")]
    Execution(String),

    #[error("query returned no rows")]
    NoResults,

    #[error("query generation deferred to context answering")]
    Deferred,

    #[error("timed out after {0}s")]
    Timeout(u64),
}

impl TierError {
    /// Short user-facing category. Raw detail stays in the logs.
    pub fn friendly(&self) -> &'static str {
        match self {
            TierError::Generation(EngineError::RateLimited) => {
                "The assistant is getting too many requests right now. Please try again in a minute."
            }
            TierError::Generation(EngineError::Unauthorized(_)) => {
                "The assistant is not configured correctly (credential problem)."
            }
            TierError::Generation(EngineError::Network(_))
            | TierError::Generation(EngineError::Timeout(_))
            | TierError::Timeout(_) => "The assistant could not be reached (network or timeout).",
            TierError::Generation(_) | TierError::Rejected(_) | TierError::Deferred => {
                "Could not generate a query for that question."
            }
            TierError::Execution(_) => "Could not generate a query for that question.",
            TierError::NoResults => "No results matched that question.",
        }
    }
}

/// Errors that end a request before any tier runs
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("A question is required")]
    MissingQuestion,

    #[error("Timezone offset {0} is outside -1440..=1440 minutes")]
    InvalidTimezoneOffset(i32),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Data access error: {0}")]
    DataAccess(String),
}

impl PipelineError {
    /// HTTP-equivalent status for the boundary
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::MissingQuestion | PipelineError::InvalidTimezoneOffset(_) => 400,
            PipelineError::Configuration(_) => 500,
            PipelineError::DataAccess(_) => 502,
        }
    }
}
