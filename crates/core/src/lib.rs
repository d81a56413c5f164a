//! Bowling Question Pipeline Core Library
//!
//! This crate answers free-text questions about a bowler's saved games:
//! - Filter extraction and timezone normalization
//! - Scope resolution with stable game/session labels
//! - Summary statistics
//! - Three answer tiers (generated query, context, offline rules) behind a
//!   routing state machine
//! - SQLite data access and answer logging

pub mod types;

pub mod aggregate;
pub mod config;
pub mod context_tier;
pub mod error;
pub mod extract;
pub mod llm;
pub mod offline;
pub mod pipeline;
pub mod postprocess;
pub mod router;
pub mod scope;
pub mod sql_tier;
pub mod store;
pub mod timezone;

#[cfg(test)]
mod testing;

// Re-export commonly used types at crate root
pub use types::{
    AskRequest, AskResponse, Frame, Game, QuestionFilters, Selection, Session, Shot, TimeFilter,
    format_date, local_today,
};

pub use aggregate::{summarize, Summary};
pub use config::{load_config, AskConfig};
pub use error::{EngineError, PipelineError, TierError};
pub use extract::extract_filters;
pub use llm::{OpenAiEngine, ReasoningEngine};
pub use pipeline::{check_request, preview_filters, Pipeline};
pub use router::{RoutingPolicy, Tier};
pub use scope::{resolve, LabelIndex, ResolvedScope};
pub use store::{AnswerLog, DataAccess, SqliteStore};
pub use timezone::normalize_time;
