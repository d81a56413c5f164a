//! Pipeline configuration
//!
//! Built once at process start and handed to the orchestrator. Sources, later
//! wins: defaults, TOML file, environment (after `.env` is loaded), CLI flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::router::RoutingPolicy;

/// Config file looked up in the working directory
const LOCAL_CONFIG_FILE: &str = "pinquery.toml";

/// Directory name within the platform config dir
const CONFIG_SUBDIR: &str = "pinquery";

const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_MODEL: &str = "gpt-4.1-mini";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskConfig {
    #[serde(default)]
    pub routing: RoutingPolicy,

    /// Surface which tier answered in `meta`
    #[serde(default)]
    pub show_method: bool,

    /// Surface elapsed time in `meta`
    #[serde(default)]
    pub show_timing: bool,

    /// Show raw tier errors instead of friendly categories
    #[serde(default)]
    pub debug_errors: bool,

    /// Forwarded to the reasoning engine as-is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,

    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,

    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    #[serde(default, skip_serializing)]
    pub llm_api_key: Option<String>,

    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,

    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    #[serde(default = "default_max_context_games")]
    pub max_context_games: usize,

    #[serde(default = "default_sql_row_cap")]
    pub sql_row_cap: usize,
}

fn default_llm_base_url() -> String { DEFAULT_LLM_BASE_URL.to_string() }
fn default_llm_model() -> String { DEFAULT_LLM_MODEL.to_string() }
fn default_llm_timeout_secs() -> u64 { 45 }
fn default_query_timeout_secs() -> u64 { 10 }
fn default_max_context_games() -> usize { 60 }
fn default_sql_row_cap() -> usize { 200 }

impl Default for AskConfig {
    fn default() -> Self {
        Self {
            routing: RoutingPolicy::default(),
            show_method: false,
            show_timing: false,
            debug_errors: false,
            reasoning_effort: None,
            llm_base_url: default_llm_base_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            llm_timeout_secs: default_llm_timeout_secs(),
            query_timeout_secs: default_query_timeout_secs(),
            database_path: None,
            max_context_games: default_max_context_games(),
            sql_row_cap: default_sql_row_cap(),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl AskConfig {
    /// Parse a TOML document. Unknown keys are ignored.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid pinquery config")
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`)
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PINQUERY_ROUTING") {
            match v.parse::<RoutingPolicy>() {
                Ok(policy) => self.routing = policy,
                Err(e) => tracing::warn!("Ignoring PINQUERY_ROUTING: {}", e),
            }
        }
        if let Some(v) = lookup("PINQUERY_SHOW_METHOD") {
            self.show_method = parse_flag(&v);
        }
        if let Some(v) = lookup("PINQUERY_SHOW_TIMING") {
            self.show_timing = parse_flag(&v);
        }
        if let Some(v) = lookup("PINQUERY_DEBUG_ERRORS") {
            self.debug_errors = parse_flag(&v);
        }
        if let Some(v) = lookup("PINQUERY_REASONING_EFFORT") {
            self.reasoning_effort = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Some(v) = lookup("PINQUERY_LLM_BASE_URL") {
            self.llm_base_url = v;
        }
        if let Some(v) = lookup("PINQUERY_LLM_MODEL") {
            self.llm_model = v;
        }
        if let Some(v) = lookup("PINQUERY_LLM_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.llm_api_key = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Some(v) = lookup("PINQUERY_LLM_TIMEOUT_SECS") {
            match v.trim().parse() {
                Ok(secs) => self.llm_timeout_secs = secs,
                Err(_) => tracing::warn!("Ignoring PINQUERY_LLM_TIMEOUT_SECS={}", v),
            }
        }
        if let Some(v) = lookup("PINQUERY_DB") {
            self.database_path = Some(PathBuf::from(v));
        }
    }

    /// Fatal configuration problems: every routing policy starts with an online tier
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.database_path.is_none() {
            return Err(PipelineError::Configuration(
                "no database path configured (PINQUERY_DB)".to_string(),
            ));
        }
        if self.llm_api_key.is_none() {
            return Err(PipelineError::Configuration(
                "no reasoning engine credentials configured (PINQUERY_LLM_API_KEY)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default config file location: `./pinquery.toml`, else `<config_dir>/pinquery/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    let local = std::env::current_dir()
        .map(|p| p.join(LOCAL_CONFIG_FILE))
        .unwrap_or_else(|_| PathBuf::from(LOCAL_CONFIG_FILE));
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|d| d.join(CONFIG_SUBDIR).join("config.toml"))
        .filter(|p| p.exists())
}

/// Load the configuration from an explicit file (must exist) or the default
/// location (optional), then apply the process environment.
pub fn load_config(path: Option<&Path>) -> Result<AskConfig> {
    let file = match path {
        Some(p) => Some(p.to_path_buf()),
        None => default_config_path(),
    };

    let mut config = match file {
        Some(ref p) => {
            let content = fs::read_to_string(p)
                .with_context(|| format!("Failed to read config file {}", p.display()))?;
            tracing::debug!("Loaded config from {}", p.display());
            AskConfig::from_toml_str(&content)?
        }
        None => AskConfig::default(),
    };

    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = AskConfig::default();
        assert_eq!(config.routing, RoutingPolicy::Mix);
        assert_eq!(config.llm_timeout_secs, 45);
        assert_eq!(config.max_context_games, 60);
        assert_eq!(config.sql_row_cap, 200);
        assert!(!config.show_method);
    }

    #[test]
    fn test_config_from_toml_partial() {
        let config = AskConfig::from_toml_str(
            r#"
            routing = "context"
            show_timing = true
            reasoning_effort = "low"
            "#,
        )
        .unwrap();
        assert_eq!(config.routing, RoutingPolicy::Context);
        assert!(config.show_timing);
        assert_eq!(config.reasoning_effort.as_deref(), Some("low"));
        assert_eq!(config.llm_model, DEFAULT_LLM_MODEL);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = AskConfig::from_toml_str("routing = \"sql\"").unwrap();
        let env: HashMap<&str, &str> = [
            ("PINQUERY_ROUTING", "mix"),
            ("PINQUERY_SHOW_METHOD", "yes"),
            ("OPENAI_API_KEY", "sk-test"),
            ("PINQUERY_DB", "/tmp/bowling.db"),
            ("PINQUERY_LLM_TIMEOUT_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.routing, RoutingPolicy::Mix);
        assert!(config.show_method);
        assert_eq!(config.llm_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/bowling.db")));
        assert_eq!(config.llm_timeout_secs, 45);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_missing_credentials() {
        let config = AskConfig {
            database_path: Some(PathBuf::from("bowling.db")),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Configuration(_))));

        let missing_db = AskConfig {
            llm_api_key: Some("k".into()),
            ..Default::default()
        };
        assert!(matches!(missing_db.validate(), Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "routing = \"context\"\nmax_context_games = 12").unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.max_context_games, 12);
    }

    #[test]
    fn test_load_config_missing_explicit_file_fails() {
        assert!(load_config(Some(Path::new("/nonexistent/pinquery.toml"))).is_err());
    }
}
