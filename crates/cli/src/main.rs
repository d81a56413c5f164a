//! Bowling Question Pipeline CLI
//!
//! A thin wrapper around pinquery-core: answers a question as JSON, previews
//! question parsing, and loads or lists games in the local SQLite store.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use pinquery_core::{
    check_request, load_config, preview_filters, AskConfig, AskRequest, DataAccess, Game, LabelIndex,
    OpenAiEngine, Pipeline, PipelineError, RoutingPolicy, Session, SqliteStore,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "pinquery")]
#[command(about = "Ask questions about your bowling games")]
struct Args {
    /// Path to a TOML config file (default: ./pinquery.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the SQLite database (overrides PINQUERY_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer a question and print the response JSON
    Ask {
        question: String,

        /// Owner of the games to query
        #[arg(long)]
        user: String,

        /// Minutes to add to local time to reach UTC (e.g. 300 for UTC-5)
        #[arg(long = "tz-offset", allow_hyphen_values = true)]
        tz_offset: Option<i32>,

        /// Scope the question to a single game
        #[arg(long)]
        game: Option<String>,

        #[arg(long, value_enum)]
        routing: Option<RoutingArg>,
    },

    /// Print the filters parsed from a question (no data store needed)
    Selection {
        question: String,

        #[arg(long = "tz-offset", allow_hyphen_values = true)]
        tz_offset: Option<i32>,
    },

    /// Load sessions and games from a JSON file into the store
    Import { file: PathBuf },

    /// List a user's games with their labels
    Games {
        #[arg(long)]
        user: String,

        /// Print one game with frames and shots
        #[arg(long)]
        game: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoutingArg {
    Sql,
    Context,
    Mix,
    Auto,
}

impl From<RoutingArg> for RoutingPolicy {
    fn from(arg: RoutingArg) -> Self {
        match arg {
            RoutingArg::Sql => RoutingPolicy::Sql,
            RoutingArg::Context => RoutingPolicy::Context,
            RoutingArg::Mix => RoutingPolicy::Mix,
            RoutingArg::Auto => RoutingPolicy::Auto,
        }
    }
}

/// Import file layout
#[derive(Debug, Deserialize)]
struct ImportFile {
    #[serde(default)]
    sessions: Vec<Session>,
    #[serde(default)]
    games: Vec<Game>,
}

// ============================================================================
// Commands
// ============================================================================

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_store(config: &AskConfig) -> Result<SqliteStore> {
    let path = config
        .database_path
        .as_deref()
        .ok_or_else(|| anyhow!("No database configured (use --db or PINQUERY_DB)"))?;
    SqliteStore::open(path)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a boundary error as `{error, status}` and fail the process
fn report(e: &PipelineError) -> Result<ExitCode> {
    tracing::error!("{}", e);
    print_json(&serde_json::json!({ "error": e.to_string(), "status": e.status_code() }))?;
    Ok(ExitCode::FAILURE)
}

/// Input errors come before configuration errors
fn check_ask(config: &AskConfig, request: &AskRequest) -> Result<(), PipelineError> {
    check_request(request)?;
    config.validate()
}

fn open_ask_store(config: &AskConfig) -> Result<SqliteStore, PipelineError> {
    open_store(config).map_err(|e| PipelineError::DataAccess(format!("{:#}", e)))
}

async fn run_ask(config: AskConfig, user: &str, request: AskRequest) -> Result<ExitCode> {
    if let Err(e) = check_ask(&config, &request) {
        return report(&e);
    }

    let store = match open_ask_store(&config) {
        Ok(store) => Arc::new(store),
        Err(e) => return report(&e),
    };
    let engine = match OpenAiEngine::from_config(&config) {
        Ok(engine) => Arc::new(engine),
        Err(e) => return report(&e),
    };
    let pipeline = Pipeline::new(config, engine, store.clone(), store);

    match pipeline.ask(user, &request).await {
        Ok(response) => {
            print_json(&response)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => report(&e),
    }
}

fn run_import(config: &AskConfig, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let import: ImportFile = serde_json::from_str(&content)
        .with_context(|| format!("Invalid import file {}", file.display()))?;

    let store = open_store(config)?;
    for session in &import.sessions {
        store.insert_session(session)?;
    }
    for game in &import.games {
        store.insert_game(game)?;
    }
    tracing::info!(
        "Imported {} session(s) and {} game(s)",
        import.sessions.len(),
        import.games.len()
    );
    Ok(())
}

async fn run_games(config: &AskConfig, user: &str, game: Option<&str>) -> Result<()> {
    let store = open_store(config)?;
    match game {
        Some(id) => {
            let games = store.fetch_games(user, Some(id)).await?;
            let game = games
                .first()
                .ok_or_else(|| anyhow!("No game '{}' for user '{}'", id, user))?;
            print_json(game)
        }
        None => {
            let games = store.fetch_games(user, None).await?;
            let sessions = store.fetch_sessions(user).await?;
            print_json(&LabelIndex::build(&games, &sessions))
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = load_config(args.config.as_deref())?;
    if let Some(db) = args.db {
        config.database_path = Some(db);
    }

    match args.command {
        Command::Ask {
            question,
            user,
            tz_offset,
            game,
            routing,
        } => {
            if let Some(routing) = routing {
                config.routing = routing.into();
            }
            let request = AskRequest {
                question,
                timezone_offset_minutes: tz_offset,
                game_id: game,
            };
            run_ask(config, &user, request).await
        }
        Command::Selection { question, tz_offset } => {
            match preview_filters(&question, tz_offset, chrono::Utc::now()) {
                Ok(filters) => {
                    print_json(&filters)?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => report(&e),
            }
        }
        Command::Import { file } => {
            run_import(&config, &file)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Games { user, game } => {
            run_games(&config, &user, game.as_deref()).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
