//! SQLite data store
//!
//! Implements the data-access collaborator (games, sessions, sandboxed
//! read-only queries) and the answer log on one SQLite database.
//!
//! Read-only queries run behind a `WITH` prelude that shadows every table with
//! a CTE limited to the caller's rows, on a connection switched to
//! `query_only`. Schema-qualified names are refused so the prelude cannot be
//! bypassed.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use serde_json::{Map, Number, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::types::{Frame, Game, Session, Shot};

/// One result row, column name to value
pub type Row = Map<String, Value>;

/// Rows read past this are dropped even if the statement has no LIMIT
const HARD_ROW_CAP: usize = 1000;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    name TEXT,
    description TEXT,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS games (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    name TEXT,
    player_name TEXT NOT NULL DEFAULT '',
    total_score INTEGER,
    played_at TEXT,
    session_id TEXT REFERENCES sessions(id) ON DELETE SET NULL,
    status TEXT NOT NULL DEFAULT 'complete'
);
CREATE TABLE IF NOT EXISTS frames (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id TEXT NOT NULL REFERENCES games(id) ON DELETE CASCADE,
    frame_number INTEGER NOT NULL CHECK (frame_number BETWEEN 1 AND 10),
    UNIQUE (game_id, frame_number)
);
CREATE TABLE IF NOT EXISTS shots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    frame_id INTEGER NOT NULL REFERENCES frames(id) ON DELETE CASCADE,
    shot_number INTEGER NOT NULL CHECK (shot_number BETWEEN 1 AND 3),
    pins INTEGER CHECK (pins BETWEEN 0 AND 10),
    UNIQUE (frame_id, shot_number)
);
CREATE TABLE IF NOT EXISTS chat_answers (
    normalized_question TEXT PRIMARY KEY,
    last_answer TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_games_user ON games(user_id);
CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
";

/// Shadows each table with the caller's rows. Frame flags are derived from shots.
const SCOPE_PRELUDE: &str = "WITH
sessions AS (SELECT * FROM main.sessions WHERE user_id = ?1),
games AS (SELECT * FROM main.games WHERE user_id = ?1),
frames AS (
    SELECT f.id, f.game_id, f.frame_number,
           CASE WHEN s1.pins = 10 THEN 1 ELSE 0 END AS is_strike,
           CASE WHEN COALESCE(s1.pins, 0) < 10 AND s1.pins + s2.pins = 10 THEN 1 ELSE 0 END AS is_spare
    FROM main.frames f
    JOIN main.games g ON g.id = f.game_id AND g.user_id = ?1
    LEFT JOIN main.shots s1 ON s1.frame_id = f.id AND s1.shot_number = 1
    LEFT JOIN main.shots s2 ON s2.frame_id = f.id AND s2.shot_number = 2
),
shots AS (
    SELECT s.* FROM main.shots s
    JOIN main.frames f ON f.id = s.frame_id
    JOIN main.games g ON g.id = f.game_id AND g.user_id = ?1
)
";

/// Text the store refuses to run regardless of what the tier validator decided
const FORBIDDEN_FRAGMENTS: &[&str] = &["sqlite_", "pragma", "attach", "detach", ";", "--", "/*"];

/// A `main` or `temp` schema qualifier, bare or quoted in any SQLite style,
/// with optional whitespace before the dot
static SCHEMA_QUALIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:["'`\[]\s*(?:main|temp|temporary)\s*["'`\]]|\b(?:main|temp|temporary)\b)\s*\."#)
        .expect("schema qualifier regex")
});

// ============================================================================
// Collaborator Traits
// ============================================================================

#[async_trait]
pub trait DataAccess: Send + Sync {
    /// All games of a user (or just `game_id`) with frames and shots
    async fn fetch_games(&self, user_id: &str, game_id: Option<&str>) -> Result<Vec<Game>>;

    async fn fetch_sessions(&self, user_id: &str) -> Result<Vec<Session>>;

    /// Run one read-only statement over the user's rows
    async fn run_readonly_query(&self, user_id: &str, sql: &str) -> Result<Vec<Row>>;
}

#[async_trait]
pub trait AnswerLog: Send + Sync {
    async fn upsert_answer(&self, normalized_question: &str, answer: &str) -> Result<()>;
}

// ============================================================================
// SQLite Store
// ============================================================================

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

fn to_rfc3339(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("Failed to open in-memory database")?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        conn.execute_batch(SCHEMA).context("Failed to create tables")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))?;
        f(&mut conn)
    }

    /// Run a blocking store operation off the async executor
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.with_conn(f))
            .await
            .context("Database task failed")?
    }

    pub fn insert_session(&self, session: &Session) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sessions (id, user_id, name, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session.id,
                    session.owner_id,
                    session.name,
                    session.description,
                    to_rfc3339(&session.created_at)
                ],
            )
            .context("Failed to store session")?;
            Ok(())
        })
    }

    /// Store a game with its frames and shots, replacing any previous copy
    pub fn insert_game(&self, game: &Game) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction().context("Failed to begin transaction")?;
            tx.execute("DELETE FROM games WHERE id = ?1", params![game.id])
                .context("Failed to replace game")?;
            tx.execute(
                "INSERT INTO games (id, user_id, name, player_name, total_score, played_at, session_id, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    game.id,
                    game.owner_id,
                    game.name,
                    game.player_name,
                    game.total_score,
                    game.played_at.as_ref().map(to_rfc3339),
                    game.session_id,
                    game.status
                ],
            )
            .context("Failed to store game")?;

            for frame in &game.frames {
                tx.execute(
                    "INSERT INTO frames (game_id, frame_number) VALUES (?1, ?2)",
                    params![game.id, frame.number],
                )
                .with_context(|| format!("Failed to store frame {}", frame.number))?;
                let frame_id = tx.last_insert_rowid();
                for shot in &frame.shots {
                    tx.execute(
                        "INSERT INTO shots (frame_id, shot_number, pins) VALUES (?1, ?2, ?3)",
                        params![frame_id, shot.number, shot.pins],
                    )
                    .context("Failed to store shot")?;
                }
            }

            tx.commit().context("Failed to commit game")?;
            Ok(())
        })
    }
}

fn load_games(conn: &Connection, user_id: &str, game_id: Option<&str>) -> Result<Vec<Game>> {
    let mut stmt = conn
        .prepare(
            "SELECT g.id, g.user_id, g.name, g.player_name, g.total_score, g.played_at, g.session_id, g.status,
                    f.frame_number, s.shot_number, s.pins
             FROM games g
             LEFT JOIN frames f ON f.game_id = g.id
             LEFT JOIN shots s ON s.frame_id = f.id
             WHERE g.user_id = ?1 AND (?2 IS NULL OR g.id = ?2)
             ORDER BY g.id, f.frame_number, s.shot_number",
        )
        .context("Failed to prepare game query")?;

    let mut rows = stmt
        .query(params![user_id, game_id])
        .context("Failed to query games")?;

    let mut games: Vec<Game> = Vec::new();
    while let Some(row) = rows.next().context("Failed to read game row")? {
        let id: String = row.get(0)?;
        if games.last().map_or(true, |g| g.id != id) {
            let played_at: Option<String> = row.get(5)?;
            games.push(Game {
                id,
                owner_id: row.get(1)?,
                name: row.get(2)?,
                player_name: row.get(3)?,
                total_score: row.get(4)?,
                played_at: played_at.as_deref().and_then(parse_timestamp),
                session_id: row.get(6)?,
                status: row.get(7)?,
                frames: Vec::new(),
            });
        }
        let Some(game) = games.last_mut() else {
            continue;
        };

        let Some(frame_number) = row.get::<_, Option<u8>>(8)? else {
            continue;
        };
        if game.frames.last().map_or(true, |f| f.number != frame_number) {
            game.frames.push(Frame {
                number: frame_number,
                shots: Vec::new(),
            });
        }
        if let (Some(frame), Some(shot_number)) = (game.frames.last_mut(), row.get::<_, Option<u8>>(9)?) {
            frame.shots.push(Shot {
                number: shot_number,
                pins: row.get(10)?,
            });
        }
    }

    Ok(games)
}

fn load_sessions(conn: &Connection, user_id: &str) -> Result<Vec<Session>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, user_id, name, description, created_at FROM sessions
             WHERE user_id = ?1 ORDER BY created_at, id",
        )
        .context("Failed to prepare session query")?;

    let mut rows = stmt
        .query(params![user_id])
        .context("Failed to query sessions")?;

    let mut sessions = Vec::new();
    while let Some(row) = rows.next().context("Failed to read session row")? {
        let id: String = row.get(0)?;
        let created_at: String = row.get(4)?;
        let created_at = parse_timestamp(&created_at)
            .ok_or_else(|| anyhow!("Session {} has an invalid created_at '{}'", id, created_at))?;
        sessions.push(Session {
            id,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            created_at,
        });
    }

    Ok(sessions)
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<{} bytes>", b.len())),
    }
}

/// Refuse statements that could step outside the user-scoped prelude
pub fn check_scoped_sql(sql: &str) -> Result<()> {
    let lower = sql.trim().trim_end_matches(';').to_lowercase();
    for fragment in FORBIDDEN_FRAGMENTS {
        if lower.contains(fragment) {
            return Err(anyhow!("Statement references '{}', which is not allowed", fragment));
        }
    }
    if let Some(m) = SCHEMA_QUALIFIER.find(&lower) {
        return Err(anyhow!("Schema qualifier '{}' is not allowed", m.as_str()));
    }
    Ok(())
}

fn run_scoped(conn: &Connection, user_id: &str, sql: &str) -> Result<Vec<Row>> {
    check_scoped_sql(sql)?;
    let statement = format!("{}{}", SCOPE_PRELUDE, sql.trim().trim_end_matches(';'));

    conn.execute_batch("PRAGMA query_only = ON;")
        .context("Failed to enter read-only mode")?;
    let result = (|| -> Result<Vec<Row>> {
        let mut stmt = conn.prepare(&statement).context("Invalid query")?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query(params![user_id]).context("Query failed")?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().context("Query failed")? {
            if out.len() >= HARD_ROW_CAP {
                break;
            }
            let mut map = Map::new();
            for (i, name) in columns.iter().enumerate() {
                map.insert(name.clone(), json_value(row.get_ref(i)?));
            }
            out.push(map);
        }
        Ok(out)
    })();
    conn.execute_batch("PRAGMA query_only = OFF;")
        .context("Failed to leave read-only mode")?;

    result
}

#[async_trait]
impl DataAccess for SqliteStore {
    async fn fetch_games(&self, user_id: &str, game_id: Option<&str>) -> Result<Vec<Game>> {
        let user_id = user_id.to_string();
        let game_id = game_id.map(str::to_string);
        self.blocking(move |conn| load_games(conn, &user_id, game_id.as_deref()))
            .await
    }

    async fn fetch_sessions(&self, user_id: &str) -> Result<Vec<Session>> {
        let user_id = user_id.to_string();
        self.blocking(move |conn| load_sessions(conn, &user_id)).await
    }

    async fn run_readonly_query(&self, user_id: &str, sql: &str) -> Result<Vec<Row>> {
        let user_id = user_id.to_string();
        let sql = sql.to_string();
        self.blocking(move |conn| run_scoped(conn, &user_id, &sql)).await
    }
}

#[async_trait]
impl AnswerLog for SqliteStore {
    async fn upsert_answer(&self, normalized_question: &str, answer: &str) -> Result<()> {
        let question = normalized_question.to_string();
        let answer = answer.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO chat_answers (normalized_question, last_answer, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(normalized_question) DO UPDATE SET
                     last_answer = excluded.last_answer,
                     updated_at = excluded.updated_at",
                params![question, answer, to_rfc3339(&Utc::now())],
            )
            .context("Failed to log answer")?;
            Ok(())
        })
        .await
    }
}
