//! Generated-query answering
//!
//! Asks the reasoning engine for one SELECT statement, checks it against a
//! keyword/shape allow-deny list, runs it through the sandboxed data-access
//! collaborator, labels the rows and asks the engine to phrase the answer.
//!
//! The check is not a SQL parser. Word-boundary matching can reject harmless
//! text inside string literals and can miss tricks a parser would catch; the
//! store's read-only, user-scoped execution is what actually keeps data safe.

use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::TierError;
use crate::llm::{generate_within, parse_json_from_text, LlmRequest, ReasoningEngine};
use crate::pipeline::TierInput;
use crate::scope::LabelIndex;
use crate::store::{check_scoped_sql, DataAccess, Row};
use crate::types::{format_date, format_minute, ClockDirection, Selection};

/// Returned in `sql` when a question needs judgement rather than a query
pub const DEFER_SENTINEL: &str = "DEFER_TO_CONTEXT";

const SCHEMA_DESCRIPTION: &str = "Tables (SQLite, only the current user's rows are visible):
- sessions(id TEXT, user_id TEXT, name TEXT NULL, description TEXT NULL, created_at TEXT UTC RFC3339)
- games(id TEXT, user_id TEXT, name TEXT NULL, player_name TEXT, total_score INTEGER NULL, played_at TEXT UTC RFC3339 NULL, session_id TEXT NULL REFERENCES sessions(id), status TEXT)
- frames(id INTEGER, game_id TEXT REFERENCES games(id), frame_number INTEGER 1-10, is_strike INTEGER 0/1, is_spare INTEGER 0/1)
- shots(id INTEGER, frame_id INTEGER REFERENCES frames(id), shot_number INTEGER 1-3, pins INTEGER 0-10 NULL)";

const QUERY_INSTRUCTIONS: &str = r#"You translate questions about a bowler's own games into exactly one SQLite SELECT statement.
Output ONLY a single JSON object. No markdown.

Schema:
{"sql": string, "explanation": string}

Rules:
- One read-only SELECT statement, no semicolons, no comments
- Never write, create or change anything
- Use only the tables and columns listed
- Timestamps are UTC text; use the UTC bounds and local time-of-day expressions given, never raw local times
- Game labels come from the label index, never renumber games yourself
- Select games.id, games.played_at and games.total_score when returning per-game rows so rows can be labeled
- If the question asks for advice, coaching or an opinion rather than numbers, set "sql" to "DEFER_TO_CONTEXT"
"#;

const ANSWER_INSTRUCTIONS: &str = "You answer a bowler's question from the result rows of a query over their own games. \
Be brief and specific. Refer to games by their game_label when present. \
Do not mention SQL, queries, rows or columns. If a value is missing, say it was not recorded.";

static DENIED_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(insert|update|delete|drop|alter|create|grant|revoke|truncate|call|execute|set|vacuum|analyze|refresh|copy)\b",
    )
    .expect("denied keyword regex")
});

static LIMIT_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\blimit\s+\d+").expect("limit regex"));

#[derive(Debug, Deserialize)]
struct GeneratedQuery {
    sql: String,
    #[serde(default)]
    explanation: Option<String>,
}

// ============================================================================
// Validation
// ============================================================================

/// Accept one SELECT statement and return it with a row cap applied
pub fn validate_sql(sql: &str, row_cap: usize) -> Result<String, TierError> {
    let statement = sql.trim().trim_end_matches(';').trim();
    let lower = statement.to_lowercase();

    let starts_with_select = lower.starts_with("select")
        && lower[6..]
            .chars()
            .next()
            .map_or(false, |c| !c.is_alphanumeric() && c != '_');
    if !starts_with_select {
        return Err(TierError::Rejected("query must start with SELECT".to_string()));
    }

    if statement.contains(';') {
        return Err(TierError::Rejected("only one statement is allowed".to_string()));
    }

    if let Some(m) = DENIED_KEYWORDS.find(statement) {
        return Err(TierError::Rejected(format!(
            "keyword '{}' is not allowed",
            m.as_str().to_lowercase()
        )));
    }

    check_scoped_sql(statement).map_err(|e| TierError::Rejected(e.to_string()))?;

    if LIMIT_CLAUSE.is_match(statement) {
        Ok(statement.to_string())
    } else {
        Ok(format!("{} LIMIT {}", statement, row_cap))
    }
}

// ============================================================================
// Row Labeling
// ============================================================================

fn parse_row_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn row_game_id<'a>(row: &'a Row, index: &LabelIndex) -> Option<&'a str> {
    ["game_id", "id"]
        .iter()
        .filter_map(|key| row.get(*key).and_then(Value::as_str))
        .find(|id| index.game(id).is_some())
}

/// Label of the game a row describes: by id, else by timestamp, using the score to break ties
fn label_for_row(row: &Row, index: &LabelIndex) -> Option<String> {
    if let Some(id) = row_game_id(row, index) {
        return Some(index.label_for(id));
    }

    let played_at = row
        .get("played_at")
        .and_then(parse_row_timestamp)?;
    let candidates: Vec<_> = index
        .games
        .iter()
        .filter(|g| g.played_at == Some(played_at))
        .collect();

    match candidates.as_slice() {
        [only] => Some(only.label.clone()),
        [] => None,
        _ => {
            let score = row.get("total_score").and_then(Value::as_i64)?;
            let by_score: Vec<_> = candidates
                .iter()
                .filter(|g| g.total_score.map(i64::from) == Some(score))
                .collect();
            match by_score.as_slice() {
                [only] => Some(only.label.clone()),
                _ => None,
            }
        }
    }
}

/// Add a `game_label` column to every row that can be matched to a game
pub fn annotate_rows(rows: Vec<Row>, index: &LabelIndex) -> Vec<Row> {
    rows.into_iter()
        .map(|mut row| {
            if let Some(label) = label_for_row(&row, index) {
                row.insert("game_label".to_string(), Value::String(label));
            }
            row
        })
        .collect()
}

// ============================================================================
// Prompts
// ============================================================================

/// A played_at's minute of day in the client's local time, as SQLite
fn local_minute_expr(offset_minutes: i32) -> String {
    format!(
        "(((CAST(strftime('%H', played_at) AS INTEGER) * 60 + CAST(strftime('%M', played_at) AS INTEGER) - ({})) % 1440 + 1440) % 1440)",
        offset_minutes
    )
}

/// Time-of-day condition on the local clock.
///
/// A local bound does not map to a single UTC time of day once the offset
/// wraps it past midnight, so the condition converts each game instead.
fn clock_hint(selection: &Selection) -> Option<String> {
    let (direction, local_minute, offset) = match (selection.time.utc_clock, selection.time.clock) {
        (Some(clock), _) => (clock.direction, clock.local_minute(), clock.offset_minutes),
        (None, Some(clock)) => (clock.direction, clock.minute, 0),
        (None, None) => return None,
    };
    let op = match direction {
        ClockDirection::Before => "<",
        ClockDirection::After => ">=",
    };
    Some(format!(
        "Time of day: {} {} local. Keep games where {} {} {}",
        direction.as_str(),
        format_minute(local_minute),
        local_minute_expr(offset),
        op,
        local_minute
    ))
}

pub fn build_query_prompt(input: &TierInput<'_>) -> String {
    let selection = &input.scope.selection;
    let mut hints = vec![format!("Filters found in the question: {}", selection.describe())];

    if let Some(window) = selection.time.window {
        hints.push(format!(
            "Time window: played_at >= '{}' AND played_at < '{}'",
            window.start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            window.end.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        ));
    } else if let Some(date) = selection.time.date {
        hints.push(format!("Local date mentioned: {}", format_date(date)));
    }
    if let Some(hint) = clock_hint(selection) {
        hints.push(hint);
    }
    if let Some(offset) = selection.timezone_offset_minutes {
        hints.push(format!("User timezone: UTC = local time + {} minutes", offset));
    }
    if let Some(ref id) = selection.game_id {
        hints.push(format!("Only consider the game with id '{}'", id));
    } else if !input.scope.working_set.is_empty() && selection.has_filters() {
        let ids: Vec<&str> = input.scope.working_set.iter().map(|g| g.id.as_str()).collect();
        hints.push(format!("Games matching those filters: {}", ids.join(", ")));
    }

    let index = serde_json::to_string(&input.scope.index).unwrap_or_else(|_| "{}".to_string());

    format!(
        "{}\n\nLabel index (every game and session, in display order):\n{}\n\n{}\n\nQuestion: {}",
        SCHEMA_DESCRIPTION,
        index,
        hints.join("\n"),
        input.question
    )
}

fn build_answer_prompt(question: &str, query: &GeneratedQuery, sql: &str, rows: &[Row]) -> String {
    let rows_json = serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Question: {}\n\nQuery: {}\nPurpose: {}\n\nRows ({}):\n{}",
        question,
        sql,
        query.explanation.as_deref().unwrap_or("-"),
        rows.len(),
        rows_json
    )
}

// ============================================================================
// Tier
// ============================================================================

/// Run the generated-query tier once. Every failure is a recoverable `TierError`.
pub async fn answer(
    engine: &dyn ReasoningEngine,
    data: &dyn DataAccess,
    input: &TierInput<'_>,
) -> Result<String, TierError> {
    let config = input.config;

    let raw = generate_within(
        engine,
        &LlmRequest {
            input: build_query_prompt(input),
            instructions: Some(QUERY_INSTRUCTIONS.to_string()),
            json: true,
            reasoning_effort: config.reasoning_effort.clone(),
        },
        config.llm_timeout_secs,
    )
    .await?;

    let query: GeneratedQuery = parse_json_from_text(&raw)?;
    if query.sql.trim().eq_ignore_ascii_case(DEFER_SENTINEL) {
        tracing::debug!("Query generation deferred to context answering");
        return Err(TierError::Deferred);
    }

    let sql = validate_sql(&query.sql, config.sql_row_cap)?;
    tracing::debug!("Running generated query: {}", sql);

    let rows = tokio::time::timeout(
        std::time::Duration::from_secs(config.query_timeout_secs),
        data.run_readonly_query(input.user_id, &sql),
    )
    .await
    .map_err(|_| TierError::Timeout(config.query_timeout_secs))?
    .map_err(|e| TierError::Execution(format!("{:#}", e)))?;

    if rows.is_empty() {
        return Err(TierError::NoResults);
    }

    let rows = annotate_rows(rows, &input.scope.index);
    tracing::debug!("Generated query returned {} row(s)", rows.len());

    let text = generate_within(
        engine,
        &LlmRequest {
            input: build_answer_prompt(input.question, &query, &sql, &rows),
            instructions: Some(ANSWER_INSTRUCTIONS.to_string()),
            json: false,
            reasoning_effort: config.reasoning_effort.clone(),
        },
        config.llm_timeout_secs,
    )
    .await?;

    if text.trim().is_empty() {
        return Err(TierError::Generation(crate::error::EngineError::Malformed(
            "empty answer".to_string(),
        )));
    }
    Ok(text)
}
