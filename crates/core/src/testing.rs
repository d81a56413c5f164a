//! Test doubles for the engine, data-access and answer-log collaborators

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::EngineError;
use crate::llm::{LlmRequest, ReasoningEngine};
use crate::store::{AnswerLog, DataAccess, Row};
use crate::types::{Frame, Game, Session};

/// Replies with a fixed script, one entry per call
pub struct ScriptedEngine {
    replies: Mutex<VecDeque<Result<String, EngineError>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedEngine {
    pub fn new(replies: Vec<Result<String, EngineError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails with the same error
    pub fn failing(error: EngineError) -> Self {
        Self::new(vec![Err(error); 8])
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    async fn generate(&self, request: &LlmRequest) -> Result<String, EngineError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(EngineError::Malformed("script exhausted".to_string())))
    }
}

/// Never answers within any reasonable deadline
pub struct HangingEngine;

#[async_trait]
impl ReasoningEngine for HangingEngine {
    async fn generate(&self, _request: &LlmRequest) -> Result<String, EngineError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok("too late".to_string())
    }
}

#[derive(Default)]
pub struct MemoryData {
    pub games: Vec<Game>,
    pub sessions: Vec<Session>,
    pub rows: Vec<Row>,
    pub query_error: Option<String>,
    pub fetch_error: Option<String>,
    pub queries: Mutex<Vec<String>>,
}

impl MemoryData {
    pub fn with_games(games: Vec<Game>) -> Self {
        Self {
            games,
            ..Default::default()
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataAccess for MemoryData {
    async fn fetch_games(&self, user_id: &str, game_id: Option<&str>) -> Result<Vec<Game>> {
        if let Some(ref e) = self.fetch_error {
            return Err(anyhow!("{}", e));
        }
        Ok(self
            .games
            .iter()
            .filter(|g| g.owner_id == user_id)
            .filter(|g| game_id.map_or(true, |id| g.id == id))
            .cloned()
            .collect())
    }

    async fn fetch_sessions(&self, user_id: &str) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| s.owner_id == user_id)
            .cloned()
            .collect())
    }

    async fn run_readonly_query(&self, _user_id: &str, sql: &str) -> Result<Vec<Row>> {
        self.queries.lock().unwrap().push(sql.to_string());
        match self.query_error {
            Some(ref e) => Err(anyhow!("{}", e)),
            None => Ok(self.rows.clone()),
        }
    }
}

#[derive(Default)]
pub struct MemoryLog {
    pub fail: bool,
    pub entries: Mutex<Vec<(String, String)>>,
}

impl MemoryLog {
    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnswerLog for MemoryLog {
    async fn upsert_answer(&self, normalized_question: &str, answer: &str) -> Result<()> {
        if self.fail {
            return Err(anyhow!("answer log unavailable"));
        }
        self.entries
            .lock()
            .unwrap()
            .push((normalized_question.to_string(), answer.to_string()));
        Ok(())
    }
}

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
}

pub fn game(id: &str, score: Option<i32>, played_at: Option<DateTime<Utc>>) -> Game {
    Game {
        id: id.to_string(),
        owner_id: "u1".to_string(),
        name: None,
        player_name: "Sam".to_string(),
        total_score: score,
        played_at,
        session_id: None,
        status: "complete".to_string(),
        frames: (1..=10)
            .map(|n| match n % 3 {
                0 => Frame::new(n, &[Some(10)]),
                1 => Frame::new(n, &[Some(7), Some(3)]),
                _ => Frame::new(n, &[Some(8), Some(1)]),
            })
            .collect(),
    }
}

/// Three games scored 200, 180, 220 on consecutive evenings
pub fn three_games() -> Vec<Game> {
    vec![
        game("g1", Some(200), Some(at(1, 19))),
        game("g2", Some(180), Some(at(2, 19))),
        game("g3", Some(220), Some(at(3, 19))),
    ]
}
