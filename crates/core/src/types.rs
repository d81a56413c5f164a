//! Domain models for the question pipeline
//!
//! This module contains the core types used throughout the pipeline, including:
//! - Stored entities (games, sessions, frames, shots)
//! - Extracted question filters and the resolved Selection
//! - Request and response shapes at the boundary
//! - Date helpers shared by extraction and time normalization

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Stored Entities
// ============================================================================

/// A single delivery. `pins` is `None` when the scoreboard reader could not tell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    pub number: u8,
    pub pins: Option<u8>,
}

/// One of the ten frames of a game. Strike and spare are derived from the shots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub number: u8,
    #[serde(default)]
    pub shots: Vec<Shot>,
}

impl Frame {
    pub fn new(number: u8, pins: &[Option<u8>]) -> Self {
        Self {
            number,
            shots: pins
                .iter()
                .enumerate()
                .map(|(i, p)| Shot {
                    number: i as u8 + 1,
                    pins: *p,
                })
                .collect(),
        }
    }

    /// Pins knocked down on the given shot (1-based)
    pub fn pins_on(&self, shot: u8) -> Option<u8> {
        self.shots
            .iter()
            .find(|s| s.number == shot)
            .and_then(|s| s.pins)
    }

    pub fn is_strike(&self) -> bool {
        self.pins_on(1) == Some(10)
    }

    pub fn is_spare(&self) -> bool {
        if self.is_strike() {
            return false;
        }
        match (self.pins_on(1), self.pins_on(2)) {
            (Some(a), Some(b)) => u16::from(a) + u16::from(b) == 10,
            _ => false,
        }
    }

    /// Sum of the known pin counts, `None` when no shot is known
    pub fn known_pins(&self) -> Option<u32> {
        let known: Vec<u32> = self
            .shots
            .iter()
            .filter_map(|s| s.pins.map(u32::from))
            .collect();
        if known.is_empty() {
            None
        } else {
            Some(known.iter().sum())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub player_name: String,
    pub total_score: Option<i32>,
    pub played_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub frames: Vec<Frame>,
}

fn default_status() -> String {
    "complete".to_string()
}

impl Game {
    pub fn frame(&self, number: u8) -> Option<&Frame> {
        self.frames.iter().find(|f| f.number == number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Question Filters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockDirection {
    Before,
    After,
}

impl ClockDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClockDirection::Before => "before",
            ClockDirection::After => "after",
        }
    }

    /// Whether a minute-of-day falls on the selected side of the bound
    pub fn admits(&self, minute: u16, bound: u16) -> bool {
        match self {
            ClockDirection::Before => minute < bound,
            ClockDirection::After => minute >= bound,
        }
    }
}

/// A local before/after bound as written in the question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockBound {
    pub direction: ClockDirection,
    /// Local minute of day, 0..=1439
    pub minute: u16,
}

/// A before/after bound moved to UTC. `offset_minutes` is kept so the bound
/// can be compared against a game's local minute of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtcClock {
    pub direction: ClockDirection,
    pub minute: u16,
    pub offset_minutes: i32,
}

impl UtcClock {
    /// The bound expressed back in the client's local minute of day
    pub fn local_minute(&self) -> u16 {
        let local = i64::from(self.minute) - i64::from(self.offset_minutes);
        local.rem_euclid(i64::from(MINUTES_PER_DAY)) as u16
    }
}

/// Half-open UTC interval: `start` inclusive, `end` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtcWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl UtcWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// Date and time-of-day constraints.
///
/// The extractor fills the local fields (`date`, `date_end`, `clock`); the time
/// normalizer fills `window` and `utc_clock` once an offset is known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_end: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock: Option<ClockBound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<UtcWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_clock: Option<UtcClock>,
}

impl TimeFilter {
    pub fn is_active(&self) -> bool {
        self.date.is_some() || self.clock.is_some() || self.window.is_some() || self.utc_clock.is_some()
    }

    pub fn is_normalized(&self) -> bool {
        self.window.is_some() || self.utc_clock.is_some()
    }
}

/// Everything the extractor found in the question text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionFilters {
    pub game_numbers: Vec<u32>,
    pub session_numbers: Vec<u32>,
    pub session_names: Vec<String>,
    pub sessionless: bool,
    pub frames: Vec<u8>,
    pub time: TimeFilter,
}

// ============================================================================
// Selection
// ============================================================================

/// Which numbering a game-number filter refers to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameNumberScope {
    #[default]
    Global,
    Session,
}

/// Session constraint. `ids` and `sessionless` are alternatives (a game passes if
/// it matches either); an empty scope matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionScope {
    pub ids: Vec<String>,
    pub sessionless: bool,
}

/// The request-scoped, resolved filter state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub game_numbers: Vec<u32>,
    pub game_number_scope: GameNumberScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions: Option<SessionScope>,
    pub frames: Vec<u8>,
    pub time: TimeFilter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone_offset_minutes: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
}

impl Selection {
    pub fn has_filters(&self) -> bool {
        !self.game_numbers.is_empty()
            || self.sessions.is_some()
            || !self.frames.is_empty()
            || self.time.is_active()
            || self.game_id.is_some()
    }

    /// Short human summary, used in logs and prompts
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(ref id) = self.game_id {
            parts.push(format!("game id {}", id));
        }
        if !self.game_numbers.is_empty() {
            parts.push(format!("games {}", join_numbers(&self.game_numbers)));
        }
        if let Some(ref scope) = self.sessions {
            if !scope.ids.is_empty() {
                parts.push(format!("{} session(s)", scope.ids.len()));
            }
            if scope.sessionless {
                parts.push("sessionless games".to_string());
            }
        }
        if !self.frames.is_empty() {
            let frames: Vec<u32> = self.frames.iter().map(|f| u32::from(*f)).collect();
            parts.push(format!("frames {}", join_numbers(&frames)));
        }
        if let Some(date) = self.time.date {
            match self.time.date_end {
                Some(end) => parts.push(format!("{} to {}", format_date(date), format_date(end))),
                None => parts.push(format_date(date)),
            }
        }
        if let Some(clock) = self.time.clock {
            parts.push(format!("{} {}", clock.direction.as_str(), format_minute(clock.minute)));
        }
        if parts.is_empty() {
            "all games".to_string()
        } else {
            parts.join(", ")
        }
    }
}

// ============================================================================
// Request / Response
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub timezone_offset_minutes: Option<i32>,
    #[serde(default)]
    pub game_id: Option<String>,
}

/// Boundary response. The two shapes are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AskResponse {
    #[serde(rename_all = "camelCase")]
    Answered {
        answer: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        meta: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Degraded {
        online_error: String,
        offline_answer: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        offline_meta: Option<String>,
        offline_note: String,
    },
}

impl AskResponse {
    /// The answer text, whichever shape carries it
    pub fn text(&self) -> &str {
        match self {
            AskResponse::Answered { answer, .. } => answer,
            AskResponse::Degraded { offline_answer, .. } => offline_answer,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, AskResponse::Degraded { .. })
    }
}

// ============================================================================
// Date Helpers
// ============================================================================

pub const MINUTES_PER_DAY: i32 = 1440;

/// Format a NaiveDate as YYYY-MM-DD
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Format a minute of day as HH:MM
pub fn format_minute(minute: u16) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

/// The client's local calendar date at `now`, given an offset that converts
/// local time to UTC (`utc = local + offset`)
pub fn local_today(now: DateTime<Utc>, offset_minutes: Option<i32>) -> NaiveDate {
    let offset = offset_minutes.unwrap_or(0);
    (now - Duration::minutes(i64::from(offset))).date_naive()
}

fn join_numbers(numbers: &[u32]) -> String {
    numbers
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_frame_strike_and_spare() {
        let strike = Frame::new(1, &[Some(10)]);
        assert!(strike.is_strike());
        assert!(!strike.is_spare());

        let spare = Frame::new(2, &[Some(7), Some(3)]);
        assert!(!spare.is_strike());
        assert!(spare.is_spare());

        let open = Frame::new(3, &[Some(7), Some(2)]);
        assert!(!open.is_strike());
        assert!(!open.is_spare());
        assert_eq!(open.known_pins(), Some(9));
    }

    #[test]
    fn test_frame_unknown_pins() {
        let unknown = Frame::new(4, &[None, Some(3)]);
        assert!(!unknown.is_spare());
        assert_eq!(unknown.known_pins(), Some(3));

        let blank = Frame::new(5, &[None, None]);
        assert_eq!(blank.known_pins(), None);
    }

    #[test]
    fn test_tenth_frame_strike_is_not_spare() {
        let tenth = Frame::new(10, &[Some(10), Some(5), Some(5)]);
        assert!(tenth.is_strike());
        assert!(!tenth.is_spare());
        assert_eq!(tenth.known_pins(), Some(20));
    }

    #[test]
    fn test_clock_direction_admits() {
        assert!(ClockDirection::Before.admits(1139, 1140));
        assert!(!ClockDirection::Before.admits(1140, 1140));
        assert!(ClockDirection::After.admits(1140, 1140));
        assert!(!ClockDirection::After.admits(60, 1140));
    }

    #[test]
    fn test_utc_clock_local_minute() {
        let clock = UtcClock {
            direction: ClockDirection::After,
            minute: 240,
            offset_minutes: 300,
        };
        assert_eq!(clock.local_minute(), 1380);
    }

    #[test]
    fn test_local_today_crosses_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 2, 0, 0).unwrap();
        // UTC-5: 02:00 UTC is still the previous evening locally
        assert_eq!(local_today(now, Some(300)), NaiveDate::from_ymd_opt(2026, 3, 3).unwrap());
        assert_eq!(local_today(now, None), NaiveDate::from_ymd_opt(2026, 3, 4).unwrap());
    }

    #[test]
    fn test_selection_describe() {
        let selection = Selection {
            game_numbers: vec![1, 2, 3],
            frames: vec![9],
            ..Default::default()
        };
        assert_eq!(selection.describe(), "games 1, 2, 3, frames 9");
        assert_eq!(Selection::default().describe(), "all games");
        assert!(!Selection::default().has_filters());
    }

    #[test]
    fn test_response_shapes_serialize_camel_case() {
        let degraded = AskResponse::Degraded {
            online_error: "The assistant is busy right now.".to_string(),
            offline_answer: "You have bowled **3** games.".to_string(),
            offline_meta: None,
            offline_note: "Approximate answer.".to_string(),
        };
        let json = serde_json::to_value(&degraded).unwrap();
        assert!(json.get("onlineError").is_some());
        assert!(json.get("offlineAnswer").is_some());
        assert!(json.get("offlineMeta").is_none());

        let answered = AskResponse::Answered {
            answer: "Done.".to_string(),
            meta: Some("sql".to_string()),
        };
        let json = serde_json::to_value(&answered).unwrap();
        assert_eq!(json["answer"], "Done.");
        assert_eq!(json["meta"], "sql");
    }

    #[test]
    fn test_request_roundtrip_json() {
        let request: AskRequest = serde_json::from_str(
            r#"{"question":"average?","timezoneOffsetMinutes":300,"gameId":"g1"}"#,
        )
        .unwrap();
        assert_eq!(request.timezone_offset_minutes, Some(300));
        assert_eq!(request.game_id.as_deref(), Some("g1"));
    }
}
