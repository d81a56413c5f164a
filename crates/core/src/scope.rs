//! Scope Resolution
//!
//! Builds the stable label index ("Game 3", "Session 2") over the unfiltered
//! collection, resolves extracted filters into a Selection, and computes the
//! working set as the intersection of every active filter.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::timezone::{normalize_time, time_admits};
use crate::types::{Game, GameNumberScope, QuestionFilters, Selection, Session, SessionScope};

// ============================================================================
// Label Index
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionLabel {
    pub session_id: String,
    /// 1-based position among the owner's sessions by creation time
    pub number: u32,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameLabel {
    pub game_id: String,
    /// Position among all of the owner's games by play time
    pub global_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Position within its session by play time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_label: Option<String>,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub played_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_score: Option<i32>,
}

/// Display labels for every game and session, independent of any filter
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LabelIndex {
    pub sessions: Vec<SessionLabel>,
    pub games: Vec<GameLabel>,
}

/// Play order: ascending timestamp, untimed games last, ties broken by id
fn play_order(a: &Game, b: &Game) -> Ordering {
    match (a.played_at, b.played_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.id.cmp(&b.id))
}

/// "League Night" for a named session, "Session 3" otherwise
pub fn session_label(session: &Session, number: u32) -> String {
    match session.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("Session {}", number),
    }
}

impl LabelIndex {
    pub fn build(games: &[Game], sessions: &[Session]) -> Self {
        let mut ordered_sessions: Vec<&Session> = sessions.iter().collect();
        ordered_sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let session_labels: Vec<SessionLabel> = ordered_sessions
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let number = i as u32 + 1;
                SessionLabel {
                    session_id: s.id.clone(),
                    number,
                    label: session_label(s, number),
                    name: s.name.as_ref().map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
                }
            })
            .collect();

        let mut ordered_games: Vec<&Game> = games.iter().collect();
        ordered_games.sort_by(|a, b| play_order(a, b));

        let mut per_session: std::collections::HashMap<&str, u32> = std::collections::HashMap::new();
        let game_labels = ordered_games
            .iter()
            .enumerate()
            .map(|(i, g)| {
                let global_number = i as u32 + 1;
                let session = g
                    .session_id
                    .as_deref()
                    .and_then(|sid| session_labels.iter().find(|s| s.session_id == sid));

                let (session_number, session_label, label) = match session {
                    Some(s) => {
                        let n = per_session.entry(s.session_id.as_str()).or_insert(0);
                        *n += 1;
                        (Some(*n), Some(s.label.clone()), format!("{} Game {}", s.label, n))
                    }
                    None => (None, None, format!("Game {}", global_number)),
                };

                GameLabel {
                    game_id: g.id.clone(),
                    global_number,
                    session_id: g.session_id.clone(),
                    session_number,
                    session_label,
                    label,
                    played_at: g.played_at,
                    total_score: g.total_score,
                }
            })
            .collect();

        Self {
            sessions: session_labels,
            games: game_labels,
        }
    }

    pub fn game(&self, game_id: &str) -> Option<&GameLabel> {
        self.games.iter().find(|g| g.game_id == game_id)
    }

    pub fn session_by_number(&self, number: u32) -> Option<&SessionLabel> {
        self.sessions.iter().find(|s| s.number == number)
    }

    pub fn session_by_name(&self, name: &str) -> Option<&SessionLabel> {
        let needle = name.trim().to_lowercase();
        self.sessions
            .iter()
            .find(|s| s.name.as_deref().map(str::to_lowercase).as_deref() == Some(needle.as_str()))
    }

    /// Label of a game, falling back to its id for games outside the index
    pub fn label_for(&self, game_id: &str) -> String {
        self.game(game_id)
            .map(|g| g.label.clone())
            .unwrap_or_else(|| game_id.to_string())
    }
}

// ============================================================================
// Selection
// ============================================================================

/// Turn extracted filters into a Selection against this user's sessions.
///
/// `game_id` scopes everything to one game and drops session and game-number filters.
pub fn resolve_selection(
    filters: &QuestionFilters,
    index: &LabelIndex,
    offset_minutes: Option<i32>,
    game_id: Option<&str>,
) -> Selection {
    let time = normalize_time(&filters.time, offset_minutes);

    if let Some(id) = game_id {
        return Selection {
            frames: filters.frames.clone(),
            time,
            timezone_offset_minutes: offset_minutes,
            game_id: Some(id.to_string()),
            ..Default::default()
        };
    }

    let sessions = if filters.session_numbers.is_empty()
        && filters.session_names.is_empty()
        && !filters.sessionless
    {
        None
    } else {
        let mut ids: Vec<String> = Vec::new();
        let by_number = filters
            .session_numbers
            .iter()
            .filter_map(|n| index.session_by_number(*n));
        let by_name = filters
            .session_names
            .iter()
            .filter_map(|name| index.session_by_name(name));
        for session in by_number.chain(by_name) {
            if !ids.contains(&session.session_id) {
                ids.push(session.session_id.clone());
            }
        }
        Some(SessionScope {
            ids,
            sessionless: filters.sessionless,
        })
    };

    let game_number_scope = match sessions {
        Some(ref scope) if !scope.ids.is_empty() => GameNumberScope::Session,
        _ => GameNumberScope::Global,
    };

    Selection {
        game_numbers: filters.game_numbers.clone(),
        game_number_scope,
        sessions,
        frames: filters.frames.clone(),
        time,
        timezone_offset_minutes: offset_minutes,
        game_id: None,
    }
}

// ============================================================================
// Filter Predicates
// ============================================================================

fn admits_game_id(selection: &Selection, game: &Game) -> bool {
    selection.game_id.as_deref().map_or(true, |id| game.id == id)
}

fn admits_game_number(selection: &Selection, label: Option<&GameLabel>) -> bool {
    if selection.game_numbers.is_empty() {
        return true;
    }
    let Some(label) = label else {
        return false;
    };
    let number = match selection.game_number_scope {
        GameNumberScope::Global => Some(label.global_number),
        GameNumberScope::Session => label.session_number,
    };
    number.map_or(false, |n| selection.game_numbers.contains(&n))
}

fn admits_session(selection: &Selection, game: &Game) -> bool {
    let Some(ref scope) = selection.sessions else {
        return true;
    };
    match game.session_id {
        Some(ref sid) => scope.ids.contains(sid),
        None => scope.sessionless,
    }
}

fn admits_frames(selection: &Selection, game: &Game) -> bool {
    selection.frames.is_empty() || selection.frames.iter().any(|f| game.frame(*f).is_some())
}

/// Whether a game satisfies every active filter of the selection
pub fn admits(selection: &Selection, index: &LabelIndex, game: &Game) -> bool {
    admits_game_id(selection, game)
        && admits_game_number(selection, index.game(&game.id))
        && admits_session(selection, game)
        && admits_frames(selection, game)
        && time_admits(&selection.time, game.played_at)
}

/// The working set, in label order
pub fn working_set(games: &[Game], index: &LabelIndex, selection: &Selection) -> Vec<Game> {
    let mut selected: Vec<Game> = games
        .iter()
        .filter(|g| admits(selection, index, g))
        .cloned()
        .collect();
    selected.sort_by(play_order);
    selected
}

/// Everything downstream tiers need about the user's data for one request
#[derive(Debug, Clone)]
pub struct ResolvedScope {
    pub selection: Selection,
    pub index: LabelIndex,
    pub working_set: Vec<Game>,
    pub all_games: Vec<Game>,
}

pub fn resolve(
    games: Vec<Game>,
    sessions: &[Session],
    filters: &QuestionFilters,
    offset_minutes: Option<i32>,
    game_id: Option<&str>,
) -> ResolvedScope {
    let index = LabelIndex::build(&games, sessions);
    let selection = resolve_selection(filters, &index, offset_minutes, game_id);
    let working_set = working_set(&games, &index, &selection);
    ResolvedScope {
        selection,
        index,
        working_set,
        all_games: games,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClockBound, ClockDirection, Frame, TimeFilter};
    use chrono::TimeZone;

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, h, 0, 0).unwrap()
    }

    fn game(id: &str, session: Option<&str>, played_at: Option<DateTime<Utc>>, score: i32) -> Game {
        Game {
            id: id.to_string(),
            owner_id: "u1".to_string(),
            name: None,
            player_name: "Sam".to_string(),
            total_score: Some(score),
            played_at,
            session_id: session.map(str::to_string),
            status: "complete".to_string(),
            frames: (1..=10).map(|n| Frame::new(n, &[Some(7), Some(2)])).collect(),
        }
    }

    fn session(id: &str, name: Option<&str>, day: u32) -> Session {
        Session {
            id: id.to_string(),
            owner_id: "u1".to_string(),
            name: name.map(str::to_string),
            description: None,
            created_at: at(day, 8),
        }
    }

    fn fixture() -> (Vec<Game>, Vec<Session>) {
        let sessions = vec![
            session("s-b", Some("  League Night "), 2),
            session("s-a", None, 1),
        ];
        let mut short = game("g6", None, None, 150);
        short.frames.truncate(8);
        let games = vec![
            game("g3", Some("s-b"), Some(at(2, 21)), 210),
            game("g1", Some("s-a"), Some(at(1, 18)), 180),
            game("g2", Some("s-a"), Some(at(1, 20)), 200),
            game("g4", Some("s-b"), Some(at(2, 23)), 190),
            game("g5", None, Some(at(3, 17)), 220),
            short,
        ];
        (games, sessions)
    }

    fn ids(games: &[Game]) -> Vec<String> {
        games.iter().map(|g| g.id.clone()).collect()
    }

    #[test]
    fn test_session_labels_by_creation_order() {
        let (games, sessions) = fixture();
        let index = LabelIndex::build(&games, &sessions);
        assert_eq!(index.sessions[0].label, "Session 1");
        assert_eq!(index.sessions[1].label, "League Night");
        assert_eq!(index.session_by_name("league night").unwrap().session_id, "s-b");
    }

    #[test]
    fn test_game_labels_within_session_and_global() {
        let (games, sessions) = fixture();
        let index = LabelIndex::build(&games, &sessions);
        assert_eq!(index.label_for("g1"), "Session 1 Game 1");
        assert_eq!(index.label_for("g2"), "Session 1 Game 2");
        assert_eq!(index.label_for("g4"), "League Night Game 2");
        assert_eq!(index.label_for("g5"), "Game 5");
        // untimed games sort last
        assert_eq!(index.game("g6").unwrap().global_number, 6);
    }

    #[test]
    fn test_equal_timestamps_break_ties_by_id() {
        let games = vec![game("b", None, Some(at(1, 9)), 100), game("a", None, Some(at(1, 9)), 100)];
        let index = LabelIndex::build(&games, &[]);
        assert_eq!(index.label_for("a"), "Game 1");
        assert_eq!(index.label_for("b"), "Game 2");
    }

    #[test]
    fn test_global_game_numbers() {
        let (games, sessions) = fixture();
        let filters = QuestionFilters {
            game_numbers: vec![1, 2, 3],
            ..Default::default()
        };
        let scope = resolve(games, &sessions, &filters, None, None);
        assert_eq!(ids(&scope.working_set), vec!["g1", "g2", "g3"]);
    }

    #[test]
    fn test_game_numbers_within_session() {
        let (games, sessions) = fixture();
        let filters = QuestionFilters {
            game_numbers: vec![2],
            session_names: vec!["League Night".to_string()],
            ..Default::default()
        };
        let scope = resolve(games, &sessions, &filters, None, None);
        assert_eq!(scope.selection.game_number_scope, GameNumberScope::Session);
        assert_eq!(ids(&scope.working_set), vec!["g4"]);
    }

    #[test]
    fn test_sessionless_filter() {
        let (games, sessions) = fixture();
        let filters = QuestionFilters {
            sessionless: true,
            ..Default::default()
        };
        let scope = resolve(games, &sessions, &filters, None, None);
        assert_eq!(ids(&scope.working_set), vec!["g5", "g6"]);
    }

    #[test]
    fn test_unknown_session_selects_nothing() {
        let (games, sessions) = fixture();
        let filters = QuestionFilters {
            session_numbers: vec![9],
            ..Default::default()
        };
        let scope = resolve(games, &sessions, &filters, None, None);
        assert!(scope.working_set.is_empty());
    }

    #[test]
    fn test_untimed_game_excluded_by_time_filter() {
        let (games, sessions) = fixture();
        let filters = QuestionFilters {
            time: TimeFilter {
                clock: Some(ClockBound {
                    direction: ClockDirection::Before,
                    minute: 19 * 60,
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let scope = resolve(games, &sessions, &filters, None, None);
        assert_eq!(ids(&scope.working_set), vec!["g1", "g5"]);
        assert!(!scope.working_set.iter().any(|g| g.played_at.is_none()));
    }

    #[test]
    fn test_frame_filter_requires_recorded_frame() {
        let (games, sessions) = fixture();
        let filters = QuestionFilters {
            frames: vec![9],
            ..Default::default()
        };
        let scope = resolve(games, &sessions, &filters, None, None);
        assert!(!ids(&scope.working_set).contains(&"g6".to_string()));
        assert_eq!(scope.working_set.len(), 5);
    }

    #[test]
    fn test_game_id_bypasses_session_and_number_filters() {
        let (games, sessions) = fixture();
        let filters = QuestionFilters {
            game_numbers: vec![1],
            session_numbers: vec![1],
            ..Default::default()
        };
        let scope = resolve(games, &sessions, &filters, None, Some("g4"));
        assert!(scope.selection.sessions.is_none());
        assert!(scope.selection.game_numbers.is_empty());
        assert_eq!(ids(&scope.working_set), vec!["g4"]);
    }

    #[test]
    fn test_labels_do_not_depend_on_filters() {
        let (games, sessions) = fixture();
        let unfiltered = resolve(games.clone(), &sessions, &QuestionFilters::default(), None, None);
        let variants = vec![
            QuestionFilters {
                game_numbers: vec![3],
                ..Default::default()
            },
            QuestionFilters {
                session_numbers: vec![2],
                frames: vec![10],
                ..Default::default()
            },
            QuestionFilters {
                sessionless: true,
                time: TimeFilter {
                    clock: Some(ClockBound {
                        direction: ClockDirection::After,
                        minute: 60,
                    }),
                    ..Default::default()
                },
                ..Default::default()
            },
        ];
        for filters in variants {
            let scope = resolve(games.clone(), &sessions, &filters, Some(300), None);
            assert_eq!(scope.index, unfiltered.index);
            for g in &scope.working_set {
                assert_eq!(scope.index.label_for(&g.id), unfiltered.index.label_for(&g.id));
            }
        }
    }

    #[test]
    fn test_working_set_is_intersection_of_filter_kinds() {
        let (games, sessions) = fixture();
        let index = LabelIndex::build(&games, &sessions);
        let time = normalize_time(
            &TimeFilter {
                clock: Some(ClockBound {
                    direction: ClockDirection::After,
                    minute: 14 * 60,
                }),
                ..Default::default()
            },
            Some(300),
        );

        let combos = vec![
            Selection {
                game_numbers: vec![1, 2, 4],
                sessions: Some(SessionScope {
                    ids: vec!["s-a".to_string()],
                    sessionless: true,
                }),
                ..Default::default()
            },
            Selection {
                game_numbers: vec![2],
                game_number_scope: GameNumberScope::Session,
                sessions: Some(SessionScope {
                    ids: vec!["s-b".to_string()],
                    sessionless: false,
                }),
                frames: vec![9],
                time: time.clone(),
                ..Default::default()
            },
            Selection {
                frames: vec![9, 10],
                time: time.clone(),
                ..Default::default()
            },
        ];

        for combined in combos {
            let kinds = vec![
                Selection {
                    game_numbers: combined.game_numbers.clone(),
                    game_number_scope: combined.game_number_scope,
                    ..Default::default()
                },
                Selection {
                    sessions: combined.sessions.clone(),
                    ..Default::default()
                },
                Selection {
                    frames: combined.frames.clone(),
                    ..Default::default()
                },
                Selection {
                    time: combined.time.clone(),
                    ..Default::default()
                },
            ];
            let expected: Vec<String> = games
                .iter()
                .filter(|g| {
                    kinds
                        .iter()
                        .all(|k| working_set(&games, &index, k).iter().any(|w| w.id == g.id))
                })
                .map(|g| g.id.clone())
                .collect();
            let mut actual = ids(&working_set(&games, &index, &combined));
            let mut expected = expected;
            actual.sort();
            expected.sort();
            assert_eq!(actual, expected);
        }
    }
}
