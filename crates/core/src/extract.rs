//! Question Filter Extraction
//!
//! Pattern-based extraction of game numbers, sessions, frames, dates and
//! before/after times from free-text questions. Every pass is a pure function
//! of the text; a pattern that is absent or malformed yields no filter.

use std::collections::BTreeSet;

use chrono::{Days, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{ClockBound, ClockDirection, QuestionFilters, TimeFilter};

/// Ranges wider than this are treated as noise ("games 1 to 100000")
const MAX_RANGE_SPAN: u32 = 500;

/// Separator between list items: "1, 2 and 3", "1-3", "4 through 6"
const LIST_SEPARATOR: &str =
    r"(?:,\s*(?:and|or)\b|,|&|\band\b|\bor\b|-|–|\bto\b|\bthrough\b|\bthru\b)";

fn list_pattern(keyword: &str) -> Regex {
    let pattern = format!(
        r"(?i)\b{kw}s?\s*(?:#|no\.|number)?\s*(\d+(?:\s*{sep}\s*#?\s*\d+)*)",
        kw = keyword,
        sep = LIST_SEPARATOR
    );
    Regex::new(&pattern).expect("Invalid list regex")
}

static GAME_LIST: Lazy<Regex> = Lazy::new(|| list_pattern("game"));
static SESSION_LIST: Lazy<Regex> = Lazy::new(|| list_pattern("session"));
static FRAME_LIST: Lazy<Regex> = Lazy::new(|| list_pattern("frame"));

static LIST_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+)\s*(?:-|–|\bto\b|\bthrough\b|\bthru\b)\s*#?\s*(\d+)|(\d+)")
        .expect("Invalid list item regex")
});

static ORDINAL_FRAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)\s+frames?\b").expect("Invalid ordinal regex")
});

static WORD_FRAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(first|second|third|fourth|fifth|sixth|seventh|eighth|ninth|tenth|last)\s+frames?\b",
    )
    .expect("Invalid word frame regex")
});

const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec";

static MONTH_FIRST_DATE: Lazy<Regex> = Lazy::new(|| {
    let pattern = format!(
        r"(?i)\b({})\b\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?\b(?:,?\s+(\d{{4}})\b)?",
        MONTHS
    );
    Regex::new(&pattern).expect("Invalid date regex")
});

static DAY_FIRST_DATE: Lazy<Regex> = Lazy::new(|| {
    let pattern = format!(
        r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?({})\b\.?(?:,?\s+(\d{{4}})\b)?",
        MONTHS
    );
    Regex::new(&pattern).expect("Invalid date regex")
});

static CLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(before|after)\s+(\d{1,2})(?::(\d{2}))?\s*(a\.?m\.?|p\.?m\.?)?")
        .expect("Invalid clock regex")
});

static CLOCK_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(before|after)\s+(noon|midnight)\b").expect("Invalid clock word regex")
});

static RELATIVE_DAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(today|tonight|yesterday)\b").expect("Invalid relative regex"));

/// Phrases meaning "games not attached to any session"
const SESSIONLESS_PHRASES: &[&str] = &[
    "sessionless",
    "no session",
    "without a session",
    "without session",
    "not in a session",
    "not in any session",
    "outside a session",
    "outside of a session",
    "outside any session",
    "unassigned games",
];

// ============================================================================
// Number Lists
// ============================================================================

/// Expand a captured list ("2, 3 and 4", "2-4") into its numbers
fn parse_number_list(list: &str) -> Vec<u32> {
    let mut numbers = Vec::new();

    for cap in LIST_ITEM.captures_iter(list) {
        if let (Some(a), Some(b)) = (cap.get(1), cap.get(2)) {
            let (Ok(a), Ok(b)) = (a.as_str().parse::<u32>(), b.as_str().parse::<u32>()) else {
                continue;
            };
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            if hi - lo > MAX_RANGE_SPAN {
                continue;
            }
            numbers.extend(lo..=hi);
        } else if let Some(single) = cap.get(3) {
            if let Ok(n) = single.as_str().parse::<u32>() {
                numbers.push(n);
            }
        }
    }

    numbers
}

/// Collect every list following `pattern`'s keyword into a sorted, deduplicated set
fn collect_numbers(pattern: &Regex, text: &str) -> BTreeSet<u32> {
    pattern
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .flat_map(|m| parse_number_list(m.as_str()))
        .filter(|n| *n >= 1)
        .collect()
}

/// Game numbers mentioned as "game 3", "games 3-7", "games 3 to 7", "game 2, 3 and 4"
pub fn extract_game_numbers(text: &str) -> Vec<u32> {
    collect_numbers(&GAME_LIST, text).into_iter().collect()
}

/// Session numbers, same grammar under the word "session"
pub fn extract_session_numbers(text: &str) -> Vec<u32> {
    collect_numbers(&SESSION_LIST, text).into_iter().collect()
}

// ============================================================================
// Sessions by Name
// ============================================================================

fn is_word_boundary(s: &str, idx: usize, before: bool) -> bool {
    let ch = if before {
        s[..idx].chars().next_back()
    } else {
        s[idx..].chars().next()
    };
    ch.map_or(true, |c| !c.is_alphanumeric())
}

/// Match known session names in the question.
///
/// Longest names are tried first and their span is blanked out, so a short name
/// cannot match inside a longer one ("League" inside "League Finals").
pub fn match_session_names(text: &str, known_names: &[String]) -> Vec<String> {
    let mut candidates: Vec<(&String, String)> = known_names
        .iter()
        .map(|name| (name, name.trim().to_lowercase()))
        .filter(|(_, lower)| !lower.is_empty())
        .collect();
    candidates.sort_by(|a, b| b.1.chars().count().cmp(&a.1.chars().count()));

    let mut haystack = text.to_lowercase();
    let mut matched = Vec::new();

    for (original, needle) in candidates {
        let mut search_from = 0;
        while let Some(pos) = haystack[search_from..].find(&needle) {
            let start = search_from + pos;
            let end = start + needle.len();
            if is_word_boundary(&haystack, start, true) && is_word_boundary(&haystack, end, false) {
                haystack.replace_range(start..end, &" ".repeat(needle.len()));
                if !matched.contains(original) {
                    matched.push(original.trim().to_string());
                }
                break;
            }
            search_from = end;
        }
    }

    matched
}

/// Whether the question asks about games that belong to no session
pub fn mentions_sessionless(text: &str) -> bool {
    let lower = text.to_lowercase();
    SESSIONLESS_PHRASES.iter().any(|p| lower.contains(p))
}

// ============================================================================
// Frames
// ============================================================================

fn frame_word(word: &str) -> Option<u32> {
    match word.to_lowercase().as_str() {
        "first" => Some(1),
        "second" => Some(2),
        "third" => Some(3),
        "fourth" => Some(4),
        "fifth" => Some(5),
        "sixth" => Some(6),
        "seventh" => Some(7),
        "eighth" => Some(8),
        "ninth" => Some(9),
        "tenth" | "last" => Some(10),
        _ => None,
    }
}

/// Frame numbers, clamped to 1..=10. Out-of-range values are dropped.
pub fn extract_frames(text: &str) -> Vec<u8> {
    let mut frames = collect_numbers(&FRAME_LIST, text);

    for cap in ORDINAL_FRAME.captures_iter(text) {
        if let Ok(n) = cap[1].parse::<u32>() {
            frames.insert(n);
        }
    }
    for cap in WORD_FRAME.captures_iter(text) {
        if let Some(n) = frame_word(&cap[1]) {
            frames.insert(n);
        }
    }

    frames
        .into_iter()
        .filter(|n| (1..=10).contains(n))
        .map(|n| n as u8)
        .collect()
}

// ============================================================================
// Dates
// ============================================================================

/// Month number from a full or abbreviated month name
pub fn parse_month(s: &str) -> Option<u32> {
    let lower = s.to_lowercase();
    let month = match lower.trim_end_matches('.') {
        "january" | "jan" => 1,
        "february" | "feb" => 2,
        "march" | "mar" => 3,
        "april" | "apr" => 4,
        "may" => 5,
        "june" | "jun" => 6,
        "july" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sept" | "sep" => 9,
        "october" | "oct" => 10,
        "november" | "nov" => 11,
        "december" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Build a calendar date, rejecting impossible days (Feb 30)
fn build_date(month: &str, day: &str, year: Option<&str>, current_year: i32) -> Option<NaiveDate> {
    let month = parse_month(month)?;
    let day = day.parse::<u32>().ok()?;
    let year = match year {
        Some(y) => y.parse::<i32>().ok()?,
        None => current_year,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// All month-name dates in text order.
///
/// "March 5" wins over an overlapping "3 March", so the last number of a list
/// such as "games 1 to 3 March 5" is not read as the day.
fn month_name_dates(text: &str, current_year: i32) -> Vec<NaiveDate> {
    let mut found: Vec<(usize, usize, Option<NaiveDate>)> = MONTH_FIRST_DATE
        .captures_iter(text)
        .filter_map(|cap| {
            let whole = cap.get(0)?;
            let date = build_date(&cap[1], &cap[2], cap.get(3).map(|m| m.as_str()), current_year);
            Some((whole.start(), whole.end(), date))
        })
        .collect();

    let overlaps = |start: usize, end: usize, taken: &[(usize, usize, Option<NaiveDate>)]| {
        taken.iter().any(|(s, e, _)| start < *e && *s < end)
    };
    for cap in DAY_FIRST_DATE.captures_iter(text) {
        let Some(whole) = cap.get(0) else { continue };
        if overlaps(whole.start(), whole.end(), &found) {
            continue;
        }
        let date = build_date(&cap[2], &cap[1], cap.get(3).map(|m| m.as_str()), current_year);
        found.push((whole.start(), whole.end(), date));
    }

    found.sort_by_key(|(start, _, _)| *start);
    found.into_iter().filter_map(|(_, _, date)| date).collect()
}

/// Dates mentioned in the question: zero, one, or an order-normalized inclusive
/// range when two dates appear. `today` is the client's local date; it supplies
/// the default year and resolves "today"/"yesterday".
pub fn extract_dates(text: &str, today: NaiveDate) -> (Option<NaiveDate>, Option<NaiveDate>) {
    use chrono::Datelike;

    let dates = month_name_dates(text, today.year());
    match dates.as_slice() {
        [] => {}
        [single] => return (Some(*single), None),
        [a, b, ..] => {
            let (start, end) = if a <= b { (*a, *b) } else { (*b, *a) };
            if start == end {
                return (Some(start), None);
            }
            return (Some(start), Some(end));
        }
    }

    let relative = RELATIVE_DAY
        .captures(text)
        .map(|cap| cap[1].to_lowercase());
    match relative.as_deref() {
        Some("today") | Some("tonight") => (Some(today), None),
        Some("yesterday") => (today.checked_sub_days(Days::new(1)), None),
        _ => (None, None),
    }
}

// ============================================================================
// Time of Day
// ============================================================================

/// Convert an hour/minute/meridiem triple to minutes of day, `None` when out of range
pub fn to_minute_of_day(hour: u32, minute: u32, meridiem: Option<&str>) -> Option<u16> {
    if minute > 59 {
        return None;
    }
    let hour = match meridiem.map(|m| m.to_lowercase().replace('.', "")) {
        Some(m) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            match (m.as_str(), hour) {
                ("am", 12) => 0,
                ("am", h) => h,
                ("pm", 12) => 12,
                (_, h) => h + 12,
            }
        }
        None => {
            if hour > 23 {
                return None;
            }
            hour
        }
    };
    Some((hour * 60 + minute) as u16)
}

fn parse_direction(s: &str) -> ClockDirection {
    if s.eq_ignore_ascii_case("before") {
        ClockDirection::Before
    } else {
        ClockDirection::After
    }
}

/// A single "before|after HH[:MM] [am|pm]" clause
pub fn extract_clock(text: &str) -> Option<ClockBound> {
    if let Some(cap) = CLOCK_WORD.captures(text) {
        let minute = if cap[2].eq_ignore_ascii_case("noon") { 720 } else { 0 };
        return Some(ClockBound {
            direction: parse_direction(&cap[1]),
            minute,
        });
    }

    let cap = CLOCK.captures(text)?;
    let meridiem = cap.get(4).map(|m| m.as_str());

    // "after 10 games" is a count, not a time
    if meridiem.is_none() && cap.get(3).is_none() {
        let rest = text[cap.get(0)?.end()..].trim_start().to_lowercase();
        if ["game", "frame", "session", "shot", "pin", "strike", "spare"]
            .iter()
            .any(|w| rest.starts_with(w))
        {
            return None;
        }
    }

    let hour = cap[2].parse::<u32>().ok()?;
    let minute = match cap.get(3) {
        Some(m) => m.as_str().parse::<u32>().ok()?,
        None => 0,
    };

    Some(ClockBound {
        direction: parse_direction(&cap[1]),
        minute: to_minute_of_day(hour, minute, meridiem)?,
    })
}

// ============================================================================
// Composition
// ============================================================================

/// Run every extraction pass over the question
pub fn extract_filters(text: &str, known_session_names: &[String], today: NaiveDate) -> QuestionFilters {
    let (date, date_end) = extract_dates(text, today);

    QuestionFilters {
        game_numbers: extract_game_numbers(text),
        session_numbers: extract_session_numbers(text),
        session_names: match_session_names(text, known_session_names),
        sessionless: mentions_sessionless(text),
        frames: extract_frames(text),
        time: TimeFilter {
            date,
            date_end,
            clock: extract_clock(text),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_game_range_and_list_agree() {
        assert_eq!(extract_game_numbers("games 2-4"), vec![2, 3, 4]);
        assert_eq!(extract_game_numbers("game 2, 3 and 4"), vec![2, 3, 4]);
        assert_eq!(extract_game_numbers("games 2 to 4"), vec![2, 3, 4]);
    }

    #[test]
    fn test_game_range_order_independent() {
        assert_eq!(extract_game_numbers("games 7 to 3"), vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_game_numbers_dedup_and_sorted() {
        assert_eq!(extract_game_numbers("game 5 and game 2, games 1-3"), vec![1, 2, 3, 5]);
    }

    #[test]
    fn test_game_numbers_absent() {
        assert!(extract_game_numbers("what's my average?").is_empty());
        assert!(extract_game_numbers("games in session 2").is_empty());
    }

    #[test]
    fn test_game_range_too_wide_ignored() {
        assert!(extract_game_numbers("games 1 to 100000").is_empty());
    }

    #[test]
    fn test_session_numbers() {
        assert_eq!(extract_session_numbers("session 2"), vec![2]);
        assert_eq!(extract_session_numbers("sessions 1 through 3"), vec![1, 2, 3]);
        assert_eq!(extract_session_numbers("game 4 of session 2"), vec![2]);
    }

    #[test]
    fn test_session_names_longest_first() {
        let known = vec!["League".to_string(), "League Finals".to_string()];
        assert_eq!(
            match_session_names("how did I do at league finals?", &known),
            vec!["League Finals".to_string()]
        );
        assert_eq!(
            match_session_names("league average", &known),
            vec!["League".to_string()]
        );
    }

    #[test]
    fn test_session_names_whole_words_only() {
        let known = vec!["Cup".to_string()];
        assert!(match_session_names("cupcake night", &known).is_empty());
        assert_eq!(match_session_names("the CUP games", &known), vec!["Cup".to_string()]);
    }

    #[test]
    fn test_sessionless_vocabulary() {
        assert!(mentions_sessionless("average of games with no session"));
        assert!(mentions_sessionless("Sessionless games only"));
        assert!(!mentions_sessionless("session 2 average"));
    }

    #[test]
    fn test_frames_clamped() {
        assert_eq!(extract_frames("frame 9"), vec![9]);
        assert_eq!(extract_frames("frames 8-12"), vec![8, 9, 10]);
        assert!(extract_frames("frame 0 or frame 11").is_empty());
    }

    #[test]
    fn test_frames_ordinals() {
        assert_eq!(extract_frames("strikes in the 9th frame"), vec![9]);
        assert_eq!(extract_frames("tenth frame and first frame"), vec![1, 10]);
    }

    #[test]
    fn test_single_date_defaults_to_current_year() {
        let today = day(2026, 10, 19);
        assert_eq!(extract_dates("games on March 3", today), (Some(day(2026, 3, 3)), None));
        assert_eq!(extract_dates("on 3rd of March 2025", today), (Some(day(2025, 3, 3)), None));
    }

    #[test]
    fn test_two_dates_form_ordered_range() {
        let today = day(2026, 10, 19);
        assert_eq!(
            extract_dates("between Sept 20 and Aug 1", today),
            (Some(day(2026, 8, 1)), Some(day(2026, 9, 20)))
        );
    }

    #[test]
    fn test_month_first_date_wins_over_trailing_list_number() {
        let today = day(2026, 10, 19);
        let filters = extract_filters("average for games 1 to 3 March 5", &[], today);
        assert_eq!(filters.game_numbers, vec![1, 2, 3]);
        assert_eq!(filters.time.date, Some(day(2026, 3, 5)));
        assert_eq!(filters.time.date_end, None);
        // day-first dates still work on their own
        assert_eq!(extract_dates("on the 5th of March", today), (Some(day(2026, 3, 5)), None));
    }

    #[test]
    fn test_invalid_date_skipped() {
        let today = day(2026, 10, 19);
        assert_eq!(extract_dates("feb 30", today), (None, None));
    }

    #[test]
    fn test_relative_dates() {
        let today = day(2026, 10, 19);
        assert_eq!(extract_dates("games today", today), (Some(today), None));
        assert_eq!(extract_dates("yesterday's games", today), (Some(day(2026, 10, 18)), None));
    }

    #[test]
    fn test_may_without_day_is_not_a_date() {
        let today = day(2026, 10, 19);
        assert_eq!(extract_dates("may I see my average", today), (None, None));
    }

    #[test]
    fn test_clock_twelve_hour() {
        let clock = extract_clock("strikes after 7pm").unwrap();
        assert_eq!(clock.direction, ClockDirection::After);
        assert_eq!(clock.minute, 19 * 60);

        let clock = extract_clock("before 9:30 a.m.").unwrap();
        assert_eq!(clock.direction, ClockDirection::Before);
        assert_eq!(clock.minute, 9 * 60 + 30);

        assert_eq!(extract_clock("after 12am").unwrap().minute, 0);
        assert_eq!(extract_clock("after 12pm").unwrap().minute, 720);
    }

    #[test]
    fn test_clock_words() {
        assert_eq!(extract_clock("before noon").unwrap().minute, 720);
        assert_eq!(extract_clock("after midnight").unwrap().minute, 0);
    }

    #[test]
    fn test_clock_out_of_range_keeps_date() {
        let today = day(2026, 10, 19);
        let filters = extract_filters("games on March 3 after 13pm", &[], today);
        assert_eq!(filters.time.clock, None);
        assert_eq!(filters.time.date, Some(day(2026, 3, 3)));

        assert_eq!(extract_clock("before 7:75"), None);
        assert_eq!(extract_clock("after 25"), None);
    }

    #[test]
    fn test_clock_ignores_counts() {
        assert_eq!(extract_clock("average after 10 games"), None);
    }

    #[test]
    fn test_extract_filters_compound() {
        let today = day(2026, 10, 19);
        let filters = extract_filters(
            "How often do I strike on frame 9 after 7pm in session 2?",
            &[],
            today,
        );
        assert_eq!(filters.frames, vec![9]);
        assert_eq!(filters.session_numbers, vec![2]);
        assert!(filters.game_numbers.is_empty());
        assert_eq!(filters.time.clock.map(|c| c.minute), Some(1140));
    }

    #[test]
    fn test_extract_filters_total_on_garbage() {
        let today = day(2026, 10, 19);
        let filters = extract_filters("game #### frame -- before :: 99999999999999999999", &[], today);
        assert!(filters.game_numbers.is_empty());
        assert!(filters.frames.is_empty());
        assert_eq!(filters.time.clock, None);
    }
}
