//! Offline answering
//!
//! A fixed, ordered rule table matched against the question wording. Every
//! answer is computed from the summary statistics, so this tier needs no
//! network and cannot fail: when no rule matches it says so.

use crate::aggregate::{FrameStats, Summary};
use crate::router::contains_keyword;
use crate::types::Selection;

pub const NO_MATCH_ANSWER: &str = "I could not answer that question offline.";

type Render = fn(&Summary, &[u8]) -> Vec<String>;

struct Rule {
    name: &'static str,
    keywords: &'static [&'static str],
    /// Only applies when the question selected specific frames
    per_frame: bool,
    render: Render,
}

const STRIKE_WORDS: &[&str] = &["strike", "strikes", "striking", "strike rate"];
const SPARE_WORDS: &[&str] = &["spare", "spares", "spare rate"];
const PIN_WORDS: &[&str] = &["pins", "pin", "pinfall", "average", "avg"];
const COUNT_WORDS: &[&str] = &["how many", "count", "number of", "games played", "games bowled"];
const BEST_WORDS: &[&str] = &["best", "highest", "high game", "top", "max", "maximum"];
const WORST_WORDS: &[&str] = &["worst", "lowest", "low game", "min", "minimum"];
const TOTAL_WORDS: &[&str] = &["total", "sum", "combined"];
const AVERAGE_WORDS: &[&str] = &["average", "avg", "mean"];

/// First match wins
const RULES: &[Rule] = &[
    Rule {
        name: "frame_strike_rate",
        keywords: STRIKE_WORDS,
        per_frame: true,
        render: render_frame_strike_rate,
    },
    Rule {
        name: "frame_spare_rate",
        keywords: SPARE_WORDS,
        per_frame: true,
        render: render_frame_spare_rate,
    },
    Rule {
        name: "frame_average_pins",
        keywords: PIN_WORDS,
        per_frame: true,
        render: render_frame_average_pins,
    },
    Rule {
        name: "strike_rate",
        keywords: STRIKE_WORDS,
        per_frame: false,
        render: render_strike_rate,
    },
    Rule {
        name: "spare_rate",
        keywords: SPARE_WORDS,
        per_frame: false,
        render: render_spare_rate,
    },
    Rule {
        name: "game_count",
        keywords: COUNT_WORDS,
        per_frame: false,
        render: render_game_count,
    },
    Rule {
        name: "best_score",
        keywords: BEST_WORDS,
        per_frame: false,
        render: render_best_score,
    },
    Rule {
        name: "worst_score",
        keywords: WORST_WORDS,
        per_frame: false,
        render: render_worst_score,
    },
    Rule {
        name: "total_score",
        keywords: TOTAL_WORDS,
        per_frame: false,
        render: render_total_score,
    },
    Rule {
        name: "average_score",
        keywords: AVERAGE_WORDS,
        per_frame: false,
        render: render_average_score,
    },
];

#[derive(Debug, Clone, PartialEq)]
pub struct OfflineAnswer {
    pub text: String,
    /// Name of the rule that produced the answer, `None` for the no-match answer
    pub rule: Option<&'static str>,
}

/// 200.0 -> "200", 187.5 -> "187.5"
pub fn format_number(value: f64) -> String {
    let s = format!("{:.2}", value);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// 0.333 -> "33.3%"
pub fn format_percent(rate: f64) -> String {
    format!("{}%", format_number((rate * 1000.0).round() / 10.0))
}

fn frame_stats<'a>(summary: &'a Summary, frames: &'a [u8]) -> impl Iterator<Item = (u8, Option<&'a FrameStats>)> + 'a {
    frames.iter().map(move |f| (*f, summary.frame(*f)))
}

fn render_frame_strike_rate(summary: &Summary, frames: &[u8]) -> Vec<String> {
    frame_stats(summary, frames)
        .map(|(f, stats)| match stats {
            Some(s) => format!(
                "Frame {} strike rate: **{}** ({} frames)",
                f,
                format_percent(s.strike_rate),
                s.frames
            ),
            None => format!("Frame {} strike rate: no frames recorded", f),
        })
        .collect()
}

fn render_frame_spare_rate(summary: &Summary, frames: &[u8]) -> Vec<String> {
    frame_stats(summary, frames)
        .map(|(f, stats)| match stats {
            Some(s) => format!(
                "Frame {} spare rate: **{}** ({} frames)",
                f,
                format_percent(s.spare_rate),
                s.frames
            ),
            None => format!("Frame {} spare rate: no frames recorded", f),
        })
        .collect()
}

fn render_frame_average_pins(summary: &Summary, frames: &[u8]) -> Vec<String> {
    frame_stats(summary, frames)
        .map(|(f, stats)| match stats.and_then(|s| s.average_pins) {
            Some(pins) => format!("Frame {} average pins: **{}**", f, format_number(pins)),
            None => format!("Frame {} average pins: not recorded", f),
        })
        .collect()
}

fn render_strike_rate(summary: &Summary, _frames: &[u8]) -> Vec<String> {
    vec![format!(
        "Strike rate: **{}** ({} strikes in {} frames)",
        format_percent(summary.strike_rate),
        summary.strikes,
        summary.total_frames
    )]
}

fn render_spare_rate(summary: &Summary, _frames: &[u8]) -> Vec<String> {
    vec![format!(
        "Spare rate: **{}** ({} spares)",
        format_percent(summary.spare_rate),
        summary.spares
    )]
}

fn render_game_count(summary: &Summary, _frames: &[u8]) -> Vec<String> {
    vec![format!("Games: **{}**", summary.total_games)]
}

fn render_best_score(summary: &Summary, _frames: &[u8]) -> Vec<String> {
    match summary.best_score {
        Some(best) => vec![format!("Best score: **{}**", best)],
        None => vec!["Best score: no scored games".to_string()],
    }
}

fn render_worst_score(summary: &Summary, _frames: &[u8]) -> Vec<String> {
    match summary.worst_score {
        Some(worst) => vec![format!("Lowest score: **{}**", worst)],
        None => vec!["Lowest score: no scored games".to_string()],
    }
}

fn render_total_score(summary: &Summary, _frames: &[u8]) -> Vec<String> {
    vec![format!(
        "Total score: **{}** across {} scored games",
        summary.total_score, summary.scored_games
    )]
}

fn render_average_score(summary: &Summary, _frames: &[u8]) -> Vec<String> {
    match summary.average_score {
        Some(avg) => vec![format!(
            "Average score: **{}** across {} scored games",
            format_number(avg),
            summary.scored_games
        )],
        None => vec!["Average score: no scored games".to_string()],
    }
}

fn rule_matches(rule: &Rule, question: &str, frames: &[u8]) -> bool {
    if rule.per_frame && frames.is_empty() {
        return false;
    }
    rule.keywords.iter().any(|k| contains_keyword(question, k))
}

/// Answer from the summary alone
pub fn answer(question: &str, selection: &Selection, summary: &Summary) -> OfflineAnswer {
    let q = question.to_lowercase();

    let Some(rule) = RULES.iter().find(|r| rule_matches(r, &q, &selection.frames)) else {
        return OfflineAnswer {
            text: NO_MATCH_ANSWER.to_string(),
            rule: None,
        };
    };

    let mut lines = if summary.total_games == 0 && rule.name != "game_count" {
        vec!["No games matched that question.".to_string()]
    } else {
        (rule.render)(summary, &selection.frames)
    };
    if selection.has_filters() {
        lines.push(format!("Scope: {}", selection.describe()));
    }

    tracing::debug!("Offline rule '{}' answered", rule.name);
    OfflineAnswer {
        text: lines.join("\n"),
        rule: Some(rule.name),
    }
}
