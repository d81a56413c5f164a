//! Answer post-processing and answer logging

use once_cell::sync::Lazy;
use regex::Regex;

use crate::router::Tier;
use crate::store::AnswerLog;

/// Said instead of a literal null
const NULL_PHRASE: &str = "not recorded";

const EMPTY_ANSWER: &str = "I could not answer that question.";

static NULL_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bnull\b").expect("null regex"));

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("digits regex"));

static INLINE_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{a0}]+").expect("space regex"));

static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("blank line regex"));

/// `Label: value` lines, optionally bulleted, not already bold
static LABEL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^([ \t]*(?:[-*][ \t]+)?)([A-Za-z][A-Za-z0-9 /'()%-]{0,40}):[ \t]+(\S.*)$")
        .expect("label line regex")
});

/// Case-insensitive prefix strip that is safe for non-ASCII text
fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let mut chars = text.char_indices();
    for p in prefix.chars() {
        let (_, c) = chars.next()?;
        if !c.to_lowercase().eq(p.to_lowercase()) {
            return None;
        }
    }
    match chars.next() {
        Some((i, _)) => Some(&text[i..]),
        None => Some(""),
    }
}

fn trim_separators(text: &str) -> &str {
    text.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '?' | '.' | '!' | ':' | '-' | '\u{2014}'))
}

/// Drop a restatement of the question (and a leading "Answer:") from the start
pub fn strip_echo(raw: &str, question: &str) -> String {
    let mut text = raw.trim_start();

    for prefix in ["question:", "q:"] {
        if let Some(rest) = strip_prefix_ci(text, prefix) {
            text = rest.trim_start();
        }
    }

    let asked = question.trim().trim_end_matches(['?', '.', '!']).trim();
    if !asked.is_empty() {
        // must end on a word boundary so "q" does not eat the start of "quick"
        if let Some(rest) = strip_prefix_ci(text, asked) {
            if !rest.starts_with(|c: char| c.is_alphanumeric()) {
                text = trim_separators(rest);
            }
        }
    }

    for prefix in ["answer:", "a:"] {
        if let Some(rest) = strip_prefix_ci(text, prefix) {
            text = rest.trim_start();
        }
    }

    text.to_string()
}

pub fn elide_nulls(text: &str) -> String {
    NULL_WORD.replace_all(text, NULL_PHRASE).into_owned()
}

/// Collapse runs of spaces within lines and runs of blank lines, keeping line structure
pub fn collapse_whitespace(text: &str) -> String {
    let lines: Vec<String> = text
        .lines()
        .map(|line| INLINE_SPACE.replace_all(line.trim(), " ").into_owned())
        .collect();
    BLANK_LINES
        .replace_all(&lines.join("\n"), "\n\n")
        .trim()
        .to_string()
}

pub fn capitalize_first(text: &str) -> String {
    match text.char_indices().find(|(_, c)| c.is_alphanumeric()) {
        Some((i, c)) if c.is_lowercase() => {
            let mut out = String::with_capacity(text.len());
            out.push_str(&text[..i]);
            out.extend(c.to_uppercase());
            out.push_str(&text[i + c.len_utf8()..]);
            out
        }
        _ => text.to_string(),
    }
}

pub fn ensure_terminal_punctuation(text: &str) -> String {
    let trimmed = text.trim_end();
    match trimmed.chars().last() {
        None => String::new(),
        Some('.' | '!' | '?' | '`') => trimmed.to_string(),
        Some(',' | ';' | ':') => format!("{}.", &trimmed[..trimmed.len() - 1]),
        Some(_) => format!("{}.", trimmed),
    }
}

/// `Average score: **200**` -> `**Average score:** **200**`
pub fn bold_labels(text: &str) -> String {
    LABEL_LINE.replace_all(text, "$1**$2:** $3").into_owned()
}

/// Lowercased, digits replaced by `#`, whitespace collapsed
pub fn normalize_question(question: &str) -> String {
    let lower = question.to_lowercase();
    let masked = DIGITS.replace_all(&lower, "#");
    masked.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Clean up a tier's raw text for display
pub fn process(raw: &str, question: &str, tier: Tier) -> String {
    let text = strip_echo(raw, question);
    let text = elide_nulls(&text);
    let text = collapse_whitespace(&text);
    let text = if tier == Tier::Offline { bold_labels(&text) } else { text };
    let text = capitalize_first(&text);
    let text = ensure_terminal_punctuation(&text);

    if text.is_empty() {
        EMPTY_ANSWER.to_string()
    } else {
        text
    }
}

/// Best-effort upsert into the answer log. Failures are logged and dropped.
pub async fn log_answer(log: &dyn AnswerLog, question: &str, answer: &str) {
    let key = normalize_question(question);
    if let Err(e) = log.upsert_answer(&key, answer).await {
        tracing::warn!("Failed to log answer for '{}': {:#}", key, e);
    }
}
