//! Context answering
//!
//! Embeds the user's games (bounded), the summary statistics and the full
//! label index as JSON and asks the reasoning engine to answer from it.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::{summarize, Summary};
use crate::error::{EngineError, TierError};
use crate::llm::{generate_within, LlmRequest, ReasoningEngine};
use crate::pipeline::TierInput;
use crate::scope::LabelIndex;
use crate::types::{Frame, Game, Selection};

const CONTEXT_INSTRUCTIONS: &str = "You answer a bowler's questions about their own games using only the JSON context provided. \
The label index lists every game and session that exists and is the ground truth for labels and numbering. \
The selection hint is what a simple parser found in the question; it may be incomplete for compound questions, \
so check the question yourself against the label index. \
Refer to games by label. Be brief and specific, and do not mention JSON or the context. \
If `truncated` is true, say when an answer only covers the games included. \
If something was not recorded, say so instead of guessing.";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextFrame {
    pub frame: u8,
    pub shots: Vec<Option<u8>>,
    pub strike: bool,
    pub spare: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextGame {
    pub label: String,
    pub id: String,
    pub score: Option<i32>,
    pub played_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    pub frames: Vec<ContextFrame>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionHint<'a> {
    pub description: String,
    pub selection: &'a Selection,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerContext<'a> {
    pub label_index: &'a LabelIndex,
    pub selection_hint: SelectionHint<'a>,
    pub summary: &'a Summary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_games_summary: Option<Summary>,
    pub games_in_scope: usize,
    pub games_included: usize,
    pub truncated: bool,
    pub games: Vec<ContextGame>,
}

fn context_frame(frame: &Frame) -> ContextFrame {
    ContextFrame {
        frame: frame.number,
        shots: frame.shots.iter().map(|s| s.pins).collect(),
        strike: frame.is_strike(),
        spare: frame.is_spare(),
    }
}

fn context_game(game: &Game, index: &LabelIndex) -> ContextGame {
    let label = index.game(&game.id);
    ContextGame {
        label: index.label_for(&game.id),
        id: game.id.clone(),
        score: game.total_score,
        played_at: game.played_at,
        session: label.and_then(|l| l.session_label.clone()),
        frames: game.frames.iter().map(context_frame).collect(),
    }
}

/// Build the bounded context. Filtered questions embed the working set; when
/// nothing matched, every game is embedded so the engine can still correct the parse.
pub fn build_context<'a>(input: &'a TierInput<'a>) -> AnswerContext<'a> {
    let scope = input.scope;
    let filtered = scope.selection.has_filters();

    let pool: &[Game] = if filtered && !scope.working_set.is_empty() {
        &scope.working_set
    } else {
        &scope.all_games
    };

    let mut ordered: Vec<&Game> = pool.iter().collect();
    ordered.sort_by_key(|g| scope.index.game(&g.id).map_or(u32::MAX, |l| l.global_number));

    // keep the most recent games when over the cap
    let cap = input.config.max_context_games;
    let skip = ordered.len().saturating_sub(cap);
    let games: Vec<ContextGame> = ordered[skip..]
        .iter()
        .map(|g| context_game(g, &scope.index))
        .collect();

    AnswerContext {
        label_index: &scope.index,
        selection_hint: SelectionHint {
            description: scope.selection.describe(),
            selection: &scope.selection,
        },
        summary: input.summary,
        all_games_summary: filtered.then(|| summarize(&scope.all_games)),
        games_in_scope: pool.len(),
        games_included: games.len(),
        truncated: skip > 0,
        games,
    }
}

/// Run the context tier once
pub async fn answer(engine: &dyn ReasoningEngine, input: &TierInput<'_>) -> Result<String, TierError> {
    let context = build_context(input);
    if context.truncated {
        tracing::debug!(
            "Context truncated to {} of {} games",
            context.games_included,
            context.games_in_scope
        );
    }

    let context_json = serde_json::to_string(&context)
        .map_err(|e| EngineError::Malformed(format!("Failed to encode context: {}", e)))?;

    let text = generate_within(
        engine,
        &LlmRequest {
            input: format!("Context:\n{}\n\nQuestion: {}", context_json, input.question),
            instructions: Some(CONTEXT_INSTRUCTIONS.to_string()),
            json: false,
            reasoning_effort: input.config.reasoning_effort.clone(),
        },
        input.config.llm_timeout_secs,
    )
    .await?;

    if text.trim().is_empty() {
        return Err(TierError::Generation(EngineError::Malformed("empty answer".to_string())));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AskConfig;
    use crate::scope::resolve;
    use crate::testing::{game, three_games, HangingEngine, ScriptedEngine};
    use crate::types::QuestionFilters;

    fn many_games(n: u32) -> Vec<Game> {
        (1..=n)
            .map(|i| {
                game(
                    &format!("g{:03}", i),
                    Some(100 + i as i32),
                    Some(crate::testing::at(1, 0) + chrono::Duration::hours(i64::from(i))),
                )
            })
            .collect()
    }

    #[test]
    fn test_context_truncates_to_most_recent_games() {
        let scope = resolve(many_games(8), &[], &QuestionFilters::default(), None, None);
        let summary = summarize(&scope.working_set);
        let config = AskConfig {
            max_context_games: 5,
            ..Default::default()
        };
        let input = TierInput {
            question: "How am I doing?",
            user_id: "u1",
            scope: &scope,
            summary: &summary,
            config: &config,
        };

        let context = build_context(&input);
        assert!(context.truncated);
        assert_eq!(context.games_in_scope, 8);
        assert_eq!(context.games_included, 5);
        assert_eq!(context.games[0].label, "Game 4");
        assert_eq!(context.games[4].label, "Game 8");
        // the label index always covers everything
        assert_eq!(context.label_index.games.len(), 8);
        assert!(context.all_games_summary.is_none());
    }

    #[test]
    fn test_context_uses_working_set_when_filtered() {
        let filters = QuestionFilters {
            game_numbers: vec![2],
            ..Default::default()
        };
        let scope = resolve(three_games(), &[], &filters, None, None);
        let summary = summarize(&scope.working_set);
        let config = AskConfig::default();
        let input = TierInput {
            question: "How did game 2 go?",
            user_id: "u1",
            scope: &scope,
            summary: &summary,
            config: &config,
        };

        let context = build_context(&input);
        assert!(!context.truncated);
        assert_eq!(context.games.len(), 1);
        assert_eq!(context.games[0].label, "Game 2");
        assert_eq!(context.games[0].frames.len(), 10);
        assert_eq!(context.all_games_summary.as_ref().unwrap().total_games, 3);

        let json = serde_json::to_value(&context).unwrap();
        assert_eq!(json["truncated"], false);
        assert_eq!(json["selectionHint"]["description"], "games 2");
        assert!(json["games"][0]["frames"][2]["strike"].as_bool().unwrap());
    }

    #[tokio::test]
    async fn test_answer_single_engine_call() {
        let scope = resolve(three_games(), &[], &QuestionFilters::default(), None, None);
        let summary = summarize(&scope.working_set);
        let config = AskConfig::default();
        let input = TierInput {
            question: "Any tips for my spares?",
            user_id: "u1",
            scope: &scope,
            summary: &summary,
            config: &config,
        };
        let engine = ScriptedEngine::new(vec![Ok("Focus on the 7-pin.".to_string())]);

        assert_eq!(answer(&engine, &input).await.unwrap(), "Focus on the 7-pin.");
        assert_eq!(engine.calls(), 1);
        let request = &engine.requests()[0];
        assert!(request.input.contains("\"labelIndex\""));
        assert!(request.input.ends_with("Question: Any tips for my spares?"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_times_out() {
        let scope = resolve(three_games(), &[], &QuestionFilters::default(), None, None);
        let summary = summarize(&scope.working_set);
        let config = AskConfig {
            llm_timeout_secs: 2,
            ..Default::default()
        };
        let input = TierInput {
            question: "Average?",
            user_id: "u1",
            scope: &scope,
            summary: &summary,
            config: &config,
        };
        let err = answer(&HangingEngine, &input).await.unwrap_err();
        assert_eq!(err, TierError::Generation(EngineError::Timeout(2)));
    }
}
