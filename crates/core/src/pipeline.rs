//! Question pipeline orchestration
//!
//! Extract filters, resolve the working set, summarize, then walk the tier
//! state machine until a tier answers. Offline always answers, so every
//! request that gets past input and data loading ends with a response.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::aggregate::{summarize, Summary};
use crate::config::AskConfig;
use crate::error::{PipelineError, TierError};
use crate::extract::extract_filters;
use crate::llm::ReasoningEngine;
use crate::offline;
use crate::postprocess::{log_answer, process};
use crate::router::{first_tier, next_tier, Tier, TierOutcome, Transition};
use crate::scope::{resolve, ResolvedScope};
use crate::store::{AnswerLog, DataAccess};
use crate::timezone::normalize_time;
use crate::types::{local_today, AskRequest, AskResponse, QuestionFilters, MINUTES_PER_DAY};
use crate::{context_tier, sql_tier};

pub const OFFLINE_NOTE: &str = "This is an approximate answer computed locally from your saved games \
because the online assistant could not answer. It may miss details.";

const FALLBACK_ONLINE_ERROR: &str = "The assistant could not answer online.";

/// Everything a tier reads for one request
pub struct TierInput<'a> {
    pub question: &'a str,
    pub user_id: &'a str,
    pub scope: &'a ResolvedScope,
    pub summary: &'a Summary,
    pub config: &'a AskConfig,
}

pub struct Pipeline {
    config: AskConfig,
    engine: Arc<dyn ReasoningEngine>,
    data: Arc<dyn DataAccess>,
    log: Arc<dyn AnswerLog>,
}

fn check_offset(offset_minutes: Option<i32>) -> Result<(), PipelineError> {
    match offset_minutes {
        Some(offset) if !(-MINUTES_PER_DAY..=MINUTES_PER_DAY).contains(&offset) => {
            Err(PipelineError::InvalidTimezoneOffset(offset))
        }
        _ => Ok(()),
    }
}

/// Input checks that need neither configuration nor data
pub fn check_request(request: &AskRequest) -> Result<(), PipelineError> {
    if request.question.trim().is_empty() {
        return Err(PipelineError::MissingQuestion);
    }
    check_offset(request.timezone_offset_minutes)
}

/// Extract and normalize filters without touching any data
pub fn preview_filters(
    question: &str,
    offset_minutes: Option<i32>,
    now: DateTime<Utc>,
) -> Result<QuestionFilters, PipelineError> {
    check_offset(offset_minutes)?;
    let mut filters = extract_filters(question, &[], local_today(now, offset_minutes));
    filters.time = normalize_time(&filters.time, offset_minutes);
    Ok(filters)
}

fn meta_string(config: &AskConfig, method: &str, elapsed: Duration) -> Option<String> {
    let timing = format!("{:.2}s", elapsed.as_secs_f64());
    match (config.show_method, config.show_timing) {
        (true, true) => Some(format!("{} in {}", method, timing)),
        (true, false) => Some(method.to_string()),
        (false, true) => Some(timing),
        (false, false) => None,
    }
}

/// User-facing summary of every tier failure
fn online_error(errors: &[(Tier, TierError)], debug: bool) -> String {
    if errors.is_empty() {
        return FALLBACK_ONLINE_ERROR.to_string();
    }
    if debug {
        return errors
            .iter()
            .map(|(tier, e)| format!("{}: {}", tier, e))
            .collect::<Vec<_>>()
            .join("; ");
    }
    let mut messages: Vec<&str> = Vec::new();
    for (_, e) in errors {
        let message = e.friendly();
        if !messages.contains(&message) {
            messages.push(message);
        }
    }
    messages.join(" ")
}

impl Pipeline {
    pub fn new(
        config: AskConfig,
        engine: Arc<dyn ReasoningEngine>,
        data: Arc<dyn DataAccess>,
        log: Arc<dyn AnswerLog>,
    ) -> Self {
        Self {
            config,
            engine,
            data,
            log,
        }
    }

    /// Answer one question for `user_id`
    pub async fn ask(&self, user_id: &str, request: &AskRequest) -> Result<AskResponse, PipelineError> {
        self.ask_at(user_id, request, Utc::now()).await
    }

    /// `ask` with an explicit clock, used to resolve "today" and "yesterday"
    pub async fn ask_at(
        &self,
        user_id: &str,
        request: &AskRequest,
        now: DateTime<Utc>,
    ) -> Result<AskResponse, PipelineError> {
        let started = Instant::now();
        check_request(request)?;
        let question = request.question.trim();

        let scope = self.load_scope(user_id, question, request, now).await?;
        let summary = summarize(&scope.working_set);
        tracing::info!(
            "Selection: {} ({} of {} games)",
            scope.selection.describe(),
            scope.working_set.len(),
            scope.all_games.len()
        );

        let input = TierInput {
            question,
            user_id,
            scope: &scope,
            summary: &summary,
            config: &self.config,
        };

        let policy = self.config.routing;
        let mut errors: Vec<(Tier, TierError)> = Vec::new();
        let mut tier = first_tier(policy, question);

        let answered = loop {
            if tier == Tier::Offline {
                break None;
            }
            tracing::debug!("Trying {} tier", tier);
            match self.run_online(tier, &input).await {
                Ok(raw) => break Some((tier, raw)),
                Err(e) => {
                    tracing::warn!("{} tier failed: {}", tier, e);
                    errors.push((tier, e));
                    match next_tier(policy, tier, TierOutcome::Failed) {
                        Transition::Next(next) => tier = next,
                        Transition::Done => break None,
                    }
                }
            }
        };

        let response = match answered {
            Some((tier, raw)) => {
                let answer = process(&raw, question, tier);
                tracing::info!("Answered by {} tier in {:?}", tier, started.elapsed());
                AskResponse::Answered {
                    meta: meta_string(&self.config, tier.as_str(), started.elapsed()),
                    answer,
                }
            }
            None => {
                let result = offline::answer(question, &scope.selection, &summary);
                let offline_answer = process(&result.text, question, Tier::Offline);
                tracing::info!(
                    "Online tiers failed ({}), answered offline with rule {:?}",
                    errors.len(),
                    result.rule
                );
                AskResponse::Degraded {
                    online_error: online_error(&errors, self.config.debug_errors),
                    offline_meta: meta_string(&self.config, Tier::Offline.as_str(), started.elapsed()),
                    offline_answer,
                    offline_note: OFFLINE_NOTE.to_string(),
                }
            }
        };

        log_answer(self.log.as_ref(), question, response.text()).await;
        Ok(response)
    }

    async fn load_scope(
        &self,
        user_id: &str,
        question: &str,
        request: &AskRequest,
        now: DateTime<Utc>,
    ) -> Result<ResolvedScope, PipelineError> {
        let timeout = Duration::from_secs(self.config.query_timeout_secs);
        let data_error = |e: anyhow::Error| PipelineError::DataAccess(format!("{:#}", e));
        let timed_out = |_| PipelineError::DataAccess("timed out loading games".to_string());

        let games = tokio::time::timeout(timeout, self.data.fetch_games(user_id, None))
            .await
            .map_err(timed_out)?
            .map_err(data_error)?;
        let sessions = tokio::time::timeout(timeout, self.data.fetch_sessions(user_id))
            .await
            .map_err(timed_out)?
            .map_err(data_error)?;

        let known_names: Vec<String> = sessions
            .iter()
            .filter_map(|s| s.name.as_deref().map(str::trim))
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();

        let offset = request.timezone_offset_minutes;
        let filters = extract_filters(question, &known_names, local_today(now, offset));
        tracing::debug!("Extracted filters: {:?}", filters);

        Ok(resolve(games, &sessions, &filters, offset, request.game_id.as_deref()))
    }

    async fn run_online(&self, tier: Tier, input: &TierInput<'_>) -> Result<String, TierError> {
        match tier {
            Tier::Sql => sql_tier::answer(self.engine.as_ref(), self.data.as_ref(), input).await,
            Tier::Context => context_tier::answer(self.engine.as_ref(), input).await,
            Tier::Offline => Err(TierError::Deferred),
        }
    }
}
