//! Answer Tier Routing
//!
//! The fallback policy as data: which tier runs first for a question, and where
//! to go after a tier answers or fails. No I/O happens here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three answering strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Sql,
    Context,
    Offline,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Sql => "sql",
            Tier::Context => "context",
            Tier::Offline => "offline",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured tier ordering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingPolicy {
    /// Generated query only
    Sql,
    /// Context answering only
    Context,
    /// Generated query first, context answering if that yields nothing usable
    #[default]
    Mix,
    /// Legacy keyword routing: one online tier picked from the wording
    Auto,
}

impl RoutingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingPolicy::Sql => "sql",
            RoutingPolicy::Context => "context",
            RoutingPolicy::Mix => "mix",
            RoutingPolicy::Auto => "auto",
        }
    }
}

impl FromStr for RoutingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sql" => Ok(RoutingPolicy::Sql),
            "context" => Ok(RoutingPolicy::Context),
            "mix" | "mixed" | "both" => Ok(RoutingPolicy::Mix),
            "auto" | "keyword" | "keywords" => Ok(RoutingPolicy::Auto),
            other => Err(format!("unknown routing policy '{}'", other)),
        }
    }
}

/// Result of running one tier, as seen by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierOutcome {
    Answered,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Next(Tier),
    Done,
}

/// Coaching and advice language, answered better from raw context
const COACHING_KEYWORDS: &[&str] = &[
    "advice",
    "tip",
    "tips",
    "improve",
    "improving",
    "better",
    "should i",
    "how can i",
    "how do i",
    "help me",
    "coach",
    "practice",
    "why do i",
    "why am i",
    "what am i doing wrong",
    "consistent",
    "technique",
];

/// Quantitative language, answered by a generated query
const QUANTITATIVE_KEYWORDS: &[&str] = &[
    "average",
    "avg",
    "how many",
    "count",
    "total",
    "sum",
    "highest",
    "lowest",
    "best",
    "worst",
    "max",
    "min",
    "rate",
    "percent",
    "percentage",
    "how often",
    "number of",
];

/// Whole-word (or whole-phrase) match on already lowercased text
pub(crate) fn contains_keyword(text: &str, keyword: &str) -> bool {
    text.match_indices(keyword).any(|(i, _)| {
        let before = text[..i].chars().next_back();
        let after = text[i + keyword.len()..].chars().next();
        before.map_or(true, |c| !c.is_alphanumeric()) && after.map_or(true, |c| !c.is_alphanumeric())
    })
}

/// Legacy heuristic: coaching language goes to Context, everything else to Sql
pub fn classify_question(question: &str) -> Tier {
    let t = question.to_lowercase();
    let coaching = COACHING_KEYWORDS.iter().filter(|k| contains_keyword(&t, k)).count();
    let quantitative = QUANTITATIVE_KEYWORDS.iter().filter(|k| contains_keyword(&t, k)).count();

    if coaching > quantitative {
        Tier::Context
    } else {
        Tier::Sql
    }
}

/// The tier a request starts in
pub fn first_tier(policy: RoutingPolicy, question: &str) -> Tier {
    match policy {
        RoutingPolicy::Sql | RoutingPolicy::Mix => Tier::Sql,
        RoutingPolicy::Context => Tier::Context,
        RoutingPolicy::Auto => classify_question(question),
    }
}

/// Where to go after `current` finishes with `outcome`
pub fn next_tier(policy: RoutingPolicy, current: Tier, outcome: TierOutcome) -> Transition {
    if outcome == TierOutcome::Answered {
        return Transition::Done;
    }

    match (policy, current) {
        (_, Tier::Offline) => Transition::Done,
        (RoutingPolicy::Mix, Tier::Sql) => Transition::Next(Tier::Context),
        (_, Tier::Sql) | (_, Tier::Context) => Transition::Next(Tier::Offline),
    }
}

/// Every tier a request would visit if all online tiers fail
pub fn fallback_chain(policy: RoutingPolicy, question: &str) -> Vec<Tier> {
    let mut chain = vec![first_tier(policy, question)];
    while let Transition::Next(tier) = next_tier(policy, chain[chain.len() - 1], TierOutcome::Failed) {
        chain.push(tier);
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_str() {
        assert_eq!("SQL".parse::<RoutingPolicy>().unwrap(), RoutingPolicy::Sql);
        assert_eq!("mix".parse::<RoutingPolicy>().unwrap(), RoutingPolicy::Mix);
        assert_eq!("auto".parse::<RoutingPolicy>().unwrap(), RoutingPolicy::Auto);
        assert!("graphql".parse::<RoutingPolicy>().is_err());
    }

    #[test]
    fn test_fallback_chains() {
        let q = "What's my average?";
        assert_eq!(
            fallback_chain(RoutingPolicy::Mix, q),
            vec![Tier::Sql, Tier::Context, Tier::Offline]
        );
        assert_eq!(fallback_chain(RoutingPolicy::Sql, q), vec![Tier::Sql, Tier::Offline]);
        assert_eq!(
            fallback_chain(RoutingPolicy::Context, q),
            vec![Tier::Context, Tier::Offline]
        );
    }

    #[test]
    fn test_answered_is_terminal() {
        for policy in [RoutingPolicy::Sql, RoutingPolicy::Context, RoutingPolicy::Mix, RoutingPolicy::Auto] {
            for tier in [Tier::Sql, Tier::Context, Tier::Offline] {
                assert_eq!(next_tier(policy, tier, TierOutcome::Answered), Transition::Done);
            }
            assert_eq!(next_tier(policy, Tier::Offline, TierOutcome::Failed), Transition::Done);
        }
    }

    #[test]
    fn test_mix_context_failure_goes_offline() {
        assert_eq!(
            next_tier(RoutingPolicy::Mix, Tier::Context, TierOutcome::Failed),
            Transition::Next(Tier::Offline)
        );
    }

    #[test]
    fn test_classify_question_legacy() {
        assert_eq!(classify_question("How can I improve my spare shooting?"), Tier::Context);
        assert_eq!(classify_question("What's my average on games 3 to 7?"), Tier::Sql);
        assert_eq!(classify_question("How often do I strike on frame 9?"), Tier::Sql);
        // "tip" must not match inside "multiple"
        assert_eq!(classify_question("multiple games"), Tier::Sql);
    }

    #[test]
    fn test_auto_policy_uses_classifier() {
        assert_eq!(first_tier(RoutingPolicy::Auto, "any tips for my release?"), Tier::Context);
        assert_eq!(
            fallback_chain(RoutingPolicy::Auto, "any tips for my release?"),
            vec![Tier::Context, Tier::Offline]
        );
        assert_eq!(first_tier(RoutingPolicy::Mix, "any tips for my release?"), Tier::Sql);
    }
}
