//! Resolves statement labels and payment purposes to plots.
//!
//! Resolution order: manual override, exact label or account number, then a
//! fuzzy score over street words (Jaro-Winkler) and the plot number.

use crate::models::{MatchCandidate, MatchReason, MatchStatus};
use crate::services::directory::{
    is_plot_number, label_tokens, normalize_number, PlotDirectory, PLOT_MARKERS, STREET_MARKERS,
};
use std::cmp::Ordering;
use uuid::Uuid;

const STREET_WEIGHT: f64 = 0.7;
const NUMBER_WEIGHT: f64 = 0.3;
/// Account numbers are long; short tokens are plot numbers or noise.
const MIN_ACCOUNT_TOKEN_LEN: usize = 5;

#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Minimum fuzzy score for an automatic match.
    pub auto_threshold: f64,
    /// Minimum score for a plot to be offered as a candidate.
    pub candidate_threshold: f64,
    /// Required lead of the best candidate over the runner-up.
    pub ambiguity_margin: f64,
    pub max_candidates: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            auto_threshold: 0.9,
            candidate_threshold: 0.5,
            ambiguity_margin: 0.05,
            max_candidates: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub status: MatchStatus,
    pub plot_id: Option<Uuid>,
    pub confidence: f64,
    pub reason: Option<MatchReason>,
    pub candidates: Vec<MatchCandidate>,
}

impl MatchResult {
    fn matched(plot_id: Uuid, reason: MatchReason) -> Self {
        Self {
            status: MatchStatus::Matched,
            plot_id: Some(plot_id),
            confidence: 1.0,
            reason: Some(reason),
            candidates: Vec::new(),
        }
    }

    fn unmatched(candidates: Vec<MatchCandidate>) -> Self {
        Self {
            status: MatchStatus::Unmatched,
            plot_id: None,
            confidence: candidates.first().map(|c| c.score).unwrap_or(0.0),
            reason: None,
            candidates,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.status == MatchStatus::Matched
    }
}

/// Plot number and street words pulled out of free text.
#[derive(Debug, Default, PartialEq)]
struct ParsedLabel {
    number: Option<String>,
    words: Vec<String>,
}

fn parse_label(text: &str) -> ParsedLabel {
    let mut parsed = ParsedLabel::default();
    let mut after_marker = false;
    let mut number_from_marker = false;

    for token in label_tokens(text) {
        if PLOT_MARKERS.contains(&token.as_str()) {
            after_marker = true;
            continue;
        }
        if STREET_MARKERS.contains(&token.as_str()) {
            after_marker = false;
            continue;
        }
        if is_plot_number(&token) {
            if after_marker && !number_from_marker {
                parsed.number = Some(normalize_number(&token));
                number_from_marker = true;
            } else if parsed.number.is_none() && !looks_like_year(&token) {
                parsed.number = Some(normalize_number(&token));
            }
            after_marker = false;
            continue;
        }
        after_marker = false;
        if token.chars().count() >= 3 && token.chars().all(char::is_alphabetic) {
            parsed.words.push(token);
        }
    }

    parsed
}

fn looks_like_year(token: &str) -> bool {
    token.len() == 4
        && token
            .parse::<u32>()
            .map(|y| (1990..=2100).contains(&y))
            .unwrap_or(false)
}

/// How well the label words cover the plot's street name, 0..=1.
fn street_similarity(street: &str, words: &[String]) -> f64 {
    let street_tokens: Vec<String> = label_tokens(street)
        .into_iter()
        .filter(|t| !STREET_MARKERS.contains(&t.as_str()))
        .collect();

    if street_tokens.is_empty() {
        return 1.0;
    }
    // No street words in the label: neither evidence for nor against.
    if words.is_empty() {
        return 0.5;
    }

    let total: f64 = street_tokens
        .iter()
        .map(|s| {
            words
                .iter()
                .map(|w| strsim::jaro_winkler(s, w))
                .fold(0.0, f64::max)
        })
        .sum();
    total / street_tokens.len() as f64
}

fn by_score_then_label(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.label.cmp(&b.label))
        .then_with(|| a.plot_id.cmp(&b.plot_id))
}

/// Resolve `label` against the directory. A `manual_plot` that exists in
/// the directory always wins.
pub fn match_label(
    directory: &PlotDirectory,
    label: &str,
    manual_plot: Option<Uuid>,
    config: &MatcherConfig,
) -> MatchResult {
    if let Some(plot_id) = manual_plot {
        if directory.contains(&plot_id) {
            return MatchResult::matched(plot_id, MatchReason::Manual);
        }
        tracing::warn!(plot_id = %plot_id, "Manual plot override not found in directory");
        return MatchResult::unmatched(Vec::new());
    }

    if label.trim().is_empty() || directory.is_empty() {
        return MatchResult::unmatched(Vec::new());
    }

    if let Some(plot) = directory.find_by_label(label) {
        return MatchResult::matched(plot.plot_id, MatchReason::Auto);
    }

    let account_hit = label
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|t| t.chars().count() >= MIN_ACCOUNT_TOKEN_LEN)
        .find_map(|t| directory.find_by_account(t));
    if let Some(plot) = account_hit {
        return MatchResult::matched(plot.plot_id, MatchReason::Auto);
    }

    let parsed = parse_label(label);

    // A bare number is enough when no other plot shares it.
    if parsed.words.is_empty() {
        if let Some(ref number) = parsed.number {
            let same_number: Vec<_> = directory
                .plots()
                .filter(|p| &normalize_number(&p.number) == number)
                .collect();
            if same_number.len() == 1 {
                return MatchResult::matched(same_number[0].plot_id, MatchReason::Auto);
            }
        }
    }

    let mut scored: Vec<(MatchCandidate, bool)> = directory
        .plots()
        .map(|plot| {
            let number_equal = parsed
                .number
                .as_ref()
                .map(|n| *n == normalize_number(&plot.number))
                .unwrap_or(false);
            let street = street_similarity(&plot.street, &parsed.words);
            let score = STREET_WEIGHT * street + if number_equal { NUMBER_WEIGHT } else { 0.0 };
            (
                MatchCandidate {
                    plot_id: plot.plot_id,
                    label: plot.label(),
                    score: (score * 1000.0).round() / 1000.0,
                },
                number_equal,
            )
        })
        .collect();
    scored.sort_by(|a, b| by_score_then_label(&a.0, &b.0));

    if let Some((best, number_equal)) = scored.first() {
        let runner_up = scored.get(1).map(|(c, _)| c.score).unwrap_or(0.0);
        if *number_equal
            && best.score >= config.auto_threshold
            && best.score - runner_up >= config.ambiguity_margin
        {
            return MatchResult::matched(best.plot_id, MatchReason::Auto);
        }
    }

    let candidates = scored
        .into_iter()
        .map(|(c, _)| c)
        .filter(|c| c.score >= config.candidate_threshold)
        .take(config.max_candidates)
        .collect();
    MatchResult::unmatched(candidates)
}
