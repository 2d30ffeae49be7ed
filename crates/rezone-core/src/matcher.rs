//! Identity resolution: does an incoming observation describe a record we already hold?

use serde::Serialize;
use strsim::jaro_winkler;
use tracing::warn;
use uuid::Uuid;

use crate::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchRule {
    ApplicationId,
    Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Position of the chosen record in the collection that was searched.
    pub index: usize,
    pub rule: MatchRule,
    /// Other candidates that tied under the same rule and were passed over.
    pub ambiguous: Vec<Uuid>,
}

/// A record whose address resembles the incoming one without being equal to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearMiss {
    pub candidate_id: Uuid,
    pub candidate_address: String,
    pub incoming_address: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct MatcherConfig {
    pub review_threshold: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            review_threshold: 0.92,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdentityMatcher {
    config: MatcherConfig,
}

impl IdentityMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> MatcherConfig {
        self.config
    }

    /// Find the record `incoming` refers to, searching only its own `(type, city)` scope.
    ///
    /// Application id equality is tried first and wins even when addresses differ;
    /// normalized address equality is the fallback.
    pub fn find_match(&self, incoming: &Record, collection: &[Record]) -> Option<MatchOutcome> {
        if let Some(application_id) = incoming.application_id.as_deref() {
            let candidates = scoped_candidates(incoming, collection, |r| {
                r.application_id.as_deref() == Some(application_id)
            });
            if let Some(outcome) = pick(collection, candidates, MatchRule::ApplicationId) {
                return Some(outcome);
            }
        }

        let key = normalize_address(&incoming.address);
        if key.is_empty() {
            return None;
        }
        let candidates =
            scoped_candidates(incoming, collection, |r| normalize_address(&r.address) == key);
        pick(collection, candidates, MatchRule::Address)
    }

    /// In-scope records with similar but unequal normalized addresses, best first.
    pub fn near_misses(&self, incoming: &Record, collection: &[Record]) -> Vec<NearMiss> {
        let key = normalize_address(&incoming.address);
        if key.is_empty() {
            return Vec::new();
        }

        let mut misses = collection
            .iter()
            .filter(|r| in_scope(incoming, r))
            .filter_map(|r| {
                let other = normalize_address(&r.address);
                if other == key {
                    return None;
                }
                let similarity = jaro_winkler(&key, &other);
                (similarity >= self.config.review_threshold).then(|| NearMiss {
                    candidate_id: r.id,
                    candidate_address: r.address.clone(),
                    incoming_address: incoming.address.clone(),
                    similarity,
                })
            })
            .collect::<Vec<_>>();
        misses.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        misses
    }
}

/// Lowercase, turn punctuation into spaces and collapse whitespace.
pub fn normalize_address(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn in_scope(incoming: &Record, candidate: &Record) -> bool {
    candidate.record_type == incoming.record_type && candidate.city == incoming.city
}

fn scoped_candidates(
    incoming: &Record,
    collection: &[Record],
    predicate: impl Fn(&Record) -> bool,
) -> Vec<usize> {
    collection
        .iter()
        .enumerate()
        .filter(|(_, r)| in_scope(incoming, r) && predicate(r))
        .map(|(idx, _)| idx)
        .collect()
}

// Ties go to the most recently updated record, then to the earliest stored.
fn pick(collection: &[Record], candidates: Vec<usize>, rule: MatchRule) -> Option<MatchOutcome> {
    let mut best = *candidates.first()?;
    for &idx in &candidates[1..] {
        if collection[idx].update_date > collection[best].update_date {
            best = idx;
        }
    }

    let ambiguous = candidates
        .iter()
        .filter(|&&idx| idx != best)
        .map(|&idx| collection[idx].id)
        .collect::<Vec<_>>();
    if !ambiguous.is_empty() {
        warn!(
            chosen = %collection[best].id,
            ?rule,
            passed_over = ?ambiguous,
            "multiple records tie for one observation"
        );
    }

    Some(MatchOutcome {
        index: best,
        rule,
        ambiguous,
    })
}
