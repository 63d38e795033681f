//! Quality gate: scores the merged state and decides accept vs. refine.
//!
//! The score is a pure function of the current state — recomputed each
//! pass, never accumulated. Five sub-scores are normalized to their caps
//! and summed to 0-100. The weights mirror the surveyed systems' policy
//! (25/20/25/15/15) but are configuration, not law.

use crate::state::ResearchState;
use crate::types::{SourceCategory, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Maximum contribution of each sub-score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityWeights {
    pub coverage: f64,
    pub diversity: f64,
    pub verification: f64,
    pub depth: f64,
    pub coherence: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            coverage: 25.0,
            diversity: 20.0,
            verification: 25.0,
            depth: 15.0,
            coherence: 15.0,
        }
    }
}

/// Per-dimension sub-scores, each already scaled to its weight.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityBreakdown {
    pub coverage: f64,
    pub diversity: f64,
    pub verification: f64,
    pub depth: f64,
    pub coherence: f64,
}

impl QualityBreakdown {
    pub fn total(&self) -> f64 {
        (self.coverage + self.diversity + self.verification + self.depth + self.coherence)
            .clamp(0.0, 100.0)
    }

    /// Name of the weakest dimension, relative to its cap.
    pub fn weakest(&self, weights: &QualityWeights) -> Dimension {
        let ratios = [
            (Dimension::Coverage, self.coverage / weights.coverage.max(1.0)),
            (Dimension::Diversity, self.diversity / weights.diversity.max(1.0)),
            (
                Dimension::Verification,
                self.verification / weights.verification.max(1.0),
            ),
            (Dimension::Depth, self.depth / weights.depth.max(1.0)),
            (Dimension::Coherence, self.coherence / weights.coherence.max(1.0)),
        ];
        ratios
            .into_iter()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(d, _)| d)
            .unwrap_or(Dimension::Coverage)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Coverage,
    Diversity,
    Verification,
    Depth,
    Coherence,
}

/// Compute the quality breakdown for a state. Pure: identical states
/// always score identically.
pub fn score(state: &ResearchState, weights: &QualityWeights) -> QualityBreakdown {
    // coverage: fraction of sub-queries with at least one attributed source
    let coverage = if state.sub_queries.is_empty() {
        if state.sources.is_empty() {
            0.0
        } else {
            // context-only route: evidence exists without decomposition
            weights.coverage
        }
    } else {
        let covered = state
            .sub_queries
            .iter()
            .filter(|q| state.is_covered(q))
            .count();
        weights.coverage * covered as f64 / state.sub_queries.len() as f64
    };

    // diversity: distinct categories, linear up to 4
    let categories: HashSet<SourceCategory> =
        state.sources.iter().map(|s| s.category).collect();
    let diversity = weights.diversity * (categories.len() as f64).min(4.0) / 4.0;

    // verification: fraction of claims with a settled verdict
    let verification = if state.claims.is_empty() {
        0.0
    } else {
        let settled = state
            .claims
            .iter()
            .filter(|c| {
                state
                    .fact_checks
                    .get(&c.id)
                    .map(|v| v.verdict != Verdict::Unverified)
                    .unwrap_or(false)
            })
            .count();
        weights.verification * settled as f64 / state.claims.len() as f64
    };

    // depth: claims per source beyond a baseline of 1, full marks at 2
    let depth = if state.sources.is_empty() {
        0.0
    } else {
        let ratio = state.claims.len() as f64 / state.sources.len() as f64;
        weights.depth * (ratio - 1.0).clamp(0.0, 1.0)
    };

    // coherence: inverse unresolved-contradiction ratio
    let coherence = if state.claims.is_empty() {
        0.0
    } else {
        let unresolved = state
            .contradictions
            .iter()
            .filter(|p| !is_resolved(state, p))
            .count();
        let ratio = unresolved as f64 / state.claims.len() as f64;
        weights.coherence * (1.0 - ratio).clamp(0.0, 1.0)
    };

    QualityBreakdown {
        coverage,
        diversity,
        verification,
        depth,
        coherence,
    }
}

/// A contradiction counts as resolved when verification settled exactly
/// one side as supported.
fn is_resolved(state: &ResearchState, pair: &crate::types::ContradictionPair) -> bool {
    let verdict = |id: &str| state.fact_checks.get(id).map(|v| v.verdict);
    let a = verdict(&pair.claim_a);
    let b = verdict(&pair.claim_b);
    matches!(
        (a, b),
        (Some(Verdict::Supported), Some(v)) if v != Verdict::Supported
    ) || matches!(
        (a, b),
        (Some(v), Some(Verdict::Supported)) if v != Verdict::Supported
    )
}

/// Gate decision for one pass.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Score cleared the threshold; job completes.
    Accept,
    /// Budget exhausted below threshold; job completes with a
    /// low-confidence disclaimer.
    AcceptWithDisclaimer,
    /// Loop back to ingestion with these follow-up sub-queries.
    Refine { follow_ups: Vec<String> },
}

/// The conditional node after synthesis.
#[derive(Debug, Clone)]
pub struct QualityGate {
    pub threshold: f64,
    pub weights: QualityWeights,
    /// How many follow-up queries a refine pass may add.
    pub max_follow_ups: usize,
}

impl QualityGate {
    pub fn new(threshold: f64, weights: QualityWeights) -> Self {
        Self {
            threshold,
            weights,
            max_follow_ups: 3,
        }
    }

    /// Evaluate the gate. Checked strictly in order: threshold, budget,
    /// refine. The executor refuses the back-edge once
    /// `iteration == max_iterations`, so termination is structural.
    pub fn evaluate(&self, state: &ResearchState) -> (QualityBreakdown, GateDecision) {
        let breakdown = score(state, &self.weights);
        let total = breakdown.total();

        if total >= self.threshold {
            tracing::info!(
                "quality gate passed: {total:.1} >= {:.1}",
                self.threshold
            );
            return (breakdown, GateDecision::Accept);
        }

        if state.iteration >= state.max_iterations {
            tracing::warn!(
                "quality gate: {total:.1} < {:.1} but iteration budget ({}) exhausted, accepting with disclaimer",
                self.threshold,
                state.max_iterations
            );
            return (breakdown, GateDecision::AcceptWithDisclaimer);
        }

        let follow_ups = self.derive_follow_ups(state, &breakdown);
        tracing::info!(
            "quality gate failed: {total:.1} < {:.1}, refining (iteration {}/{}) with {} follow-ups",
            self.threshold,
            state.iteration + 1,
            state.max_iterations,
            follow_ups.len()
        );
        (breakdown, GateDecision::Refine { follow_ups })
    }

    /// Derive follow-up sub-queries from the weakest dimension: uncovered
    /// sub-queries, missing source categories, or the strongest unresolved
    /// contradictions.
    fn derive_follow_ups(
        &self,
        state: &ResearchState,
        breakdown: &QualityBreakdown,
    ) -> Vec<String> {
        let mut follow_ups = Vec::new();

        match breakdown.weakest(&self.weights) {
            Dimension::Coverage => {
                for q in state.sub_queries.iter().filter(|q| !state.is_covered(q)) {
                    follow_ups.push(format!("{q} evidence and data"));
                }
            }
            Dimension::Diversity => {
                let present: HashSet<SourceCategory> =
                    state.sources.iter().map(|s| s.category).collect();
                for category in SourceCategory::all() {
                    if !present.contains(&category) {
                        follow_ups.push(format!(
                            "{} {} perspective",
                            state.original_query,
                            category.as_str()
                        ));
                    }
                }
            }
            Dimension::Coherence | Dimension::Verification => {
                let mut pairs = state.contradictions.clone();
                pairs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
                for pair in pairs {
                    let text = |id: &str| {
                        state
                            .claims
                            .iter()
                            .find(|c| c.id == id)
                            .map(|c| c.text.clone())
                    };
                    if let (Some(a), Some(b)) = (text(&pair.claim_a), text(&pair.claim_b)) {
                        follow_ups.push(format!("which is accurate: {a} or {b}"));
                    }
                }
            }
            Dimension::Depth => {
                follow_ups.push(format!(
                    "{} detailed analysis and statistics",
                    state.original_query
                ));
            }
        }

        if follow_ups.is_empty() {
            // Nothing specific to chase; broaden the original question.
            follow_ups.push(format!("{} additional evidence", state.original_query));
        }

        follow_ups.truncate(self.max_follow_ups);
        follow_ups
    }
}
