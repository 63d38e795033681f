//! The accumulating research state for one job, and the delta type that
//! stages return.
//!
//! Stages never mutate the canonical state. They receive a read-only
//! snapshot and return a [`StateDelta`]; the executor applies deltas in a
//! single merge step between phases. `sources` and `sub_queries` only grow
//! across iterations; derived fields (claims, contradictions, fact checks,
//! insights) are cleared by the executor and recomputed from the current
//! sources on every pass.

use crate::types::{
    normalize_url, Claim, ContradictionPair, Insight, Report, RouteDecision, Source,
    VerificationResult,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// An uploaded or caller-supplied context document, parsed during intake
/// when the route demands it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextDocument {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// The canonical state threaded through the pipeline for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchState {
    /// The user's research question. Set once at job creation.
    pub original_query: String,
    /// Atomic sub-queries, append-only across iterations.
    pub sub_queries: Vec<String>,
    /// Retrieved sources, keyed by normalized URL, append-only.
    pub sources: Vec<Source>,
    /// Claims extracted this pass.
    pub claims: Vec<Claim>,
    /// Contradicting claim pairs detected this pass.
    pub contradictions: Vec<ContradictionPair>,
    /// Claim id -> verification result.
    pub fact_checks: HashMap<String, VerificationResult>,
    /// Insights generated this pass.
    pub insights: Vec<Insight>,
    /// The accepted report. Set once by the executor at gate acceptance.
    pub report: Option<Report>,
    /// Routing decision from intake.
    pub route: Option<RouteDecision>,
    /// Caller-supplied context documents.
    pub context: Vec<ContextDocument>,
    /// Current reflection-loop iteration, starting at 0.
    pub iteration: u32,
    /// Iteration budget, fixed at job start.
    pub max_iterations: u32,
    /// Latest gate score, 0-100.
    pub quality_score: f64,
    /// Accumulated non-fatal errors. Append-only.
    pub errors: Vec<String>,
}

impl ResearchState {
    pub fn new(query: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            original_query: query.into(),
            sub_queries: Vec::new(),
            sources: Vec::new(),
            claims: Vec::new(),
            contradictions: Vec::new(),
            fact_checks: HashMap::new(),
            insights: Vec::new(),
            report: None,
            route: None,
            context: Vec::new(),
            iteration: 0,
            max_iterations,
            quality_score: 0.0,
            errors: Vec::new(),
        }
    }

    /// Normalized URLs already present, for dedup checks in stages.
    pub fn known_urls(&self) -> HashSet<String> {
        self.sources.iter().map(|s| s.normalized_url()).collect()
    }

    /// Whether a sub-query has at least one attributed source.
    pub fn is_covered(&self, sub_query: &str) -> bool {
        self.sources.iter().any(|s| s.sub_query == sub_query)
    }

    /// Drop all derived fields before an analysis pass. They are
    /// recomputed in full from the current sources, never hand-patched.
    pub fn clear_derived(&mut self) {
        self.claims.clear();
        self.contradictions.clear();
        self.fact_checks.clear();
        self.insights.clear();
    }

    /// The single merge step. Applies a delta additively:
    /// - `sub_queries`: appended, deduplicated by exact text.
    /// - `sources`: appended, deduplicated by normalized URL, first wins.
    /// - `claims`/`insights`: concatenated, deduplicated by stable id.
    /// - `contradictions`: deduplicated by unordered pair identity.
    /// - `fact_checks`: map extend, first entry wins per claim id.
    /// - `report`: set once; a second set is rejected and logged.
    /// - `errors`: appended.
    ///
    /// Commutative and associative over the entity sets involved, so the
    /// merged result is independent of fan-out completion order.
    pub fn apply(&mut self, delta: StateDelta) {
        for q in delta.sub_queries {
            if !self.sub_queries.contains(&q) {
                self.sub_queries.push(q);
            }
        }

        let mut urls = self.known_urls();
        for source in delta.sources {
            let key = source.normalized_url();
            if urls.insert(key) {
                self.sources.push(source);
            }
        }

        let mut claim_ids: HashSet<String> =
            self.claims.iter().map(|c| c.id.clone()).collect();
        for claim in delta.claims {
            if claim_ids.insert(claim.id.clone()) {
                self.claims.push(claim);
            }
        }

        let mut pair_keys: HashSet<(String, String)> =
            self.contradictions.iter().map(|p| p.key()).collect();
        for pair in delta.contradictions {
            if pair_keys.insert(pair.key()) {
                self.contradictions.push(pair);
            }
        }

        for (claim_id, result) in delta.fact_checks {
            self.fact_checks.entry(claim_id).or_insert(result);
        }

        let mut insight_ids: HashSet<String> =
            self.insights.iter().map(|i| i.id()).collect();
        for insight in delta.insights {
            if insight_ids.insert(insight.id()) {
                self.insights.push(insight);
            }
        }

        if let Some(report) = delta.report {
            if self.report.is_some() {
                self.errors
                    .push("merge rejected: report is already set".to_string());
            } else {
                self.report = Some(report);
            }
        }

        if let Some(route) = delta.route {
            if self.route.is_some() {
                self.errors
                    .push("merge rejected: route is already set".to_string());
            } else {
                self.route = Some(route);
            }
        }

        self.errors.extend(delta.errors);
    }
}

/// A partial update to [`ResearchState`], returned by a stage and applied
/// by the executor. Every field is additive; absent fields leave the
/// state untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDelta {
    pub sub_queries: Vec<String>,
    pub sources: Vec<Source>,
    pub claims: Vec<Claim>,
    pub contradictions: Vec<ContradictionPair>,
    pub fact_checks: HashMap<String, VerificationResult>,
    pub insights: Vec<Insight>,
    pub report: Option<Report>,
    pub route: Option<RouteDecision>,
    pub errors: Vec<String>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self.sub_queries.is_empty()
            && self.sources.is_empty()
            && self.claims.is_empty()
            && self.contradictions.is_empty()
            && self.fact_checks.is_empty()
            && self.insights.is_empty()
            && self.report.is_none()
            && self.route.is_none()
            && self.errors.is_empty()
    }
}
