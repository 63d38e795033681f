//! Analysis stage: extract claims from sources and detect contradictions.
//!
//! Claim extraction goes through the model; contradiction detection is
//! purely algorithmic (token-signature similarity gated on polarity
//! conflict) so it is deterministic and symmetric by construction.

use crate::collaborators::{Deadline, LanguageModel, RetryPolicy};
use crate::stages::{guarded_json, json_str, Stage, StageOutput};
use crate::state::{ResearchState, StateDelta};
use crate::types::{normalize_url, Claim, ContradictionPair, Polarity, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are a critical research analyst. Extract the \
distinct factual claims made by the sources. Respond with JSON: \
{\"claims\": [{\"text\": \"...\", \"polarity\": \
\"increases|decreases|asserts|denies\", \"source_urls\": [\"...\"]}]}. \
Every claim must cite at least one source URL from the input.";

/// Words ignored when comparing claim propositions.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "by", "of", "to", "in", "on", "and", "or",
    "that", "this", "it", "its", "with", "for", "as", "at", "from",
];

/// Polarity markers excluded from the proposition signature so that
/// "X increases Y" and "X decreases Y" compare on the same subject.
const POLARITY_WORDS: &[&str] = &[
    "increases", "increase", "increased", "decreases", "decrease", "decreased", "not", "no",
    "never", "rises", "falls", "improves", "worsens", "higher", "lower", "more", "less",
];

pub struct AnalyzeStage {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    timeout: Duration,
    deadline: Deadline,
    /// Detection-confidence cutoff for flagging a pair.
    confidence_threshold: f64,
}

impl AnalyzeStage {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        retry: RetryPolicy,
        timeout: Duration,
        deadline: Deadline,
        confidence_threshold: f64,
    ) -> Self {
        Self {
            llm,
            retry,
            timeout,
            deadline,
            confidence_threshold,
        }
    }

    fn parse_claims(value: &serde_json::Value, known_urls: &HashSet<String>) -> Vec<Claim> {
        let Some(items) = value.get("claims").and_then(|v| v.as_array()) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                let text = json_str(item, "text");
                if text.is_empty() {
                    return None;
                }
                let polarity = Polarity::parse(&json_str(item, "polarity"));
                let source_ids: Vec<String> = item
                    .get("source_urls")
                    .and_then(|v| v.as_array())
                    .map(|urls| {
                        urls.iter()
                            .filter_map(|u| u.as_str())
                            .map(normalize_url)
                            .filter(|u| known_urls.contains(u))
                            .collect()
                    })
                    .unwrap_or_default();
                if source_ids.is_empty() {
                    // A claim citing nothing we retrieved is dropped.
                    return None;
                }
                Some(Claim::new(text, polarity, source_ids))
            })
            .collect()
    }
}

/// Proposition signature: lowercase content words with stopwords and
/// polarity markers removed.
fn signature(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '%')
        .filter(|w| !w.is_empty())
        .filter(|w| !STOPWORDS.contains(w))
        .filter(|w| !POLARITY_WORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// Flag claim pairs whose polarities conflict on the same proposition.
/// Symmetric and deduplicated by construction: pairs are visited once
/// (i < j) and stored with canonical id ordering.
pub fn detect_contradictions(claims: &[Claim], threshold: f64) -> Vec<ContradictionPair> {
    let signatures: Vec<HashSet<String>> =
        claims.iter().map(|c| signature(&c.text)).collect();

    let mut pairs = Vec::new();
    for i in 0..claims.len() {
        for j in (i + 1)..claims.len() {
            let (a, b) = (&claims[i], &claims[j]);
            // identical support can't contradict itself meaningfully
            if a.source_ids == b.source_ids {
                continue;
            }
            if !a.polarity.conflicts_with(&b.polarity) {
                continue;
            }
            let similarity = jaccard(&signatures[i], &signatures[j]);
            let confidence = similarity; // divergence is 1.0 for conflicting polarity
            if confidence > threshold {
                pairs.push(ContradictionPair::new(
                    a.id.clone(),
                    b.id.clone(),
                    confidence,
                ));
            }
        }
    }
    pairs
}

#[async_trait]
impl Stage for AnalyzeStage {
    fn name(&self) -> &'static str {
        "analyze"
    }

    async fn execute(&self, snapshot: &ResearchState) -> Result<StageOutput> {
        if snapshot.sources.is_empty() {
            return Ok(StageOutput::degraded("analyze: no sources to analyze"));
        }

        let sources_block: String = snapshot
            .sources
            .iter()
            .map(|s| format!("URL: {}\nTitle: {}\n{}\n", s.url, s.title, s.content))
            .collect::<Vec<_>>()
            .join("\n---\n");
        let prompt = format!(
            "Research question: {}\n\nSources:\n{sources_block}",
            snapshot.original_query
        );

        match guarded_json(
            &self.llm,
            &self.retry,
            self.timeout,
            self.deadline,
            "analyze",
            SYSTEM_PROMPT,
            &prompt,
        )
        .await
        {
            Ok(value) => {
                let claims = Self::parse_claims(&value, &snapshot.known_urls());
                let contradictions =
                    detect_contradictions(&claims, self.confidence_threshold);
                tracing::info!(
                    "extracted {} claims, {} contradictions",
                    claims.len(),
                    contradictions.len()
                );
                Ok(StageOutput::new(StateDelta {
                    claims,
                    contradictions,
                    ..Default::default()
                }))
            }
            Err(err) => {
                tracing::warn!("claim extraction failed: {err}");
                Ok(StageOutput::degraded(format!("analyze: {err}")))
            }
        }
    }
}
