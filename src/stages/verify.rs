//! Verification stage: fact-check extracted claims.
//!
//! Claims are checked in a single batched model call; each verdict is
//! enriched with source counts and authority weights computed from the
//! snapshot. When the call exhausts its retries every claim degrades to
//! Unverified rather than failing the job.

use crate::collaborators::{Deadline, LanguageModel, RetryPolicy};
use crate::stages::{guarded_json, json_f64, json_str, Stage, StageOutput};
use crate::state::{ResearchState, StateDelta};
use crate::types::{Claim, Result, Source, Verdict, VerificationResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are a meticulous fact checker. For each claim, \
judge whether the provided sources support it. Respond with JSON: \
{\"verdicts\": [{\"claim_id\": \"...\", \"verdict\": \
\"supported|disputed|unverified\", \"confidence\": 0.0}]}. Include a verdict \
for every claim id given.";

pub struct VerifyStage {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    timeout: Duration,
    deadline: Deadline,
}

impl VerifyStage {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        retry: RetryPolicy,
        timeout: Duration,
        deadline: Deadline,
    ) -> Self {
        Self {
            llm,
            retry,
            timeout,
            deadline,
        }
    }

    /// Source support metrics for a claim, keyed by normalized URL.
    fn support_for(claim: &Claim, by_url: &HashMap<String, &Source>) -> (usize, Vec<f64>) {
        let authority: Vec<f64> = claim
            .source_ids
            .iter()
            .filter_map(|id| by_url.get(id))
            .map(|s| s.category.authority())
            .collect();
        (authority.len(), authority)
    }

    fn unverified(claim: &Claim, by_url: &HashMap<String, &Source>) -> VerificationResult {
        let (source_count, authority_scores) = Self::support_for(claim, by_url);
        VerificationResult {
            claim_id: claim.id.clone(),
            confidence: 0.0,
            verdict: Verdict::Unverified,
            source_count,
            authority_scores,
        }
    }

    fn parse_verdicts(value: &serde_json::Value) -> HashMap<String, (Verdict, f64)> {
        value
            .get("verdicts")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let claim_id = json_str(item, "claim_id");
                        if claim_id.is_empty() {
                            return None;
                        }
                        let verdict = Verdict::parse(&json_str(item, "verdict"));
                        let confidence = json_f64(item, "confidence", 0.0).clamp(0.0, 1.0);
                        Some((claim_id, (verdict, confidence)))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Stage for VerifyStage {
    fn name(&self) -> &'static str {
        "verify"
    }

    async fn execute(&self, snapshot: &ResearchState) -> Result<StageOutput> {
        if snapshot.claims.is_empty() {
            return Ok(StageOutput::default());
        }

        let by_url: HashMap<String, &Source> = snapshot
            .sources
            .iter()
            .map(|s| (s.normalized_url(), s))
            .collect();

        let claims_block: String = snapshot
            .claims
            .iter()
            .map(|c| format!("[{}] {}", c.id, c.text))
            .collect::<Vec<_>>()
            .join("\n");
        let sources_block: String = snapshot
            .sources
            .iter()
            .map(|s| format!("{} ({}): {}", s.url, s.category.as_str(), s.content))
            .collect::<Vec<_>>()
            .join("\n---\n");
        let prompt = format!("Claims:\n{claims_block}\n\nSources:\n{sources_block}");

        let mut fact_checks = HashMap::new();
        let mut errors = Vec::new();

        match guarded_json(
            &self.llm,
            &self.retry,
            self.timeout,
            self.deadline,
            "verify",
            SYSTEM_PROMPT,
            &prompt,
        )
        .await
        {
            Ok(value) => {
                let verdicts = Self::parse_verdicts(&value);
                for claim in &snapshot.claims {
                    let result = match verdicts.get(&claim.id) {
                        Some((verdict, confidence)) => {
                            let (source_count, authority_scores) =
                                Self::support_for(claim, &by_url);
                            VerificationResult {
                                claim_id: claim.id.clone(),
                                confidence: *confidence,
                                verdict: *verdict,
                                source_count,
                                authority_scores,
                            }
                        }
                        // the model skipped this claim
                        None => Self::unverified(claim, &by_url),
                    };
                    fact_checks.insert(claim.id.clone(), result);
                }
            }
            Err(err) => {
                tracing::warn!("fact-checking failed: {err}");
                for claim in &snapshot.claims {
                    fact_checks.insert(claim.id.clone(), Self::unverified(claim, &by_url));
                }
                errors.push(format!("verify: {err}"));
            }
        }

        let settled = fact_checks
            .values()
            .filter(|v| v.verdict != Verdict::Unverified)
            .count();
        tracing::info!("verified {settled}/{} claims", snapshot.claims.len());

        Ok(StageOutput::new(StateDelta {
            fact_checks,
            errors,
            ..Default::default()
        }))
    }
}
