//! Insight stage: surface trends and hypotheses across the evidence.
//! Runs in parallel with analysis; insights are additive color for the
//! report, so failure here degrades to an empty delta.

use crate::collaborators::{Deadline, LanguageModel, RetryPolicy};
use crate::stages::{guarded_json, json_f64, json_str, Stage, StageOutput};
use crate::state::{ResearchState, StateDelta};
use crate::types::{Insight, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are a research strategist. From the sources, \
identify cross-cutting trends, hypotheses, and notable patterns the user \
should know about. Respond with JSON: {\"insights\": [{\"text\": \"...\", \
\"confidence\": 0.0, \"supporting_sources\": [\"...\"], \"reasoning\": \
\"...\"}]}.";

pub struct InsightStage {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    timeout: Duration,
    deadline: Deadline,
}

impl InsightStage {
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

    fn parse_insights(value: &serde_json::Value) -> Vec<Insight> {
        value
            .get("insights")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let text = json_str(item, "text");
                        if text.is_empty() {
                            return None;
                        }
                        let supporting_sources = item
                            .get("supporting_sources")
                            .and_then(|v| v.as_array())
                            .map(|urls| {
                                urls.iter()
                                    .filter_map(|u| u.as_str())
                                    .map(String::from)
                                    .collect()
                            })
                            .unwrap_or_default();
                        Some(Insight {
                            text,
                            confidence: json_f64(item, "confidence", 0.5).clamp(0.0, 1.0),
                            supporting_sources,
                            reasoning: json_str(item, "reasoning"),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Stage for InsightStage {
    fn name(&self) -> &'static str {
        "insight"
    }

    async fn execute(&self, snapshot: &ResearchState) -> Result<StageOutput> {
        if snapshot.sources.is_empty() {
            return Ok(StageOutput::default());
        }

        let sources_block: String = snapshot
            .sources
            .iter()
            .map(|s| format!("{}: {}", s.title, s.content))
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
            "insight",
            SYSTEM_PROMPT,
            &prompt,
        )
        .await
        {
            Ok(value) => {
                let insights = Self::parse_insights(&value);
                tracing::info!("generated {} insights", insights.len());
                Ok(StageOutput::new(StateDelta {
                    insights,
                    ..Default::default()
                }))
            }
            Err(err) => {
                tracing::warn!("insight generation failed: {err}");
                Ok(StageOutput::degraded(format!("insight: {err}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_insights() {
        let value = json!({"insights": [
            {"text": "trend", "confidence": 0.8, "supporting_sources": ["a.com"], "reasoning": "because"},
            {"text": "", "confidence": 0.9},
            {"text": "partial"},
        ]});
        let insights = InsightStage::parse_insights(&value);
        assert_eq!(insights.len(), 2);
        assert_eq!(insights[0].text, "trend");
        assert_eq!(insights[0].supporting_sources, vec!["a.com"]);
        assert_eq!(insights[1].confidence, 0.5);
    }

    #[test]
    fn test_parse_missing_field() {
        assert!(InsightStage::parse_insights(&json!({})).is_empty());
    }

    #[test]
    fn test_confidence_clamped() {
        let value = json!({"insights": [{"text": "t", "confidence": 3.5}]});
        let insights = InsightStage::parse_insights(&value);
        assert_eq!(insights[0].confidence, 1.0);
    }
}
