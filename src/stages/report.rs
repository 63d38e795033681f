//! Report stage: synthesize the accumulated evidence into the final
//! structured report.
//!
//! This stage is critical, but critical here means "a job without a
//! report is a failed job", not "the model must answer": when the model
//! call exhausts its retries a deterministic report is assembled from
//! state. The stage only errors when there is no evidence at all to
//! write about.

use crate::collaborators::{Deadline, LanguageModel, RetryPolicy};
use crate::stages::{guarded_json, json_f64, json_str, Stage, StageOutput};
use crate::state::{ResearchState, StateDelta};
use crate::types::{AppError, Citation, KeyFinding, Report, Result, Verdict};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const MAX_KEY_FINDINGS: usize = 6;
const MAX_CITATIONS: usize = 15;

const SYSTEM_PROMPT: &str = "You are a senior research writer. Synthesize the \
evidence into a structured report. Respond with JSON: {\"title\": \"...\", \
\"executive_summary\": \"...\", \"key_findings\": [{\"finding\": \"...\", \
\"confidence\": 0.0}], \"contradictions_and_gaps\": \"...\", \
\"insights_and_trends\": \"...\", \"source_reliability\": \"...\", \
\"follow_up_queries\": [\"...\"]}. Be factual; never invent evidence that \
is not in the input.";

pub struct ReportStage {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    timeout: Duration,
    deadline: Deadline,
}

impl ReportStage {
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

    fn citations(state: &ResearchState) -> Vec<Citation> {
        state
            .sources
            .iter()
            .take(MAX_CITATIONS)
            .map(|s| Citation {
                title: s.title.clone(),
                url: s.url.clone(),
            })
            .collect()
    }

    fn methodology_note(state: &ResearchState, degraded: bool) -> String {
        let mut note = format!(
            "Synthesized from {} sources across {} sub-queries over {} research pass(es); \
             {} claims extracted, {} fact-checked.",
            state.sources.len(),
            state.sub_queries.len(),
            state.iteration + 1,
            state.claims.len(),
            state.fact_checks.len(),
        );
        if degraded {
            note.push_str(" Narrative generation was unavailable; this report was assembled directly from the verified evidence.");
        }
        if !state.errors.is_empty() {
            note.push_str(&format!(
                " {} non-fatal errors occurred during research.",
                state.errors.len()
            ));
        }
        note
    }

    fn parse_report(value: &serde_json::Value, state: &ResearchState) -> Option<Report> {
        let executive_summary = json_str(value, "executive_summary");
        if executive_summary.is_empty() {
            return None;
        }
        let title = match json_str(value, "title") {
            t if t.is_empty() => format!("Research Report: {}", state.original_query),
            t => t,
        };
        let key_findings = value
            .get("key_findings")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let finding = json_str(item, "finding");
                        if finding.is_empty() {
                            return None;
                        }
                        Some(KeyFinding {
                            finding,
                            confidence: json_f64(item, "confidence", 0.5).clamp(0.0, 1.0),
                            sources_count: item
                                .get("sources_count")
                                .and_then(|v| v.as_u64())
                                .unwrap_or(0) as usize,
                        })
                    })
                    .take(MAX_KEY_FINDINGS)
                    .collect()
            })
            .unwrap_or_default();
        let follow_up_queries = value
            .get("follow_up_queries")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|q| q.as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Some(Report {
            title,
            executive_summary,
            key_findings,
            contradictions_and_gaps: json_str(value, "contradictions_and_gaps"),
            insights_and_trends: json_str(value, "insights_and_trends"),
            source_reliability: json_str(value, "source_reliability"),
            methodology_note: Self::methodology_note(state, false),
            sources_cited: Self::citations(state),
            follow_up_queries,
            low_confidence: false,
            generated_at: Utc::now(),
        })
    }

    /// Deterministic report assembled straight from state, used when the
    /// model cannot produce one.
    fn fallback_report(state: &ResearchState) -> Report {
        let mut ranked: Vec<(&str, f64, usize)> = state
            .claims
            .iter()
            .filter_map(|c| {
                let check = state.fact_checks.get(&c.id)?;
                if check.verdict == Verdict::Supported {
                    Some((c.text.as_str(), check.confidence, check.source_count))
                } else {
                    None
                }
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        let key_findings: Vec<KeyFinding> = ranked
            .into_iter()
            .take(MAX_KEY_FINDINGS)
            .map(|(text, confidence, sources_count)| KeyFinding {
                finding: text.to_string(),
                confidence,
                sources_count,
            })
            .collect();

        let uncovered: Vec<&str> = state
            .sub_queries
            .iter()
            .filter(|q| !state.is_covered(q))
            .map(String::as_str)
            .collect();
        let mut gaps = format!(
            "{} contradiction(s) detected among {} claims.",
            state.contradictions.len(),
            state.claims.len()
        );
        if !uncovered.is_empty() {
            gaps.push_str(&format!(
                " No sources were found for: {}.",
                uncovered.join("; ")
            ));
        }

        let insights_and_trends = if state.insights.is_empty() {
            "No cross-cutting insights were generated.".to_string()
        } else {
            state
                .insights
                .iter()
                .map(|i| format!("- {}", i.text))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let mut by_category: HashMap<&str, usize> = HashMap::new();
        for source in &state.sources {
            *by_category.entry(source.category.as_str()).or_insert(0) += 1;
        }
        let mut counts: Vec<(&str, usize)> = by_category.into_iter().collect();
        counts.sort();
        let source_reliability = format!(
            "Source mix: {}.",
            counts
                .iter()
                .map(|(cat, n)| format!("{n} {cat}"))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Report {
            title: format!("Research Report: {}", state.original_query),
            executive_summary: format!(
                "Research into \"{}\" gathered {} sources and extracted {} claims, {} of \
                 which were verified as supported.",
                state.original_query,
                state.sources.len(),
                state.claims.len(),
                key_findings.len()
            ),
            key_findings,
            contradictions_and_gaps: gaps,
            insights_and_trends,
            source_reliability,
            methodology_note: Self::methodology_note(state, true),
            sources_cited: Self::citations(state),
            follow_up_queries: Vec::new(),
            low_confidence: false,
            generated_at: Utc::now(),
        }
    }
}

#[async_trait]
impl Stage for ReportStage {
    fn name(&self) -> &'static str {
        "report"
    }

    fn is_critical(&self) -> bool {
        true
    }

    async fn execute(&self, snapshot: &ResearchState) -> Result<StageOutput> {
        if snapshot.sources.is_empty() && snapshot.claims.is_empty() {
            return Err(AppError::CriticalStage {
                stage: self.name().to_string(),
                message: "no evidence gathered; nothing to report".to_string(),
            });
        }

        let evidence = serde_json::json!({
            "query": snapshot.original_query,
            "sub_queries": snapshot.sub_queries,
            "sources": snapshot.sources.iter().map(|s| {
                serde_json::json!({"title": s.title, "url": s.url, "category": s.category.as_str(), "content": s.content})
            }).collect::<Vec<_>>(),
            "claims": snapshot.claims,
            "fact_checks": snapshot.fact_checks,
            "contradictions": snapshot.contradictions,
            "insights": snapshot.insights,
        });
        let prompt = format!("Evidence:\n{evidence}");

        let report = match guarded_json(
            &self.llm,
            &self.retry,
            self.timeout,
            self.deadline,
            "report",
            SYSTEM_PROMPT,
            &prompt,
        )
        .await
        {
            Ok(value) => match Self::parse_report(&value, snapshot) {
                Some(report) => report,
                None => {
                    tracing::warn!("model returned an unusable report, using fallback");
                    Self::fallback_report(snapshot)
                }
            },
            Err(err) => {
                tracing::warn!("report generation failed ({err}), using fallback");
                let report = Self::fallback_report(snapshot);
                return Ok(StageOutput::new(StateDelta {
                    report: Some(report),
                    errors: vec![format!("report: {err}")],
                    ..Default::default()
                }));
            }
        };

        tracing::info!(
            "report synthesized with {} key findings",
            report.key_findings.len()
        );
        Ok(StageOutput::new(StateDelta {
            report: Some(report),
            ..Default::default()
        }))
    }
}
