//! Intake stage: query validation and routing.
//!
//! The only stage allowed to reject a job outright — an empty or oversized
//! query is a critical failure. Routing is an explicit tagged decision
//! consumed by the executor's switch, never keyword sniffing.

use crate::collaborators::{Deadline, LanguageModel, RetryPolicy};
use crate::stages::{guarded_json, json_str, Stage, StageOutput};
use crate::state::{ResearchState, StateDelta};
use crate::types::{AppError, Result, RouteDecision};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const MAX_QUERY_CHARS: usize = 2000;

const SYSTEM_PROMPT: &str = "You are a routing classifier for a research pipeline. \
Decide how a research query should be handled and respond with JSON: \
{\"route\": \"answer_from_context\" | \"needs_search\" | \"needs_attachment\"}. \
Choose answer_from_context only when the provided context documents fully \
answer the query. Choose needs_attachment when attachments are present and \
must be read. Otherwise choose needs_search.";

pub struct IntakeStage {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    timeout: Duration,
    deadline: Deadline,
}

impl IntakeStage {
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

    fn parse_route(raw: &str, has_context: bool) -> RouteDecision {
        let lowered = raw.trim().to_lowercase();
        if lowered.contains("answer_from_context") {
            RouteDecision::AnswerFromContext
        } else if lowered.contains("needs_attachment") {
            RouteDecision::NeedsAttachment
        } else if lowered.contains("needs_search") {
            RouteDecision::NeedsSearch
        } else if has_context {
            RouteDecision::NeedsAttachment
        } else {
            RouteDecision::NeedsSearch
        }
    }
}

#[async_trait]
impl Stage for IntakeStage {
    fn name(&self) -> &'static str {
        "intake"
    }

    fn is_critical(&self) -> bool {
        true
    }

    async fn execute(&self, snapshot: &ResearchState) -> Result<StageOutput> {
        let query = snapshot.original_query.trim();
        if query.is_empty() {
            return Err(AppError::CriticalStage {
                stage: self.name().to_string(),
                message: "query is empty".to_string(),
            });
        }
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(AppError::CriticalStage {
                stage: self.name().to_string(),
                message: format!("query exceeds {MAX_QUERY_CHARS} characters"),
            });
        }

        let has_context = !snapshot.context.is_empty();
        let context_names: Vec<&str> =
            snapshot.context.iter().map(|d| d.name.as_str()).collect();
        let prompt = format!(
            "Query: {query}\nAttached documents: {}",
            if context_names.is_empty() {
                "none".to_string()
            } else {
                context_names.join(", ")
            }
        );

        let route = match guarded_json(
            &self.llm,
            &self.retry,
            self.timeout,
            self.deadline,
            "intake.classify",
            SYSTEM_PROMPT,
            &prompt,
        )
        .await
        {
            Ok(value) => Self::parse_route(&json_str(&value, "route"), has_context),
            Err(err) => {
                // Classification is best-effort; search is the safe route.
                tracing::warn!("intake classification failed ({err}), defaulting route");
                let fallback = if has_context {
                    RouteDecision::NeedsAttachment
                } else {
                    RouteDecision::NeedsSearch
                };
                return Ok(StageOutput::new(StateDelta {
                    route: Some(fallback),
                    errors: vec![format!("intake: classification failed: {err}")],
                    ..Default::default()
                }));
            }
        };

        tracing::info!("intake routed query as {route:?}");
        Ok(StageOutput::new(StateDelta {
            route: Some(route),
            ..Default::default()
        }))
    }
}
