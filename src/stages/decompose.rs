//! Decomposition stage: split the research question into atomic
//! sub-queries. On refinement passes the gate has already appended
//! follow-up queries, so this stage only fills the initial set.

use crate::collaborators::{Deadline, LanguageModel, RetryPolicy};
use crate::stages::{guarded_json, Stage, StageOutput};
use crate::state::{ResearchState, StateDelta};
use crate::types::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are a research query decomposer. Break the \
query into focused, atomic sub-queries that cover different angles of the \
topic. Respond with JSON: {\"sub_queries\": [\"...\", ...]}.";

pub struct DecomposeStage {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    timeout: Duration,
    deadline: Deadline,
    max_sub_queries: usize,
}

impl DecomposeStage {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        retry: RetryPolicy,
        timeout: Duration,
        deadline: Deadline,
        max_sub_queries: usize,
    ) -> Self {
        Self {
            llm,
            retry,
            timeout,
            deadline,
            max_sub_queries,
        }
    }

    fn parse_sub_queries(&self, value: &serde_json::Value) -> Vec<String> {
        value
            .get("sub_queries")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|q| q.as_str())
                    .map(|q| q.trim().to_string())
                    .filter(|q| !q.is_empty())
                    .take(self.max_sub_queries)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Stage for DecomposeStage {
    fn name(&self) -> &'static str {
        "decompose"
    }

    async fn execute(&self, snapshot: &ResearchState) -> Result<StageOutput> {
        // Refinement passes already carry gate-derived follow-ups.
        if snapshot.iteration > 0 && !snapshot.sub_queries.is_empty() {
            return Ok(StageOutput::default());
        }

        let prompt = format!(
            "Decompose into at most {} sub-queries:\n{}",
            self.max_sub_queries, snapshot.original_query
        );

        match guarded_json(
            &self.llm,
            &self.retry,
            self.timeout,
            self.deadline,
            "decompose",
            SYSTEM_PROMPT,
            &prompt,
        )
        .await
        {
            Ok(value) => {
                let mut sub_queries = self.parse_sub_queries(&value);
                if sub_queries.is_empty() {
                    sub_queries.push(snapshot.original_query.clone());
                }
                tracing::info!("decomposed query into {} sub-queries", sub_queries.len());
                Ok(StageOutput::new(StateDelta {
                    sub_queries,
                    ..Default::default()
                }))
            }
            Err(err) => {
                // Best-effort fallback: research the query as-is.
                tracing::warn!("decomposition failed ({err}), using original query");
                Ok(StageOutput::new(StateDelta {
                    sub_queries: vec![snapshot.original_query.clone()],
                    errors: vec![format!("decompose: {err}")],
                    ..Default::default()
                }))
            }
        }
    }
}
