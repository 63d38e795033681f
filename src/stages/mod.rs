//! Pipeline stages.
//!
//! A stage is a named unit of work: read-only state snapshot in, delta
//! out. Stages that call collaborators route every call through the retry
//! wrapper and degrade to a fallback delta plus error strings when the
//! call exhausts its retries — failure is data, not control flow. Only
//! stages marked critical (intake validation, report synthesis) may
//! return an error, which fails the whole job.

pub mod analyze;
pub mod decompose;
pub mod insight;
pub mod intake;
pub mod report;
pub mod retrieve;
pub mod verify;

pub use analyze::AnalyzeStage;
pub use decompose::DecomposeStage;
pub use insight::InsightStage;
pub use intake::IntakeStage;
pub use report::ReportStage;
pub use retrieve::RetrieveStage;
pub use verify::VerifyStage;

use crate::collaborators::{with_cutoff, with_retry, CollabResult, Deadline, LanguageModel, RetryPolicy};
use crate::state::{ResearchState, StateDelta};
use crate::types::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// What a stage hands back to the executor.
#[derive(Debug, Default)]
pub struct StageOutput {
    pub delta: StateDelta,
}

impl StageOutput {
    pub fn new(delta: StateDelta) -> Self {
        Self { delta }
    }

    /// An empty delta carrying only an error string — the shape of every
    /// non-critical fallback.
    pub fn degraded(error: impl Into<String>) -> Self {
        Self {
            delta: StateDelta {
                errors: vec![error.into()],
                ..Default::default()
            },
        }
    }
}

/// A single unit of pipeline work.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Critical stages abort the job when they cannot produce even a
    /// fallback delta.
    fn is_critical(&self) -> bool {
        false
    }

    /// Execute against a read-only snapshot. The returned delta is a
    /// merge operand, never a replacement.
    async fn execute(&self, snapshot: &ResearchState) -> Result<StageOutput>;
}

/// One guarded structured-LLM call: per-call limit and job cutoff inside,
/// bounded retries outside.
pub(crate) async fn guarded_json(
    llm: &Arc<dyn LanguageModel>,
    policy: &RetryPolicy,
    timeout: Duration,
    deadline: Deadline,
    label: &str,
    system: &str,
    prompt: &str,
) -> CollabResult<serde_json::Value> {
    with_retry(policy, label, || {
        with_cutoff(timeout, deadline, llm.generate_json(system, prompt))
    })
    .await
}

/// String field access with a default, mirroring how the pipeline treats
/// model output: missing fields degrade, they never fail.
pub(crate) fn json_str(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn json_f64(value: &serde_json::Value, key: &str, default: f64) -> f64 {
    value.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}
