//! Graph executor: drives one job through the staged graph with a
//! bounded reflection loop.
//!
//! Shape of one pass: ingest (decompose + retrieve), clear derived
//! fields, fan out analysis and insight, verify, synthesize, then the
//! quality gate decides accept / accept-with-disclaimer / refine. The
//! back-edge to ingestion is refused once the iteration budget is spent,
//! so termination is structural rather than a property of the scores.
//! The synthesized report is held as a draft and committed to state only
//! when the gate accepts, keeping the set-once report field honest
//! across refinement passes.

use crate::collaborators::ArtifactStore;
use crate::pipeline::gate::{GateDecision, QualityGate};
use crate::pipeline::group::FanOutGroup;
use crate::stages::Stage;
use crate::state::{ResearchState, StateDelta};
use crate::types::{AppError, Report, Result, RouteDecision};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Where a job currently is, surfaced through the progress callback and
/// the job manager's status view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Queued,
    Ingesting,
    Analyzing,
    Verifying,
    Synthesizing,
    GateEvaluating,
    Refining,
    Completed,
    Failed,
}

pub type ProgressFn = Arc<dyn Fn(PipelinePhase, &ResearchState) + Send + Sync>;

pub struct GraphExecutor {
    intake: Arc<dyn Stage>,
    decompose: Arc<dyn Stage>,
    retrieve: Arc<dyn Stage>,
    analysis: FanOutGroup,
    verify: Arc<dyn Stage>,
    report: Arc<dyn Stage>,
    gate: QualityGate,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    progress: Option<ProgressFn>,
}

impl GraphExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        intake: Arc<dyn Stage>,
        decompose: Arc<dyn Stage>,
        retrieve: Arc<dyn Stage>,
        analysis: FanOutGroup,
        verify: Arc<dyn Stage>,
        report: Arc<dyn Stage>,
        gate: QualityGate,
    ) -> Self {
        Self {
            intake,
            decompose,
            retrieve,
            analysis,
            verify,
            report,
            gate,
            artifacts: None,
            progress: None,
        }
    }

    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    fn phase(&self, phase: PipelinePhase, state: &ResearchState) {
        tracing::debug!(?phase, iteration = state.iteration, "pipeline phase");
        if let Some(progress) = &self.progress {
            progress(phase, state);
        }
    }

    /// Run a non-fanned stage and merge its delta. Critical stage errors
    /// propagate; an error from any other stage is demoted to an error
    /// entry, matching the fallback contract the stages themselves follow.
    async fn run_stage(&self, stage: &Arc<dyn Stage>, state: &mut ResearchState) -> Result<()> {
        match stage.execute(state).await {
            Ok(output) => state.apply(output.delta),
            Err(err) if stage.is_critical() => return Err(err),
            Err(err) => {
                tracing::warn!("stage '{}' failed: {err}", stage.name());
                state.errors.push(format!("{}: {err}", stage.name()));
            }
        }
        Ok(())
    }

    /// Persist the accepted report. Failure is logged and recorded but
    /// never fails the job.
    async fn persist_report(&self, job_id: Uuid, report: &Report, state: &mut ResearchState) {
        let Some(artifacts) = &self.artifacts else {
            return;
        };
        let bytes = match serde_json::to_vec_pretty(report) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!("report serialization failed: {err}");
                state.errors.push(format!("artifact: serialize: {err}"));
                return;
            }
        };
        if let Err(err) = artifacts.persist(job_id, "report.json", bytes).await {
            tracing::warn!("artifact persistence failed: {err}");
            state.errors.push(format!("artifact: persist: {err}"));
        }
    }

    /// Execute one job to completion. Returns the final state with the
    /// accepted report set, or the first critical error.
    pub async fn run(&self, job_id: Uuid, mut state: ResearchState) -> Result<ResearchState> {
        tracing::info!(%job_id, query = %state.original_query, "job started");

        if let Err(err) = self.run_stage(&self.intake, &mut state).await {
            self.phase(PipelinePhase::Failed, &state);
            return Err(err);
        }
        let route = state.route.unwrap_or(RouteDecision::NeedsSearch);

        loop {
            self.phase(PipelinePhase::Ingesting, &state);
            if route != RouteDecision::AnswerFromContext {
                self.run_stage(&self.decompose, &mut state).await?;
            }
            self.run_stage(&self.retrieve, &mut state).await?;

            // Derived fields are recomputed in full from the grown
            // source set each pass.
            state.clear_derived();

            self.phase(PipelinePhase::Analyzing, &state);
            let snapshot = Arc::new(state.clone());
            for delta in self.analysis.run(snapshot).await {
                state.apply(delta);
            }

            self.phase(PipelinePhase::Verifying, &state);
            self.run_stage(&self.verify, &mut state).await?;

            self.phase(PipelinePhase::Synthesizing, &state);
            let output = match self.report.execute(&state).await {
                Ok(output) => output,
                Err(err) => {
                    self.phase(PipelinePhase::Failed, &state);
                    return Err(err);
                }
            };
            let mut delta = output.delta;
            let draft = delta.report.take();
            state.apply(delta);

            self.phase(PipelinePhase::GateEvaluating, &state);
            let (breakdown, decision) = self.gate.evaluate(&state);
            state.quality_score = breakdown.total();

            match decision {
                GateDecision::Accept | GateDecision::AcceptWithDisclaimer => {
                    let mut report = draft.ok_or_else(|| AppError::Internal(
                        "synthesis produced no report".to_string(),
                    ))?;
                    if decision == GateDecision::AcceptWithDisclaimer {
                        report.low_confidence = true;
                    }
                    self.persist_report(job_id, &report, &mut state).await;
                    state.apply(StateDelta {
                        report: Some(report),
                        ..Default::default()
                    });
                    self.phase(PipelinePhase::Completed, &state);
                    tracing::info!(
                        %job_id,
                        score = state.quality_score,
                        iterations = state.iteration + 1,
                        "job completed"
                    );
                    return Ok(state);
                }
                GateDecision::Refine { follow_ups } => {
                    // Draft is discarded; the next pass synthesizes from
                    // richer evidence.
                    state.iteration += 1;
                    state.apply(StateDelta {
                        sub_queries: follow_ups,
                        ..Default::default()
                    });
                    self.phase(PipelinePhase::Refining, &state);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{CollabResult, CollaboratorError};
    use crate::pipeline::gate::QualityWeights;
    use crate::stages::StageOutput;
    use crate::types::{Claim, Polarity, Source, SourceCategory, Verdict, VerificationResult};
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    struct RouteStage(RouteDecision);

    #[async_trait]
    impl Stage for RouteStage {
        fn name(&self) -> &'static str {
            "intake"
        }
        fn is_critical(&self) -> bool {
            true
        }
        async fn execute(&self, _: &ResearchState) -> Result<StageOutput> {
            Ok(StageOutput::new(StateDelta {
                route: Some(self.0),
                ..Default::default()
            }))
        }
    }

    struct SubQueryStage;

    #[async_trait]
    impl Stage for SubQueryStage {
        fn name(&self) -> &'static str {
            "decompose"
        }
        async fn execute(&self, snapshot: &ResearchState) -> Result<StageOutput> {
            if !snapshot.sub_queries.is_empty() {
                return Ok(StageOutput::default());
            }
            Ok(StageOutput::new(StateDelta {
                sub_queries: vec!["angle".into()],
                ..Default::default()
            }))
        }
    }

    /// Emits one new source per pending sub-query.
    struct SourceStage {
        categories: Vec<SourceCategory>,
    }

    #[async_trait]
    impl Stage for SourceStage {
        fn name(&self) -> &'static str {
            "retrieve"
        }
        async fn execute(&self, snapshot: &ResearchState) -> Result<StageOutput> {
            let mut sources = Vec::new();
            for (i, q) in snapshot
                .sub_queries
                .iter()
                .filter(|q| !snapshot.is_covered(q))
                .enumerate()
            {
                let category = self.categories
                    [(snapshot.sources.len() + i) % self.categories.len()];
                sources.push(Source {
                    url: format!("https://s{}.com/{q}", snapshot.sources.len() + i),
                    title: q.clone(),
                    content: "content".into(),
                    category,
                    sub_query: q.clone(),
                    retrieved_at: Utc::now(),
                });
            }
            Ok(StageOutput::new(StateDelta {
                sources,
                ..Default::default()
            }))
        }
    }

    /// Two claims per source so depth scores full marks.
    struct ClaimStage;

    #[async_trait]
    impl Stage for ClaimStage {
        fn name(&self) -> &'static str {
            "analyze"
        }
        async fn execute(&self, snapshot: &ResearchState) -> Result<StageOutput> {
            let mut claims = Vec::new();
            for source in &snapshot.sources {
                for n in 0..2 {
                    claims.push(Claim::new(
                        format!("claim {n} from {}", source.url),
                        Polarity::Asserts,
                        vec![source.normalized_url()],
                    ));
                }
            }
            Ok(StageOutput::new(StateDelta {
                claims,
                ..Default::default()
            }))
        }
    }

    struct VerifyAll(Verdict);

    #[async_trait]
    impl Stage for VerifyAll {
        fn name(&self) -> &'static str {
            "verify"
        }
        async fn execute(&self, snapshot: &ResearchState) -> Result<StageOutput> {
            let fact_checks: HashMap<_, _> = snapshot
                .claims
                .iter()
                .map(|c| {
                    (
                        c.id.clone(),
                        VerificationResult {
                            claim_id: c.id.clone(),
                            confidence: 0.9,
                            verdict: self.0,
                            source_count: c.source_ids.len(),
                            authority_scores: vec![0.7],
                        },
                    )
                })
                .collect();
            Ok(StageOutput::new(StateDelta {
                fact_checks,
                ..Default::default()
            }))
        }
    }

    struct DraftStage;

    #[async_trait]
    impl Stage for DraftStage {
        fn name(&self) -> &'static str {
            "report"
        }
        fn is_critical(&self) -> bool {
            true
        }
        async fn execute(&self, snapshot: &ResearchState) -> Result<StageOutput> {
            Ok(StageOutput::new(StateDelta {
                report: Some(Report {
                    title: format!("draft at iteration {}", snapshot.iteration),
                    executive_summary: "summary".into(),
                    key_findings: vec![],
                    contradictions_and_gaps: String::new(),
                    insights_and_trends: String::new(),
                    source_reliability: String::new(),
                    methodology_note: String::new(),
                    sources_cited: vec![],
                    follow_up_queries: vec![],
                    low_confidence: false,
                    generated_at: Utc::now(),
                }),
                ..Default::default()
            }))
        }
    }

    struct RejectingIntake;

    #[async_trait]
    impl Stage for RejectingIntake {
        fn name(&self) -> &'static str {
            "intake"
        }
        fn is_critical(&self) -> bool {
            true
        }
        async fn execute(&self, _: &ResearchState) -> Result<StageOutput> {
            Err(AppError::CriticalStage {
                stage: "intake".into(),
                message: "query is empty".into(),
            })
        }
    }

    struct RecordingStore {
        persisted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArtifactStore for RecordingStore {
        async fn persist(&self, _job: Uuid, name: &str, _bytes: Vec<u8>) -> CollabResult<()> {
            self.persisted.lock().push(name.to_string());
            Ok(())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl ArtifactStore for FailingStore {
        async fn persist(&self, _: Uuid, _: &str, _: Vec<u8>) -> CollabResult<()> {
            Err(CollaboratorError::Network("disk gone".into()))
        }
    }

    fn executor(threshold: f64, categories: Vec<SourceCategory>) -> GraphExecutor {
        GraphExecutor::new(
            Arc::new(RouteStage(RouteDecision::NeedsSearch)),
            Arc::new(SubQueryStage),
            Arc::new(SourceStage { categories }),
            FanOutGroup::new("analysis", vec![Arc::new(ClaimStage)], Duration::from_secs(5)),
            Arc::new(VerifyAll(Verdict::Supported)),
            Arc::new(DraftStage),
            QualityGate::new(threshold, QualityWeights::default()),
        )
    }

    #[tokio::test]
    async fn test_accepts_and_commits_report() {
        let store = Arc::new(RecordingStore {
            persisted: Mutex::new(vec![]),
        });
        let exec = executor(50.0, vec![SourceCategory::Academic])
            .with_artifacts(store.clone());

        let state = exec
            .run(Uuid::new_v4(), ResearchState::new("q", 2))
            .await
            .unwrap();
        let report = state.report.unwrap();
        assert!(!report.low_confidence);
        assert_eq!(state.iteration, 0);
        assert!(state.quality_score >= 50.0);
        assert_eq!(*store.persisted.lock(), vec!["report.json".to_string()]);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_accepts_with_disclaimer() {
        // Single category keeps diversity low enough to stay under an
        // unreachable threshold, forcing refinement to the budget edge.
        let exec = executor(99.0, vec![SourceCategory::Other]);
        let state = exec
            .run(Uuid::new_v4(), ResearchState::new("q", 2))
            .await
            .unwrap();
        let report = state.report.unwrap();
        assert!(report.low_confidence);
        assert_eq!(state.iteration, 2);
        // refinement appended follow-ups beyond the initial decomposition
        assert!(state.sub_queries.len() > 1);
    }

    #[tokio::test]
    async fn test_report_committed_only_once() {
        let exec = executor(99.0, vec![SourceCategory::Other]);
        let state = exec
            .run(Uuid::new_v4(), ResearchState::new("q", 2))
            .await
            .unwrap();
        // no set-once rejections were logged despite three synth passes
        assert!(!state.errors.iter().any(|e| e.contains("already set")));
        // the committed draft is the last pass's
        assert_eq!(
            state.report.unwrap().title,
            "draft at iteration 2"
        );
    }

    #[tokio::test]
    async fn test_intake_failure_fails_job() {
        let exec = GraphExecutor::new(
            Arc::new(RejectingIntake),
            Arc::new(SubQueryStage),
            Arc::new(SourceStage {
                categories: vec![SourceCategory::Other],
            }),
            FanOutGroup::new("analysis", vec![Arc::new(ClaimStage)], Duration::from_secs(5)),
            Arc::new(VerifyAll(Verdict::Supported)),
            Arc::new(DraftStage),
            QualityGate::new(0.0, QualityWeights::default()),
        );
        let result = exec.run(Uuid::new_v4(), ResearchState::new("", 2)).await;
        assert!(matches!(result, Err(AppError::CriticalStage { .. })));
    }

    #[tokio::test]
    async fn test_artifact_failure_does_not_fail_job() {
        let exec = executor(50.0, vec![SourceCategory::Academic])
            .with_artifacts(Arc::new(FailingStore));
        let state = exec
            .run(Uuid::new_v4(), ResearchState::new("q", 2))
            .await
            .unwrap();
        assert!(state.report.is_some());
        assert!(state.errors.iter().any(|e| e.contains("artifact")));
    }

    #[tokio::test]
    async fn test_progress_phases_observed() {
        let phases = Arc::new(Mutex::new(Vec::new()));
        let sink = phases.clone();
        let exec = executor(50.0, vec![SourceCategory::Academic]).with_progress(Arc::new(
            move |phase, _| {
                sink.lock().push(phase);
            },
        ));
        exec.run(Uuid::new_v4(), ResearchState::new("q", 2))
            .await
            .unwrap();
        let seen = phases.lock().clone();
        assert_eq!(seen.first(), Some(&PipelinePhase::Ingesting));
        assert_eq!(seen.last(), Some(&PipelinePhase::Completed));
        assert!(seen.contains(&PipelinePhase::GateEvaluating));
    }
}
