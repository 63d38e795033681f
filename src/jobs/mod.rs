//! Job lifecycle: submission, background execution, status, and results.
//!
//! The manager owns the job registry and wires a fresh executor per job
//! from the shared collaborators. Jobs run on spawned tasks under a
//! whole-job deadline; callers poll status and fetch results by id.
//! Terminal records never change again.

use crate::collaborators::{
    ArtifactStore, Deadline, DocumentParser, LanguageModel, SearchProvider,
};
use crate::pipeline::{FanOutGroup, GraphExecutor, PipelinePhase, QualityGate};
use crate::stages::{
    AnalyzeStage, DecomposeStage, InsightStage, IntakeStage, ReportStage, RetrieveStage,
    VerifyStage,
};
use crate::state::{ContextDocument, ResearchState};
use crate::types::{AppError, JobStatus, Report, Result};
use crate::utils::Config;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// The external capabilities one engine instance is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub llm: Arc<dyn LanguageModel>,
    pub search: Arc<dyn SearchProvider>,
    pub parser: Arc<dyn DocumentParser>,
    pub artifacts: Option<Arc<dyn ArtifactStore>>,
}

/// A research job submission.
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    pub query: String,
    pub context: Vec<ContextDocument>,
    /// Per-job override of the configured iteration budget.
    pub max_iterations: Option<u32>,
    /// Per-job override of the configured quality threshold.
    pub quality_threshold: Option<f64>,
}

impl JobRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub id: Uuid,
    pub status: JobStatus,
    pub phase: PipelinePhase,
    pub iteration: u32,
    pub quality_score: f64,
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Result of a finished (or not yet finished) job.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Pending,
    Completed {
        report: Report,
        quality_score: f64,
        error_count: usize,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone)]
struct JobRecord {
    status: JobStatus,
    phase: PipelinePhase,
    iteration: u32,
    quality_score: f64,
    errors: Vec<String>,
    report: Option<Report>,
    failure: Option<String>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    fn queued() -> Self {
        Self {
            status: JobStatus::Queued,
            phase: PipelinePhase::Queued,
            iteration: 0,
            quality_score: 0.0,
            errors: Vec::new(),
            report: None,
            failure: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

pub struct JobManager {
    config: Config,
    collaborators: Collaborators,
    jobs: Arc<RwLock<HashMap<Uuid, JobRecord>>>,
}

impl JobManager {
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn build_executor(&self, job_id: Uuid, threshold: f64, deadline: Deadline) -> GraphExecutor {
        let retry = self.config.retry_policy();
        let timeout = self.config.request_timeout();
        let llm = &self.collaborators.llm;

        let analysis = FanOutGroup::new(
            "analysis",
            vec![
                Arc::new(AnalyzeStage::new(
                    Arc::clone(llm),
                    retry.clone(),
                    timeout,
                    deadline,
                    self.config.contradiction_confidence,
                )),
                Arc::new(InsightStage::new(
                    Arc::clone(llm),
                    retry.clone(),
                    timeout,
                    deadline,
                )),
            ],
            // leave room for each member's own retries before cutting it off
            timeout * (self.config.retry_max_attempts + 1),
        );

        let mut executor = GraphExecutor::new(
            Arc::new(IntakeStage::new(
                Arc::clone(llm),
                retry.clone(),
                timeout,
                deadline,
            )),
            Arc::new(DecomposeStage::new(
                Arc::clone(llm),
                retry.clone(),
                timeout,
                deadline,
                self.config.max_sub_queries,
            )),
            Arc::new(RetrieveStage::new(
                Arc::clone(&self.collaborators.search),
                Arc::clone(&self.collaborators.parser),
                retry.clone(),
                timeout,
                deadline,
                self.config.max_search_results,
            )),
            analysis,
            Arc::new(VerifyStage::new(
                Arc::clone(llm),
                retry.clone(),
                timeout,
                deadline,
            )),
            Arc::new(ReportStage::new(Arc::clone(llm), retry, timeout, deadline)),
            QualityGate::new(threshold, self.config.weights.clone()),
        );

        if let Some(artifacts) = &self.collaborators.artifacts {
            executor = executor.with_artifacts(Arc::clone(artifacts));
        }

        let jobs = Arc::clone(&self.jobs);
        executor.with_progress(Arc::new(move |phase, state| {
            let mut jobs = jobs.write();
            if let Some(record) = jobs.get_mut(&job_id) {
                if record.status.is_terminal() {
                    return;
                }
                record.status = JobStatus::Running;
                record.phase = phase;
                record.iteration = state.iteration;
                record.quality_score = state.quality_score;
                record.errors = state.errors.clone();
            }
        }))
    }

    /// Submit a job. Returns immediately with the job id; execution
    /// happens on a background task under the whole-job deadline.
    ///
    /// The deadline is cooperative: past it, every remaining external
    /// call returns `Cancelled` and the stages degrade to their fallback
    /// deltas, so the pass finishes and the job still completes from
    /// whatever evidence it accumulated.
    pub fn submit(&self, request: JobRequest) -> Uuid {
        let job_id = Uuid::new_v4();
        self.jobs.write().insert(job_id, JobRecord::queued());

        let max_iterations = request
            .max_iterations
            .unwrap_or(self.config.max_iterations);
        let threshold = request
            .quality_threshold
            .unwrap_or(self.config.quality_threshold);

        let mut state = ResearchState::new(request.query, max_iterations);
        state.context = request.context;

        let job_timeout = self.config.job_timeout();
        let deadline = Deadline::after(job_timeout);
        let executor = self.build_executor(job_id, threshold, deadline);
        let jobs = Arc::clone(&self.jobs);

        tokio::spawn(async move {
            // Backstop only: the cooperative deadline drains the pipeline
            // well before this fires.
            let backstop = job_timeout * 2;
            let outcome = tokio::time::timeout(backstop, executor.run(job_id, state)).await;

            let mut jobs = jobs.write();
            let Some(record) = jobs.get_mut(&job_id) else {
                return;
            };
            if record.status.is_terminal() {
                return;
            }
            record.finished_at = Some(Utc::now());
            match outcome {
                Ok(Ok(final_state)) => {
                    record.status = JobStatus::Completed;
                    record.phase = PipelinePhase::Completed;
                    record.iteration = final_state.iteration;
                    record.quality_score = final_state.quality_score;
                    record.errors = final_state.errors;
                    record.report = final_state.report;
                }
                Ok(Err(err)) => {
                    tracing::error!(%job_id, "job failed: {err}");
                    record.status = JobStatus::Failed;
                    record.phase = PipelinePhase::Failed;
                    record.failure = Some(err.to_string());
                }
                Err(_) => {
                    tracing::error!(%job_id, "job exceeded {backstop:?} backstop");
                    record.status = JobStatus::Failed;
                    record.phase = PipelinePhase::Failed;
                    record.failure = Some(format!("job exceeded {backstop:?} backstop"));
                }
            }
        });

        job_id
    }

    pub fn status(&self, job_id: Uuid) -> Result<JobStatusView> {
        let jobs = self.jobs.read();
        let record = jobs
            .get(&job_id)
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;
        Ok(JobStatusView {
            id: job_id,
            status: record.status,
            phase: record.phase,
            iteration: record.iteration,
            quality_score: record.quality_score,
            errors: record.errors.clone(),
            created_at: record.created_at,
            finished_at: record.finished_at,
        })
    }

    pub fn result(&self, job_id: Uuid) -> Result<JobOutcome> {
        let jobs = self.jobs.read();
        let record = jobs
            .get(&job_id)
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;
        Ok(match record.status {
            JobStatus::Queued | JobStatus::Running => JobOutcome::Pending,
            JobStatus::Completed => {
                let report = record.report.clone().ok_or_else(|| {
                    AppError::Internal("completed job has no report".to_string())
                })?;
                JobOutcome::Completed {
                    report,
                    quality_score: record.quality_score,
                    error_count: record.errors.len(),
                }
            }
            JobStatus::Failed => JobOutcome::Failed {
                error: record
                    .failure
                    .clone()
                    .unwrap_or_else(|| "unknown failure".to_string()),
            },
        })
    }

    /// Ids of all known jobs, newest first.
    pub fn list(&self) -> Vec<JobStatusView> {
        let jobs = self.jobs.read();
        let mut views: Vec<JobStatusView> = jobs
            .keys()
            .copied()
            .filter_map(|id| self.view_locked(&jobs, id))
            .collect();
        views.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        views
    }

    fn view_locked(
        &self,
        jobs: &HashMap<Uuid, JobRecord>,
        id: Uuid,
    ) -> Option<JobStatusView> {
        jobs.get(&id).map(|record| JobStatusView {
            id,
            status: record.status,
            phase: record.phase,
            iteration: record.iteration,
            quality_score: record.quality_score,
            errors: record.errors.clone(),
            created_at: record.created_at,
            finished_at: record.finished_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_job_is_not_found() {
        struct NoLlm;
        #[async_trait::async_trait]
        impl LanguageModel for NoLlm {
            async fn generate(&self, _: &str) -> crate::collaborators::CollabResult<String> {
                unreachable!()
            }
            async fn generate_json(
                &self,
                _: &str,
                _: &str,
            ) -> crate::collaborators::CollabResult<serde_json::Value> {
                unreachable!()
            }
        }
        struct NoSearch;
        #[async_trait::async_trait]
        impl SearchProvider for NoSearch {
            async fn search(
                &self,
                _: &str,
                _: usize,
            ) -> crate::collaborators::CollabResult<Vec<crate::collaborators::DocumentRef>>
            {
                unreachable!()
            }
        }
        struct NoParser;
        #[async_trait::async_trait]
        impl DocumentParser for NoParser {
            async fn parse(
                &self,
                _: &[u8],
                _: &str,
            ) -> crate::collaborators::CollabResult<String> {
                unreachable!()
            }
        }

        let manager = JobManager::new(
            Config::default(),
            Collaborators {
                llm: Arc::new(NoLlm),
                search: Arc::new(NoSearch),
                parser: Arc::new(NoParser),
                artifacts: None,
            },
        );
        assert!(matches!(
            manager.status(Uuid::new_v4()),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            manager.result(Uuid::new_v4()),
            Err(AppError::NotFound(_))
        ));
    }
}
