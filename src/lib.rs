//! # A.R.G.O.S - Agentic Research Graph Orchestration System
//!
//! A multi-stage, multi-agent research pipeline engine: submit a research
//! question, and a staged graph of LLM-backed workers decomposes it,
//! retrieves and analyzes evidence, fact-checks the extracted claims, and
//! synthesizes a structured report — refining itself through a bounded
//! reflection loop until a quality gate accepts the result.
//!
//! ## Overview
//!
//! The engine is a library. Callers wire it to their own collaborator
//! implementations (a language model, a search provider, a document
//! parser, optionally an artifact store) and drive jobs through the
//! [`jobs::JobManager`].
//!
//! ### Basic Example
//!
//! ```rust,ignore
//! use argos::{Collaborators, Config, JobManager, JobRequest};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = JobManager::new(
//!         Config::from_env(),
//!         Collaborators {
//!             llm: Arc::new(my_llm),
//!             search: Arc::new(my_search),
//!             parser: Arc::new(my_parser),
//!             artifacts: None,
//!         },
//!     );
//!
//!     let job_id = manager.submit(JobRequest::new(
//!         "impact of remote work on software team productivity",
//!     ));
//!
//!     // poll until terminal, then fetch the report
//!     let outcome = manager.result(job_id)?;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```
//!
//! ## Execution model
//!
//! Every stage receives a read-only snapshot of the job's
//! [`state::ResearchState`] and returns a [`state::StateDelta`]; the
//! executor applies deltas in a single, order-independent merge step.
//! Analysis and insight generation fan out concurrently; the quality
//! gate scores the merged state (coverage, diversity, verification,
//! depth, coherence) and either accepts the report or loops back with
//! targeted follow-up queries, at most `max_iterations` times.
//! Collaborator failures degrade: a stage that cannot get an answer
//! contributes an error entry and a fallback delta instead of killing
//! the job. Only an invalid query or a synthesis pass with no evidence
//! at all fails a job outright.
//!
//! ## Modules
//!
//! - [`collaborators`] - External capability traits and the retry wrapper
//! - [`stages`] - The seven pipeline stages
//! - [`pipeline`] - Fan-out group, quality gate, and the graph executor
//! - [`jobs`] - Job submission, tracking, and results
//! - [`state`] - Accumulating research state and the delta type
//! - [`types`] - Sources, claims, verdicts, reports, errors
//! - [`utils`] - Configuration

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

/// External capability traits (LLM, search, parsing, artifacts) and the
/// retry/deadline wrappers.
pub mod collaborators;
/// Job lifecycle: submission, background execution, status, results.
pub mod jobs;
/// Fan-out group, quality gate, and the graph executor.
pub mod pipeline;
/// The pipeline stages: intake, decompose, retrieve, analyze, verify,
/// insight, report.
pub mod stages;
/// Accumulating research state and the stage delta type.
pub mod state;
/// Core types: sources, claims, verification, reports, errors.
pub mod types;
/// Engine configuration.
pub mod utils;

// Re-export the surface most callers need
pub use collaborators::{
    ArtifactStore, CollabResult, CollaboratorError, Deadline, DocumentParser, DocumentRef,
    LanguageModel, RetryPolicy, SearchProvider,
};
pub use jobs::{Collaborators, JobManager, JobOutcome, JobRequest, JobStatusView};
pub use pipeline::{
    GateDecision, GraphExecutor, PipelinePhase, QualityGate, QualityWeights,
};
pub use state::{ContextDocument, ResearchState, StateDelta};
pub use types::{AppError, JobStatus, Report, Result, RouteDecision};
pub use utils::Config;
