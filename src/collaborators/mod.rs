//! Collaborator abstractions consumed by the pipeline.
//!
//! The engine never talks to a model, search API, or parser directly —
//! every external capability sits behind one of these traits so stages can
//! be unit-tested against mocks and providers can be swapped without
//! touching pipeline code. Errors carry a typed retryability class; the
//! [`retry`] wrapper is the only place retry decisions are made.

pub mod retry;

pub use retry::{with_cutoff, with_deadline, with_retry, Deadline, RetryPolicy};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Failure classes for external calls. Retryable vs. fatal is a declared
/// property of the error, not inferred at call sites.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    #[error("call timed out")]
    Timeout,

    #[error("rate limited")]
    RateLimited,

    #[error("transient network failure: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("malformed request or response: {0}")]
    Malformed(String),

    #[error("unsupported document format: {0}")]
    Unsupported(String),

    #[error("corrupt document: {0}")]
    Corrupt(String),

    #[error("cancelled by job deadline")]
    Cancelled,
}

impl CollaboratorError {
    /// Only transient classes are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CollaboratorError::Timeout
                | CollaboratorError::RateLimited
                | CollaboratorError::Network(_)
        )
    }
}

pub type CollabResult<T> = std::result::Result<T, CollaboratorError>;

/// A raw search hit before conversion into a [`crate::types::Source`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRef {
    pub title: String,
    pub url: String,
    pub content: String,
    /// Provider relevance score, 0.0-1.0.
    pub score: f64,
}

/// Language-model call used by the intake, decompose, analyze, verify,
/// insight, and report stages.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Free-text completion.
    async fn generate(&self, prompt: &str) -> CollabResult<String>;

    /// Structured completion: the model is instructed to return JSON and
    /// the provider parses it before handing it back.
    async fn generate_json(&self, system: &str, prompt: &str)
        -> CollabResult<serde_json::Value>;

    /// Model identifier, for logging.
    fn model_name(&self) -> &str {
        "unknown"
    }
}

/// Web search used by the retrieval stage.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> CollabResult<Vec<DocumentRef>>;
}

/// Document-to-text extraction for uploaded attachments.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(&self, bytes: &[u8], mime: &str) -> CollabResult<String>;
}

/// Fire-and-forget artifact persistence for the final report. Failures
/// are logged by the caller and never fail the job.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn persist(&self, job_id: Uuid, name: &str, bytes: Vec<u8>) -> CollabResult<()>;
}
