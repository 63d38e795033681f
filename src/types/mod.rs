//! Core types shared across the pipeline: sources, claims, verification
//! results, insights, reports, job statuses, and the crate error type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============= Source Types =============

/// Category of a retrieved source, used by the diversity sub-score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceCategory {
    News,
    Academic,
    Government,
    Blog,
    Other,
}

impl SourceCategory {
    /// Rule-based categorization from a domain name, used when the LLM
    /// categorizer is unavailable.
    pub fn from_domain(domain: &str) -> Self {
        let domain = domain.to_lowercase();
        let matches = |needles: &[&str]| needles.iter().any(|n| domain.contains(n));

        if matches(&[".edu", "arxiv", "scholar", "pubmed", "ncbi"]) {
            SourceCategory::Academic
        } else if matches(&[".gov", "government"]) {
            SourceCategory::Government
        } else if matches(&["reuters", "bbc", "nytimes", "cnn", "guardian", "apnews"]) {
            SourceCategory::News
        } else if matches(&["medium.com", "substack", "wordpress", "blogspot"]) {
            SourceCategory::Blog
        } else {
            SourceCategory::Other
        }
    }

    /// Authority weight used by the verification stage.
    pub fn authority(&self) -> f64 {
        match self {
            SourceCategory::Academic => 0.9,
            SourceCategory::Government => 0.85,
            SourceCategory::News => 0.7,
            SourceCategory::Blog => 0.4,
            SourceCategory::Other => 0.5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCategory::News => "news",
            SourceCategory::Academic => "academic",
            SourceCategory::Government => "government",
            SourceCategory::Blog => "blog",
            SourceCategory::Other => "other",
        }
    }

    /// All categories the diversity sub-score can count.
    pub fn all() -> [SourceCategory; 5] {
        [
            SourceCategory::News,
            SourceCategory::Academic,
            SourceCategory::Government,
            SourceCategory::Blog,
            SourceCategory::Other,
        ]
    }
}

/// A single retrieved document. Never mutated after creation; deduplicated
/// by normalized URL at merge time, first occurrence wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub title: String,
    pub content: String,
    pub category: SourceCategory,
    /// The sub-query that produced this result, for coverage attribution.
    pub sub_query: String,
    pub retrieved_at: DateTime<Utc>,
}

impl Source {
    /// URL identity key: case-insensitive, scheme and `www.` stripped,
    /// trailing slash removed.
    pub fn normalized_url(&self) -> String {
        normalize_url(&self.url)
    }
}

/// Normalize a URL for deduplication.
pub fn normalize_url(url: &str) -> String {
    let lower = url.trim().to_lowercase();
    let stripped = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let stripped = stripped.strip_prefix("www.").unwrap_or(stripped);
    stripped.trim_end_matches('/').to_string()
}

// ============= Claim Types =============

/// Direction of the assertion a claim makes about its proposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Increases,
    Decreases,
    Asserts,
    Denies,
}

impl Polarity {
    /// Whether two polarities conflict on the same proposition.
    pub fn conflicts_with(&self, other: &Polarity) -> bool {
        matches!(
            (self, other),
            (Polarity::Increases, Polarity::Decreases)
                | (Polarity::Decreases, Polarity::Increases)
                | (Polarity::Asserts, Polarity::Denies)
                | (Polarity::Denies, Polarity::Asserts)
        )
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "increases" | "increase" | "positive" => Polarity::Increases,
            "decreases" | "decrease" | "negative" => Polarity::Decreases,
            "denies" | "deny" | "refutes" => Polarity::Denies,
            _ => Polarity::Asserts,
        }
    }
}

/// A factual claim extracted from the sources. Derived fresh each pass,
/// identified by a stable hash so re-merging is idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub text: String,
    pub polarity: Polarity,
    /// Normalized URLs of the supporting sources.
    pub source_ids: Vec<String>,
}

impl Claim {
    /// Build a claim, deriving the id from normalized text plus the sorted
    /// supporting-source set. Same text + same sources always yields the
    /// same id.
    pub fn new(text: impl Into<String>, polarity: Polarity, mut source_ids: Vec<String>) -> Self {
        let text = text.into();
        source_ids.sort();
        source_ids.dedup();
        let id = stable_claim_id(&text, &source_ids);
        Self {
            id,
            text,
            polarity,
            source_ids,
        }
    }
}

/// Stable id: sha256 over whitespace-collapsed lowercase text and the
/// sorted source set, truncated to 16 hex chars.
pub fn stable_claim_id(text: &str, sorted_source_ids: &[String]) -> String {
    let normalized = text
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    for id in sorted_source_ids {
        hasher.update(b"\n");
        hasher.update(id.as_bytes());
    }
    hex::encode(&hasher.finalize()[..8])
}

/// Two claims whose polarities conflict on the same proposition.
/// Stored with ordered ids so (a, b) and (b, a) are one pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContradictionPair {
    pub claim_a: String,
    pub claim_b: String,
    pub confidence: f64,
}

impl ContradictionPair {
    /// Construct with canonical id ordering.
    pub fn new(id_x: impl Into<String>, id_y: impl Into<String>, confidence: f64) -> Self {
        let (x, y) = (id_x.into(), id_y.into());
        let (claim_a, claim_b) = if x <= y { (x, y) } else { (y, x) };
        Self {
            claim_a,
            claim_b,
            confidence,
        }
    }

    /// Unordered pair identity used for deduplication.
    pub fn key(&self) -> (String, String) {
        (self.claim_a.clone(), self.claim_b.clone())
    }
}

// ============= Verification Types =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Supported,
    Disputed,
    Unverified,
}

impl Verdict {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "supported" | "verified" | "confirmed" => Verdict::Supported,
            "disputed" | "contradicted" | "refuted" => Verdict::Disputed,
            _ => Verdict::Unverified,
        }
    }
}

/// Outcome of fact-checking a single claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub claim_id: String,
    /// Verification confidence, 0.0 to 1.0.
    pub confidence: f64,
    pub verdict: Verdict,
    /// Number of sources contributing to the verdict.
    pub source_count: usize,
    /// Authority scores of the contributing sources.
    pub authority_scores: Vec<f64>,
}

// ============= Insight Types =============

/// A hypothesis or trend generated from the evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub text: String,
    pub confidence: f64,
    pub supporting_sources: Vec<String>,
    pub reasoning: String,
}

impl Insight {
    /// Stable identity for merge deduplication.
    pub fn id(&self) -> String {
        stable_claim_id(&self.text, &[])
    }
}

// ============= Report Types =============

/// A key finding in the final report, paired with its verification status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFinding {
    pub finding: String,
    pub confidence: f64,
    pub sources_count: usize,
}

/// A cited source in the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
}

/// The finished research report. Set once on the state when the quality
/// gate accepts; `low_confidence` marks budget-exhausted acceptance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub title: String,
    pub executive_summary: String,
    pub key_findings: Vec<KeyFinding>,
    pub contradictions_and_gaps: String,
    pub insights_and_trends: String,
    pub source_reliability: String,
    pub methodology_note: String,
    pub sources_cited: Vec<Citation>,
    pub follow_up_queries: Vec<String>,
    pub low_confidence: bool,
    pub generated_at: DateTime<Utc>,
}

// ============= Job Types =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Routing decision from the intake stage, consumed by the executor's
/// switch instead of ad hoc keyword matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDecision {
    /// The supplied context already answers the query; skip web search.
    AnswerFromContext,
    /// Decompose and search the web.
    NeedsSearch,
    /// Uploaded attachments must be parsed before analysis.
    NeedsAttachment,
}

// ============= Error Types =============

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Critical stage '{stage}' failed: {message}")]
    CriticalStage { stage: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("https://www.Example.com/a/"), "example.com/a");
        assert_eq!(normalize_url("http://example.com/a"), "example.com/a");
        assert_eq!(normalize_url("example.com/a"), "example.com/a");
    }

    #[test]
    fn test_claim_id_is_deterministic() {
        let a = Claim::new(
            "AI   reduces costs",
            Polarity::Increases,
            vec!["b.com".into(), "a.com".into()],
        );
        let b = Claim::new(
            "ai reduces costs",
            Polarity::Increases,
            vec!["a.com".into(), "b.com".into()],
        );
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_claim_id_depends_on_source_set() {
        let a = Claim::new("ai reduces costs", Polarity::Asserts, vec!["a.com".into()]);
        let b = Claim::new("ai reduces costs", Polarity::Asserts, vec!["b.com".into()]);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_contradiction_pair_is_symmetric() {
        let p1 = ContradictionPair::new("x", "y", 0.8);
        let p2 = ContradictionPair::new("y", "x", 0.8);
        assert_eq!(p1.key(), p2.key());
    }

    #[test]
    fn test_polarity_conflicts() {
        assert!(Polarity::Increases.conflicts_with(&Polarity::Decreases));
        assert!(Polarity::Denies.conflicts_with(&Polarity::Asserts));
        assert!(!Polarity::Asserts.conflicts_with(&Polarity::Increases));
    }

    #[rstest]
    #[case("arxiv.org", SourceCategory::Academic)]
    #[case("pubmed.ncbi.nlm.nih.gov", SourceCategory::Academic)]
    #[case("data.gov", SourceCategory::Government)]
    #[case("reuters.com", SourceCategory::News)]
    #[case("someone.substack.com", SourceCategory::Blog)]
    #[case("randomsite.io", SourceCategory::Other)]
    fn test_category_fallback(#[case] domain: &str, #[case] expected: SourceCategory) {
        assert_eq!(SourceCategory::from_domain(domain), expected);
    }

    #[rstest]
    #[case("Supported", Verdict::Supported)]
    #[case("confirmed", Verdict::Supported)]
    #[case("disputed", Verdict::Disputed)]
    #[case("refuted", Verdict::Disputed)]
    #[case("garbage", Verdict::Unverified)]
    fn test_verdict_parse(#[case] raw: &str, #[case] expected: Verdict) {
        assert_eq!(Verdict::parse(raw), expected);
    }

    #[rstest]
    #[case("increases", Polarity::Increases)]
    #[case("negative", Polarity::Decreases)]
    #[case("refutes", Polarity::Denies)]
    #[case("anything else", Polarity::Asserts)]
    fn test_polarity_parse(#[case] raw: &str, #[case] expected: Polarity) {
        assert_eq!(Polarity::parse(raw), expected);
    }
}
