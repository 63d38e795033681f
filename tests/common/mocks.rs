//! Mock collaborators for integration tests.
//!
//! The mock language model dispatches on the system prompt of each stage
//! and answers from the actual prompt content (source URLs, claim ids),
//! so the pipeline runs end to end with deterministic, internally
//! consistent evidence and no network access.

use argos::collaborators::{
    ArtifactStore, CollabResult, CollaboratorError, DocumentParser, DocumentRef, LanguageModel,
    SearchProvider,
};
use argos::Config;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// A config with millisecond-scale retries so failure tests run fast.
pub fn fast_config() -> Config {
    Config {
        request_timeout_secs: 5,
        job_timeout_secs: 30,
        retry_max_attempts: 2,
        retry_base_delay_ms: 1,
        retry_multiplier: 1.0,
        retry_jitter_ms: 0,
        ..Config::default()
    }
}

/// Scripted language model. Role is inferred from the system prompt;
/// evidence-bearing answers are derived from the request prompt so claim
/// ids and source URLs line up with what the pipeline actually holds.
pub struct MockLanguageModel {
    /// Route returned by the intake classifier.
    pub route: String,
    /// Sub-queries returned by the decomposer.
    pub sub_queries: Vec<String>,
    /// Claims emitted per source URL: (text template, polarity).
    /// `{url}` in the template is replaced with the source URL.
    pub claims_per_source: Vec<(String, String)>,
    /// Verdicts returned by the fact checker, one entry consumed per
    /// verification pass; the last entry repeats.
    pub verdict_per_pass: Vec<String>,
    verify_calls: AtomicU32,
}

impl MockLanguageModel {
    pub fn new() -> Self {
        Self {
            route: "needs_search".to_string(),
            sub_queries: vec!["angle one".to_string(), "angle two".to_string()],
            claims_per_source: vec![
                ("finding A from {url}".to_string(), "asserts".to_string()),
                ("finding B from {url}".to_string(), "asserts".to_string()),
            ],
            verdict_per_pass: vec!["supported".to_string()],
            verify_calls: AtomicU32::new(0),
        }
    }

    pub fn with_route(mut self, route: &str) -> Self {
        self.route = route.to_string();
        self
    }

    pub fn with_claims(mut self, claims: Vec<(&str, &str)>) -> Self {
        self.claims_per_source = claims
            .into_iter()
            .map(|(t, p)| (t.to_string(), p.to_string()))
            .collect();
        self
    }

    pub fn with_verdicts(mut self, verdicts: Vec<&str>) -> Self {
        self.verdict_per_pass = verdicts.into_iter().map(String::from).collect();
        self
    }

    fn urls_in(prompt: &str) -> Vec<String> {
        prompt
            .lines()
            .filter_map(|l| l.strip_prefix("URL: "))
            .map(|u| u.trim().to_string())
            .collect()
    }

    fn claim_ids_in(prompt: &str) -> Vec<String> {
        prompt
            .lines()
            .filter_map(|l| {
                let l = l.trim();
                let rest = l.strip_prefix('[')?;
                let end = rest.find(']')?;
                Some(rest[..end].to_string())
            })
            .collect()
    }

    fn answer(&self, system: &str, prompt: &str) -> Value {
        if system.contains("routing classifier") {
            json!({"route": self.route})
        } else if system.contains("query decomposer") {
            json!({"sub_queries": self.sub_queries})
        } else if system.contains("research analyst") {
            let claims: Vec<Value> = Self::urls_in(prompt)
                .iter()
                .flat_map(|url| {
                    self.claims_per_source.iter().map(move |(text, polarity)| {
                        json!({
                            "text": text.replace("{url}", url),
                            "polarity": polarity,
                            "source_urls": [url],
                        })
                    })
                })
                .collect();
            json!({"claims": claims})
        } else if system.contains("fact checker") {
            let pass = self.verify_calls.fetch_add(1, Ordering::SeqCst) as usize;
            let verdict = self
                .verdict_per_pass
                .get(pass)
                .or_else(|| self.verdict_per_pass.last())
                .cloned()
                .unwrap_or_else(|| "unverified".to_string());
            let verdicts: Vec<Value> = Self::claim_ids_in(prompt)
                .into_iter()
                .map(|id| json!({"claim_id": id, "verdict": verdict, "confidence": 0.9}))
                .collect();
            json!({"verdicts": verdicts})
        } else if system.contains("research strategist") {
            json!({"insights": [{
                "text": "a cross-cutting trend",
                "confidence": 0.7,
                "supporting_sources": [],
                "reasoning": "pattern across sources",
            }]})
        } else if system.contains("research writer") {
            json!({
                "title": "Synthesized Report",
                "executive_summary": "What the evidence shows.",
                "key_findings": [{"finding": "the main finding", "confidence": 0.85}],
                "contradictions_and_gaps": "none of note",
                "insights_and_trends": "a cross-cutting trend",
                "source_reliability": "mostly reliable",
                "follow_up_queries": [],
            })
        } else {
            json!({})
        }
    }
}

impl Default for MockLanguageModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn generate(&self, _prompt: &str) -> CollabResult<String> {
        Ok(String::new())
    }

    async fn generate_json(&self, system: &str, prompt: &str) -> CollabResult<Value> {
        Ok(self.answer(system, prompt))
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

/// Search provider returning one hit per configured category domain for
/// every query, with optional scripted failures.
pub struct MockSearchProvider {
    /// Domains to emit, one source each. The sub-query is appended to the
    /// path so every query yields distinct URLs.
    pub domains: Vec<String>,
    /// Queries containing this substring fail with a retryable timeout.
    pub fail_on: Option<String>,
    /// Queries containing this substring hang until the caller's own
    /// time limit cuts them off.
    pub stall_on: Option<String>,
    pub calls: Mutex<Vec<String>>,
}

impl MockSearchProvider {
    pub fn diverse() -> Self {
        Self {
            domains: vec![
                "arxiv.org".to_string(),
                "data.gov".to_string(),
                "reuters.com".to_string(),
                "medium.com".to_string(),
            ],
            fail_on: None,
            stall_on: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn single_category() -> Self {
        Self {
            domains: vec!["randomsite.io".to_string()],
            fail_on: None,
            stall_on: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(substring: &str) -> Self {
        Self {
            fail_on: Some(substring.to_string()),
            ..Self::diverse()
        }
    }

    pub fn stalling_on(substring: &str) -> Self {
        Self {
            stall_on: Some(substring.to_string()),
            ..Self::diverse()
        }
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(&self, query: &str, max_results: usize) -> CollabResult<Vec<DocumentRef>> {
        self.calls.lock().push(query.to_string());
        if let Some(fail) = &self.fail_on {
            if query.contains(fail.as_str()) {
                return Err(CollaboratorError::Timeout);
            }
        }
        if let Some(stall) = &self.stall_on {
            if query.contains(stall.as_str()) {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            }
        }
        let slug: String = query
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect();
        Ok(self
            .domains
            .iter()
            .take(max_results)
            .map(|domain| DocumentRef {
                title: format!("{domain} on {query}"),
                url: format!("https://{domain}/{slug}"),
                content: format!("evidence about {query} from {domain}"),
                score: 0.8,
            })
            .collect())
    }
}

/// Parser that decodes bytes as UTF-8 text.
pub struct MockParser;

#[async_trait]
impl DocumentParser for MockParser {
    async fn parse(&self, bytes: &[u8], _mime: &str) -> CollabResult<String> {
        Ok(String::from_utf8_lossy(bytes).to_string())
    }
}

/// Artifact store that records what was persisted.
#[derive(Default)]
pub struct MockArtifactStore {
    pub persisted: Mutex<Vec<(Uuid, String, Vec<u8>)>>,
}

#[async_trait]
impl ArtifactStore for MockArtifactStore {
    async fn persist(&self, job_id: Uuid, name: &str, bytes: Vec<u8>) -> CollabResult<()> {
        self.persisted.lock().push((job_id, name.to_string(), bytes));
        Ok(())
    }
}

/// Bundle the mocks into the engine's collaborator set.
pub fn collaborators(
    llm: MockLanguageModel,
    search: MockSearchProvider,
) -> (argos::Collaborators, Arc<MockArtifactStore>) {
    let artifacts = Arc::new(MockArtifactStore::default());
    (
        argos::Collaborators {
            llm: Arc::new(llm),
            search: Arc::new(search),
            parser: Arc::new(MockParser),
            artifacts: Some(artifacts.clone() as Arc<dyn ArtifactStore>),
        },
        artifacts,
    )
}
