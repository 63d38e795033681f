//! Retrieval stage: turn pending sub-queries into sources.
//!
//! Each sub-query is searched independently through the retry wrapper; a
//! sub-query whose search exhausts its retries contributes zero sources
//! and one error entry, and never blocks the others. Sources from prior
//! iterations are retained — only newly seen URLs are added. When the
//! route demands it, caller-supplied attachments are parsed into sources
//! instead of (or before) searching.

use crate::collaborators::{
    with_cutoff, with_retry, Deadline, DocumentParser, DocumentRef, RetryPolicy, SearchProvider,
};
use crate::stages::{Stage, StageOutput};
use crate::state::{ContextDocument, ResearchState, StateDelta};
use crate::types::{normalize_url, Result, RouteDecision, Source, SourceCategory};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Truncation bound applied to retrieved content.
const MAX_CONTENT_WORDS: usize = 800;

pub struct RetrieveStage {
    search: Arc<dyn SearchProvider>,
    parser: Arc<dyn DocumentParser>,
    retry: RetryPolicy,
    timeout: Duration,
    deadline: Deadline,
    max_results: usize,
}

impl RetrieveStage {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        parser: Arc<dyn DocumentParser>,
        retry: RetryPolicy,
        timeout: Duration,
        deadline: Deadline,
        max_results: usize,
    ) -> Self {
        Self {
            search,
            parser,
            retry,
            timeout,
            deadline,
            max_results,
        }
    }

    fn truncate(content: &str) -> String {
        let words: Vec<&str> = content.split_whitespace().collect();
        if words.len() > MAX_CONTENT_WORDS {
            format!("{}...", words[..MAX_CONTENT_WORDS].join(" "))
        } else {
            content.to_string()
        }
    }

    fn domain_of(url: &str) -> String {
        normalize_url(url)
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    fn to_source(hit: DocumentRef, sub_query: &str) -> Source {
        let category = SourceCategory::from_domain(&Self::domain_of(&hit.url));
        Source {
            url: hit.url,
            title: if hit.title.is_empty() {
                "Untitled".to_string()
            } else {
                hit.title
            },
            content: Self::truncate(&hit.content),
            category,
            sub_query: sub_query.to_string(),
            retrieved_at: Utc::now(),
        }
    }

    /// Parse attachments into sources. Parse failures drop the one
    /// document and log it; the rest proceed.
    async fn ingest_attachments(
        &self,
        docs: &[ContextDocument],
        delta: &mut StateDelta,
        seen: &mut HashSet<String>,
    ) {
        for doc in docs {
            let parsed = with_retry(&self.retry, "retrieve.parse", || {
                with_cutoff(
                    self.timeout,
                    self.deadline,
                    self.parser.parse(&doc.bytes, &doc.mime),
                )
            })
            .await;

            match parsed {
                Ok(text) => {
                    let url = format!("attachment://{}", doc.name);
                    if seen.insert(normalize_url(&url)) {
                        delta.sources.push(Source {
                            url,
                            title: doc.name.clone(),
                            content: Self::truncate(&text),
                            category: SourceCategory::Other,
                            sub_query: String::new(),
                            retrieved_at: Utc::now(),
                        });
                    }
                }
                Err(err) => {
                    tracing::warn!("failed to parse attachment '{}': {err}", doc.name);
                    delta
                        .errors
                        .push(format!("retrieve: attachment '{}': {err}", doc.name));
                }
            }
        }
    }
}

#[async_trait]
impl Stage for RetrieveStage {
    fn name(&self) -> &'static str {
        "retrieve"
    }

    async fn execute(&self, snapshot: &ResearchState) -> Result<StageOutput> {
        let mut delta = StateDelta::default();
        let mut seen = snapshot.known_urls();

        let route = snapshot.route.unwrap_or(RouteDecision::NeedsSearch);

        if matches!(
            route,
            RouteDecision::NeedsAttachment | RouteDecision::AnswerFromContext
        ) {
            self.ingest_attachments(&snapshot.context, &mut delta, &mut seen)
                .await;
        }

        if route == RouteDecision::AnswerFromContext {
            // Context answers the query; no web search.
            return Ok(StageOutput::new(delta));
        }

        // Search only sub-queries with no attributed source yet: new
        // follow-ups plus any that previously came back empty. The
        // searches run concurrently; merging happens after they all
        // settle, so dedup stays single-threaded.
        let searches = snapshot
            .sub_queries
            .iter()
            .filter(|q| !snapshot.is_covered(q))
            .map(|sub_query| async move {
                let result = with_retry(&self.retry, "retrieve.search", || {
                    with_cutoff(
                        self.timeout,
                        self.deadline,
                        self.search.search(sub_query, self.max_results),
                    )
                })
                .await;
                (sub_query, result)
            });

        for (sub_query, result) in join_all(searches).await {
            match result {
                Ok(hits) => {
                    let mut added = 0usize;
                    for hit in hits {
                        if seen.insert(normalize_url(&hit.url)) {
                            delta.sources.push(Self::to_source(hit, sub_query));
                            added += 1;
                        }
                    }
                    tracing::debug!("sub-query '{sub_query}': {added} new sources");
                }
                Err(err) => {
                    tracing::warn!("search failed for '{sub_query}': {err}");
                    delta
                        .errors
                        .push(format!("retrieve: search '{sub_query}': {err}"));
                }
            }
        }

        tracing::info!(
            "retrieved {} new sources ({} errors)",
            delta.sources.len(),
            delta.errors.len()
        );
        Ok(StageOutput::new(delta))
    }
}
