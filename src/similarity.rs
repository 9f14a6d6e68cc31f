//! Similarity store abstraction and in-process implementations

use crate::keywords;
use crate::types::*;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Longest excerpt an in-process store hands to the pipeline
const MAX_STORE_EXCERPT_CHARS: usize = 1_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchFilters {
    /// Empty means every source type is allowed
    pub source_types: Vec<SourceType>,
}

impl SearchFilters {
    pub fn allows(&self, source_type: SourceType) -> bool {
        self.source_types.is_empty() || self.source_types.contains(&source_type)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub keywords: Vec<String>,
    pub filters: SearchFilters,
    pub k: usize,
}

/// Trait for pluggable similarity / keyword search backends
#[async_trait]
pub trait SimilarityStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, request: &SearchRequest) -> Result<Vec<RetrievedDocument>>;

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Store returning a fixed result list, for tests
pub struct MockSimilarityStore {
    documents: Vec<RetrievedDocument>,
}

impl MockSimilarityStore {
    pub fn new(documents: Vec<RetrievedDocument>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl SimilarityStore for MockSimilarityStore {
    fn name(&self) -> &'static str {
        "mock_similarity"
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<RetrievedDocument>> {
        Ok(self
            .documents
            .iter()
            .filter(|d| request.filters.allows(d.source_type))
            .take(request.k)
            .cloned()
            .collect())
    }
}

/// Read-only corpus record as supplied by ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusDocument {
    pub doc_id: String,
    pub title: String,
    pub text: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusChannel {
    /// Fraction of query keywords present in the document
    Semantic,
    /// Keyword hits with title matches weighted double
    Keyword,
}

/// In-process corpus scored by lexical overlap
pub struct InMemoryCorpus {
    documents: Vec<CorpusDocument>,
    channel: CorpusChannel,
}

impl InMemoryCorpus {
    pub fn new(documents: Vec<CorpusDocument>, channel: CorpusChannel) -> Self {
        Self { documents, channel }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn score(&self, doc: &CorpusDocument, query_keywords: &[String]) -> f32 {
        if query_keywords.is_empty() {
            return 0.0;
        }
        let title = keywords::keyword_set(&doc.title);
        let body = keywords::keyword_set(&doc.text);

        match self.channel {
            CorpusChannel::Semantic => {
                let hits = query_keywords
                    .iter()
                    .filter(|k| title.contains(*k) || body.contains(*k))
                    .count();
                hits as f32 / query_keywords.len() as f32
            }
            CorpusChannel::Keyword => {
                let weighted: f32 = query_keywords
                    .iter()
                    .map(|k| {
                        let mut w = 0.0;
                        if body.contains(k) {
                            w += 1.0;
                        }
                        if title.contains(k) {
                            w += 1.0;
                        }
                        w
                    })
                    .sum();
                (weighted / (query_keywords.len() as f32 * 1.5)).min(1.0)
            }
        }
    }
}

#[async_trait]
impl SimilarityStore for InMemoryCorpus {
    fn name(&self) -> &'static str {
        match self.channel {
            CorpusChannel::Semantic => "corpus_semantic",
            CorpusChannel::Keyword => "corpus_keyword",
        }
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<RetrievedDocument>> {
        let query_keywords = if request.keywords.is_empty() {
            keywords::extract(&request.query)
        } else {
            request.keywords.clone()
        };

        let mut scored: Vec<RetrievedDocument> = self
            .documents
            .iter()
            .filter(|d| request.filters.allows(d.source_type))
            .map(|d| RetrievedDocument {
                doc_id: d.doc_id.clone(),
                title: d.title.clone(),
                excerpt: d.text.chars().take(MAX_STORE_EXCERPT_CHARS).collect(),
                relevance_score: self.score(d, &query_keywords),
                source_type: d.source_type,
            })
            .filter(|d| d.relevance_score > 0.0)
            .collect();

        scored.sort_by(|a, b| {
            b.relevance_score
                .total_cmp(&a.relevance_score)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        scored.truncate(request.k);
        Ok(scored)
    }
}
