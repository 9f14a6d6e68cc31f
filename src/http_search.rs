//! HTTP-based similarity store client (semantic or keyword index service)

use crate::similarity::{SearchRequest, SimilarityStore};
use crate::types::{RetrievedDocument, SourceType};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which endpoint of the index service to call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchChannel {
    Semantic,
    Keyword,
}

impl SearchChannel {
    fn path(&self) -> &'static str {
        match self {
            SearchChannel::Semantic => "search",
            SearchChannel::Keyword => "keyword_search",
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchBody {
    query: String,
    k: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    keywords: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    source_types: Vec<SourceType>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
    #[serde(default)]
    query_time_ms: f64,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    doc_id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: String,
    score: f64,
    #[serde(default)]
    source_type: Option<SourceType>,
    #[serde(default)]
    path: Option<String>,
}

pub struct HttpSimilarityStore {
    service_url: String,
    channel: SearchChannel,
    client: reqwest::Client,
}

impl HttpSimilarityStore {
    pub fn new(service_url: impl Into<String>, channel: SearchChannel) -> Self {
        Self {
            service_url: service_url.into().trim_end_matches('/').to_string(),
            channel,
            client: reqwest::Client::new(),
        }
    }

    fn to_document(hit: SearchHit) -> RetrievedDocument {
        // Older index builds only report a path; derive the type from it
        let source_type = hit.source_type.unwrap_or_else(|| match hit.path.as_deref() {
            Some(p) if p.contains("legislation/") || p.contains("statutes/") => SourceType::Statute,
            Some(p) if p.contains("cases/") || p.contains("judgments/") => SourceType::CaseLaw,
            Some(p) if p.contains("regulations/") => SourceType::Regulation,
            Some(p) if p.contains("guidance/") => SourceType::Guidance,
            Some(p) if p.contains("commentary/") => SourceType::Commentary,
            _ => SourceType::Other,
        });

        let title = hit
            .title
            .or_else(|| hit.path.clone())
            .unwrap_or_else(|| hit.doc_id.clone());

        RetrievedDocument {
            doc_id: hit.doc_id,
            title,
            excerpt: hit.text,
            relevance_score: (hit.score as f32).clamp(0.0, 1.0),
            source_type,
        }
    }
}

#[async_trait]
impl SimilarityStore for HttpSimilarityStore {
    fn name(&self) -> &'static str {
        match self.channel {
            SearchChannel::Semantic => "http_semantic",
            SearchChannel::Keyword => "http_keyword",
        }
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<RetrievedDocument>> {
        if request.query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let body = SearchBody {
            query: request.query.clone(),
            k: request.k,
            keywords: request.keywords.clone(),
            source_types: request.filters.source_types.clone(),
        };

        let url = format!("{}/{}", self.service_url, self.channel.path());
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to call similarity service at {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Similarity service error ({}): {}", status, error_text);
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .context("Failed to parse similarity service response")?;

        tracing::info!(
            "{} search: {} results in {:.1}ms",
            self.name(),
            parsed.results.len(),
            parsed.query_time_ms
        );

        Ok(parsed.results.into_iter().map(Self::to_document).collect())
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.service_url);
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }
}
