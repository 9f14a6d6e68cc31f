//! Core type definitions for legal research orchestration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

/// Incoming research question from the caller boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub explicit_strategy: Option<Strategy>,
    #[serde(default)]
    pub hints: ContextHints,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            user_id: None,
            conversation_id: None,
            explicit_strategy: None,
            hints: ContextHints::default(),
        }
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.explicit_strategy = Some(strategy);
        self
    }
}

/// Optional caller-supplied interpretation hints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextHints {
    #[serde(default)]
    pub urgency: Option<Urgency>,
    #[serde(default)]
    pub domains: Vec<Domain>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Employment,
    Contract,
    Criminal,
    Family,
    Property,
    Corporate,
    Tax,
    Immigration,
    IntellectualProperty,
    Tort,
    Consumer,
    Privacy,
    GeneralLegal,
}

impl Domain {
    pub const ALL: [Domain; 13] = [
        Domain::Employment,
        Domain::Contract,
        Domain::Criminal,
        Domain::Family,
        Domain::Property,
        Domain::Corporate,
        Domain::Tax,
        Domain::Immigration,
        Domain::IntellectualProperty,
        Domain::Tort,
        Domain::Consumer,
        Domain::Privacy,
        Domain::GeneralLegal,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Domain::Employment => "employment law",
            Domain::Contract => "contract law",
            Domain::Criminal => "criminal law",
            Domain::Family => "family law",
            Domain::Property => "property law",
            Domain::Corporate => "corporate law",
            Domain::Tax => "tax law",
            Domain::Immigration => "immigration law",
            Domain::IntellectualProperty => "intellectual property",
            Domain::Tort => "tort law",
            Domain::Consumer => "consumer protection",
            Domain::Privacy => "privacy and data protection",
            Domain::GeneralLegal => "general legal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

/// Structured interpretation of a raw query; read-only once derived
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextBlueprint {
    pub detected_domains: BTreeSet<Domain>,
    pub domain_confidence: BTreeMap<Domain, f32>,
    pub complexity: Complexity,
    pub urgency: Urgency,
    pub recommended_strategy: Strategy,
    pub keywords: Vec<String>,
}

impl ContextBlueprint {
    /// Detected domain with the highest confidence (ties resolved by domain order)
    pub fn primary_domain(&self) -> Domain {
        self.domain_confidence
            .iter()
            .fold(None::<(Domain, f32)>, |best, (domain, conf)| match best {
                Some((_, c)) if c >= *conf => best,
                _ => Some((*domain, *conf)),
            })
            .map(|(domain, _)| domain)
            .unwrap_or(Domain::GeneralLegal)
    }
}

/// Named retrieval configuration; parameters live in `strategy::params_for`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Quick,
    Comprehensive,
    Focused,
    Exploratory,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Quick => "quick",
            Strategy::Comprehensive => "comprehensive",
            Strategy::Focused => "focused",
            Strategy::Exploratory => "exploratory",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    Semantic,
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyParams {
    pub max_sources: usize,
    pub retrieval_mode: RetrievalMode,
    pub relevance_floor: f32,
    pub use_secondary_sources: bool,
    pub diversify_by_source: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Statute,
    CaseLaw,
    Regulation,
    Guidance,
    Commentary,
    Other,
}

impl SourceType {
    /// Primary sources are binding law; the rest are secondary material
    pub fn is_primary(&self) -> bool {
        matches!(self, SourceType::Statute | SourceType::CaseLaw | SourceType::Regulation)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub doc_id: String,
    pub title: String,
    pub excerpt: String,
    pub relevance_score: f32,    // 0.0-1.0
    pub source_type: SourceType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub number: usize,           // 1-based, first-use order
    pub source_ref: RetrievedDocument,
    pub citation_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Inference,
    Counterpoint,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasoningStep {
    pub index: usize,
    pub kind: StepKind,
    pub text: String,
}

impl ReasoningStep {
    /// Marker prefixed to every degraded-mode step text
    pub const DEGRADED_MARKER: &'static str = "[degraded]";

    pub fn degraded(index: usize, reason: &str) -> Self {
        Self {
            index,
            kind: StepKind::Degraded,
            text: format!("{} {}", Self::DEGRADED_MARKER, reason),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.kind == StepKind::Degraded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Retrieval,
    Reasoning,
    Formatting,
    Memory,
}

/// Soft failure recorded instead of an error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradedNote {
    pub stage: PipelineStage,
    pub reason: String,
}

impl DegradedNote {
    pub fn new(stage: PipelineStage, reason: impl Into<String>) -> Self {
        Self { stage, reason: reason.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageTimings {
    pub retrieval_ms: u64,
    pub summarization_ms: u64,
    pub reasoning_ms: u64,
    pub formatting_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseMetadata {
    pub query_id: Uuid,
    pub attempts: usize,
    pub model_used: Option<String>,
    pub degraded: Vec<DegradedNote>,
    pub documents_considered: usize,
    pub counterpoints: Vec<String>,
    pub timings: StageTimings,
    pub created_at: DateTime<Utc>,
}

impl ResponseMetadata {
    pub fn new(query_id: Uuid) -> Self {
        Self {
            query_id,
            attempts: 1,
            model_used: None,
            degraded: Vec::new(),
            documents_considered: 0,
            counterpoints: Vec::new(),
            timings: StageTimings::default(),
            created_at: Utc::now(),
        }
    }
}

/// Terminal artifact returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentResponse {
    pub answer_text: String,
    pub citations: Vec<Citation>,
    pub citation_map: BTreeMap<usize, String>,
    pub confidence: f32,
    pub strategy_used: Strategy,
    pub reasoning_chain: Vec<ReasoningStep>,
    pub follow_up_suggestions: Vec<String>,
    pub related_queries: Vec<String>,
    pub metadata: ResponseMetadata,
}

impl AgentResponse {
    pub fn is_degraded(&self) -> bool {
        !self.metadata.degraded.is_empty() || self.reasoning_chain.iter().any(|s| s.is_degraded())
    }
}

/// What a past run drew on, kept alongside the memory entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryContext {
    pub domains: Vec<Domain>,
    pub strategy: Strategy,
    pub doc_ids: Vec<String>,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub user_id: String,
    pub query_text: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub context_used: MemoryContext,
    pub result_ref: Uuid,        // query_id of the response
    pub created_at: DateTime<Utc>,
}

/// Memory entry ranked against a new query
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMemory {
    pub entry: MemoryEntry,
    pub shared_keywords: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelHealth {
    pub healthy: Option<bool>,
    pub last_error: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub pipeline_available: bool,
    pub models: HashMap<String, ModelHealth>,
    pub similarity_store_reachable: bool,
    pub memory_store_reachable: bool,
}
