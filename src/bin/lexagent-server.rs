//! Legal research agent HTTP server binary

use lexagent::{
    config::{AgentConfig, ConfigLoader},
    http_search::{HttpSimilarityStore, SearchChannel},
    llm::{HttpLanguageModel, LanguageModel, ScriptedModel},
    logging,
    memory::{HttpMemoryStore, InMemoryMemoryStore, MemoryStore},
    server,
    similarity::{CorpusChannel, CorpusDocument, InMemoryCorpus, SimilarityStore},
    Collaborators, ResearchAgent, SourceType,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match config_path() {
        Some(path) => ConfigLoader::load_with(path)?,
        None => ConfigLoader::load()?,
    };
    logging::init(&config.logging)?;

    info!("lexagent {} starting", env!("CARGO_PKG_VERSION"));

    let collaborators = build_collaborators(&config);
    let agent = ResearchAgent::new(&config, collaborators);

    let status = agent.status().await;
    if !status.similarity_store_reachable {
        warn!("Similarity store is not reachable; answers will be uncited until it recovers");
    }
    if !status.memory_store_reachable {
        warn!("Memory store is not reachable; history will be skipped");
    }

    server::run_server(agent, &config.server).await
}

/// `--config <path>` selects the YAML layer
fn config_path() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
    }
    None
}

/// Remote services when configured, in-process stand-ins otherwise
fn build_collaborators(config: &AgentConfig) -> Collaborators {
    let services = &config.services;

    let semantic: Arc<dyn SimilarityStore>;
    let keyword: Arc<dyn SimilarityStore>;
    match &services.similarity_url {
        Some(url) => {
            info!("Similarity store: {}", url);
            let keyword_url = services.keyword_url.clone().unwrap_or_else(|| url.clone());
            semantic = Arc::new(HttpSimilarityStore::new(url.clone(), SearchChannel::Semantic));
            keyword = Arc::new(HttpSimilarityStore::new(keyword_url, SearchChannel::Keyword));
        }
        None => {
            let corpus = InMemoryCorpus::new(demo_corpus(), CorpusChannel::Semantic);
            info!("Similarity store: built-in demo corpus ({} documents)", corpus.len());
            semantic = Arc::new(corpus);
            keyword = Arc::new(InMemoryCorpus::new(demo_corpus(), CorpusChannel::Keyword));
        }
    }

    let model: Arc<dyn LanguageModel> = match &services.model_url {
        Some(url) => {
            info!("Model provider: {} (models: {:?})", url, config.models.model_ids);
            Arc::new(HttpLanguageModel::new(
                url.clone(),
                services.model_api_key.clone(),
                config.models.max_tokens,
            ))
        }
        None => {
            info!("Model provider: scripted");
            Arc::new(ScriptedModel::grounded())
        }
    };

    let memory: Arc<dyn MemoryStore> = match &services.memory_url {
        Some(url) => {
            info!("Memory store: {}", url);
            Arc::new(HttpMemoryStore::new(url.clone()))
        }
        None => Arc::new(InMemoryMemoryStore::new(
            config.memory.max_entries_per_user,
            config.memory.max_age_secs,
        )),
    };

    Collaborators {
        semantic,
        keyword: Some(keyword),
        model,
        memory,
    }
}

fn demo_document(doc_id: &str, title: &str, text: &str, source_type: SourceType) -> CorpusDocument {
    CorpusDocument {
        doc_id: doc_id.to_string(),
        title: title.to_string(),
        text: text.to_string(),
        source_type,
        metadata: BTreeMap::new(),
    }
}

fn demo_corpus() -> Vec<CorpusDocument> {
    vec![
        demo_document(
            "fwa-s87",
            "Fair Work Act 2009 s 87: Entitlement to annual leave",
            "For each year of service with an employer, an employee is entitled to 4 weeks of paid annual leave. \
             A shift worker is entitled to 5 weeks. Annual leave accrues progressively according to ordinary hours of work.",
            SourceType::Statute,
        ),
        demo_document(
            "fwa-s117",
            "Fair Work Act 2009 s 117: Requirement for notice of termination",
            "An employer must not terminate an employee's employment unless the employer has given the employee \
             written notice of the day of termination. The minimum period of notice depends on the period of continuous service.",
            SourceType::Statute,
        ),
        demo_document(
            "rta-s84",
            "Residential Tenancies Act s 84: Ending a fixed term lease",
            "A landlord may give a tenant a termination notice ending a fixed term tenancy agreement. \
             A tenant who breaks a lease early may be liable to pay a break fee or compensation to the landlord.",
            SourceType::Statute,
        ),
        demo_document(
            "carlill-1893",
            "Carlill v Carbolic Smoke Ball Co [1893] 1 QB 256",
            "An advertisement can amount to a unilateral offer capable of acceptance by performance of its conditions. \
             The contract was binding and consideration was found in the inconvenience of using the product.",
            SourceType::CaseLaw,
        ),
        demo_document(
            "acl-s54",
            "Australian Consumer Law s 54: Guarantee as to acceptable quality",
            "Where goods are supplied to a consumer there is a guarantee that the goods are of acceptable quality. \
             A consumer may seek a refund, repair or replacement for a major failure.",
            SourceType::Statute,
        ),
        demo_document(
            "privacy-app11",
            "Australian Privacy Principle 11: Security of personal information",
            "An entity must take reasonable steps to protect personal information it holds from misuse, interference \
             and loss, and from unauthorised access, modification or disclosure.",
            SourceType::Regulation,
        ),
        demo_document(
            "fwo-leave-guide",
            "Fair Work Ombudsman guide: Annual leave",
            "Full-time and part-time employees get 4 weeks of annual leave each year. Casual employees do not get paid annual leave.",
            SourceType::Guidance,
        ),
    ]
}
