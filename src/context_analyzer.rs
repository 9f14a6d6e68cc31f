//! Query classification into domains, complexity and urgency

use crate::keywords;
use crate::strategy;
use crate::types::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Confidence contributed by each vocabulary hit
const HIT_WEIGHT: f32 = 0.35;

const CONJUNCTIONS: &[&str] = &["and", "or", "but", "whether", "versus", "vs", "also", "while", "whereas"];

const HIGH_URGENCY_TERMS: &[&str] = &[
    "urgent", "urgently", "immediately", "asap", "emergency", "today", "tomorrow", "deadline",
    "right now", "this week", "court date", "served",
];

const LOW_URGENCY_TERMS: &[&str] = &[
    "general", "generally", "curious", "hypothetical", "hypothetically", "eventually",
    "no rush", "in theory", "background",
];

fn vocabulary(domain: Domain) -> &'static [&'static str] {
    match domain {
        Domain::Employment => &[
            "employee", "employees", "employer", "employers", "employment", "leave", "annual leave",
            "sick leave", "parental leave", "long service leave", "wage", "wages", "minimum wage",
            "salary", "dismissal", "unfair dismissal", "redundancy", "workplace", "overtime",
            "entitlement", "entitlements", "award", "fair work", "notice period", "worker", "workers",
        ],
        Domain::Contract => &[
            "contract", "contracts", "breach", "agreement", "clause", "consideration", "offer",
            "acceptance", "termination clause", "indemnity", "signed", "terms", "void", "rescission",
        ],
        Domain::Criminal => &[
            "crime", "criminal", "offence", "offense", "arrest", "arrested", "bail", "sentence",
            "sentencing", "prosecution", "theft", "assault", "police", "charged", "conviction",
        ],
        Domain::Family => &[
            "divorce", "custody", "child support", "marriage", "separation", "spouse", "parenting",
            "adoption", "prenuptial", "alimony", "de facto",
        ],
        Domain::Property => &[
            "property", "lease", "tenant", "tenants", "landlord", "tenancy", "rent", "mortgage",
            "easement", "eviction", "conveyancing", "zoning", "strata", "bond",
        ],
        Domain::Corporate => &[
            "company", "companies", "corporation", "director", "directors", "shareholder",
            "shareholders", "merger", "acquisition", "insolvency", "governance", "partnership",
        ],
        Domain::Tax => &[
            "tax", "taxes", "taxation", "gst", "vat", "deduction", "deductions", "income tax",
            "capital gains", "payroll tax", "tax return",
        ],
        Domain::Immigration => &[
            "visa", "visas", "immigration", "citizenship", "deportation", "asylum", "refugee",
            "residency", "permanent residence", "sponsorship",
        ],
        Domain::IntellectualProperty => &[
            "copyright", "trademark", "trade mark", "patent", "patents", "infringement",
            "intellectual property", "licence", "license", "trade secret",
        ],
        Domain::Tort => &[
            "negligence", "negligent", "injury", "personal injury", "liability", "duty of care",
            "defamation", "nuisance", "compensation", "damages",
        ],
        Domain::Consumer => &[
            "consumer", "consumers", "refund", "warranty", "guarantee", "faulty", "product",
            "misleading", "scam", "unfair contract terms",
        ],
        Domain::Privacy => &[
            "privacy", "personal data", "data breach", "gdpr", "personal information",
            "surveillance", "consent",
        ],
        Domain::GeneralLegal => &[],
    }
}

/// Stateless analyzer over a fixed domain vocabulary
#[derive(Debug, Clone, Default)]
pub struct ContextAnalyzer;

impl ContextAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Classify a query. Never fails; unmatched queries fall back to
    /// `GeneralLegal` with low complexity.
    pub fn analyze(&self, text: &str, hints: &ContextHints) -> ContextBlueprint {
        let normalized = normalize(text);

        let mut domain_confidence: BTreeMap<Domain, f32> = domain_hits(&normalized)
            .into_iter()
            .map(|(domain, hits)| (domain, (hits as f32 * HIT_WEIGHT).min(1.0)))
            .collect();
        for domain in &hints.domains {
            domain_confidence.insert(*domain, 1.0);
        }

        let matched = !domain_confidence.is_empty();
        if !matched {
            domain_confidence.insert(Domain::GeneralLegal, 0.0);
        }
        let detected_domains: BTreeSet<Domain> = domain_confidence.keys().copied().collect();

        let complexity = if matched {
            estimate_complexity(text, &normalized, detected_domains.len())
        } else {
            Complexity::Low
        };
        let urgency = hints.urgency.unwrap_or_else(|| estimate_urgency(&normalized));
        let recommended_strategy = strategy::recommend(&domain_confidence, complexity, urgency);

        debug!(
            "Analyzed query: domains={:?}, complexity={:?}, urgency={:?}, strategy={}",
            detected_domains, complexity, urgency, recommended_strategy.as_str()
        );

        ContextBlueprint {
            detected_domains,
            domain_confidence,
            complexity,
            urgency,
            recommended_strategy,
            keywords: keywords::extract(text),
        }
    }
}

/// Domains whose vocabulary appears in `text`, strongest first
pub fn detect_domains(text: &str) -> Vec<Domain> {
    let mut hits: Vec<(Domain, usize)> = domain_hits(&normalize(text)).into_iter().collect();
    hits.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    hits.into_iter().map(|(domain, _)| domain).collect()
}

fn normalize(text: &str) -> String {
    let joined: Vec<String> = keywords::tokens(text).collect();
    format!(" {} ", joined.join(" "))
}

fn contains_term(normalized: &str, term: &str) -> bool {
    normalized.contains(&format!(" {} ", term))
}

fn domain_hits(normalized: &str) -> BTreeMap<Domain, usize> {
    let mut hits = BTreeMap::new();
    for domain in Domain::ALL {
        let count = vocabulary(domain)
            .iter()
            .filter(|term| contains_term(normalized, term))
            .count();
        if count > 0 {
            hits.insert(domain, count);
        }
    }
    hits
}

fn estimate_complexity(text: &str, normalized: &str, domain_count: usize) -> Complexity {
    let word_count = text.split_whitespace().count();
    let mut score = match word_count {
        0..=12 => 0,
        13..=25 => 1,
        _ => 2,
    };

    let conjunctions = normalized
        .split_whitespace()
        .filter(|w| CONJUNCTIONS.contains(w))
        .count();
    let questions = text.matches('?').count();
    let clauses = text.matches(';').count();
    score += (conjunctions + questions.saturating_sub(1) + clauses).min(2);
    score += domain_count.saturating_sub(1);

    match score {
        0..=1 => Complexity::Low,
        2..=3 => Complexity::Medium,
        _ => Complexity::High,
    }
}

fn estimate_urgency(normalized: &str) -> Urgency {
    if HIGH_URGENCY_TERMS.iter().any(|t| contains_term(normalized, t)) {
        Urgency::High
    } else if LOW_URGENCY_TERMS.iter().any(|t| contains_term(normalized, t)) {
        Urgency::Low
    } else {
        Urgency::Medium
    }
}
