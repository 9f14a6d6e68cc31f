//! Answer formatter and citation manager
//!
//! The model's draft refers to source groups as `[G1]`. Numbering is assigned
//! here, in first-use order over the draft, and any numeric marker the model
//! wrote itself is discarded. Every `[n]` left in the answer therefore has a
//! citation map entry and every entry is referenced.

use crate::config::ConfidenceWeights;
use crate::prompt::source_label;
use crate::reasoning::ReasoningOutput;
use crate::scoring::{compute_confidence, mean_relevance, ConfidenceInputs};
use crate::summarizer::SummaryGroup;
use crate::types::*;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;
use uuid::Uuid;

const MIN_FOLLOW_UPS: usize = 2;
const MAX_FOLLOW_UPS: usize = 4;
const MAX_RELATED: usize = 4;

const MODEL_UNAVAILABLE_ANSWER: &str = "No reasoned answer could be produced because the language model was unavailable. \
     Please retry later or consult the primary legislation directly.";
const EMPTY_DRAFT_ANSWER: &str = "The available material did not yield an answer to this question.";

const GENERIC_FOLLOW_UPS: [&str; 3] = [
    "Which jurisdiction's law governs this situation?",
    "Are there time limits for taking action on this issue?",
    "What evidence or documents would support this position?",
];

fn numeric_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // horizontal space only; line breaks before a marker are kept
    RE.get_or_init(|| Regex::new(r"([ \t]?)\[(\d+)\]").expect("numeric marker regex is valid"))
}

fn group_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\[(G\d+(?:\s*,\s*G\d+)*)\]").expect("group reference regex is valid")
    })
}

fn citation_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("citation marker regex is valid"))
}

fn spacing_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)(^[ \t]+)|[ \t]{2,}| +([.,;:!?])").expect("spacing regex is valid"))
}

/// Everything formatting needs from one pipeline attempt
pub struct FormatInput<'a> {
    pub query_id: Uuid,
    pub query: &'a Query,
    pub blueprint: &'a ContextBlueprint,
    pub strategy: Strategy,
    pub groups: &'a [SummaryGroup],
    pub reasoning: &'a ReasoningOutput,
    pub retrieval_notes: &'a [DegradedNote],
    /// Related prior queries for the same user, most relevant first
    pub prior_queries: &'a [String],
}

/// Answer text after group references are replaced by numbered markers
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedAnswer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub citation_map: BTreeMap<usize, String>,
}

pub struct AnswerFormatter {
    weights: ConfidenceWeights,
}

impl AnswerFormatter {
    pub fn new(weights: ConfidenceWeights) -> Self {
        Self { weights }
    }

    pub fn format(&self, input: &FormatInput<'_>) -> AgentResponse {
        let reasoning = input.reasoning;

        let mut rendered = render_citations(&reasoning.draft, input.groups);
        if rendered.text.trim().is_empty() {
            let fallback = if reasoning.model_unavailable {
                MODEL_UNAVAILABLE_ANSWER
            } else {
                EMPTY_DRAFT_ANSWER
            };
            rendered = RenderedAnswer {
                text: fallback.to_string(),
                citations: Vec::new(),
                citation_map: BTreeMap::new(),
            };
        }
        debug_assert!(citations_consistent(&rendered.text, &rendered.citation_map));

        let chain = build_chain(input.retrieval_notes, &reasoning.steps);
        let reasoning_complete = !chain.is_empty() && !chain.iter().any(|s| s.is_degraded());

        let documents = input.groups.iter().flat_map(|g| g.documents.iter());
        let confidence = compute_confidence(
            &ConfidenceInputs {
                mean_relevance: mean_relevance(documents),
                citation_coverage: citation_coverage(&rendered.text),
                reasoning_complete,
                used_fallback_model: reasoning.used_fallback,
                model_unavailable: reasoning.model_unavailable,
            },
            &self.weights,
        );

        let cited: BTreeSet<&str> = rendered
            .citations
            .iter()
            .map(|c| c.source_ref.doc_id.as_str())
            .collect();
        let follow_up_suggestions = follow_ups(input.blueprint, input.groups, &cited);
        let related_queries = related_queries(input.query, input.blueprint, input.groups, &cited, input.prior_queries);

        let mut metadata = ResponseMetadata::new(input.query_id);
        metadata.model_used = reasoning.model_used.clone();
        metadata.degraded = input
            .retrieval_notes
            .iter()
            .chain(reasoning.degraded.iter())
            .cloned()
            .collect();
        metadata.counterpoints = reasoning.counterpoints.clone();

        AgentResponse {
            answer_text: rendered.text,
            citations: rendered.citations,
            citation_map: rendered.citation_map,
            confidence,
            strategy_used: input.strategy,
            reasoning_chain: chain,
            follow_up_suggestions,
            related_queries,
            metadata,
        }
    }
}

/// Replace `[Gk]` references with `[n]` markers numbered on first use.
/// A group reference cites every document in that group; unknown groups and
/// numeric markers already in the draft are dropped.
pub fn render_citations(draft: &str, groups: &[SummaryGroup]) -> RenderedAnswer {
    let by_id: HashMap<usize, &SummaryGroup> = groups.iter().map(|g| (g.id, g)).collect();
    let stripped = strip_numeric_markers(draft);

    let mut numbers: HashMap<String, usize> = HashMap::new();
    let mut citations: Vec<Citation> = Vec::new();

    let substituted = group_ref_re().replace_all(&stripped, |caps: &Captures| {
        let mut markers = String::new();
        for label in caps[1].split(',') {
            let group = label
                .trim()
                .get(1..)
                .and_then(|n| n.parse::<usize>().ok())
                .and_then(|id| by_id.get(&id));
            let Some(group) = group else { continue };

            for doc in &group.documents {
                let next = numbers.len() + 1;
                let number = *numbers.entry(doc.doc_id.clone()).or_insert_with(|| {
                    citations.push(Citation {
                        number: next,
                        source_ref: doc.clone(),
                        citation_text: citation_text(doc, group),
                    });
                    next
                });
                let marker = format!("[{}]", number);
                if !markers.contains(&marker) {
                    markers.push_str(&marker);
                }
            }
        }
        markers
    });

    let text = spacing_re()
        .replace_all(&substituted, |caps: &Captures| {
            if caps.get(1).is_some() {
                String::new()
            } else if let Some(punct) = caps.get(2) {
                punct.as_str().to_string()
            } else {
                " ".to_string()
            }
        })
        .trim()
        .to_string();

    let citation_map = citations
        .iter()
        .map(|c| (c.number, c.citation_text.clone()))
        .collect();
    RenderedAnswer { text, citations, citation_map }
}

/// Drop numeric markers the model wrote. A bracketed four-digit number is
/// taken to be a year and kept in parentheses: `[1893]` becomes `(1893)`.
fn strip_numeric_markers(draft: &str) -> Cow<'_, str> {
    numeric_marker_re().replace_all(draft, |caps: &Captures| {
        let digits = &caps[2];
        if digits.len() == 4 {
            format!("{}({})", &caps[1], digits)
        } else {
            String::new()
        }
    })
}

fn citation_text(doc: &RetrievedDocument, group: &SummaryGroup) -> String {
    let excerpt = group
        .excerpt_for(&doc.doc_id)
        .map(|e| e.text.as_str())
        .unwrap_or(doc.excerpt.as_str());
    format!("{} ({}): \"{}\"", doc.title, source_label(doc.source_type), excerpt)
}

/// Numbers used in the text and the map keys are the same set
pub fn citations_consistent(text: &str, citation_map: &BTreeMap<usize, String>) -> bool {
    let used: BTreeSet<usize> = citation_marker_re()
        .captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    used.iter().eq(citation_map.keys())
}

/// Fraction of answer sentences carrying at least one marker. A fragment
/// made only of markers belongs to the sentence before it.
pub fn citation_coverage(text: &str) -> f32 {
    let mut claims: Vec<bool> = Vec::new();
    for fragment in split_claims(text) {
        let has_marker = citation_marker_re().is_match(fragment);
        let bare = citation_marker_re().replace_all(fragment, "");
        let has_words = bare.chars().any(|c| c.is_alphanumeric());

        match (has_words, claims.last_mut()) {
            (true, _) => claims.push(has_marker),
            (false, Some(last)) => *last |= has_marker,
            (false, None) => {}
        }
    }

    if claims.is_empty() {
        return 0.0;
    }
    claims.iter().filter(|c| **c).count() as f32 / claims.len() as f32
}

fn split_claims(text: &str) -> Vec<&str> {
    let mut claims = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        let at_boundary = matches!(c, '.' | '?' | '!' | '\n')
            && chars.peek().map_or(true, |(_, next)| next.is_whitespace());
        if at_boundary {
            let end = idx + c.len_utf8();
            let claim = text[start..end].trim();
            if !claim.is_empty() {
                claims.push(claim);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        claims.push(tail);
    }
    claims
}

/// Retrieval notes lead as degraded steps, then the model's steps; indices
/// run 1..n over the combined chain.
fn build_chain(retrieval_notes: &[DegradedNote], steps: &[ReasoningStep]) -> Vec<ReasoningStep> {
    retrieval_notes
        .iter()
        .map(|note| ReasoningStep::degraded(0, &note.reason))
        .chain(steps.iter().cloned())
        .enumerate()
        .map(|(i, mut step)| {
            step.index = i + 1;
            step
        })
        .collect()
}

fn domain_follow_up(domain: Domain) -> &'static str {
    match domain {
        Domain::Employment => "What notice or redundancy obligations apply to the employer?",
        Domain::Contract => "What remedies are available if the contract is breached?",
        Domain::Criminal => "What defences or sentencing considerations might apply?",
        Domain::Family => "How would a court weigh the interests of any children involved?",
        Domain::Property => "What notice periods apply to the landlord and tenant?",
        Domain::Corporate => "What duties do the directors owe in this situation?",
        Domain::Tax => "Which deductions or exemptions might be available?",
        Domain::Immigration => "Which visa conditions could be affected?",
        Domain::IntellectualProperty => "Is registration required to enforce these rights?",
        Domain::Tort => "What damages could be recovered for the harm suffered?",
        Domain::Consumer => "Which statutory guarantees apply to the purchase?",
        Domain::Privacy => "What must be done if personal information has been disclosed?",
        Domain::GeneralLegal => "Would it help to speak with a qualified lawyer about this matter?",
    }
}

/// Uncited sub-topics first, then per-domain prompts, padded with generic ones
fn follow_ups(blueprint: &ContextBlueprint, groups: &[SummaryGroup], cited: &BTreeSet<&str>) -> Vec<String> {
    let uncited = groups
        .iter()
        .filter(|g| !g.documents.iter().any(|d| cited.contains(d.doc_id.as_str())))
        .map(|g| format!("How does {} bear on this question?", g.topic.label()));
    let by_domain = blueprint
        .detected_domains
        .iter()
        .map(|d| domain_follow_up(*d).to_string());

    let mut out: Vec<String> = Vec::new();
    for suggestion in uncited.chain(by_domain) {
        if out.len() == MAX_FOLLOW_UPS {
            break;
        }
        if !out.contains(&suggestion) {
            out.push(suggestion);
        }
    }
    for generic in GENERIC_FOLLOW_UPS {
        if out.len() >= MIN_FOLLOW_UPS {
            break;
        }
        if !out.iter().any(|s| s == generic) {
            out.push(generic.to_string());
        }
    }
    out
}

/// Related prior queries first, then uncited sub-topics and detected
/// domains, padded with queries on the primary domain
fn related_queries(
    query: &Query,
    blueprint: &ContextBlueprint,
    groups: &[SummaryGroup],
    cited: &BTreeSet<&str>,
    prior: &[String],
) -> Vec<String> {
    let own = query.text.trim().to_lowercase();
    let phrase = blueprint.keywords.iter().take(4).cloned().collect::<Vec<_>>().join(" ");
    let about = |domain: Domain| {
        if phrase.is_empty() {
            format!("Key principles of {}", domain.label())
        } else {
            format!("{} under {}", phrase, domain.label())
        }
    };

    let uncited = groups
        .iter()
        .filter(|g| !g.documents.iter().any(|d| cited.contains(d.doc_id.as_str())))
        .map(|g| about(g.topic));
    let by_domain = blueprint.detected_domains.iter().map(|d| about(*d));
    let primary = blueprint.primary_domain().label();
    let padding = [
        format!("Recent decisions in {}", primary),
        format!("Key principles of {}", primary),
        format!("Statutory framework for {}", primary),
    ];

    let mut out: Vec<String> = Vec::new();
    for candidate in prior.iter().cloned().chain(uncited).chain(by_domain) {
        push_related(&mut out, candidate, &own);
    }
    for candidate in padding {
        if out.len() >= MIN_FOLLOW_UPS {
            break;
        }
        push_related(&mut out, candidate, &own);
    }
    out
}

fn push_related(out: &mut Vec<String>, candidate: String, own: &str) {
    if out.len() == MAX_RELATED {
        return;
    }
    let lower = candidate.trim().to_lowercase();
    if lower.is_empty() || lower == own || out.iter().any(|o| o.to_lowercase() == lower) {
        return;
    }
    out.push(candidate);
}
