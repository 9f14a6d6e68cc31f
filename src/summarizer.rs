//! Summarization stage: sub-topic grouping and citable excerpt extraction

use crate::context_analyzer::detect_domains;
use crate::keywords;
use crate::types::*;
use serde::Serialize;
use std::collections::BTreeSet;

const ELLIPSIS: char = '…';

/// Bounded excerpt of one document with its provisional citation number
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Excerpt {
    pub doc_id: String,
    pub text: String,
    pub provisional_number: usize,
}

/// Documents sharing a sub-topic, referenced by the model as `[G{id}]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryGroup {
    pub id: usize,
    pub topic: Domain,
    pub documents: Vec<RetrievedDocument>,
    pub excerpts: Vec<Excerpt>,
}

impl SummaryGroup {
    pub fn label(&self) -> String {
        format!("G{}", self.id)
    }

    pub fn mean_relevance(&self) -> f32 {
        if self.documents.is_empty() {
            return 0.0;
        }
        self.documents.iter().map(|d| d.relevance_score).sum::<f32>() / self.documents.len() as f32
    }

    pub fn excerpt_for(&self, doc_id: &str) -> Option<&Excerpt> {
        self.excerpts.iter().find(|e| e.doc_id == doc_id)
    }
}

pub struct SummarizationStage {
    excerpt_chars: usize,
}

impl SummarizationStage {
    pub fn new(excerpt_chars: usize) -> Self {
        Self { excerpt_chars }
    }

    /// Group documents (already in relevance order) by sub-topic. Each
    /// document lands in exactly one group: the first topic it matches.
    pub fn summarize(&self, blueprint: &ContextBlueprint, documents: &[RetrievedDocument]) -> Vec<SummaryGroup> {
        let query_keywords: BTreeSet<String> = blueprint.keywords.iter().cloned().collect();
        let mut groups: Vec<SummaryGroup> = Vec::new();
        let mut next_number = 1;

        for doc in documents {
            let topic = topic_for(doc, &blueprint.detected_domains);
            let excerpt_text = extract_excerpt(&doc.excerpt, &query_keywords, self.excerpt_chars);

            let group = match groups.iter().position(|g| g.topic == topic) {
                Some(idx) => &mut groups[idx],
                None => {
                    let id = groups.len() + 1;
                    groups.push(SummaryGroup {
                        id,
                        topic,
                        documents: Vec::new(),
                        excerpts: Vec::new(),
                    });
                    let last = groups.len() - 1;
                    &mut groups[last]
                }
            };

            group.documents.push(doc.clone());
            group.excerpts.push(Excerpt {
                doc_id: doc.doc_id.clone(),
                text: excerpt_text,
                provisional_number: next_number,
            });
            next_number += 1;
        }

        tracing::debug!("Summarized {} documents into {} groups", documents.len(), groups.len());
        groups
    }
}

/// First detected document domain the query also touches, else the
/// document's strongest domain, else general.
fn topic_for(doc: &RetrievedDocument, query_domains: &BTreeSet<Domain>) -> Domain {
    let doc_domains = detect_domains(&format!("{} {}", doc.title, doc.excerpt));
    doc_domains
        .iter()
        .find(|d| query_domains.contains(*d))
        .or_else(|| doc_domains.first())
        .copied()
        .unwrap_or(Domain::GeneralLegal)
}

/// Pick the sentence with the most query keyword hits and trim it to
/// `max_chars` around the first hit.
pub fn extract_excerpt(text: &str, query_keywords: &BTreeSet<String>, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let sentences = split_sentences(text);
    let best = sentences
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| {
            hit_count(a, query_keywords)
                .cmp(&hit_count(b, query_keywords))
                .then(ib.cmp(ia)) // earlier sentence wins ties
        })
        .map(|(_, s)| *s)
        .unwrap_or(text);

    let chars: Vec<char> = best.chars().collect();
    if chars.len() <= max_chars {
        return best.to_string();
    }

    let anchor = first_hit_char_index(best, query_keywords).unwrap_or(0);
    let budget = max_chars.saturating_sub(2); // room for ellipses
    let mut start = anchor.saturating_sub(budget / 3);
    let end = (start + budget).min(chars.len());
    start = end.saturating_sub(budget);

    let mut excerpt = String::new();
    if start > 0 {
        excerpt.push(ELLIPSIS);
    }
    excerpt.extend(chars[start..end].iter());
    if end < chars.len() {
        excerpt.push(ELLIPSIS);
    }
    excerpt
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (idx, c) in text.char_indices() {
        if matches!(c, '.' | '?' | '!' | '\n') {
            let end = idx + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn hit_count(sentence: &str, query_keywords: &BTreeSet<String>) -> usize {
    keywords::keyword_set(sentence).intersection(query_keywords).count()
}

fn first_hit_char_index(sentence: &str, query_keywords: &BTreeSet<String>) -> Option<usize> {
    let lower = sentence.to_lowercase();
    query_keywords
        .iter()
        .filter_map(|k| lower.find(k.as_str()))
        .min()
        .map(|byte_idx| lower[..byte_idx].chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_analyzer::ContextAnalyzer;

    fn doc(id: &str, title: &str, excerpt: &str, score: f32) -> RetrievedDocument {
        RetrievedDocument {
            doc_id: id.into(),
            title: title.into(),
            excerpt: excerpt.into(),
            relevance_score: score,
            source_type: SourceType::Statute,
        }
    }

    #[test]
    fn test_documents_grouped_by_topic_once() {
        let bp = ContextAnalyzer::new().analyze(
            "Can my landlord end the lease and does my employer have to give notice?",
            &ContextHints::default(),
        );
        let docs = vec![
            doc("d1", "Residential tenancy", "A landlord may end a lease with notice to the tenant.", 0.9),
            doc("d2", "Notice of termination", "An employer must give an employee written notice.", 0.85),
            doc("d3", "Tenancy bonds", "The landlord must lodge the bond.", 0.7),
        ];
        let groups = SummarizationStage::new(200).summarize(&bp, &docs);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].topic, Domain::Property);
        assert_eq!(groups[0].documents.len(), 2);
        assert_eq!(groups[1].topic, Domain::Employment);

        let all_ids: Vec<&str> = groups
            .iter()
            .flat_map(|g| g.documents.iter().map(|d| d.doc_id.as_str()))
            .collect();
        assert_eq!(all_ids.len(), 3, "each document appears in exactly one group");

        let numbers: Vec<usize> = groups
            .iter()
            .flat_map(|g| g.excerpts.iter().map(|e| e.provisional_number))
            .collect();
        assert_eq!(numbers, vec![1, 3, 2]);
    }

    #[test]
    fn test_excerpt_is_bounded_and_centred_on_match() {
        let filler = "This paragraph concerns unrelated procedural history of the matter. ".repeat(5);
        let text = format!(
            "{}Every employee is entitled to four weeks of paid annual leave for each year of service with the employer, accruing progressively according to ordinary hours of work and other qualifying circumstances described in the regulations.",
            filler
        );
        let kws = keywords::keyword_set("annual leave entitlement");
        let excerpt = extract_excerpt(&text, &kws, 200);
        assert!(excerpt.chars().count() <= 200);
        assert!(excerpt.contains("annual leave"));
    }

    #[test]
    fn test_short_text_is_kept_whole() {
        let kws = keywords::keyword_set("bond");
        assert_eq!(extract_excerpt("  The landlord must lodge the bond. ", &kws, 200), "The landlord must lodge the bond.");
    }
}
