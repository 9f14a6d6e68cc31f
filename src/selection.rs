//! Fusion, ranking and source-diversified selection of retrieved documents

use crate::types::*;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Merge result lists from several channels, keeping the highest
/// relevance score seen for each `doc_id`.
pub fn fuse_results(result_lists: Vec<Vec<RetrievedDocument>>) -> Vec<RetrievedDocument> {
    let mut map: HashMap<String, RetrievedDocument> = HashMap::new();

    for results in result_lists {
        for doc in results {
            map.entry(doc.doc_id.clone())
                .and_modify(|existing| {
                    if doc.relevance_score > existing.relevance_score {
                        *existing = doc.clone();
                    }
                })
                .or_insert(doc);
        }
    }

    map.into_values().collect()
}

/// Sort by relevance descending; `doc_id` breaks ties so order is stable
pub fn rank(documents: &mut [RetrievedDocument]) {
    documents.sort_by(|a, b| {
        b.relevance_score
            .total_cmp(&a.relevance_score)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
}

/// Select at most `max_sources` documents above `floor`.
///
/// With `diversify` set, documents are taken round-robin across
/// `source_type` buckets (each bucket in relevance order) instead of
/// purely by score.
pub fn select(
    mut documents: Vec<RetrievedDocument>,
    floor: f32,
    max_sources: usize,
    diversify: bool,
) -> Vec<RetrievedDocument> {
    documents.retain(|d| d.relevance_score >= floor);
    rank(&mut documents);

    if !diversify {
        documents.truncate(max_sources);
        return documents;
    }

    // Buckets ordered by their best document so the strongest type leads
    let mut buckets: BTreeMap<SourceType, VecDeque<RetrievedDocument>> = BTreeMap::new();
    let mut bucket_order: Vec<SourceType> = Vec::new();
    for doc in documents {
        if !buckets.contains_key(&doc.source_type) {
            bucket_order.push(doc.source_type);
        }
        buckets.entry(doc.source_type).or_default().push_back(doc);
    }

    let mut selected = Vec::with_capacity(max_sources);
    while selected.len() < max_sources {
        let mut took_any = false;
        for source_type in &bucket_order {
            if selected.len() >= max_sources {
                break;
            }
            if let Some(doc) = buckets.get_mut(source_type).and_then(|b| b.pop_front()) {
                selected.push(doc);
                took_any = true;
            }
        }
        if !took_any {
            break;
        }
    }

    tracing::debug!("Diversified selection across {} source types", bucket_order.len());
    selected
}

/// Count of selected documents per source type
pub fn source_distribution(documents: &[RetrievedDocument]) -> BTreeMap<SourceType, usize> {
    let mut dist = BTreeMap::new();
    for doc in documents {
        *dist.entry(doc.source_type).or_insert(0) += 1;
    }
    dist
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, score: f32, source_type: SourceType) -> RetrievedDocument {
        RetrievedDocument {
            doc_id: id.to_string(),
            title: format!("Title {}", id),
            excerpt: format!("Excerpt {}", id),
            relevance_score: score,
            source_type,
        }
    }

    #[test]
    fn test_fuse_keeps_highest_score() {
        let fused = fuse_results(vec![
            vec![doc("a", 0.4, SourceType::Statute), doc("b", 0.9, SourceType::CaseLaw)],
            vec![doc("a", 0.7, SourceType::Statute)],
        ]);
        assert_eq!(fused.len(), 2);
        let a = fused.iter().find(|d| d.doc_id == "a").unwrap();
        assert!((a.relevance_score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_select_applies_floor_and_cap() {
        let docs = vec![
            doc("a", 0.95, SourceType::Statute),
            doc("b", 0.85, SourceType::Statute),
            doc("c", 0.79, SourceType::CaseLaw),
            doc("d", 0.81, SourceType::CaseLaw),
        ];
        let selected = select(docs, 0.8, 2, false);
        assert_eq!(selected.iter().map(|d| d.doc_id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_diversified_selection_round_robins_source_types() {
        let docs = vec![
            doc("s1", 0.95, SourceType::Statute),
            doc("s2", 0.94, SourceType::Statute),
            doc("s3", 0.93, SourceType::Statute),
            doc("c1", 0.6, SourceType::CaseLaw),
            doc("g1", 0.5, SourceType::Guidance),
        ];
        let selected = select(docs, 0.3, 4, true);
        let ids: Vec<&str> = selected.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "c1", "g1", "s2"]);
        assert_eq!(source_distribution(&selected).len(), 3);
    }

    #[test]
    fn test_rank_is_stable_on_ties() {
        let mut docs = vec![doc("b", 0.5, SourceType::Other), doc("a", 0.5, SourceType::Other)];
        rank(&mut docs);
        assert_eq!(docs[0].doc_id, "a");
    }
}
