//! Keyword extraction shared by analysis, retrieval scoring and memory lookup

use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "your", "with", "what", "when", "where",
    "which", "who", "whom", "why", "how", "can", "could", "does", "did", "has", "have", "had",
    "was", "were", "will", "would", "should", "shall", "may", "might", "must", "this", "that",
    "these", "those", "there", "their", "them", "they", "from", "into", "about", "any", "all",
    "our", "its", "his", "her", "she", "him", "been", "being", "than", "then", "also", "only",
    "some", "such", "under", "over", "per", "out", "get", "use", "one", "two", "is", "am",
];

/// Lowercased content words of at least three characters, in order of first appearance
pub fn extract(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut keywords = Vec::new();
    for token in tokens(text) {
        if token.len() < 3 || STOPWORDS.contains(&token.as_str()) {
            continue;
        }
        if seen.insert(token.clone()) {
            keywords.push(token);
        }
    }
    keywords
}

/// Same as `extract` but as a set, for overlap counting
pub fn keyword_set(text: &str) -> BTreeSet<String> {
    extract(text).into_iter().collect()
}

/// Number of keywords the two texts share
pub fn shared_count(a: &BTreeSet<String>, b: &BTreeSet<String>) -> usize {
    a.intersection(b).count()
}

/// Lowercased alphanumeric tokens (apostrophes dropped)
pub fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|t| t.replace('\'', "").to_lowercase())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_drops_stopwords_and_duplicates() {
        let kws = extract("What is the minimum annual leave entitlement? Annual leave!");
        assert_eq!(kws, vec!["minimum", "annual", "leave", "entitlement"]);
    }

    #[test]
    fn test_shared_count() {
        let a = keyword_set("minimum annual leave entitlement");
        let b = keyword_set("how is annual leave entitlement calculated");
        assert_eq!(shared_count(&a, &b), 3);
    }

    #[test]
    fn test_apostrophes_are_folded() {
        let kws = extract("employer's obligations");
        assert_eq!(kws, vec!["employers", "obligations"]);
    }
}
