//! Aggregate answer confidence

use crate::config::ConfidenceWeights;
use crate::types::RetrievedDocument;

/// Everything the confidence score depends on. Two runs producing equal
/// inputs produce an identical score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceInputs {
    pub mean_relevance: f32,
    /// Fraction of answer claims carrying at least one citation
    pub citation_coverage: f32,
    /// Chain is non-empty and carries no degraded-mode step
    pub reasoning_complete: bool,
    pub used_fallback_model: bool,
    pub model_unavailable: bool,
}

/// Weighted combination of relevance, coverage and completeness, clamped to [0, 1]
pub fn compute_confidence(inputs: &ConfidenceInputs, weights: &ConfidenceWeights) -> f32 {
    let total = weights.relevance + weights.citation_coverage + weights.reasoning_completeness;
    if total <= 0.0 {
        return 0.0;
    }

    let completeness = if inputs.reasoning_complete { 1.0 } else { 0.0 };
    let mut score = (weights.relevance * inputs.mean_relevance.clamp(0.0, 1.0)
        + weights.citation_coverage * inputs.citation_coverage.clamp(0.0, 1.0)
        + weights.reasoning_completeness * completeness)
        / total;

    if inputs.used_fallback_model {
        score -= weights.fallback_penalty;
    }
    if inputs.model_unavailable {
        score = score.min(weights.model_unavailable_cap);
    }

    score.clamp(0.0, 1.0)
}

/// Mean relevance of the documents an answer drew on (0 when none)
pub fn mean_relevance<'a>(documents: impl IntoIterator<Item = &'a RetrievedDocument>) -> f32 {
    let (sum, count) = documents
        .into_iter()
        .fold((0.0f32, 0usize), |(s, n), d| (s + d.relevance_score, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}
