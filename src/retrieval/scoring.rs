//! Tag filtering and metadata-aware relevance scoring.

use serde_json::Value;

use crate::config::ScoringWeights;
use crate::store::Candidate;

/// Shortest query word that counts toward lexical overlap.
const MIN_TERM_CHARS: usize = 4;

/// Keeps untagged documents; tagged ones need a case-insensitive match.
pub fn passes_tag_filter(document_tags: &[String], requested: &[String]) -> bool {
    if requested.is_empty() || document_tags.iter().all(|tag| tag.trim().is_empty()) {
        return true;
    }
    let requested: Vec<String> = requested
        .iter()
        .map(|wanted| wanted.trim().to_lowercase())
        .collect();
    document_tags
        .iter()
        .any(|tag| requested.contains(&tag.trim().to_lowercase()))
}

/// Lowercased query words of at least four characters, first occurrence order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= MIN_TERM_CHARS)
    {
        let word = word.to_lowercase();
        if !terms.contains(&word) {
            terms.push(word);
        }
    }
    terms
}

/// Fraction of `terms` found as substrings of `text`.
pub fn lexical_overlap(terms: &[String], text: &str) -> f32 {
    if terms.is_empty() || text.is_empty() {
        return 0.0;
    }
    let haystack = text.to_lowercase();
    let found = terms
        .iter()
        .filter(|term| haystack.contains(term.as_str()))
        .count();
    found as f32 / terms.len() as f32
}

/// Similarity plus metadata bonuses, clamped to `[0, 1]`.
///
/// Missing fields contribute nothing.
pub fn relevance_score(candidate: &Candidate, terms: &[String], weights: &ScoringWeights) -> f32 {
    let mut score = candidate.similarity.clamp(0.0, 1.0);
    if let Some(description) = candidate.description.as_deref() {
        score += weights.description * lexical_overlap(terms, description);
    }
    if !candidate.tags.is_empty() {
        score += weights.tags * lexical_overlap(terms, &candidate.tags.join(" "));
    }
    if let Some(usage_context) = candidate.usage_context.as_deref() {
        score += weights.usage_context * lexical_overlap(terms, usage_context);
    }
    if candidate
        .dialogue_examples
        .as_ref()
        .is_some_and(has_dialogue)
    {
        score += weights.dialogue_examples;
    }
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn has_dialogue(value: &Value) -> bool {
    match value {
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::String(text) => !text.trim().is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate(similarity: f32) -> Candidate {
        Candidate {
            id: "doc".into(),
            content: "content".into(),
            similarity,
            metadata: json!({}),
            tags: Vec::new(),
            description: None,
            usage_context: None,
            usage_instructions: None,
            dialogue_examples: None,
        }
    }

    fn tags(items: &[&str]) -> Vec<String> {
        items.iter().map(|tag| tag.to_string()).collect()
    }

    #[test]
    fn untagged_documents_always_pass() {
        assert!(passes_tag_filter(&[], &tags(&["pricing"])));
        assert!(passes_tag_filter(&tags(&[""]), &tags(&["pricing"])));
        assert!(passes_tag_filter(&tags(&["Pricing"]), &tags(&["pricing"])));
        assert!(!passes_tag_filter(&tags(&["shipping"]), &tags(&["pricing"])));
        assert!(passes_tag_filter(&tags(&["shipping"]), &[]));
    }

    #[test]
    fn short_words_are_ignored() {
        assert_eq!(
            query_terms("What is the refund policy for refund?"),
            vec!["what", "refund", "policy"]
        );
    }

    #[test]
    fn bonuses_follow_weights() {
        let weights = ScoringWeights::default();
        let terms = query_terms("refund policy");
        let mut doc = candidate(0.5);
        doc.description = Some("Refund rules".into());
        doc.tags = tags(&["policy", "refund"]);
        doc.usage_context = Some("unrelated".into());
        doc.dialogue_examples = Some(json!([{ "user": "hi" }]));
        let score = relevance_score(&doc, &terms, &weights);
        // 0.5 + 0.10 * 0.5 + 0.15 * 1.0 + 0.0 + 0.05
        assert!((score - 0.75).abs() < 1e-6, "{score}");
    }

    #[test]
    fn missing_metadata_scores_as_similarity() {
        let terms = query_terms("refund policy");
        let score = relevance_score(&candidate(0.42), &terms, &ScoringWeights::default());
        assert!((score - 0.42).abs() < 1e-6);
    }

    #[test]
    fn score_is_clamped_for_any_weights() {
        let heavy = ScoringWeights {
            description: 5.0,
            tags: 5.0,
            usage_context: 5.0,
            dialogue_examples: 5.0,
        };
        let negative = ScoringWeights {
            description: -5.0,
            tags: -5.0,
            usage_context: -5.0,
            dialogue_examples: -5.0,
        };
        let terms = query_terms("refund policy");
        let mut doc = candidate(0.9);
        doc.description = Some("refund".into());
        doc.tags = tags(&["policy"]);
        doc.usage_context = Some("refund policy".into());
        doc.dialogue_examples = Some(json!("A: hi"));
        for weights in [heavy, negative, ScoringWeights::default()] {
            let score = relevance_score(&doc, &terms, &weights);
            assert!((0.0..=1.0).contains(&score), "{score}");
        }
    }
}
