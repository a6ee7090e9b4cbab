//! Budgeted context assembly and suggestion extraction.

use super::RetrievalResult;
use crate::config::{ContextBudget, SuggestionLimits};
use crate::normalizer::truncate_chars;

/// Appended wherever text was cut to fit a budget.
pub const TRUNCATION_MARKER: &str = "...";

/// Cuts `text` to `max_chars` characters, appending the marker when anything was dropped.
pub fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    let kept = truncate_chars(text, max_chars);
    if kept.len() == text.len() {
        text.to_string()
    } else {
        format!("{kept}{TRUNCATION_MARKER}")
    }
}

/// Builds the context string from the highest-ranked results.
///
/// Only the first `max_docs_in_context` results are eligible. The output never exceeds
/// `max_context_chars` characters, marker included.
pub fn assemble_context(query: &str, results: &[RetrievalResult], budget: &ContextBudget) -> String {
    let first_word = query
        .split_whitespace()
        .next()
        .map(str::to_lowercase)
        .unwrap_or_default();

    let sections: Vec<String> = results
        .iter()
        .take(budget.max_docs_in_context)
        .map(|result| document_section(result, &first_word, budget))
        .collect();
    let context = sections.join("\n\n");

    if context.chars().count() <= budget.max_context_chars {
        return context;
    }
    let marker_chars = TRUNCATION_MARKER.chars().count();
    if budget.max_context_chars <= marker_chars {
        return truncate_chars(&context, budget.max_context_chars).to_string();
    }
    let room = budget.max_context_chars - marker_chars;
    format!("{}{TRUNCATION_MARKER}", truncate_chars(&context, room))
}

fn document_section(result: &RetrievalResult, first_word: &str, budget: &ContextBudget) -> String {
    let mut section = String::new();
    if let Some(description) = non_blank(result.description.as_deref()) {
        section.push('[');
        section.push_str(truncate_chars(description, budget.description_chars));
        section.push_str("] ");
    }
    section.push_str(&truncate_with_marker(&result.content, budget.max_doc_chars));
    if let Some(usage_context) = non_blank(result.usage_context.as_deref()) {
        if !first_word.is_empty() && usage_context.to_lowercase().contains(first_word) {
            section.push_str("\nContext: ");
            section.push_str(truncate_chars(usage_context, budget.usage_context_chars));
        }
    }
    section
}

/// Distinct usage-instruction lines within the length bounds, across all results.
pub fn extract_suggestions(results: &[RetrievalResult], limits: &SuggestionLimits) -> Vec<String> {
    let mut suggestions: Vec<String> = Vec::new();
    let lines = results
        .iter()
        .filter_map(|result| result.usage_instructions.as_deref())
        .flat_map(str::lines)
        .map(str::trim);
    for line in lines {
        if suggestions.len() >= limits.max_suggestions {
            break;
        }
        let len = line.chars().count();
        if len < limits.min_chars || len > limits.max_chars {
            continue;
        }
        if !suggestions.iter().any(|existing| existing == line) {
            suggestions.push(line.to_string());
        }
    }
    suggestions
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}
