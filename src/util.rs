//! Shared utility functions for the Conductor crate.

use std::collections::HashSet;

/// Words too common to carry meaning when comparing instructions to
/// worker output.
const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "to", "of", "in", "on", "for", "with", "at", "by",
    "from", "as", "is", "are", "was", "were", "be", "been", "it", "this", "that", "these",
    "those", "will", "would", "can", "could", "should", "have", "has", "had", "not", "you",
    "your", "our", "their", "then", "than", "into", "about", "over", "under", "all", "any",
    "some", "please", "use", "using",
];

/// Lowercase a text into its set of meaningful keywords.
///
/// Splits on non-alphanumeric boundaries, drops stopwords and tokens
/// shorter than three characters.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

/// Jaccard similarity between the keyword sets of two texts.
///
/// Returns 0.0 when either text has no meaningful keywords.
pub fn keyword_overlap(a: &str, b: &str) -> f64 {
    let set_a = tokenize(a);
    let set_b = tokenize(b);

    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();

    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Truncate a text to at most `max_chars` characters, appending an
/// ellipsis when anything was cut. Operates on characters, not bytes,
/// so multibyte input never splits mid-character.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Extract a JSON object from text that may contain other content.
/// Uses brace-counting to find the outermost JSON object.
pub fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0;
    let mut end = start;

    for (i, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = start + i + 1;
                    break;
                }
            }
            _ => {}
        }
    }

    if depth == 0 && end > start {
        Some(text[start..end].to_string())
    } else {
        None
    }
}
