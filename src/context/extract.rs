//! Fact and artifact extraction from worker responses.

use regex::Regex;
use std::sync::LazyLock;

// Compile regexes once using LazyLock
static ARTIFACT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[\w./\\-]+\.(pdf|docx?|md|txt|csv|json|png|jpe?g|html?|xlsx?|pptx?|zip)\b")
        .unwrap()
});

static URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s)\]}>,"']+"#).unwrap());

static LIST_PREFIX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s+").unwrap());

/// Pull artifact references (file names and URLs) out of a response.
/// Order of first appearance, de-duplicated.
pub fn extract_artifacts(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut artifacts = Vec::new();
    for m in ARTIFACT_REGEX.find_iter(text).chain(URL_REGEX.find_iter(text)) {
        let artifact = m.as_str().trim_end_matches(['.', ',']).to_string();
        if seen.insert(artifact.clone()) {
            artifacts.push(artifact);
        }
    }
    artifacts
}

/// Pull up to `max` fact-like statements out of a response.
///
/// Bulleted or numbered lines qualify directly; otherwise short lines
/// carrying a figure or a key-value shape are kept. Raw tool output and
/// prose filler are dropped.
pub fn extract_facts(text: &str, max: usize) -> Vec<String> {
    let mut facts = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.len() > 240 {
            continue;
        }
        let is_listed = LIST_PREFIX_REGEX.is_match(trimmed);
        let has_figure = trimmed.chars().any(|c| c.is_ascii_digit());
        let is_key_value = trimmed.contains(": ") && trimmed.len() < 160;
        if is_listed || has_figure || is_key_value {
            let fact = LIST_PREFIX_REGEX.replace(trimmed, "").into_owned();
            if !facts.contains(&fact) {
                facts.push(fact);
            }
            if facts.len() >= max {
                break;
            }
        }
    }
    facts
}
