//! Cross-step context accumulation and compression.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::context::extract::{extract_artifacts, extract_facts};
use crate::plan::Step;
use crate::util::{keyword_overlap, truncate_chars};

// Compile regexes once using LazyLock
static STEP_REFERENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bstep\s+(\d+)").unwrap());

/// Relevance decay per step of distance between producer and consumer.
const RECENCY_DECAY: f64 = 0.9;
/// Bonus when the target step explicitly references the producer step or
/// one of its artifacts.
const LINK_BONUS: f64 = 0.5;
/// Bonus for the immediately preceding step.
const PREDECESSOR_BONUS: f64 = 0.15;
/// Maximum facts carried per entry.
const MAX_FACTS: usize = 5;
/// Characters of raw summary kept per entry.
const SUMMARY_CHARS: usize = 240;
/// Entries kept before the oldest are folded into the digest.
const MAX_ENTRIES: usize = 50;
/// Minimum remaining budget worth trying to fill.
const MIN_RENDER_BUDGET: usize = 30;

/// Compact, append-only record of one completed step's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    pub step_index: usize,
    pub title: String,
    /// Trimmed final response text.
    pub summary: String,
    /// Fact-like statements extracted from the response.
    pub facts: Vec<String>,
    /// File names and URLs the step produced or touched.
    pub artifacts: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ContextEntry {
    /// Text used for relevance scoring against later steps.
    fn searchable_text(&self) -> String {
        let mut text = format!("{} {}", self.title, self.summary);
        for fact in &self.facts {
            text.push(' ');
            text.push_str(fact);
        }
        for artifact in &self.artifacts {
            text.push(' ');
            text.push_str(artifact);
        }
        text
    }

    /// Full rendering: facts and artifacts, then the trimmed summary.
    fn render_full(&self) -> String {
        let mut out = format!("[step {}: {}]", self.step_index + 1, self.title);
        for fact in &self.facts {
            out.push_str("\n- ");
            out.push_str(fact);
        }
        if !self.artifacts.is_empty() {
            out.push_str("\nartifacts: ");
            out.push_str(&self.artifacts.join(", "));
        }
        if self.facts.is_empty() {
            out.push('\n');
            out.push_str(&self.summary);
        }
        out
    }

    /// Compact rendering: artifacts and the first fact only. Artifact
    /// references survive compression because a later step may need
    /// exactly that path.
    fn render_compact(&self) -> String {
        let mut out = format!("[step {}: {}]", self.step_index + 1, self.title);
        if !self.artifacts.is_empty() {
            out.push_str(" artifacts: ");
            out.push_str(&self.artifacts.join(", "));
        }
        if let Some(fact) = self.facts.first() {
            out.push_str(" | ");
            out.push_str(fact);
        }
        out
    }
}

/// Accumulates, scores, and compresses cross-step context so each step
/// receives only relevant prior information.
#[derive(Debug, Default)]
pub struct ContextManager {
    entries: Vec<ContextEntry>,
    /// One line per evicted entry, oldest context compressed to its bones.
    digest: Vec<String>,
}

impl ContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed step's outcome. Entries are append-only; this is
    /// the only mutation path.
    pub fn record_outcome(&mut self, step: &Step, response_text: &str) {
        let entry = ContextEntry {
            step_index: step.index,
            title: step.title.clone(),
            summary: truncate_chars(response_text.trim(), SUMMARY_CHARS),
            facts: extract_facts(response_text, MAX_FACTS),
            artifacts: extract_artifacts(response_text),
            recorded_at: Utc::now(),
        };
        self.entries.push(entry);
        while self.entries.len() > MAX_ENTRIES {
            let evicted = self.entries.remove(0);
            self.digest.push(evicted.render_compact());
        }
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn entry_for_step(&self, step_index: usize) -> Option<&ContextEntry> {
        self.entries.iter().find(|e| e.step_index == step_index)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.digest.is_empty()
    }

    /// Build the context block for a step, bounded by a character budget.
    ///
    /// Prior entries are scored for relevance, selected greedily by score,
    /// and compressed to fit. Returns an empty string when nothing prior
    /// is worth carrying.
    pub fn relevant_context(&self, step: &Step, max_budget_chars: usize) -> String {
        let mut scored: Vec<(f64, &ContextEntry)> = self
            .entries
            .iter()
            .filter(|e| e.step_index < step.index)
            .map(|e| (self.score_entry(e, step), e))
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.step_index.cmp(&a.1.step_index))
        });

        let mut remaining = max_budget_chars;
        let mut selected: Vec<(usize, String)> = Vec::new();
        for (_, entry) in &scored {
            if remaining < MIN_RENDER_BUDGET {
                break;
            }
            let full = entry.render_full();
            let rendered = if full.chars().count() <= remaining {
                full
            } else {
                let compact = entry.render_compact();
                if compact.chars().count() <= remaining {
                    compact
                } else {
                    continue;
                }
            };
            remaining = remaining.saturating_sub(rendered.chars().count() + 1);
            selected.push((entry.step_index, rendered));
        }

        // Present in plan order regardless of selection order.
        selected.sort_by_key(|(idx, _)| *idx);
        let mut blocks: Vec<String> = selected.into_iter().map(|(_, text)| text).collect();

        if !self.digest.is_empty() {
            let digest_line = format!("[earlier steps] {}", self.digest.join("; "));
            if digest_line.chars().count() <= remaining {
                blocks.insert(0, digest_line);
            }
        }

        blocks.join("\n")
    }

    fn score_entry(&self, entry: &ContextEntry, step: &Step) -> f64 {
        let overlap = keyword_overlap(&entry.searchable_text(), &step.relevance_text());
        let distance = step.index.saturating_sub(entry.step_index).max(1) as i32;
        let mut score = overlap * RECENCY_DECAY.powi(distance);

        if entry.step_index + 1 == step.index {
            score += PREDECESSOR_BONUS;
        }

        // Explicit "step N" references in the instruction (1-based in
        // prose) link the producer to this consumer.
        let instruction = step.instruction.to_lowercase();
        for cap in STEP_REFERENCE_REGEX.captures_iter(&instruction) {
            if let Some(n) = cap.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) {
                if n == entry.step_index + 1 {
                    score += LINK_BONUS;
                }
            }
        }

        // So does naming one of the producer's artifacts.
        if entry
            .artifacts
            .iter()
            .any(|a| instruction.contains(&a.to_lowercase()))
        {
            score += LINK_BONUS;
        }

        score
    }
}
