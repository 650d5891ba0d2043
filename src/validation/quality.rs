//! Quality scoring for completed steps.

use crate::context::{extract_artifacts, extract_facts};
use crate::plan::CompletionKind;
use crate::validation::signals::has_step_marker;

/// Indicator bonus per content signal found in the response.
const INDICATOR_BONUS: f64 = 0.1;
/// Cap on the number of indicators counted.
const MAX_INDICATORS: usize = 4;
/// Bonus for an explicit completion marker.
const MARKER_BONUS: f64 = 0.3;
/// Base score before any signal is counted.
const BASE_SCORE: f64 = 0.5;

/// Score the quality of a completed step's final response, 0.0 to 1.0.
///
/// Starts from a base, credits an explicit marker and concrete content
/// (artifacts, facts, figures, substance), scales by the completion kind,
/// and discounts attempts that finished suspiciously early or right at
/// the edge of the time budget. `time_used_fraction` is elapsed time over
/// the boundary's budget, when known.
pub fn score_quality(kind: CompletionKind, text: &str, time_used_fraction: Option<f64>) -> f64 {
    let mut quality = BASE_SCORE;

    if has_step_marker(text) {
        quality += MARKER_BONUS;
    }

    let mut indicators = 0;
    if !extract_artifacts(text).is_empty() {
        indicators += 1;
    }
    if !extract_facts(text, 3).is_empty() {
        indicators += 1;
    }
    if text.chars().any(|c| c.is_ascii_digit()) {
        indicators += 1;
    }
    if text.chars().count() >= 200 {
        indicators += 1;
    }
    quality += INDICATOR_BONUS * indicators.min(MAX_INDICATORS) as f64;

    quality *= kind.base_quality();

    if let Some(fraction) = time_used_fraction {
        if fraction < 0.3 {
            quality *= 0.9;
        } else if fraction > 0.8 {
            quality *= 0.8;
        }
    }

    quality.clamp(0.0, 1.0)
}
