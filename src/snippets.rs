//! Fuzzy snippet expansion for cleaned transcripts

use tracing::{debug, info};

use crate::config::SnippetsConfig;

/// Expands a transcript into its configured snippet when one matches
///
/// Triggers are compared case-insensitively against the whole transcript
/// using Jaro-Winkler similarity, so small recognition errors still hit.
/// The highest-scoring trigger at or above the threshold wins; otherwise
/// the text comes back unchanged.
#[must_use]
pub fn expand_snippets(text: &str, config: &SnippetsConfig) -> String {
    if !config.enabled || config.entries.is_empty() {
        return text.to_owned();
    }

    // Cleanup may have appended terminal punctuation that triggers never
    // carry, so strip it before scoring.
    let normalized = text
        .trim()
        .trim_end_matches(['.', ',', '!', '?'])
        .to_lowercase();

    let mut best: Option<(&str, f64)> = None;
    for (trigger, expansion) in &config.entries {
        let score = strsim::jaro_winkler(&normalized, &trigger.to_lowercase());

        debug!(
            trigger = trigger,
            score = %score,
            threshold = %config.threshold,
            "snippet match check"
        );

        if score >= config.threshold && best.is_none_or(|(_, b)| score > b) {
            best = Some((expansion.as_str(), score));
        }
    }

    match best {
        Some((expansion, score)) => {
            info!(
                original = text,
                expansion = expansion,
                score = %score,
                "snippet matched"
            );
            expansion.to_owned()
        }
        None => {
            debug!(text = text, "no snippet match");
            text.to_owned()
        }
    }
}
