/// Model-assisted rewrite backend
pub mod generation;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use generation::GenerationEngine;

/// Cleanup tier; each tier applies everything the tiers below it do
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupMode {
    /// Bare hesitation fillers only
    Basic,
    /// Hedging phrases, contraction repair, sentence termination
    Standard,
    /// Discourse openers and heavier pruning
    Thorough,
}

/// Options for a cleanup run
#[derive(Debug, Clone, Copy)]
pub struct CleanupOptions {
    pub mode: CleanupMode,
    /// Rewrite through the generation engine, falling back to thorough rules
    pub model_assisted: bool,
}

/// Independent post-processing toggles, applied after cleanup
#[derive(Debug, Clone, Copy)]
pub struct PostProcessOptions {
    pub trim: bool,
    pub capitalize_first: bool,
    pub ensure_terminal_punctuation: bool,
}

struct Rules {
    /// Filler removal patterns with the lowest tier they apply at
    fillers: Vec<(Regex, CleanupMode)>,
    /// Leading discourse openers, applied to fixpoint at the thorough tier
    leading_opener: Regex,
    /// Colloquial spellings mapped to full forms
    contractions: Vec<(Regex, &'static str)>,
    whitespace_runs: Regex,
    space_before_punct: Regex,
    missing_space_after: Regex,
    repeated_period: Regex,
    repeated_bang: Regex,
    repeated_question: Regex,
    repeated_comma: Regex,
    standalone_i: Regex,
    conjunction: Regex,
    conjunction_subject: Regex,
}

impl Rules {
    #[allow(clippy::too_many_lines)] // Flat rule table
    fn compile() -> Result<Self> {
        let rule = |pattern: &str| {
            Regex::new(pattern).with_context(|| format!("invalid cleanup pattern: {pattern}"))
        };

        let fillers = vec![
            (
                rule(r"(?i)\b(?:uh-huh|um+|uh+|erm|er|ah+|hmm*|mhm)\b[,.!?;:]*")?,
                CleanupMode::Basic,
            ),
            (
                rule(r"(?i)\b(?:you know|i mean|basically|literally)\b[,.!?;:]*")?,
                CleanupMode::Standard,
            ),
            (
                rule(r"(?i)\b(?:i guess|i suppose|or whatever)\b[,.!?;:]*")?,
                CleanupMode::Thorough,
            ),
        ];

        let contractions = vec![
            (rule(r"(?i)\bgonna\b")?, "going to"),
            (rule(r"(?i)\bwanna\b")?, "want to"),
            (rule(r"(?i)\bgotta\b")?, "got to"),
            (rule(r"(?i)\blemme\b")?, "let me"),
            (rule(r"(?i)\bgimme\b")?, "give me"),
            (rule(r"(?i)\bdunno\b")?, "don't know"),
            (rule(r"(?i)\b(?:cuz|'cause)\b")?, "because"),
        ];

        Ok(Self {
            fillers,
            leading_opener: rule(r"(?i)^(?:well|so|okay|ok|right|anyway|look|listen)\b,?\s+")?,
            contractions,
            whitespace_runs: rule(r"\s+")?,
            space_before_punct: rule(r"\s+([,.!?;:])")?,
            missing_space_after: rule(r"([,;])([A-Za-z])")?,
            repeated_period: rule(r"\.{2,}")?,
            repeated_bang: rule(r"!{2,}")?,
            repeated_question: rule(r"\?{2,}")?,
            repeated_comma: rule(r",{2,}")?,
            standalone_i: rule(r"\bi\b")?,
            conjunction: rule(r"(?i)\b(?:and|but|or|so|yet)\b")?,
            conjunction_subject: rule(
                r"(?i)\b(?:and|but|or|so|yet)\s+(?:i|you|we|they|he|she|it|there)\b",
            )?,
        })
    }
}

/// Tiered transcript cleanup with an optional model-assisted path
pub struct CleanupPipeline {
    rules: Rules,
    generator: Option<Arc<dyn GenerationEngine>>,
}

impl CleanupPipeline {
    /// # Errors
    /// Returns error if a rule pattern fails to compile
    pub fn new(generator: Option<Arc<dyn GenerationEngine>>) -> Result<Self> {
        Ok(Self {
            rules: Rules::compile()?,
            generator,
        })
    }

    /// Clean a transcript according to the options
    ///
    /// The model-assisted path falls back silently to the thorough rule
    /// pipeline on any engine failure; callers cannot observe which path
    /// produced the result.
    pub async fn clean(&self, text: &str, options: CleanupOptions) -> String {
        if options.model_assisted {
            if let Some(output) = self.rewrite_with_model(text).await {
                return output;
            }
            debug!("model-assisted rewrite unavailable, using thorough rules");
            return self.apply_rules(text, CleanupMode::Thorough);
        }
        self.apply_rules(text, options.mode)
    }

    /// Run the rule pipeline at the given tier
    ///
    /// The pipeline is idempotent: cleaning already-clean text is a no-op.
    #[must_use]
    pub fn apply_rules(&self, text: &str, mode: CleanupMode) -> String {
        let mut text = self.remove_fillers(text, mode);
        if mode >= CleanupMode::Standard {
            text = self.repair_contractions(&text);
        }
        text = self.normalize_whitespace(&text);
        text = self.capitalize(&text);
        text = self.clean_punctuation(&text);
        if mode >= CleanupMode::Standard {
            text = Self::ensure_terminal_punctuation(&text);
        }
        text
    }

    async fn rewrite_with_model(&self, text: &str) -> Option<String> {
        let generator = self.generator.as_ref()?;
        let generator = Arc::clone(generator);
        let prompt = build_rewrite_prompt(text);
        let input_len = text.len();

        let result = tokio::task::spawn_blocking(move || {
            if !generator.is_ready() {
                anyhow::bail!("generation engine not ready");
            }
            generator.generate(&prompt)
        })
        .await;

        match result {
            Ok(Ok(output)) => {
                let output = output.trim();
                if output.is_empty() || output.len() > input_len.saturating_mul(3).max(80) {
                    warn!(output_len = output.len(), "degenerate rewrite discarded");
                    None
                } else {
                    debug!(output_len = output.len(), "model-assisted rewrite used");
                    Some(output.to_owned())
                }
            }
            Ok(Err(err)) => {
                warn!(error = %err, "model-assisted rewrite failed");
                None
            }
            Err(err) => {
                warn!(error = %err, "rewrite task failed");
                None
            }
        }
    }

    fn remove_fillers(&self, text: &str, mode: CleanupMode) -> String {
        let mut result = text.to_owned();
        for (pattern, tier) in &self.rules.fillers {
            if mode >= *tier {
                result = pattern.replace_all(&result, "").into_owned();
            }
        }
        if mode >= CleanupMode::Thorough {
            // Openers can stack ("well, so anyway..."), strip to fixpoint.
            loop {
                let stripped = self
                    .rules
                    .leading_opener
                    .replace(result.trim_start(), "")
                    .into_owned();
                if stripped == result {
                    break;
                }
                result = stripped;
            }
        }
        result
    }

    fn repair_contractions(&self, text: &str) -> String {
        let mut result = text.to_owned();
        for (pattern, replacement) in &self.rules.contractions {
            result = pattern.replace_all(&result, *replacement).into_owned();
        }
        result
    }

    fn normalize_whitespace(&self, text: &str) -> String {
        let collapsed = self.rules.whitespace_runs.replace_all(text.trim(), " ");
        let no_gap = self.rules.space_before_punct.replace_all(&collapsed, "$1");
        self.rules
            .missing_space_after
            .replace_all(&no_gap, "$1 $2")
            .into_owned()
    }

    /// Uppercase the first letter and any letter opening a new sentence.
    /// Never lowercases anything.
    fn capitalize(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut at_sentence_start = true;
        for ch in text.chars() {
            if at_sentence_start && ch.is_alphabetic() {
                out.extend(ch.to_uppercase());
                at_sentence_start = false;
            } else {
                if matches!(ch, '.' | '!' | '?') {
                    at_sentence_start = true;
                } else if !ch.is_whitespace() {
                    // Digits and symbols close the boundary so "3.5 km" keeps
                    // its lowercase unit.
                    at_sentence_start = false;
                }
                out.push(ch);
            }
        }
        self.rules.standalone_i.replace_all(&out, "I").into_owned()
    }

    fn clean_punctuation(&self, text: &str) -> String {
        let text = self.rules.repeated_period.replace_all(text, ".");
        let text = self.rules.repeated_bang.replace_all(&text, "!");
        let text = self.rules.repeated_question.replace_all(&text, "?");
        let text = self.rules.repeated_comma.replace_all(&text, ",");
        self.insert_conjunction_commas(&text)
    }

    /// Insert a comma before a coordinating conjunction that opens a new
    /// clause, but only in simple sentences (at most two conjunctions).
    fn insert_conjunction_commas(&self, text: &str) -> String {
        if self.rules.conjunction.find_iter(text).count() > 2 {
            return text.to_owned();
        }

        let mut out = String::with_capacity(text.len() + 4);
        let mut last = 0;
        for m in self.rules.conjunction_subject.find_iter(text) {
            out.push_str(&text[last..m.start()]);
            let prev = text[..m.start()].trim_end().chars().last();
            let already_punctuated = matches!(
                prev,
                None | Some(',' | '.' | '!' | '?' | ';' | ':')
            );
            if !already_punctuated {
                while out.ends_with(' ') {
                    out.pop();
                }
                out.push_str(", ");
            }
            out.push_str(m.as_str());
            last = m.end();
        }
        out.push_str(&text[last..]);
        out
    }

    fn ensure_terminal_punctuation(text: &str) -> String {
        let trimmed = text.trim_end_matches([',', ';', ':', ' ']);
        if trimmed.is_empty() || trimmed.ends_with(['.', '!', '?']) {
            return trimmed.to_owned();
        }
        let first_word = trimmed
            .split_whitespace()
            .next()
            .map(str::to_lowercase)
            .unwrap_or_default();
        let mark = if QUESTION_STARTERS.contains(&first_word.as_str()) {
            '?'
        } else {
            '.'
        };
        let mut out = trimmed.to_owned();
        out.push(mark);
        out
    }
}

const QUESTION_STARTERS: &[&str] = &[
    "who", "what", "when", "where", "why", "how", "which", "is", "are", "am", "was", "were", "do",
    "does", "did", "can", "could", "would", "will", "should", "shall", "may", "might",
];

fn build_rewrite_prompt(text: &str) -> String {
    format!(
        "Rewrite the following dictated text as clean written prose. Remove filler \
         words and false starts, fix punctuation and capitalization, and preserve \
         the meaning. Reply with only the rewritten text.\n\n{text}"
    )
}

/// Apply the independent post-processing toggles
#[must_use]
pub fn post_process(text: &str, options: PostProcessOptions) -> String {
    let mut result = if options.trim {
        text.trim().to_owned()
    } else {
        text.to_owned()
    };

    if options.capitalize_first {
        if let Some(first) = result.chars().next() {
            if first.is_alphabetic() && !first.is_uppercase() {
                let upper: String = first.to_uppercase().collect();
                result.replace_range(..first.len_utf8(), &upper);
            }
        }
    }

    if options.ensure_terminal_punctuation
        && !result.is_empty()
        && !result.trim_end().ends_with(['.', '!', '?'])
    {
        result = result.trim_end().to_owned();
        result.push('.');
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> CleanupPipeline {
        CleanupPipeline::new(None).unwrap()
    }

    #[test]
    fn test_basic_removes_hesitation_fillers() {
        let p = pipeline();
        assert_eq!(p.apply_rules("um, I think so", CleanupMode::Basic), "I think so");
        assert_eq!(p.apply_rules("uh, sure", CleanupMode::Basic), "Sure");
        assert_eq!(
            p.apply_rules("it was, hmm, fine", CleanupMode::Basic),
            "It was, fine"
        );
    }

    #[test]
    fn test_basic_keeps_hedging_phrases() {
        let p = pipeline();
        let out = p.apply_rules("you know it works", CleanupMode::Basic);
        assert_eq!(out, "You know it works");
    }

    #[test]
    fn test_standard_removes_hedging_and_terminates() {
        let p = pipeline();
        assert_eq!(
            p.apply_rules("you know, it basically works", CleanupMode::Standard),
            "It works."
        );
    }

    #[test]
    fn test_standard_repairs_contractions() {
        let p = pipeline();
        assert_eq!(
            p.apply_rules("I'm gonna send it", CleanupMode::Standard),
            "I'm going to send it."
        );
        assert_eq!(
            p.apply_rules("dunno, lemme check", CleanupMode::Standard),
            "Don't know, let me check."
        );
    }

    #[test]
    fn test_basic_does_not_repair_contractions() {
        let p = pipeline();
        assert_eq!(
            p.apply_rules("gonna send it", CleanupMode::Basic),
            "Gonna send it"
        );
    }

    #[test]
    fn test_thorough_strips_stacked_openers() {
        let p = pipeline();
        assert_eq!(
            p.apply_rules("well, so anyway, it works", CleanupMode::Thorough),
            "It works."
        );
    }

    #[test]
    fn test_tiers_are_supersets() {
        let p = pipeline();
        let input = "um, you know, I guess it works";
        let basic = p.apply_rules(input, CleanupMode::Basic);
        let standard = p.apply_rules(input, CleanupMode::Standard);
        let thorough = p.apply_rules(input, CleanupMode::Thorough);

        assert!(basic.to_lowercase().contains("you know"));
        assert!(!standard.contains("you know"));
        assert!(standard.contains("guess"));
        assert!(!thorough.contains("guess"));
    }

    #[test]
    fn test_whitespace_normalization_preserves_numbers() {
        let p = pipeline();
        assert_eq!(
            p.apply_rules("it  costs   1,000 dollars and 3.5 cents", CleanupMode::Basic),
            "It costs 1,000 dollars and 3.5 cents"
        );
    }

    #[test]
    fn test_space_fixed_around_punctuation() {
        let p = pipeline();
        assert_eq!(
            p.apply_rules("one , two ,three", CleanupMode::Basic),
            "One, two, three"
        );
    }

    #[test]
    fn test_capitalization_after_sentence_mark() {
        let p = pipeline();
        assert_eq!(
            p.apply_rules("done. next one", CleanupMode::Basic),
            "Done. Next one"
        );
    }

    #[test]
    fn test_capitalization_never_lowercases() {
        let p = pipeline();
        assert_eq!(
            p.apply_rules("NASA launched. IBM followed", CleanupMode::Basic),
            "NASA launched. IBM followed"
        );
    }

    #[test]
    fn test_standalone_i_uppercased() {
        let p = pipeline();
        assert_eq!(
            p.apply_rules("i said i would", CleanupMode::Basic),
            "I said I would"
        );
    }

    #[test]
    fn test_repeated_punctuation_collapsed() {
        let p = pipeline();
        assert_eq!(
            p.apply_rules("really??  yes!!", CleanupMode::Basic),
            "Really? Yes!"
        );
    }

    #[test]
    fn test_comma_inserted_before_clause_conjunction() {
        let p = pipeline();
        assert_eq!(
            p.apply_rules("I went home and I slept", CleanupMode::Basic),
            "I went home, and I slept"
        );
    }

    #[test]
    fn test_no_comma_in_conjunction_heavy_sentence() {
        let p = pipeline();
        let input = "bread and butter and jam and I ate it";
        let out = p.apply_rules(input, CleanupMode::Basic);
        assert!(!out.contains(", and"));
    }

    #[test]
    fn test_no_comma_before_trailing_conjunction_word() {
        let p = pipeline();
        // "so" with no following subject opens no clause.
        assert_eq!(p.apply_rules("I think so", CleanupMode::Basic), "I think so");
    }

    #[test]
    fn test_terminal_question_mark_for_questions() {
        let p = pipeline();
        assert_eq!(
            p.apply_rules("where did it go", CleanupMode::Standard),
            "Where did it go?"
        );
    }

    #[test]
    fn test_terminal_period_replaces_trailing_comma() {
        let p = pipeline();
        assert_eq!(
            p.apply_rules("send it tomorrow,", CleanupMode::Standard),
            "Send it tomorrow."
        );
    }

    #[test]
    fn test_basic_output_left_unterminated() {
        let p = pipeline();
        assert_eq!(p.apply_rules("send it", CleanupMode::Basic), "Send it");
    }

    #[test]
    fn test_pipeline_is_idempotent() {
        let p = pipeline();
        let inputs = [
            "um, I think so",
            "well, so anyway, it works",
            "I'm gonna go and I'll be back",
            "really?? you know it costs 3.5 dollars",
            "where did it go",
        ];
        for mode in [CleanupMode::Basic, CleanupMode::Standard, CleanupMode::Thorough] {
            for input in inputs {
                let once = p.apply_rules(input, mode);
                let twice = p.apply_rules(&once, mode);
                assert_eq!(once, twice, "mode {mode:?} not idempotent for {input:?}");
            }
        }
    }

    #[test]
    fn test_empty_input() {
        let p = pipeline();
        assert_eq!(p.apply_rules("", CleanupMode::Thorough), "");
        assert_eq!(p.apply_rules("   ", CleanupMode::Thorough), "");
    }

    #[tokio::test]
    async fn test_clean_without_model_uses_requested_mode() {
        let p = pipeline();
        let out = p
            .clean(
                "um, I think so",
                CleanupOptions {
                    mode: CleanupMode::Basic,
                    model_assisted: false,
                },
            )
            .await;
        assert_eq!(out, "I think so");
    }

    #[tokio::test]
    async fn test_model_assisted_without_generator_matches_thorough() {
        let p = pipeline();
        let input = "um, basically I think so";
        let assisted = p
            .clean(
                input,
                CleanupOptions {
                    mode: CleanupMode::Standard,
                    model_assisted: true,
                },
            )
            .await;
        assert_eq!(assisted, p.apply_rules(input, CleanupMode::Thorough));
    }

    #[tokio::test]
    async fn test_model_assisted_engine_failure_falls_back() {
        use generation::MockGenerationEngine;

        let mut engine = MockGenerationEngine::new();
        engine.expect_is_ready().return_const(true);
        engine
            .expect_generate()
            .returning(|_| Err(anyhow::anyhow!("connection refused")));

        let p = CleanupPipeline::new(Some(Arc::new(engine))).unwrap();
        let input = "um, basically I think so";
        let assisted = p
            .clean(
                input,
                CleanupOptions {
                    mode: CleanupMode::Standard,
                    model_assisted: true,
                },
            )
            .await;
        assert_eq!(assisted, p.apply_rules(input, CleanupMode::Thorough));
    }

    #[tokio::test]
    async fn test_model_assisted_uses_engine_output() {
        use generation::MockGenerationEngine;

        let mut engine = MockGenerationEngine::new();
        engine.expect_is_ready().return_const(true);
        engine
            .expect_generate()
            .returning(|_| Ok("I think so.".to_owned()));

        let p = CleanupPipeline::new(Some(Arc::new(engine))).unwrap();
        let out = p
            .clean(
                "um, basically I think so",
                CleanupOptions {
                    mode: CleanupMode::Standard,
                    model_assisted: true,
                },
            )
            .await;
        assert_eq!(out, "I think so.");
    }

    #[tokio::test]
    async fn test_model_assisted_empty_output_falls_back() {
        use generation::MockGenerationEngine;

        let mut engine = MockGenerationEngine::new();
        engine.expect_is_ready().return_const(true);
        engine.expect_generate().returning(|_| Ok("  ".to_owned()));

        let p = CleanupPipeline::new(Some(Arc::new(engine))).unwrap();
        let input = "um, basically I think so";
        let out = p
            .clean(
                input,
                CleanupOptions {
                    mode: CleanupMode::Thorough,
                    model_assisted: true,
                },
            )
            .await;
        assert_eq!(out, p.apply_rules(input, CleanupMode::Thorough));
    }

    #[test]
    fn test_mode_ordering() {
        assert!(CleanupMode::Basic < CleanupMode::Standard);
        assert!(CleanupMode::Standard < CleanupMode::Thorough);
    }

    #[test]
    fn test_post_process_trim_only() {
        let options = PostProcessOptions {
            trim: true,
            capitalize_first: false,
            ensure_terminal_punctuation: false,
        };
        assert_eq!(post_process("  hello  ", options), "hello");
    }

    #[test]
    fn test_post_process_capitalize_and_terminate() {
        let options = PostProcessOptions {
            trim: true,
            capitalize_first: true,
            ensure_terminal_punctuation: true,
        };
        assert_eq!(post_process("hello there", options), "Hello there.");
        assert_eq!(post_process("Done!", options), "Done!");
    }

    #[test]
    fn test_post_process_disabled_is_identity() {
        let options = PostProcessOptions {
            trim: false,
            capitalize_first: false,
            ensure_terminal_punctuation: false,
        };
        assert_eq!(post_process(" raw text ", options), " raw text ");
    }
}
