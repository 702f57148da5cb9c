use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::config::ModelConfig;
use crate::transcription::RecognitionEngine;

/// Engine setup errors
#[derive(Debug, Error)]
pub enum RecognizerError {
    /// Bad inference parameters
    #[error("invalid recognizer configuration: {reason}")]
    Config {
        /// What was wrong
        reason: String,
    },

    /// Model file could not be loaded
    #[error("failed to load whisper model from {path}: {source}")]
    ModelLoad {
        /// Path to the model file
        path: String,
        /// Underlying error
        source: anyhow::Error,
    },
}

/// Whisper recognition engine with deferred model loading
///
/// Construction validates parameters only; the model itself is loaded by
/// `ensure_loaded`, either eagerly at startup or lazily from a background
/// task. Until then `is_ready` reports false and the pipeline surfaces a
/// not-loaded error instead of blocking on a multi-second load.
pub struct WhisperRecognizer {
    model_path: PathBuf,
    threads: i32,
    beam_size: i32,
    language: Option<String>,
    ctx: Mutex<Option<WhisperContext>>,
}

impl WhisperRecognizer {
    /// Validate parameters and remember the model location
    ///
    /// # Errors
    /// Returns `Config` if threads or beam size are zero or exceed `i32::MAX`
    pub fn new(model_path: PathBuf, config: &ModelConfig) -> Result<Self, RecognizerError> {
        if config.threads == 0 {
            return Err(RecognizerError::Config {
                reason: "threads must be > 0".to_owned(),
            });
        }
        if config.beam_size == 0 {
            return Err(RecognizerError::Config {
                reason: "beam_size must be > 0".to_owned(),
            });
        }

        let threads = i32::try_from(config.threads).map_err(|_| RecognizerError::Config {
            reason: format!("threads value too large (max: {})", i32::MAX),
        })?;
        let beam_size = i32::try_from(config.beam_size).map_err(|_| RecognizerError::Config {
            reason: format!("beam_size value too large (max: {})", i32::MAX),
        })?;

        Ok(Self {
            model_path,
            threads,
            beam_size,
            language: config.language.clone(),
            ctx: Mutex::new(None),
        })
    }

    /// Load the model if it is not loaded yet
    ///
    /// # Errors
    /// Returns `ModelLoad` if the file is missing or invalid
    pub fn ensure_loaded(&self) -> Result<(), RecognizerError> {
        let mut guard = self
            .ctx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.is_some() {
            return Ok(());
        }

        tracing::info!(
            path = %self.model_path.display(),
            threads = self.threads,
            beam_size = self.beam_size,
            language = ?self.language,
            "loading whisper model"
        );

        let path_str = self
            .model_path
            .to_str()
            .ok_or_else(|| RecognizerError::ModelLoad {
                path: self.model_path.display().to_string(),
                source: anyhow::anyhow!("model path contains invalid UTF-8"),
            })?;

        let params = WhisperContextParameters::default();
        let ctx = WhisperContext::new_with_params(path_str, params).map_err(|e| {
            RecognizerError::ModelLoad {
                path: self.model_path.display().to_string(),
                source: anyhow::anyhow!("{e:?}"),
            }
        })?;

        tracing::info!("whisper model loaded");
        *guard = Some(ctx);
        Ok(())
    }

    /// Sampling strategy for the configured beam size
    const fn sampling_strategy(beam_size: i32) -> SamplingStrategy {
        if beam_size > 1 {
            SamplingStrategy::BeamSearch {
                beam_size,
                patience: -1.0,
            }
        } else {
            SamplingStrategy::Greedy { best_of: 1 }
        }
    }
}

impl RecognitionEngine for WhisperRecognizer {
    fn is_ready(&self) -> bool {
        self.ctx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }

    fn recognize(&self, samples: &[f32]) -> Result<String> {
        let _span = tracing::debug_span!("recognition", samples = samples.len()).entered();

        let guard = self
            .ctx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let ctx = guard.as_ref().context("model not loaded")?;

        let mut state = ctx
            .create_state()
            .map_err(|e| anyhow::anyhow!("failed to create whisper state: {e:?}"))?;

        let mut params = FullParams::new(Self::sampling_strategy(self.beam_size));
        params.set_n_threads(self.threads);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_language(self.language.as_deref());
        params.set_translate(false);

        let start = std::time::Instant::now();
        state
            .full(params, samples)
            .context("whisper inference failed")?;

        let mut result = String::new();
        for segment in state.as_iter() {
            result.push_str(&segment.to_string());
        }
        let result = result.trim().to_owned();

        tracing::info!(
            segments = state.full_n_segments(),
            text_len = result.len(),
            inference_ms = start.elapsed().as_millis(),
            "recognition completed"
        );

        Ok(result)
    }
}

// SAFETY: WhisperRecognizer is thread-safe because the WhisperContext is only
// reachable through the Mutex, so all inference runs under exclusive access,
// and the remaining fields are immutable after construction.
#[allow(unsafe_code)]
unsafe impl Send for WhisperRecognizer {}
#[allow(unsafe_code)]
unsafe impl Sync for WhisperRecognizer {}
