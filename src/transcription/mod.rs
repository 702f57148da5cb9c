/// Model file download
pub mod download;
/// Whisper inference engine
pub mod engine;

pub use download::ensure_model_available;
pub use engine::WhisperRecognizer;

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::audio::RecordedAudio;

/// Sample rate the recognition engine expects
pub const EXPECTED_SAMPLE_RATE: u32 = 16_000;
/// Accepted deviation from the expected rate
pub const RATE_TOLERANCE_HZ: u32 = 100;
/// Recordings shorter than this fail validation
pub const MIN_DURATION_SECS: f32 = 0.5;
/// Recordings longer than this fail validation
pub const MAX_DURATION_SECS: f32 = 120.0;
/// Peak magnitudes above this are rejected; peaks in (1.0, ceiling] are
/// rescaled to unit peak
pub const PEAK_CEILING: f32 = 1.1;

/// Engine outputs that mean "no speech detected"
const BLANK_SENTINELS: &[&str] = &[
    "[blank_audio]",
    "(blank audio)",
    "[silence]",
    "(silence)",
    "[inaudible]",
    "[no speech]",
];

/// Recognition outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcript {
    Text(String),
    /// The engine heard nothing; not an error
    Blank,
}

/// Transcription failures
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("audio buffer is empty")]
    EmptyBuffer,

    #[error("unsupported sample rate {got} Hz (expected {expected} Hz)")]
    UnsupportedRate { got: u32, expected: u32 },

    #[error("recording too short: {seconds:.2}s (minimum 0.5s)")]
    TooShort { seconds: f32 },

    #[error("recording too long: {seconds:.2}s (maximum 120s)")]
    TooLong { seconds: f32 },

    #[error("samples out of range: peak magnitude {peak:.3}")]
    OutOfRange { peak: f32 },

    #[error("recognition model not loaded")]
    ModelNotLoaded,

    #[error("recognition engine failed")]
    Engine(#[source] anyhow::Error),
}

impl TranscribeError {
    /// Whether retrying with a new recording can help
    ///
    /// A missing model needs operator action, everything else can succeed on
    /// the next attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::ModelNotLoaded)
    }
}

/// Seam for the speech recognition backend
///
/// `recognize` may take seconds and is always called from the blocking pool.
#[cfg_attr(test, mockall::automock)]
pub trait RecognitionEngine: Send + Sync {
    /// Whether a model is loaded and inference can run
    fn is_ready(&self) -> bool;

    /// Run inference over 16 kHz mono samples
    ///
    /// # Errors
    /// Returns error if inference fails
    fn recognize(&self, samples: &[f32]) -> anyhow::Result<String>;
}

/// Validates, normalizes and recognizes recorded audio
pub struct TranscriptionCoordinator {
    engine: Arc<dyn RecognitionEngine>,
}

impl TranscriptionCoordinator {
    pub fn new(engine: Arc<dyn RecognitionEngine>) -> Self {
        Self { engine }
    }

    /// Transcribe a recording
    ///
    /// Validation runs before the engine is touched; a failed recording never
    /// costs an inference.
    ///
    /// # Errors
    /// Returns a validation error, `ModelNotLoaded`, or `Engine` on inference
    /// failure
    pub async fn transcribe(&self, audio: RecordedAudio) -> Result<Transcript, TranscribeError> {
        let samples = validate_and_normalize(audio)?;

        if !self.engine.is_ready() {
            return Err(TranscribeError::ModelNotLoaded);
        }

        let engine = Arc::clone(&self.engine);
        let raw = tokio::task::spawn_blocking(move || engine.recognize(&samples))
            .await
            .map_err(|err| TranscribeError::Engine(anyhow::anyhow!(err)))?
            .map_err(TranscribeError::Engine)?;

        Ok(classify(&raw))
    }
}

/// Run the validation chain and rescale marginally-clipped audio
///
/// # Errors
/// Returns the first failing check in order: empty buffer, sample rate,
/// duration, peak range
#[allow(clippy::cast_precision_loss)] // Sample counts are far below f32 precision limits
pub fn validate_and_normalize(audio: RecordedAudio) -> Result<Vec<f32>, TranscribeError> {
    if audio.samples.is_empty() {
        return Err(TranscribeError::EmptyBuffer);
    }

    if audio.sample_rate.abs_diff(EXPECTED_SAMPLE_RATE) > RATE_TOLERANCE_HZ {
        return Err(TranscribeError::UnsupportedRate {
            got: audio.sample_rate,
            expected: EXPECTED_SAMPLE_RATE,
        });
    }

    let seconds = audio.samples.len() as f32 / audio.sample_rate as f32;
    if seconds < MIN_DURATION_SECS {
        return Err(TranscribeError::TooShort { seconds });
    }
    if seconds > MAX_DURATION_SECS {
        return Err(TranscribeError::TooLong { seconds });
    }

    let peak = audio
        .samples
        .iter()
        .fold(0.0_f32, |acc, &s| acc.max(s.abs()));
    if peak > PEAK_CEILING {
        return Err(TranscribeError::OutOfRange { peak });
    }

    let mut samples = audio.samples;
    if peak > 1.0 {
        let scale = 1.0 / peak;
        for sample in &mut samples {
            *sample *= scale;
        }
        debug!(peak = peak, "rescaled marginally clipped audio to unit peak");
    }

    Ok(samples)
}

fn classify(raw: &str) -> Transcript {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        info!("engine produced empty output, treating as blank");
        return Transcript::Blank;
    }
    let folded = trimmed.to_lowercase();
    if BLANK_SENTINELS.contains(&folded.as_str()) {
        info!(sentinel = %trimmed, "no-speech sentinel detected");
        return Transcript::Blank;
    }
    Transcript::Text(trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn audio(samples: Vec<f32>, sample_rate: u32) -> RecordedAudio {
        RecordedAudio {
            samples,
            sample_rate,
        }
    }

    fn one_second() -> Vec<f32> {
        vec![0.1; EXPECTED_SAMPLE_RATE as usize]
    }

    #[test]
    fn test_empty_buffer_rejected() {
        let result = validate_and_normalize(audio(vec![], 16000));
        assert!(matches!(result, Err(TranscribeError::EmptyBuffer)));
    }

    #[test]
    fn test_sample_rate_within_tolerance_accepted() {
        assert!(validate_and_normalize(audio(one_second(), 16050)).is_ok());
        assert!(validate_and_normalize(audio(one_second(), 15950)).is_ok());
    }

    #[test]
    fn test_sample_rate_outside_tolerance_rejected() {
        let result = validate_and_normalize(audio(one_second(), 48000));
        assert!(matches!(
            result,
            Err(TranscribeError::UnsupportedRate {
                got: 48000,
                expected: 16000
            })
        ));
    }

    #[test]
    fn test_too_short_rejected() {
        // 0.3 seconds at 16 kHz.
        let result = validate_and_normalize(audio(vec![0.1; 4800], 16000));
        assert!(matches!(result, Err(TranscribeError::TooShort { .. })));
    }

    #[test]
    fn test_too_long_rejected() {
        let samples = vec![0.0; (EXPECTED_SAMPLE_RATE as usize) * 121];
        let result = validate_and_normalize(audio(samples, 16000));
        assert!(matches!(result, Err(TranscribeError::TooLong { .. })));
    }

    #[test]
    fn test_peak_above_ceiling_rejected() {
        let mut samples = one_second();
        samples[100] = 1.2;
        let result = validate_and_normalize(audio(samples, 16000));
        assert!(matches!(result, Err(TranscribeError::OutOfRange { .. })));
    }

    #[test]
    fn test_marginal_clipping_rescaled_to_unit_peak() {
        let mut samples = one_second();
        samples[0] = 1.05;
        let normalized = validate_and_normalize(audio(samples, 16000)).unwrap();
        let peak = normalized.iter().fold(0.0_f32, |acc, &s| acc.max(s.abs()));
        assert!((peak - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_in_range_audio_left_untouched() {
        let samples = one_second();
        let normalized = validate_and_normalize(audio(samples.clone(), 16000)).unwrap();
        assert_eq!(normalized, samples);
    }

    #[test]
    fn test_retryability() {
        assert!(!TranscribeError::ModelNotLoaded.is_retryable());
        assert!(TranscribeError::EmptyBuffer.is_retryable());
        assert!(TranscribeError::TooShort { seconds: 0.3 }.is_retryable());
        assert!(TranscribeError::Engine(anyhow::anyhow!("x")).is_retryable());
    }

    #[test]
    fn test_classify_text() {
        assert_eq!(
            classify("  Hello there  "),
            Transcript::Text("Hello there".to_owned())
        );
    }

    #[test]
    fn test_classify_sentinels_case_insensitive() {
        assert_eq!(classify("[BLANK_AUDIO]"), Transcript::Blank);
        assert_eq!(classify(" (silence) "), Transcript::Blank);
        assert_eq!(classify("[Inaudible]"), Transcript::Blank);
        assert_eq!(classify(""), Transcript::Blank);
    }

    #[test]
    fn test_classify_sentinel_inside_text_is_kept() {
        assert_eq!(
            classify("then [silence] fell"),
            Transcript::Text("then [silence] fell".to_owned())
        );
    }

    #[tokio::test]
    async fn test_validation_failure_never_touches_engine() {
        // Mock with no expectations panics on any call.
        let engine = MockRecognitionEngine::new();
        let coordinator = TranscriptionCoordinator::new(Arc::new(engine));

        let result = coordinator
            .transcribe(audio(vec![0.1; 4800], 16000))
            .await;
        assert!(matches!(result, Err(TranscribeError::TooShort { .. })));
    }

    #[tokio::test]
    async fn test_engine_not_ready_yields_model_not_loaded() {
        let mut engine = MockRecognitionEngine::new();
        engine.expect_is_ready().return_const(false);
        let coordinator = TranscriptionCoordinator::new(Arc::new(engine));

        let result = coordinator.transcribe(audio(one_second(), 16000)).await;
        assert!(matches!(result, Err(TranscribeError::ModelNotLoaded)));
    }

    #[tokio::test]
    async fn test_sentinel_output_becomes_blank() {
        let mut engine = MockRecognitionEngine::new();
        engine.expect_is_ready().return_const(true);
        engine
            .expect_recognize()
            .returning(|_| Ok(" [BLANK_AUDIO] ".to_owned()));
        let coordinator = TranscriptionCoordinator::new(Arc::new(engine));

        let result = coordinator.transcribe(audio(one_second(), 16000)).await;
        assert!(matches!(result, Ok(Transcript::Blank)));
    }

    #[tokio::test]
    async fn test_engine_receives_normalized_samples() {
        /// Engine that records what it was given
        struct CapturingEngine {
            seen_peak: Mutex<f32>,
        }

        impl RecognitionEngine for CapturingEngine {
            fn is_ready(&self) -> bool {
                true
            }

            fn recognize(&self, samples: &[f32]) -> anyhow::Result<String> {
                let peak = samples.iter().fold(0.0_f32, |acc, &s| acc.max(s.abs()));
                *self.seen_peak.lock().unwrap() = peak;
                Ok("ok".to_owned())
            }
        }

        let engine = Arc::new(CapturingEngine {
            seen_peak: Mutex::new(0.0),
        });
        let coordinator = TranscriptionCoordinator::new(Arc::clone(&engine) as _);

        let mut samples = one_second();
        samples[0] = 1.08;
        let result = coordinator.transcribe(audio(samples, 16000)).await.unwrap();
        assert_eq!(result, Transcript::Text("ok".to_owned()));
        assert!((*engine.seen_peak.lock().unwrap() - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_engine_failure_is_wrapped() {
        let mut engine = MockRecognitionEngine::new();
        engine.expect_is_ready().return_const(true);
        engine
            .expect_recognize()
            .returning(|_| Err(anyhow::anyhow!("inference exploded")));
        let coordinator = TranscriptionCoordinator::new(Arc::new(engine));

        let result = coordinator.transcribe(audio(one_second(), 16000)).await;
        assert!(matches!(result, Err(TranscribeError::Engine(_))));
    }
}
