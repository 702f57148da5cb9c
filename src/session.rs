//! Recording session lifecycle and the dictation pipeline

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use crate::audio::{retention, CaptureDevice, CaptureHandle, RecordedAudio};
use crate::cleanup::{post_process, CleanupOptions, CleanupPipeline, PostProcessOptions};
use crate::config::SnippetsConfig;
use crate::insertion::{InsertionController, InsertionOutcome};
use crate::permissions::{PermissionDomain, PermissionGate, PermissionState};
use crate::snippets::expand_snippets;
use crate::status::{ErrorKind, PipelineStatus, StatusBus};
use crate::transcription::{Transcript, TranscribeError, TranscriptionCoordinator};

/// Behavior knobs the orchestrator threads through the pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub cleanup: CleanupOptions,
    pub post_process: PostProcessOptions,
    pub snippets: SnippetsConfig,
    /// Dump each recording to a debug WAV before transcription
    pub debug_dump: bool,
}

/// Drives the record, transcribe, clean, insert pipeline off hotkey triggers
///
/// At most one recording is active at a time, and while a recording is being
/// processed downstream further triggers are ignored outright rather than
/// queued. A trigger during an active recording stops it and starts the
/// downstream work; a trigger while idle starts a new recording.
pub struct PipelineOrchestrator {
    capture: Arc<dyn CaptureDevice>,
    transcriber: Arc<TranscriptionCoordinator>,
    cleanup: Arc<CleanupPipeline>,
    insertion: Arc<InsertionController>,
    gate: Arc<PermissionGate>,
    status: StatusBus,
    settings: PipelineSettings,
    active: Mutex<Option<CaptureHandle>>,
    downstream_busy: AtomicBool,
}

impl PipelineOrchestrator {
    #[must_use]
    pub fn new(
        capture: Arc<dyn CaptureDevice>,
        transcriber: Arc<TranscriptionCoordinator>,
        cleanup: Arc<CleanupPipeline>,
        insertion: Arc<InsertionController>,
        gate: Arc<PermissionGate>,
        status: StatusBus,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            capture,
            transcriber,
            cleanup,
            insertion,
            gate,
            status,
            settings,
            active: Mutex::new(None),
            downstream_busy: AtomicBool::new(false),
        }
    }

    /// Handles a hotkey trigger
    ///
    /// Idle: starts a recording, asking for microphone permission first if
    /// needed. Recording: stops it and spawns the downstream pipeline.
    /// Downstream busy: the trigger is dropped.
    pub async fn handle_trigger(self: &Arc<Self>) {
        if self.downstream_busy.load(Ordering::SeqCst) {
            info!("trigger ignored, still processing the previous recording");
            return;
        }

        let finished = self.take_active();
        if let Some(handle) = finished {
            self.stop_and_process(handle);
            return;
        }

        self.start_recording().await;
    }

    /// Discards any active recording and returns to idle
    pub fn cancel(&self) {
        if let Some(handle) = self.take_active() {
            self.capture.discard(handle);
            info!("recording cancelled");
            self.status.publish(PipelineStatus::Idle);
        }
    }

    fn take_active(&self) -> Option<CaptureHandle> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn start_recording(self: &Arc<Self>) {
        if self.gate.status(PermissionDomain::AudioCapture) != PermissionState::Authorized {
            let granted = self.gate.request(PermissionDomain::AudioCapture).await;
            if !granted {
                warn!("microphone permission not granted, recording not started");
                self.status.publish(PipelineStatus::Error(
                    ErrorKind::PermissionDenied(PermissionDomain::AudioCapture),
                ));
                return;
            }
        }

        match self.capture.begin() {
            Ok(handle) => {
                *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                self.status.publish(PipelineStatus::Recording);
            }
            Err(e) => {
                warn!("failed to start recording: {e:#}");
                self.status.publish(PipelineStatus::Idle);
            }
        }
    }

    fn stop_and_process(self: &Arc<Self>, handle: CaptureHandle) {
        let audio = match self.capture.finish(handle) {
            Ok(audio) => audio,
            Err(e) => {
                warn!("failed to stop recording: {e:#}");
                self.status.publish(PipelineStatus::Idle);
                return;
            }
        };

        // The flag goes up before the task exists so a trigger racing the
        // spawn still sees the pipeline as busy.
        self.downstream_busy.store(true, Ordering::SeqCst);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_downstream(audio).await;
            this.downstream_busy.store(false, Ordering::SeqCst);
        });
    }

    async fn run_downstream(&self, audio: RecordedAudio) {
        self.status.publish(PipelineStatus::Transcribing);

        if self.settings.debug_dump {
            let samples = audio.samples.clone();
            let rate = audio.sample_rate;
            tokio::task::spawn_blocking(move || {
                if let Err(e) = retention::dump_debug_wav(&samples, rate) {
                    warn!("debug WAV dump failed: {e:#}");
                }
            });
        }

        let raw = match self.transcriber.transcribe(audio).await {
            Ok(Transcript::Text(text)) => text,
            Ok(Transcript::Blank) => {
                info!("recording contained no speech");
                self.status.publish(PipelineStatus::Idle);
                return;
            }
            Err(e) => {
                warn!(retryable = e.is_retryable(), "transcription failed: {e}");
                self.status
                    .publish(PipelineStatus::Error(transcribe_error_kind(&e)));
                return;
            }
        };

        self.status.publish(PipelineStatus::Cleaning);
        let cleaned = self.cleanup.clean(&raw, self.settings.cleanup).await;
        let expanded = expand_snippets(&cleaned, &self.settings.snippets);
        let text = post_process(&expanded, self.settings.post_process);

        if text.is_empty() {
            info!("nothing left to insert after cleanup");
            self.status.publish(PipelineStatus::Idle);
            return;
        }

        self.status.publish(PipelineStatus::Inserting);
        match self.insertion.insert(&text).await {
            InsertionOutcome::Inserted => {
                self.status.publish(PipelineStatus::Idle);
            }
            InsertionOutcome::NoPermission => {
                self.status.publish(PipelineStatus::Error(
                    ErrorKind::PermissionDenied(PermissionDomain::InputInjection),
                ));
            }
            InsertionOutcome::ManualPasteRequired => {
                self.status.publish(PipelineStatus::ManualPasteRequired);
            }
            InsertionOutcome::Failed => {
                self.status
                    .publish(PipelineStatus::Error(ErrorKind::InjectionFailed));
            }
        }
    }
}

fn transcribe_error_kind(err: &TranscribeError) -> ErrorKind {
    match err {
        TranscribeError::ModelNotLoaded => ErrorKind::ModelNotLoaded,
        TranscribeError::Engine(_) => ErrorKind::EngineFailure,
        other => ErrorKind::AudioValidation(other.to_string()),
    }
}
