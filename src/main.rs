//! Binary entry point: wiring and the event loop

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use dictate_hotkey::audio::{retention, CaptureDevice};
use dictate_hotkey::cleanup::generation::GenerationEngine;
use dictate_hotkey::cleanup::{CleanupOptions, CleanupPipeline, PostProcessOptions};
use dictate_hotkey::config::Config;
use dictate_hotkey::input::{EventTapSurface, HotkeyChord, HotkeyListener, ListenerEvent};
use dictate_hotkey::insertion::{ClipboardSurface, InsertionController, KeystrokeSurface};
use dictate_hotkey::permissions::{PermissionDomain, PermissionGate, PermissionSurface};
use dictate_hotkey::session::{PipelineOrchestrator, PipelineSettings};
use dictate_hotkey::status::{ForegroundSignal, StatusBus};
use dictate_hotkey::telemetry;
use dictate_hotkey::transcription::{
    ensure_model_available, RecognitionEngine, TranscriptionCoordinator, WhisperRecognizer,
};

/// Poll interval for unsettled permission domains
const PERMISSION_POLL: Duration = Duration::from_secs(3);

struct Surfaces {
    tap: Arc<dyn EventTapSurface>,
    permissions: Arc<dyn PermissionSurface>,
    clipboard: Arc<dyn ClipboardSurface>,
    keystrokes: Arc<dyn KeystrokeSurface>,
}

#[cfg(target_os = "macos")]
fn platform_surfaces() -> Result<Surfaces> {
    use dictate_hotkey::platform::macos;
    Ok(Surfaces {
        tap: Arc::new(macos::MacosEventTap),
        permissions: Arc::new(macos::MacosPermissions),
        clipboard: Arc::new(macos::MacosClipboard),
        keystrokes: Arc::new(macos::MacosKeystrokes),
    })
}

#[cfg(not(target_os = "macos"))]
fn platform_surfaces() -> Result<Surfaces> {
    anyhow::bail!("no platform backend for this operating system")
}

#[cfg(target_os = "macos")]
fn watch_foreground(signal: &ForegroundSignal) {
    dictate_hotkey::platform::macos::spawn_activation_observer(signal.clone());
}

#[cfg(not(target_os = "macos"))]
fn watch_foreground(_signal: &ForegroundSignal) {}

async fn prepare_recognizer(config: &Config) -> Result<Arc<WhisperRecognizer>> {
    let model_path = Config::expand_path(&config.model.path)?;

    let name = config.model.name.clone();
    let path = model_path.clone();
    tokio::task::spawn_blocking(move || ensure_model_available(&name, &path))
        .await
        .context("model download task failed")??;

    let recognizer = Arc::new(WhisperRecognizer::new(model_path, &config.model)?);

    if config.model.preload {
        let eager = Arc::clone(&recognizer);
        tokio::task::spawn_blocking(move || eager.ensure_loaded())
            .await
            .context("model load task failed")??;
    } else {
        // Load in the background; recordings finished before it completes
        // surface a not-loaded error rather than waiting.
        let lazy = Arc::clone(&recognizer);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = lazy.ensure_loaded() {
                tracing::error!("background model load failed: {e}");
            }
        });
    }

    Ok(recognizer)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    telemetry::init(&config.telemetry)?;
    tracing::info!("dictate-hotkey starting");

    if let Err(e) = retention::prune_debug_dumps(&config.audio) {
        tracing::warn!("debug dump prune failed: {e:#}");
    }

    let recognizer = prepare_recognizer(&config).await?;

    let surfaces = platform_surfaces()?;

    let status = StatusBus::new();
    let foreground = ForegroundSignal::new();
    let gate = Arc::new(PermissionGate::new(Arc::clone(&surfaces.permissions)));
    gate.refresh_all();
    gate.spawn_foreground_watch(&foreground);
    gate.spawn_polling(PermissionDomain::AudioCapture, PERMISSION_POLL);
    gate.spawn_polling(PermissionDomain::InputInjection, PERMISSION_POLL);
    watch_foreground(&foreground);

    let capture: Arc<dyn CaptureDevice> =
        Arc::new(dictate_hotkey::audio::CpalCapture::new(&config.audio)?);

    let generator: Option<Arc<dyn GenerationEngine>> = if config.cleanup.model_assisted {
        Some(Arc::new(
            dictate_hotkey::cleanup::generation::OllamaGenerator::new(&config.generation)?,
        ))
    } else {
        None
    };

    let transcriber = Arc::new(TranscriptionCoordinator::new(
        Arc::clone(&recognizer) as Arc<dyn RecognitionEngine>
    ));
    let cleanup = Arc::new(CleanupPipeline::new(generator)?);
    let insertion = Arc::new(InsertionController::new(
        Arc::clone(&surfaces.clipboard),
        Arc::clone(&surfaces.keystrokes),
        Arc::clone(&gate),
        config.insertion.clone(),
    ));

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        capture,
        transcriber,
        cleanup,
        insertion,
        Arc::clone(&gate),
        status.clone(),
        PipelineSettings {
            cleanup: CleanupOptions {
                mode: config.cleanup.mode,
                model_assisted: config.cleanup.model_assisted,
            },
            post_process: PostProcessOptions {
                trim: config.cleanup.trim,
                capitalize_first: config.cleanup.capitalize_first,
                ensure_terminal_punctuation: config.cleanup.ensure_terminal_punctuation,
            },
            snippets: config.snippets.clone(),
            debug_dump: config.audio.debug_dump,
        },
    ));

    // Surface stage transitions in the log; a future menu bar indicator
    // would subscribe to the same bus.
    let mut status_rx = status.subscribe();
    tokio::spawn(async move {
        while let Ok(update) = status_rx.recv().await {
            tracing::info!(status = ?update, "pipeline");
        }
    });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ListenerEvent>();
    let mut listener = HotkeyListener::new(Arc::clone(&surfaces.tap), event_tx);
    listener.configure(HotkeyChord::from_config(&config.hotkey)?)?;
    listener.start()?;

    tracing::info!(
        modifiers = ?config.hotkey.modifiers,
        key = %config.hotkey.key,
        "listening for the hotkey chord (Ctrl+C to exit)"
    );

    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(ListenerEvent::Triggered) => {
                    orchestrator.handle_trigger().await;
                }
                Some(ListenerEvent::PermissionNeeded) => {
                    tracing::warn!("input monitoring permission missing, opening settings");
                    surfaces
                        .permissions
                        .open_settings_pane(PermissionDomain::InputInjection);
                }
                None => {
                    tracing::warn!("listener channel closed, shutting down");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    orchestrator.cancel();
    listener.stop();
    tracing::info!("dictate-hotkey stopped");
    Ok(())
}
