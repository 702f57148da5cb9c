use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapCons, HeapRb,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::audio::{CaptureDevice, CaptureHandle, RecordedAudio};
use crate::config::AudioConfig;

/// Output rate handed to the recognizer
const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Ring buffer headroom in seconds, slightly above the longest recording the
/// pipeline will accept downstream
const RING_BUFFER_SECS: usize = 125;

/// Stream lifecycle seam so the capture logic can be tested without hardware
trait StreamControl: Send {
    /// Resume the stream (activate the microphone)
    fn play(&self) -> Result<()>;
    /// Pause the stream (deactivate the microphone)
    fn pause(&self) -> Result<()>;
}

struct CpalStreamControl {
    stream: cpal::Stream,
}

impl StreamControl for CpalStreamControl {
    fn play(&self) -> Result<()> {
        self.stream.play().context("failed to resume audio stream")
    }

    fn pause(&self) -> Result<()> {
        self.stream.pause().context("failed to pause audio stream")
    }
}

// SAFETY: the stream is only driven through play/pause, which CoreAudio and
// the other cpal backends accept from any thread, and CpalCapture serializes
// those calls behind its session mutex.
#[allow(unsafe_code)]
unsafe impl Send for CpalStreamControl {}

struct ActiveState {
    session: Option<u64>,
    stream: Option<Box<dyn StreamControl>>,
    consumer: HeapCons<f32>,
}

/// Microphone capture over CPAL with a lock-free ring buffer
///
/// The stream stays installed for the process lifetime and is paused between
/// recordings, so starting a recording is a resume rather than a device open.
pub struct CpalCapture {
    state: Mutex<ActiveState>,
    is_recording: Arc<AtomicBool>,
    next_session: AtomicU64,
    device_sample_rate: u32,
    device_channels: u16,
}

impl CpalCapture {
    /// Opens the default input device and installs a paused stream
    ///
    /// # Errors
    /// Returns an error if no input device is available or stream creation
    /// fails
    pub fn new(_config: &AudioConfig) -> Result<Self> {
        info!("initializing audio capture");

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .context("no input device available")?;

        let device_name = device.name().unwrap_or_else(|_| "unknown".to_owned());

        let supported_config = device
            .default_input_config()
            .context("failed to get default input config")?;

        let device_sample_rate = supported_config.sample_rate();
        let device_channels = supported_config.channels();

        info!(
            device = %device_name,
            rate = device_sample_rate,
            channels = device_channels,
            "input device configured"
        );

        let capacity =
            (device_sample_rate as usize) * (device_channels as usize) * RING_BUFFER_SECS;
        let (mut producer, consumer) = HeapRb::<f32>::new(capacity).split();

        let is_recording = Arc::new(AtomicBool::new(false));
        let recording_flag = Arc::clone(&is_recording);

        let stream_config = supported_config.into();
        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if recording_flag.load(Ordering::Relaxed) {
                        let pushed = producer.push_slice(data);
                        if pushed < data.len() {
                            warn!("ring buffer full, dropped {} samples", data.len() - pushed);
                        }
                    }
                },
                move |err| {
                    warn!("audio stream error: {}", err);
                },
                None,
            )
            .context("failed to build input stream")?;

        let control = CpalStreamControl { stream };
        control.play()?;
        control.pause()?;
        info!("audio stream installed (paused)");

        Ok(Self {
            state: Mutex::new(ActiveState {
                session: None,
                stream: Some(Box::new(control)),
                consumer,
            }),
            is_recording,
            next_session: AtomicU64::new(1),
            device_sample_rate,
            device_channels,
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ActiveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_stream(&self, state: &mut ActiveState) -> Result<Vec<f32>> {
        self.is_recording.store(false, Ordering::Relaxed);
        if let Some(stream) = &state.stream {
            stream.pause()?;
        }

        let mut samples = Vec::new();
        while let Some(sample) = state.consumer.try_pop() {
            samples.push(sample);
        }
        Ok(samples)
    }
}

impl CaptureDevice for CpalCapture {
    fn begin(&self) -> Result<CaptureHandle> {
        let _span = tracing::debug_span!("begin_recording").entered();
        let mut state = self.lock_state();

        if state.session.is_some() {
            anyhow::bail!("a recording is already active");
        }

        state.consumer.clear();

        // Flag goes up before the stream resumes so no frames are missed.
        self.is_recording.store(true, Ordering::Relaxed);
        if let Some(stream) = &state.stream {
            stream.play()?;
        }

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        state.session = Some(id);

        info!(session = id, "recording started");
        Ok(CaptureHandle::new(id))
    }

    fn finish(&self, handle: CaptureHandle) -> Result<RecordedAudio> {
        let _span = tracing::debug_span!("finish_recording").entered();
        let mut state = self.lock_state();

        if state.session != Some(handle.id()) {
            anyhow::bail!("capture handle does not match the active recording");
        }
        state.session = None;

        let raw = self.stop_stream(&mut state)?;
        drop(state);

        let mono = downmix_to_mono(&raw, self.device_channels);
        let samples = if self.device_sample_rate == TARGET_SAMPLE_RATE {
            mono
        } else {
            resample_linear(&mono, self.device_sample_rate, TARGET_SAMPLE_RATE)
        };

        info!(
            session = handle.id(),
            raw_samples = raw.len(),
            samples = samples.len(),
            "recording finished"
        );

        Ok(RecordedAudio {
            samples,
            sample_rate: TARGET_SAMPLE_RATE,
        })
    }

    fn discard(&self, handle: CaptureHandle) {
        let mut state = self.lock_state();

        if state.session != Some(handle.id()) {
            debug!(session = handle.id(), "discard for a stale capture handle");
            return;
        }
        state.session = None;

        match self.stop_stream(&mut state) {
            Ok(samples) => info!(
                session = handle.id(),
                dropped_samples = samples.len(),
                "recording discarded"
            ),
            Err(e) => warn!("failed to pause stream while discarding: {e:#}"),
        }
    }
}

// SAFETY: the cpal stream inside ActiveState is only reachable through the
// state mutex, so stream control never runs concurrently from two threads.
#[allow(unsafe_code)]
unsafe impl Sync for CpalCapture {}

/// Averages interleaved frames down to a single channel
fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    let channels_f64 = f64::from(channels);
    samples
        .chunks(channels as usize)
        .map(|frame| {
            let sum: f64 = frame.iter().map(|&s| f64::from(s)).sum();
            // f64 to f32 keeps plenty of precision for audio samples
            #[allow(clippy::cast_possible_truncation)]
            {
                (sum / channels_f64) as f32
            }
        })
        .collect()
}

/// Linear interpolation resampler
///
/// Quality is sufficient for speech recognition input. Fractional index
/// arithmetic needs f64/usize conversions throughout.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if samples.is_empty() || from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let start = std::time::Instant::now();
    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let output_len = ((samples.len() as f64) / ratio).ceil() as usize;

    let mut out = Vec::with_capacity(output_len);
    for i in 0..output_len {
        let src = (i as f64) * ratio;
        let lo = src.floor() as usize;
        let hi = (lo + 1).min(samples.len() - 1);
        let fract = src - src.floor();

        let sample = if lo < samples.len() {
            let a = f64::from(samples[lo]);
            let b = f64::from(samples[hi]);
            a.mul_add(1.0 - fract, b * fract) as f32
        } else {
            0.0
        };
        out.push(sample);
    }

    debug!(
        from_rate,
        to_rate,
        input_samples = samples.len(),
        output_samples = out.len(),
        resample_us = start.elapsed().as_micros(),
        "resampling completed"
    );

    out
}
