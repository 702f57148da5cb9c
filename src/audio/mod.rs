//! Microphone capture and recorded-audio types

pub mod capture;
pub mod retention;

pub use capture::CpalCapture;

use anyhow::Result;

/// A completed recording, mono f32 samples at a known sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAudio {
    /// Mono samples in the range [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl RecordedAudio {
    /// Duration of this recording in seconds
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        // Sample counts fit comfortably in f64's integer range
        #[allow(clippy::cast_precision_loss)]
        {
            self.samples.len() as f64 / f64::from(self.sample_rate)
        }
    }
}

/// Token for an in-progress recording
///
/// Returned by `CaptureDevice::begin` and redeemed by `finish` or `discard`.
/// A handle from a superseded session is rejected by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHandle {
    id: u64,
}

impl CaptureHandle {
    /// Mint a handle; implementations of `CaptureDevice` choose the ids
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self { id }
    }

    /// The device-assigned session id
    #[must_use]
    pub const fn id(self) -> u64 {
        self.id
    }
}

/// Recording device seam
///
/// One recording may be active at a time. `begin` activates the microphone
/// and hands back a handle; `finish` deactivates it and returns whatever was
/// captured; `discard` deactivates it and drops the samples.
#[cfg_attr(test, mockall::automock)]
pub trait CaptureDevice: Send + Sync {
    /// Start a recording
    ///
    /// # Errors
    /// Returns an error if a recording is already active or the stream
    /// cannot be resumed
    fn begin(&self) -> Result<CaptureHandle>;

    /// Stop the recording identified by `handle` and return its audio
    ///
    /// # Errors
    /// Returns an error if the handle does not match the active recording
    /// or the stream cannot be paused
    fn finish(&self, handle: CaptureHandle) -> Result<RecordedAudio>;

    /// Stop the recording identified by `handle`, dropping its samples
    fn discard(&self, handle: CaptureHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_secs() {
        let audio = RecordedAudio {
            samples: vec![0.0; 8000],
            sample_rate: 16000,
        };
        assert!((audio.duration_secs() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_duration_zero_rate() {
        let audio = RecordedAudio {
            samples: vec![0.0; 100],
            sample_rate: 0,
        };
        assert!(audio.duration_secs().abs() < f64::EPSILON);
    }
}
