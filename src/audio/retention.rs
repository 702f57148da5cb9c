//! Debug WAV dumps and their retention policy

use anyhow::{Context, Result};
use hound::{WavSpec, WavWriter};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::AudioConfig;

const DUMP_PREFIX: &str = "recording_";

fn debug_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".dictate-hotkey").join("debug"))
}

/// Writes a recording to the debug directory as a timestamped WAV file
///
/// # Errors
/// Returns an error if directory creation or the WAV write fails
pub fn dump_debug_wav(samples: &[f32], sample_rate: u32) -> Result<PathBuf> {
    let dir = debug_dir()?;
    fs::create_dir_all(&dir).context("failed to create debug directory")?;

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("failed to get current time")?
        .as_secs();
    let path = dir.join(format!("{DUMP_PREFIX}{timestamp}.wav"));

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = WavWriter::create(&path, spec).context("failed to create WAV file")?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .context("failed to write sample")?;
    }
    writer.finalize().context("failed to finalize WAV file")?;

    tracing::info!(
        path = %path.display(),
        samples = samples.len(),
        "saved debug WAV"
    );
    Ok(path)
}

/// Deletes debug dumps older than `retention_days` or beyond `max_dumps`
///
/// A zero in either setting disables that policy. Returns the number of
/// files deleted.
///
/// # Errors
/// Returns an error if the directory listing fails. Individual deletion
/// failures are logged and skipped.
pub fn prune_debug_dumps(config: &AudioConfig) -> Result<usize> {
    let dir = debug_dir()?;

    if !dir.exists() {
        tracing::debug!("debug directory does not exist, skipping prune");
        return Ok(0);
    }

    // Dump filenames carry their creation time, so the policy never needs
    // filesystem mtimes.
    let mut dumps: Vec<(PathBuf, u64)> = fs::read_dir(&dir)
        .context("failed to read debug directory")?
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            if !path.is_file() {
                return None;
            }
            let filename = path.file_name()?.to_str()?;
            let timestamp: u64 = filename
                .strip_prefix(DUMP_PREFIX)?
                .strip_suffix(".wav")?
                .parse()
                .ok()?;
            Some((path, timestamp))
        })
        .collect();

    if dumps.is_empty() {
        return Ok(0);
    }

    // Newest first
    dumps.sort_by(|a, b| b.1.cmp(&a.1));

    let mut to_delete = HashSet::new();

    if config.retention_days > 0 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("failed to get current time")?
            .as_secs();
        let retention_secs = u64::from(config.retention_days) * 24 * 60 * 60;

        for (path, timestamp) in &dumps {
            if now.saturating_sub(*timestamp) > retention_secs {
                to_delete.insert(path.clone());
            }
        }
    }

    if config.max_dumps > 0 && dumps.len() > config.max_dumps {
        for (path, _) in dumps.iter().skip(config.max_dumps) {
            to_delete.insert(path.clone());
        }
    }

    let mut deleted = 0;
    for path in to_delete {
        match fs::remove_file(&path) {
            Ok(()) => {
                deleted += 1;
                tracing::debug!(path = %path.display(), "deleted debug dump");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to delete dump: {e}");
            }
        }
    }

    if deleted > 0 {
        tracing::info!(
            deleted,
            remaining = dumps.len() - deleted,
            "debug dump prune complete"
        );
    }

    Ok(deleted)
}
