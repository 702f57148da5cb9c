//! Dictate Hotkey - hotkey-triggered dictation for macOS
//!
//! A global hotkey chord toggles a recording session; finished recordings
//! flow through transcription, tiered text cleanup, and clipboard-mediated
//! insertion into the frontmost application.

/// Microphone capture and debug dump retention
pub mod audio;
/// Transcript cleanup tiers and the model-assisted rewrite path
pub mod cleanup;
/// Configuration management
pub mod config;
/// Event tap and hotkey chord matching
pub mod input;
/// Clipboard snapshot, paste, and restore
pub mod insertion;
/// Permission gating for the microphone and synthetic input
pub mod permissions;
/// OS-specific surface implementations
pub mod platform;
/// Session lifecycle and pipeline orchestration
pub mod session;
/// Fuzzy snippet expansion
pub mod snippets;
/// Pipeline status broadcasting
pub mod status;
/// Telemetry and logging setup
pub mod telemetry;
/// Speech recognition and model management
pub mod transcription;
