use anyhow::{anyhow, Result};
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::HotkeyConfig;
use crate::input::tap::{EventTapSurface, TapDisposition, TapError, TapEvent};

/// Mask over the four chord-relevant modifiers
///
/// Raw OS flag words carry extra bits (caps lock, fn, device-specific flags);
/// those are masked out before any comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModifierSet(u8);

impl ModifierSet {
    pub const EMPTY: Self = Self(0);
    pub const COMMAND: Self = Self(1);
    pub const SHIFT: Self = Self(1 << 1);
    pub const OPTION: Self = Self(1 << 2);
    pub const CONTROL: Self = Self(1 << 3);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ModifierSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ModifierSet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// An observed key-down, already masked to the chord-relevant modifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInput {
    pub key_code: u16,
    pub modifiers: ModifierSet,
}

/// The configured trigger chord
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotkeyChord {
    pub key_code: u16,
    pub modifiers: ModifierSet,
}

impl HotkeyChord {
    /// Build a chord from the config section
    ///
    /// # Errors
    /// Returns error on an unknown modifier or key name
    pub fn from_config(config: &HotkeyConfig) -> Result<Self> {
        let modifiers = parse_modifiers(&config.modifiers)?;
        let key_code = parse_key(&config.key)?;
        Ok(Self {
            key_code,
            modifiers,
        })
    }

    /// Exact match: same key code and the exact modifier set
    ///
    /// A held superset or subset of the configured modifiers does not match.
    #[must_use]
    pub fn matches(&self, input: KeyInput) -> bool {
        self.key_code == input.key_code && self.modifiers == input.modifiers
    }
}

fn parse_modifiers(modifiers: &[String]) -> Result<ModifierSet> {
    let mut result = ModifierSet::EMPTY;
    for modifier in modifiers {
        match modifier.as_str() {
            "Command" | "Cmd" | "Super" => result |= ModifierSet::COMMAND,
            "Shift" => result |= ModifierSet::SHIFT,
            "Option" | "Alt" => result |= ModifierSet::OPTION,
            "Control" | "Ctrl" => result |= ModifierSet::CONTROL,
            _ => return Err(anyhow!("unknown modifier: {}", modifier)),
        }
    }
    Ok(result)
}

/// ANSI virtual key codes for the supported key names
fn parse_key(key: &str) -> Result<u16> {
    match key {
        "A" => Ok(0),
        "S" => Ok(1),
        "D" => Ok(2),
        "F" => Ok(3),
        "H" => Ok(4),
        "G" => Ok(5),
        "Z" => Ok(6),
        "X" => Ok(7),
        "C" => Ok(8),
        "V" => Ok(9),
        "B" => Ok(11),
        "Q" => Ok(12),
        "W" => Ok(13),
        "E" => Ok(14),
        "R" => Ok(15),
        "Y" => Ok(16),
        "T" => Ok(17),
        "O" => Ok(31),
        "U" => Ok(32),
        "I" => Ok(34),
        "P" => Ok(35),
        "L" => Ok(37),
        "J" => Ok(38),
        "K" => Ok(40),
        "N" => Ok(45),
        "M" => Ok(46),
        "Space" => Ok(49),
        _ => Err(anyhow!("unsupported key: {}", key)),
    }
}

/// Event delivered to the application loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerEvent {
    /// The chord was pressed
    Triggered,
    /// The tap could not be installed because the permission is missing
    PermissionNeeded,
}

/// Listener lifecycle errors
#[derive(Debug, Error)]
pub enum HotkeyError {
    /// `start` was called before a chord was configured
    #[error("no hotkey chord configured")]
    NotConfigured,

    /// The operation requires the listener to be stopped first
    #[error("listener is running; stop it before reconfiguring")]
    AlreadyRunning,

    /// The tap surface rejected installation
    #[error("event tap installation failed")]
    Install(#[from] TapError),
}

/// Internal signal from the interception callback to the dispatch task
enum TapSignal {
    Matched,
    Disabled,
}

/// Global hotkey listener over an event tap surface
///
/// Matching key-downs are consumed and surfaced as `Triggered` from a
/// dedicated dispatch task, never from inside the interception callback.
pub struct HotkeyListener {
    surface: Arc<dyn EventTapSurface>,
    events: mpsc::UnboundedSender<ListenerEvent>,
    chord: Option<HotkeyChord>,
    dispatch: Option<tokio::task::JoinHandle<()>>,
}

impl HotkeyListener {
    pub fn new(
        surface: Arc<dyn EventTapSurface>,
        events: mpsc::UnboundedSender<ListenerEvent>,
    ) -> Self {
        Self {
            surface,
            events,
            chord: None,
            dispatch: None,
        }
    }

    /// Set the trigger chord
    ///
    /// # Errors
    /// Returns `AlreadyRunning` while the listener is started; a chord change
    /// requires stop, configure, start.
    pub fn configure(&mut self, chord: HotkeyChord) -> Result<(), HotkeyError> {
        if self.dispatch.is_some() {
            return Err(HotkeyError::AlreadyRunning);
        }
        info!(key_code = chord.key_code, "hotkey chord configured");
        self.chord = Some(chord);
        Ok(())
    }

    /// Install the tap and start dispatching
    ///
    /// When the required permission is absent, no tap is installed and a
    /// `PermissionNeeded` event is emitted instead.
    ///
    /// # Errors
    /// Returns `NotConfigured` without a chord, `AlreadyRunning` if started
    /// twice, or `Install` on any other tap failure.
    pub fn start(&mut self) -> Result<(), HotkeyError> {
        if self.dispatch.is_some() {
            return Err(HotkeyError::AlreadyRunning);
        }
        let chord = self.chord.ok_or(HotkeyError::NotConfigured)?;

        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<TapSignal>();
        let callback = Box::new(move |event: TapEvent| match event {
            TapEvent::KeyDown(input) => {
                if chord.matches(input) {
                    let _ = signal_tx.send(TapSignal::Matched);
                    TapDisposition::Consume
                } else {
                    TapDisposition::Pass
                }
            }
            TapEvent::Disabled => {
                let _ = signal_tx.send(TapSignal::Disabled);
                TapDisposition::Pass
            }
        });

        let handle = match self.surface.install(callback) {
            Ok(handle) => handle,
            Err(TapError::PermissionRequired) => {
                warn!("event tap not installed: input monitoring permission missing");
                let _ = self.events.send(ListenerEvent::PermissionNeeded);
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let events = self.events.clone();
        self.dispatch = Some(tokio::spawn(async move {
            // The handle lives here; dropping it on task exit removes the tap.
            while let Some(signal) = signal_rx.recv().await {
                match signal {
                    TapSignal::Matched => {
                        debug!("hotkey chord matched");
                        let _ = events.send(ListenerEvent::Triggered);
                    }
                    TapSignal::Disabled => {
                        warn!("event tap disabled by OS, re-enabling");
                        handle.enable();
                    }
                }
            }
        }));

        info!("hotkey listener started");
        Ok(())
    }

    /// Stop dispatching and remove the tap; idempotent
    pub fn stop(&mut self) {
        if let Some(task) = self.dispatch.take() {
            task.abort();
            info!("hotkey listener stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.dispatch.is_some()
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        self.stop();
    }
}
