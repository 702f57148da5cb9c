use thiserror::Error;

use crate::input::hotkey::KeyInput;

/// Event delivered by an installed tap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapEvent {
    /// A key-down with its masked modifier set
    KeyDown(KeyInput),
    /// The OS disabled the tap (timeout or user input)
    Disabled,
}

/// What the callback wants done with the intercepted event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapDisposition {
    /// Swallow the event; it never reaches the frontmost app
    Consume,
    /// Deliver the event unmodified
    Pass,
}

/// Tap installation errors
#[derive(Debug, Error)]
pub enum TapError {
    /// The OS refused the tap because input monitoring is not authorized
    #[error("input monitoring permission required to install event tap")]
    PermissionRequired,

    /// Tap creation failed for another reason
    #[error("failed to install event tap: {0}")]
    InstallFailed(String),
}

/// Callback invoked on the OS interception thread for every observed event
pub type TapCallback = Box<dyn FnMut(TapEvent) -> TapDisposition + Send>;

/// Handle to an installed tap
///
/// Dropping the handle removes the tap.
pub trait TapHandle: Send {
    /// Re-enable a tap the OS disabled, without re-installing it
    fn enable(&self);
}

/// OS seam for installing keyboard event taps
pub trait EventTapSurface: Send + Sync {
    /// Install a tap that feeds key-downs to `callback`
    ///
    /// # Errors
    /// Returns `PermissionRequired` when input monitoring is not authorized,
    /// or `InstallFailed` when the OS rejects the tap.
    fn install(&self, callback: TapCallback) -> Result<Box<dyn TapHandle>, TapError>;
}
