//! OS-specific surface implementations
//!
//! Everything above this module talks to traits (`EventTapSurface`,
//! `PermissionSurface`, `ClipboardSurface`, `KeystrokeSurface`); this module
//! provides the real implementations for the platforms we support.

#[cfg(target_os = "macos")]
pub mod macos;
