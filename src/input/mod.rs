/// Chord matching and the hotkey listener
pub mod hotkey;
/// OS seam for keyboard event interception
pub mod tap;

pub use hotkey::{HotkeyChord, HotkeyListener, KeyInput, ListenerEvent, ModifierSet};
pub use tap::{EventTapSurface, TapDisposition, TapEvent, TapHandle};
