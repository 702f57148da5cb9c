//! Clipboard-mediated text insertion with snapshot and restore

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::config::InsertionConfig;
use crate::permissions::{PermissionDomain, PermissionGate, PermissionState};

/// Saved pasteboard contents, one entry per representation
///
/// Each entry pairs a type identifier with its raw data so a restore can put
/// back rich content, not just plain text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClipboardSnapshot {
    /// (type identifier, data) pairs
    pub items: Vec<(String, Vec<u8>)>,
}

/// Pasteboard seam
#[cfg_attr(test, mockall::automock)]
pub trait ClipboardSurface: Send + Sync {
    /// Captures the current pasteboard contents
    ///
    /// # Errors
    /// Returns an error if the pasteboard cannot be read
    fn snapshot(&self) -> Result<ClipboardSnapshot>;

    /// Replaces the pasteboard with plain text
    ///
    /// # Errors
    /// Returns an error if the pasteboard write fails
    fn write_text(&self, text: &str) -> Result<()>;

    /// Puts a snapshot back onto the pasteboard
    ///
    /// # Errors
    /// Returns an error if the pasteboard write fails
    fn restore(&self, snapshot: &ClipboardSnapshot) -> Result<()>;
}

/// Paste keystroke synthesis failures
#[derive(Debug, Error)]
pub enum KeystrokeError {
    /// Event source could not be created
    #[error("failed to create keystroke event source")]
    SourceCreation,

    /// A key event could not be built or posted
    #[error("failed to synthesize paste keystroke: {0}")]
    EventCreation(String),
}

/// Synthetic keystroke seam
#[cfg_attr(test, mockall::automock)]
pub trait KeystrokeSurface: Send + Sync {
    /// Posts a paste chord to the frontmost application
    ///
    /// # Errors
    /// Returns an error if event creation or posting fails
    fn synthesize_paste(&self) -> Result<(), KeystrokeError>;
}

/// How an insertion attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertionOutcome {
    /// Text was pasted, restore scheduled if a snapshot was taken
    Inserted,
    /// Injection permission is missing, nothing was touched
    NoPermission,
    /// Text is on the clipboard but the paste keystroke failed
    ManualPasteRequired,
    /// The clipboard write itself failed; nothing was staged to paste
    Failed,
}

/// Drives the snapshot, write, paste, restore sequence
pub struct InsertionController {
    clipboard: Arc<dyn ClipboardSurface>,
    keystrokes: Arc<dyn KeystrokeSurface>,
    gate: Arc<PermissionGate>,
    options: InsertionConfig,
    /// Bumped on every successful paste so a pending restore can tell it has
    /// been superseded
    snapshot_epoch: Arc<AtomicU64>,
}

impl InsertionController {
    #[must_use]
    pub fn new(
        clipboard: Arc<dyn ClipboardSurface>,
        keystrokes: Arc<dyn KeystrokeSurface>,
        gate: Arc<PermissionGate>,
        options: InsertionConfig,
    ) -> Self {
        Self {
            clipboard,
            keystrokes,
            gate,
            options,
            snapshot_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Pastes `text` into the frontmost application
    ///
    /// The permission gate is consulted fresh on every call. When the paste
    /// keystroke fails, the text stays on the clipboard for a manual paste
    /// and any snapshot is dropped rather than restored over it.
    pub async fn insert(&self, text: &str) -> InsertionOutcome {
        debug!(chars = text.len(), "insertion requested");

        if self.gate.status(PermissionDomain::InputInjection) != PermissionState::Authorized {
            let granted = self.gate.request(PermissionDomain::InputInjection).await;
            if !granted {
                info!("insertion skipped, injection permission not granted");
                return InsertionOutcome::NoPermission;
            }
        }

        let snapshot = if self.options.preserve_clipboard {
            match self.clipboard.snapshot() {
                Ok(snap) => {
                    debug!(items = snap.items.len(), "clipboard snapshot taken");
                    Some(snap)
                }
                Err(e) => {
                    warn!("clipboard snapshot failed, proceeding without restore: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        if let Err(e) = self.clipboard.write_text(text) {
            // Unlike a keystroke failure, the text never made it onto the
            // clipboard, so there is nothing for the user to paste by hand.
            warn!("clipboard write failed: {e:#}");
            return InsertionOutcome::Failed;
        }

        // Give the pasteboard a moment to settle before the paste lands.
        tokio::time::sleep(Duration::from_millis(self.options.settle_delay_ms)).await;

        if let Err(e) = self.keystrokes.synthesize_paste() {
            // The text is on the clipboard, so the user can paste by hand.
            // Restoring the snapshot now would wipe it.
            warn!("paste keystroke failed, leaving text on clipboard: {e}");
            drop(snapshot);
            return InsertionOutcome::ManualPasteRequired;
        }

        info!("text pasted");

        if let Some(snapshot) = snapshot {
            self.schedule_restore(snapshot);
        }

        InsertionOutcome::Inserted
    }

    fn schedule_restore(&self, snapshot: ClipboardSnapshot) {
        let epoch = self.snapshot_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let epochs = Arc::clone(&self.snapshot_epoch);
        let clipboard = Arc::clone(&self.clipboard);
        let delay = Duration::from_millis(self.options.restore_delay_ms);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            if epochs.load(Ordering::SeqCst) != epoch {
                debug!("clipboard restore superseded by a newer paste");
                return;
            }

            match clipboard.restore(&snapshot) {
                Ok(()) => info!("clipboard restored"),
                Err(e) => warn!("clipboard restore failed: {e:#}"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::PermissionSurface;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum ClipboardOp {
        Snapshot,
        Write,
        Restore,
    }

    struct FakeClipboard {
        ops: Mutex<Vec<ClipboardOp>>,
        contents: Mutex<ClipboardSnapshot>,
        fail_write: bool,
        fail_snapshot: bool,
    }

    impl FakeClipboard {
        fn new() -> Self {
            Self {
                ops: Mutex::new(Vec::new()),
                contents: Mutex::new(ClipboardSnapshot {
                    items: vec![("public.utf8-plain-text".to_owned(), b"previous".to_vec())],
                }),
                fail_write: false,
                fail_snapshot: false,
            }
        }

        fn ops(&self) -> Vec<ClipboardOp> {
            self.ops.lock().unwrap().clone()
        }

        fn text(&self) -> String {
            let contents = self.contents.lock().unwrap();
            contents
                .items
                .first()
                .map(|(_, data)| String::from_utf8_lossy(data).into_owned())
                .unwrap_or_default()
        }
    }

    impl ClipboardSurface for FakeClipboard {
        fn snapshot(&self) -> Result<ClipboardSnapshot> {
            self.ops.lock().unwrap().push(ClipboardOp::Snapshot);
            if self.fail_snapshot {
                anyhow::bail!("snapshot failed");
            }
            Ok(self.contents.lock().unwrap().clone())
        }

        fn write_text(&self, text: &str) -> Result<()> {
            self.ops.lock().unwrap().push(ClipboardOp::Write);
            if self.fail_write {
                anyhow::bail!("write failed");
            }
            *self.contents.lock().unwrap() = ClipboardSnapshot {
                items: vec![(
                    "public.utf8-plain-text".to_owned(),
                    text.as_bytes().to_vec(),
                )],
            };
            Ok(())
        }

        fn restore(&self, snapshot: &ClipboardSnapshot) -> Result<()> {
            self.ops.lock().unwrap().push(ClipboardOp::Restore);
            *self.contents.lock().unwrap() = snapshot.clone();
            Ok(())
        }
    }

    struct FakeKeystrokes {
        fail: bool,
        pastes: Mutex<usize>,
    }

    impl KeystrokeSurface for FakeKeystrokes {
        fn synthesize_paste(&self) -> Result<(), KeystrokeError> {
            if self.fail {
                return Err(KeystrokeError::SourceCreation);
            }
            *self.pastes.lock().unwrap() += 1;
            Ok(())
        }
    }

    struct StaticPermissions {
        injection: PermissionState,
    }

    impl PermissionSurface for StaticPermissions {
        fn status(&self, domain: PermissionDomain) -> PermissionState {
            match domain {
                PermissionDomain::AudioCapture => PermissionState::Authorized,
                PermissionDomain::InputInjection => self.injection,
            }
        }

        fn request_access(&self, _domain: PermissionDomain) -> bool {
            false
        }

        fn open_settings_pane(&self, _domain: PermissionDomain) {}
    }

    fn controller(
        clipboard: Arc<FakeClipboard>,
        keystrokes: Arc<FakeKeystrokes>,
        injection: PermissionState,
        preserve: bool,
    ) -> InsertionController {
        let gate = Arc::new(PermissionGate::new(Arc::new(StaticPermissions {
            injection,
        })));
        InsertionController::new(
            clipboard,
            keystrokes,
            gate,
            InsertionConfig {
                preserve_clipboard: preserve,
                settle_delay_ms: 50,
                restore_delay_ms: 800,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_insert_restores_after_delay() {
        let clipboard = Arc::new(FakeClipboard::new());
        let keystrokes = Arc::new(FakeKeystrokes {
            fail: false,
            pastes: Mutex::new(0),
        });
        let ctl = controller(
            Arc::clone(&clipboard),
            Arc::clone(&keystrokes),
            PermissionState::Authorized,
            true,
        );

        let outcome = ctl.insert("hello world").await;
        assert_eq!(outcome, InsertionOutcome::Inserted);
        assert_eq!(*keystrokes.pastes.lock().unwrap(), 1);
        assert_eq!(clipboard.text(), "hello world");

        // Restore fires once the delay elapses.
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(
            clipboard.ops(),
            vec![ClipboardOp::Snapshot, ClipboardOp::Write, ClipboardOp::Restore]
        );
        assert_eq!(clipboard.text(), "previous");
    }

    #[tokio::test(start_paused = true)]
    async fn test_preserve_disabled_skips_snapshot_and_restore() {
        let clipboard = Arc::new(FakeClipboard::new());
        let keystrokes = Arc::new(FakeKeystrokes {
            fail: false,
            pastes: Mutex::new(0),
        });
        let ctl = controller(
            Arc::clone(&clipboard),
            keystrokes,
            PermissionState::Authorized,
            false,
        );

        assert_eq!(ctl.insert("hello").await, InsertionOutcome::Inserted);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(clipboard.ops(), vec![ClipboardOp::Write]);
        assert_eq!(clipboard.text(), "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_permission_leaves_clipboard_untouched() {
        let clipboard = Arc::new(FakeClipboard::new());
        let keystrokes = Arc::new(FakeKeystrokes {
            fail: false,
            pastes: Mutex::new(0),
        });
        let ctl = controller(
            Arc::clone(&clipboard),
            Arc::clone(&keystrokes),
            PermissionState::Denied,
            true,
        );

        assert_eq!(ctl.insert("hello").await, InsertionOutcome::NoPermission);
        assert!(clipboard.ops().is_empty());
        assert_eq!(*keystrokes.pastes.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paste_failure_keeps_text_for_manual_paste() {
        let clipboard = Arc::new(FakeClipboard::new());
        let keystrokes = Arc::new(FakeKeystrokes {
            fail: true,
            pastes: Mutex::new(0),
        });
        let ctl = controller(
            Arc::clone(&clipboard),
            keystrokes,
            PermissionState::Authorized,
            true,
        );

        let outcome = ctl.insert("hello").await;
        assert_eq!(outcome, InsertionOutcome::ManualPasteRequired);

        // No restore ever fires. The old contents are gone on purpose so the
        // user still has the new text to paste by hand.
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(clipboard.ops(), vec![ClipboardOp::Snapshot, ClipboardOp::Write]);
        assert_eq!(clipboard.text(), "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_reports_failed_without_paste() {
        let mut fake = FakeClipboard::new();
        fake.fail_write = true;
        let clipboard = Arc::new(fake);
        let keystrokes = Arc::new(FakeKeystrokes {
            fail: false,
            pastes: Mutex::new(0),
        });
        let ctl = controller(
            Arc::clone(&clipboard),
            Arc::clone(&keystrokes),
            PermissionState::Authorized,
            true,
        );

        // A failed write stages nothing, so this is not a manual-paste case.
        let outcome = ctl.insert("hello").await;
        assert_eq!(outcome, InsertionOutcome::Failed);
        assert_eq!(*keystrokes.pastes.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_failure_still_inserts() {
        let mut fake = FakeClipboard::new();
        fake.fail_snapshot = true;
        let clipboard = Arc::new(fake);
        let keystrokes = Arc::new(FakeKeystrokes {
            fail: false,
            pastes: Mutex::new(0),
        });
        let ctl = controller(
            Arc::clone(&clipboard),
            keystrokes,
            PermissionState::Authorized,
            true,
        );

        assert_eq!(ctl.insert("hello").await, InsertionOutcome::Inserted);
        tokio::time::sleep(Duration::from_millis(1000)).await;

        // Without a snapshot there is nothing to restore.
        assert_eq!(clipboard.ops(), vec![ClipboardOp::Snapshot, ClipboardOp::Write]);
        assert_eq!(clipboard.text(), "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseding_paste_cancels_earlier_restore() {
        let clipboard = Arc::new(FakeClipboard::new());
        let keystrokes = Arc::new(FakeKeystrokes {
            fail: false,
            pastes: Mutex::new(0),
        });
        let ctl = controller(
            Arc::clone(&clipboard),
            keystrokes,
            PermissionState::Authorized,
            true,
        );

        assert_eq!(ctl.insert("first").await, InsertionOutcome::Inserted);

        // Second paste lands before the first restore fires.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(ctl.insert("second").await, InsertionOutcome::Inserted);

        tokio::time::sleep(Duration::from_millis(2000)).await;

        let restores = clipboard
            .ops()
            .iter()
            .filter(|op| **op == ClipboardOp::Restore)
            .count();
        assert_eq!(restores, 1);
        // The surviving restore puts back what was on the clipboard before
        // the second paste, which is the first paste's text.
        assert_eq!(clipboard.text(), "first");
    }
}
