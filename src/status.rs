use tokio::sync::broadcast;

use crate::permissions::PermissionDomain;

/// Pipeline stage published to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    Idle,
    Recording,
    Transcribing,
    Cleaning,
    Inserting,
    /// Injection failed; the text was left on the clipboard for a manual paste
    ManualPasteRequired,
    Error(ErrorKind),
}

/// Flattened error classification carried by the status stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    PermissionDenied(PermissionDomain),
    AudioValidation(String),
    ModelNotLoaded,
    EngineFailure,
    InjectionFailed,
}

/// Broadcast bus for pipeline status updates
///
/// Cloning shares the underlying channel. Publishing never blocks; updates
/// sent while no subscriber exists are dropped.
#[derive(Clone)]
pub struct StatusBus {
    sender: broadcast::Sender<PipelineStatus>,
}

impl StatusBus {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    pub fn publish(&self, status: PipelineStatus) {
        tracing::debug!(status = ?status, "pipeline status");
        // Send only fails when there are no subscribers, which is fine.
        let _ = self.sender.send(status);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineStatus> {
        self.sender.subscribe()
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Signal fired when the application returns to the foreground
///
/// The permission gate listens to this to re-read both permission domains.
#[derive(Clone)]
pub struct ForegroundSignal {
    sender: broadcast::Sender<()>,
}

impl ForegroundSignal {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(8);
        Self { sender }
    }

    pub fn notify(&self) {
        let _ = self.sender.send(());
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }
}

impl Default for ForegroundSignal {
    fn default() -> Self {
        Self::new()
    }
}
