use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Permission domains the pipeline depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDomain {
    /// Microphone access for recording
    AudioCapture,
    /// Synthesizing keyboard events and observing key-downs
    InputInjection,
}

/// Authorization state as reported by the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Authorized,
    Denied,
    NotDetermined,
    /// Blocked by policy; no prompt can change it
    Restricted,
}

/// OS seam for permission queries and prompts
///
/// `request_access` may block on a user prompt and is always called from the
/// blocking pool.
#[cfg_attr(test, mockall::automock)]
pub trait PermissionSurface: Send + Sync {
    fn status(&self, domain: PermissionDomain) -> PermissionState;
    fn request_access(&self, domain: PermissionDomain) -> bool;
    fn open_settings_pane(&self, domain: PermissionDomain);
}

/// Change notification emitted when a fresh read differs from the last one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionChange {
    pub domain: PermissionDomain,
    pub state: PermissionState,
}

#[derive(Default)]
struct LastSeen {
    audio: Option<PermissionState>,
    injection: Option<PermissionState>,
}

/// Gating facade over the permission surface
///
/// Every check reads the surface fresh; the remembered value exists only to
/// deduplicate change events. Concurrent injection prompts are coalesced so
/// the user sees at most one dialog.
pub struct PermissionGate {
    surface: Arc<dyn PermissionSurface>,
    last_seen: Mutex<LastSeen>,
    changes: broadcast::Sender<PermissionChange>,
    injection_prompt: AsyncMutex<()>,
}

impl PermissionGate {
    pub fn new(surface: Arc<dyn PermissionSurface>) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            surface,
            last_seen: Mutex::new(LastSeen::default()),
            changes,
            injection_prompt: AsyncMutex::new(()),
        }
    }

    /// Fresh read of a domain's state
    pub fn status(&self, domain: PermissionDomain) -> PermissionState {
        let state = self.surface.status(domain);
        self.record(domain, state);
        state
    }

    /// Re-read both domains, emitting change events where the value moved
    ///
    /// Called on every application-activated signal: the user may have just
    /// toggled a checkbox in the settings pane.
    pub fn refresh_all(&self) {
        self.status(PermissionDomain::AudioCapture);
        self.status(PermissionDomain::InputInjection);
    }

    /// Request authorization for a domain, prompting at most once
    ///
    /// Returns whether the domain ended up authorized.
    pub async fn request(&self, domain: PermissionDomain) -> bool {
        match domain {
            PermissionDomain::AudioCapture => self.request_audio().await,
            PermissionDomain::InputInjection => self.request_injection().await,
        }
    }

    #[must_use]
    pub fn subscribe_changes(&self) -> broadcast::Receiver<PermissionChange> {
        self.changes.subscribe()
    }

    /// Re-read both domains whenever the app returns to the foreground
    pub fn spawn_foreground_watch(
        self: &Arc<Self>,
        signal: &crate::status::ForegroundSignal,
    ) -> tokio::task::JoinHandle<()> {
        let gate = Arc::clone(self);
        let mut rx = signal.subscribe();
        tokio::spawn(async move {
            while rx.recv().await.is_ok() {
                debug!("application activated, refreshing permission state");
                gate.refresh_all();
            }
        })
    }

    /// Poll a domain until it reaches a settled state
    ///
    /// Runs only while the outcome can still change; stops once the domain is
    /// `Authorized` or `Restricted`.
    pub fn spawn_polling(
        self: &Arc<Self>,
        domain: PermissionDomain,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let gate = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let state = gate.status(domain);
                if matches!(
                    state,
                    PermissionState::Authorized | PermissionState::Restricted
                ) {
                    debug!(domain = ?domain, state = ?state, "permission settled, polling stopped");
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        })
    }

    async fn request_audio(&self) -> bool {
        match self.status(PermissionDomain::AudioCapture) {
            PermissionState::Authorized => true,
            PermissionState::NotDetermined => {
                info!("prompting for audio capture permission");
                let granted = self.prompt(PermissionDomain::AudioCapture).await;
                self.status(PermissionDomain::AudioCapture);
                granted
            }
            PermissionState::Denied => {
                // A denied microphone cannot be re-prompted; hand off to settings.
                info!("audio capture denied, opening settings pane");
                self.surface
                    .open_settings_pane(PermissionDomain::AudioCapture);
                false
            }
            PermissionState::Restricted => {
                warn!("audio capture restricted by policy");
                false
            }
        }
    }

    async fn request_injection(&self) -> bool {
        if let Ok(_guard) = self.injection_prompt.try_lock() {
            match self.status(PermissionDomain::InputInjection) {
                PermissionState::Authorized => true,
                PermissionState::NotDetermined => {
                    info!("prompting for input injection permission");
                    let granted = self.prompt(PermissionDomain::InputInjection).await;
                    self.status(PermissionDomain::InputInjection);
                    granted
                }
                PermissionState::Denied => {
                    info!("input injection denied, opening settings pane");
                    self.surface
                        .open_settings_pane(PermissionDomain::InputInjection);
                    false
                }
                PermissionState::Restricted => {
                    warn!("input injection restricted by policy");
                    false
                }
            }
        } else {
            // Another caller owns the prompt; wait for it and resolve from a
            // fresh read instead of showing a second dialog.
            debug!("injection prompt already in flight, waiting");
            let _guard = self.injection_prompt.lock().await;
            self.status(PermissionDomain::InputInjection) == PermissionState::Authorized
        }
    }

    async fn prompt(&self, domain: PermissionDomain) -> bool {
        let surface = Arc::clone(&self.surface);
        tokio::task::spawn_blocking(move || surface.request_access(domain))
            .await
            .unwrap_or(false)
    }

    fn record(&self, domain: PermissionDomain, state: PermissionState) {
        let mut last = self
            .last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let slot = match domain {
            PermissionDomain::AudioCapture => &mut last.audio,
            PermissionDomain::InputInjection => &mut last.injection,
        };
        if *slot != Some(state) {
            *slot = Some(state);
            drop(last);
            info!(domain = ?domain, state = ?state, "permission state changed");
            let _ = self.changes.send(PermissionChange { domain, state });
        }
    }
}
