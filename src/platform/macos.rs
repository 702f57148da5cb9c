//! macOS surfaces: CGEvent tap, CGEvent keystrokes, NSPasteboard, and
//! permission probes

use anyhow::Result;
use core_foundation::runloop::CFRunLoop;
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventType, CGKeyCode, EventField,
};
use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::input::{EventTapSurface, KeyInput, ModifierSet, TapDisposition, TapEvent};
use crate::input::tap::{TapCallback, TapError, TapHandle};
use crate::insertion::{ClipboardSnapshot, ClipboardSurface, KeystrokeError, KeystrokeSurface};
use crate::permissions::{PermissionDomain, PermissionState, PermissionSurface};
use crate::status::ForegroundSignal;

/// ANSI keycode for the V key, used for the paste chord
const KEY_V: CGKeyCode = 9;

/// How often the tap thread checks for a pending re-enable request
const TAP_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Gap between the paste chord's key-down and key-up events
const KEY_EVENT_GAP: Duration = Duration::from_millis(5);

fn modifiers_from_flags(flags: CGEventFlags) -> ModifierSet {
    let mut set = ModifierSet::EMPTY;
    if flags.contains(CGEventFlags::CGEventFlagCommand) {
        set |= ModifierSet::COMMAND;
    }
    if flags.contains(CGEventFlags::CGEventFlagShift) {
        set |= ModifierSet::SHIFT;
    }
    if flags.contains(CGEventFlags::CGEventFlagAlternate) {
        set |= ModifierSet::OPTION;
    }
    if flags.contains(CGEventFlags::CGEventFlagControl) {
        set |= ModifierSet::CONTROL;
    }
    set
}

/// Returning a Null-typed copy from the tap callback swallows the original
/// keystroke before any application sees it
fn consumed_copy(original: &CGEvent) -> CGEvent {
    let copy = original.clone();
    copy.set_type(CGEventType::Null);
    copy
}

struct TapShared {
    stop: AtomicBool,
    reenable: AtomicBool,
}

/// Keeps the tap thread alive; dropping it tears the tap down
struct MacosTapHandle {
    shared: Arc<TapShared>,
    run_loop: CFRunLoop,
}

impl TapHandle for MacosTapHandle {
    fn enable(&self) {
        self.shared.reenable.store(true, Ordering::SeqCst);
        self.run_loop.wakeup();
    }
}

impl Drop for MacosTapHandle {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.run_loop.stop();
    }
}

/// CGEvent tap surface running on its own CFRunLoop thread
///
/// The tap is installed at the session level with head insertion, so matched
/// chords can be consumed before they reach the frontmost application.
pub struct MacosEventTap;

impl EventTapSurface for MacosEventTap {
    fn install(&self, callback: TapCallback) -> Result<Box<dyn TapHandle>, TapError> {
        let shared = Arc::new(TapShared {
            stop: AtomicBool::new(false),
            reenable: AtomicBool::new(false),
        });
        let thread_shared = Arc::clone(&shared);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<CFRunLoop, TapError>>();

        std::thread::spawn(move || {
            let run_loop = CFRunLoop::get_current();
            let callback = Mutex::new(callback);

            let tap = CGEventTap::new(
                CGEventTapLocation::Session,
                CGEventTapPlacement::HeadInsertEventTap,
                CGEventTapOptions::Default,
                vec![CGEventType::KeyDown],
                move |_proxy, event_type, event| {
                    let mut callback = callback
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);

                    match event_type {
                        CGEventType::TapDisabledByTimeout
                        | CGEventType::TapDisabledByUserInput => {
                            let _ = callback(TapEvent::Disabled);
                            None
                        }
                        CGEventType::KeyDown => {
                            // u16 losslessly holds every macOS virtual keycode
                            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                            let key_code = event
                                .get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE)
                                as u16;
                            let modifiers = modifiers_from_flags(event.get_flags());

                            let input = KeyInput {
                                key_code,
                                modifiers,
                            };
                            match callback(TapEvent::KeyDown(input)) {
                                TapDisposition::Consume => Some(consumed_copy(event)),
                                TapDisposition::Pass => None,
                            }
                        }
                        _ => None,
                    }
                },
            );

            let tap = match tap {
                Ok(tap) => tap,
                Err(()) => {
                    // Tap creation fails without Input Monitoring access.
                    let _ = ready_tx.send(Err(TapError::PermissionRequired));
                    return;
                }
            };

            let source = match tap.mach_port.create_runloop_source(0) {
                Ok(source) => source,
                Err(()) => {
                    let _ = ready_tx.send(Err(TapError::InstallFailed(
                        "failed to create run loop source for event tap".to_owned(),
                    )));
                    return;
                }
            };

            #[allow(unsafe_code)] // CFRunLoop source registration is an FFI call
            unsafe {
                use core_foundation::runloop::kCFRunLoopCommonModes;
                run_loop.add_source(&source, kCFRunLoopCommonModes);
            }

            tap.enable();
            info!("event tap installed");

            if ready_tx.send(Ok(run_loop)).is_err() {
                return;
            }

            // The OS disables taps whose callbacks stall. The listener asks
            // for a re-enable through the shared flag; honor it between run
            // loop slices.
            loop {
                if thread_shared.stop.load(Ordering::SeqCst) {
                    break;
                }
                if thread_shared.reenable.swap(false, Ordering::SeqCst) {
                    debug!("re-enabling event tap");
                    tap.enable();
                }
                CFRunLoop::run_in_mode(
                    #[allow(unsafe_code)] // Constant CFString from CoreFoundation
                    unsafe {
                        core_foundation::runloop::kCFRunLoopDefaultMode
                    },
                    TAP_POLL_INTERVAL,
                    false,
                );
            }

            info!("event tap removed");
        });

        let run_loop = ready_rx
            .recv_timeout(Duration::from_secs(2))
            .map_err(|_| {
                TapError::InstallFailed("tap thread did not report readiness".to_owned())
            })??;

        Ok(Box::new(MacosTapHandle { shared, run_loop }))
    }
}

/// Permission probes for the microphone and synthetic input
///
/// macOS offers no query API for these outside of AVFoundation and the
/// accessibility framework, so each probe exercises the capability itself:
/// creating a HID-state event source fails without input permission, and the
/// default input device is only usable once microphone access is granted.
pub struct MacosPermissions;

impl MacosPermissions {
    fn probe_injection() -> PermissionState {
        match CGEventSource::new(CGEventSourceStateID::HIDSystemState) {
            Ok(source) => match CGEvent::new_keyboard_event(source, 0, true) {
                Ok(_) => PermissionState::Authorized,
                Err(()) => PermissionState::Denied,
            },
            Err(()) => PermissionState::Denied,
        }
    }

    fn probe_audio() -> PermissionState {
        use cpal::traits::{DeviceTrait, HostTrait};

        let host = cpal::default_host();
        let Some(device) = host.default_input_device() else {
            return PermissionState::NotDetermined;
        };
        match device.default_input_config() {
            Ok(_) => PermissionState::Authorized,
            Err(e) => {
                debug!("input device config probe failed: {e}");
                PermissionState::Denied
            }
        }
    }

    fn settings_url(domain: PermissionDomain) -> &'static str {
        match domain {
            PermissionDomain::AudioCapture => {
                "x-apple.systempreferences:com.apple.preference.security?Privacy_Microphone"
            }
            PermissionDomain::InputInjection => {
                "x-apple.systempreferences:com.apple.preference.security?Privacy_ListenEvent"
            }
        }
    }
}

impl PermissionSurface for MacosPermissions {
    fn status(&self, domain: PermissionDomain) -> PermissionState {
        match domain {
            PermissionDomain::AudioCapture => Self::probe_audio(),
            PermissionDomain::InputInjection => Self::probe_injection(),
        }
    }

    fn request_access(&self, domain: PermissionDomain) -> bool {
        // Probing the capability is what makes the OS show its consent
        // prompt the first time, so a request is a fresh probe.
        self.status(domain) == PermissionState::Authorized
    }

    fn open_settings_pane(&self, domain: PermissionDomain) {
        let url = Self::settings_url(domain);
        match std::process::Command::new("open").arg(url).spawn() {
            Ok(_) => info!(domain = ?domain, "opened system settings pane"),
            Err(e) => warn!("failed to open system settings: {e}"),
        }
    }
}

/// Synthesizes a command-V chord through the HID event system
pub struct MacosKeystrokes;

impl KeystrokeSurface for MacosKeystrokes {
    fn synthesize_paste(&self) -> Result<(), KeystrokeError> {
        let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState)
            .map_err(|()| KeystrokeError::SourceCreation)?;

        let key_down = CGEvent::new_keyboard_event(source.clone(), KEY_V, true)
            .map_err(|()| KeystrokeError::EventCreation("paste key down".to_owned()))?;
        key_down.set_flags(CGEventFlags::CGEventFlagCommand);

        let key_up = CGEvent::new_keyboard_event(source, KEY_V, false)
            .map_err(|()| KeystrokeError::EventCreation("paste key up".to_owned()))?;
        key_up.set_flags(CGEventFlags::CGEventFlagCommand);

        // post() reports nothing; a silent failure here surfaces as the user
        // noticing no text appeared.
        key_down.post(CGEventTapLocation::HID);
        // Back-to-back down/up can be dropped by some apps; pace them like a
        // real key press.
        std::thread::sleep(KEY_EVENT_GAP);
        key_up.post(CGEventTapLocation::HID);

        debug!("paste chord posted");
        Ok(())
    }
}

/// General pasteboard access through AppKit
pub struct MacosClipboard;

#[allow(unsafe_code)] // AppKit calls are inherently unsafe FFI
impl ClipboardSurface for MacosClipboard {
    fn snapshot(&self) -> Result<ClipboardSnapshot> {
        use objc2_app_kit::NSPasteboard;

        let pasteboard = unsafe { NSPasteboard::generalPasteboard() };
        let mut items = Vec::new();

        if let Some(pb_items) = unsafe { pasteboard.pasteboardItems() } {
            for item in &pb_items {
                let types = unsafe { item.types() };
                for pb_type in &types {
                    if let Some(data) = unsafe { item.dataForType(&pb_type) } {
                        items.push((pb_type.to_string(), data.to_vec()));
                    }
                }
            }
        }

        Ok(ClipboardSnapshot { items })
    }

    fn write_text(&self, text: &str) -> Result<()> {
        use objc2_app_kit::{NSPasteboard, NSPasteboardTypeString};
        use objc2_foundation::NSString;

        let pasteboard = unsafe { NSPasteboard::generalPasteboard() };
        unsafe { pasteboard.clearContents() };

        let value = NSString::from_str(text);
        let written = unsafe { pasteboard.setString_forType(&value, NSPasteboardTypeString) };
        if !written {
            anyhow::bail!("pasteboard rejected the text write");
        }
        Ok(())
    }

    fn restore(&self, snapshot: &ClipboardSnapshot) -> Result<()> {
        use objc2::runtime::ProtocolObject;
        use objc2_app_kit::{NSPasteboard, NSPasteboardItem};
        use objc2_foundation::{NSArray, NSData, NSString};

        let pasteboard = unsafe { NSPasteboard::generalPasteboard() };
        unsafe { pasteboard.clearContents() };

        if snapshot.items.is_empty() {
            return Ok(());
        }

        let item = unsafe { NSPasteboardItem::new() };
        for (pb_type, data) in &snapshot.items {
            let ns_type = NSString::from_str(pb_type);
            let ns_data = NSData::with_bytes(data);
            let accepted = unsafe { item.setData_forType(&ns_data, &ns_type) };
            if !accepted {
                warn!(pb_type = %pb_type, "pasteboard item rejected a representation");
            }
        }

        let objects = NSArray::from_retained_slice(&[ProtocolObject::from_retained(item)]);
        let written = unsafe { pasteboard.writeObjects(&objects) };
        if !written {
            anyhow::bail!("pasteboard rejected the restore write");
        }
        Ok(())
    }
}

/// Notifies the foreground signal whenever an application is activated
///
/// Runs its own run loop thread; the observer stays registered for the
/// process lifetime.
#[allow(unsafe_code)] // AppKit notification registration is FFI
pub fn spawn_activation_observer(signal: ForegroundSignal) {
    use block2::RcBlock;
    use objc2_app_kit::{NSWorkspace, NSWorkspaceDidActivateApplicationNotification};
    use objc2_foundation::NSNotification;

    std::thread::spawn(move || {
        let workspace = unsafe { NSWorkspace::sharedWorkspace() };
        let center = unsafe { workspace.notificationCenter() };

        let block = RcBlock::new(move |_notification: std::ptr::NonNull<NSNotification>| {
            signal.notify();
        });

        let observer = unsafe {
            center.addObserverForName_object_queue_usingBlock(
                Some(NSWorkspaceDidActivateApplicationNotification),
                None,
                None,
                &block,
            )
        };
        // Keep the observer token alive for as long as the run loop runs.
        let _observer = observer;

        info!("application activation observer registered");
        CFRunLoop::run_current();
    });
}
