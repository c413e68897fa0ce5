//! Optional system-wide push-to-talk key.
//!
//! Uses `rdev` to capture keyboard and mouse events outside the front-end
//! window. Presses and releases are sent as `InputEvent::Hotkey` to the
//! same channel the IPC commands feed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use rdev::{listen, Button, Event, EventType, Key};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::InputEvent;

/// Parsed target: either a keyboard key or a mouse button.
#[derive(Debug, Clone, Copy, PartialEq)]
enum HotkeyTarget {
    Keyboard(Key),
    MouseButton(Button),
}

impl HotkeyTarget {
    /// Map an rdev event to pressed/released if it concerns this target.
    fn edge(&self, event: &EventType) -> Option<bool> {
        match (self, event) {
            (Self::Keyboard(target), EventType::KeyPress(key)) if key == target => Some(true),
            (Self::Keyboard(target), EventType::KeyRelease(key)) if key == target => Some(false),
            (Self::MouseButton(target), EventType::ButtonPress(b)) if b == target => Some(true),
            (Self::MouseButton(target), EventType::ButtonRelease(b)) if b == target => Some(false),
            _ => None,
        }
    }
}

/// Global push-to-talk listener.
pub struct HotkeyListener {
    key_name: String,
    running: Arc<AtomicBool>,
}

impl HotkeyListener {
    pub fn new(key_name: impl Into<String>) -> Self {
        Self {
            key_name: key_name.into(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start listening on a background thread. Returns false if the key
    /// name is not recognized.
    pub fn start(&self, tx: mpsc::Sender<InputEvent>) -> bool {
        let Some(target) = parse_key(&self.key_name) else {
            warn!(key = %self.key_name, "Unknown hotkey, global push-to-talk disabled");
            return false;
        };
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        info!(key = %self.key_name, "Starting hotkey listener");

        // Key repeat delivers a stream of presses; only edges are forwarded.
        let pressed = AtomicBool::new(false);

        thread::spawn(move || {
            let callback = move |event: Event| {
                if !running.load(Ordering::SeqCst) {
                    return;
                }
                let Some(down) = target.edge(&event.event_type) else {
                    return;
                };
                if pressed.swap(down, Ordering::SeqCst) != down {
                    let _ = tx.blocking_send(InputEvent::Hotkey { pressed: down });
                }
            };

            if let Err(e) = listen(callback) {
                warn!("Hotkey listener error: {:?}", e);
            }
        });
        true
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Parse a key name from config into an rdev target.
fn parse_key(name: &str) -> Option<HotkeyTarget> {
    let name = name.trim().to_lowercase();

    let button = match name.as_str() {
        "mousebutton3" | "mouse3" | "middleclick" => Some(Button::Middle),
        "mousebutton4" | "mouse4" | "xbutton1" => Some(Button::Unknown(4)),
        "mousebutton5" | "mouse5" | "xbutton2" => Some(Button::Unknown(5)),
        _ => None,
    };
    if let Some(button) = button {
        return Some(HotkeyTarget::MouseButton(button));
    }

    let key = match name.as_str() {
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        "space" => Key::Space,
        "capslock" => Key::CapsLock,
        "scrolllock" => Key::ScrollLock,
        "pause" => Key::Pause,
        "insert" => Key::Insert,
        "\\" | "backslash" => Key::BackSlash,
        "r" => Key::KeyR,
        "t" => Key::KeyT,
        "v" => Key::KeyV,
        _ => return None,
    };
    Some(HotkeyTarget::Keyboard(key))
}
