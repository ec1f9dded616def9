use rdev::{Event, EventType, Key};
use std::sync::mpsc::Sender;
use std::sync::Mutex;
use std::thread;
use tracing::{debug, error};

use crate::config::Activation;
use crate::input::chord::{CanonicalKey, ChordEvent, ChordMatcher, HotkeySpec};
use crate::session::SessionCommand;

/// Map an rdev key to its canonical identity. Keys with no chord meaning
/// map to `None` and are ignored.
fn canonical_key(key: Key) -> Option<CanonicalKey> {
    let canonical = match key {
        Key::ControlLeft | Key::ControlRight => CanonicalKey::Control,
        Key::ShiftLeft | Key::ShiftRight => CanonicalKey::Shift,
        Key::Alt | Key::AltGr => CanonicalKey::Alt,
        Key::MetaLeft | Key::MetaRight => CanonicalKey::Super,
        Key::Space => CanonicalKey::Space,
        Key::Return => CanonicalKey::Enter,
        Key::Tab => CanonicalKey::Tab,
        Key::Backspace => CanonicalKey::Backspace,
        Key::Escape => CanonicalKey::Escape,
        Key::F1 => CanonicalKey::Function(1),
        Key::F2 => CanonicalKey::Function(2),
        Key::F3 => CanonicalKey::Function(3),
        Key::F4 => CanonicalKey::Function(4),
        Key::F5 => CanonicalKey::Function(5),
        Key::F6 => CanonicalKey::Function(6),
        Key::F7 => CanonicalKey::Function(7),
        Key::F8 => CanonicalKey::Function(8),
        Key::F9 => CanonicalKey::Function(9),
        Key::F10 => CanonicalKey::Function(10),
        Key::F11 => CanonicalKey::Function(11),
        Key::F12 => CanonicalKey::Function(12),
        Key::KeyA => CanonicalKey::Char('a'),
        Key::KeyB => CanonicalKey::Char('b'),
        Key::KeyC => CanonicalKey::Char('c'),
        Key::KeyD => CanonicalKey::Char('d'),
        Key::KeyE => CanonicalKey::Char('e'),
        Key::KeyF => CanonicalKey::Char('f'),
        Key::KeyG => CanonicalKey::Char('g'),
        Key::KeyH => CanonicalKey::Char('h'),
        Key::KeyI => CanonicalKey::Char('i'),
        Key::KeyJ => CanonicalKey::Char('j'),
        Key::KeyK => CanonicalKey::Char('k'),
        Key::KeyL => CanonicalKey::Char('l'),
        Key::KeyM => CanonicalKey::Char('m'),
        Key::KeyN => CanonicalKey::Char('n'),
        Key::KeyO => CanonicalKey::Char('o'),
        Key::KeyP => CanonicalKey::Char('p'),
        Key::KeyQ => CanonicalKey::Char('q'),
        Key::KeyR => CanonicalKey::Char('r'),
        Key::KeyS => CanonicalKey::Char('s'),
        Key::KeyT => CanonicalKey::Char('t'),
        Key::KeyU => CanonicalKey::Char('u'),
        Key::KeyV => CanonicalKey::Char('v'),
        Key::KeyW => CanonicalKey::Char('w'),
        Key::KeyX => CanonicalKey::Char('x'),
        Key::KeyY => CanonicalKey::Char('y'),
        Key::KeyZ => CanonicalKey::Char('z'),
        Key::Num0 => CanonicalKey::Char('0'),
        Key::Num1 => CanonicalKey::Char('1'),
        Key::Num2 => CanonicalKey::Char('2'),
        Key::Num3 => CanonicalKey::Char('3'),
        Key::Num4 => CanonicalKey::Char('4'),
        Key::Num5 => CanonicalKey::Char('5'),
        Key::Num6 => CanonicalKey::Char('6'),
        Key::Num7 => CanonicalKey::Char('7'),
        Key::Num8 => CanonicalKey::Char('8'),
        Key::Num9 => CanonicalKey::Char('9'),
        _ => return None,
    };
    Some(canonical)
}

/// Translate a chord event through the configured activation policy.
///
/// Hold and toggle are two policies over the same matcher contract, not two
/// matchers.
fn command_for(activation: Activation, event: ChordEvent) -> Option<SessionCommand> {
    match (activation, event) {
        (Activation::Hold, ChordEvent::Satisfied) => Some(SessionCommand::Start),
        (Activation::Hold, ChordEvent::Released) => Some(SessionCommand::Stop),
        (Activation::Toggle, ChordEvent::Satisfied) => Some(SessionCommand::Toggle),
        (Activation::Toggle, ChordEvent::Released) => None,
    }
}

/// Start the global key listener thread.
///
/// Raw press/release events are canonicalized, fed through the chord
/// matcher, and the resulting commands are sent to the main loop. The
/// thread lives for the process lifetime; `rdev::listen` does not return
/// under normal operation.
pub fn spawn(
    spec: HotkeySpec,
    activation: Activation,
    commands: Sender<SessionCommand>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let matcher = Mutex::new(ChordMatcher::new(spec));

        let callback = move |event: Event| {
            let key = match event.event_type {
                EventType::KeyPress(key) | EventType::KeyRelease(key) => key,
                _ => return,
            };
            let Some(canonical) = canonical_key(key) else {
                return;
            };

            let chord_event = {
                let Ok(mut matcher) = matcher.lock() else {
                    return;
                };
                match event.event_type {
                    EventType::KeyPress(_) => matcher.on_key_down(canonical),
                    EventType::KeyRelease(_) => matcher.on_key_up(canonical),
                    _ => None,
                }
            };

            if let Some(chord_event) = chord_event {
                debug!(?chord_event, "chord edge");
                if let Some(command) = command_for(activation, chord_event) {
                    if commands.send(command).is_err() {
                        debug!("command receiver dropped, ignoring chord event");
                    }
                }
            }
        };

        if let Err(e) = rdev::listen(callback) {
            error!("key listener failed: {:?}", e);
        }
    })
}
