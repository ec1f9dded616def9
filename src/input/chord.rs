use std::collections::BTreeSet;
use thiserror::Error;

/// Normalized key identity.
///
/// Left/right variants of a modifier collapse to one value, so a chord spec
/// of "ctrl" is satisfied by either physical control key. Character keys are
/// case-folded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CanonicalKey {
    Control,
    Shift,
    Alt,
    Super,
    Char(char),
    Function(u8),
    Space,
    Enter,
    Tab,
    Backspace,
    Escape,
}

impl CanonicalKey {
    /// Parse one chord-spec token ("ctrl", "f9", "d", ...).
    fn parse_token(token: &str) -> Option<Self> {
        let token = token.trim().to_lowercase();
        match token.as_str() {
            "ctrl" | "control" => return Some(Self::Control),
            "shift" => return Some(Self::Shift),
            "alt" | "option" => return Some(Self::Alt),
            "super" | "cmd" | "command" | "meta" | "win" => return Some(Self::Super),
            "space" => return Some(Self::Space),
            "enter" | "return" => return Some(Self::Enter),
            "tab" => return Some(Self::Tab),
            "backspace" => return Some(Self::Backspace),
            "esc" | "escape" => return Some(Self::Escape),
            _ => {}
        }

        if let Some(number) = token.strip_prefix('f') {
            if let Ok(n) = number.parse::<u8>() {
                if (1..=24).contains(&n) {
                    return Some(Self::Function(n));
                }
            }
        }

        let mut chars = token.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphanumeric() => {
                Some(Self::Char(c.to_ascii_lowercase()))
            }
            _ => None,
        }
    }
}

/// Errors from parsing a chord spec string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HotkeySpecError {
    /// Spec contained no recognizable key tokens
    #[error("hotkey spec contains no recognizable keys: {0:?}")]
    NoKeys(String),

    /// Spec contained a token that is not a known key
    #[error("unknown key in hotkey spec: {0:?}")]
    UnknownKey(String),
}

/// A parsed chord: the set of canonical keys that must be held together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotkeySpec {
    keys: BTreeSet<CanonicalKey>,
}

impl HotkeySpec {
    /// Parse a "+"-separated chord spec such as "ctrl+shift+d".
    ///
    /// # Errors
    /// Returns [`HotkeySpecError`] if the spec is empty or contains an
    /// unrecognized token. A broken chord must fail loudly at startup, not
    /// register as something else.
    pub fn parse(spec: &str) -> Result<Self, HotkeySpecError> {
        let mut keys = BTreeSet::new();

        for token in spec.split('+') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let key = CanonicalKey::parse_token(token)
                .ok_or_else(|| HotkeySpecError::UnknownKey(token.to_owned()))?;
            keys.insert(key);
        }

        if keys.is_empty() {
            return Err(HotkeySpecError::NoKeys(spec.to_owned()));
        }

        Ok(Self { keys })
    }

    /// Whether `held` covers every key of the chord.
    fn satisfied_by(&self, held: &BTreeSet<CanonicalKey>) -> bool {
        self.keys.is_subset(held)
    }

    /// Whether the key is part of the chord.
    fn contains(&self, key: CanonicalKey) -> bool {
        self.keys.contains(&key)
    }
}

/// Signal emitted by the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChordEvent {
    /// All chord keys became held (fires once per contiguous hold)
    Satisfied,
    /// A chord member was released while the chord was active (fires once)
    Released,
}

/// Tracks held keys and detects chord activation edges.
///
/// OS key-repeat delivers duplicate press events for held keys; the `active`
/// flag suppresses re-emission until the chord has actually been broken.
#[derive(Debug)]
pub struct ChordMatcher {
    spec: HotkeySpec,
    held: BTreeSet<CanonicalKey>,
    active: bool,
}

impl ChordMatcher {
    #[must_use]
    pub fn new(spec: HotkeySpec) -> Self {
        Self {
            spec,
            held: BTreeSet::new(),
            active: false,
        }
    }

    /// Record a key press; returns `Satisfied` on the activating edge.
    pub fn on_key_down(&mut self, key: CanonicalKey) -> Option<ChordEvent> {
        self.held.insert(key);

        if !self.active && self.spec.satisfied_by(&self.held) {
            self.active = true;
            return Some(ChordEvent::Satisfied);
        }
        None
    }

    /// Record a key release; returns `Released` when a chord member breaks
    /// an active chord.
    pub fn on_key_up(&mut self, key: CanonicalKey) -> Option<ChordEvent> {
        self.held.remove(&key);

        if self.active && self.spec.contains(key) {
            self.active = false;
            return Some(ChordEvent::Released);
        }
        None
    }

    /// Whether the chord is currently active.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }
}
