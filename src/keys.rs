//! Hotkey strings like `ctrl+alt+t` parsed into a layout-independent key model.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use tracing::{debug, warn};

/// Set of modifier keys. Left/right variants are not distinguished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Modifiers(u8);

impl Modifiers {
    pub const CTRL: Modifiers = Modifiers(0b0001);
    pub const ALT: Modifiers = Modifiers(0b0010);
    pub const SHIFT: Modifiers = Modifiers(0b0100);
    pub const META: Modifiers = Modifiers(0b1000);

    pub fn contains(self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Modifiers {
    type Output = Modifiers;

    fn bitor(self, rhs: Modifiers) -> Modifiers {
        Modifiers(self.0 | rhs.0)
    }
}

impl BitOrAssign for Modifiers {
    fn bitor_assign(&mut self, rhs: Modifiers) {
        self.0 |= rhs.0;
    }
}

/// A key identified by its physical position, independent of keyboard layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalKey {
    /// Letter `A`..`Z`, stored as the uppercase ASCII byte.
    Letter(u8),
    /// Top-row digit `0`..`9`.
    Digit(u8),
    /// Function key `F1`..`F12`.
    F(u8),
    Space,
    Enter,
    Tab,
    Escape,
}

impl PhysicalKey {
    fn from_name(name: &str) -> Option<PhysicalKey> {
        let bytes = name.as_bytes();
        match name {
            "space" => return Some(PhysicalKey::Space),
            "enter" | "return" => return Some(PhysicalKey::Enter),
            "tab" => return Some(PhysicalKey::Tab),
            "escape" | "esc" => return Some(PhysicalKey::Escape),
            _ => {}
        }
        if bytes.len() == 1 {
            let b = bytes[0];
            if b.is_ascii_lowercase() {
                return Some(PhysicalKey::Letter(b.to_ascii_uppercase()));
            }
            if b.is_ascii_digit() {
                return Some(PhysicalKey::Digit(b - b'0'));
            }
            return None;
        }
        let n: u8 = name.strip_prefix('f')?.parse().ok()?;
        (1..=12).contains(&n).then_some(PhysicalKey::F(n))
    }
}

impl fmt::Display for PhysicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhysicalKey::Letter(c) => write!(f, "{}", *c as char),
            PhysicalKey::Digit(d) => write!(f, "{}", d),
            PhysicalKey::F(n) => write!(f, "F{}", n),
            PhysicalKey::Space => f.write_str("Space"),
            PhysicalKey::Enter => f.write_str("Enter"),
            PhysicalKey::Tab => f.write_str("Tab"),
            PhysicalKey::Escape => f.write_str("Esc"),
        }
    }
}

/// Parsed hotkey. `key == None` means no main key was found and the spec
/// must not be registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HotkeySpec {
    pub modifiers: Modifiers,
    pub key: Option<PhysicalKey>,
}

impl HotkeySpec {
    pub fn is_valid(&self) -> bool {
        self.key.is_some()
    }
}

impl fmt::Display for HotkeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Modifiers::CTRL, "Ctrl"),
            (Modifiers::ALT, "Alt"),
            (Modifiers::SHIFT, "Shift"),
            (Modifiers::META, "Win"),
        ];
        for (m, name) in names {
            if self.modifiers.contains(m) {
                write!(f, "{}+", name)?;
            }
        }
        match self.key {
            Some(key) => write!(f, "{}", key),
            None => f.write_str("?"),
        }
    }
}

enum Token {
    Modifier(Modifiers),
    Key(PhysicalKey),
}

fn modifier_from_name(name: &str) -> Option<Modifiers> {
    let base = name
        .strip_prefix("left ")
        .or_else(|| name.strip_prefix("right "))
        .unwrap_or(name);
    match base {
        "ctrl" | "control" => Some(Modifiers::CTRL),
        "alt" => Some(Modifiers::ALT),
        "shift" => Some(Modifiers::SHIFT),
        "win" | "windows" => Some(Modifiers::META),
        _ => None,
    }
}

/// Set-1 scan codes written by the old hotkey recorder.
fn from_scan_code(sc: u32) -> Option<Token> {
    use PhysicalKey::*;
    let key = match sc {
        29 | 285 => return Some(Token::Modifier(Modifiers::CTRL)),
        56 | 312 => return Some(Token::Modifier(Modifiers::ALT)),
        42 | 54 => return Some(Token::Modifier(Modifiers::SHIFT)),
        91 | 92 => return Some(Token::Modifier(Modifiers::META)),
        16..=25 => Letter(b"QWERTYUIOP"[(sc - 16) as usize]),
        30..=38 => Letter(b"ASDFGHJKL"[(sc - 30) as usize]),
        44..=50 => Letter(b"ZXCVBNM"[(sc - 44) as usize]),
        2..=10 => Digit((sc - 1) as u8),
        11 => Digit(0),
        57 => Space,
        28 => Enter,
        1 => Escape,
        15 => Tab,
        59..=68 => F((sc - 58) as u8),
        87 => F(11),
        88 => F(12),
        _ => return None,
    };
    Some(Token::Key(key))
}

fn scan_code(token: &str) -> Option<u32> {
    let digits = token.strip_prefix("sc")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn classify(token: &str) -> Option<Token> {
    if let Some(m) = modifier_from_name(token) {
        return Some(Token::Modifier(m));
    }
    if let Some(k) = PhysicalKey::from_name(token) {
        return Some(Token::Key(k));
    }
    if let Some(sc) = scan_code(token) {
        let parsed = from_scan_code(sc);
        if parsed.is_none() {
            warn!("Unknown scan code in hotkey: {:?} (sc={})", token, sc);
        }
        return parsed;
    }
    warn!("Unknown key part in hotkey: {:?}", token);
    None
}

/// Parse a hotkey string. Modifiers accumulate; the last key token wins.
/// Unknown tokens are skipped with a warning.
pub fn parse(s: &str) -> HotkeySpec {
    let mut spec = HotkeySpec::default();
    for token in s.split('+').map(|t| t.trim().to_lowercase()) {
        if token.is_empty() {
            continue;
        }
        match classify(&token) {
            Some(Token::Modifier(m)) => spec.modifiers |= m,
            Some(Token::Key(k)) => spec.key = Some(k),
            None => {}
        }
    }
    debug!("Parsed hotkey {:?} -> {}", s, spec);
    spec
}
