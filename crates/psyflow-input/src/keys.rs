//! Key table - symbolic key names to key codes

use std::fmt;

use serde::{Deserialize, Serialize};

/// Platform key code as delivered with key events
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyCode(pub u32);

impl KeyCode {
    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Canonical name, if the code is in the table
    pub fn name(self) -> Option<&'static str> {
        key_name(self)
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for KeyCode {
    fn from(code: u32) -> Self {
        KeyCode(code)
    }
}

// Canonical names come first so reverse lookup finds them
const KEY_TABLE: &[(&str, u32)] = &[
    ("backspace", 8),
    ("tab", 9),
    ("enter", 13),
    ("shift", 16),
    ("ctrl", 17),
    ("alt", 18),
    ("pause", 19),
    ("capslock", 20),
    ("esc", 27),
    ("space", 32),
    ("spacebar", 32),
    (" ", 32),
    ("pageup", 33),
    ("pagedown", 34),
    ("end", 35),
    ("home", 36),
    ("leftarrow", 37),
    ("uparrow", 38),
    ("rightarrow", 39),
    ("downarrow", 40),
    ("insert", 45),
    ("delete", 46),
    ("0", 48),
    ("1", 49),
    ("2", 50),
    ("3", 51),
    ("4", 52),
    ("5", 53),
    ("6", 54),
    ("7", 55),
    ("8", 56),
    ("9", 57),
    ("a", 65),
    ("b", 66),
    ("c", 67),
    ("d", 68),
    ("e", 69),
    ("f", 70),
    ("g", 71),
    ("h", 72),
    ("i", 73),
    ("j", 74),
    ("k", 75),
    ("l", 76),
    ("m", 77),
    ("n", 78),
    ("o", 79),
    ("p", 80),
    ("q", 81),
    ("r", 82),
    ("s", 83),
    ("t", 84),
    ("u", 85),
    ("v", 86),
    ("w", 87),
    ("x", 88),
    ("y", 89),
    ("z", 90),
    ("A", 65),
    ("B", 66),
    ("C", 67),
    ("D", 68),
    ("E", 69),
    ("F", 70),
    ("G", 71),
    ("H", 72),
    ("I", 73),
    ("J", 74),
    ("K", 75),
    ("L", 76),
    ("M", 77),
    ("N", 78),
    ("O", 79),
    ("P", 80),
    ("Q", 81),
    ("R", 82),
    ("S", 83),
    ("T", 84),
    ("U", 85),
    ("V", 86),
    ("W", 87),
    ("X", 88),
    ("Y", 89),
    ("Z", 90),
    ("0numpad", 96),
    ("1numpad", 97),
    ("2numpad", 98),
    ("3numpad", 99),
    ("4numpad", 100),
    ("5numpad", 101),
    ("6numpad", 102),
    ("7numpad", 103),
    ("8numpad", 104),
    ("9numpad", 105),
    ("multiply", 106),
    ("plus", 107),
    ("minus", 109),
    ("decimal", 110),
    ("divide", 111),
    ("F1", 112),
    ("F2", 113),
    ("F3", 114),
    ("F4", 115),
    ("F5", 116),
    ("F6", 117),
    ("F7", 118),
    ("F8", 119),
    ("F9", 120),
    ("F10", 121),
    ("F11", 122),
    ("F12", 123),
    ("=", 187),
    (",", 188),
    (".", 190),
    ("/", 191),
    ("`", 192),
    ("[", 219),
    ("\\", 220),
    ("]", 221),
];

/// Look up a symbolic key name. Names are case-sensitive except that
/// letters exist in both cases.
pub fn key_code(name: &str) -> Option<KeyCode> {
    KEY_TABLE
        .iter()
        .find(|(key, _)| *key == name)
        .map(|&(_, code)| KeyCode(code))
}

/// First name registered for `code`
pub fn key_name(code: KeyCode) -> Option<&'static str> {
    KEY_TABLE
        .iter()
        .find(|&&(_, c)| c == code.0)
        .map(|&(name, _)| name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letters_in_both_cases() {
        assert_eq!(key_code("a"), Some(KeyCode(65)));
        assert_eq!(key_code("A"), Some(KeyCode(65)));
        assert_eq!(key_code("z"), key_code("Z"));
    }

    #[test]
    fn test_named_keys() {
        assert_eq!(key_code("space"), Some(KeyCode(32)));
        assert_eq!(key_code(" "), Some(KeyCode(32)));
        assert_eq!(key_code("leftarrow"), Some(KeyCode(37)));
        assert_eq!(key_code("F12"), Some(KeyCode(123)));
        assert_eq!(key_code("5numpad"), Some(KeyCode(101)));
        assert_eq!(key_code("\\"), Some(KeyCode(220)));
        assert_eq!(key_code("nope"), None);
    }

    #[test]
    fn test_reverse_lookup_is_canonical() {
        assert_eq!(KeyCode(32).name(), Some("space"));
        assert_eq!(KeyCode(70).name(), Some("f"));
        assert_eq!(KeyCode(999).name(), None);
    }
}
