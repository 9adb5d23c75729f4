//! Key tokens
//!
//! Free-form key names ("esc", "PgDn", "return", "F5") normalize to one
//! canonical [`KeyToken`]. Normalization is total: names outside the table
//! pass through as [`KeyToken::Raw`] and only fail when actually sent.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Highest function key accepted by name.
pub const MAX_FUNCTION_KEY: u8 = 12;

/// Canonical key identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyToken {
    Enter,
    Escape,
    Tab,
    Space,
    Backspace,
    Delete,
    Insert,
    Home,
    End,
    PageUp,
    PageDown,
    Up,
    Down,
    Left,
    Right,
    /// Function key F1..=F12.
    F(u8),
    Ctrl,
    Alt,
    Shift,
    Super,
    /// A single printable character.
    Char(char),
    /// Unrecognized name, kept lowercased.
    Raw(String),
}

static ALIASES: Lazy<HashMap<&'static str, KeyToken>> = Lazy::new(|| {
    use KeyToken::*;
    let mut m = HashMap::new();
    for (names, token) in [
        (&["enter", "return", "ret", "cr"][..], Enter),
        (&["escape", "esc"][..], Escape),
        (&["tab"][..], Tab),
        (&["space", "spacebar"][..], Space),
        (&["backspace", "bksp", "bs"][..], Backspace),
        (&["delete", "del"][..], Delete),
        (&["insert", "ins"][..], Insert),
        (&["home"][..], Home),
        (&["end"][..], End),
        (&["page_up", "pageup", "pgup", "page-up"][..], PageUp),
        (&["page_down", "pagedown", "pgdn", "page-down"][..], PageDown),
        (&["up", "arrow_up", "uparrow"][..], Up),
        (&["down", "arrow_down", "downarrow"][..], Down),
        (&["left", "arrow_left", "leftarrow"][..], Left),
        (&["right", "arrow_right", "rightarrow"][..], Right),
        (&["ctrl", "control", "ctl"][..], Ctrl),
        (&["alt", "option", "opt"][..], Alt),
        (&["shift"][..], Shift),
        (&["super", "win", "windows", "meta", "cmd", "command"][..], Super),
    ] {
        for name in names {
            m.insert(*name, token.clone());
        }
    }
    m
});

impl KeyToken {
    /// Normalize a free-form key name.
    ///
    /// A single character is kept as-is (case preserved) so `"A"` and `"a"`
    /// stay distinct; everything else is matched case-insensitively.
    pub fn normalize(input: &str) -> KeyToken {
        let input = if input.chars().count() == 1 {
            input
        } else {
            input.trim()
        };
        let mut chars = input.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return match c {
                ' ' => KeyToken::Space,
                '\n' | '\r' => KeyToken::Enter,
                '\t' => KeyToken::Tab,
                c => KeyToken::Char(c),
            };
        }

        let lowered = input.to_lowercase();
        if let Some(token) = ALIASES.get(lowered.as_str()) {
            return token.clone();
        }
        if let Some(n) = lowered.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
            if (1..=MAX_FUNCTION_KEY).contains(&n) && !lowered[1..].starts_with('0') {
                return KeyToken::F(n);
            }
        }
        KeyToken::Raw(lowered)
    }

    /// Token for one character of typed text.
    pub fn for_char(c: char) -> Result<KeyToken> {
        match c {
            '\n' | '\r' => Ok(KeyToken::Enter),
            '\t' => Ok(KeyToken::Tab),
            ' ' => Ok(KeyToken::Space),
            c if c.is_control() => Err(Error::UnsupportedCharacter(c)),
            c => Ok(KeyToken::Char(c)),
        }
    }

    /// Canonical name; `normalize(t.name()) == t` for every token `normalize` produces.
    pub fn name(&self) -> String {
        match self {
            KeyToken::F(n) => format!("f{}", n),
            KeyToken::Char(c) => c.to_string(),
            KeyToken::Raw(s) => s.clone(),
            named => named.static_name().to_string(),
        }
    }

    fn static_name(&self) -> &'static str {
        match self {
            KeyToken::Enter => "enter",
            KeyToken::Escape => "escape",
            KeyToken::Tab => "tab",
            KeyToken::Space => "space",
            KeyToken::Backspace => "backspace",
            KeyToken::Delete => "delete",
            KeyToken::Insert => "insert",
            KeyToken::Home => "home",
            KeyToken::End => "end",
            KeyToken::PageUp => "page_up",
            KeyToken::PageDown => "page_down",
            KeyToken::Up => "up",
            KeyToken::Down => "down",
            KeyToken::Left => "left",
            KeyToken::Right => "right",
            KeyToken::Ctrl => "ctrl",
            KeyToken::Alt => "alt",
            KeyToken::Shift => "shift",
            KeyToken::Super => "super",
            KeyToken::F(_) | KeyToken::Char(_) | KeyToken::Raw(_) => "",
        }
    }

    pub fn is_modifier(&self) -> bool {
        matches!(
            self,
            KeyToken::Ctrl | KeyToken::Alt | KeyToken::Shift | KeyToken::Super
        )
    }

    /// X11 keysym used by RFB key events. `None` for pass-through names.
    pub fn keysym(&self) -> Option<u32> {
        let sym = match self {
            KeyToken::Enter => 0xff0d,
            KeyToken::Escape => 0xff1b,
            KeyToken::Tab => 0xff09,
            KeyToken::Space => 0x0020,
            KeyToken::Backspace => 0xff08,
            KeyToken::Delete => 0xffff,
            KeyToken::Insert => 0xff63,
            KeyToken::Home => 0xff50,
            KeyToken::End => 0xff57,
            KeyToken::PageUp => 0xff55,
            KeyToken::PageDown => 0xff56,
            KeyToken::Left => 0xff51,
            KeyToken::Up => 0xff52,
            KeyToken::Right => 0xff53,
            KeyToken::Down => 0xff54,
            KeyToken::F(n) if (1..=MAX_FUNCTION_KEY).contains(n) => 0xffbe + u32::from(*n - 1),
            KeyToken::F(_) => return None,
            KeyToken::Ctrl => 0xffe3,
            KeyToken::Alt => 0xffe9,
            KeyToken::Shift => 0xffe1,
            KeyToken::Super => 0xffeb,
            KeyToken::Char(c) => {
                let code = *c as u32;
                match code {
                    0x20..=0x7e | 0xa0..=0xff => code,
                    _ if c.is_control() => return None,
                    _ => 0x0100_0000 | code,
                }
            }
            KeyToken::Raw(_) => return None,
        };
        Some(sym)
    }
}

impl fmt::Display for KeyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl From<&str> for KeyToken {
    fn from(s: &str) -> Self {
        KeyToken::normalize(s)
    }
}

impl Serialize for KeyToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for KeyToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(KeyToken::normalize(&s))
    }
}

/// Split a shortcut such as `"ctrl+alt+del"` into tokens, in press order.
///
/// A trailing `"++"` names the plus key itself (`"ctrl++"`).
pub fn parse_combo(combo: &str) -> Result<Vec<KeyToken>> {
    let combo = combo.trim();
    if combo.is_empty() {
        return Err(Error::invalid("empty key combination"));
    }
    if combo == "+" {
        return Ok(vec![KeyToken::Char('+')]);
    }

    let (head, plus_key) = match combo.strip_suffix("++") {
        Some(head) => (head, true),
        None => (combo, false),
    };

    let mut tokens = Vec::new();
    for part in head.split('+') {
        let part = part.trim();
        if part.is_empty() {
            return Err(Error::invalid(format!("malformed key combination: {}", combo)));
        }
        tokens.push(KeyToken::normalize(part));
    }
    if plus_key {
        tokens.push(KeyToken::Char('+'));
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_collapse() {
        assert_eq!(KeyToken::normalize("esc"), KeyToken::Escape);
        assert_eq!(KeyToken::normalize("Escape"), KeyToken::Escape);
        assert_eq!(KeyToken::normalize("return"), KeyToken::Enter);
        assert_eq!(KeyToken::normalize("PageDown"), KeyToken::PageDown);
        assert_eq!(KeyToken::normalize("pgup"), KeyToken::PageUp);
        assert_eq!(KeyToken::normalize("F10"), KeyToken::F(10));
        assert_eq!(KeyToken::normalize("win"), KeyToken::Super);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "enter", "esc", "tab", " ", "backspace", "del", "ins", "home", "end", "pageup",
            "pagedown", "up", "down", "left", "right", "f1", "f12", "ctrl", "alt", "shift",
            "cmd", "a", "Z", "7", "é", "+", " q ", "f13", "f01", "volume_up", "",
        ];
        for input in inputs {
            let token = KeyToken::normalize(input);
            assert_eq!(
                KeyToken::normalize(&token.name()),
                token,
                "not idempotent for {:?}",
                input
            );
        }
    }

    #[test]
    fn test_single_characters_keep_case() {
        assert_eq!(KeyToken::normalize("A"), KeyToken::Char('A'));
        assert_eq!(KeyToken::normalize("a"), KeyToken::Char('a'));
        assert_eq!(KeyToken::normalize("F"), KeyToken::Char('F'));
    }

    #[test]
    fn test_unknown_names_pass_through() {
        assert_eq!(
            KeyToken::normalize("Volume_Up"),
            KeyToken::Raw("volume_up".to_string())
        );
        assert_eq!(KeyToken::normalize("f13"), KeyToken::Raw("f13".to_string()));
        assert_eq!(KeyToken::normalize("Raw").keysym(), None);
    }

    #[test]
    fn test_for_char() {
        assert_eq!(KeyToken::for_char('\n').unwrap(), KeyToken::Enter);
        assert_eq!(KeyToken::for_char(' ').unwrap(), KeyToken::Space);
        assert_eq!(KeyToken::for_char('x').unwrap(), KeyToken::Char('x'));
        assert!(matches!(
            KeyToken::for_char('\u{1b}'),
            Err(Error::UnsupportedCharacter('\u{1b}'))
        ));
    }

    #[test]
    fn test_keysyms() {
        assert_eq!(KeyToken::Enter.keysym(), Some(0xff0d));
        assert_eq!(KeyToken::F(1).keysym(), Some(0xffbe));
        assert_eq!(KeyToken::F(12).keysym(), Some(0xffc9));
        assert_eq!(KeyToken::Char('a').keysym(), Some(0x61));
        assert_eq!(KeyToken::Char('é').keysym(), Some(0xe9));
        assert_eq!(KeyToken::Char('€').keysym(), Some(0x0100_20ac));
    }

    #[test]
    fn test_parse_combo() {
        assert_eq!(
            parse_combo("ctrl+alt+del").unwrap(),
            vec![KeyToken::Ctrl, KeyToken::Alt, KeyToken::Delete]
        );
        assert_eq!(
            parse_combo("Ctrl + Shift + T").unwrap(),
            vec![KeyToken::Ctrl, KeyToken::Shift, KeyToken::Char('T')]
        );
        assert_eq!(
            parse_combo("ctrl++").unwrap(),
            vec![KeyToken::Ctrl, KeyToken::Char('+')]
        );
        assert_eq!(parse_combo("f2").unwrap(), vec![KeyToken::F(2)]);
        assert!(parse_combo("ctrl++alt").is_err());
        assert!(parse_combo("").is_err());
    }

    #[test]
    fn test_serde_uses_canonical_names() {
        let json = serde_json::to_string(&KeyToken::PageDown).unwrap();
        assert_eq!(json, "\"page_down\"");
        let token: KeyToken = serde_json::from_str("\"PgDn\"").unwrap();
        assert_eq!(token, KeyToken::PageDown);
    }
}
