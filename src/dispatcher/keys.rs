//! Key strokes and their text form (`ctrl+shift+a`, `escape`, `G`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        ctrl: false,
        alt: false,
        shift: false,
        meta: false,
    };

    pub fn ctrl() -> Self {
        Self {
            ctrl: true,
            ..Self::NONE
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }
}

/// One key plus modifier set, as delivered by the input surface.
///
/// Named keys are lowercase (`escape`, `enter`, `down`). Single characters
/// keep their case, so `g` and `G` are different strokes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyStroke {
    pub key: String,
    pub modifiers: Modifiers,
}

impl KeyStroke {
    pub fn plain(key: &str) -> Self {
        Self {
            key: normalize_key(key),
            modifiers: Modifiers::NONE,
        }
    }

    pub fn new(key: &str, modifiers: Modifiers) -> Self {
        Self {
            key: normalize_key(key),
            modifiers,
        }
    }

    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(invalid("empty key binding"));
        }

        // A trailing "+" names the plus key itself ("ctrl++").
        let (prefix, key) = if text == "+" {
            ("", "+")
        } else if let Some(head) = text.strip_suffix("++") {
            (head, "+")
        } else {
            match text.rsplit_once('+') {
                Some((head, key)) => (head, key),
                None => ("", text),
            }
        };
        if key.is_empty() {
            return Err(invalid(&format!("'{text}' has no key")));
        }

        let mut modifiers = Modifiers::NONE;
        for part in prefix.split('+').filter(|p| !p.is_empty()) {
            let flag = match part.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => &mut modifiers.ctrl,
                "alt" | "option" => &mut modifiers.alt,
                "shift" => &mut modifiers.shift,
                "meta" | "cmd" | "super" => &mut modifiers.meta,
                other => return Err(invalid(&format!("unknown modifier '{other}'"))),
            };
            if *flag {
                return Err(invalid(&format!("modifier '{part}' repeated in '{text}'")));
            }
            *flag = true;
        }

        Ok(Self::new(key, modifiers))
    }
}

fn invalid(detail: &str) -> ValidationError {
    ValidationError::InvalidKey {
        detail: detail.to_string(),
    }
}

fn normalize_key(key: &str) -> String {
    if key.chars().count() == 1 {
        return key.to_string();
    }
    let lower = key.to_ascii_lowercase();
    match lower.as_str() {
        "esc" => "escape".into(),
        "return" => "enter".into(),
        "arrowdown" => "down".into(),
        "arrowup" => "up".into(),
        "arrowleft" => "left".into(),
        "arrowright" => "right".into(),
        "spacebar" => "space".into(),
        _ => lower,
    }
}

impl fmt::Display for KeyStroke {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.modifiers;
        for (on, name) in [(m.ctrl, "ctrl"), (m.alt, "alt"), (m.shift, "shift"), (m.meta, "meta")] {
            if on {
                write!(f, "{name}+")?;
            }
        }
        f.write_str(&self.key)
    }
}

impl FromStr for KeyStroke {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for KeyStroke {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<KeyStroke> for String {
    fn from(stroke: KeyStroke) -> Self {
        stroke.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modifiers_in_any_order() {
        let a = KeyStroke::parse("shift+ctrl+a").unwrap();
        let b = KeyStroke::parse("Ctrl+Shift+a").unwrap();
        assert_eq!(a, b);
        assert!(a.modifiers.ctrl && a.modifiers.shift);
        assert_eq!(a.to_string(), "ctrl+shift+a");
    }

    #[test]
    fn named_keys_normalize() {
        assert_eq!(KeyStroke::parse("Esc").unwrap(), KeyStroke::plain("escape"));
        assert_eq!(KeyStroke::parse("ArrowDown").unwrap().key, "down");
        assert_eq!(KeyStroke::parse("G").unwrap().key, "G");
    }

    #[test]
    fn plus_key() {
        let plain = KeyStroke::parse("+").unwrap();
        assert_eq!(plain.key, "+");
        let ctrl = KeyStroke::parse("ctrl++").unwrap();
        assert_eq!(ctrl.key, "+");
        assert!(ctrl.modifiers.ctrl);
    }

    #[test]
    fn rejects_garbage() {
        assert!(KeyStroke::parse("").is_err());
        assert!(KeyStroke::parse("hyper+a").is_err());
        assert!(KeyStroke::parse("ctrl+ctrl+a").is_err());
        assert!(KeyStroke::parse("ctrl+").is_err());
    }

    #[test]
    fn serde_uses_text_form() {
        let stroke = KeyStroke::new("a", Modifiers::ctrl());
        assert_eq!(serde_json::to_string(&stroke).unwrap(), "\"ctrl+a\"");
        let back: KeyStroke = serde_json::from_str("\"ctrl+a\"").unwrap();
        assert_eq!(back, stroke);
    }
}
