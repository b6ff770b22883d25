//! Human-readable shortcut text.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Modifiers: u8 {
        const CTRL  = 0b0001;
        const ALT   = 0b0010;
        const SHIFT = 0b0100;
        const SUPER = 0b1000;
    }
}

impl Modifiers {
    fn from_token(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "primary" | "control" | "ctrl" => Some(Self::CTRL),
            "alt" | "mod1" => Some(Self::ALT),
            "shift" => Some(Self::SHIFT),
            "super" => Some(Self::SUPER),
            _ => None,
        }
    }

    fn names(self) -> impl Iterator<Item = &'static str> {
        [
            (Self::CTRL, "Ctrl"),
            (Self::ALT, "Alt"),
            (Self::SHIFT, "Shift"),
            (Self::SUPER, "Super"),
        ]
        .into_iter()
        .filter(move |(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
    }
}

fn key_name(key: &str) -> String {
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => c.to_uppercase().collect(),
        _ => key.to_string(),
    }
}

fn join(modifiers: Modifiers, key: &str) -> String {
    let mut parts: Vec<String> = modifiers.names().map(String::from).collect();
    if !key.is_empty() {
        parts.push(key_name(key));
    }
    parts.join(" + ")
}

/// Formats an accelerator written as `<Primary><Shift>s`.
///
/// Unknown `<...>` tokens are dropped.
pub fn format_accelerator(accel: &str) -> String {
    let mut modifiers = Modifiers::empty();
    let mut rest = accel.trim();
    while let Some(open) = rest.strip_prefix('<') {
        let Some(close) = open.find('>') else { break };
        if let Some(flag) = Modifiers::from_token(&open[..close]) {
            modifiers |= flag;
        }
        rest = &open[close + 1..];
    }
    join(modifiers, rest)
}

/// Formats a legacy shortcut, a list of key combinations each written as
/// modifier names followed by the key.
pub fn format_key_lists(shortcuts: &[Vec<String>]) -> String {
    let Some(first) = shortcuts.first() else { return String::new() };
    let Some((key, modifier_names)) = first.split_last() else { return String::new() };
    let modifiers = modifier_names
        .iter()
        .filter_map(|name| Modifiers::from_token(name))
        .fold(Modifiers::empty(), |acc, flag| acc | flag);
    join(modifiers, key)
}
