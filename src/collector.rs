//! Collectors turn a remote menu protocol into [`CommandItem`]s.
//!
//! [`CommandItem`]: crate::source::CommandItem

pub mod accel;
pub mod keywords;
pub mod legacy;
pub mod menu_model;

pub use keywords::{KeywordMapping, KeywordTables};
pub use legacy::LegacyCollector;
pub use menu_model::MenuModelCollector;

use crate::source::SourceKind;

#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub app_id: String,
    pub icon: String,
    /// Label prepended to every item, like "Sound" for an indicator.
    pub prefix: Option<String>,
    /// Percent added to every reported distance.
    pub penalty: u32,
    pub kind: SourceKind,
    /// Where a menu model collector exports its actions and depth-limited
    /// submenus.
    pub export_path: Option<String>,
}

impl CollectorOptions {
    pub fn new(app_id: &str, icon: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            icon: icon.to_string(),
            prefix: None,
            penalty: 0,
            kind: SourceKind::Background,
            export_path: None,
        }
    }
}

/// Strips mnemonic underscores (`__` is a literal `_`) and a trailing
/// ellipsis.
pub fn clean_label(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '_' {
            if chars.peek() == Some(&'_') {
                chars.next();
                out.push('_');
            }
            continue;
        }
        out.push(c);
    }
    let trimmed = out.trim_end();
    let trimmed = trimmed
        .strip_suffix("...")
        .or_else(|| trimmed.strip_suffix('…'))
        .unwrap_or(trimmed);
    trimmed.trim().to_string()
}

/// Adds `penalty` percent to `distance`.
pub(crate) fn penalized(distance: u32, penalty: u32) -> u32 { distance + distance * penalty / 100 }

/// Splits a `;`-separated keyword attribute.
pub(crate) fn split_keywords(raw: &str) -> Vec<String> {
    const MAX_KEYWORDS: usize = 64;
    raw.split(';')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .take(MAX_KEYWORDS)
        .map(String::from)
        .collect()
}
