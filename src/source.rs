//! The capability every searchable corpus implements.

pub mod item;
pub mod list;
pub mod signal;

use std::rc::Rc;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

pub use item::{
    ActionTarget, Activate, ChildMenu, CommandItem, ItemId, ItemSpec, ItemTarget, LegacyTarget,
    ParameterizedAction,
};
pub use list::SourceList;
pub use signal::{Signal, Subscription};

use crate::remote::{PlatformData, timestamp_platform_data};
use crate::search::TokenList;

/// Toolbar slots a menu entry may claim. Declaration order is the wire order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    Serialize,
    Deserialize
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ToolbarItem {
    Fullscreen,
    Help,
    Preferences,
    Quit,
    Undo,
}

/// How an application relates to the current query. Sorts in this order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    Deserialize
)]
#[repr(i32)]
#[serde(into = "i32", try_from = "i32")]
pub enum SourceKind {
    Focused = 0,
    SideStage = 1,
    Background = 2,
    Indicator = 3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppEntry {
    pub app_id: String,
    pub icon: String,
    pub kind: SourceKind,
}

#[derive(Clone)]
pub struct SearchResult {
    pub item: Rc<CommandItem>,
    pub distance: u32,
}

impl SearchResult {
    pub fn usage(&self) -> u32 { self.item.usage() }
}

impl std::fmt::Debug for SearchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchResult")
            .field("item", &self.item.label_path())
            .field("distance", &self.distance)
            .finish()
    }
}

/// What an item activation carries along.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivateEvent {
    pub timestamp: u32,
    pub platform_data: PlatformData,
}

impl ActivateEvent {
    pub fn at(timestamp: u32) -> Self {
        Self {
            timestamp,
            platform_data: timestamp_platform_data(timestamp),
        }
    }
}

/// Anything that can be activated, searched, and asked about its
/// applications and items.
///
/// `activate`/`deactivate` are counted and must balance. A source may keep
/// live remote subscriptions only while its count is above zero.
pub trait Source {
    fn activate(&self);

    fn deactivate(&self);

    fn search(&self, query: &TokenList, results: &mut Vec<SearchResult>);

    /// Appends an entry for each application with at least one match.
    fn list_applications(&self, query: &TokenList, apps: &mut Vec<AppEntry>);

    fn get(self: Rc<Self>, app_id: &str) -> Option<Rc<dyn Source>>;

    fn snapshot_items(&self) -> Vec<Rc<CommandItem>>;

    fn toolbar_entries(&self, entries: &mut Vec<ToolbarItem>);

    fn activate_toolbar(&self, item: ToolbarItem, event: &ActivateEvent);

    fn app_id(&self) -> Option<String> { None }

    fn app_icon(&self) -> Option<String> { None }

    fn is_collector(&self) -> bool { false }

    fn changed(&self) -> &Signal;
}

/// Pushes `entry` unless an equal one is already present.
pub(crate) fn push_unique<T: PartialEq>(entries: &mut Vec<T>, entry: T) {
    if !entries.contains(&entry) {
        entries.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn toolbar_names_round_trip() {
        let names: Vec<String> = ToolbarItem::iter().map(|t| t.to_string()).collect();
        assert_eq!(names, ["fullscreen", "help", "preferences", "quit", "undo"]);
        assert_eq!(ToolbarItem::from_str("quit").unwrap(), ToolbarItem::Quit);
        assert!(ToolbarItem::from_str("launch").is_err());
    }

    #[test]
    fn source_kind_orders_focused_first() {
        let mut kinds = vec![SourceKind::Indicator, SourceKind::Focused, SourceKind::Background];
        kinds.sort();
        assert_eq!(kinds, vec![SourceKind::Focused, SourceKind::Background, SourceKind::Indicator]);
        assert_eq!(i32::from(SourceKind::SideStage), 1);
        assert_eq!(serde_json::to_string(&SourceKind::Indicator).unwrap(), "3");
    }
}
