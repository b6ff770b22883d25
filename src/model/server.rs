use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::app::WindowId;
use crate::source::{ItemId, SourceKind};

/// One row of a query's results table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    pub id: ItemId,
    pub command: String,
    pub command_highlights: Vec<(i32, i32)>,
    pub description: String,
    pub description_highlights: Vec<(i32, i32)>,
    pub shortcut: String,
    pub distance: u32,
    pub parameterized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppstackRow {
    pub app_id: String,
    pub icon: String,
    pub kind: SourceKind,
}

/// Row of the older one-shot query API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyRow {
    pub command: String,
    pub description: String,
    pub icon: String,
    pub completion: String,
    pub shortcut: String,
    pub key: ItemId,
}

/// What `create_query` hands back.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryData {
    pub path: String,
    pub results_name: String,
    pub appstack_name: String,
    pub revision: u32,
    pub search: Option<String>,
    pub owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationData {
    pub app_id: String,
    pub path: String,
    pub icon: String,
    pub focused: bool,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextData {
    pub window: WindowId,
    pub context: Option<String>,
    pub visible: bool,
    pub items: Vec<ItemNode>,
}

/// One command as shown by the application dump.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemNode {
    pub id: ItemId,
    pub label_path: Vec<String>,
    pub shortcut: Option<String>,
    pub enabled: bool,
    pub parameterized: bool,
}
