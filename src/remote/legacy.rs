use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::source::Signal;

fn yes() -> bool { true }

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LayoutProperties {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default = "yes")]
    pub enabled: bool,
    #[serde(default = "yes")]
    pub visible: bool,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Key combinations, each a list like `["Control", "s"]`.
    #[serde(default)]
    pub shortcut: Vec<Vec<String>>,
    #[serde(default)]
    pub children_display: Option<String>,
}

impl Default for LayoutProperties {
    fn default() -> Self {
        Self {
            label: None,
            enabled: true,
            visible: true,
            kind: None,
            shortcut: Vec::new(),
            children_display: None,
        }
    }
}

/// One node of a legacy menu layout; id 0 is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutNode {
    pub id: i32,
    #[serde(default)]
    pub properties: LayoutProperties,
    #[serde(default)]
    pub children: Vec<LayoutNode>,
}

impl LayoutNode {
    pub fn item(id: i32, label: &str) -> Self {
        Self {
            id,
            properties: LayoutProperties {
                label: Some(label.to_string()),
                ..LayoutProperties::default()
            },
            children: Vec::new(),
        }
    }

    pub fn submenu(id: i32, label: &str, children: Vec<LayoutNode>) -> Self {
        let mut node = Self::item(id, label);
        node.properties.children_display = Some("submenu".into());
        node.children = children;
        node
    }

    pub fn separator(id: i32) -> Self {
        Self {
            id,
            properties: LayoutProperties {
                kind: Some("separator".into()),
                ..LayoutProperties::default()
            },
            children: Vec::new(),
        }
    }

    pub fn is_separator(&self) -> bool { self.properties.kind.as_deref() == Some("separator") }

    pub fn is_submenu(&self) -> bool {
        self.properties.children_display.as_deref() == Some("submenu") || !self.children.is_empty()
    }

    pub fn find(&self, id: i32) -> Option<&LayoutNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}

/// The older flat menu protocol: numbered nodes, fetched as a layout.
pub trait LegacyMenu {
    /// The subtree rooted at `parent`, if it exists.
    fn layout(&self, parent: i32) -> Option<LayoutNode>;

    /// Returns true when the owner changed the layout in response.
    fn about_to_show(&self, id: i32) -> bool;

    fn event(&self, id: i32, name: &str, timestamp: u32);

    fn layout_updated(&self) -> &Signal;
}

#[derive(Default)]
pub struct SimpleLegacyMenu {
    root: RefCell<LayoutNode>,
    events: RefCell<Vec<(i32, String, u32)>>,
    shown: RefCell<Vec<i32>>,
    updated: Signal,
}

impl SimpleLegacyMenu {
    pub fn new(children: Vec<LayoutNode>) -> Rc<Self> {
        let menu = Self::default();
        menu.root.borrow_mut().children = children;
        Rc::new(menu)
    }

    pub fn set_layout(&self, children: Vec<LayoutNode>) {
        self.root.borrow_mut().children = children;
        self.updated.notify();
    }

    pub fn events(&self) -> Vec<(i32, String, u32)> { self.events.borrow().clone() }

    pub fn shown(&self) -> Vec<i32> { self.shown.borrow().clone() }
}

impl LegacyMenu for SimpleLegacyMenu {
    fn layout(&self, parent: i32) -> Option<LayoutNode> { self.root.borrow().find(parent).cloned() }

    fn about_to_show(&self, id: i32) -> bool {
        self.shown.borrow_mut().push(id);
        false
    }

    fn event(&self, id: i32, name: &str, timestamp: u32) {
        self.events.borrow_mut().push((id, name.to_string(), timestamp));
    }

    fn layout_updated(&self) -> &Signal { &self.updated }
}
