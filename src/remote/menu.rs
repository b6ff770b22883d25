use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::source::Signal;

pub const LABEL: &str = "label";
pub const ACTION: &str = "action";
pub const ACTION_NAMESPACE: &str = "action-namespace";
pub const ACCEL: &str = "accel";
pub const DESCRIPTION: &str = "description";
pub const KEYWORDS: &str = "keywords";
pub const TARGET: &str = "target";
pub const TOOLBAR_ITEM: &str = "hud-toolbar-item";

pub const SECTION: &str = "section";
pub const SUBMENU: &str = "submenu";

/// `removed` entries starting at `position` were replaced by `added` new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemsChanged {
    pub position: usize,
    pub removed: usize,
    pub added: usize,
}

/// An ordered, mutable list of menu entries owned by another process.
pub trait MenuModel {
    fn n_items(&self) -> usize;

    fn attribute(&self, index: usize, name: &str) -> Option<Value>;

    fn link(&self, index: usize, name: &str) -> Option<Rc<dyn MenuModel>>;

    fn items_changed(&self) -> &Signal<ItemsChanged>;

    fn string_attribute(&self, index: usize, name: &str) -> Option<String> {
        match self.attribute(index, name)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Clone, Default)]
pub struct MenuEntry {
    attributes: BTreeMap<String, Value>,
    links: BTreeMap<String, Rc<dyn MenuModel>>,
}

impl MenuEntry {
    pub fn new() -> Self { Self::default() }

    pub fn item(label: &str, action: &str) -> Self {
        Self::new().attribute(LABEL, label).attribute(ACTION, action)
    }

    pub fn submenu(label: &str, menu: Rc<dyn MenuModel>) -> Self {
        Self::new().attribute(LABEL, label).link(SUBMENU, menu)
    }

    pub fn section(menu: Rc<dyn MenuModel>) -> Self { Self::new().link(SECTION, menu) }

    pub fn attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn link(mut self, name: &str, menu: Rc<dyn MenuModel>) -> Self {
        self.links.insert(name.to_string(), menu);
        self
    }

    pub fn accel(self, accel: &str) -> Self { self.attribute(ACCEL, accel) }
}

/// In-process menu model.
#[derive(Default)]
pub struct SimpleMenu {
    entries: RefCell<Vec<MenuEntry>>,
    changed: Signal<ItemsChanged>,
}

impl SimpleMenu {
    pub fn new() -> Rc<Self> { Rc::new(Self::default()) }

    pub fn from_entries(entries: Vec<MenuEntry>) -> Rc<Self> {
        Rc::new(Self {
            entries: RefCell::new(entries),
            changed: Signal::new(),
        })
    }

    pub fn append(&self, entry: MenuEntry) {
        let position = self.entries.borrow().len();
        self.splice(position, 0, vec![entry]);
    }

    pub fn insert(&self, position: usize, entry: MenuEntry) { self.splice(position, 0, vec![entry]); }

    pub fn remove(&self, position: usize) { self.splice(position, 1, Vec::new()); }

    /// Replaces `removed` entries at `position` with `added`, then notifies.
    pub fn splice(&self, position: usize, removed: usize, added: Vec<MenuEntry>) {
        let change = {
            let mut entries = self.entries.borrow_mut();
            let position = position.min(entries.len());
            let end = (position + removed).min(entries.len());
            let added_len = added.len();
            entries.splice(position..end, added);
            ItemsChanged {
                position,
                removed: end - position,
                added: added_len,
            }
        };
        self.changed.emit(&change);
    }

    pub fn from_description(items: &[MenuItemDescription]) -> Rc<Self> {
        Self::from_entries(items.iter().map(MenuItemDescription::to_entry).collect())
    }
}

impl MenuModel for SimpleMenu {
    fn n_items(&self) -> usize { self.entries.borrow().len() }

    fn attribute(&self, index: usize, name: &str) -> Option<Value> {
        self.entries.borrow().get(index)?.attributes.get(name).cloned()
    }

    fn link(&self, index: usize, name: &str) -> Option<Rc<dyn MenuModel>> {
        self.entries.borrow().get(index)?.links.get(name).cloned()
    }

    fn items_changed(&self) -> &Signal<ItemsChanged> { &self.changed }
}

/// Serializable form of a menu, used to publish menus over IPC.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct MenuItemDescription {
    pub label: Option<String>,
    pub action: Option<String>,
    pub action_namespace: Option<String>,
    pub accel: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub target: Option<Value>,
    pub toolbar: Option<String>,
    pub submenu: Option<Vec<MenuItemDescription>>,
    pub section: Option<Vec<MenuItemDescription>>,
}

impl MenuItemDescription {
    fn to_entry(&self) -> MenuEntry {
        let mut entry = MenuEntry::new();
        let strings = [
            (LABEL, &self.label),
            (ACTION, &self.action),
            (ACTION_NAMESPACE, &self.action_namespace),
            (ACCEL, &self.accel),
            (DESCRIPTION, &self.description),
            (KEYWORDS, &self.keywords),
            (TOOLBAR_ITEM, &self.toolbar),
        ];
        for (name, value) in strings {
            if let Some(value) = value {
                entry = entry.attribute(name, value.as_str());
            }
        }
        if let Some(target) = &self.target {
            entry = entry.attribute(TARGET, target.clone());
        }
        if let Some(items) = &self.submenu {
            entry = entry.link(SUBMENU, SimpleMenu::from_description(items));
        }
        if let Some(items) = &self.section {
            entry = entry.link(SECTION, SimpleMenu::from_description(items));
        }
        entry
    }
}
