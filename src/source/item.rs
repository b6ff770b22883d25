use std::cell::RefCell;
use std::rc::Rc;

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{ActivateEvent, ToolbarItem};
use crate::common::error::HudError;
use crate::common::usage::UsageStore;
use crate::remote::{ActionGroup, Export, LegacyMenu, MenuModel, is_object_path};
use crate::search::TokenList;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

#[enum_dispatch]
pub trait Activate {
    fn activate(&self, event: &ActivateEvent);

    fn is_enabled(&self) -> bool;
}

/// An action in a remote action group.
pub struct ActionTarget {
    pub group: Rc<dyn ActionGroup>,
    /// Name within `group`.
    pub name: String,
    /// Name as written in the menu, prefix included.
    pub full_name: String,
    pub parameter: Option<Value>,
}

impl Activate for ActionTarget {
    fn activate(&self, event: &ActivateEvent) {
        self.group.activate(&self.name, self.parameter.as_ref(), &event.platform_data);
    }

    fn is_enabled(&self) -> bool { self.group.is_enabled(&self.name) }
}

/// A node of a legacy menu.
pub struct LegacyTarget {
    pub menu: Rc<dyn LegacyMenu>,
    pub id: i32,
}

impl Activate for LegacyTarget {
    fn activate(&self, event: &ActivateEvent) { self.menu.event(self.id, "clicked", event.timestamp); }

    // disabled nodes are never collected
    fn is_enabled(&self) -> bool { true }
}

#[enum_dispatch(Activate)]
pub enum ItemTarget {
    ActionTarget,
    LegacyTarget,
}

/// A submenu kept behind an item instead of being indexed.
pub struct ChildMenu {
    pub model: Rc<dyn MenuModel>,
    pub export: Option<Export>,
    /// Where the collector's actions are exported.
    pub action_path: Option<String>,
}

impl ChildMenu {
    pub fn export_path(&self) -> Option<&str> { self.export.as_ref().map(Export::path) }
}

/// What a client needs to open a parameterized item's dialog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterizedAction {
    pub base_action: String,
    pub action_path: String,
    pub model_path: String,
    pub section: i32,
}

/// Everything a collector knows about an entry when it creates an item.
pub struct ItemSpec {
    pub id: ItemId,
    pub label_path: Vec<String>,
    pub keywords: Vec<String>,
    pub shortcut: String,
    pub description: String,
    pub app_id: String,
    pub app_icon: String,
    pub toolbar: Option<ToolbarItem>,
    pub target: ItemTarget,
}

/// A searchable command.
pub struct CommandItem {
    id: ItemId,
    label_path: Vec<String>,
    tokens: TokenList,
    keywords: Vec<String>,
    shortcut: String,
    description: String,
    app_id: String,
    app_icon: String,
    toolbar: Option<ToolbarItem>,
    target: ItemTarget,
    child: RefCell<Option<ChildMenu>>,
    usage: Rc<UsageStore>,
}

impl CommandItem {
    pub fn new(spec: ItemSpec, usage: Rc<UsageStore>) -> Self {
        let mut tokens = TokenList::from_labels(spec.label_path.iter().map(String::as_str));
        for keyword in &spec.keywords {
            tokens.push_text(keyword);
        }
        Self {
            id: spec.id,
            label_path: spec.label_path,
            tokens,
            keywords: spec.keywords,
            shortcut: spec.shortcut,
            description: spec.description,
            app_id: spec.app_id,
            app_icon: spec.app_icon,
            toolbar: spec.toolbar,
            target: spec.target,
            child: RefCell::new(None),
            usage,
        }
    }

    pub fn id(&self) -> ItemId { self.id }

    pub fn label(&self) -> &str { self.label_path.last().map(String::as_str).unwrap_or("") }

    pub fn label_path(&self) -> &[String] { &self.label_path }

    pub fn tokens(&self) -> &TokenList { &self.tokens }

    pub fn keywords(&self) -> &[String] { &self.keywords }

    pub fn shortcut(&self) -> &str { &self.shortcut }

    /// The entry's own description, else its ancestors' labels.
    pub fn description(&self) -> String {
        if !self.description.is_empty() {
            return self.description.clone();
        }
        let ancestors = &self.label_path[..self.label_path.len().saturating_sub(1)];
        ancestors.join(", ")
    }

    pub fn app_id(&self) -> &str { &self.app_id }

    pub fn app_icon(&self) -> &str { &self.app_icon }

    pub fn toolbar(&self) -> Option<ToolbarItem> { self.toolbar }

    pub fn target(&self) -> &ItemTarget { &self.target }

    pub fn is_enabled(&self) -> bool { self.target.is_enabled() }

    pub fn usage(&self) -> u32 { self.usage.usage(&self.app_id, &self.label_path) }

    pub fn mark_usage(&self) { self.usage.mark(&self.app_id, &self.label_path); }

    pub fn activate(&self, event: &ActivateEvent) {
        debug!(id = self.id.0, label = self.label(), "activating item");
        self.mark_usage();
        self.target.activate(event);
    }

    pub fn set_child(&self, child: ChildMenu) { *self.child.borrow_mut() = Some(child); }

    pub fn is_parameterized(&self) -> bool { self.child.borrow().is_some() }

    pub fn child_export_path(&self) -> Option<String> {
        self.child.borrow().as_ref().and_then(|c| c.export_path().map(str::to_string))
    }

    pub fn activate_parameterized(&self) -> Result<ParameterizedAction, HudError> {
        let ItemTarget::ActionTarget(target) = &self.target else {
            return Err(HudError::NotMenuModelItem);
        };
        let child = self.child.borrow();
        let child = child.as_ref().ok_or(HudError::NotParameterized)?;
        let (Some(action_path), Some(model_path)) = (&child.action_path, child.export_path()) else {
            return Err(HudError::InvalidParameterized);
        };
        if !is_object_path(action_path) || !is_object_path(model_path) {
            return Err(HudError::InvalidParameterized);
        }
        self.mark_usage();
        Ok(ParameterizedAction {
            base_action: target.full_name.clone(),
            action_path: action_path.clone(),
            model_path: model_path.to_string(),
            section: 1,
        })
    }
}

impl std::fmt::Debug for CommandItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandItem")
            .field("id", &self.id)
            .field("label_path", &self.label_path)
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}
