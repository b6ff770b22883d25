//! Collects commands from the older layout-based menu protocol.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

use super::accel::format_key_lists;
use super::keywords::KeywordMapping;
use super::{CollectorOptions, clean_label, penalized};
use crate::context::HudContext;
use crate::remote::{LayoutNode, LegacyMenu, RemoteRef};
use crate::search::TokenList;
use crate::source::{
    ActivateEvent, AppEntry, CommandItem, ItemSpec, LegacyTarget, SearchResult, Signal, Source,
    Subscription, ToolbarItem,
};
use crate::sys::main_loop::{self, IdleId};

/// Submenus opened per walk before the rest are left alone.
const MAX_SUBMENU_OPENS: u32 = 50;

#[derive(Default)]
struct State {
    items: Vec<Rc<CommandItem>>,
    use_count: u32,
    rebuild: Option<IdleId>,
}

pub struct LegacyCollector {
    ctx: Rc<HudContext>,
    options: CollectorOptions,
    keywords: Rc<KeywordMapping>,
    menu: Rc<dyn LegacyMenu>,
    state: RefCell<State>,
    _layout_updated: Subscription,
    changed: Signal,
}

impl LegacyCollector {
    pub fn new(ctx: &Rc<HudContext>, options: CollectorOptions, menu: Rc<dyn LegacyMenu>) -> Rc<Self> {
        let collector = Rc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let layout_updated = menu.layout_updated().connect(move |_| {
                if let Some(this) = weak.upgrade() {
                    this.schedule_rebuild();
                }
            });
            Self {
                ctx: ctx.clone(),
                keywords: ctx.keywords.for_app(&options.app_id),
                options,
                menu,
                state: RefCell::new(State::default()),
                _layout_updated: layout_updated,
                changed: Signal::new(),
            }
        });
        let items = collector.collect();
        collector.state.borrow_mut().items = items;
        collector
    }

    /// Returns `None` if nothing is published at `bus_name` + `path`.
    pub fn for_remote(
        ctx: &Rc<HudContext>,
        options: CollectorOptions,
        bus_name: &str,
        path: &str,
    ) -> Option<Rc<Self>> {
        let at = RemoteRef::new(bus_name, path);
        let Some(menu) = ctx.bus.legacy_menu(&at) else {
            warn!(%at, "no legacy menu");
            return None;
        };
        Some(Self::new(ctx, options, menu))
    }

    pub fn items(&self) -> Vec<Rc<CommandItem>> { self.state.borrow().items.clone() }

    fn collect(&self) -> Vec<Rc<CommandItem>> {
        let Some(root) = self.menu.layout(0) else { return Vec::new() };
        let base: Vec<String> = self.options.prefix.iter().map(|p| clean_label(p)).collect();
        let mut opens = MAX_SUBMENU_OPENS;
        let mut items = Vec::new();
        self.walk(&root, &base, &mut opens, &mut items);
        debug!(app_id = self.options.app_id, items = items.len(), "collected legacy menu");
        items
    }

    fn walk(&self, node: &LayoutNode, path: &[String], opens: &mut u32, items: &mut Vec<Rc<CommandItem>>) {
        for child in &node.children {
            let props = &child.properties;
            if !props.visible || !props.enabled || child.is_separator() {
                continue;
            }
            let label = props.label.as_deref().map(clean_label).unwrap_or_default();
            if label.is_empty() {
                continue;
            }
            let mut child_path = path.to_vec();
            child_path.push(label);

            if !child.is_submenu() {
                items.push(self.make_item(child, child_path));
                continue;
            }
            if *opens == 0 {
                trace!(id = child.id, "submenu limit reached");
                continue;
            }
            *opens -= 1;
            let subtree = if self.menu.about_to_show(child.id) {
                self.menu.layout(child.id).unwrap_or_else(|| child.clone())
            } else {
                child.clone()
            };
            self.walk(&subtree, &child_path, opens, items);
        }
    }

    fn make_item(&self, node: &LayoutNode, label_path: Vec<String>) -> Rc<CommandItem> {
        let keywords = label_path
            .last()
            .map(|label| self.keywords.keywords(label).to_vec())
            .unwrap_or_default();
        let spec = ItemSpec {
            id: self.ctx.allocator.item_id(),
            label_path,
            keywords,
            shortcut: format_key_lists(&node.properties.shortcut),
            description: String::new(),
            app_id: self.options.app_id.clone(),
            app_icon: self.options.icon.clone(),
            toolbar: None,
            target: LegacyTarget { menu: self.menu.clone(), id: node.id }.into(),
        };
        Rc::new(CommandItem::new(spec, self.ctx.usage.clone()))
    }

    fn schedule_rebuild(self: &Rc<Self>) {
        if self.state.borrow().rebuild.is_some() {
            return;
        }
        let weak = Rc::downgrade(self);
        let id = main_loop::idle_add(move || {
            if let Some(this) = weak.upgrade() {
                this.state.borrow_mut().rebuild = None;
                let items = this.collect();
                this.state.borrow_mut().items = items;
                this.changed.notify();
            }
        });
        self.state.borrow_mut().rebuild = Some(id);
    }
}

impl Drop for LegacyCollector {
    fn drop(&mut self) {
        if let Some(id) = self.state.get_mut().rebuild.take() {
            main_loop::idle_remove(id);
        }
    }
}

impl Source for LegacyCollector {
    fn activate(&self) {
        let first = {
            let mut state = self.state.borrow_mut();
            state.use_count += 1;
            state.use_count == 1
        };
        if first {
            self.menu.event(0, "opened", 0);
        }
    }

    fn deactivate(&self) {
        let last = {
            let mut state = self.state.borrow_mut();
            if state.use_count == 0 {
                warn!(app_id = self.options.app_id, "unbalanced deactivate");
                return;
            }
            state.use_count -= 1;
            state.use_count == 0
        };
        if last {
            self.menu.event(0, "closed", 0);
        }
    }

    fn search(&self, query: &TokenList, results: &mut Vec<SearchResult>) {
        let ranker = self.ctx.ranker();
        for item in self.items() {
            if let Some(distance) = ranker.distance(item.tokens(), query) {
                let distance = penalized(distance, self.options.penalty);
                results.push(SearchResult { item, distance });
            }
        }
    }

    fn list_applications(&self, query: &TokenList, apps: &mut Vec<AppEntry>) {
        let ranker = self.ctx.ranker();
        if self.items().iter().any(|item| ranker.distance(item.tokens(), query).is_some()) {
            apps.push(AppEntry {
                app_id: self.options.app_id.clone(),
                icon: self.options.icon.clone(),
                kind: self.options.kind,
            });
        }
    }

    fn get(self: Rc<Self>, app_id: &str) -> Option<Rc<dyn Source>> {
        (self.options.app_id == app_id).then(|| self as Rc<dyn Source>)
    }

    fn snapshot_items(&self) -> Vec<Rc<CommandItem>> { self.items() }

    fn toolbar_entries(&self, _entries: &mut Vec<ToolbarItem>) {}

    fn activate_toolbar(&self, _item: ToolbarItem, _event: &ActivateEvent) {}

    fn app_id(&self) -> Option<String> { Some(self.options.app_id.clone()) }

    fn app_icon(&self) -> Option<String> { Some(self.options.icon.clone()) }

    fn is_collector(&self) -> bool { true }

    fn changed(&self) -> &Signal { &self.changed }
}
