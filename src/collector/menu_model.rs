//! Collects commands from menu models and the action groups they refer to.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace, warn};

use super::accel::format_accelerator;
use super::keywords::KeywordMapping;
use super::{CollectorOptions, clean_label, penalized, split_keywords};
use crate::context::HudContext;
use crate::remote::menu::{
    ACCEL, ACTION, ACTION_NAMESPACE, DESCRIPTION, KEYWORDS, LABEL, SECTION, SUBMENU, TARGET,
    TOOLBAR_ITEM,
};
use crate::remote::{
    ActionGroup, ActionMuxer, Export, Exported, ItemsChanged, MenuEntry, MenuModel, RemoteRef,
    SimpleMenu,
};
use crate::search::TokenList;
use crate::source::{
    ActionTarget, ActivateEvent, AppEntry, ChildMenu, CommandItem, ItemSpec, SearchResult, Signal,
    Source, Subscription, ToolbarItem, push_unique,
};
use crate::sys::main_loop::{self, IdleId};

/// Labels and action namespace inherited from the entries above a menu.
#[derive(Debug, Clone, Default, PartialEq)]
struct MenuContext {
    labels: Vec<String>,
    namespace: Option<String>,
}

impl MenuContext {
    fn child(&self, label: Option<&str>, namespace: Option<&str>) -> Self {
        let mut labels = self.labels.clone();
        if let Some(label) = label.map(clean_label).filter(|l| !l.is_empty()) {
            labels.push(label);
        }
        let namespace = match (&self.namespace, namespace) {
            (Some(outer), Some(inner)) => Some(format!("{outer}.{inner}")),
            (None, Some(inner)) => Some(inner.to_string()),
            (outer, None) => outer.clone(),
        };
        Self { labels, namespace }
    }

    /// Splits `action` into the prefix it is bound under and its name there.
    fn resolve<'a>(&self, action: &'a str) -> (Option<String>, &'a str) {
        match &self.namespace {
            Some(ns) => {
                let name = action
                    .strip_prefix(ns.as_str())
                    .and_then(|rest| rest.strip_prefix('.'))
                    .unwrap_or(action);
                (Some(ns.clone()), name)
            }
            None => match action.split_once('.') {
                Some((prefix, name)) if !prefix.is_empty() => (Some(prefix.to_string()), name),
                _ => (None, action),
            },
        }
    }
}

/// A tree handed to the collector, as opposed to one reached through links.
struct Root {
    model: Rc<dyn MenuModel>,
    remote: Option<RemoteRef>,
    context: MenuContext,
    depth: u32,
    aware: Rc<Cell<bool>>,
    _probe: Option<DropGuard>,
}

type Ancestors = Rc<Vec<Weak<dyn MenuModel>>>;

#[derive(Default)]
struct State {
    roots: Vec<Root>,
    // one per walked model
    watches: Vec<Subscription>,
    items: Vec<Rc<CommandItem>>,
    menu_exports: Vec<Export>,
    use_count: u32,
    rebuild: Option<IdleId>,
    // an entry referred to a namespace that was not bound yet
    unresolved: bool,
}

pub struct MenuModelCollector {
    ctx: Rc<HudContext>,
    options: CollectorOptions,
    keywords: Rc<KeywordMapping>,
    muxer: Rc<ActionMuxer>,
    _muxer_export: Option<Export>,
    _muxer_events: Subscription,
    state: RefCell<State>,
    changed: Signal,
    weak_self: Weak<Self>,
}

impl MenuModelCollector {
    pub fn new(ctx: &Rc<HudContext>, options: CollectorOptions) -> Rc<Self> {
        let muxer = ActionMuxer::new();
        let muxer_export = options.export_path.as_deref().and_then(|path| {
            Export::new(&ctx.bus, path, Exported::Actions(muxer.clone()))
                .inspect_err(|e| warn!(path, "unable to export action group: {e}"))
                .ok()
        });
        Rc::new_cyclic(|weak_self: &Weak<Self>| {
            let weak = weak_self.clone();
            let muxer_events = muxer.events().connect(move |event| {
                if let Some(this) = weak.upgrade() {
                    trace!(app_id = this.options.app_id, ?event, "action group changed");
                    this.changed.notify();
                }
            });
            Self {
                ctx: ctx.clone(),
                keywords: ctx.keywords.for_app(&options.app_id),
                options,
                muxer,
                _muxer_export: muxer_export,
                _muxer_events: muxer_events,
                state: RefCell::new(State::default()),
                changed: Signal::new(),
                weak_self: weak_self.clone(),
            }
        })
    }

    pub fn options(&self) -> &CollectorOptions { &self.options }

    pub fn export_path(&self) -> Option<&str> { self.options.export_path.as_deref() }

    pub fn use_count(&self) -> u32 { self.state.borrow().use_count }

    pub fn items(&self) -> Vec<Rc<CommandItem>> { self.state.borrow().items.clone() }

    pub fn is_empty(&self) -> bool { self.state.borrow().roots.is_empty() }

    /// Binds `group` under `prefix` (`None` is the unprefixed bucket).
    pub fn add_actions(&self, group: Rc<dyn ActionGroup>, prefix: Option<&str>) {
        let prefix = prefix.filter(|p| !p.is_empty());
        debug!(app_id = self.options.app_id, ?prefix, "binding action group");
        self.muxer.insert(prefix, group);
        let needs_rebuild = {
            let mut state = self.state.borrow_mut();
            std::mem::take(&mut state.unresolved)
        };
        if needs_rebuild {
            self.schedule_rebuild();
        }
        self.changed.notify();
    }

    /// Indexes `model` down to `depth` submenu levels below it.
    pub fn add_model(&self, model: Rc<dyn MenuModel>, label: Option<&str>, depth: u32) {
        self.add_root(model, None, label, depth);
    }

    /// Looks up and indexes the menu at `bus_name` + `path`, probing it for
    /// awareness. Returns false if the bus has no such menu.
    pub fn add_menu(&self, bus_name: &str, path: &str) -> bool {
        let remote = RemoteRef::new(bus_name, path);
        let Some(model) = self.ctx.bus.menu_model(&remote) else {
            warn!(%remote, "no menu model");
            return false;
        };
        self.add_root(model, Some(remote), None, self.ctx.depth());
        true
    }

    pub fn add_remote_actions(&self, bus_name: &str, path: &str, prefix: Option<&str>) -> bool {
        let remote = RemoteRef::new(bus_name, path);
        let Some(group) = self.ctx.bus.action_group(&remote) else {
            warn!(%remote, "no action group");
            return false;
        };
        self.add_actions(group, prefix);
        true
    }

    /// A menu plus the unprefixed action group beside it, as indicators
    /// publish them.
    pub fn add_endpoint(&self, bus_name: &str, menu_path: &str, actions_path: &str) -> bool {
        let actions = self.add_remote_actions(bus_name, actions_path, None);
        self.add_menu(bus_name, menu_path) && actions
    }

    fn root_context(&self, label: Option<&str>) -> MenuContext {
        MenuContext::default()
            .child(self.options.prefix.as_deref(), None)
            .child(label, None)
    }

    fn add_root(
        &self,
        model: Rc<dyn MenuModel>,
        remote: Option<RemoteRef>,
        label: Option<&str>,
        depth: u32,
    ) {
        let aware = Rc::new(Cell::new(false));
        let probe = remote.as_ref().map(|remote| self.probe_awareness(remote, aware.clone()));
        let context = self.root_context(label);
        self.state.borrow_mut().roots.push(Root {
            model: model.clone(),
            remote,
            context: context.clone(),
            depth,
            aware,
            _probe: probe,
        });
        if self.state.borrow().rebuild.is_some() {
            // the pending rebuild walks every root
            return;
        }
        if self.attach(model, context, depth, &Ancestors::default()) {
            self.changed.notify();
        }
    }

    fn probe_awareness(&self, remote: &RemoteRef, aware: Rc<Cell<bool>>) -> DropGuard {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let check = self.ctx.bus.check_awareness(remote);
        let at = remote.clone();
        main_loop::spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => trace!(%at, "awareness probe cancelled"),
                result = check => match result {
                    Ok(()) => {
                        debug!(%at, "menu is aware");
                        aware.set(true);
                    }
                    Err(e) => trace!(%at, "not aware: {e}"),
                },
            }
        });
        token.drop_guard()
    }

    /// Returns whether any item was created.
    fn attach(
        &self,
        model: Rc<dyn MenuModel>,
        context: MenuContext,
        depth: u32,
        ancestors: &Ancestors,
    ) -> bool {
        if ancestors.iter().any(|a| std::ptr::addr_eq(a.as_ptr(), Rc::as_ptr(&model))) {
            debug!(app_id = self.options.app_id, "menu links back to itself");
            return false;
        }
        if depth == 0 {
            if let Some(export) = self.export_menu(&model) {
                self.state.borrow_mut().menu_exports.push(export);
            }
            return false;
        }

        let mut chain = Vec::clone(ancestors);
        chain.push(Rc::downgrade(&model));
        let chain: Ancestors = Rc::new(chain);

        let weak = self.weak_self.clone();
        let weak_model = Rc::downgrade(&model);
        let (watch_context, watch_chain) = (context.clone(), chain.clone());
        let watch = model.items_changed().connect(move |change| {
            if let (Some(this), Some(model)) = (weak.upgrade(), weak_model.upgrade()) {
                this.items_changed(&model, &watch_context, depth, &watch_chain, *change);
            }
        });
        self.state.borrow_mut().watches.push(watch);

        let n_items = model.n_items();
        self.walk(&model, &context, depth, &chain, 0, n_items)
    }

    fn items_changed(
        &self,
        model: &Rc<dyn MenuModel>,
        context: &MenuContext,
        depth: u32,
        ancestors: &Ancestors,
        change: ItemsChanged,
    ) {
        if self.state.borrow().rebuild.is_some() {
            return;
        }
        if change.removed > 0 {
            self.schedule_rebuild();
            return;
        }
        if self.walk(model, context, depth, ancestors, change.position, change.added) {
            self.changed.notify();
        }
    }

    fn walk(
        &self,
        model: &Rc<dyn MenuModel>,
        context: &MenuContext,
        depth: u32,
        ancestors: &Ancestors,
        start: usize,
        count: usize,
    ) -> bool {
        let mut made = false;
        for index in start..start + count {
            let label = model.string_attribute(index, LABEL);
            let namespace = model.string_attribute(index, ACTION_NAMESPACE);

            let item = match (&label, model.string_attribute(index, ACTION)) {
                (Some(label), Some(action)) => {
                    self.make_item(model.as_ref(), index, context, label, &action)
                }
                _ => None,
            };
            if let Some(item) = &item {
                self.state.borrow_mut().items.push(item.clone());
                made = true;
            }

            let inner = context.child(label.as_deref(), namespace.as_deref());
            if let Some(section) = model.link(index, SECTION) {
                made |= self.attach(section, inner.clone(), depth, ancestors);
            }
            if let Some(submenu) = model.link(index, SUBMENU) {
                if depth > 1 {
                    made |= self.attach(submenu, inner, depth - 1, ancestors);
                    continue;
                }
                let export = self.export_menu(&submenu);
                match &item {
                    Some(item) => item.set_child(ChildMenu {
                        model: submenu,
                        export,
                        action_path: self.options.export_path.clone(),
                    }),
                    None => self.state.borrow_mut().menu_exports.extend(export),
                }
            }
        }
        made
    }

    fn make_item(
        &self,
        model: &dyn MenuModel,
        index: usize,
        context: &MenuContext,
        label: &str,
        action: &str,
    ) -> Option<Rc<CommandItem>> {
        let (prefix, name) = context.resolve(action);
        let (group, name) = match self.muxer.get(prefix.as_deref()) {
            Some(group) => (group, name.to_string()),
            None => match self.muxer.get(None).filter(|_| prefix.is_some()) {
                Some(group) if group.has_action(name) => (group, name.to_string()),
                Some(group) => (group, action.to_string()),
                None => {
                    trace!(action, "namespace not bound");
                    self.state.borrow_mut().unresolved = true;
                    return None;
                }
            },
        };

        let label = clean_label(label);
        if label.is_empty() {
            return None;
        }
        let mut keywords: Vec<String> = self.keywords.keywords(&label).to_vec();
        if let Some(extra) = model.string_attribute(index, KEYWORDS) {
            keywords.extend(split_keywords(&extra));
        }
        let toolbar = model
            .string_attribute(index, TOOLBAR_ITEM)
            .and_then(|tag| tag.parse::<ToolbarItem>().ok());

        let mut label_path = context.labels.clone();
        label_path.push(label);

        let spec = ItemSpec {
            id: self.ctx.allocator.item_id(),
            label_path,
            keywords,
            shortcut: model
                .string_attribute(index, ACCEL)
                .map(|a| format_accelerator(&a))
                .unwrap_or_default(),
            description: model.string_attribute(index, DESCRIPTION).unwrap_or_default(),
            app_id: self.options.app_id.clone(),
            app_icon: self.options.icon.clone(),
            toolbar,
            target: ActionTarget {
                group,
                name,
                full_name: action.to_string(),
                parameter: model.attribute(index, TARGET),
            }
            .into(),
        };
        Some(Rc::new(CommandItem::new(spec, self.ctx.usage.clone())))
    }

    /// Publishes `model` under the export path, wrapped the way clients
    /// expect a root export.
    fn export_menu(&self, model: &Rc<dyn MenuModel>) -> Option<Export> {
        let base = self.options.export_path.as_deref()?;
        let path = format!("{base}/menu{}", self.ctx.allocator.export_number());
        let wrapper = SimpleMenu::from_entries(vec![MenuEntry::submenu("Root Export", model.clone())]);
        Export::new(&self.ctx.bus, &path, Exported::Menu(wrapper))
            .inspect_err(|e| warn!(path, "unable to export menu: {e}"))
            .ok()
    }

    fn schedule_rebuild(&self) {
        if self.state.borrow().rebuild.is_some() {
            return;
        }
        let weak = self.weak_self.clone();
        let id = main_loop::idle_add(move || {
            if let Some(this) = weak.upgrade() {
                this.rebuild();
            }
        });
        self.state.borrow_mut().rebuild = Some(id);
    }

    /// Runs a pending rebuild now so readers never see items the menus
    /// have already dropped.
    fn flush_rebuild(&self) {
        let pending = self.state.borrow_mut().rebuild.take();
        if let Some(id) = pending {
            main_loop::idle_remove(id);
            self.rebuild();
        }
    }

    fn current_items(&self) -> Vec<Rc<CommandItem>> {
        self.flush_rebuild();
        self.items()
    }

    /// Drops every item and walks all roots again.
    fn rebuild(&self) {
        let (roots, old_watches, old_exports) = {
            let mut state = self.state.borrow_mut();
            state.rebuild = None;
            state.items.clear();
            state.unresolved = false;
            let roots: Vec<_> =
                state.roots.iter().map(|r| (r.model.clone(), r.context.clone(), r.depth)).collect();
            (roots, std::mem::take(&mut state.watches), std::mem::take(&mut state.menu_exports))
        };
        drop(old_watches);
        drop(old_exports);

        debug!(app_id = self.options.app_id, roots = roots.len(), "rebuilding");
        for (model, context, depth) in roots {
            self.attach(model, context, depth, &Ancestors::default());
        }
        self.changed.notify();
    }

    fn set_active(&self, active: bool) {
        let targets: Vec<RemoteRef> = self
            .state
            .borrow()
            .roots
            .iter()
            .filter(|r| r.aware.get())
            .filter_map(|r| r.remote.clone())
            .collect();
        for remote in targets {
            self.ctx.bus.notify_active(&remote, active);
        }
    }

    fn distance(&self, item: &CommandItem, query: &TokenList) -> Option<u32> {
        let distance = self.ctx.ranker().distance(item.tokens(), query)?;
        Some(penalized(distance, self.options.penalty))
    }
}

impl Drop for MenuModelCollector {
    fn drop(&mut self) {
        if let Some(id) = self.state.get_mut().rebuild.take() {
            main_loop::idle_remove(id);
        }
    }
}

impl Source for MenuModelCollector {
    fn activate(&self) {
        let first = {
            let mut state = self.state.borrow_mut();
            state.use_count += 1;
            state.use_count == 1
        };
        if first {
            self.set_active(true);
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
            self.set_active(false);
        }
    }

    fn search(&self, query: &TokenList, results: &mut Vec<SearchResult>) {
        for item in self.current_items() {
            if query.is_empty() && item.toolbar().is_some() {
                continue;
            }
            if !item.is_enabled() {
                continue;
            }
            if let Some(distance) = self.distance(&item, query) {
                results.push(SearchResult { item, distance });
            }
        }
    }

    fn list_applications(&self, query: &TokenList, apps: &mut Vec<AppEntry>) {
        let matched = self
            .current_items()
            .iter()
            .any(|item| item.is_enabled() && self.distance(item, query).is_some());
        if matched {
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

    fn snapshot_items(&self) -> Vec<Rc<CommandItem>> { self.current_items() }

    fn toolbar_entries(&self, entries: &mut Vec<ToolbarItem>) {
        for item in self.current_items() {
            if let Some(tag) = item.toolbar()
                && item.is_enabled()
            {
                push_unique(entries, tag);
            }
        }
    }

    fn activate_toolbar(&self, tag: ToolbarItem, event: &ActivateEvent) {
        for item in self.current_items() {
            if item.toolbar() == Some(tag) {
                item.activate(event);
            }
        }
    }

    fn app_id(&self) -> Option<String> { Some(self.options.app_id.clone()) }

    fn app_icon(&self) -> Option<String> { Some(self.options.icon.clone()) }

    fn is_collector(&self) -> bool { true }

    fn changed(&self) -> &Signal { &self.changed }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_log::test;

    use super::*;
    use crate::remote::{LocalBus, SimpleActionGroup};
    use crate::source::SourceKind;

    struct Fixture {
        bus: Rc<LocalBus>,
        ctx: Rc<HudContext>,
    }

    fn fixture() -> Fixture {
        let bus = LocalBus::new();
        let ctx = HudContext::in_memory(bus.clone());
        Fixture { bus, ctx }
    }

    fn collector(fx: &Fixture) -> Rc<MenuModelCollector> {
        let mut options = CollectorOptions::new("gedit", "gedit-icon");
        options.export_path = Some("/com/canonical/hud/applications/gedit/window1".into());
        MenuModelCollector::new(&fx.ctx, options)
    }

    fn file_menu() -> Rc<SimpleMenu> {
        let file = SimpleMenu::from_entries(vec![
            MenuEntry::item("New", "app.new").accel("<Primary>n"),
            MenuEntry::item("Open", "app.open"),
        ]);
        SimpleMenu::from_entries(vec![MenuEntry::submenu("File", file)])
    }

    fn labels(results: &[SearchResult]) -> Vec<Vec<String>> {
        results.iter().map(|r| r.item.label_path().to_vec()).collect()
    }

    fn search(source: &dyn Source, text: &str) -> Vec<SearchResult> {
        let mut results = Vec::new();
        source.search(&TokenList::parse(text), &mut results);
        results
    }

    #[test]
    fn two_level_menu_is_searchable() {
        let fx = fixture();
        let collector = collector(&fx);
        collector.add_actions(SimpleActionGroup::with_actions(["new", "open"]), None);
        collector.add_model(file_menu(), None, 10);

        let found = search(collector.as_ref(), "new");
        assert_eq!(labels(&found), vec![vec!["File".to_string(), "New".to_string()]]);
        assert_eq!(found[0].item.shortcut(), "Ctrl + N");
        assert!(search(collector.as_ref(), "xyz").is_empty());
    }

    #[test]
    fn prefixed_actions_resolve_by_namespace() {
        let fx = fixture();
        let collector = collector(&fx);
        let app = SimpleActionGroup::with_actions(["new", "open"]);
        collector.add_actions(app.clone(), Some("app"));
        collector.add_model(file_menu(), None, 10);

        let found = search(collector.as_ref(), "open");
        assert_eq!(found.len(), 1);
        found[0].item.activate(&ActivateEvent::at(3));
        assert_eq!(app.activations()[0].action, "open");
    }

    #[test]
    fn action_namespace_attribute_applies_below_it() {
        let fx = fixture();
        let collector = collector(&fx);
        let win = SimpleActionGroup::with_actions(["close"]);
        collector.add_actions(win.clone(), Some("win"));
        let inner = SimpleMenu::from_entries(vec![MenuEntry::item("Close", "close")]);
        let root = SimpleMenu::from_entries(vec![
            MenuEntry::section(inner).attribute(ACTION_NAMESPACE, "win"),
        ]);
        collector.add_model(root, None, 10);

        let found = search(collector.as_ref(), "close");
        assert_eq!(found.len(), 1);
        found[0].item.activate(&ActivateEvent::at(1));
        assert_eq!(win.activations()[0].action, "close");
    }

    #[test]
    fn unbound_namespace_is_skipped_until_bound() {
        let fx = fixture();
        let collector = collector(&fx);
        collector.add_model(file_menu(), None, 10);
        assert!(collector.items().is_empty());

        collector.add_actions(SimpleActionGroup::with_actions(["new", "open"]), Some("app"));
        main_loop::run_until_idle();
        assert_eq!(collector.items().len(), 2);
    }

    #[test]
    fn disabled_and_toolbar_items_are_filtered() {
        let fx = fixture();
        let collector = collector(&fx);
        let app = SimpleActionGroup::with_actions(["quit", "save"]);
        collector.add_actions(app.clone(), Some("app"));
        collector.add_model(
            SimpleMenu::from_entries(vec![
                MenuEntry::item("Quit", "app.quit").attribute(TOOLBAR_ITEM, "quit"),
                MenuEntry::item("Save", "app.save"),
            ]),
            None,
            10,
        );

        assert_eq!(labels(&search(collector.as_ref(), "")), vec![vec!["Save".to_string()]]);
        assert_eq!(search(collector.as_ref(), "quit").len(), 1);

        let mut toolbar = Vec::new();
        collector.toolbar_entries(&mut toolbar);
        assert_eq!(toolbar, vec![ToolbarItem::Quit]);

        collector.activate_toolbar(ToolbarItem::Quit, &ActivateEvent::at(5));
        assert_eq!(app.activations()[0].action, "quit");

        app.set_enabled("quit", false);
        toolbar.clear();
        collector.toolbar_entries(&mut toolbar);
        assert!(toolbar.is_empty());
        app.set_enabled("save", false);
        assert!(search(collector.as_ref(), "").is_empty());
    }

    #[test]
    fn deep_chain_stops_at_budget() {
        let fx = fixture();
        let collector = collector(&fx);
        collector.add_actions(SimpleActionGroup::with_actions(["go"]), None);

        let mut menu = SimpleMenu::from_entries(vec![MenuEntry::item("Leaf", "go")]);
        for level in (0..11).rev() {
            menu = SimpleMenu::from_entries(vec![
                MenuEntry::item(&format!("Level{level}"), "go").link(SUBMENU, menu),
            ]);
        }
        collector.add_model(menu, None, 3);

        let items = collector.items();
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|i| i.label_path().len() <= 3));
        let cut = items.iter().find(|i| i.label() == "Level2").unwrap();
        assert!(cut.is_parameterized());
        let exported = cut.child_export_path().unwrap();
        assert!(fx.bus.exported(&exported).is_some());

        let action = cut.activate_parameterized().unwrap();
        assert_eq!(action.base_action, "go");
        assert_eq!(action.action_path, "/com/canonical/hud/applications/gedit/window1");
        assert_eq!(action.model_path, exported);
        assert_eq!(action.section, 1);
        assert_eq!(cut.usage(), 1);
    }

    #[test]
    fn cycles_terminate() {
        let fx = fixture();
        let collector = collector(&fx);
        collector.add_actions(SimpleActionGroup::with_actions(["a"]), None);
        let menu = SimpleMenu::from_entries(vec![MenuEntry::item("A", "a")]);
        let menu_dyn: Rc<dyn MenuModel> = menu.clone();
        menu.append(MenuEntry::section(menu_dyn.clone()));
        menu.append(MenuEntry::submenu("Again", menu_dyn));
        collector.add_model(menu, None, 10);
        assert_eq!(collector.items().len(), 1);
    }

    #[test]
    fn additions_are_incremental_and_removals_rebuild_once() {
        let fx = fixture();
        let collector = collector(&fx);
        collector.add_actions(SimpleActionGroup::with_actions(["a", "b", "c"]), None);
        let menu = SimpleMenu::from_entries(vec![MenuEntry::item("A", "a")]);
        collector.add_model(menu.clone(), None, 10);

        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let _sub = collector.changed().connect(move |_| h.set(h.get() + 1));

        menu.append(MenuEntry::item("B", "b"));
        assert_eq!(collector.items().len(), 2);
        assert_eq!(hits.get(), 1);

        menu.remove(0);
        menu.remove(0);
        menu.append(MenuEntry::item("C", "c"));
        // nothing changes until the rebuild runs
        assert_eq!(collector.items().len(), 2);
        main_loop::run_until_idle();
        assert_eq!(hits.get(), 2);
        let labels: Vec<_> = collector.items().iter().map(|i| i.label().to_string()).collect();
        assert_eq!(labels, vec!["C"]);
    }

    #[test]
    fn keyword_attribute_and_penalty() {
        let fx = fixture();
        let mut options = CollectorOptions::new("indicator-sound", "audio");
        options.prefix = Some("Sound".into());
        options.penalty = 50;
        options.kind = SourceKind::Indicator;
        let collector = MenuModelCollector::new(&fx.ctx, options);
        collector.add_actions(SimpleActionGroup::with_actions(["mute"]), None);
        collector.add_model(
            SimpleMenu::from_entries(vec![
                MenuEntry::item("_Mute", "mute").attribute(KEYWORDS, "silence;quiet"),
            ]),
            None,
            10,
        );

        let found = search(collector.as_ref(), "quiet");
        assert_eq!(labels(&found), vec![vec!["Sound".to_string(), "Mute".to_string()]]);
        let plain = fx.ctx.ranker().distance(found[0].item.tokens(), &TokenList::parse("mut")).unwrap();
        let penalized = search(collector.as_ref(), "mut")[0].distance;
        assert_eq!(penalized, plain + plain / 2);

        let mut apps = Vec::new();
        collector.list_applications(&TokenList::parse("mute"), &mut apps);
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].kind, SourceKind::Indicator);
    }

    #[test]
    fn only_aware_menus_hear_about_activation() {
        let fx = fixture();
        let aware = RemoteRef::new("org.example.Aware", "/menu");
        let plain = RemoteRef::new("org.example.Plain", "/menu");
        fx.bus.publish_menu(aware.clone(), file_menu());
        fx.bus.publish_menu(plain.clone(), file_menu());
        fx.bus.set_aware(aware.clone());

        let collector = collector(&fx);
        assert!(collector.add_menu("org.example.Aware", "/menu"));
        assert!(collector.add_menu("org.example.Plain", "/menu"));
        assert!(!collector.add_menu("org.example.Missing", "/menu"));
        main_loop::run_until_idle();

        collector.activate();
        collector.activate();
        collector.deactivate();
        collector.deactivate();
        assert_eq!(fx.bus.active_notices(), vec![(aware.clone(), true), (aware, false)]);
    }

    #[test]
    fn dropping_cancels_probe_and_unexports() {
        let fx = fixture();
        let at = RemoteRef::new("org.example.App", "/menu");
        fx.bus.publish_menu(at.clone(), file_menu());
        fx.bus.set_aware(at);
        let collector = collector(&fx);
        collector.add_menu("org.example.App", "/menu");
        assert_eq!(fx.bus.exported_paths().len(), 1);

        drop(collector);
        main_loop::run_until_idle();
        assert!(fx.bus.exported_paths().is_empty());
    }
}
