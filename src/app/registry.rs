//! One application: its windows, their contexts, and which context is
//! visible to searches.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};

use super::window::{Window, WindowId};
use crate::collector::{CollectorOptions, LegacyCollector, MenuModelCollector};
use crate::common::collections::{BTreeMap, BTreeSet};
use crate::common::error::HudError;
use crate::context::{HudContext, path_segment};
use crate::remote::{ActionGroup, Export, Exported, MenuModel, RemoteError};
use crate::search::TokenList;
use crate::source::{
    ActivateEvent, AppEntry, CommandItem, SearchResult, Signal, Source, SourceList, Subscription,
    ToolbarItem,
};

const MAX_PATH_SUFFIX: u32 = 1000;

/// `(window, context)`; window 0 is every window, `None` the default context.
pub type ContextKey = (WindowId, Option<String>);

fn context_key(window: WindowId, context: Option<&str>) -> ContextKey {
    (window, context.filter(|c| !c.is_empty()).map(str::to_string))
}

/// An action group a client asks to have indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSourceSpec {
    pub window: WindowId,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub prefix: String,
    pub path: String,
}

/// A menu model a client asks to have indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuSourceSpec {
    pub window: WindowId,
    #[serde(default)]
    pub context: String,
    pub path: String,
}

struct ContextEntry {
    sources: Rc<SourceList>,
    menus: Option<Rc<MenuModelCollector>>,
    legacy: Option<Rc<LegacyCollector>>,
    _changed: Subscription,
}

struct SenderWatch {
    _watch: Subscription,
    contexts: BTreeSet<ContextKey>,
}

#[derive(Default)]
struct State {
    contexts: BTreeMap<ContextKey, ContextEntry>,
    // absent means the default context
    active: BTreeMap<WindowId, String>,
    focused: WindowId,
    use_count: u32,
    // the entry currently holding our one activation
    activated: Option<(ContextKey, Rc<SourceList>)>,
    windows: BTreeMap<WindowId, Weak<Window>>,
    senders: BTreeMap<String, SenderWatch>,
}

impl State {
    fn visible(&self) -> Option<ContextKey> {
        let own = (self.focused, self.active.get(&self.focused).cloned());
        if self.focused != 0 && self.contexts.contains_key(&own) {
            return Some(own);
        }
        let all = (0, self.active.get(&0).cloned());
        self.contexts.contains_key(&all).then_some(all)
    }
}

/// Dump of one context entry.
pub struct ContextInfo {
    pub window: WindowId,
    pub context: Option<String>,
    pub visible: bool,
    pub items: Vec<Rc<CommandItem>>,
}

pub struct ApplicationSource {
    ctx: Rc<HudContext>,
    app_id: String,
    icon: String,
    export: Export,
    state: RefCell<State>,
    changed: Signal,
    weak_self: Weak<Self>,
}

impl ApplicationSource {
    /// Exports the application at `{base}/applications/{app_id}`, or with a
    /// `_N` suffix if that path is taken.
    pub fn new(ctx: &Rc<HudContext>, app_id: &str) -> Result<Rc<Self>, HudError> {
        if app_id.is_empty() {
            return Err(HudError::EmptyAppId);
        }
        let base = format!("{}/applications/{}", ctx.export_base(), path_segment(app_id));
        let export = export_application(ctx, &base, app_id)?;
        let icon = ctx.app_info.icon(app_id).unwrap_or_default();
        info!(app_id, path = export.path(), "new application");
        Ok(Rc::new_cyclic(|weak_self| Self {
            ctx: ctx.clone(),
            app_id: app_id.to_string(),
            icon,
            export,
            state: RefCell::new(State::default()),
            changed: Signal::new(),
            weak_self: weak_self.clone(),
        }))
    }

    pub fn path(&self) -> &str { self.export.path() }

    pub fn id(&self) -> &str { &self.app_id }

    pub fn icon(&self) -> &str { &self.icon }

    pub fn is_empty(&self) -> bool { self.state.borrow().contexts.is_empty() }

    pub fn has_window(&self, window: WindowId) -> bool {
        let state = self.state.borrow();
        state.windows.contains_key(&window) || state.contexts.keys().any(|(w, _)| *w == window)
    }

    pub fn has_live_windows(&self) -> bool {
        self.state.borrow().windows.values().any(|w| w.strong_count() > 0)
    }

    pub fn focused_window(&self) -> WindowId { self.state.borrow().focused }

    pub fn active_context(&self, window: WindowId) -> Option<String> {
        self.state.borrow().active.get(&window).cloned()
    }

    fn context_path(&self, key: &ContextKey) -> String {
        match &key.1 {
            None => format!("{}/window{}", self.path(), key.0),
            Some(context) => format!("{}/window{}/context_{}", self.path(), key.0, path_segment(context)),
        }
    }

    fn visible_sources(&self) -> Option<Rc<SourceList>> {
        let state = self.state.borrow();
        let key = state.visible()?;
        state.contexts.get(&key).map(|entry| entry.sources.clone())
    }

    fn is_visible(&self, key: &ContextKey) -> bool {
        self.state.borrow().visible().as_ref() == Some(key)
    }

    /// Creates the entry for `key` if needed. Returns whether it did.
    fn ensure_entry(&self, key: &ContextKey) -> bool {
        if self.state.borrow().contexts.contains_key(key) {
            return false;
        }
        let sources = SourceList::new();
        let weak = self.weak_self.clone();
        let watched = key.clone();
        let changed = sources.changed().connect(move |_| {
            if let Some(this) = weak.upgrade() {
                if this.is_visible(&watched) {
                    this.changed.notify();
                }
            }
        });
        debug!(app_id = self.app_id, window = key.0, context = ?key.1, "new context");
        self.state.borrow_mut().contexts.insert(key.clone(), ContextEntry {
            sources,
            menus: None,
            legacy: None,
            _changed: changed,
        });
        true
    }

    fn menus_for(&self, key: &ContextKey) -> Rc<MenuModelCollector> {
        let created = self.ensure_entry(key);
        let existing = self.state.borrow().contexts.get(key).and_then(|e| e.menus.clone());
        if let Some(menus) = existing {
            return menus;
        }
        let options = CollectorOptions {
            export_path: Some(self.context_path(key)),
            ..CollectorOptions::new(&self.app_id, &self.icon)
        };
        let collector = MenuModelCollector::new(&self.ctx, options);
        let sources = {
            let mut state = self.state.borrow_mut();
            let entry = state.contexts.get_mut(key);
            entry.map(|entry| {
                entry.menus = Some(collector.clone());
                entry.sources.clone()
            })
        };
        if let Some(sources) = sources {
            sources.add(collector.clone());
        }
        if created {
            self.visibility_changed();
        }
        collector
    }

    pub fn add_action_group(
        &self,
        window: WindowId,
        context: Option<&str>,
        group: Rc<dyn ActionGroup>,
        prefix: Option<&str>,
    ) {
        let key = context_key(window, context);
        self.menus_for(&key).add_actions(group, prefix);
    }

    pub fn add_menu_model(&self, window: WindowId, context: Option<&str>, model: Rc<dyn MenuModel>) {
        let key = context_key(window, context);
        self.menus_for(&key).add_model(model, None, self.ctx.depth());
    }

    /// Indexes objects published by `sender`. Action groups go first so the
    /// menus that refer to them resolve on their first walk.
    #[instrument(skip_all, fields(app_id = %self.app_id, sender))]
    pub fn add_sources(&self, sender: &str, actions: &[ActionSourceSpec], menus: &[MenuSourceSpec]) {
        for spec in actions {
            let key = context_key(spec.window, Some(&spec.context));
            let prefix = Some(spec.prefix.as_str());
            if !self.menus_for(&key).add_remote_actions(sender, &spec.path, prefix) {
                warn!(path = spec.path, "action group not found");
            }
            self.watch_sender(sender, key);
        }
        for spec in menus {
            let key = context_key(spec.window, Some(&spec.context));
            if !self.menus_for(&key).add_menu(sender, &spec.path) {
                warn!(path = spec.path, "menu not found");
            }
            self.watch_sender(sender, key);
        }
    }

    /// Indexes a window's legacy menu in its default context, replacing any
    /// earlier one.
    pub fn add_legacy_menu(&self, window: WindowId, bus_name: &str, path: &str) -> bool {
        let options = CollectorOptions::new(&self.app_id, &self.icon);
        let Some(collector) = LegacyCollector::for_remote(&self.ctx, options, bus_name, path) else {
            return false;
        };
        let key = context_key(window, None);
        let created = self.ensure_entry(&key);
        let (sources, old) = {
            let mut state = self.state.borrow_mut();
            let Some(entry) = state.contexts.get_mut(&key) else { return false };
            (entry.sources.clone(), entry.legacy.replace(collector.clone()))
        };
        if let Some(old) = old {
            let old: Rc<dyn Source> = old;
            sources.remove(&old);
        }
        sources.add(collector);
        self.watch_sender(bus_name, key);
        if created {
            self.visibility_changed();
        }
        true
    }

    fn watch_sender(&self, sender: &str, key: ContextKey) {
        let mut state = self.state.borrow_mut();
        if let Some(watch) = state.senders.get_mut(sender) {
            watch.contexts.insert(key);
            return;
        }
        let weak = self.weak_self.clone();
        let name = sender.to_string();
        let handler: Rc<dyn Fn(bool)> = Rc::new(move |owned| {
            if owned {
                return;
            }
            if let Some(this) = weak.upgrade() {
                this.sender_vanished(&name);
            }
        });
        let watch = self.ctx.bus.watch_name(sender, handler);
        state.senders.insert(sender.to_string(), SenderWatch {
            _watch: watch,
            contexts: BTreeSet::from([key]),
        });
    }

    fn sender_vanished(&self, sender: &str) {
        let Some(watch) = self.state.borrow_mut().senders.remove(sender) else { return };
        info!(app_id = self.app_id, sender, contexts = watch.contexts.len(), "client vanished");
        let contexts = watch.contexts.clone();
        self.evict(|key| contexts.contains(key));
        drop(watch);
    }

    /// Removes every matching entry. An entry holding our activation is
    /// released here, once.
    fn evict(&self, doomed: impl Fn(&ContextKey) -> bool) {
        let (removed, released) = {
            let mut state = self.state.borrow_mut();
            let keys: Vec<ContextKey> = state.contexts.keys().filter(|k| doomed(k)).cloned().collect();
            let removed: Vec<ContextEntry> =
                keys.iter().filter_map(|k| state.contexts.remove(k)).collect();
            let released = match &state.activated {
                Some((key, _)) if doomed(key) => state.activated.take(),
                _ => None,
            };
            for watch in state.senders.values_mut() {
                watch.contexts.retain(|k| !doomed(k));
            }
            (removed, released)
        };
        if let Some((key, sources)) = released {
            trace!(app_id = self.app_id, window = key.0, "releasing evicted context");
            sources.deactivate();
        }
        if removed.is_empty() {
            return;
        }
        debug!(app_id = self.app_id, removed = removed.len(), "evicted contexts");
        drop(removed);
        self.sync_activation();
        self.changed.notify();
    }

    pub fn add_window(&self, window: &Rc<Window>) {
        let Some(this) = self.weak_self.upgrade() else { return };
        window.observe(&this);
        self.state.borrow_mut().windows.insert(window.id(), Rc::downgrade(window));
    }

    /// Forgets `window` and every context entry it had.
    pub fn remove_window(&self, window: WindowId) {
        {
            let mut state = self.state.borrow_mut();
            state.windows.remove(&window);
            if window != 0 {
                state.active.remove(&window);
            }
        }
        self.evict(|key| key.0 == window);
    }

    pub fn focus(&self, window: &Rc<Window>) {
        self.add_window(window);
        let before = {
            let mut state = self.state.borrow_mut();
            let before = state.visible();
            state.focused = window.id();
            before
        };
        trace!(app_id = self.app_id, window = window.id(), "focused");
        if before != self.state.borrow().visible() {
            self.visibility_changed();
        }
    }

    /// Makes `context` (`None` or empty for the default) the visible one for
    /// `window`. Both entries stay intact.
    pub fn set_active_context(&self, window: WindowId, context: Option<&str>) {
        let before = {
            let mut state = self.state.borrow_mut();
            let before = state.visible();
            match context.filter(|c| !c.is_empty()) {
                Some(context) => state.active.insert(window, context.to_string()),
                None => state.active.remove(&window),
            };
            before
        };
        debug!(app_id = self.app_id, window, ?context, "context switched");
        if before != self.state.borrow().visible() {
            self.visibility_changed();
        }
    }

    pub fn set_window_context(&self, window: WindowId, context: Option<&str>) {
        self.set_active_context(window, context);
    }

    fn visibility_changed(&self) {
        self.sync_activation();
        self.changed.notify();
    }

    /// Moves our activation to the visible entry, or drops it when unused.
    fn sync_activation(&self) {
        let (release, acquire) = {
            let mut state = self.state.borrow_mut();
            let want = if state.use_count > 0 { state.visible() } else { None };
            if state.activated.as_ref().map(|(key, _)| key) == want.as_ref() {
                return;
            }
            let release = state.activated.take();
            let acquire = want.and_then(|key| {
                let sources = state.contexts.get(&key)?.sources.clone();
                Some((key, sources))
            });
            state.activated = acquire.clone();
            (release, acquire)
        };
        if let Some((_, sources)) = release {
            sources.deactivate();
        }
        if let Some((_, sources)) = acquire {
            sources.activate();
        }
    }

    pub fn contexts(&self) -> Vec<ContextInfo> {
        let state = self.state.borrow();
        let visible = state.visible();
        state
            .contexts
            .iter()
            .map(|(key, entry)| ContextInfo {
                window: key.0,
                context: key.1.clone(),
                visible: visible.as_ref() == Some(key),
                items: entry.sources.snapshot_items(),
            })
            .collect()
    }
}

fn export_application(ctx: &HudContext, base: &str, app_id: &str) -> Result<Export, HudError> {
    let object = || Exported::Application(app_id.to_string());
    let candidates =
        std::iter::once(base.to_string()).chain((1..=MAX_PATH_SUFFIX).map(|n| format!("{base}_{n}")));
    for path in candidates {
        match Export::new(&ctx.bus, &path, object()) {
            Ok(export) => return Ok(export),
            Err(RemoteError::Exists(_)) => continue,
            Err(e) => {
                warn!(app_id, "unable to export application: {e}");
                return Err(HudError::NoApplicationPath);
            }
        }
    }
    Err(HudError::NoApplicationPath)
}

impl Drop for ApplicationSource {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some((_, sources)) = state.activated.take() {
            sources.deactivate();
        }
        let windows: Vec<Rc<Window>> = state.windows.values().filter_map(Weak::upgrade).collect();
        for window in windows {
            window.forget(self);
        }
    }
}

impl Source for ApplicationSource {
    fn activate(&self) {
        self.state.borrow_mut().use_count += 1;
        self.sync_activation();
    }

    fn deactivate(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.use_count == 0 {
                warn!(app_id = self.app_id, "unbalanced deactivate");
                return;
            }
            state.use_count -= 1;
        }
        self.sync_activation();
    }

    fn search(&self, query: &TokenList, results: &mut Vec<SearchResult>) {
        if let Some(sources) = self.visible_sources() {
            sources.search(query, results);
        }
    }

    fn list_applications(&self, query: &TokenList, apps: &mut Vec<AppEntry>) {
        if let Some(sources) = self.visible_sources() {
            sources.list_applications(query, apps);
        }
    }

    fn get(self: Rc<Self>, app_id: &str) -> Option<Rc<dyn Source>> {
        (self.app_id == app_id).then(|| self as Rc<dyn Source>)
    }

    fn snapshot_items(&self) -> Vec<Rc<CommandItem>> {
        self.visible_sources().map(|s| s.snapshot_items()).unwrap_or_default()
    }

    fn toolbar_entries(&self, entries: &mut Vec<ToolbarItem>) {
        if let Some(sources) = self.visible_sources() {
            sources.toolbar_entries(entries);
        }
    }

    fn activate_toolbar(&self, item: ToolbarItem, event: &ActivateEvent) {
        if let Some(sources) = self.visible_sources() {
            sources.activate_toolbar(item, event);
        }
    }

    fn app_id(&self) -> Option<String> { Some(self.app_id.clone()) }

    fn app_icon(&self) -> Option<String> { Some(self.icon.clone()) }

    fn changed(&self) -> &Signal { &self.changed }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::remote::{LocalBus, MenuEntry, RemoteRef, SimpleActionGroup, SimpleMenu};
    use crate::sys::main_loop;

    fn labels(source: &dyn Source) -> Vec<String> {
        let mut labels: Vec<String> =
            source.snapshot_items().iter().map(|i| i.label_path().join(" > ")).collect();
        labels.sort();
        labels
    }

    fn app(bus: &Rc<LocalBus>) -> Rc<ApplicationSource> {
        let ctx = HudContext::in_memory(bus.clone());
        ApplicationSource::new(&ctx, "gedit").unwrap()
    }

    fn add_menu(app: &ApplicationSource, window: WindowId, context: Option<&str>, label: &str) {
        let group = SimpleActionGroup::with_actions(["run"]);
        app.add_action_group(window, context, group, Some("app"));
        app.add_menu_model(window, context, SimpleMenu::from_entries(vec![MenuEntry::item(label, "app.run")]));
    }

    #[test]
    fn context_switch_round_trips() {
        let bus = LocalBus::new();
        let app = app(&bus);
        add_menu(&app, 1, None, "Save");
        add_menu(&app, 1, Some("editing"), "Undo");
        let window = Window::new(1, "gedit", "doc");
        app.focus(&window);
        assert_eq!(labels(&*app), vec!["Save"]);

        app.set_active_context(1, Some("editing"));
        assert_eq!(labels(&*app), vec!["Undo"]);
        app.set_active_context(1, None);
        assert_eq!(labels(&*app), vec!["Save"]);
    }

    #[test]
    fn window_without_entries_falls_back_to_all_windows() {
        let bus = LocalBus::new();
        let app = app(&bus);
        add_menu(&app, 0, None, "Quit");
        let window = Window::new(7, "gedit", "doc");
        app.focus(&window);
        assert_eq!(labels(&*app), vec!["Quit"]);
        add_menu(&app, 7, None, "Close");
        assert_eq!(labels(&*app), vec!["Close"]);
    }

    #[test]
    fn path_collisions_get_a_suffix() {
        let bus = LocalBus::new();
        let ctx = HudContext::in_memory(bus.clone());
        let first = ApplicationSource::new(&ctx, "org.gnome.gedit").unwrap();
        let second = ApplicationSource::new(&ctx, "org.gnome.gedit").unwrap();
        let third = ApplicationSource::new(&ctx, "org.gnome.gedit").unwrap();
        assert_eq!(first.path(), "/com/canonical/hud/applications/org_gnome_gedit");
        assert_eq!(second.path(), "/com/canonical/hud/applications/org_gnome_gedit_1");
        assert_eq!(third.path(), "/com/canonical/hud/applications/org_gnome_gedit_2");
        assert_eq!(ApplicationSource::new(&ctx, "").err(), Some(HudError::EmptyAppId));
    }

    #[test]
    fn activation_follows_the_visible_entry() {
        let bus = LocalBus::new();
        let app = app(&bus);
        add_menu(&app, 1, None, "Save");
        add_menu(&app, 1, Some("editing"), "Undo");
        let window = Window::new(1, "gedit", "doc");
        app.focus(&window);
        let collector = |context: Option<&str>| {
            let key = context_key(1, context);
            app.state.borrow().contexts[&key].menus.clone().unwrap()
        };

        app.activate();
        assert_eq!((collector(None).use_count(), collector(Some("editing")).use_count()), (1, 0));
        app.set_active_context(1, Some("editing"));
        assert_eq!((collector(None).use_count(), collector(Some("editing")).use_count()), (0, 1));
        app.deactivate();
        assert_eq!((collector(None).use_count(), collector(Some("editing")).use_count()), (0, 0));
    }

    #[test]
    fn destroyed_window_evicts_and_releases_once() {
        let bus = LocalBus::new();
        let app = app(&bus);
        add_menu(&app, 1, None, "Save");
        add_menu(&app, 1, Some("editing"), "Undo");
        let window = Window::new(1, "gedit", "doc");
        app.focus(&window);
        let collector = app.state.borrow().contexts[&context_key(1, None)].menus.clone().unwrap();

        app.activate();
        assert_eq!(collector.use_count(), 1);
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let _sub = app.changed().connect(move |_| h.set(h.get() + 1));

        drop(window);
        assert_eq!(collector.use_count(), 0);
        assert!(app.is_empty());
        assert_eq!(hits.get(), 1);
        // a second removal from the other side is a no-op
        app.remove_window(1);
        assert_eq!(hits.get(), 1);
        app.deactivate();
        assert_eq!(collector.use_count(), 0);
    }

    #[test]
    fn registry_dropped_before_window() {
        let bus = LocalBus::new();
        let app = app(&bus);
        let window = Window::new(3, "gedit", "doc");
        app.focus(&window);
        drop(app);
        drop(window);
    }

    #[test]
    fn sources_of_vanished_client_are_evicted() {
        let bus = LocalBus::new();
        let app = app(&bus);
        bus.publish_actions(RemoteRef::new(":1.42", "/org/gnome/gedit"), SimpleActionGroup::with_actions(["save"]));
        bus.publish_menu(
            RemoteRef::new(":1.42", "/org/gnome/gedit/menus/menubar"),
            SimpleMenu::from_entries(vec![MenuEntry::submenu(
                "File",
                SimpleMenu::from_entries(vec![MenuEntry::item("Save", "app.save")]),
            )]),
        );
        app.add_sources(
            ":1.42",
            &[ActionSourceSpec { window: 0, context: String::new(), prefix: "app".into(), path: "/org/gnome/gedit".into() }],
            &[MenuSourceSpec { window: 0, context: String::new(), path: "/org/gnome/gedit/menus/menubar".into() }],
        );
        assert_eq!(labels(&*app), vec!["File > Save"]);
        let exported = bus.exported_paths();
        assert!(exported.contains(&format!("{}/window0", app.path())));

        main_loop::run_until_idle();
        bus.release_name(":1.42");
        assert!(app.is_empty());
        assert!(!bus.exported_paths().contains(&format!("{}/window0", app.path())));
    }

    #[test]
    fn search_sees_only_the_visible_entry() {
        let bus = LocalBus::new();
        let app = app(&bus);
        add_menu(&app, 1, None, "Save");
        add_menu(&app, 2, None, "Print");
        let window = Window::new(2, "gedit", "other");
        app.focus(&window);
        let mut results = Vec::new();
        app.search(&TokenList::parse("save"), &mut results);
        assert!(results.is_empty());
        app.search(&TokenList::parse("print"), &mut results);
        assert_eq!(results.len(), 1);
    }
}
