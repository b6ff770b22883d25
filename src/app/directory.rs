use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};

use super::registry::ApplicationSource;
use super::window::{Window, WindowId};
use crate::common::collections::BTreeMap;
use crate::common::error::HudError;
use crate::context::HudContext;
use crate::search::TokenList;
use crate::source::{
    ActivateEvent, AppEntry, CommandItem, SearchResult, Signal, Source, Subscription, ToolbarItem,
};

/// What the window tracker reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FocusEvent {
    WindowCreated {
        window: WindowId,
        app_id: String,
        #[serde(default)]
        title: String,
    },
    WindowDestroyed {
        window: WindowId,
    },
    WindowFocused {
        window: WindowId,
        app_id: String,
        #[serde(default)]
        title: String,
        /// Focus moved in the side stage rather than the main stage.
        #[serde(default)]
        side_stage: bool,
    },
}

struct Application {
    source: Rc<ApplicationSource>,
    _changed: Subscription,
}

#[derive(Default)]
struct State {
    // registration order
    apps: Vec<Application>,
    windows: BTreeMap<WindowId, Rc<Window>>,
    focused: Option<Rc<ApplicationSource>>,
    side_stage: Option<Rc<ApplicationSource>>,
    use_count: u32,
    activated: Option<Rc<ApplicationSource>>,
}

/// Every known application, and which one has focus.
pub struct ApplicationDirectory {
    ctx: Rc<HudContext>,
    state: RefCell<State>,
    changed: Signal,
    weak_self: Weak<Self>,
}

impl ApplicationDirectory {
    pub fn new(ctx: &Rc<HudContext>) -> Rc<Self> {
        Rc::new_cyclic(|weak_self| Self {
            ctx: ctx.clone(),
            state: RefCell::new(State::default()),
            changed: Signal::new(),
            weak_self: weak_self.clone(),
        })
    }

    #[instrument(skip(self))]
    pub fn handle_focus_event(&self, event: FocusEvent) -> Result<(), HudError> {
        match event {
            FocusEvent::WindowCreated { window, app_id, title } => {
                if self.is_ignored(&app_id, &title) {
                    trace!("ignoring window");
                    return Ok(());
                }
                let window = self.window(window, &app_id, &title);
                self.get_source(&app_id)?.add_window(&window);
            }
            FocusEvent::WindowDestroyed { window } => self.window_destroyed(window),
            FocusEvent::WindowFocused { window, app_id, title, side_stage } => {
                if self.is_ignored(&app_id, &title) {
                    trace!("ignoring focus change");
                    return Ok(());
                }
                let window = self.window(window, &app_id, &title);
                let app = self.get_source(&app_id)?;
                app.focus(&window);
                self.set_focused(app, side_stage);
            }
        }
        Ok(())
    }

    fn is_ignored(&self, app_id: &str, title: &str) -> bool {
        self.ctx.is_ignored_window(app_id) || self.ctx.is_ignored_window(title)
    }

    fn window(&self, id: WindowId, app_id: &str, title: &str) -> Rc<Window> {
        let mut state = self.state.borrow_mut();
        let window = state.windows.entry(id).or_insert_with(|| Window::new(id, app_id, title));
        if !title.is_empty() {
            window.set_title(title);
        }
        window.clone()
    }

    fn window_destroyed(&self, id: WindowId) {
        let Some(window) = self.state.borrow_mut().windows.remove(&id) else {
            debug!(window = id, "unknown window destroyed");
            return;
        };
        let app_id = window.app_id().to_string();
        // registries forget the window here
        drop(window);

        let (reaped, focus_lost) = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let position = state.apps.iter().position(|a| {
                a.source.id() == app_id && a.source.is_empty() && !a.source.has_live_windows()
            });
            let Some(position) = position else { return };
            let app = state.apps.remove(position);
            let mut focus_lost = false;
            for slot in [&mut state.focused, &mut state.side_stage] {
                if slot.as_ref().is_some_and(|f| Rc::ptr_eq(f, &app.source)) {
                    *slot = None;
                    focus_lost = true;
                }
            }
            (app, focus_lost)
        };
        info!(app_id, "application has no windows left");
        if focus_lost {
            self.sync_activation();
        }
        drop(reaped);
        self.changed.notify();
    }

    fn set_focused(&self, app: Rc<ApplicationSource>, side_stage: bool) {
        let changed = {
            let mut state = self.state.borrow_mut();
            let slot = if side_stage { &mut state.side_stage } else { &mut state.focused };
            let changed = !slot.as_ref().is_some_and(|f| Rc::ptr_eq(f, &app));
            *slot = Some(app.clone());
            changed
        };
        if changed {
            debug!(app_id = app.id(), side_stage, "focus changed");
            self.sync_activation();
        }
        self.changed.notify();
    }

    /// Our one activation sits on the focused application.
    fn sync_activation(&self) {
        let (release, acquire) = {
            let mut state = self.state.borrow_mut();
            let want = if state.use_count > 0 { state.focused.clone() } else { None };
            let same = match (&state.activated, &want) {
                (Some(a), Some(b)) => Rc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            if same {
                return;
            }
            let release = std::mem::replace(&mut state.activated, want.clone());
            (release, want)
        };
        if let Some(app) = release {
            app.deactivate();
        }
        if let Some(app) = acquire {
            app.activate();
        }
    }

    /// The registry for `app_id`, created on first use.
    pub fn get_source(&self, app_id: &str) -> Result<Rc<ApplicationSource>, HudError> {
        if app_id.is_empty() {
            return Err(HudError::EmptyAppId);
        }
        if let Some(app) = self.find(app_id) {
            return Ok(app);
        }
        let source = ApplicationSource::new(&self.ctx, app_id)?;
        let weak = self.weak_self.clone();
        let changed = source.changed().connect(move |_| {
            if let Some(this) = weak.upgrade() {
                this.changed.notify();
            }
        });
        self.state.borrow_mut().apps.push(Application {
            source: source.clone(),
            _changed: changed,
        });
        self.changed.notify();
        Ok(source)
    }

    pub fn find(&self, app_id: &str) -> Option<Rc<ApplicationSource>> {
        self.state.borrow().apps.iter().find(|a| a.source.id() == app_id).map(|a| a.source.clone())
    }

    pub fn find_by_path(&self, path: &str) -> Option<Rc<ApplicationSource>> {
        self.state.borrow().apps.iter().find(|a| a.source.path() == path).map(|a| a.source.clone())
    }

    pub fn focused_app(&self) -> Option<Rc<ApplicationSource>> { self.state.borrow().focused.clone() }

    pub fn side_stage_focused_app(&self) -> Option<Rc<ApplicationSource>> {
        self.state.borrow().side_stage.clone()
    }

    pub fn apps(&self) -> Vec<Rc<ApplicationSource>> {
        self.state.borrow().apps.iter().map(|a| a.source.clone()).collect()
    }

    pub fn window_app(&self, window: WindowId) -> Option<String> {
        self.state.borrow().windows.get(&window).map(|w| w.app_id().to_string())
    }
}

impl Drop for ApplicationDirectory {
    fn drop(&mut self) {
        if let Some(app) = self.state.get_mut().activated.take() {
            app.deactivate();
        }
    }
}

impl Source for ApplicationDirectory {
    fn activate(&self) {
        self.state.borrow_mut().use_count += 1;
        self.sync_activation();
    }

    fn deactivate(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.use_count == 0 {
                warn!("unbalanced deactivate");
                return;
            }
            state.use_count -= 1;
        }
        self.sync_activation();
    }

    fn search(&self, query: &TokenList, results: &mut Vec<SearchResult>) {
        if let Some(app) = self.focused_app() {
            app.search(query, results);
        }
    }

    /// Background applications first, the focused one last.
    fn list_applications(&self, query: &TokenList, apps: &mut Vec<AppEntry>) {
        let focused = self.focused_app();
        for app in self.apps() {
            if focused.as_ref().is_some_and(|f| Rc::ptr_eq(f, &app)) {
                continue;
            }
            app.list_applications(query, apps);
        }
        if let Some(app) = focused {
            app.list_applications(query, apps);
        }
    }

    fn get(self: Rc<Self>, app_id: &str) -> Option<Rc<dyn Source>> {
        self.find(app_id).map(|app| app as Rc<dyn Source>)
    }

    fn snapshot_items(&self) -> Vec<Rc<CommandItem>> {
        self.focused_app().map(|app| app.snapshot_items()).unwrap_or_default()
    }

    fn toolbar_entries(&self, entries: &mut Vec<ToolbarItem>) {
        if let Some(app) = self.focused_app() {
            app.toolbar_entries(entries);
        }
    }

    fn activate_toolbar(&self, item: ToolbarItem, event: &ActivateEvent) {
        if let Some(app) = self.focused_app() {
            app.activate_toolbar(item, event);
        }
    }

    fn changed(&self) -> &Signal { &self.changed }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::remote::{LocalBus, MenuEntry, SimpleActionGroup, SimpleMenu};

    fn directory() -> Rc<ApplicationDirectory> {
        ApplicationDirectory::new(&HudContext::in_memory(LocalBus::new()))
    }

    fn focus(window: WindowId, app_id: &str) -> FocusEvent {
        FocusEvent::WindowFocused {
            window,
            app_id: app_id.into(),
            title: format!("{app_id} window"),
            side_stage: false,
        }
    }

    fn with_menu(app: &ApplicationSource, label: &str) {
        app.add_action_group(0, None, SimpleActionGroup::with_actions(["run"]), Some("app"));
        app.add_menu_model(0, None, SimpleMenu::from_entries(vec![MenuEntry::item(label, "app.run")]));
    }

    #[test]
    fn focus_creates_and_tracks_applications() {
        let dir = directory();
        dir.handle_focus_event(focus(1, "gedit")).unwrap();
        dir.handle_focus_event(focus(2, "gimp")).unwrap();
        assert_eq!(dir.focused_app().unwrap().id(), "gimp");
        assert_eq!(dir.apps().len(), 2);
        assert!(dir.find("gedit").unwrap().has_window(1));
        assert!(dir.side_stage_focused_app().is_none());
    }

    #[test]
    fn ignored_windows_do_not_take_focus() {
        let dir = directory();
        dir.handle_focus_event(focus(1, "gedit")).unwrap();
        dir.handle_focus_event(FocusEvent::WindowFocused {
            window: 9,
            app_id: "unity".into(),
            title: "Hud".into(),
            side_stage: false,
        })
        .unwrap();
        assert_eq!(dir.focused_app().unwrap().id(), "gedit");
        assert!(dir.find("unity").is_none());
    }

    #[test]
    fn side_stage_is_tracked_separately() {
        let dir = directory();
        dir.handle_focus_event(focus(1, "gedit")).unwrap();
        dir.handle_focus_event(FocusEvent::WindowFocused {
            window: 2,
            app_id: "calc".into(),
            title: String::new(),
            side_stage: true,
        })
        .unwrap();
        assert_eq!(dir.focused_app().unwrap().id(), "gedit");
        assert_eq!(dir.side_stage_focused_app().unwrap().id(), "calc");
    }

    #[test]
    fn activation_moves_with_focus() {
        let dir = directory();
        let gedit = dir.get_source("gedit").unwrap();
        let gimp = dir.get_source("gimp").unwrap();
        with_menu(&gedit, "Save");
        with_menu(&gimp, "Crop");

        dir.activate();
        dir.handle_focus_event(focus(1, "gedit")).unwrap();
        let mut results = Vec::new();
        dir.search(&TokenList::parse("save"), &mut results);
        assert_eq!(results.len(), 1);

        dir.handle_focus_event(focus(2, "gimp")).unwrap();
        results.clear();
        dir.search(&TokenList::parse("save"), &mut results);
        assert!(results.is_empty());
        dir.deactivate();
    }

    #[test]
    fn focused_application_is_listed_last() {
        let dir = directory();
        for app_id in ["gedit", "gimp", "calc"] {
            with_menu(&dir.get_source(app_id).unwrap(), "Run");
        }
        dir.handle_focus_event(focus(1, "gedit")).unwrap();
        let mut apps = Vec::new();
        dir.list_applications(&TokenList::parse("run"), &mut apps);
        let ids: Vec<&str> = apps.iter().map(|a| a.app_id.as_str()).collect();
        assert_eq!(ids, vec!["gimp", "calc", "gedit"]);
        assert!(dir.clone().get("calc").is_some());
        assert!(dir.clone().get("xterm").is_none());
    }

    #[test]
    fn destroyed_window_reaps_empty_application() {
        let dir = directory();
        dir.handle_focus_event(FocusEvent::WindowCreated {
            window: 4,
            app_id: "xterm".into(),
            title: String::new(),
        })
        .unwrap();
        dir.handle_focus_event(focus(4, "xterm")).unwrap();
        let keeper = dir.get_source("gedit").unwrap();
        with_menu(&keeper, "Save");

        dir.handle_focus_event(FocusEvent::WindowDestroyed { window: 4 }).unwrap();
        assert!(dir.find("xterm").is_none());
        assert!(dir.focused_app().is_none());
        assert!(dir.find("gedit").is_some());
        assert_eq!(dir.get_source("").err(), Some(HudError::EmptyAppId));
    }
}
