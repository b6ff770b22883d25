use std::cell::RefCell;
use std::future;
use std::rc::Rc;

use tracing::{debug, trace};

use super::{
    ActionGroup, LegacyMenu, LocalBoxFuture, MenuModel, RemoteError, RemoteRef, is_object_path,
};
use crate::common::collections::{BTreeMap, HashMap, HashSet};
use crate::source::{Signal, Subscription};
use crate::sys::main_loop;

/// Something this service publishes at an object path.
#[derive(Clone)]
pub enum Exported {
    Menu(Rc<dyn MenuModel>),
    Actions(Rc<dyn ActionGroup>),
    Application(String),
    Query(String),
}

impl Exported {
    fn kind(&self) -> &'static str {
        match self {
            Exported::Menu(_) => "menu",
            Exported::Actions(_) => "actions",
            Exported::Application(_) => "application",
            Exported::Query(_) => "query",
        }
    }
}

/// The message bus, as far as this service needs it.
pub trait RemoteBus {
    fn menu_model(&self, at: &RemoteRef) -> Option<Rc<dyn MenuModel>>;

    fn action_group(&self, at: &RemoteRef) -> Option<Rc<dyn ActionGroup>>;

    fn legacy_menu(&self, at: &RemoteRef) -> Option<Rc<dyn LegacyMenu>>;

    /// Asks the owner of a menu whether it wants active/inactive notices.
    fn check_awareness(&self, at: &RemoteRef) -> LocalBoxFuture<'static, Result<(), RemoteError>>;

    fn notify_active(&self, at: &RemoteRef, active: bool);

    fn export(&self, path: &str, object: Exported) -> Result<(), RemoteError>;

    fn unexport(&self, path: &str);

    /// `handler(true)` once the name has an owner (also for an owner present
    /// at watch time) and again whenever that owner publishes another
    /// object, `handler(false)` when it loses it.
    fn watch_name(&self, name: &str, handler: Rc<dyn Fn(bool)>) -> Subscription;
}

/// Unexports its path when dropped.
pub struct Export {
    bus: Rc<dyn RemoteBus>,
    path: String,
}

impl Export {
    pub fn new(bus: &Rc<dyn RemoteBus>, path: &str, object: Exported) -> Result<Self, RemoteError> {
        bus.export(path, object)?;
        Ok(Self { bus: bus.clone(), path: path.to_string() })
    }

    pub fn path(&self) -> &str { &self.path }
}

impl Drop for Export {
    fn drop(&mut self) { self.bus.unexport(&self.path); }
}

impl std::fmt::Debug for Export {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Export").field(&self.path).finish()
    }
}

#[derive(Default)]
struct NameEntry {
    owned: bool,
    watchers: Signal<bool>,
}

/// A bus living entirely inside this process.
///
/// Clients (or tests) publish their menus and action groups here directly.
#[derive(Default)]
pub struct LocalBus {
    menus: RefCell<HashMap<RemoteRef, Rc<dyn MenuModel>>>,
    actions: RefCell<HashMap<RemoteRef, Rc<dyn ActionGroup>>>,
    legacy: RefCell<HashMap<RemoteRef, Rc<dyn LegacyMenu>>>,
    aware: RefCell<HashSet<RemoteRef>>,
    active_notices: RefCell<Vec<(RemoteRef, bool)>>,
    exports: RefCell<BTreeMap<String, Exported>>,
    names: RefCell<HashMap<String, NameEntry>>,
}

impl LocalBus {
    pub fn new() -> Rc<Self> { Rc::new(Self::default()) }

    pub fn publish_menu(&self, at: RemoteRef, menu: Rc<dyn MenuModel>) {
        let name = at.bus_name.clone();
        self.menus.borrow_mut().insert(at, menu);
        self.announce(&name);
    }

    pub fn publish_actions(&self, at: RemoteRef, group: Rc<dyn ActionGroup>) {
        let name = at.bus_name.clone();
        self.actions.borrow_mut().insert(at, group);
        self.announce(&name);
    }

    pub fn publish_legacy_menu(&self, at: RemoteRef, menu: Rc<dyn LegacyMenu>) {
        let name = at.bus_name.clone();
        self.legacy.borrow_mut().insert(at, menu);
        self.announce(&name);
    }

    /// Claims `name` for a freshly published object, or tells the watchers
    /// of an existing owner that it has more to offer.
    fn announce(&self, name: &str) {
        let owned = {
            let names = self.names.borrow();
            names.get(name).filter(|entry| entry.owned).map(|entry| entry.watchers.clone())
        };
        match owned {
            Some(watchers) => {
                trace!(name, "owner published an object");
                watchers.emit(&true);
            }
            None => self.claim_name(name),
        }
    }

    /// Marks the menu at `at` as implementing the awareness interface.
    pub fn set_aware(&self, at: RemoteRef) { self.aware.borrow_mut().insert(at); }

    pub fn active_notices(&self) -> Vec<(RemoteRef, bool)> { self.active_notices.borrow().clone() }

    pub fn exported(&self, path: &str) -> Option<Exported> { self.exports.borrow().get(path).cloned() }

    pub fn exported_paths(&self) -> Vec<String> { self.exports.borrow().keys().cloned().collect() }

    pub fn claim_name(&self, name: &str) {
        let watchers = {
            let mut names = self.names.borrow_mut();
            let entry = names.entry(name.to_string()).or_default();
            if entry.owned {
                return;
            }
            entry.owned = true;
            entry.watchers.clone()
        };
        debug!(name, "name acquired");
        watchers.emit(&true);
    }

    /// Drops every object published under `name` and tells its watchers.
    pub fn release_name(&self, name: &str) {
        self.menus.borrow_mut().retain(|at, _| at.bus_name != name);
        self.actions.borrow_mut().retain(|at, _| at.bus_name != name);
        self.legacy.borrow_mut().retain(|at, _| at.bus_name != name);
        self.aware.borrow_mut().retain(|at| at.bus_name != name);

        let watchers = match self.names.borrow_mut().get_mut(name) {
            Some(entry) if entry.owned => {
                entry.owned = false;
                entry.watchers.clone()
            }
            _ => return,
        };
        debug!(name, "name vanished");
        watchers.emit(&false);
    }

    pub fn has_owner(&self, name: &str) -> bool {
        self.names.borrow().get(name).is_some_and(|entry| entry.owned)
    }
}

impl RemoteBus for LocalBus {
    fn menu_model(&self, at: &RemoteRef) -> Option<Rc<dyn MenuModel>> {
        self.menus.borrow().get(at).cloned()
    }

    fn action_group(&self, at: &RemoteRef) -> Option<Rc<dyn ActionGroup>> {
        self.actions.borrow().get(at).cloned()
    }

    fn legacy_menu(&self, at: &RemoteRef) -> Option<Rc<dyn LegacyMenu>> {
        self.legacy.borrow().get(at).cloned()
    }

    fn check_awareness(&self, at: &RemoteRef) -> LocalBoxFuture<'static, Result<(), RemoteError>> {
        let result = if self.aware.borrow().contains(at) {
            Ok(())
        } else {
            Err(RemoteError::NotAware(at.clone()))
        };
        Box::pin(future::ready(result))
    }

    fn notify_active(&self, at: &RemoteRef, active: bool) {
        trace!(%at, active, "active notice");
        self.active_notices.borrow_mut().push((at.clone(), active));
    }

    fn export(&self, path: &str, object: Exported) -> Result<(), RemoteError> {
        if !is_object_path(path) {
            return Err(RemoteError::InvalidPath(path.to_string()));
        }
        let mut exports = self.exports.borrow_mut();
        if exports.contains_key(path) {
            return Err(RemoteError::Exists(path.to_string()));
        }
        debug!(path, kind = object.kind(), "exported");
        exports.insert(path.to_string(), object);
        Ok(())
    }

    fn unexport(&self, path: &str) {
        if self.exports.borrow_mut().remove(path).is_some() {
            debug!(path, "unexported");
        }
    }

    fn watch_name(&self, name: &str, handler: Rc<dyn Fn(bool)>) -> Subscription {
        let (watchers, owned) = {
            let mut names = self.names.borrow_mut();
            let entry = names.entry(name.to_string()).or_default();
            (entry.watchers.clone(), entry.owned)
        };
        let h = handler.clone();
        let sub = watchers.connect(move |owned| h(*owned));

        // the current owner is reported from the loop, like a bus would
        let alive = Rc::new(());
        if owned {
            let weak = Rc::downgrade(&alive);
            main_loop::idle_add(move || {
                if weak.upgrade().is_some() {
                    handler(true);
                }
            });
        }
        Subscription::from_fn(move || {
            drop(sub);
            drop(alive);
        })
    }
}
