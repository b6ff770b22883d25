use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::trace;

use super::registry::ApplicationSource;

pub type WindowId = u32;

/// A top-level window as reported by the focus feed.
///
/// Registries that know the window are observers, never owners: when the
/// last handle goes away every live observer is told to forget it. A
/// registry that went away first is simply skipped.
pub struct Window {
    id: WindowId,
    app_id: String,
    title: RefCell<String>,
    observers: RefCell<Vec<Weak<ApplicationSource>>>,
}

impl Window {
    pub fn new(id: WindowId, app_id: &str, title: &str) -> Rc<Self> {
        Rc::new(Self {
            id,
            app_id: app_id.to_string(),
            title: RefCell::new(title.to_string()),
            observers: RefCell::new(Vec::new()),
        })
    }

    pub fn id(&self) -> WindowId { self.id }

    pub fn app_id(&self) -> &str { &self.app_id }

    pub fn title(&self) -> String { self.title.borrow().clone() }

    pub fn set_title(&self, title: &str) { *self.title.borrow_mut() = title.to_string(); }

    pub(crate) fn observe(&self, registry: &Rc<ApplicationSource>) {
        let mut observers = self.observers.borrow_mut();
        observers.retain(|o| o.strong_count() > 0);
        if !observers.iter().any(|o| std::ptr::eq(o.as_ptr(), Rc::as_ptr(registry))) {
            observers.push(Rc::downgrade(registry));
        }
    }

    pub(crate) fn forget(&self, registry: &ApplicationSource) {
        self.observers
            .borrow_mut()
            .retain(|o| o.strong_count() > 0 && !std::ptr::eq(o.as_ptr(), registry));
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        let observers = std::mem::take(self.observers.get_mut());
        trace!(window = self.id, observers = observers.len(), "window gone");
        for registry in observers.iter().filter_map(Weak::upgrade) {
            registry.remove_window(self.id);
        }
    }
}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.id)
            .field("app_id", &self.app_id)
            .field("title", &*self.title.borrow())
            .finish()
    }
}
