use std::cell::RefCell;
use std::rc::{Rc, Weak};

use slotmap::{SlotMap, new_key_type};

new_key_type! {
    pub struct HandlerId;
}

type Handler<A> = Rc<dyn Fn(&A)>;

/// A single-threaded notification point.
///
/// Handlers are snapshotted before being called, so a handler may connect,
/// disconnect or emit again without tripping over a borrow.
pub struct Signal<A = ()> {
    handlers: Rc<RefCell<SlotMap<HandlerId, Handler<A>>>>,
}

impl<A: 'static> Signal<A> {
    pub fn new() -> Self {
        Self {
            handlers: Rc::new(RefCell::new(SlotMap::default())),
        }
    }

    #[must_use = "dropping the subscription disconnects the handler"]
    pub fn connect(&self, handler: impl Fn(&A) + 'static) -> Subscription {
        let id = self.handlers.borrow_mut().insert(Rc::new(handler));
        let weak: Weak<RefCell<SlotMap<HandlerId, Handler<A>>>> = Rc::downgrade(&self.handlers);
        Subscription {
            disconnect: Some(Box::new(move || {
                if let Some(handlers) = weak.upgrade() {
                    handlers.borrow_mut().remove(id);
                }
            })),
        }
    }

    pub fn emit(&self, args: &A) {
        let snapshot: Vec<(HandlerId, Handler<A>)> =
            self.handlers.borrow().iter().map(|(id, h)| (id, h.clone())).collect();
        for (id, handler) in snapshot {
            // skip handlers disconnected by an earlier handler in this emission
            if self.handlers.borrow().contains_key(id) {
                handler(args);
            }
        }
    }

    pub fn handler_count(&self) -> usize { self.handlers.borrow().len() }
}

impl Signal<()> {
    pub fn notify(&self) { self.emit(&()); }
}

impl<A: 'static> Default for Signal<A> {
    fn default() -> Self { Self::new() }
}

/// Clones share one set of handlers.
impl<A> Clone for Signal<A> {
    fn clone(&self) -> Self { Self { handlers: self.handlers.clone() } }
}

/// Disconnects its handler when dropped.
pub struct Subscription {
    disconnect: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn detached() -> Self { Self { disconnect: None } }

    pub fn from_fn(disconnect: impl FnOnce() + 'static) -> Self {
        Self { disconnect: Some(Box::new(disconnect)) }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(disconnect) = self.disconnect.take() {
            disconnect();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("connected", &self.disconnect.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn emit_reaches_connected_handlers() {
        let signal = Signal::<u32>::new();
        let seen = Rc::new(Cell::new(0));
        let s = seen.clone();
        let _sub = signal.connect(move |v| s.set(s.get() + *v));
        signal.emit(&3);
        signal.emit(&4);
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn dropping_subscription_disconnects() {
        let signal = Signal::<()>::new();
        let seen = Rc::new(Cell::new(0));
        let s = seen.clone();
        let sub = signal.connect(move |_| s.set(s.get() + 1));
        signal.notify();
        drop(sub);
        signal.notify();
        assert_eq!(seen.get(), 1);
        assert_eq!(signal.handler_count(), 0);
    }

    #[test]
    fn subscription_outliving_signal_is_harmless() {
        let signal = Signal::<()>::new();
        let sub = signal.connect(|_| {});
        drop(signal);
        drop(sub);
    }

    #[test]
    fn handler_may_reconnect_during_emit() {
        let signal = Rc::new(Signal::<()>::new());
        let held = Rc::new(RefCell::new(Vec::new()));
        let (sig, h) = (signal.clone(), held.clone());
        let _sub = signal.connect(move |_| {
            h.borrow_mut().push(sig.connect(|_| {}));
        });
        signal.notify();
        assert_eq!(signal.handler_count(), 2);
    }
}
