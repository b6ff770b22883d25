use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{trace, warn};

use super::{
    ActivateEvent, AppEntry, CommandItem, SearchResult, Signal, Source, Subscription, ToolbarItem,
    push_unique,
};
use crate::search::TokenList;

struct Member {
    source: Rc<dyn Source>,
    _changed: Subscription,
}

/// A set of sources behind the single [`Source`] contract.
///
/// Newest members come first. Members joining or leaving while the list is
/// active are activated or released to match the list's own count.
pub struct SourceList {
    members: RefCell<Vec<Member>>,
    use_count: Cell<u32>,
    changed: Rc<Signal>,
}

impl SourceList {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            members: RefCell::new(Vec::new()),
            use_count: Cell::new(0),
            changed: Rc::new(Signal::new()),
        })
    }

    pub fn add(&self, source: Rc<dyn Source>) {
        let weak: Weak<Signal> = Rc::downgrade(&self.changed);
        let sub = source.changed().connect(move |_| {
            if let Some(changed) = weak.upgrade() {
                changed.notify();
            }
        });
        for _ in 0..self.use_count.get() {
            source.activate();
        }
        self.members.borrow_mut().insert(0, Member { source, _changed: sub });
        trace!(members = self.len(), "source added");
        self.changed.notify();
    }

    /// Removes `source` (by identity). Returns whether it was a member.
    pub fn remove(&self, source: &Rc<dyn Source>) -> bool {
        let removed: Vec<Member> = {
            let mut members = self.members.borrow_mut();
            let (gone, kept) = std::mem::take(&mut *members)
                .into_iter()
                .partition(|m| Rc::ptr_eq(&m.source, source));
            *members = kept;
            gone
        };
        if removed.is_empty() {
            return false;
        }
        for member in &removed {
            for _ in 0..self.use_count.get() {
                member.source.deactivate();
            }
        }
        self.changed.notify();
        true
    }

    pub fn len(&self) -> usize { self.members.borrow().len() }

    pub fn is_empty(&self) -> bool { self.members.borrow().is_empty() }

    pub fn sources(&self) -> Vec<Rc<dyn Source>> {
        self.members.borrow().iter().map(|m| m.source.clone()).collect()
    }
}

impl Source for SourceList {
    fn activate(&self) {
        self.use_count.set(self.use_count.get() + 1);
        for source in self.sources() {
            source.activate();
        }
    }

    fn deactivate(&self) {
        let Some(count) = self.use_count.get().checked_sub(1) else {
            warn!("unbalanced deactivate");
            return;
        };
        self.use_count.set(count);
        for source in self.sources() {
            source.deactivate();
        }
    }

    fn search(&self, query: &TokenList, results: &mut Vec<SearchResult>) {
        for source in self.sources() {
            source.search(query, results);
        }
    }

    fn list_applications(&self, query: &TokenList, apps: &mut Vec<AppEntry>) {
        for source in self.sources() {
            source.list_applications(query, apps);
        }
    }

    fn get(self: Rc<Self>, app_id: &str) -> Option<Rc<dyn Source>> {
        self.sources().into_iter().find_map(|source| source.get(app_id))
    }

    fn snapshot_items(&self) -> Vec<Rc<CommandItem>> {
        self.sources().iter().flat_map(|source| source.snapshot_items()).collect()
    }

    fn toolbar_entries(&self, entries: &mut Vec<ToolbarItem>) {
        let mut all = Vec::new();
        for source in self.sources() {
            source.toolbar_entries(&mut all);
        }
        for entry in all {
            push_unique(entries, entry);
        }
    }

    fn activate_toolbar(&self, item: ToolbarItem, event: &ActivateEvent) {
        for source in self.sources() {
            source.activate_toolbar(item, event);
        }
    }

    fn changed(&self) -> &Signal { &self.changed }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::Cell;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::source::SourceKind;

    /// A leaf that only counts what it was asked.
    #[derive(Default)]
    pub(crate) struct CountingSource {
        pub app_id: String,
        pub active: Cell<i32>,
        pub searches: Cell<u32>,
        pub changed: Signal,
    }

    impl CountingSource {
        pub(crate) fn new(app_id: &str) -> Rc<Self> {
            Rc::new(Self { app_id: app_id.into(), ..Self::default() })
        }
    }

    impl Source for CountingSource {
        fn activate(&self) { self.active.set(self.active.get() + 1); }

        fn deactivate(&self) { self.active.set(self.active.get() - 1); }

        fn search(&self, _query: &TokenList, _results: &mut Vec<SearchResult>) {
            self.searches.set(self.searches.get() + 1);
        }

        fn list_applications(&self, _query: &TokenList, apps: &mut Vec<AppEntry>) {
            apps.push(AppEntry {
                app_id: self.app_id.clone(),
                icon: String::new(),
                kind: SourceKind::Background,
            });
        }

        fn get(self: Rc<Self>, app_id: &str) -> Option<Rc<dyn Source>> {
            (self.app_id == app_id).then(|| self as Rc<dyn Source>)
        }

        fn snapshot_items(&self) -> Vec<Rc<CommandItem>> { Vec::new() }

        fn toolbar_entries(&self, entries: &mut Vec<ToolbarItem>) { entries.push(ToolbarItem::Quit); }

        fn activate_toolbar(&self, _item: ToolbarItem, _event: &ActivateEvent) {}

        fn app_id(&self) -> Option<String> { Some(self.app_id.clone()) }

        fn changed(&self) -> &Signal { &self.changed }
    }

    fn counter(signal: &Signal) -> (Rc<Cell<u32>>, Subscription) {
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let sub = signal.connect(move |_| h.set(h.get() + 1));
        (hits, sub)
    }

    #[test]
    fn adding_emits_changed() {
        let list = SourceList::new();
        let (hits, _sub) = counter(list.changed());
        list.add(CountingSource::new("a"));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn member_changes_are_forwarded() {
        let list = SourceList::new();
        let a = CountingSource::new("a");
        list.add(a.clone());
        let (hits, _sub) = counter(list.changed());
        a.changed.notify();
        a.changed.notify();
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn activation_fans_out_and_balances() {
        let list = SourceList::new();
        let (a, b) = (CountingSource::new("a"), CountingSource::new("b"));
        list.add(a.clone());
        list.add(b.clone());

        list.activate();
        list.activate();
        list.deactivate();
        assert_eq!((a.active.get(), b.active.get()), (1, 1));
        list.deactivate();
        assert_eq!((a.active.get(), b.active.get()), (0, 0));
    }

    #[test]
    fn late_members_follow_the_list_count() {
        let list = SourceList::new();
        list.activate();
        let late = CountingSource::new("late");
        let late_dyn: Rc<dyn Source> = late.clone();
        list.add(late_dyn.clone());
        assert_eq!(late.active.get(), 1);

        list.remove(&late_dyn);
        assert_eq!(late.active.get(), 0);
        list.deactivate();
        list.deactivate();
        assert_eq!(late.active.get(), 0);
    }

    #[test]
    fn get_returns_first_match_newest_first() {
        let list = SourceList::new();
        let older = CountingSource::new("same");
        let newer = CountingSource::new("same");
        list.add(older.clone());
        list.add(newer.clone());

        let found = list.clone().get("same").unwrap();
        let newer_dyn: Rc<dyn Source> = newer;
        assert!(Rc::ptr_eq(&found, &newer_dyn));
        assert!(list.get("missing").is_none());
    }

    #[test]
    fn search_and_toolbar_fan_out() {
        let list = SourceList::new();
        let (a, b) = (CountingSource::new("a"), CountingSource::new("b"));
        list.add(a.clone());
        list.add(b.clone());

        let mut results = Vec::new();
        list.search(&TokenList::parse("x"), &mut results);
        assert_eq!((a.searches.get(), b.searches.get()), (1, 1));

        let mut toolbar = Vec::new();
        list.toolbar_entries(&mut toolbar);
        assert_eq!(toolbar, vec![ToolbarItem::Quit]);
    }

    #[test]
    fn removed_members_stop_forwarding() {
        let list = SourceList::new();
        let a = CountingSource::new("a");
        let a_dyn: Rc<dyn Source> = a.clone();
        list.add(a_dyn.clone());
        assert!(list.remove(&a_dyn));
        let (hits, _sub) = counter(list.changed());
        a.changed.notify();
        assert_eq!(hits.get(), 0);
        assert!(list.is_empty());
    }
}
