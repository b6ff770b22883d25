//! The older one-shot query API.
//!
//! Each client gets at most one session, reused across `start` calls. A
//! close only clears the search and arms a timer; the session is dropped
//! when the timer runs out without another `start`.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::Query;
use crate::common::collections::BTreeMap;
use crate::common::error::HudError;
use crate::model::LegacyRow;
use crate::source::{ActivateEvent, ItemId};

/// How long a closed session is kept for its client to come back.
pub const CLOSE_DELAY: Duration = Duration::from_secs(2);

struct Entry {
    query: Rc<Query>,
    closing: Option<Instant>,
}

#[derive(Default)]
pub struct LegacyQueries {
    // by client name
    entries: RefCell<BTreeMap<String, Entry>>,
}

impl LegacyQueries {
    pub fn new() -> Self { Self::default() }

    /// Runs `search` in the client's session, opening one with `open` if it
    /// has none. Results are computed before this returns.
    pub fn start(&self, client: &str, search: &str, open: impl FnOnce() -> Rc<Query>) -> Rc<Query> {
        let existing = {
            let mut entries = self.entries.borrow_mut();
            entries.get_mut(client).map(|entry| {
                entry.closing = None;
                entry.query.clone()
            })
        };
        let query = existing.unwrap_or_else(|| {
            let query = open();
            info!(client, path = query.path(), "legacy query opened");
            self.entries
                .borrow_mut()
                .insert(client.to_string(), Entry { query: query.clone(), closing: None });
            query
        });
        query.update_search(search);
        query
    }

    pub fn find(&self, client: &str) -> Option<Rc<Query>> {
        self.entries.borrow().get(client).map(|entry| entry.query.clone())
    }

    /// Clears the client's search and schedules its session for removal.
    pub fn close(&self, client: &str, key: u64, now: Instant) -> Result<(), HudError> {
        let query = {
            let mut entries = self.entries.borrow_mut();
            let entry = entries
                .get_mut(client)
                .filter(|entry| u64::from(entry.query.number()) == key)
                .ok_or(HudError::UnknownQueryKey(key))?;
            entry.closing = Some(now + CLOSE_DELAY);
            entry.query.clone()
        };
        query.update_search("");
        Ok(())
    }

    /// Activates `item` from the client's session and ends the session. An
    /// unknown item leaves the session open.
    pub fn execute(&self, client: &str, item: ItemId, event: &ActivateEvent) -> Result<Rc<Query>, HudError> {
        let query = self.find(client).ok_or(HudError::UnknownItem)?;
        let result = query.execute_item(item, event);
        debug!(client, ok = result.is_ok(), "legacy query executed");
        result?;
        self.entries.borrow_mut().remove(client);
        Ok(query)
    }

    pub fn remove(&self, client: &str) -> Option<Rc<Query>> {
        self.entries.borrow_mut().remove(client).map(|entry| entry.query)
    }

    /// Removes every session whose close timer ran out before `now`.
    pub fn expire(&self, now: Instant) -> Vec<Rc<Query>> {
        let mut entries = self.entries.borrow_mut();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.closing.is_some_and(|deadline| deadline <= now))
            .map(|(client, _)| client.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|client| entries.remove(&client))
            .map(|entry| entry.query)
            .collect()
    }

    pub fn len(&self) -> usize { self.entries.borrow().len() }

    pub fn is_empty(&self) -> bool { self.entries.borrow().is_empty() }
}

/// The first `limit` results of `query`, each carrying `icon`. An empty
/// search suggests nothing.
pub fn rows(query: &Query, limit: usize, icon: &str) -> Vec<LegacyRow> {
    if query.search().is_empty() {
        return Vec::new();
    }
    query
        .batch()
        .iter()
        .take(limit)
        .map(|item| LegacyRow {
            command: item.label().to_string(),
            description: item.description(),
            icon: icon.to_string(),
            completion: item.label().to_string(),
            shortcut: item.shortcut().to_string(),
            key: item.id(),
        })
        .collect()
}
