//! Stateful search sessions.
//!
//! A [`Query`] holds a search string and an optional source override and
//! republishes a ranked batch of results whenever either changes, or when
//! the sources underneath it report new data. Background notifications are
//! coalesced into one recompute per idle turn; client requests recompute
//! right away.

pub mod legacy;
pub mod voice;

use std::cell::RefCell;
use std::ptr;
use std::rc::{Rc, Weak};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;
use tracing::{debug, info, instrument, trace, warn};

use self::voice::VoiceProgress;
use crate::app::ApplicationDirectory;
use crate::common::collections::BTreeMap;
use crate::common::error::HudError;
use crate::context::HudContext;
use crate::model::{AppstackRow, QueryData, ResultRow};
use crate::remote::{Export, Exported};
use crate::search::{TokenList, highlights};
use crate::source::{
    ActivateEvent, AppEntry, CommandItem, ItemId, ParameterizedAction, SearchResult, Signal,
    Source, SourceKind, Subscription, ToolbarItem,
};
use crate::sys::main_loop::{self, IdleId};

/// Notifications a query sends to whoever watches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "event", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QueryEvent {
    ResultsChanged { revision: u32 },
    AppstackChanged { revision: u32 },
    VoiceQueryLoading,
    VoiceQueryListening,
    VoiceQueryHeardSomething,
    VoiceQueryFinished { text: String },
    VoiceQueryFailed { reason: String },
}

impl QueryEvent {
    pub fn name(&self) -> &'static str { self.into() }
}

#[derive(Default)]
struct State {
    search: String,
    tokens: TokenList,
    selected: Option<Rc<dyn Source>>,
    in_use: Option<Rc<dyn Source>>,
    // latest published batch, in result order
    batch: Vec<Rc<CommandItem>>,
    results: Vec<ResultRow>,
    appstack: Vec<AppstackRow>,
    toolbar: Vec<ToolbarItem>,
    revision: u32,
    refresh: Option<IdleId>,
    refreshing: bool,
    closed: bool,
    export: Option<Export>,
    changed: Option<Subscription>,
}

pub struct Query {
    ctx: Rc<HudContext>,
    number: u32,
    path: String,
    results_name: String,
    appstack_name: String,
    owner: Option<String>,
    all: Rc<dyn Source>,
    directory: Rc<ApplicationDirectory>,
    state: RefCell<State>,
    events: Signal<QueryEvent>,
    weak_self: Weak<Self>,
}

impl Query {
    /// Opens a session over `all`. The first batch is computed on the next
    /// idle turn.
    pub fn new(
        ctx: &Rc<HudContext>,
        all: Rc<dyn Source>,
        directory: Rc<ApplicationDirectory>,
        search: &str,
        owner: Option<&str>,
    ) -> Rc<Self> {
        let number = ctx.allocator.query_number();
        let path = format!("{}/query{number}", ctx.export_base());
        let search = search.trim().to_string();
        let query = Rc::new_cyclic(|weak_self: &Weak<Self>| {
            let weak = weak_self.clone();
            let changed = all.changed().connect(move |_| {
                if let Some(this) = weak.upgrade() {
                    this.sources_changed();
                }
            });
            let export = match Export::new(&ctx.bus, &path, Exported::Query(path.clone())) {
                Ok(export) => Some(export),
                Err(e) => {
                    warn!(path, "unable to export query: {e}");
                    None
                }
            };
            Self {
                ctx: ctx.clone(),
                number,
                results_name: format!("com.canonical.hud.query{number}.results"),
                appstack_name: format!("com.canonical.hud.query{number}.appstack"),
                path: path.clone(),
                owner: owner.map(str::to_string),
                all,
                directory,
                state: RefCell::new(State {
                    tokens: TokenList::parse(&search),
                    search,
                    export,
                    changed: Some(changed),
                    ..State::default()
                }),
                events: Signal::new(),
                weak_self: weak_self.clone(),
            }
        });
        info!(path = query.path, search = query.search(), "query created");
        query.all.activate();
        query.schedule_refresh();
        query
    }

    pub fn number(&self) -> u32 { self.number }

    pub fn path(&self) -> &str { &self.path }

    pub fn results_name(&self) -> &str { &self.results_name }

    pub fn appstack_name(&self) -> &str { &self.appstack_name }

    /// Bus name of the client that opened the session, if known.
    pub fn owner(&self) -> Option<&str> { self.owner.as_deref() }

    pub fn search(&self) -> String { self.state.borrow().search.clone() }

    /// Number of batches published so far.
    pub fn revision(&self) -> u32 { self.state.borrow().revision }

    pub fn results(&self) -> Vec<ResultRow> { self.state.borrow().results.clone() }

    pub fn appstack(&self) -> Vec<AppstackRow> { self.state.borrow().appstack.clone() }

    pub fn toolbar(&self) -> Vec<ToolbarItem> { self.state.borrow().toolbar.clone() }

    pub fn batch(&self) -> Vec<Rc<CommandItem>> { self.state.borrow().batch.clone() }

    pub fn is_closed(&self) -> bool { self.state.borrow().closed }

    pub fn events(&self) -> &Signal<QueryEvent> { &self.events }

    pub fn info(&self) -> QueryData {
        QueryData {
            path: self.path.clone(),
            results_name: self.results_name.clone(),
            appstack_name: self.appstack_name.clone(),
            revision: self.revision(),
            search: Some(self.search()),
            owner: self.owner.clone(),
        }
    }

    #[instrument(skip(self), fields(path = self.path))]
    pub fn update_search(&self, search: &str) -> u32 {
        {
            let search = search.trim().to_string();
            let mut state = self.state.borrow_mut();
            state.tokens = TokenList::parse(&search);
            state.search = search;
        }
        self.refresh_now()
    }

    /// Searches only `app_id` from now on. The empty id resumes following
    /// focus.
    #[instrument(skip(self), fields(path = self.path))]
    pub fn select_source(&self, app_id: &str) -> u32 {
        let selected = if app_id.is_empty() {
            None
        } else {
            let found = self.all.clone().get(app_id);
            if found.is_none() {
                debug!(app_id, "no source for selection");
            }
            found
        };
        self.state.borrow_mut().selected = selected;
        self.refresh_now()
    }

    /// Looks `key` up in the latest published batch.
    pub fn item(&self, key: ItemId) -> Option<Rc<CommandItem>> {
        self.state.borrow().batch.iter().find(|item| item.id() == key).cloned()
    }

    pub fn execute_command(&self, key: ItemId, timestamp: u32) -> Result<(), HudError> {
        self.execute_item(key, &ActivateEvent::at(timestamp))
    }

    pub fn execute_item(&self, key: ItemId, event: &ActivateEvent) -> Result<(), HudError> {
        let item = self.item(key).ok_or(HudError::UnknownItem)?;
        item.activate(event);
        Ok(())
    }

    pub fn execute_parameterized(
        &self,
        key: ItemId,
        _timestamp: u32,
    ) -> Result<ParameterizedAction, HudError> {
        let item = self.item(key).ok_or(HudError::UnknownItem)?;
        item.activate_parameterized()
    }

    pub fn execute_toolbar(&self, name: &str, timestamp: u32) -> Result<(), HudError> {
        let item = ToolbarItem::from_str(name).map_err(|_| HudError::UnknownToolbarItem(name.to_string()))?;
        if item != ToolbarItem::Quit {
            return Err(HudError::UnsupportedToolbarItem(item.to_string()));
        }
        let target = self.state.borrow().in_use.clone().ok_or(HudError::NoSource)?;
        target.activate_toolbar(item, &ActivateEvent::at(timestamp));
        Ok(())
    }

    /// Listens for a spoken command and applies it as the new search.
    pub fn voice_query(&self) -> Result<(u32, String), HudError> {
        self.events.emit(&QueryEvent::VoiceQueryLoading);
        let vocabulary: Vec<Vec<String>> = self
            .target()
            .map(|target| target.snapshot_items())
            .unwrap_or_default()
            .iter()
            .map(|item| item.label_path().to_vec())
            .collect();

        let mut progress = |progress: VoiceProgress| {
            let event = match progress {
                VoiceProgress::Listening => QueryEvent::VoiceQueryListening,
                VoiceProgress::HeardSomething => QueryEvent::VoiceQueryHeardSomething,
            };
            self.events.emit(&event);
        };
        match self.ctx.voice.listen(&vocabulary, &mut progress) {
            Ok(text) => {
                let text = text.to_lowercase();
                info!(path = self.path, text, "voice query recognized");
                self.events.emit(&QueryEvent::VoiceQueryFinished { text: text.clone() });
                self.update_search(&text);
                Ok((0, text))
            }
            Err(e) => {
                warn!(path = self.path, "voice query failed: {e}");
                self.events.emit(&QueryEvent::VoiceQueryFailed { reason: e.to_string() });
                Err(HudError::Voice(e.to_string()))
            }
        }
    }

    /// Stops listening and releases the source in use along with the
    /// activation held on every source. Safe to call twice.
    pub fn close(&self) {
        let (in_use, refresh, export, changed) = {
            let mut state = self.state.borrow_mut();
            if state.closed {
                return;
            }
            state.closed = true;
            (state.in_use.take(), state.refresh.take(), state.export.take(), state.changed.take())
        };
        if let Some(id) = refresh {
            main_loop::idle_remove(id);
        }
        if let Some(source) = in_use {
            source.deactivate();
        }
        self.all.deactivate();
        drop(changed);
        drop(export);
        info!(path = self.path, "query closed");
    }

    fn sources_changed(&self) {
        if self.state.borrow().refreshing {
            trace!(path = self.path, "change during refresh");
            return;
        }
        self.schedule_refresh();
    }

    fn schedule_refresh(&self) {
        {
            let state = self.state.borrow();
            if state.closed || state.refresh.is_some() {
                return;
            }
        }
        let weak = self.weak_self.clone();
        let id = main_loop::idle_add(move || {
            if let Some(this) = weak.upgrade() {
                this.state.borrow_mut().refresh = None;
                this.refresh();
            }
        });
        self.state.borrow_mut().refresh = Some(id);
    }

    fn refresh_now(&self) -> u32 {
        let pending = self.state.borrow_mut().refresh.take();
        if let Some(id) = pending {
            main_loop::idle_remove(id);
        }
        self.refresh();
        self.revision()
    }

    /// The explicit selection, else the focused application.
    fn target(&self) -> Option<Rc<dyn Source>> {
        let selected = self.state.borrow().selected.clone();
        selected.or_else(|| self.directory.focused_app().map(|app| app as Rc<dyn Source>))
    }

    fn swap_in_use(&self, target: Option<Rc<dyn Source>>) {
        let old = {
            let mut state = self.state.borrow_mut();
            let same = match (&state.in_use, &target) {
                (Some(a), Some(b)) => ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
                (None, None) => true,
                _ => false,
            };
            if same {
                return;
            }
            std::mem::replace(&mut state.in_use, target.clone())
        };
        if let Some(old) = old {
            old.deactivate();
        }
        if let Some(new) = target {
            new.activate();
        }
    }

    fn refresh(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.closed {
                return;
            }
            state.refreshing = true;
        }
        let target = self.target();
        self.swap_in_use(target.clone());

        let (tokens, selected) = {
            let state = self.state.borrow();
            (state.tokens.clone(), state.selected.clone())
        };
        let mut found: Vec<SearchResult> = Vec::new();
        if let Some(target) = &target {
            target.search(&tokens, &mut found);
        }
        let ranked = self.rank(found);
        let results: Vec<ResultRow> = ranked.iter().map(|(item, distance)| result_row(item, *distance, &tokens)).collect();
        let batch: Vec<Rc<CommandItem>> = ranked.into_iter().map(|(item, _)| item).collect();
        let appstack = self.compute_appstack(&tokens, selected.as_ref());
        let mut toolbar = Vec::new();
        if let Some(target) = &target {
            target.toolbar_entries(&mut toolbar);
        }

        let revision = {
            let mut state = self.state.borrow_mut();
            state.refreshing = false;
            state.batch = batch;
            state.results = results;
            state.appstack = appstack;
            state.toolbar = toolbar;
            state.revision += 1;
            debug!(
                path = self.path,
                search = state.search,
                results = state.results.len(),
                revision = state.revision,
                "published results"
            );
            state.revision
        };
        self.events.emit(&QueryEvent::ResultsChanged { revision });
        self.events.emit(&QueryEvent::AppstackChanged { revision });
    }

    /// Orders a batch by rank; ties keep search order.
    fn rank(&self, found: Vec<SearchResult>) -> Vec<(Rc<CommandItem>, u32)> {
        let ranker = self.ctx.ranker();
        let scored: Vec<(SearchResult, u32)> = found
            .into_iter()
            .map(|result| {
                let usage = result.usage();
                (result, usage)
            })
            .collect();
        let max_usage = scored.iter().map(|(_, usage)| *usage).max().unwrap_or(0);
        let mut ranked: Vec<(Rc<CommandItem>, u32)> = scored
            .into_iter()
            .map(|(result, usage)| {
                let rank = ranker.rank(result.distance, usage, max_usage);
                (result.item, rank)
            })
            .collect();
        ranked.sort_by_key(|(_, rank)| *rank);
        ranked
    }

    fn compute_appstack(&self, tokens: &TokenList, selected: Option<&Rc<dyn Source>>) -> Vec<AppstackRow> {
        let mut entries: Vec<AppEntry> = Vec::new();
        self.all.list_applications(tokens, &mut entries);

        if let Some(selected) = selected
            && let Some(app_id) = selected.app_id()
        {
            let kind = if selected.is_collector() { SourceKind::Indicator } else { SourceKind::Background };
            entries.push(AppEntry {
                app_id,
                icon: selected.app_icon().unwrap_or_default(),
                kind,
            });
        }
        if let Some(app) = self.directory.focused_app() {
            entries.push(AppEntry {
                app_id: app.id().to_string(),
                icon: app.icon().to_string(),
                kind: SourceKind::Focused,
            });
        }
        if let Some(app) = self.directory.side_stage_focused_app() {
            entries.push(AppEntry {
                app_id: app.id().to_string(),
                icon: app.icon().to_string(),
                kind: SourceKind::SideStage,
            });
        }

        let mut unique: BTreeMap<String, AppEntry> = BTreeMap::new();
        for entry in entries {
            match unique.get_mut(&entry.app_id) {
                Some(known) if known.kind <= entry.kind => {}
                Some(known) => *known = entry,
                None => {
                    unique.insert(entry.app_id.clone(), entry);
                }
            }
        }
        let mut rows: Vec<AppstackRow> = unique
            .into_values()
            .map(|entry| AppstackRow {
                app_id: entry.app_id,
                icon: entry.icon,
                kind: entry.kind,
            })
            .collect();
        rows.sort_by(|a, b| (a.kind, &a.app_id).cmp(&(b.kind, &b.app_id)));
        rows
    }
}

fn result_row(item: &CommandItem, distance: u32, tokens: &TokenList) -> ResultRow {
    let description = item.description();
    ResultRow {
        id: item.id(),
        command: item.label().to_string(),
        command_highlights: highlights(item.label(), tokens),
        description_highlights: highlights(&description, tokens),
        description,
        shortcut: item.shortcut().to_string(),
        distance,
        parameterized: item.is_parameterized(),
    }
}

impl Drop for Query {
    fn drop(&mut self) { self.close(); }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("path", &self.path)
            .field("search", &self.state.borrow().search)
            .field("revision", &self.state.borrow().revision)
            .finish_non_exhaustive()
    }
}
