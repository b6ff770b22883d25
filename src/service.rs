//! The service object clients talk to.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Instant;

use ascii_tree::Tree;
use tracing::{debug, info, instrument};

use crate::actor::broadcast::BroadcastEvent;
use crate::app::{ApplicationDirectory, ApplicationSource, FocusEvent, IndicatorSource, WindowId};
use crate::app::registry::{ActionSourceSpec, MenuSourceSpec};
use crate::common::collections::BTreeMap;
use crate::common::config::IndicatorConfig;
use crate::common::error::HudError;
use crate::context::HudContext;
use crate::model::{ApplicationData, ContextData, ItemNode, LegacyRow, QueryData};
use crate::query::legacy::{self, LegacyQueries};
use crate::query::Query;
use crate::source::{ActivateEvent, CommandItem, ItemId, Signal, SourceList, Subscription};

struct OpenQuery {
    query: Rc<Query>,
    _events: Subscription,
}

#[derive(Default)]
struct State {
    // by query number
    queries: BTreeMap<u32, OpenQuery>,
    // name watches on query owners
    owners: BTreeMap<String, Subscription>,
}

pub struct HudService {
    ctx: Rc<HudContext>,
    directory: Rc<ApplicationDirectory>,
    indicators: Rc<IndicatorSource>,
    all: Rc<SourceList>,
    legacy: LegacyQueries,
    state: RefCell<State>,
    events: Signal<BroadcastEvent>,
    weak_self: Weak<Self>,
}

impl HudService {
    pub fn new(ctx: &Rc<HudContext>, indicators: &[IndicatorConfig]) -> Rc<Self> {
        let directory = ApplicationDirectory::new(ctx);
        let indicators = IndicatorSource::new(ctx, indicators);
        let all = SourceList::new();
        all.add(indicators.clone());
        all.add(directory.clone());
        Rc::new_cyclic(|weak_self| Self {
            ctx: ctx.clone(),
            directory,
            indicators,
            all,
            legacy: LegacyQueries::new(),
            state: RefCell::new(State::default()),
            events: Signal::new(),
            weak_self: weak_self.clone(),
        })
    }

    pub fn context(&self) -> &Rc<HudContext> { &self.ctx }

    pub fn directory(&self) -> &Rc<ApplicationDirectory> { &self.directory }

    pub fn indicators(&self) -> &Rc<IndicatorSource> { &self.indicators }

    /// Every query notification, tagged with the query's path.
    pub fn events(&self) -> &Signal<BroadcastEvent> { &self.events }

    #[instrument(skip(self))]
    pub fn create_query(&self, search: &str, owner: Option<&str>) -> QueryData {
        self.open_query(search, owner).info()
    }

    fn open_query(&self, search: &str, owner: Option<&str>) -> Rc<Query> {
        let query = Query::new(&self.ctx, self.all.clone(), self.directory.clone(), search, owner);
        let path = query.path().to_string();
        let weak = self.weak_self.clone();
        let events = query.events().connect(move |event| {
            if let Some(this) = weak.upgrade() {
                this.events.emit(&BroadcastEvent {
                    query: path.clone(),
                    event: event.clone(),
                });
            }
        });
        if let Some(owner) = owner {
            self.watch_owner(owner);
        }
        self.state
            .borrow_mut()
            .queries
            .insert(query.number(), OpenQuery { query: query.clone(), _events: events });
        query
    }

    fn watch_owner(&self, owner: &str) {
        if self.state.borrow().owners.contains_key(owner) {
            return;
        }
        let weak = self.weak_self.clone();
        let name = owner.to_string();
        let handler: Rc<dyn Fn(bool)> = Rc::new(move |owned| {
            if !owned && let Some(this) = weak.upgrade() {
                this.client_vanished(&name);
            }
        });
        let watch = self.ctx.bus.watch_name(owner, handler);
        self.state.borrow_mut().owners.insert(owner.to_string(), watch);
    }

    /// Closes every session opened by `client`.
    pub fn client_vanished(&self, client: &str) {
        let owned: Vec<String> = {
            let mut state = self.state.borrow_mut();
            state.owners.remove(client);
            state
                .queries
                .values()
                .filter(|open| open.query.owner() == Some(client))
                .map(|open| open.query.path().to_string())
                .collect()
        };
        self.legacy.remove(client);
        if !owned.is_empty() {
            info!(client, queries = owned.len(), "client vanished, closing its queries");
        }
        for path in owned {
            _ = self.close_query(&path);
        }
    }

    pub fn query(&self, path: &str) -> Result<Rc<Query>, HudError> {
        self.state
            .borrow()
            .queries
            .values()
            .find(|open| open.query.path() == path)
            .map(|open| open.query.clone())
            .ok_or_else(|| HudError::UnknownQuery(path.to_string()))
    }

    pub fn close_query(&self, path: &str) -> Result<(), HudError> {
        let number = self.query(path)?.number();
        let open = self.state.borrow_mut().queries.remove(&number);
        if let Some(open) = open {
            open.query.close();
        }
        Ok(())
    }

    pub fn open_queries(&self) -> Vec<String> {
        self.state.borrow().queries.values().map(|open| open.query.path().to_string()).collect()
    }

    /// Legacy search: one reusable session per client, results computed
    /// immediately and cut to `entries`.
    #[instrument(skip(self))]
    pub fn start_query(&self, client: &str, search: &str, entries: usize) -> (String, Vec<LegacyRow>, u64) {
        let query = self.legacy.start(client, search, || self.open_query(search, Some(client)));
        let icon = self.directory.focused_app().map(|app| app.icon().to_string()).unwrap_or_default();
        let rows = legacy::rows(&query, entries, &icon);
        (search.to_string(), rows, u64::from(query.number()))
    }

    pub fn close_legacy_query(&self, client: &str, key: u64, now: Instant) -> Result<(), HudError> {
        self.legacy.close(client, key, now)
    }

    pub fn execute_query(&self, client: &str, item: ItemId, timestamp: u32) -> Result<(), HudError> {
        let query = self.legacy.execute(client, item, &ActivateEvent::at(timestamp))?;
        self.close_query(query.path())
    }

    /// Closes legacy sessions whose close timer ran out.
    pub fn expire_legacy(&self, now: Instant) {
        for query in self.legacy.expire(now) {
            debug!(path = query.path(), "legacy query expired");
            _ = self.close_query(query.path());
        }
    }

    pub fn register_application(&self, app_id: &str) -> Result<String, HudError> {
        Ok(self.directory.get_source(app_id)?.path().to_string())
    }

    pub fn applications(&self) -> Vec<ApplicationData> {
        let focused = self.directory.focused_app();
        self.directory
            .apps()
            .iter()
            .map(|app| ApplicationData {
                app_id: app.id().to_string(),
                path: app.path().to_string(),
                icon: app.icon().to_string(),
                focused: focused.as_ref().is_some_and(|f| Rc::ptr_eq(f, app)),
            })
            .collect()
    }

    /// Finds an application by export path or by id.
    pub fn application(&self, path: &str) -> Result<Rc<ApplicationSource>, HudError> {
        self.directory
            .find_by_path(path)
            .or_else(|| self.directory.find(path))
            .ok_or_else(|| HudError::UnknownApplication(path.to_string()))
    }

    pub fn add_sources(
        &self,
        path: &str,
        sender: &str,
        actions: &[ActionSourceSpec],
        menus: &[MenuSourceSpec],
    ) -> Result<(), HudError> {
        self.application(path)?.add_sources(sender, actions, menus);
        Ok(())
    }

    pub fn set_window_context(&self, path: &str, window: WindowId, context: Option<&str>) -> Result<(), HudError> {
        self.application(path)?.set_window_context(window, context);
        Ok(())
    }

    pub fn handle_focus(&self, event: FocusEvent) -> Result<(), HudError> {
        self.directory.handle_focus_event(event)
    }

    pub fn contexts(&self, path: &str) -> Result<Vec<ContextData>, HudError> {
        let app = self.application(path)?;
        Ok(app
            .contexts()
            .into_iter()
            .map(|info| ContextData {
                window: info.window,
                context: info.context,
                visible: info.visible,
                items: info.items.iter().map(|item| item_node(item)).collect(),
            })
            .collect())
    }

    /// Renders an application's contexts and their commands as a tree.
    pub fn dump_application(&self, path: &str) -> Result<String, HudError> {
        let app = self.application(path)?;
        let contexts = app
            .contexts()
            .into_iter()
            .map(|info| {
                let mut title = match &info.context {
                    Some(context) => format!("window {} ({context})", info.window),
                    None => format!("window {}", info.window),
                };
                if info.visible {
                    title.push_str(" *");
                }
                Tree::Node(title, label_tree(&info.items))
            })
            .collect();
        let tree = Tree::Node(format!("{} [{}]", app.id(), app.path()), contexts);
        let mut out = String::new();
        // writing into a String cannot fail
        _ = ascii_tree::write_tree(&mut out, &tree);
        Ok(out)
    }
}

fn item_node(item: &CommandItem) -> ItemNode {
    ItemNode {
        id: item.id(),
        label_path: item.label_path().to_vec(),
        shortcut: Some(item.shortcut().to_string()).filter(|s| !s.is_empty()),
        enabled: item.is_enabled(),
        parameterized: item.is_parameterized(),
    }
}

#[derive(Default)]
struct LabelNode {
    children: Vec<(String, LabelNode)>,
    leaf: Option<String>,
}

impl LabelNode {
    fn insert(&mut self, path: &[String], text: String) {
        let Some((first, rest)) = path.split_first() else {
            self.leaf = Some(text);
            return;
        };
        let index = match self.children.iter().position(|(label, _)| label == first) {
            Some(index) => index,
            None => {
                self.children.push((first.clone(), LabelNode::default()));
                self.children.len() - 1
            }
        };
        self.children[index].1.insert(rest, text);
    }

    fn into_trees(self) -> Vec<Tree> {
        self.children
            .into_iter()
            .map(|(label, LabelNode { children, leaf })| {
                let title = leaf.unwrap_or(label);
                if children.is_empty() {
                    Tree::Leaf(vec![title])
                } else {
                    Tree::Node(title, LabelNode { children, leaf: None }.into_trees())
                }
            })
            .collect()
    }
}

fn label_tree(items: &[Rc<CommandItem>]) -> Vec<Tree> {
    let mut root = LabelNode::default();
    for item in items {
        let mut text = item.label().to_string();
        if !item.shortcut().is_empty() {
            text = format!("{text} ({})", item.shortcut());
        }
        if !item.is_enabled() {
            text.push_str(" [disabled]");
        }
        root.insert(item.label_path(), text);
    }
    root.into_trees()
}

impl Drop for HudService {
    fn drop(&mut self) {
        for open in std::mem::take(&mut self.state.get_mut().queries).into_values() {
            open.query.close();
        }
    }
}
