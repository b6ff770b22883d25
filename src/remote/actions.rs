use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::PlatformData;
use crate::source::{Signal, Subscription};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionEvent {
    Added(String),
    Removed(String),
    EnabledChanged(String, bool),
    StateChanged(String),
}

/// A named set of actions owned by another process.
pub trait ActionGroup {
    fn list_actions(&self) -> Vec<String>;

    fn has_action(&self, name: &str) -> bool;

    fn is_enabled(&self, name: &str) -> bool;

    fn activate(&self, name: &str, parameter: Option<&Value>, platform_data: &PlatformData);

    fn events(&self) -> &Signal<ActionEvent>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: String,
    pub parameter: Option<Value>,
    pub platform_data: PlatformData,
}

#[derive(Debug, Clone)]
struct ActionState {
    enabled: bool,
    state: Option<Value>,
}

/// In-process action group. Activations are recorded, not executed.
#[derive(Default)]
pub struct SimpleActionGroup {
    actions: RefCell<BTreeMap<String, ActionState>>,
    activations: RefCell<Vec<ActionRecord>>,
    events: Signal<ActionEvent>,
}

impl SimpleActionGroup {
    pub fn new() -> Rc<Self> { Rc::new(Self::default()) }

    pub fn with_actions<'a>(names: impl IntoIterator<Item = &'a str>) -> Rc<Self> {
        let group = Self::new();
        for name in names {
            group.add_action(name);
        }
        group
    }

    pub fn add_action(&self, name: &str) {
        let fresh = self
            .actions
            .borrow_mut()
            .insert(name.to_string(), ActionState { enabled: true, state: None })
            .is_none();
        if fresh {
            self.events.emit(&ActionEvent::Added(name.to_string()));
        }
    }

    pub fn remove_action(&self, name: &str) {
        if self.actions.borrow_mut().remove(name).is_some() {
            self.events.emit(&ActionEvent::Removed(name.to_string()));
        }
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) {
        let changed = match self.actions.borrow_mut().get_mut(name) {
            Some(action) if action.enabled != enabled => {
                action.enabled = enabled;
                true
            }
            _ => false,
        };
        if changed {
            self.events.emit(&ActionEvent::EnabledChanged(name.to_string(), enabled));
        }
    }

    pub fn set_state(&self, name: &str, state: Value) {
        let found = match self.actions.borrow_mut().get_mut(name) {
            Some(action) => {
                action.state = Some(state);
                true
            }
            None => false,
        };
        if found {
            self.events.emit(&ActionEvent::StateChanged(name.to_string()));
        }
    }

    pub fn state(&self, name: &str) -> Option<Value> {
        self.actions.borrow().get(name).and_then(|a| a.state.clone())
    }

    pub fn activations(&self) -> Vec<ActionRecord> { self.activations.borrow().clone() }
}

impl ActionGroup for SimpleActionGroup {
    fn list_actions(&self) -> Vec<String> { self.actions.borrow().keys().cloned().collect() }

    fn has_action(&self, name: &str) -> bool { self.actions.borrow().contains_key(name) }

    fn is_enabled(&self, name: &str) -> bool {
        self.actions.borrow().get(name).is_some_and(|a| a.enabled)
    }

    fn activate(&self, name: &str, parameter: Option<&Value>, platform_data: &PlatformData) {
        if !self.is_enabled(name) {
            debug!(name, "ignoring activation of missing or disabled action");
            return;
        }
        self.activations.borrow_mut().push(ActionRecord {
            action: name.to_string(),
            parameter: parameter.cloned(),
            platform_data: platform_data.clone(),
        });
    }

    fn events(&self) -> &Signal<ActionEvent> { &self.events }
}

/// Routes `prefix.action` names to the group bound under `prefix`.
///
/// Names without a bound prefix go to the group bound without one.
#[derive(Default)]
pub struct ActionMuxer {
    groups: RefCell<BTreeMap<Option<String>, (Rc<dyn ActionGroup>, Subscription)>>,
    events: Signal<ActionEvent>,
}

impl ActionMuxer {
    pub fn new() -> Rc<Self> { Rc::new(Self::default()) }

    pub fn insert(&self, prefix: Option<&str>, group: Rc<dyn ActionGroup>) {
        let events = self.events.clone();
        let owned_prefix = prefix.map(str::to_string);
        let qualify = move |name: &str| match &owned_prefix {
            Some(p) => format!("{p}.{name}"),
            None => name.to_string(),
        };
        let sub = group.events().connect(move |event| {
            let event = match event {
                ActionEvent::Added(n) => ActionEvent::Added(qualify(n)),
                ActionEvent::Removed(n) => ActionEvent::Removed(qualify(n)),
                ActionEvent::EnabledChanged(n, e) => ActionEvent::EnabledChanged(qualify(n), *e),
                ActionEvent::StateChanged(n) => ActionEvent::StateChanged(qualify(n)),
            };
            events.emit(&event);
        });
        self.groups.borrow_mut().insert(prefix.map(str::to_string), (group, sub));
    }

    pub fn remove(&self, prefix: Option<&str>) -> Option<Rc<dyn ActionGroup>> {
        self.groups
            .borrow_mut()
            .remove(&prefix.map(str::to_string))
            .map(|(group, _)| group)
    }

    pub fn get(&self, prefix: Option<&str>) -> Option<Rc<dyn ActionGroup>> {
        self.groups
            .borrow()
            .get(&prefix.map(str::to_string))
            .map(|(group, _)| group.clone())
    }

    pub fn prefixes(&self) -> Vec<Option<String>> { self.groups.borrow().keys().cloned().collect() }

    fn route(&self, name: &str) -> Option<(Rc<dyn ActionGroup>, String)> {
        if let Some((prefix, rest)) = name.split_once('.')
            && let Some(group) = self.get(Some(prefix))
        {
            return Some((group, rest.to_string()));
        }
        self.get(None).map(|group| (group, name.to_string()))
    }
}

impl ActionGroup for ActionMuxer {
    fn list_actions(&self) -> Vec<String> {
        let groups = self.groups.borrow();
        let mut names = Vec::new();
        for (prefix, (group, _)) in groups.iter() {
            names.extend(group.list_actions().into_iter().map(|n| match prefix {
                Some(p) => format!("{p}.{n}"),
                None => n,
            }));
        }
        names
    }

    fn has_action(&self, name: &str) -> bool {
        self.route(name).is_some_and(|(group, n)| group.has_action(&n))
    }

    fn is_enabled(&self, name: &str) -> bool {
        self.route(name).is_some_and(|(group, n)| group.is_enabled(&n))
    }

    fn activate(&self, name: &str, parameter: Option<&Value>, platform_data: &PlatformData) {
        if let Some((group, n)) = self.route(name) {
            group.activate(&n, parameter, platform_data);
        }
    }

    fn events(&self) -> &Signal<ActionEvent> { &self.events }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn enabled_changes_are_reported_once() {
        let group = SimpleActionGroup::with_actions(["save"]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _sub = group.events().connect(move |e| s.borrow_mut().push(e.clone()));

        group.set_enabled("save", false);
        group.set_enabled("save", false);
        group.set_enabled("missing", false);

        assert_eq!(*seen.borrow(), vec![ActionEvent::EnabledChanged("save".into(), false)]);
        assert!(!group.is_enabled("save"));
    }

    #[test]
    fn disabled_actions_do_not_activate() {
        let group = SimpleActionGroup::with_actions(["quit"]);
        group.set_enabled("quit", false);
        group.activate("quit", None, &PlatformData::new());
        assert!(group.activations().is_empty());
    }

    #[test]
    fn muxer_routes_by_prefix() {
        let app = SimpleActionGroup::with_actions(["new"]);
        let bare = SimpleActionGroup::with_actions(["app.open", "close"]);
        let muxer = ActionMuxer::new();
        muxer.insert(Some("app"), app.clone());
        muxer.insert(None, bare.clone());

        assert!(muxer.has_action("app.new"));
        assert!(!muxer.has_action("app.open"));
        assert!(muxer.has_action("close"));
        assert!(!muxer.has_action("win.close"));

        muxer.activate("app.new", None, &PlatformData::new());
        assert_eq!(app.activations()[0].action, "new");
    }

    #[test]
    fn muxer_falls_back_to_unprefixed_group() {
        let bare = SimpleActionGroup::with_actions(["app.new"]);
        let muxer = ActionMuxer::new();
        muxer.insert(None, bare.clone());
        assert!(muxer.is_enabled("app.new"));
    }

    #[test]
    fn muxer_forwards_qualified_events() {
        let app = SimpleActionGroup::new();
        let muxer = ActionMuxer::new();
        muxer.insert(Some("app"), app.clone());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _sub = muxer.events().connect(move |e| s.borrow_mut().push(e.clone()));

        app.add_action("new");
        muxer.remove(Some("app"));
        app.add_action("open");

        assert_eq!(*seen.borrow(), vec![ActionEvent::Added("app.new".into())]);
    }
}
