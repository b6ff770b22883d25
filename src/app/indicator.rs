//! System indicators: menus owned by well-known bus names, indexed while
//! their owner is present.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, info, warn};

use crate::collector::{CollectorOptions, LegacyCollector, MenuModelCollector};
use crate::common::config::{IndicatorConfig, MenuProtocol};
use crate::context::{HudContext, path_segment};
use crate::search::TokenList;
use crate::source::{
    ActivateEvent, AppEntry, CommandItem, SearchResult, Signal, Source, SourceKind, Subscription,
    ToolbarItem,
};

struct Live {
    collector: Rc<dyn Source>,
    _changed: Subscription,
}

struct Indicator {
    config: IndicatorConfig,
    live: Option<Live>,
    _watch: Subscription,
}

#[derive(Default)]
struct State {
    indicators: Vec<Indicator>,
    use_count: u32,
}

pub struct IndicatorSource {
    ctx: Rc<HudContext>,
    state: RefCell<State>,
    changed: Signal,
}

impl IndicatorSource {
    pub fn new(ctx: &Rc<HudContext>, indicators: &[IndicatorConfig]) -> Rc<Self> {
        let this = Rc::new(Self {
            ctx: ctx.clone(),
            state: RefCell::new(State::default()),
            changed: Signal::new(),
        });
        for (index, config) in indicators.iter().enumerate() {
            let weak = Rc::downgrade(&this);
            let handler: Rc<dyn Fn(bool)> = Rc::new(move |owned| {
                if let Some(this) = weak.upgrade() {
                    this.owner_changed(index, owned);
                }
            });
            let watch = ctx.bus.watch_name(&config.bus_name, handler);
            this.state.borrow_mut().indicators.push(Indicator {
                config: config.clone(),
                live: None,
                _watch: watch,
            });
        }
        this
    }

    /// Ids of the indicators whose owner is present.
    pub fn live_indicators(&self) -> Vec<String> {
        let state = self.state.borrow();
        state.indicators.iter().filter(|i| i.live.is_some()).map(|i| i.config.id.clone()).collect()
    }

    /// Rebuilds the indicator's collector each time its owner appears or
    /// publishes another object, and drops it when the owner goes away.
    fn owner_changed(self: &Rc<Self>, index: usize, owned: bool) {
        let Some(config) = self.state.borrow().indicators.get(index).map(|i| i.config.clone()) else {
            return;
        };
        let gone = self.state.borrow_mut().indicators[index].live.take();
        let use_count = self.state.borrow().use_count;
        if let Some(gone) = gone {
            for _ in 0..use_count {
                gone.collector.deactivate();
            }
        }
        if !owned {
            info!(id = config.id, "indicator vanished");
            self.changed.notify();
            return;
        }

        let Some(collector) = self.collector(&config) else {
            self.changed.notify();
            return;
        };
        info!(id = config.id, bus = config.bus_name, "indicator appeared");
        for _ in 0..use_count {
            collector.activate();
        }
        let weak: Weak<Self> = Rc::downgrade(self);
        let changed = collector.changed().connect(move |_| {
            if let Some(this) = weak.upgrade() {
                this.changed.notify();
            }
        });
        self.state.borrow_mut().indicators[index].live = Some(Live { collector, _changed: changed });
        self.changed.notify();
    }

    fn collector(&self, config: &IndicatorConfig) -> Option<Rc<dyn Source>> {
        let options = CollectorOptions {
            prefix: Some(config.label.clone()),
            penalty: self.ctx.indicator_penalty(),
            kind: SourceKind::Indicator,
            ..CollectorOptions::new(&config.id, &config.icon)
        };
        match config.protocol {
            MenuProtocol::MenuModel => {
                let path = format!("{}/indicators/{}", self.ctx.export_base(), path_segment(&config.id));
                let options = CollectorOptions { export_path: Some(path), ..options };
                let collector = MenuModelCollector::new(&self.ctx, options);
                if !collector.add_endpoint(&config.bus_name, &config.menu_path, &config.actions_path()) {
                    warn!(id = config.id, "indicator menu incomplete");
                }
                Some(collector)
            }
            MenuProtocol::Legacy => {
                let collector =
                    LegacyCollector::for_remote(&self.ctx, options, &config.bus_name, &config.menu_path)?;
                Some(collector)
            }
        }
    }

    fn collectors(&self) -> Vec<Rc<dyn Source>> {
        let state = self.state.borrow();
        state.indicators.iter().filter_map(|i| i.live.as_ref()).map(|l| l.collector.clone()).collect()
    }
}

impl Source for IndicatorSource {
    fn activate(&self) {
        let first = {
            let mut state = self.state.borrow_mut();
            state.use_count += 1;
            state.use_count == 1
        };
        if first {
            debug!("indicators in use");
            for collector in self.collectors() {
                collector.activate();
            }
        }
    }

    fn deactivate(&self) {
        let last = {
            let mut state = self.state.borrow_mut();
            if state.use_count == 0 {
                warn!("unbalanced deactivate");
                return;
            }
            state.use_count -= 1;
            state.use_count == 0
        };
        if last {
            for collector in self.collectors() {
                collector.deactivate();
            }
        }
    }

    fn search(&self, query: &TokenList, results: &mut Vec<SearchResult>) {
        for collector in self.collectors() {
            collector.search(query, results);
        }
    }

    fn list_applications(&self, query: &TokenList, apps: &mut Vec<AppEntry>) {
        for collector in self.collectors() {
            collector.list_applications(query, apps);
        }
    }

    fn get(self: Rc<Self>, app_id: &str) -> Option<Rc<dyn Source>> {
        self.collectors().into_iter().find_map(|collector| collector.get(app_id))
    }

    fn snapshot_items(&self) -> Vec<Rc<CommandItem>> {
        self.collectors().iter().flat_map(|collector| collector.snapshot_items()).collect()
    }

    fn toolbar_entries(&self, entries: &mut Vec<ToolbarItem>) {
        for collector in self.collectors() {
            collector.toolbar_entries(entries);
        }
    }

    fn activate_toolbar(&self, item: ToolbarItem, event: &ActivateEvent) {
        for collector in self.collectors() {
            collector.activate_toolbar(item, event);
        }
    }

    fn changed(&self) -> &Signal { &self.changed }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::remote::{
        LayoutNode, LocalBus, MenuEntry, RemoteRef, SimpleActionGroup, SimpleLegacyMenu, SimpleMenu,
    };
    use crate::sys::main_loop;

    fn config(id: &str, bus: &str, protocol: MenuProtocol) -> IndicatorConfig {
        IndicatorConfig {
            id: id.into(),
            bus_name: bus.into(),
            menu_path: format!("/{}/menu", path_segment(id)),
            actions_path: None,
            label: "Sound".into(),
            icon: "audio-volume-high-panel".into(),
            protocol,
        }
    }

    #[test]
    fn legacy_indicator_follows_its_owner() {
        let bus = LocalBus::new();
        let ctx = HudContext::in_memory(bus.clone());
        let config = config("indicator-sound", "com.canonical.indicator.sound", MenuProtocol::Legacy);
        let source = IndicatorSource::new(&ctx, &[config.clone()]);
        source.activate();

        let menu = SimpleLegacyMenu::new(vec![LayoutNode::item(1, "Mute")]);
        bus.publish_legacy_menu(RemoteRef::new(&config.bus_name, &config.menu_path), menu.clone());
        main_loop::run_until_idle();
        assert_eq!(source.live_indicators(), vec!["indicator-sound".to_string()]);

        let mut results = Vec::new();
        source.search(&TokenList::parse("mute"), &mut results);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item.label_path(), ["Sound", "Mute"]);
        // appearing while in use means the menu was opened
        assert_eq!(menu.events()[0].1, "opened");

        let mut apps = Vec::new();
        source.list_applications(&TokenList::parse("mute"), &mut apps);
        assert_eq!(apps[0].kind, SourceKind::Indicator);

        bus.release_name(&config.bus_name);
        assert!(source.live_indicators().is_empty());
        assert_eq!(menu.events().last().unwrap().1, "closed");
        source.deactivate();
    }

    #[test]
    fn menu_model_indicator_published_piecewise_after_startup() {
        let bus = LocalBus::new();
        let ctx = HudContext::in_memory(bus.clone());
        let config = config("indicator-messages", "com.canonical.indicator.messages", MenuProtocol::MenuModel);
        let source = IndicatorSource::new(&ctx, &[config.clone()]);
        source.activate();
        main_loop::run_until_idle();
        assert!(source.live_indicators().is_empty());

        bus.publish_actions(
            RemoteRef::new(&config.bus_name, config.actions_path()),
            SimpleActionGroup::with_actions(["clear"]),
        );
        bus.publish_menu(
            RemoteRef::new(&config.bus_name, &config.menu_path),
            SimpleMenu::from_entries(vec![MenuEntry::item("Clear", "clear")]),
        );
        main_loop::run_until_idle();
        assert_eq!(source.live_indicators(), vec!["indicator-messages".to_string()]);

        let mut results = Vec::new();
        source.search(&TokenList::parse("clear"), &mut results);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item.label_path(), ["Sound", "Clear"]);
        source.deactivate();
    }

    #[test]
    fn menu_model_indicator_is_penalized_and_exported() {
        let bus = LocalBus::new();
        let ctx = HudContext::in_memory(bus.clone());
        let config = config("indicator-messages", "com.canonical.indicator.messages", MenuProtocol::MenuModel);
        bus.publish_actions(
            RemoteRef::new(&config.bus_name, config.actions_path()),
            SimpleActionGroup::with_actions(["clear"]),
        );
        bus.publish_menu(
            RemoteRef::new(&config.bus_name, &config.menu_path),
            SimpleMenu::from_entries(vec![MenuEntry::item("Clear", "clear")]),
        );
        let source = IndicatorSource::new(&ctx, &[config]);
        assert!(source.live_indicators().is_empty());
        main_loop::run_until_idle();

        let mut results = Vec::new();
        source.search(&TokenList::parse("clear"), &mut results);
        assert_eq!(results.len(), 1);
        assert!(bus.exported_paths().contains(&"/com/canonical/hud/indicators/indicator_messages".to_string()));
        assert!(source.clone().get("indicator-messages").is_some());
    }
}
