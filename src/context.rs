//! State shared by every object of one service instance.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::info;

use crate::app::appinfo::{AppInfo, NoAppInfo};
use crate::collector::KeywordTables;
use crate::common::config::{Config, MenuSettings, WindowFilter};
use crate::common::usage::UsageStore;
use crate::query::voice::{NoVoice, VoiceEngine};
use crate::remote::RemoteBus;
use crate::search::{Ranker, TokenDistance};
use crate::source::ItemId;

/// Hands out query numbers, item ids and export path suffixes.
#[derive(Debug, Default)]
pub struct Allocator {
    next_query: Cell<u32>,
    next_item: Cell<u64>,
    next_export: Cell<u32>,
}

impl Allocator {
    pub fn query_number(&self) -> u32 { bump(&self.next_query) }

    pub fn item_id(&self) -> ItemId {
        let id = self.next_item.get();
        self.next_item.set(id + 1);
        ItemId(id)
    }

    pub fn export_number(&self) -> u32 { bump(&self.next_export) }
}

fn bump(counter: &Cell<u32>) -> u32 {
    let n = counter.get();
    counter.set(n.wrapping_add(1));
    n
}

pub struct HudContext {
    pub allocator: Allocator,
    pub bus: Rc<dyn RemoteBus>,
    pub usage: Rc<UsageStore>,
    pub keywords: KeywordTables,
    pub app_info: Rc<dyn AppInfo>,
    pub voice: Rc<dyn VoiceEngine>,
    ranker: TokenDistance,
    menus: RefCell<MenuSettings>,
    window_filter: RefCell<WindowFilter>,
}

impl HudContext {
    pub fn new(
        config: &Config,
        bus: Rc<dyn RemoteBus>,
        usage: Rc<UsageStore>,
        app_info: Rc<dyn AppInfo>,
        voice: Rc<dyn VoiceEngine>,
    ) -> anyhow::Result<Rc<Self>> {
        let settings = &config.settings;
        Ok(Rc::new(Self {
            allocator: Allocator::default(),
            bus,
            usage,
            keywords: KeywordTables::new(settings.keywords.dir()),
            app_info,
            voice,
            ranker: TokenDistance::new(settings.search),
            menus: RefCell::new(settings.menus.clone()),
            window_filter: RefCell::new(settings.focus.filter()?),
        }))
    }

    /// Default settings, no files, no voice.
    pub fn in_memory(bus: Rc<dyn RemoteBus>) -> Rc<Self> {
        let config = Config::default_config();
        Rc::new(Self {
            allocator: Allocator::default(),
            bus,
            usage: Rc::new(UsageStore::in_memory()),
            keywords: KeywordTables::empty(),
            app_info: Rc::new(NoAppInfo),
            voice: Rc::new(NoVoice),
            ranker: TokenDistance::new(config.settings.search),
            menus: RefCell::new(config.settings.menus),
            window_filter: RefCell::new(config.settings.focus.filter().unwrap_or_default()),
        })
    }

    pub fn ranker(&self) -> &dyn Ranker { &self.ranker }

    pub fn depth(&self) -> u32 { self.menus.borrow().depth }

    pub fn export_base(&self) -> String { self.menus.borrow().export_base.clone() }

    pub fn indicator_penalty(&self) -> u32 { self.ranker.settings().indicator_penalty }

    pub fn is_ignored_window(&self, name: &str) -> bool { self.window_filter.borrow().is_ignored(name) }

    /// Applies a reloaded config. Only settings that can change under a
    /// running service are taken: ranking weights, menu depth, keyword
    /// tables and the focus filter.
    pub fn apply(&self, config: &Config) -> anyhow::Result<()> {
        let settings = &config.settings;
        let filter = settings.focus.filter()?;
        self.ranker.set_settings(settings.search);
        self.menus.borrow_mut().depth = settings.menus.depth;
        self.keywords.reload(settings.keywords.dir());
        *self.window_filter.borrow_mut() = filter;
        info!("applied new settings");
        Ok(())
    }
}

/// Makes `text` usable as one object path segment.
pub fn path_segment(text: &str) -> String {
    let segment: String =
        text.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect();
    if segment.is_empty() { "_".into() } else { segment }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::LocalBus;

    #[test]
    fn counters_are_independent() {
        let allocator = Allocator::default();
        assert_eq!(allocator.query_number(), 0);
        assert_eq!(allocator.query_number(), 1);
        assert_eq!(allocator.export_number(), 0);
        assert_eq!(allocator.item_id(), ItemId(0));
        assert_eq!(allocator.item_id(), ItemId(1));
    }

    #[test]
    fn segments_are_sanitized() {
        assert_eq!(path_segment("org.gnome.gedit"), "org_gnome_gedit");
        assert_eq!(path_segment("gimp-2.10"), "gimp_2_10");
        assert_eq!(path_segment(""), "_");
    }

    #[test]
    fn reload_updates_weights() {
        let ctx = HudContext::in_memory(LocalBus::new());
        let mut config = Config::default_config();
        config.settings.search.indicator_penalty = 20;
        config.settings.menus.depth = 2;
        config.settings.focus.ignored = vec!["launcher".into()];
        ctx.apply(&config).unwrap();
        assert_eq!(ctx.indicator_penalty(), 20);
        assert_eq!(ctx.depth(), 2);
        assert!(ctx.is_ignored_window("launcher"));
    }
}
