use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::collections::HashSet;
use crate::remote::is_object_path;
use crate::search::SearchSettings;

pub fn config_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hud-service")
        .join("config.toml")
}

pub fn data_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("hud-service")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub settings: Settings,
    #[serde(default = "default_indicators")]
    pub indicators: Vec<IndicatorConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub search: SearchSettings,
    pub menus: MenuSettings,
    pub focus: FocusSettings,
    pub keywords: KeywordSettings,
    pub usage: UsageSettings,
    pub ipc: IpcSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MenuSettings {
    /// How many submenu levels are indexed before a submenu is only exported.
    pub depth: u32,
    pub export_base: String,
}

impl Default for MenuSettings {
    fn default() -> Self {
        Self {
            depth: 10,
            export_base: "/com/canonical/hud".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusSettings {
    /// Windows (by title or app id) whose focus is ignored.
    pub ignored: Vec<String>,
    /// Same, as regular expressions.
    pub ignored_patterns: Vec<String>,
}

impl Default for FocusSettings {
    fn default() -> Self {
        let ignored = [
            "Hud Prototype Test",
            "Hud",
            "DNDCollectionWindow",
            "launcher",
            "dash",
            "Dash",
            "panel",
            "hud",
            "unity-2d-shell",
        ];
        Self {
            ignored: ignored.into_iter().map(String::from).collect(),
            ignored_patterns: Vec::new(),
        }
    }
}

impl FocusSettings {
    pub fn filter(&self) -> anyhow::Result<WindowFilter> {
        let patterns = self
            .ignored_patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("invalid ignored pattern {p:?}")))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(WindowFilter {
            names: self.ignored.iter().cloned().collect(),
            patterns,
        })
    }
}

/// Decides which focus changes are not worth following.
#[derive(Debug, Clone, Default)]
pub struct WindowFilter {
    names: HashSet<String>,
    patterns: Vec<Regex>,
}

impl WindowFilter {
    pub fn is_ignored(&self, name: &str) -> bool {
        self.names.contains(name) || self.patterns.iter().any(|p| p.is_match(name))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordSettings {
    /// Directory of `<app_id>.toml` keyword tables.
    pub dir: Option<PathBuf>,
}

impl KeywordSettings {
    pub fn dir(&self) -> PathBuf { self.dir.clone().unwrap_or_else(|| data_dir().join("keywords")) }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageSettings {
    pub persist: bool,
    pub path: Option<PathBuf>,
}

impl UsageSettings {
    pub fn path(&self) -> PathBuf { self.path.clone().unwrap_or_else(|| data_dir().join("usage.ron")) }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcSettings {
    pub socket: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuProtocol {
    MenuModel,
    #[default]
    Legacy,
}

/// A system indicator whose menu is indexed while its bus name is owned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub id: String,
    pub bus_name: String,
    pub menu_path: String,
    /// Unprefixed action group of a menu model indicator. Defaults to
    /// `menu_path` without its trailing `/menu`.
    #[serde(default)]
    pub actions_path: Option<String>,
    /// Label prepended to every item, like "Sound".
    pub label: String,
    pub icon: String,
    #[serde(default)]
    pub protocol: MenuProtocol,
}

impl IndicatorConfig {
    pub fn actions_path(&self) -> String {
        if let Some(path) = &self.actions_path {
            return path.clone();
        }
        match self.menu_path.strip_suffix("/menu") {
            Some(base) if !base.is_empty() => base.to_string(),
            _ => self.menu_path.clone(),
        }
    }
}

fn indicator(id: &str, bus: &str, path: &str, label: &str, icon: &str) -> IndicatorConfig {
    IndicatorConfig {
        id: id.into(),
        bus_name: bus.into(),
        menu_path: path.into(),
        actions_path: None,
        label: label.into(),
        icon: icon.into(),
        protocol: MenuProtocol::Legacy,
    }
}

fn default_indicators() -> Vec<IndicatorConfig> {
    vec![
        indicator(
            "indicator-datetime",
            "com.canonical.indicator.datetime",
            "/com/canonical/indicator/datetime/menu",
            "Date",
            "office-calendar",
        ),
        indicator(
            "indicator-session-device",
            "com.canonical.indicator.session",
            "/com/canonical/indicator/session/menu",
            "Device",
            "system-devices-panel",
        ),
        indicator(
            "indicator-session-user",
            "com.canonical.indicator.session",
            "/com/canonical/indicator/users/menu",
            "Users",
            "avatar-default",
        ),
        indicator(
            "indicator-sound",
            "com.canonical.indicator.sound",
            "/com/canonical/indicator/sound/menu",
            "Sound",
            "audio-volume-high-panel",
        ),
        IndicatorConfig {
            protocol: MenuProtocol::MenuModel,
            ..indicator(
                "indicator-messages",
                "com.canonical.indicator.messages",
                "/com/canonical/indicator/messages/menu",
                "Messages",
                "indicator-messages",
            )
        },
    ]
}

impl Default for Config {
    fn default() -> Self { Self::default_config() }
}

impl Config {
    pub fn default_config() -> Self {
        Self {
            settings: Settings::default(),
            indicators: default_indicators(),
        }
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Reads `path` if given (it must exist), else the default location if
    /// present, else defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            return Self::read(path);
        }
        let path = config_file();
        if path.exists() {
            info!(path = %path.display(), "loading config");
            Self::read(&path)
        } else {
            debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default_config())
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !is_object_path(&self.settings.menus.export_base) {
            bail!("menus.export_base {:?} is not an object path", self.settings.menus.export_base);
        }
        for indicator in &self.indicators {
            if !is_object_path(&indicator.menu_path) {
                bail!("indicator {} has invalid menu_path {:?}", indicator.id, indicator.menu_path);
            }
            if !is_object_path(&indicator.actions_path()) {
                bail!("indicator {} has invalid actions_path {:?}", indicator.id, indicator.actions_path());
            }
        }
        self.settings.focus.filter()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default_config());
        assert_eq!(config.indicators.len(), 5);
        assert_eq!(config.settings.menus.depth, 10);
        assert_eq!(config.settings.search.max_distance, 30);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [settings.search]
            swap_penalty = 5

            [settings.menus]
            depth = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.settings.search.swap_penalty, 5);
        assert_eq!(config.settings.search.add_penalty, 10);
        assert_eq!(config.settings.menus.depth, 3);
        assert_eq!(config.settings.menus.export_base, "/com/canonical/hud");
    }

    #[test]
    fn indicators_can_be_replaced() {
        let config = Config::parse(
            r#"
            [[indicators]]
            id = "indicator-test"
            bus_name = "org.example.Indicator"
            menu_path = "/org/example/menu"
            label = "Test"
            icon = "test"
            protocol = "menu_model"
            "#,
        )
        .unwrap();
        assert_eq!(config.indicators.len(), 1);
        assert_eq!(config.indicators[0].protocol, MenuProtocol::MenuModel);
        assert_eq!(config.indicators[0].actions_path(), "/org/example");
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(Config::parse("[settings.menus]\nexport_base = \"nope\"").is_err());
        assert!(Config::parse("[settings.focus]\nignored_patterns = [\"(\"]").is_err());
        assert!(Config::parse("[settings.search]\nadd_penalty = \"ten\"").is_err());
    }

    #[test]
    fn window_filter_matches_names_and_patterns() {
        let focus = FocusSettings {
            ignored: vec!["Hud".into()],
            ignored_patterns: vec!["^unity-.*".into()],
        };
        let filter = focus.filter().unwrap();
        assert!(filter.is_ignored("Hud"));
        assert!(filter.is_ignored("unity-panel"));
        assert!(!filter.is_ignored("gedit"));
    }

    #[test]
    fn read_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::read(&dir.path().join("missing.toml")).is_err());
        let path = dir.path().join("config.toml");
        fs::write(&path, "[settings.usage]\npersist = true\n").unwrap();
        assert!(Config::load(Some(&path)).unwrap().settings.usage.persist);
    }
}
