use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;

use tracing::trace;

use crate::common::collections::HashMap;

/// Where application metadata comes from.
pub trait AppInfo {
    fn icon(&self, app_id: &str) -> Option<String>;
}

pub struct NoAppInfo;

impl AppInfo for NoAppInfo {
    fn icon(&self, _app_id: &str) -> Option<String> { None }
}

/// Reads `Icon=` out of `{dir}/applications/{app_id}.desktop`.
pub struct DesktopFiles {
    dirs: Vec<PathBuf>,
    cache: RefCell<HashMap<String, Option<String>>>,
}

impl DesktopFiles {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs,
            cache: RefCell::new(HashMap::default()),
        }
    }

    /// The user data dir followed by `XDG_DATA_DIRS` (or its default).
    pub fn from_env() -> Self {
        let mut dirs: Vec<PathBuf> = dirs::data_dir().into_iter().collect();
        let system = std::env::var("XDG_DATA_DIRS")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "/usr/local/share:/usr/share".into());
        dirs.extend(system.split(':').filter(|d| !d.is_empty()).map(PathBuf::from));
        Self::new(dirs)
    }

    fn lookup(&self, app_id: &str) -> Option<String> {
        let name = format!("{app_id}.desktop");
        self.dirs.iter().find_map(|dir| {
            let text = fs::read_to_string(dir.join("applications").join(&name)).ok()?;
            trace!(app_id, dir = %dir.display(), "found desktop file");
            desktop_icon(&text)
        })
    }
}

impl AppInfo for DesktopFiles {
    fn icon(&self, app_id: &str) -> Option<String> {
        if let Some(icon) = self.cache.borrow().get(app_id) {
            return icon.clone();
        }
        let icon = self.lookup(app_id);
        self.cache.borrow_mut().insert(app_id.to_string(), icon.clone());
        icon
    }
}

fn desktop_icon(text: &str) -> Option<String> {
    let mut in_entry = false;
    for line in text.lines().map(str::trim) {
        if line.starts_with('[') {
            in_entry = line == "[Desktop Entry]";
            continue;
        }
        if !in_entry {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "Icon" {
                let value = value.trim();
                return (!value.is_empty()).then(|| value.to_string());
            }
        }
    }
    None
}
