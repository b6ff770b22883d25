use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::collections::BTreeMap;

#[derive(Debug, Default, Serialize, Deserialize)]
struct UsageTable {
    // app id -> label path joined with " > " -> activations
    apps: BTreeMap<String, BTreeMap<String, u32>>,
}

/// How often each command has been activated.
pub struct UsageStore {
    table: RefCell<UsageTable>,
    path: Option<PathBuf>,
    dirty: Cell<bool>,
}

fn key(label_path: &[String]) -> String { label_path.join(" > ") }

impl UsageStore {
    pub fn in_memory() -> Self {
        Self {
            table: RefCell::new(UsageTable::default()),
            path: None,
            dirty: Cell::new(false),
        }
    }

    /// Loads counters from a RON file. A missing file is an empty store.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let table = match fs::read_to_string(path) {
            Ok(text) => ron::from_str(&text)
                .with_context(|| format!("parsing usage data {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => UsageTable::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading usage data {}", path.display()));
            }
        };
        debug!(path = %path.display(), apps = table.apps.len(), "loaded usage data");
        Ok(Self {
            table: RefCell::new(table),
            path: Some(path.to_path_buf()),
            dirty: Cell::new(false),
        })
    }

    pub fn usage(&self, app_id: &str, label_path: &[String]) -> u32 {
        self.table
            .borrow()
            .apps
            .get(app_id)
            .and_then(|entries| entries.get(&key(label_path)))
            .copied()
            .unwrap_or(0)
    }

    pub fn mark(&self, app_id: &str, label_path: &[String]) {
        let mut table = self.table.borrow_mut();
        let count = table
            .apps
            .entry(app_id.to_string())
            .or_default()
            .entry(key(label_path))
            .or_insert(0);
        *count = count.saturating_add(1);
        self.dirty.set(true);
    }

    /// Writes the counters back if the store is file-backed and changed.
    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        if !self.dirty.get() {
            return Ok(());
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let text = ron::ser::to_string_pretty(&*self.table.borrow(), ron::ser::PrettyConfig::default())?;
        fs::write(path, text).with_context(|| format!("writing usage data {}", path.display()))?;
        self.dirty.set(false);
        info!(path = %path.display(), "saved usage data");
        Ok(())
    }
}
