use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use tracing::{debug, info, warn};

use super::reactor::{self, Event};
use crate::common::config::Config;

const DEBOUNCE: Duration = Duration::from_millis(250);

/// Reloads the config file when it changes and hands the result to the
/// reactor. A file that no longer parses is reported and skipped.
pub struct ConfigWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl ConfigWatcher {
    pub fn spawn(path: PathBuf, events: reactor::Sender) -> anyhow::Result<Self> {
        // change events carry absolute paths
        let path = path.canonicalize().unwrap_or(path);
        // editors replace the file, so watch its directory
        let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new(".")).to_path_buf();
        let file = path.clone();
        let mut debouncer = new_debouncer(DEBOUNCE, move |result: DebounceEventResult| match result {
            Ok(changes) => {
                if changes.iter().any(|change| change.path == file) {
                    reload(&file, &events);
                }
            }
            Err(e) => warn!("config watch error: {e}"),
        })?;
        debouncer.watcher().watch(&dir, RecursiveMode::NonRecursive)?;
        info!(path = %path.display(), "watching config");
        Ok(Self { _debouncer: debouncer })
    }
}

fn reload(path: &Path, events: &reactor::Sender) {
    if !path.exists() {
        debug!(path = %path.display(), "config removed, keeping current settings");
        return;
    }
    match Config::read(path) {
        Ok(config) => {
            info!(path = %path.display(), "config changed");
            events.send(Event::ConfigUpdated(Box::new(config)));
        }
        Err(e) => warn!("not applying config: {e:#}"),
    }
}
