//! Per-application keyword tables.
//!
//! `{dir}/{app_id}.toml` maps menu labels to extra search keywords:
//!
//! ```toml
//! [keywords]
//! "Save As" = ["export", "copy"]
//! ```

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::common::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct KeywordMapping {
    #[serde(default)]
    keywords: BTreeMap<String, Vec<String>>,
}

impl KeywordMapping {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> { toml::from_str(text) }

    /// Missing or unreadable tables are empty.
    pub fn load(dir: &Path, app_id: &str) -> Self {
        let path = dir.join(format!("{app_id}.toml"));
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(_) => return Self::default(),
        };
        match Self::parse(&text) {
            Ok(mapping) => {
                debug!(path = %path.display(), labels = mapping.keywords.len(), "loaded keywords");
                mapping
            }
            Err(e) => {
                warn!(path = %path.display(), "ignoring keyword table: {e}");
                Self::default()
            }
        }
    }

    pub fn keywords(&self, label: &str) -> &[String] {
        self.keywords.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool { self.keywords.is_empty() }
}

/// Lazily loaded keyword tables, one per application.
pub struct KeywordTables {
    dir: RefCell<PathBuf>,
    cache: RefCell<HashMap<String, Rc<KeywordMapping>>>,
}

impl KeywordTables {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir: RefCell::new(dir),
            cache: RefCell::new(HashMap::default()),
        }
    }

    /// Tables that never load anything.
    pub fn empty() -> Self { Self::new(PathBuf::new()) }

    pub fn for_app(&self, app_id: &str) -> Rc<KeywordMapping> {
        if let Some(mapping) = self.cache.borrow().get(app_id) {
            return mapping.clone();
        }
        let dir = self.dir.borrow().clone();
        let mapping = if dir.as_os_str().is_empty() {
            Rc::new(KeywordMapping::default())
        } else {
            Rc::new(KeywordMapping::load(&dir, app_id))
        };
        self.cache.borrow_mut().insert(app_id.to_string(), mapping.clone());
        mapping
    }

    /// Forgets cached tables; collectors built afterwards see the new files.
    pub fn reload(&self, dir: PathBuf) {
        *self.dir.borrow_mut() = dir;
        self.cache.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn tables_map_labels() {
        let mapping = KeywordMapping::parse("[keywords]\n\"Save As\" = [\"export\", \"copy\"]\n").unwrap();
        assert_eq!(mapping.keywords("Save As"), ["export", "copy"]);
        assert!(mapping.keywords("Open").is_empty());
    }

    #[test]
    fn files_are_cached_until_reload() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("gedit.toml"), "[keywords]\nQuit = [\"exit\"]\n").unwrap();
        let tables = KeywordTables::new(dir.path().to_path_buf());
        assert_eq!(tables.for_app("gedit").keywords("Quit"), ["exit"]);
        assert!(tables.for_app("gimp").is_empty());

        fs::write(dir.path().join("gedit.toml"), "[keywords]\nQuit = [\"leave\"]\n").unwrap();
        assert_eq!(tables.for_app("gedit").keywords("Quit"), ["exit"]);
        tables.reload(dir.path().to_path_buf());
        assert_eq!(tables.for_app("gedit").keywords("Quit"), ["leave"]);
    }

    #[test]
    fn broken_table_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.toml"), "keywords = 3").unwrap();
        assert!(KeywordMapping::load(dir.path(), "bad").is_empty());
    }
}
