//! Remotely-owned menus and action groups, and the bus they are reached on.

pub mod actions;
pub mod bus;
pub mod legacy;
pub mod menu;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use actions::{ActionEvent, ActionGroup, ActionMuxer, ActionRecord, SimpleActionGroup};
pub use bus::{Export, Exported, LocalBus, RemoteBus};
pub use legacy::{LayoutNode, LayoutProperties, LegacyMenu, SimpleLegacyMenu};
pub use menu::{ItemsChanged, MenuEntry, MenuItemDescription, MenuModel, SimpleMenu};

pub type LocalBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Key/value hints passed along with an activation.
pub type PlatformData = Map<String, Value>;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("object path {0} is already exported")]
    Exists(String),
    #[error("{0} is not a valid object path")]
    InvalidPath(String),
    #[error("{0} does not implement the awareness interface")]
    NotAware(RemoteRef),
    #[error("{0} has no owner on the bus")]
    NameHasNoOwner(String),
}

/// Address of an object owned by some other process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteRef {
    pub bus_name: String,
    pub path: String,
}

impl RemoteRef {
    pub fn new(bus_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self { bus_name: bus_name.into(), path: path.into() }
    }
}

impl fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.bus_name, self.path)
    }
}

/// `/` or `/seg(/seg)*` with segments of `[A-Za-z0-9_]`.
pub fn is_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    let Some(rest) = path.strip_prefix('/') else { return false };
    rest.split('/').all(|segment| {
        !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

/// Platform data carrying a startup timestamp.
pub fn timestamp_platform_data(timestamp: u32) -> PlatformData {
    let mut data = Map::new();
    data.insert("desktop-startup-id".into(), Value::String(format!("_TIME{timestamp}")));
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_paths() {
        assert!(is_object_path("/"));
        assert!(is_object_path("/com/canonical/hud/query0"));
        assert!(!is_object_path(""));
        assert!(!is_object_path("/com//hud"));
        assert!(!is_object_path("/com/hud/"));
        assert!(!is_object_path("com/hud"));
        assert!(!is_object_path("/com/hud-menu"));
    }

    #[test]
    fn startup_id_format() {
        let data = timestamp_platform_data(42);
        assert_eq!(data["desktop-startup-id"], "_TIME42");
    }
}
