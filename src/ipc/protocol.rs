use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use static_assertions::assert_impl_all;

use crate::app::registry::{ActionSourceSpec, MenuSourceSpec};
use crate::app::{FocusEvent, WindowId};
use crate::common::error::{ErrorKind, HudError};
use crate::remote::{LayoutNode, MenuItemDescription};
use crate::source::ItemId;

/// Connection-scoped client name, unique for the life of the service.
/// Clients appear on the bus under this name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn nth(n: u64) -> Self { Self(format!(":1.{n}")) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    CreateQuery {
        #[serde(default)]
        search: String,
    },
    StartQuery {
        #[serde(default)]
        search: String,
        #[serde(default = "default_entries")]
        entries: usize,
    },
    CloseQuery {
        key: u64,
    },
    ExecuteQuery {
        key: ItemId,
        #[serde(default)]
        timestamp: u32,
    },
    RegisterApplication {
        app_id: String,
    },
    GetOpenQueries,
    GetApplications,
    DumpApplication {
        application: String,
    },

    UpdateQuery {
        query: String,
        #[serde(default)]
        search: String,
    },
    UpdateApp {
        query: String,
        #[serde(default)]
        app_id: String,
    },
    VoiceQuery {
        query: String,
    },
    Close {
        query: String,
    },
    ExecuteCommand {
        query: String,
        key: ItemId,
        #[serde(default)]
        timestamp: u32,
    },
    ExecuteParameterized {
        query: String,
        key: ItemId,
        #[serde(default)]
        timestamp: u32,
    },
    ExecuteToolbar {
        query: String,
        item: String,
        #[serde(default)]
        timestamp: u32,
    },
    GetResults {
        query: String,
    },
    GetAppstack {
        query: String,
    },

    AddSources {
        application: String,
        #[serde(default)]
        actions: Vec<ActionSourceSpec>,
        #[serde(default)]
        menus: Vec<MenuSourceSpec>,
    },
    SetWindowContext {
        application: String,
        window: WindowId,
        context: Option<String>,
    },

    WindowCreated {
        window: WindowId,
        app_id: String,
        #[serde(default)]
        title: String,
    },
    WindowDestroyed {
        window: WindowId,
    },
    WindowFocused {
        window: WindowId,
        app_id: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        side_stage: bool,
    },

    /// Publishes a menu under the calling client's name.
    PublishMenu {
        path: String,
        items: Vec<MenuItemDescription>,
    },
    PublishActions {
        path: String,
        actions: Vec<String>,
    },
    PublishLegacyMenu {
        path: String,
        items: Vec<LayoutNode>,
    },
    SetActionEnabled {
        path: String,
        action: String,
        enabled: bool,
    },
    /// Drops everything the named client published.
    NameVanished {
        name: String,
    },

    Subscribe {
        events: Vec<String>,
    },
    Unsubscribe {
        events: Vec<String>,
    },
}

fn default_entries() -> usize { 10 }

impl Request {
    /// The focus feed part of the protocol.
    pub fn focus_event(&self) -> Option<FocusEvent> {
        match self.clone() {
            Request::WindowCreated { window, app_id, title } => {
                Some(FocusEvent::WindowCreated { window, app_id, title })
            }
            Request::WindowDestroyed { window } => Some(FocusEvent::WindowDestroyed { window }),
            Request::WindowFocused { window, app_id, title, side_stage } => {
                Some(FocusEvent::WindowFocused { window, app_id, title, side_stage })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Success { result: Value },
    Error { error: ErrorBody },
}

impl Response {
    pub fn ok(result: impl Serialize) -> Self {
        match serde_json::to_value(result) {
            Ok(result) => Response::Success { result },
            Err(e) => Response::failed(format!("unable to encode reply: {e}")),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Response::Error {
            error: ErrorBody { kind: ErrorKind::Failed, message: message.into() },
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Response::Error {
            error: ErrorBody { kind: ErrorKind::InvalidArgs, message: message.into() },
        }
    }

    pub fn is_error(&self) -> bool { matches!(self, Response::Error { .. }) }
}

impl From<HudError> for Response {
    fn from(error: HudError) -> Self {
        Response::Error {
            error: ErrorBody { kind: error.kind(), message: error.to_string() },
        }
    }
}

impl<T: Serialize> From<Result<T, HudError>> for Response {
    fn from(result: Result<T, HudError>) -> Self {
        match result {
            Ok(value) => Response::ok(value),
            Err(error) => error.into(),
        }
    }
}

assert_impl_all!(Request: Send, Sync);
assert_impl_all!(Response: Send, Sync);
assert_impl_all!(ClientId: Send, Sync);
