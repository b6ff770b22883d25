use serde::{Deserialize, Serialize};

/// Error classes a client can tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgs,
    Failed,
}

/// Errors returned to clients. Nothing else is allowed to reach them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HudError {
    #[error("Item specified by command key does not exist")]
    UnknownItem,
    #[error("Item specified by command key is not a menu model item")]
    NotMenuModelItem,
    #[error("Item specified by command key does not have parameterized actions")]
    NotParameterized,
    #[error("Values returned by the model item are invalid")]
    InvalidParameterized,
    #[error("No source currently in use")]
    NoSource,
    #[error("Invalid toolbar item {0:?}")]
    UnknownToolbarItem(String),
    #[error("Toolbar item {0} is not supported")]
    UnsupportedToolbarItem(String),
    #[error("Unknown query {0}")]
    UnknownQuery(String),
    #[error("Unknown application object {0}")]
    UnknownApplication(String),
    #[error("Unable to get path for the created application")]
    NoApplicationPath,
    #[error("Application id must not be empty")]
    EmptyAppId,
    #[error("Query key {0} does not match an open query")]
    UnknownQueryKey(u64),
    #[error("Voice query failed: {0}")]
    Voice(String),
}

impl HudError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HudError::UnknownItem
            | HudError::NotMenuModelItem
            | HudError::NotParameterized
            | HudError::UnknownToolbarItem(_)
            | HudError::UnknownQuery(_)
            | HudError::UnknownApplication(_)
            | HudError::EmptyAppId
            | HudError::UnknownQueryKey(_) => ErrorKind::InvalidArgs,
            HudError::InvalidParameterized
            | HudError::NoSource
            | HudError::UnsupportedToolbarItem(_)
            | HudError::NoApplicationPath
            | HudError::Voice(_) => ErrorKind::Failed,
        }
    }
}
