//! Read-models published to clients.

pub mod server;

pub use server::{
    AppstackRow, ApplicationData, ContextData, ItemNode, LegacyRow, QueryData, ResultRow,
};
