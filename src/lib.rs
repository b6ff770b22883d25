//! Command index for a heads-up display: collects the menus of running
//! applications and system indicators and answers fuzzy searches over them.

pub mod actor;
pub mod app;
pub mod collector;
pub mod common;
pub mod context;
pub mod ipc;
pub mod model;
pub mod query;
pub mod remote;
pub mod search;
pub mod service;
pub mod source;
pub mod sys;
