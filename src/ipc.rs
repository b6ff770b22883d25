//! JSON-lines front end on a Unix socket.
//!
//! Each connection is one client. Requests are answered in order; event
//! notifications a client subscribed to are interleaved as they happen.

pub mod protocol;
pub mod server;
pub mod subscriptions;

pub use protocol::{ClientId, ErrorBody, Request, Response};
pub use server::{IpcServer, default_socket_path};
pub use subscriptions::{ServerState, SharedServerState};
