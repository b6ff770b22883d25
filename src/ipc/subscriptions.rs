use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use super::protocol::ClientId;
use crate::actor::broadcast::BroadcastEvent;
use crate::common::collections::HashMap;

/// Lines queued for a connection's writer.
pub type Outlet = mpsc::UnboundedSender<String>;

/// Which connected client wants which events. Shared between the socket
/// thread, which adds and drops clients, and the reactor, which publishes.
pub struct ServerState {
    subscriptions: Mutex<HashMap<ClientId, Vec<String>>>,
    outlets: DashMap<ClientId, Outlet>,
}

pub type SharedServerState = Arc<RwLock<ServerState>>;

impl Default for ServerState {
    fn default() -> Self { Self::new() }
}

impl ServerState {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::default()),
            outlets: DashMap::new(),
        }
    }

    pub fn shared() -> SharedServerState { Arc::new(RwLock::new(Self::new())) }

    pub fn register_client(&self, client: ClientId, outlet: Outlet) {
        debug!(%client, "client registered");
        self.outlets.insert(client, outlet);
    }

    pub fn remove_client(&self, client: &ClientId) {
        self.outlets.remove(client);
        self.subscriptions.lock().remove(client);
    }

    pub fn subscribe_client(&self, client: &ClientId, event: String) {
        let mut guard = self.subscriptions.lock();
        let subs = guard.entry(client.clone()).or_default();
        if !subs.contains(&event) {
            subs.push(event);
            info!(%client, events = ?subs, "subscribed");
        }
    }

    pub fn unsubscribe_client(&self, client: &ClientId, event: &str) {
        let mut guard = self.subscriptions.lock();
        if let Some(events) = guard.get_mut(client) {
            events.retain(|e| e != event);
            if events.is_empty() {
                guard.remove(client);
            }
        }
        info!(%client, event, "unsubscribed");
    }

    pub fn subscriptions(&self, client: &ClientId) -> Vec<String> {
        self.subscriptions.lock().get(client).cloned().unwrap_or_default()
    }

    pub fn client_count(&self) -> usize { self.outlets.len() }

    /// Queues `event` for every client subscribed to its name or to `*`.
    pub fn publish(&self, event: &BroadcastEvent) {
        let name = event.name();
        let targets: Vec<ClientId> = {
            let guard = self.subscriptions.lock();
            guard
                .iter()
                .filter(|(_, events)| events.iter().any(|e| e == name || e == "*"))
                .map(|(client, _)| client.clone())
                .collect()
        };
        if targets.is_empty() {
            return;
        }

        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize broadcast event: {e}");
                return;
            }
        };
        for client in targets {
            let Some(outlet) = self.outlets.get(&client) else { continue };
            if outlet.send(line.clone()).is_err() {
                trace!(%client, "writer already gone");
            }
        }
    }
}
