use serde::{Deserialize, Serialize};

use crate::query::QueryEvent;

/// A query notification as seen by subscribed clients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BroadcastEvent {
    pub query: String,
    #[serde(flatten)]
    pub event: QueryEvent,
}

impl BroadcastEvent {
    pub fn name(&self) -> &'static str { self.event.name() }
}

pub type BroadcastSender = crate::actor::Sender<BroadcastEvent>;
pub type BroadcastReceiver = crate::actor::Receiver<BroadcastEvent>;
