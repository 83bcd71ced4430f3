// Viewer fan-out.
//
// The connection set lives under its own reader/writer lock: fan-out runs
// under the shared hold, register and pruning take it exclusively. A failed
// send means the viewer's socket task is gone; dead connections are
// collected during the pass and compacted at its end, never removed
// mid-iteration.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::profile::ProfileState;

/// The wire shape sent to every viewer. `state` is present only for
/// updates; a delete carries just the profile id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub data: EnvelopeData,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EnvelopeData {
    Update { state: ProfileState },
    Delete,
}

impl Envelope {
    pub fn update(state: ProfileState) -> Self {
        Self {
            id: state.definition.id.clone(),
            data: EnvelopeData::Update { state },
        }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: EnvelopeData::Delete,
        }
    }
}

/// One live viewer: a handle to the task writing its socket. Sending fails
/// exactly when that task has exited.
pub struct ViewerConnection {
    id: String,
    sender: mpsc::UnboundedSender<String>,
}

impl ViewerConnection {
    pub fn new(sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
        }
    }

    fn send(&self, text: &str) -> bool {
        self.sender.send(text.to_string()).is_ok()
    }
}

#[derive(Default)]
pub struct Broadcaster {
    connections: RwLock<Vec<ViewerConnection>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new viewer. The full-state replay is delivered under the
    /// exclusive hold, before the connection joins the live set, so no live
    /// envelope can interleave ahead of the replay.
    pub async fn register(&self, connection: ViewerConnection, replay: &[Envelope]) {
        let mut connections = self.connections.write().await;
        for envelope in replay {
            match serde_json::to_string(envelope) {
                Ok(text) => {
                    connection.send(&text);
                }
                Err(e) => warn!(error = %e, "failed to serialize replay envelope"),
            }
        }
        debug!(connection = %connection.id, replayed = replay.len(), "viewer connected");
        connections.push(connection);
    }

    /// Deliver one envelope to every live viewer, then drop the viewers
    /// whose write failed. Compaction is by connection id, so connections
    /// registered while the pass ran are untouched.
    pub async fn fanout(&self, envelope: &Envelope) {
        let text = match serde_json::to_string(envelope) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to serialize envelope");
                return;
            }
        };

        let mut dead: Vec<String> = Vec::new();
        {
            let connections = self.connections.read().await;
            for connection in connections.iter() {
                if !connection.send(&text) {
                    dead.push(connection.id.clone());
                }
            }
        }

        if dead.is_empty() {
            return;
        }
        let mut connections = self.connections.write().await;
        connections.retain(|connection| !dead.contains(&connection.id));
        debug!(pruned = dead.len(), "dropped dead viewer connections");
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
