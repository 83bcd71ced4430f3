// Server composition.
//
// Owns the registry, broadcaster and durable store, and drives the three
// long-lived activities: the ingestion loop, the periodic durable sync and
// the HTTP/WebSocket surface.

use std::sync::Arc;

use tokio::time::interval;
use tracing::{info, warn};

use crate::api::ApiServer;
use crate::broadcast::{Broadcaster, Envelope};
use crate::config::ServerConfig;
use crate::library::ScriptLibrary;
use crate::registry::ProfileRegistry;
use crate::storage::{ProfileStore, RocksDbProfileStore};
use crate::upstream::{fetch_snapshot, TcpMeasurementSource};
use crate::Result;

pub struct Server {
    config: ServerConfig,
    registry: Arc<ProfileRegistry>,
    broadcaster: Arc<Broadcaster>,
    store: Arc<dyn ProfileStore>,
}

impl Server {
    /// Open the durable store and assemble the components. A store that
    /// cannot be opened is fatal; everything else degrades gracefully.
    pub fn new(config: ServerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let store: Arc<dyn ProfileStore> = Arc::new(RocksDbProfileStore::open(
            config.data_dir.join("profiles"),
        )?);

        let library = Arc::new(match &config.library_dir {
            Some(dir) => ScriptLibrary::load_dir(dir),
            None => ScriptLibrary::default(),
        });

        let registry = Arc::new(ProfileRegistry::new(store.clone(), library));

        Ok(Self {
            config,
            registry,
            broadcaster: Arc::new(Broadcaster::new()),
            store,
        })
    }

    /// Load persisted profiles, start the background tasks and serve.
    /// Runs for process lifetime.
    pub async fn run(self) -> Result<()> {
        let loaded = self.registry.load().await?;
        info!(profiles = loaded, "registry loaded from durable store");

        let registry = self.registry.clone();
        let store = self.store.clone();
        let sync_interval = self.config.sync_interval;
        tokio::spawn(async move {
            let mut ticker = interval(sync_interval);
            loop {
                ticker.tick().await;
                let profiles = registry.snapshot().await;
                if let Err(e) = store.sync_all(&profiles).await {
                    warn!(error = %e, "durable sync pass failed");
                }
            }
        });

        let registry = self.registry.clone();
        let broadcaster = self.broadcaster.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            ingest_loop(config, registry, broadcaster).await;
        });

        ApiServer::new(self.config, self.registry, self.broadcaster)
            .serve()
            .await
    }
}

/// Feed measurements through the registry sweep and fan the resulting
/// states out to viewers, in arrival order.
async fn ingest_loop(
    config: ServerConfig,
    registry: Arc<ProfileRegistry>,
    broadcaster: Arc<Broadcaster>,
) {
    if let Some(http_address) = &config.upstream_http_address {
        match fetch_snapshot(http_address).await {
            Ok(messages) => {
                info!(count = messages.len(), "priming profiles from upstream snapshot");
                for message in &messages {
                    sweep_and_fanout(&registry, &broadcaster, message).await;
                }
            }
            Err(e) => warn!(error = %e, "upstream snapshot fetch failed"),
        }
    }

    let mut messages = TcpMeasurementSource::new(config.upstream_tcp_address.clone()).spawn();
    while let Some(message) = messages.recv().await {
        sweep_and_fanout(&registry, &broadcaster, &message).await;
    }
    info!("measurement channel closed");
}

async fn sweep_and_fanout(
    registry: &Arc<ProfileRegistry>,
    broadcaster: &Arc<Broadcaster>,
    message: &crate::message::Message,
) {
    for state in registry.eval_sweep(message).await {
        broadcaster.fanout(&Envelope::update(state)).await;
    }
}
