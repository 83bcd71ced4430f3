// Pulseboard core library
// Live telemetry profile engine: user-authored scripts fold a measurement
// stream into per-profile state that is persisted and streamed to viewers.

pub mod api;
pub mod broadcast;
pub mod config;
pub mod library;
pub mod message;
pub mod profile;
pub mod registry;
pub mod server;
pub mod storage;
pub mod upstream;

// Export core types
pub use broadcast::{Broadcaster, Envelope, EnvelopeData, ViewerConnection};
pub use config::ServerConfig;
pub use library::ScriptLibrary;
pub use message::{FilterDefinition, Message, Value};
pub use profile::{Profile, ProfileDefinition, ProfileState, ProfileUpdate};
pub use registry::ProfileRegistry;
pub use server::Server;
pub use storage::{MemoryProfileStore, ProfileStore, RocksDbProfileStore};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("Upstream error: {0}")]
    UpstreamError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PulseError>;
