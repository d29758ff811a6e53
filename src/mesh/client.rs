use async_trait::async_trait;
use thiserror::Error;

use super::entries::{CatalogDeregistration, CatalogRegistration, CatalogService, ConfigEntry, ConfigEntryRef, EntryKind};

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("mesh store is unreachable: {0}")]
    Unreachable(String),
    #[error("mesh request timed out")]
    Timeout,
    #[error("mesh store rejected the request: {status} {message}")]
    Rejected { status: u16, message: String },
    #[error("mesh response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid mesh request: {0}")]
    InvalidRequest(String),
}

impl MeshError {
    /// Errors expected while the store restarts or a long poll expires.
    pub fn is_transient(&self) -> bool {
        match self {
            MeshError::Unreachable(_) | MeshError::Timeout => true,
            MeshError::Rejected { status, .. } => *status >= 500,
            MeshError::Decode(_) | MeshError::InvalidRequest(_) => false,
        }
    }
}

/// Result of a blocking list: the entries and the index to wait on next.
#[derive(Debug, Clone, Default)]
pub struct WatchResult {
    pub entries: Vec<ConfigEntry>,
    pub index: u64,
}

/// Access to the mesh config-entry store and service catalog.
#[async_trait]
pub trait MeshClient: Send + Sync {
    async fn get(&self, reference: &ConfigEntryRef) -> Result<Option<ConfigEntry>, MeshError>;

    async fn list(&self, kind: EntryKind) -> Result<Vec<ConfigEntry>, MeshError>;

    /// Blocks until the store index moves past `index` or the store wait time elapses.
    async fn watch(&self, kind: EntryKind, index: u64) -> Result<WatchResult, MeshError>;

    async fn write(&self, entry: &ConfigEntry) -> Result<(), MeshError>;

    async fn delete(&self, reference: &ConfigEntryRef) -> Result<(), MeshError>;

    async fn services(&self, service_name: &str, namespace: &str) -> Result<Vec<CatalogService>, MeshError>;

    async fn register(&self, registration: &CatalogRegistration) -> Result<(), MeshError>;

    async fn deregister(&self, deregistration: &CatalogDeregistration) -> Result<(), MeshError>;
}
