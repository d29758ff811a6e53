use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::{
    client::{MeshClient, MeshError, WatchResult},
    entries::{CatalogDeregistration, CatalogRegistration, CatalogService, ConfigEntry, ConfigEntryRef, EntryKind},
};

const WATCH_WAIT: Duration = Duration::from_millis(50);

#[derive(Default)]
struct Store {
    index: u64,
    entries: BTreeMap<ConfigEntryRef, ConfigEntry>,
    services: Vec<CatalogService>,
    registrations: Vec<CatalogRegistration>,
    deregistrations: Vec<CatalogDeregistration>,
    writes: usize,
    unreachable: bool,
}

/// Mesh store kept in memory, used by tests.
#[derive(Clone, Default)]
pub struct InMemoryMeshClient {
    store: Arc<Mutex<Store>>,
    changed: Arc<Notify>,
}

impl InMemoryMeshClient {
    pub async fn insert(&self, mut entry: ConfigEntry) {
        let mut store = self.store.lock().await;
        store.index += 1;
        let index = store.index;
        let header = entry.header_mut();
        if header.create_index == 0 {
            header.create_index = index;
        }
        header.modify_index = index;
        store.entries.insert(entry.reference().normalized(), entry);
        drop(store);
        self.changed.notify_waiters();
    }

    pub async fn add_service(&self, service: CatalogService) {
        self.store.lock().await.services.push(service);
    }

    pub async fn set_unreachable(&self, unreachable: bool) {
        self.store.lock().await.unreachable = unreachable;
    }

    pub async fn writes(&self) -> usize {
        self.store.lock().await.writes
    }

    pub async fn registrations(&self) -> Vec<CatalogRegistration> {
        self.store.lock().await.registrations.clone()
    }

    pub async fn deregistrations(&self) -> Vec<CatalogDeregistration> {
        self.store.lock().await.deregistrations.clone()
    }

    async fn entries_of(&self, kind: EntryKind) -> Result<(Vec<ConfigEntry>, u64), MeshError> {
        let store = self.store.lock().await;
        if store.unreachable {
            return Err(MeshError::Unreachable("connection refused".to_owned()));
        }
        Ok((store.entries.values().filter(|e| e.kind() == kind).cloned().collect(), store.index))
    }
}

#[async_trait]
impl MeshClient for InMemoryMeshClient {
    async fn get(&self, reference: &ConfigEntryRef) -> Result<Option<ConfigEntry>, MeshError> {
        Ok(self.store.lock().await.entries.get(&reference.normalized()).cloned())
    }

    async fn list(&self, kind: EntryKind) -> Result<Vec<ConfigEntry>, MeshError> {
        self.entries_of(kind).await.map(|(entries, _)| entries)
    }

    async fn watch(&self, kind: EntryKind, index: u64) -> Result<WatchResult, MeshError> {
        let notified = self.changed.notified();
        let (entries, current) = self.entries_of(kind).await?;
        if current > index {
            return Ok(WatchResult { entries, index: current });
        }
        let _ = tokio::time::timeout(WATCH_WAIT, notified).await;
        let (entries, current) = self.entries_of(kind).await?;
        Ok(WatchResult { entries, index: current })
    }

    async fn write(&self, entry: &ConfigEntry) -> Result<(), MeshError> {
        if self.store.lock().await.unreachable {
            return Err(MeshError::Unreachable("connection refused".to_owned()));
        }
        self.store.lock().await.writes += 1;
        self.insert(entry.clone()).await;
        Ok(())
    }

    async fn delete(&self, reference: &ConfigEntryRef) -> Result<(), MeshError> {
        let mut store = self.store.lock().await;
        if store.entries.remove(&reference.normalized()).is_some() {
            store.index += 1;
        }
        drop(store);
        self.changed.notify_waiters();
        Ok(())
    }

    async fn services(&self, service_name: &str, namespace: &str) -> Result<Vec<CatalogService>, MeshError> {
        Ok(self
            .store
            .lock()
            .await
            .services
            .iter()
            .filter(|s| s.service_name == service_name && (namespace.is_empty() || s.namespace == namespace))
            .cloned()
            .collect())
    }

    async fn register(&self, registration: &CatalogRegistration) -> Result<(), MeshError> {
        let mut store = self.store.lock().await;
        store.services.retain(|s| s.service_id != registration.service.id);
        store.services.push(CatalogService {
            node: registration.node.clone(),
            service_id: registration.service.id.clone(),
            service_name: registration.service.service.clone(),
            namespace: registration.service.namespace.clone(),
            address: registration.service.address.clone(),
        });
        store.registrations.push(registration.clone());
        Ok(())
    }

    async fn deregister(&self, deregistration: &CatalogDeregistration) -> Result<(), MeshError> {
        let mut store = self.store.lock().await;
        store.services.retain(|s| !(s.node == deregistration.node && s.service_id == deregistration.service_id));
        store.deregistrations.push(deregistration.clone());
        Ok(())
    }
}
