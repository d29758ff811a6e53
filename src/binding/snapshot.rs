use std::{collections::BTreeMap, fmt::Debug, mem::discriminant};

use crate::{
    common::{crds::GatewayClassConfigSpec, crds::PolicyStatus, GatewayStatusView, ResourceKey, RouteStatusView},
    mesh::{
        entries::{CatalogDeregistration, CatalogRegistration, ConfigEntry, ConfigEntryRef},
        MeshError,
    },
};

/// Finalizers and annotations to persist on one object.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataUpdate {
    pub key: ResourceKey,
    pub finalizers: Vec<String>,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KubernetesUpdate {
    Gateway(MetadataUpdate),
    HttpRoute(MetadataUpdate),
    TcpRoute(MetadataUpdate),
}

impl KubernetesUpdate {
    pub fn metadata(&self) -> &MetadataUpdate {
        match self {
            KubernetesUpdate::Gateway(m) | KubernetesUpdate::HttpRoute(m) | KubernetesUpdate::TcpRoute(m) => m,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum KubernetesStatusUpdate {
    Gateway(ResourceKey, GatewayStatusView),
    HttpRoute(ResourceKey, RouteStatusView),
    TcpRoute(ResourceKey, RouteStatusView),
    GatewayPolicy(ResourceKey, PolicyStatus),
    RouteAuthFilter(ResourceKey, PolicyStatus),
}

impl KubernetesStatusUpdate {
    pub fn key(&self) -> &ResourceKey {
        match self {
            KubernetesStatusUpdate::Gateway(key, _)
            | KubernetesStatusUpdate::HttpRoute(key, _)
            | KubernetesStatusUpdate::TcpRoute(key, _)
            | KubernetesStatusUpdate::GatewayPolicy(key, _)
            | KubernetesStatusUpdate::RouteAuthFilter(key, _) => key,
        }
    }

    fn same_object(&self, other: &KubernetesStatusUpdate) -> bool {
        discriminant(self) == discriminant(other) && self.key() == other.key()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KubernetesSnapshot {
    pub updates: Vec<KubernetesUpdate>,
    pub status_updates: Vec<KubernetesStatusUpdate>,
}

impl KubernetesSnapshot {
    /// Adds the update, replacing an earlier one for the same object.
    pub fn add_update(&mut self, update: KubernetesUpdate) {
        if let Some(existing) = self
            .updates
            .iter_mut()
            .find(|u| discriminant(*u) == discriminant(&update) && u.metadata().key == update.metadata().key)
        {
            *existing = update;
        } else {
            self.updates.push(update);
        }
    }

    /// Adds the status update, replacing an earlier one for the same object.
    pub fn add_status_update(&mut self, update: KubernetesStatusUpdate) {
        if let Some(existing) = self.status_updates.iter_mut().find(|u| u.same_object(&update)) {
            *existing = update;
        } else {
            self.status_updates.push(update);
        }
    }

    /// Pending status of an HTTP or TCP route, when one was already queued.
    pub fn route_status_mut(&mut self, key: &ResourceKey) -> Option<&mut RouteStatusView> {
        self.status_updates.iter_mut().find_map(|u| match u {
            KubernetesStatusUpdate::HttpRoute(k, status) | KubernetesStatusUpdate::TcpRoute(k, status) if k == key => Some(status),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.status_updates.is_empty()
    }
}

/// Invoked with the outcome of writing the entry. Route statuses derived from the outcome are
/// added to the snapshot.
pub type UpdateCallback = Box<dyn FnOnce(Option<&MeshError>, &mut KubernetesSnapshot) + Send>;

pub struct MeshUpdate {
    pub entry: ConfigEntry,
    pub on_update: Option<UpdateCallback>,
}

impl MeshUpdate {
    pub fn new(entry: ConfigEntry) -> Self {
        Self { entry, on_update: None }
    }

    pub fn with_callback(entry: ConfigEntry, on_update: UpdateCallback) -> Self {
        Self { entry, on_update: Some(on_update) }
    }

    /// Runs the callback, if any, consuming it.
    pub fn complete(&mut self, error: Option<&MeshError>, snapshot: &mut KubernetesSnapshot) {
        if let Some(on_update) = self.on_update.take() {
            on_update(error, snapshot);
        }
    }
}

impl Debug for MeshUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshUpdate").field("entry", &self.entry.reference()).field("on_update", &self.on_update.is_some()).finish()
    }
}

#[derive(Debug, Default)]
pub struct MeshSnapshot {
    pub deletions: Vec<ConfigEntryRef>,
    pub updates: Vec<MeshUpdate>,
    pub registrations: Vec<CatalogRegistration>,
    pub deregistrations: Vec<CatalogDeregistration>,
}

impl MeshSnapshot {
    /// Registrations are upserts and repeat on every pass, so they are not counted as changes.
    pub fn has_changes(&self) -> bool {
        !(self.deletions.is_empty() && self.updates.is_empty() && self.deregistrations.is_empty())
    }
}

/// What happens to the Deployment and Service running a gateway.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum GatewayDeployment {
    /// The pass only recorded metadata on the gateway.
    #[default]
    Unchanged,
    /// Render and apply with the pinned class config.
    Upsert(GatewayClassConfigSpec),
    Delete,
}

/// Everything one gateway reconcile needs to write.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub deployment: GatewayDeployment,
    pub kubernetes: KubernetesSnapshot,
    pub mesh: MeshSnapshot,
}

impl Snapshot {
    /// True when applying the snapshot would not change either side.
    pub fn is_noop(&self) -> bool {
        self.kubernetes.is_empty() && !self.mesh.has_changes()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use super::*;
    use crate::mesh::entries::{EntryHeader, TcpRouteEntry};

    #[test]
    fn test_status_updates_are_replaced_per_object() {
        let mut snapshot = KubernetesSnapshot::default();
        let key = ResourceKey::http_route("apps", "route");
        snapshot.add_status_update(KubernetesStatusUpdate::HttpRoute(key.clone(), RouteStatusView::default()));
        snapshot.add_status_update(KubernetesStatusUpdate::Gateway(ResourceKey::gateway("infra", "gateway"), GatewayStatusView::default()));
        let replaced = RouteStatusView { parents: vec![Default::default()] };
        snapshot.add_status_update(KubernetesStatusUpdate::HttpRoute(key.clone(), replaced.clone()));
        assert_eq!(snapshot.status_updates.len(), 2);
        assert_eq!(snapshot.route_status_mut(&key).cloned(), Some(replaced));
        assert!(snapshot.route_status_mut(&ResourceKey::tcp_route("apps", "route")).is_none());
    }

    #[test]
    fn test_callback_runs_once() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let entry = ConfigEntry::TcpRoute(TcpRouteEntry { header: EntryHeader::new("route", "", "", BTreeMap::new()), ..Default::default() });
        let mut update = MeshUpdate::with_callback(entry, Box::new(move |error: Option<&MeshError>, _: &mut KubernetesSnapshot| flag.store(error.is_none(), Ordering::SeqCst)));
        let mut snapshot = KubernetesSnapshot::default();
        update.complete(None, &mut snapshot);
        assert!(called.load(Ordering::SeqCst));
        assert!(update.on_update.is_none());
        update.complete(Some(&MeshError::Timeout), &mut snapshot);
        assert!(called.load(Ordering::SeqCst));
    }
}
