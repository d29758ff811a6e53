use gateway_api::apis::{
    experimental::tcproutes::{TCPRoute, TCPRouteStatus},
    standard::{
        gateways::{Gateway, GatewayStatus},
        httproutes::{HTTPRoute, HTTPRouteStatus},
    },
};
use kube::{Api, Client};
use tracing::{debug, info, span, warn, Instrument, Level};

use super::{fetcher::FetchedObjects, gateway_deployer::GatewayDeployer, ControllerError, FinalizerPatcher, StatusPatcher};
use crate::{
    binding::{GatewayDeployment, KubernetesStatusUpdate, KubernetesUpdate, MeshSnapshot, Snapshot},
    cache::ResourceCache,
    common::{
        crds::{GatewayPolicy, RouteAuthFilter},
        ResourceKey,
    },
    mesh::MeshError,
};

type Result<T, E = ControllerError> = std::result::Result<T, E>;

/// Writes a snapshot: mesh deletions, mesh updates, catalog registrations and deregistrations,
/// the gateway Deployment and Service, then Kubernetes metadata and finally Kubernetes statuses.
pub(super) struct SnapshotApplier<'a> {
    pub client: &'a Client,
    pub cache: &'a ResourceCache,
    pub controller_name: &'a str,
    pub gateway_image: &'a str,
    pub gateway: &'a Gateway,
    pub fetched: &'a FetchedObjects,
}

impl SnapshotApplier<'_> {
    pub async fn apply(&self, key: &ResourceKey, snapshot: Snapshot) -> Result<()> {
        let span = span!(Level::INFO, "PatcherService", operation = "ApplySnapshot", id = %key);
        self.apply_snapshot(snapshot).instrument(span).await
    }

    async fn apply_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let Snapshot {
            deployment,
            mut kubernetes,
            mesh,
        } = snapshot;
        let MeshSnapshot {
            deletions,
            updates,
            registrations,
            deregistrations,
        } = mesh;

        for reference in &deletions {
            self.cache.delete(reference).await.map_err(|e| mesh_error("delete", &e))?;
            debug!(entry = %reference, "Deleted mesh entry");
        }

        let mut failures = vec![];
        for mut update in updates {
            let result = self.cache.write(&update.entry).await;
            if let Err(e) = &result {
                warn!(entry = %update.entry.reference(), "Mesh write failed {e}");
                failures.push(e.to_string());
            }
            update.complete(result.as_ref().err(), &mut kubernetes);
        }

        for registration in &registrations {
            if let Err(e) = self.cache.register(registration).await {
                warn!(service = %registration.service.id, "Registration failed {e}");
                failures.push(e.to_string());
            }
        }
        for deregistration in &deregistrations {
            if let Err(e) = self.cache.deregister(deregistration).await {
                warn!(service = %deregistration.service_id, "Deregistration failed {e}");
                failures.push(e.to_string());
            }
        }

        let deployer = GatewayDeployer { client: self.client, controller_name: self.controller_name, default_image: self.gateway_image };
        match &deployment {
            GatewayDeployment::Upsert(config) => {
                deployer.deploy(self.gateway, config).await.map_err(|e| deploy_error("update", &e))?;
                debug!("Gateway deployment updated");
            },
            GatewayDeployment::Delete => {
                deployer.delete(self.gateway).await.map_err(|e| deploy_error("delete", &e))?;
                debug!("Gateway deployment removed");
            },
            GatewayDeployment::Unchanged => {},
        }

        for update in &kubernetes.updates {
            self.patch_metadata(update).await?;
        }
        for update in kubernetes.status_updates {
            self.patch_status(update).await?;
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ControllerError::MeshSyncFailed(failures.join("; ")))
        }
    }

    async fn patch_metadata(&self, update: &KubernetesUpdate) -> Result<()> {
        let metadata = update.metadata();
        let (name, namespace) = (&metadata.key.name, &metadata.key.namespace);
        match update {
            KubernetesUpdate::Gateway(_) => {
                let api = Api::<Gateway>::namespaced(self.client.clone(), namespace);
                FinalizerPatcher::patch_metadata(&api, name, self.controller_name, &metadata.finalizers, &metadata.annotations).await?;
            },
            KubernetesUpdate::HttpRoute(_) => {
                let api = Api::<HTTPRoute>::namespaced(self.client.clone(), namespace);
                FinalizerPatcher::patch_metadata(&api, name, self.controller_name, &metadata.finalizers, &metadata.annotations).await?;
            },
            KubernetesUpdate::TcpRoute(_) => {
                let api = Api::<TCPRoute>::namespaced(self.client.clone(), namespace);
                FinalizerPatcher::patch_metadata(&api, name, self.controller_name, &metadata.finalizers, &metadata.annotations).await?;
            },
        }
        info!(resource = %metadata.key, "Metadata patched");
        Ok(())
    }

    async fn patch_status(&self, update: KubernetesStatusUpdate) -> Result<()> {
        let key = update.key().clone();
        match update {
            KubernetesStatusUpdate::Gateway(_, status) => {
                let mut gateway = self.gateway.clone();
                gateway.status = Some(GatewayStatus::from(&status));
                StatusPatcher::patch_status(&Api::<Gateway>::namespaced(self.client.clone(), &key.namespace), self.controller_name, gateway).await?;
            },
            KubernetesStatusUpdate::HttpRoute(_, status) => {
                let Some(route) = self.fetched.http_routes.get(&key) else {
                    missing(&key);
                    return Ok(());
                };
                let mut route = route.clone();
                route.status = Some(HTTPRouteStatus::from(&status));
                StatusPatcher::patch_status(&Api::<HTTPRoute>::namespaced(self.client.clone(), &key.namespace), self.controller_name, route).await?;
            },
            KubernetesStatusUpdate::TcpRoute(_, status) => {
                let Some(route) = self.fetched.tcp_routes.get(&key) else {
                    missing(&key);
                    return Ok(());
                };
                let mut route = route.clone();
                route.status = Some(TCPRouteStatus::from(&status));
                StatusPatcher::patch_status(&Api::<TCPRoute>::namespaced(self.client.clone(), &key.namespace), self.controller_name, route).await?;
            },
            KubernetesStatusUpdate::GatewayPolicy(_, status) => {
                let Some(policy) = self.fetched.gateway_policies.get(&key) else {
                    missing(&key);
                    return Ok(());
                };
                let mut policy = policy.clone();
                policy.status = Some(status);
                StatusPatcher::patch_status(&Api::<GatewayPolicy>::namespaced(self.client.clone(), &key.namespace), self.controller_name, policy).await?;
            },
            KubernetesStatusUpdate::RouteAuthFilter(_, status) => {
                let Some(filter) = self.fetched.route_auth_filters.get(&key) else {
                    missing(&key);
                    return Ok(());
                };
                let mut filter = filter.clone();
                filter.status = Some(status);
                StatusPatcher::patch_status(&Api::<RouteAuthFilter>::namespaced(self.client.clone(), &key.namespace), self.controller_name, filter).await?;
            },
        }
        info!(resource = %key, "Status patched");
        Ok(())
    }
}

fn missing(key: &ResourceKey) {
    warn!(resource = %key, "Status update for an object that was not fetched");
}

fn deploy_error(operation: &str, error: &kube::Error) -> ControllerError {
    warn!("Unable to {operation} gateway deployment {error}");
    ControllerError::PatchFailed(error.to_string())
}

fn mesh_error(operation: &str, error: &MeshError) -> ControllerError {
    warn!("Mesh {operation} failed {error}");
    ControllerError::MeshSyncFailed(error.to_string())
}
