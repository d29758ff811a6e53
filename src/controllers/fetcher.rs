use std::collections::{BTreeMap, BTreeSet};

use gateway_api::apis::{
    experimental::tcproutes::TCPRoute,
    standard::{gatewayclasses::GatewayClass, gateways::Gateway, httproutes::HTTPRoute, referencegrants::ReferenceGrant},
};
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, Service};
use kube::{api::ListParams, Api, Client, ResourceExt};
use tracing::{debug, warn};

use super::ControllerError;
use crate::{
    binding::BinderConfig,
    cache::ResourceCache,
    common::{
        crds::{GatewayClassConfig, GatewayPolicy, MeshService, RouteAuthFilter, RouteRetryFilter, RouteTimeoutFilter},
        references::ReferenceValidator,
        resource_map::{policy_targets_gateway, ExternalFilter, ResourceMap},
        translation::Translator,
        BackendRef, GatewayClassView, GatewayView, GroupKind, HttpRouteView, ParentRef, PodView, ReferenceGrantView, ResourceKey, SecretView, ServiceView, TcpRouteView,
        CORE_GROUP, GATEWAY_NAME_LABEL, KIND_GATEWAY_CLASS_CONFIG, KIND_MESH_SERVICE, KIND_ROUTE_AUTH_FILTER, KIND_ROUTE_RETRY_FILTER,
        KIND_ROUTE_TIMEOUT_FILTER, KIND_SERVICE, MESHGATE_GROUP,
    },
    mesh::entries::{ConfigEntry, EntryKind},
};

type Result<T, E = ControllerError> = std::result::Result<T, E>;

/// Kubernetes objects behind the views handed to the binder, kept for status patches.
#[derive(Default)]
pub(super) struct FetchedObjects {
    pub http_routes: BTreeMap<ResourceKey, HTTPRoute>,
    pub tcp_routes: BTreeMap<ResourceKey, TCPRoute>,
    pub gateway_policies: BTreeMap<ResourceKey, GatewayPolicy>,
    pub route_auth_filters: BTreeMap<ResourceKey, RouteAuthFilter>,
}

/// Gathers everything one gateway reconcile reads, from the API server and the mesh mirror.
pub(super) struct GatewayFetcher<'a> {
    pub client: &'a Client,
    pub cache: &'a ResourceCache,
    pub translator: &'a Translator,
    pub controller_name: &'a str,
}

fn refers_to_gateway<'a>(mut parents: impl Iterator<Item = &'a ParentRef>, gateway: &ResourceKey, namespace: &str) -> bool {
    parents.any(|parent| parent.refers_to_gateway(gateway, namespace))
}

impl GatewayFetcher<'_> {
    pub async fn fetch(&self, gateway: &Gateway) -> Result<(BinderConfig, FetchedObjects)> {
        let view = GatewayView::try_from(gateway).map_err(|e| ControllerError::InvalidPayload(e.to_string()))?;
        let key = view.key.clone();
        let mut fetched = FetchedObjects::default();

        let gateway_class = Api::<GatewayClass>::all(self.client.clone()).get_opt(&gateway.spec.gateway_class_name).await?.map(|c| GatewayClassView::from(&c));
        let gateway_class_config = match gateway_class.as_ref().and_then(|c| c.parameters_ref.as_ref()) {
            Some(parameters) if parameters.group == MESHGATE_GROUP && parameters.kind == KIND_GATEWAY_CLASS_CONFIG => {
                Api::<GatewayClassConfig>::all(self.client.clone()).get_opt(&parameters.name).await?.map(|c| c.spec)
            },
            _ => None,
        };

        let namespaces: BTreeMap<String, BTreeMap<String, String>> = Api::<Namespace>::all(self.client.clone())
            .list(&ListParams::default())
            .await?
            .items
            .into_iter()
            .map(|namespace| (namespace.name_any(), namespace.labels().clone()))
            .collect();

        let grants = Api::<ReferenceGrant>::all(self.client.clone()).list(&ListParams::default()).await?;
        let mut resources = ResourceMap::new(self.translator.clone(), ReferenceValidator::new(grants.items.iter().map(ReferenceGrantView::from)));

        self.count_controlled_gateways(&mut resources).await?;
        self.count_certificates(&view, &mut resources).await?;

        let http_routes = self.http_routes(&key, &mut resources, &mut fetched).await?;
        let tcp_routes = self.tcp_routes(&key, &mut resources, &mut fetched).await?;

        let backends: BTreeSet<(String, BackendRef)> = http_routes
            .iter()
            .flat_map(|route| route.backend_refs().map(move |b| (route.key.namespace.clone(), b.clone())))
            .chain(tcp_routes.iter().flat_map(|route| route.backend_refs().map(move |b| (route.key.namespace.clone(), b.clone()))))
            .collect();
        self.count_backends(&backends, &mut resources).await?;

        let route_auth_filters = self.count_external_filters(&http_routes, &mut resources, &mut fetched).await?;

        for policy in Api::<GatewayPolicy>::all(self.client.clone()).list(&ListParams::default()).await?.items {
            if policy_targets_gateway(&policy, &key) {
                fetched.gateway_policies.insert(ResourceKey::from_resource(&policy), policy.clone());
                resources.add_gateway_policy(policy);
            }
        }

        self.count_mesh_entries(&mut resources);

        let pods: Vec<PodView> = Api::<Pod>::namespaced(self.client.clone(), &key.namespace)
            .list(&ListParams::default().labels(&format!("{GATEWAY_NAME_LABEL}={}", key.name)))
            .await?
            .items
            .iter()
            .filter_map(|pod| PodView::try_from(pod).ok())
            .collect();
        let service = Api::<Service>::namespaced(self.client.clone(), &key.namespace)
            .get_opt(&key.name)
            .await?
            .and_then(|service| ServiceView::try_from(&service).ok());

        let gateway_reference = resources.gateway_reference(&key);
        let mesh_gateway = match self.cache.get(&gateway_reference) {
            Some(ConfigEntry::ApiGateway(entry)) => Some(entry),
            _ => None,
        };
        let mesh_gateway_services = self.cache.services_for(&gateway_reference).await.map_err(|e| ControllerError::MeshSyncFailed(e.to_string()))?;

        debug!(
            gateway = %key,
            http_routes = http_routes.len(),
            tcp_routes = tcp_routes.len(),
            mesh_gateway = mesh_gateway.is_some(),
            "Fetched gateway resources"
        );

        let config = BinderConfig::builder()
            .controller_name(self.controller_name)
            .namespaces(namespaces)
            .gateway_class(gateway_class)
            .gateway_class_config(gateway_class_config)
            .gateway(view)
            .http_routes(http_routes)
            .tcp_routes(tcp_routes)
            .pods(pods)
            .service(service)
            .mesh_gateway(mesh_gateway)
            .mesh_gateway_services(mesh_gateway_services)
            .route_auth_filters(route_auth_filters)
            .resources(resources)
            .build();
        Ok((config, fetched))
    }

    /// Counts every gateway whose class is handled by this controller.
    async fn count_controlled_gateways(&self, resources: &mut ResourceMap) -> Result<()> {
        let classes: BTreeSet<String> = Api::<GatewayClass>::all(self.client.clone())
            .list(&ListParams::default())
            .await?
            .items
            .into_iter()
            .filter(|class| class.spec.controller_name == self.controller_name)
            .map(|class| class.name_any())
            .collect();
        for gateway in Api::<Gateway>::all(self.client.clone()).list(&ListParams::default()).await?.items {
            if !classes.contains(&gateway.spec.gateway_class_name) {
                continue;
            }
            match GatewayView::try_from(&gateway) {
                Ok(view) => resources.reference_count_gateway(&view),
                Err(e) => warn!("Skipping gateway {} {e}", gateway.name_any()),
            }
        }
        Ok(())
    }

    async fn count_certificates(&self, gateway: &GatewayView, resources: &mut ResourceMap) -> Result<()> {
        let references: BTreeSet<ResourceKey> = gateway
            .spec
            .listeners
            .iter()
            .filter_map(|listener| listener.tls.as_ref())
            .flat_map(|tls| tls.certificate_refs.iter())
            .filter(|reference| reference.is_secret())
            .map(|reference| ResourceKey::secret(reference.namespace_or(&gateway.key.namespace), &reference.name))
            .collect();
        for reference in references {
            if let Some(secret) = Api::<Secret>::namespaced(self.client.clone(), &reference.namespace).get_opt(&reference.name).await? {
                if let Ok(secret) = SecretView::try_from(&secret) {
                    resources.reference_count_certificate(&secret);
                }
            }
        }
        Ok(())
    }

    async fn http_routes(&self, gateway: &ResourceKey, resources: &mut ResourceMap, fetched: &mut FetchedObjects) -> Result<Vec<HttpRouteView>> {
        let mut views = vec![];
        for route in Api::<HTTPRoute>::all(self.client.clone()).list(&ListParams::default()).await?.items {
            let Ok(view) = HttpRouteView::try_from(&route) else {
                continue;
            };
            let namespace = view.key.namespace.clone();
            let related = refers_to_gateway(view.parent_refs.iter(), gateway, &namespace)
                || refers_to_gateway(view.status.parents.iter().map(|p| &p.parent_ref), gateway, &namespace);
            if related {
                resources.reference_count_http_route(&view);
                fetched.http_routes.insert(view.key.clone(), route);
                views.push(view);
            }
        }
        Ok(views)
    }

    async fn tcp_routes(&self, gateway: &ResourceKey, resources: &mut ResourceMap, fetched: &mut FetchedObjects) -> Result<Vec<TcpRouteView>> {
        let mut views = vec![];
        for route in Api::<TCPRoute>::all(self.client.clone()).list(&ListParams::default()).await?.items {
            let Ok(view) = TcpRouteView::try_from(&route) else {
                continue;
            };
            let namespace = view.key.namespace.clone();
            let related = refers_to_gateway(view.parent_refs.iter(), gateway, &namespace)
                || refers_to_gateway(view.status.parents.iter().map(|p| &p.parent_ref), gateway, &namespace);
            if related {
                resources.reference_count_tcp_route(&view);
                fetched.tcp_routes.insert(view.key.clone(), route);
                views.push(view);
            }
        }
        Ok(views)
    }

    async fn count_backends(&self, backends: &BTreeSet<(String, BackendRef)>, resources: &mut ResourceMap) -> Result<()> {
        for (route_namespace, backend) in backends {
            let namespace = backend.namespace_or(route_namespace);
            let group_kind = backend.group_kind();
            if group_kind == GroupKind::new(CORE_GROUP, KIND_SERVICE) {
                if Api::<Service>::namespaced(self.client.clone(), namespace).get_opt(&backend.name).await?.is_some() {
                    resources.add_service(&ResourceKey::service(namespace, &backend.name));
                }
            } else if group_kind == GroupKind::new(MESHGATE_GROUP, KIND_MESH_SERVICE) {
                if let Some(service) = Api::<MeshService>::namespaced(self.client.clone(), namespace).get_opt(&backend.name).await? {
                    resources.add_mesh_service(&service);
                }
            }
        }
        Ok(())
    }

    /// Loads the filters routes reference through `extensionRef`. Returns the auth filters.
    async fn count_external_filters(&self, routes: &[HttpRouteView], resources: &mut ResourceMap, fetched: &mut FetchedObjects) -> Result<Vec<RouteAuthFilter>> {
        let references: BTreeSet<_> = routes
            .iter()
            .flat_map(|route| route.extension_refs().map(move |reference| (route.key.namespace.clone(), reference.clone())))
            .filter(|(_, reference)| reference.group == MESHGATE_GROUP)
            .collect();

        let mut auth_filters = vec![];
        for (namespace, reference) in references {
            let key = ResourceKey::new(&GroupKind::new(&reference.group, &reference.kind), &namespace, &reference.name);
            let filter = match reference.kind.as_str() {
                KIND_ROUTE_RETRY_FILTER => Api::<RouteRetryFilter>::namespaced(self.client.clone(), &namespace)
                    .get_opt(&reference.name)
                    .await?
                    .map(|filter| ExternalFilter::Retry(filter.spec)),
                KIND_ROUTE_TIMEOUT_FILTER => Api::<RouteTimeoutFilter>::namespaced(self.client.clone(), &namespace)
                    .get_opt(&reference.name)
                    .await?
                    .map(|filter| ExternalFilter::Timeout(filter.spec)),
                KIND_ROUTE_AUTH_FILTER => {
                    let filter = Api::<RouteAuthFilter>::namespaced(self.client.clone(), &namespace).get_opt(&reference.name).await?;
                    if let Some(filter) = &filter {
                        fetched.route_auth_filters.insert(key.clone(), filter.clone());
                        auth_filters.push(filter.clone());
                    }
                    filter.map(ExternalFilter::Auth)
                },
                _ => None,
            };
            if let Some(filter) = filter {
                resources.add_external_filter(key, filter);
            }
        }
        Ok(auth_filters)
    }

    fn count_mesh_entries(&self, resources: &mut ResourceMap) {
        for entry in self.cache.list(EntryKind::JwtProvider) {
            if let ConfigEntry::JwtProvider(provider) = &entry {
                resources.add_jwt_provider(provider);
            }
        }
        for entry in self.cache.list(EntryKind::HttpRoute) {
            if let ConfigEntry::HttpRoute(route) = &entry {
                resources.reference_count_mesh_http_route(route);
            }
        }
        for entry in self.cache.list(EntryKind::TcpRoute) {
            if let ConfigEntry::TcpRoute(route) = &entry {
                resources.reference_count_mesh_tcp_route(route);
            }
        }
        for entry in self.cache.list(EntryKind::FileSystemCertificate).iter().chain(&self.cache.list(EntryKind::InlineCertificate)) {
            resources.reference_count_mesh_certificate(entry);
        }
    }
}
