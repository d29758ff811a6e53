//! Per reconcile index of everything a gateway can reference.
//!
//! The controller fills the map with the Kubernetes objects and mesh mirrors it fetched, the binder
//! queries it while binding and queues the resulting mesh mutations in it. Relations are computed
//! when queried, so the order objects are counted in does not matter.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use super::{
    crds::{GatewayPolicy, MeshService, RouteAuthFilter, RouteRetryFilterSpec, RouteTimeoutFilterSpec},
    references::ReferenceValidator,
    translation::Translator,
    BackendRef, GatewayView, GroupKind, HttpRouteView, LocalObjectRef, ObjectRef, ParentRef, ResourceKey, SecretView, TcpRouteView, TlsMode, GATEWAY_API_GROUP,
    KIND_GATEWAY,
};
use crate::{
    binding::snapshot::{KubernetesSnapshot, MeshUpdate, UpdateCallback},
    mesh::{
        entries::{ConfigEntry, ConfigEntryRef, EntryKind, HttpRouteEntry, JwtProviderEntry, TcpRouteEntry},
        MeshError,
    },
};

/// Route filter resources referenced through `extensionRef`.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalFilter {
    Retry(RouteRetryFilterSpec),
    Timeout(RouteTimeoutFilterSpec),
    Auth(RouteAuthFilter),
}

/// Mesh side name of a routable service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    pub name: String,
    pub namespace: String,
    pub partition: String,
}

pub fn policy_targets_gateway(policy: &GatewayPolicy, gateway: &ResourceKey) -> bool {
    let target = &policy.spec.target_ref;
    let namespace = target.namespace.as_deref().or(policy.metadata.namespace.as_deref()).unwrap_or_default();
    target.group == GATEWAY_API_GROUP && target.kind == KIND_GATEWAY && target.name == gateway.name && namespace == gateway.namespace
}

#[derive(Debug, Default)]
pub struct ResourceMap {
    translator: Translator,
    validator: ReferenceValidator,

    services: BTreeMap<ResourceKey, ServiceTarget>,
    mesh_services: BTreeMap<ResourceKey, ServiceTarget>,
    secrets: BTreeMap<ResourceKey, SecretView>,
    external_filters: BTreeMap<ResourceKey, ExternalFilter>,
    gateway_policies: Vec<GatewayPolicy>,
    jwt_providers: BTreeSet<String>,

    gateways: BTreeMap<ConfigEntryRef, BTreeSet<ConfigEntryRef>>,
    http_routes: BTreeMap<ConfigEntryRef, HttpRouteView>,
    tcp_routes: BTreeMap<ConfigEntryRef, TcpRouteView>,
    mesh_routes: BTreeMap<ConfigEntryRef, ConfigEntry>,
    mesh_certificates: BTreeMap<ConfigEntryRef, ConfigEntry>,

    mutated_routes: BTreeSet<ConfigEntryRef>,
    processed_certificates: BTreeSet<ConfigEntryRef>,
    mutations: Vec<MeshUpdate>,
}

impl ResourceMap {
    pub fn new(translator: Translator, validator: ReferenceValidator) -> Self {
        Self { translator, validator, ..Default::default() }
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    pub fn validator(&self) -> &ReferenceValidator {
        &self.validator
    }

    pub fn add_service(&mut self, key: &ResourceKey) {
        let target = ServiceTarget {
            name: key.name.clone(),
            namespace: self.translator.namespace(&key.namespace),
            partition: self.translator.partition().to_owned(),
        };
        self.services.insert(key.clone(), target);
    }

    pub fn add_mesh_service(&mut self, service: &MeshService) {
        let key = ResourceKey::from_resource(service);
        let target = ServiceTarget {
            name: service.spec.name.clone(),
            namespace: self.translator.namespace(&key.namespace),
            partition: self.translator.partition().to_owned(),
        };
        self.mesh_services.insert(key, target);
    }

    pub fn add_external_filter(&mut self, key: ResourceKey, filter: ExternalFilter) {
        self.external_filters.insert(key, filter);
    }

    pub fn add_gateway_policy(&mut self, policy: GatewayPolicy) {
        let key = ResourceKey::from_resource(&policy);
        self.gateway_policies.retain(|p| ResourceKey::from_resource(p) != key);
        self.gateway_policies.push(policy);
    }

    pub fn add_jwt_provider(&mut self, provider: &JwtProviderEntry) {
        self.jwt_providers.insert(provider.header.name.clone());
    }

    pub fn has_service(&self, key: &ResourceKey) -> bool {
        self.services.contains_key(key)
    }

    pub fn has_mesh_service(&self, key: &ResourceKey) -> bool {
        self.mesh_services.contains_key(key)
    }

    pub fn service(&self, key: &ResourceKey) -> Option<&ServiceTarget> {
        self.services.get(key)
    }

    pub fn mesh_service(&self, key: &ResourceKey) -> Option<&ServiceTarget> {
        self.mesh_services.get(key)
    }

    pub fn certificate(&self, key: &ResourceKey) -> Option<&SecretView> {
        self.secrets.get(key)
    }

    pub fn external_filter(&self, reference: &LocalObjectRef, namespace: &str) -> Option<&ExternalFilter> {
        self.external_filters
            .get(&ResourceKey::new(&GroupKind::new(&reference.group, &reference.kind), namespace, &reference.name))
    }

    pub fn gateway_policies(&self) -> &[GatewayPolicy] {
        &self.gateway_policies
    }

    /// Policy applying to the listener. A policy naming the listener wins over one targeting the
    /// whole gateway.
    pub fn gateway_policy_for_listener(&self, gateway: &ResourceKey, listener: &str) -> Option<&GatewayPolicy> {
        let candidates: Vec<_> = self.gateway_policies.iter().filter(|p| policy_targets_gateway(p, gateway)).collect();
        candidates
            .iter()
            .find(|p| p.spec.target_ref.section_name.as_deref() == Some(listener))
            .or_else(|| candidates.iter().find(|p| p.spec.target_ref.section_name.is_none()))
            .copied()
    }

    pub fn jwt_provider_exists(&self, name: &str) -> bool {
        self.jwt_providers.contains(name)
    }

    pub fn gateway_can_reference_secret(&self, gateway: &GatewayView, secret: &ObjectRef) -> bool {
        self.validator.gateway_can_reference_secret(gateway, secret)
    }

    pub fn http_route_can_reference_backend(&self, route: &HttpRouteView, backend: &BackendRef) -> bool {
        self.validator.http_route_can_reference_backend(route, backend)
    }

    pub fn tcp_route_can_reference_backend(&self, route: &TcpRouteView, backend: &BackendRef) -> bool {
        self.validator.tcp_route_can_reference_backend(route, backend)
    }

    pub fn reference_count_certificate(&mut self, secret: &SecretView) {
        self.secrets.insert(secret.key.clone(), secret.clone());
    }

    /// Records the gateway and the certificates its terminating listeners reference.
    pub fn reference_count_gateway(&mut self, gateway: &GatewayView) {
        let certificates = gateway
            .spec
            .listeners
            .iter()
            .filter_map(|l| l.tls.as_ref())
            .filter(|tls| tls.mode == TlsMode::Terminate)
            .flat_map(|tls| tls.certificate_refs.iter())
            .filter(|r| r.is_secret())
            .map(|r| self.certificate_reference(&ResourceKey::secret(r.namespace_or(&gateway.key.namespace), &r.name)))
            .collect();
        self.gateways.insert(self.gateway_reference(&gateway.key), certificates);
    }

    pub fn reference_count_http_route(&mut self, route: &HttpRouteView) {
        self.http_routes.insert(self.translator.reference(EntryKind::HttpRoute, &route.key), route.clone());
    }

    pub fn reference_count_tcp_route(&mut self, route: &TcpRouteView) {
        self.tcp_routes.insert(self.translator.reference(EntryKind::TcpRoute, &route.key), route.clone());
    }

    pub fn reference_count_mesh_http_route(&mut self, route: &HttpRouteEntry) {
        let entry = ConfigEntry::HttpRoute(route.clone());
        self.mesh_routes.insert(entry.reference().normalized(), entry);
    }

    pub fn reference_count_mesh_tcp_route(&mut self, route: &TcpRouteEntry) {
        let entry = ConfigEntry::TcpRoute(route.clone());
        self.mesh_routes.insert(entry.reference().normalized(), entry);
    }

    pub fn reference_count_mesh_certificate(&mut self, certificate: &ConfigEntry) {
        if matches!(certificate.kind(), EntryKind::FileSystemCertificate | EntryKind::InlineCertificate) {
            self.mesh_certificates.insert(certificate.reference().normalized(), certificate.clone());
        }
    }

    pub fn gateway_reference(&self, gateway: &ResourceKey) -> ConfigEntryRef {
        self.translator.reference(EntryKind::ApiGateway, gateway)
    }

    pub fn certificate_reference(&self, secret: &ResourceKey) -> ConfigEntryRef {
        self.translator.reference(EntryKind::FileSystemCertificate, secret)
    }

    /// Mesh mirror of an entry this map knows about.
    pub fn mirrored(&self, reference: &ConfigEntryRef) -> Option<&ConfigEntry> {
        let reference = reference.normalized();
        self.mesh_routes.get(&reference).or_else(|| self.mesh_certificates.get(&reference))
    }

    /// Number of distinct counted gateways the route names in its parent references.
    fn counted_gateways(&self, parent_refs: &[ParentRef], route_namespace: &str) -> usize {
        parent_refs
            .iter()
            .filter_map(|p| p.gateway_key(route_namespace))
            .map(|key| self.gateway_reference(&key))
            .filter(|reference| self.gateways.contains_key(reference))
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// True when unbinding from one gateway leaves the route without gateways, so the mesh
    /// route can be deleted instead of edited.
    pub fn can_gc_http_route_on_unbind(&self, route: &ResourceKey) -> bool {
        self.http_routes
            .get(&self.translator.reference(EntryKind::HttpRoute, route))
            .is_none_or(|r| self.counted_gateways(&r.parent_refs, &r.key.namespace) <= 1)
    }

    pub fn can_gc_tcp_route_on_unbind(&self, route: &ResourceKey) -> bool {
        self.tcp_routes
            .get(&self.translator.reference(EntryKind::TcpRoute, route))
            .is_none_or(|r| self.counted_gateways(&r.parent_refs, &r.key.namespace) <= 1)
    }

    /// Translates the route and queues the entry returned by `mutate`, which receives the
    /// mirrored entry if one exists. Entries left without parents are not queued.
    pub fn translate_and_mutate_http_route(
        &mut self,
        route: &HttpRouteView,
        on_update: UpdateCallback,
        mutate: impl FnOnce(Option<&HttpRouteEntry>, HttpRouteEntry) -> HttpRouteEntry,
    ) {
        let reference = self.translator.reference(EntryKind::HttpRoute, &route.key);
        let translated = self.translator.to_http_route(route, self);
        let existing = match self.mesh_routes.get(&reference) {
            Some(ConfigEntry::HttpRoute(existing)) => Some(existing),
            _ => None,
        };
        let mutated = mutate(existing, translated);
        self.queue_route(reference, ConfigEntry::HttpRoute(mutated), on_update);
    }

    pub fn translate_and_mutate_tcp_route(
        &mut self,
        route: &TcpRouteView,
        on_update: UpdateCallback,
        mutate: impl FnOnce(Option<&TcpRouteEntry>, TcpRouteEntry) -> TcpRouteEntry,
    ) {
        let reference = self.translator.reference(EntryKind::TcpRoute, &route.key);
        let translated = self.translator.to_tcp_route(route, self);
        let existing = match self.mesh_routes.get(&reference) {
            Some(ConfigEntry::TcpRoute(existing)) => Some(existing),
            _ => None,
        };
        let mutated = mutate(existing, translated);
        self.queue_route(reference, ConfigEntry::TcpRoute(mutated), on_update);
    }

    /// Edits the mirrored mesh route, when there is one.
    pub fn mutate_http_route(&mut self, route: &ResourceKey, on_update: UpdateCallback, mutate: impl FnOnce(HttpRouteEntry) -> HttpRouteEntry) {
        let reference = self.translator.reference(EntryKind::HttpRoute, route);
        if let Some(ConfigEntry::HttpRoute(existing)) = self.mesh_routes.get(&reference) {
            let mutated = mutate(existing.clone());
            self.queue_route(reference, ConfigEntry::HttpRoute(mutated), on_update);
        }
    }

    pub fn mutate_tcp_route(&mut self, route: &ResourceKey, on_update: UpdateCallback, mutate: impl FnOnce(TcpRouteEntry) -> TcpRouteEntry) {
        let reference = self.translator.reference(EntryKind::TcpRoute, route);
        if let Some(ConfigEntry::TcpRoute(existing)) = self.mesh_routes.get(&reference) {
            let mutated = mutate(existing.clone());
            self.queue_route(reference, ConfigEntry::TcpRoute(mutated), on_update);
        }
    }

    fn queue_route(&mut self, reference: ConfigEntryRef, entry: ConfigEntry, on_update: UpdateCallback) {
        if entry.parents().is_empty() {
            debug!("Mesh route {reference} has no parents left, leaving it to garbage collection");
            return;
        }
        self.mutated_routes.insert(reference);
        self.mutations.push(MeshUpdate::with_callback(entry, on_update));
    }

    /// Queues the certificate entry for a secret this map holds.
    pub fn translate_certificate(&mut self, secret: &ResourceKey) {
        if !self.secrets.contains_key(secret) {
            return;
        }
        let reference = self.certificate_reference(secret);
        if !self.processed_certificates.insert(reference.clone()) {
            return;
        }
        let entry = ConfigEntry::FileSystemCertificate(self.translator.to_file_system_certificate(secret));
        self.mutations.push(MeshUpdate::with_callback(
            entry,
            Box::new(move |error: Option<&MeshError>, _: &mut KubernetesSnapshot| {
                if let Some(error) = error {
                    warn!("Unable to write certificate {reference} {error}");
                }
            }),
        ));
    }

    pub fn mutations(&mut self) -> Vec<MeshUpdate> {
        std::mem::take(&mut self.mutations)
    }

    /// Mesh entries owned by the gateway that nothing references any more.
    pub fn resources_to_gc(&self, gateway: &ResourceKey) -> Vec<ConfigEntryRef> {
        let gateway_reference = self.gateway_reference(gateway);
        let mut to_gc = vec![];

        for (reference, route) in &self.mesh_routes {
            if self.mutated_routes.contains(reference) {
                continue;
            }
            let parents: BTreeSet<_> = route
                .parents()
                .iter()
                .filter(|p| p.is_api_gateway())
                .map(|p| p.sectionless(&route.header().namespace))
                .collect();
            if parents.contains(&gateway_reference) && parents.len() <= 1 {
                to_gc.push(reference.clone());
            }
        }

        if let Some(certificates) = self.gateways.get(&gateway_reference) {
            for certificate in certificates {
                if self.processed_certificates.contains(certificate) || !self.mesh_certificates.contains_key(certificate) {
                    continue;
                }
                let referencing = self.gateways.values().filter(|c| c.contains(certificate)).count();
                if referencing <= 1 {
                    to_gc.push(certificate.clone());
                }
            }
        }
        to_gc
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{
        common::{
            crds::{GatewayPolicySpec, PolicyTargetReference, RouteAuthFilterSpec},
            GatewaySpecView, ListenerTls, ListenerView, KIND_ROUTE_AUTH_FILTER, MESHGATE_GROUP,
        },
        mesh::entries::{EntryHeader, FileSystemCertificateEntry, ResourceReference},
    };

    fn resources() -> ResourceMap {
        ResourceMap::new(Translator::default(), ReferenceValidator::default())
    }

    fn gateway(name: &str, certificate: Option<&str>) -> GatewayView {
        GatewayView {
            key: ResourceKey::gateway("infra", name),
            spec: GatewaySpecView {
                listeners: vec![ListenerView {
                    name: "https".to_owned(),
                    hostname: None,
                    port: 443,
                    protocol: "HTTPS".to_owned(),
                    tls: certificate.map(|name| ListenerTls {
                        certificate_refs: vec![ObjectRef { group: String::new(), kind: "Secret".to_owned(), namespace: None, name: name.to_owned() }],
                        ..Default::default()
                    }),
                    allowed_routes: None,
                }],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn mesh_route(name: &str, gateways: &[&str]) -> HttpRouteEntry {
        HttpRouteEntry {
            header: EntryHeader::new(name, "", "", BTreeMap::new()),
            parents: gateways
                .iter()
                .map(|g| ResourceReference { kind: "api-gateway".to_owned(), name: (*g).to_owned(), section_name: "https".to_owned(), ..Default::default() })
                .collect(),
            ..Default::default()
        }
    }

    fn route(name: &str, gateways: &[&str]) -> HttpRouteView {
        HttpRouteView {
            key: ResourceKey::http_route("infra", name),
            parent_refs: gateways.iter().map(|g| ParentRef { name: (*g).to_owned(), ..Default::default() }).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_counting_order_does_not_matter() {
        let mut first = resources();
        first.reference_count_http_route(&route("route", &["a", "b"]));
        first.reference_count_gateway(&gateway("a", None));
        first.reference_count_gateway(&gateway("b", None));

        let mut second = resources();
        second.reference_count_gateway(&gateway("b", None));
        second.reference_count_gateway(&gateway("a", None));
        second.reference_count_gateway(&gateway("a", None));
        second.reference_count_http_route(&route("route", &["a", "b"]));

        let key = ResourceKey::http_route("infra", "route");
        assert!(!first.can_gc_http_route_on_unbind(&key));
        assert!(!second.can_gc_http_route_on_unbind(&key));
        assert!(first.can_gc_http_route_on_unbind(&ResourceKey::http_route("infra", "unknown")));
    }

    #[test]
    fn test_routes_to_gc() {
        let mut resources = resources();
        resources.reference_count_gateway(&gateway("a", None));
        resources.reference_count_mesh_http_route(&mesh_route("orphan", &["a"]));
        resources.reference_count_mesh_http_route(&mesh_route("shared", &["a", "b"]));
        resources.reference_count_mesh_http_route(&mesh_route("kept", &["a"]));
        resources.reference_count_mesh_http_route(&mesh_route("other", &["b"]));

        resources.mutate_http_route(&ResourceKey::http_route("infra", "kept"), Box::new(|_, _| {}), |route| route);
        let gc = resources.resources_to_gc(&ResourceKey::gateway("infra", "a"));
        assert_eq!(gc, vec![ConfigEntryRef::new(EntryKind::HttpRoute, "orphan", "", "").normalized()]);
        assert_eq!(resources.mutations().len(), 1);
        assert!(resources.mutations().is_empty());
    }

    #[test]
    fn test_route_without_parents_is_not_queued() {
        let mut resources = resources();
        resources.reference_count_mesh_http_route(&mesh_route("route", &["a"]));
        resources.mutate_http_route(&ResourceKey::http_route("infra", "route"), Box::new(|_, _| {}), |mut route| {
            route.parents.clear();
            route
        });
        assert!(resources.mutations().is_empty());
        assert_eq!(resources.resources_to_gc(&ResourceKey::gateway("infra", "a")).len(), 1);
    }

    #[test]
    fn test_certificates_to_gc() {
        let mut resources = resources();
        let secret = SecretView { key: ResourceKey::secret("infra", "cert"), ..Default::default() };
        let certificate = |name: &str| {
            ConfigEntry::FileSystemCertificate(FileSystemCertificateEntry {
                header: EntryHeader::new(name, "", "", BTreeMap::new()),
                ..Default::default()
            })
        };
        resources.reference_count_gateway(&gateway("a", Some("cert")));
        resources.reference_count_gateway(&gateway("b", Some("shared")));
        resources.reference_count_gateway(&gateway("c", Some("shared")));
        resources.reference_count_mesh_certificate(&certificate("cert"));
        resources.reference_count_mesh_certificate(&certificate("shared"));

        let cert_reference = resources.certificate_reference(&secret.key);
        assert_eq!(resources.resources_to_gc(&ResourceKey::gateway("infra", "a")), vec![cert_reference]);
        assert!(resources.resources_to_gc(&ResourceKey::gateway("infra", "b")).is_empty());

        resources.reference_count_certificate(&secret);
        resources.translate_certificate(&secret.key);
        resources.translate_certificate(&secret.key);
        assert!(resources.resources_to_gc(&ResourceKey::gateway("infra", "a")).is_empty());
        assert_eq!(resources.mutations().len(), 1);
    }

    #[test]
    fn test_gateway_policy_for_listener() {
        let policy = |name: &str, section: Option<&str>| {
            let mut policy = GatewayPolicy::new(
                name,
                GatewayPolicySpec {
                    target_ref: PolicyTargetReference {
                        group: GATEWAY_API_GROUP.to_owned(),
                        kind: KIND_GATEWAY.to_owned(),
                        name: "a".to_owned(),
                        namespace: None,
                        section_name: section.map(str::to_owned),
                    },
                    ..Default::default()
                },
            );
            policy.metadata.namespace = Some("infra".to_owned());
            policy
        };
        let mut resources = resources();
        resources.add_gateway_policy(policy("general", None));
        resources.add_gateway_policy(policy("specific", Some("https")));
        let gateway = ResourceKey::gateway("infra", "a");
        let name = |p: Option<&GatewayPolicy>| p.and_then(|p| p.metadata.name.clone());
        assert_eq!(name(resources.gateway_policy_for_listener(&gateway, "https")).as_deref(), Some("specific"));
        assert_eq!(name(resources.gateway_policy_for_listener(&gateway, "http")).as_deref(), Some("general"));
        assert!(resources.gateway_policy_for_listener(&ResourceKey::gateway("other", "a"), "https").is_none());
    }

    #[test]
    fn test_external_filter_lookup() {
        let mut filter = RouteAuthFilter::new("jwt", RouteAuthFilterSpec::default());
        filter.metadata.namespace = Some("apps".to_owned());
        let key = ResourceKey::new(&GroupKind::new(MESHGATE_GROUP, KIND_ROUTE_AUTH_FILTER), "apps", "jwt");
        let mut resources = resources();
        resources.add_external_filter(key, ExternalFilter::Auth(filter.clone()));

        let reference = LocalObjectRef { group: MESHGATE_GROUP.to_owned(), kind: KIND_ROUTE_AUTH_FILTER.to_owned(), name: "jwt".to_owned() };
        assert_eq!(resources.external_filter(&reference, "apps"), Some(&ExternalFilter::Auth(filter)));
        assert!(resources.external_filter(&reference, "other").is_none());
    }
}
