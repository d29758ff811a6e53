//! Pure conversions from Kubernetes views into mesh config entries.

use std::collections::BTreeMap;

use typed_builder::TypedBuilder;

use super::{
    crds::{self, GatewayClassConfigSpec},
    resource_map::{ExternalFilter, ResourceMap, ServiceTarget},
    BackendRef, GatewayView, HeaderModifier, HttpRouteFilter, HttpRouteMatch, HttpRouteView, ListenerView, PathMatchType, PathModifier, PodView, ProtocolType,
    ResourceKey, TcpRouteView, TlsMode, ValueMatch, ValueMatchType,
};
use crate::{
    configuration::Configuration,
    mesh::entries::{
        ApiGatewayEntry, ApiGatewayListener, CatalogRegistration, ConfigEntryRef, EntryHeader, EntryKind, FileSystemCertificateEntry, HeaderFilter, HealthCheck,
        HttpFilters, HttpMatch, HttpPathMatch, HttpResponseFilters, HttpRouteEntry, HttpRouteRule, HttpService, HttpValueMatch, JwtClaim, JwtProviderRef,
        JwtRequirement, ListenerPolicy, ListenerTlsConfig, RegisteredService, RetryFilter, TcpRouteEntry, TcpService, TimeoutFilter, UrlRewrite, MANAGED_BY_VALUE, META_KEY_DATACENTER, META_KEY_KUBE_NAME,
        META_KEY_KUBE_NAMESPACE, META_KEY_MANAGED_BY,
    },
};

pub const TLS_CIPHER_SUITES_OPTION: &str = "meshgate.io/tls_cipher_suites";
pub const TLS_MIN_VERSION_OPTION: &str = "meshgate.io/tls_min_version";
pub const TLS_MAX_VERSION_OPTION: &str = "meshgate.io/tls_max_version";

/// Synthetic catalog node gateway pods are registered on.
pub const GATEWAY_NODE_NAME: &str = "meshgate-gateways";
const API_GATEWAY_SERVICE_KIND: &str = "api-gateway";
const READINESS_CHECK_NAME: &str = "Kubernetes Readiness Check";
const HEALTH_PASSING: &str = "passing";
const HEALTH_CRITICAL: &str = "critical";

const DEFAULT_CERTIFICATE_MOUNT_PATH: &str = "/meshgate/gateway-certificates";
const PRIVILEGED_PORT_LIMIT: i32 = 1024;

/// Listener port as seen by the gateway container.
pub fn to_container_port(port: i32, map_privileged_container_ports: i32) -> i32 {
    if port < PRIVILEGED_PORT_LIMIT {
        port + map_privileged_container_ports
    } else {
        port
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct Translator {
    #[builder(default)]
    mesh_namespace: Option<String>,
    #[builder(default)]
    mirror_namespaces: bool,
    #[builder(default)]
    mirror_namespace_prefix: String,
    #[builder(default)]
    partition: String,
    #[builder(default)]
    datacenter: String,
    #[builder(default = DEFAULT_CERTIFICATE_MOUNT_PATH.to_owned())]
    certificate_mount_path: String,
}

impl Default for Translator {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<&Configuration> for Translator {
    fn from(configuration: &Configuration) -> Self {
        Self::builder()
            .mesh_namespace(configuration.mesh.namespace.clone())
            .mirror_namespaces(configuration.mesh.mirror_namespaces)
            .mirror_namespace_prefix(configuration.mesh.mirror_namespace_prefix.clone().unwrap_or_default())
            .partition(configuration.mesh.partition.clone().unwrap_or_default())
            .datacenter(configuration.mesh.datacenter.clone())
            .certificate_mount_path(configuration.certificate_mount_path().to_owned())
            .build()
    }
}

impl Translator {
    /// Mesh namespace that mirrors the given Kubernetes namespace.
    pub fn namespace(&self, kubernetes_namespace: &str) -> String {
        if self.mirror_namespaces {
            format!("{}{kubernetes_namespace}", self.mirror_namespace_prefix)
        } else {
            self.mesh_namespace.clone().unwrap_or_default()
        }
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn datacenter(&self) -> &str {
        &self.datacenter
    }

    pub fn reference(&self, kind: EntryKind, key: &ResourceKey) -> ConfigEntryRef {
        ConfigEntryRef::new(kind, &key.name, &self.namespace(&key.namespace), &self.partition).normalized()
    }

    pub fn meta(&self, key: &ResourceKey) -> BTreeMap<String, String> {
        let mut meta = BTreeMap::from([
            (META_KEY_KUBE_NAME.to_owned(), key.name.clone()),
            (META_KEY_KUBE_NAMESPACE.to_owned(), key.namespace.clone()),
        ]);
        if !self.datacenter.is_empty() {
            meta.insert(META_KEY_DATACENTER.to_owned(), self.datacenter.clone());
        }
        meta
    }

    fn header(&self, key: &ResourceKey) -> EntryHeader {
        EntryHeader::new(&key.name, &self.namespace(&key.namespace), &self.partition, self.meta(key))
    }

    pub fn to_api_gateway(&self, gateway: &GatewayView, class_config: &GatewayClassConfigSpec, resources: &ResourceMap) -> ApiGatewayEntry {
        ApiGatewayEntry {
            header: self.header(&gateway.key),
            listeners: gateway
                .spec
                .listeners
                .iter()
                .map(|listener| self.to_api_gateway_listener(gateway, listener, class_config, resources))
                .collect(),
        }
    }

    fn to_api_gateway_listener(&self, gateway: &GatewayView, listener: &ListenerView, class_config: &GatewayClassConfigSpec, resources: &ResourceMap) -> ApiGatewayListener {
        let protocol = match listener.protocol_type() {
            Some(ProtocolType::Http | ProtocolType::Https) => "http".to_owned(),
            Some(ProtocolType::Tcp) => "tcp".to_owned(),
            None => listener.protocol.to_lowercase(),
        };

        let mut tls = ListenerTlsConfig::default();
        if let Some(listener_tls) = listener.tls.as_ref().filter(|tls| tls.mode == TlsMode::Terminate) {
            tls.certificates = listener_tls
                .certificate_refs
                .iter()
                .filter(|r| r.is_secret() && resources.gateway_can_reference_secret(gateway, r))
                .map(|r| ResourceKey::secret(r.namespace_or(&gateway.key.namespace), &r.name))
                .filter(|secret| resources.certificate(secret).is_some())
                .map(|secret| self.reference(EntryKind::FileSystemCertificate, &secret).to_resource_reference())
                .collect();
            let option = |name: &str| listener_tls.options.get(name).cloned().unwrap_or_default();
            tls.min_version = option(TLS_MIN_VERSION_OPTION);
            tls.max_version = option(TLS_MAX_VERSION_OPTION);
            tls.cipher_suites = listener_tls
                .options
                .get(TLS_CIPHER_SUITES_OPTION)
                .map(|suites| suites.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect())
                .unwrap_or_default();
        }

        let policy = resources.gateway_policy_for_listener(&gateway.key, &listener.name);
        let listener_policy = |config: Option<&crds::GatewayPolicyConfig>| {
            config.and_then(|c| c.jwt.as_ref()).map(|jwt| ListenerPolicy { jwt: Some(jwt_requirement(jwt)) })
        };

        ApiGatewayListener {
            name: listener.name.clone(),
            hostname: listener.hostname.clone().unwrap_or_default(),
            port: to_container_port(listener.port, class_config.map_privileged_container_ports),
            protocol,
            tls,
            default: listener_policy(policy.and_then(|p| p.spec.default.as_ref())),
            r#override: listener_policy(policy.and_then(|p| p.spec.r#override.as_ref())),
        }
    }

    /// Route entry without parents; the binder attaches them.
    pub fn to_http_route(&self, route: &HttpRouteView, resources: &ResourceMap) -> HttpRouteEntry {
        let namespace = &route.key.namespace;
        let rules = route
            .rules
            .iter()
            .filter_map(|rule| {
                let services: Vec<_> = rule
                    .backend_refs
                    .iter()
                    .filter(|b| resources.http_route_can_reference_backend(route, &b.backend))
                    .filter_map(|b| {
                        let target = service_target(&b.backend, namespace, resources)?;
                        let (filters, response_filters) = self.http_filters(&b.filters, namespace, resources);
                        Some(HttpService {
                            name: target.name.clone(),
                            weight: b.backend.weight.unwrap_or(1),
                            filters,
                            response_filters,
                            namespace: target.namespace.clone(),
                            partition: target.partition.clone(),
                        })
                    })
                    .collect();
                if services.is_empty() {
                    return None;
                }
                let (filters, response_filters) = self.http_filters(&rule.filters, namespace, resources);
                Some(HttpRouteRule {
                    filters,
                    response_filters,
                    matches: rule.matches.iter().map(http_match).collect(),
                    services,
                })
            })
            .collect();

        HttpRouteEntry {
            header: self.header(&route.key),
            parents: vec![],
            rules,
            hostnames: route.hostnames.clone(),
        }
    }

    pub fn to_tcp_route(&self, route: &TcpRouteView, resources: &ResourceMap) -> TcpRouteEntry {
        TcpRouteEntry {
            header: self.header(&route.key),
            parents: vec![],
            services: route
                .backend_refs()
                .filter(|b| resources.tcp_route_can_reference_backend(route, b))
                .filter_map(|b| service_target(b, &route.key.namespace, resources))
                .map(|target| TcpService {
                    name: target.name.clone(),
                    namespace: target.namespace.clone(),
                    partition: target.partition.clone(),
                })
                .collect(),
        }
    }

    /// Certificate entry pointing at the secret as mounted into gateway pods.
    pub fn to_file_system_certificate(&self, secret: &ResourceKey) -> FileSystemCertificateEntry {
        let prefix = format!("{}/{}_{}", self.certificate_mount_path.trim_end_matches('/'), secret.namespace, secret.name);
        FileSystemCertificateEntry {
            header: self.header(secret),
            certificate: format!("{prefix}_tls.crt"),
            private_key: format!("{prefix}_tls.key"),
        }
    }

    /// Catalog registration of one gateway pod, healthy when the pod is ready.
    pub fn to_registration(&self, gateway: &GatewayView, pod: &PodView) -> CatalogRegistration {
        let namespace = self.namespace(&gateway.key.namespace);
        let mut meta = self.meta(&pod.key);
        meta.insert(META_KEY_MANAGED_BY.to_owned(), MANAGED_BY_VALUE.to_owned());
        let (status, output) = if pod.ready { (HEALTH_PASSING, "Kubernetes health checks passing") } else { (HEALTH_CRITICAL, "Pod is not ready") };
        CatalogRegistration {
            node: GATEWAY_NODE_NAME.to_owned(),
            address: pod.host_ip.clone().unwrap_or_default(),
            node_meta: BTreeMap::from([(META_KEY_MANAGED_BY.to_owned(), MANAGED_BY_VALUE.to_owned())]),
            service: RegisteredService {
                id: pod.key.name.clone(),
                service: gateway.key.name.clone(),
                kind: API_GATEWAY_SERVICE_KIND.to_owned(),
                address: pod.pod_ip.clone().unwrap_or_default(),
                port: 0,
                meta,
                namespace: namespace.clone(),
                partition: self.partition.clone(),
            },
            check: Some(HealthCheck {
                name: READINESS_CHECK_NAME.to_owned(),
                service_id: pod.key.name.clone(),
                status: status.to_owned(),
                output: output.to_owned(),
                namespace,
            }),
            partition: self.partition.clone(),
            skip_node_update: true,
        }
    }

    fn http_filters(&self, filters: &[HttpRouteFilter], namespace: &str, resources: &ResourceMap) -> (HttpFilters, HttpResponseFilters) {
        let mut request = HttpFilters::default();
        let mut response = HttpResponseFilters::default();
        for filter in filters {
            match filter {
                HttpRouteFilter::RequestHeaderModifier(modifier) => request.headers.push(header_filter(modifier)),
                HttpRouteFilter::ResponseHeaderModifier(modifier) => response.headers.push(header_filter(modifier)),
                HttpRouteFilter::UrlRewrite { path: Some(PathModifier::ReplacePrefixMatch(path)), .. } => {
                    request.url_rewrite = Some(UrlRewrite { path: path.clone() });
                },
                HttpRouteFilter::ExtensionRef(reference) => match resources.external_filter(reference, namespace) {
                    Some(ExternalFilter::Retry(retry)) => {
                        request.retry_filter = Some(RetryFilter {
                            num_retries: retry.num_retries.unwrap_or_default(),
                            retry_on: retry.retry_on.clone(),
                            retry_on_status_codes: retry.retry_on_status_codes.clone(),
                            retry_on_connect_failure: retry.retry_on_connect_failure.unwrap_or_default(),
                        });
                    },
                    Some(ExternalFilter::Timeout(timeout)) => {
                        request.timeout_filter = Some(TimeoutFilter {
                            request_timeout: timeout.request_timeout.clone().unwrap_or_default(),
                            idle_timeout: timeout.idle_timeout.clone().unwrap_or_default(),
                        });
                    },
                    Some(ExternalFilter::Auth(auth)) => request.jwt = auth.spec.jwt.as_ref().map(jwt_requirement),
                    None => {},
                },
                HttpRouteFilter::UrlRewrite { .. } | HttpRouteFilter::Unsupported(_) => {},
            }
        }
        (request, response)
    }
}

fn service_target<'a>(backend: &BackendRef, route_namespace: &str, resources: &'a ResourceMap) -> Option<&'a ServiceTarget> {
    let key = ResourceKey::new(&backend.group_kind(), backend.namespace_or(route_namespace), &backend.name);
    resources.service(&key).or_else(|| resources.mesh_service(&key))
}

fn header_filter(modifier: &HeaderModifier) -> HeaderFilter {
    HeaderFilter {
        add: modifier.add.clone(),
        set: modifier.set.clone(),
        remove: modifier.remove.clone(),
    }
}

fn value_match(value: &ValueMatch) -> HttpValueMatch {
    HttpValueMatch {
        match_type: match value.type_ {
            ValueMatchType::Exact => "exact",
            ValueMatchType::RegularExpression => "regex",
        }
        .to_owned(),
        name: value.name.clone(),
        value: value.value.clone(),
    }
}

fn http_match(m: &HttpRouteMatch) -> HttpMatch {
    HttpMatch {
        headers: m.headers.iter().map(value_match).collect(),
        method: m.method.clone().unwrap_or_default(),
        path: m
            .path
            .as_ref()
            .map(|path| HttpPathMatch {
                match_type: match path.type_ {
                    PathMatchType::Exact => "exact",
                    PathMatchType::PathPrefix => "prefix",
                    PathMatchType::RegularExpression => "regex",
                }
                .to_owned(),
                value: path.value.clone(),
            })
            .unwrap_or_default(),
        query: m.query_params.iter().map(value_match).collect(),
    }
}

pub fn jwt_requirement(requirement: &crds::JwtRequirement) -> JwtRequirement {
    JwtRequirement {
        providers: requirement
            .providers
            .iter()
            .map(|provider| JwtProviderRef {
                name: provider.name.clone(),
                verify_claims: provider
                    .verify_claims
                    .iter()
                    .map(|claim| JwtClaim { path: claim.path.clone(), value: claim.value.clone() })
                    .collect(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{
        crds::RouteRetryFilterSpec,
        references::ReferenceValidator,
        BackendRef, HttpBackendRef, HttpRouteRule as KubeHttpRouteRule, ListenerTls, ObjectRef, PathMatch, SecretView, KIND_ROUTE_RETRY_FILTER, MESHGATE_GROUP,
    };

    fn translator() -> Translator {
        Translator::builder().mesh_namespace(Some("mesh".to_owned())).datacenter("dc1".to_owned()).build()
    }

    #[test]
    fn test_namespaces() {
        assert_eq!(translator().namespace("apps"), "mesh");
        let mirrored = Translator::builder().mirror_namespaces(true).mirror_namespace_prefix("k8s-".to_owned()).build();
        assert_eq!(mirrored.namespace("apps"), "k8s-apps");
        assert_eq!(Translator::default().namespace("apps"), "");
    }

    #[test]
    fn test_container_port() {
        assert_eq!(to_container_port(80, 2000), 2080);
        assert_eq!(to_container_port(8080, 2000), 8080);
        assert_eq!(to_container_port(443, 0), 443);
    }

    #[test]
    fn test_http_route_translation() {
        let translator = translator();
        let mut resources = ResourceMap::new(translator.clone(), ReferenceValidator::default());
        resources.add_service(&ResourceKey::service("apps", "api"));
        resources.add_external_filter(
            ResourceKey::new(&crate::common::GroupKind::new(MESHGATE_GROUP, KIND_ROUTE_RETRY_FILTER), "apps", "retries"),
            ExternalFilter::Retry(RouteRetryFilterSpec { num_retries: Some(3), ..Default::default() }),
        );

        let route = HttpRouteView {
            key: ResourceKey::http_route("apps", "route"),
            hostnames: vec!["app.example.com".to_owned()],
            rules: vec![
                KubeHttpRouteRule {
                    matches: vec![HttpRouteMatch {
                        path: Some(PathMatch { type_: PathMatchType::Exact, value: "/v1".to_owned() }),
                        ..Default::default()
                    }],
                    filters: vec![HttpRouteFilter::ExtensionRef(crate::common::LocalObjectRef {
                        group: MESHGATE_GROUP.to_owned(),
                        kind: KIND_ROUTE_RETRY_FILTER.to_owned(),
                        name: "retries".to_owned(),
                    })],
                    backend_refs: vec![HttpBackendRef {
                        backend: BackendRef { name: "api".to_owned(), ..Default::default() },
                        filters: vec![],
                    }],
                },
                KubeHttpRouteRule {
                    backend_refs: vec![HttpBackendRef {
                        backend: BackendRef { name: "missing".to_owned(), ..Default::default() },
                        filters: vec![],
                    }],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let entry = translator.to_http_route(&route, &resources);
        assert_eq!(entry.header.namespace, "mesh");
        assert_eq!(entry.header.meta.get(META_KEY_KUBE_NAMESPACE).map(String::as_str), Some("apps"));
        assert_eq!(entry.header.meta.get(META_KEY_DATACENTER).map(String::as_str), Some("dc1"));
        assert_eq!(entry.rules.len(), 1);
        let rule = &entry.rules[0];
        assert_eq!(rule.matches[0].path, HttpPathMatch { match_type: "exact".to_owned(), value: "/v1".to_owned() });
        assert_eq!(rule.services[0].name, "api");
        assert_eq!(rule.services[0].weight, 1);
        assert_eq!(rule.filters.retry_filter.as_ref().map(|r| r.num_retries), Some(3));
        assert!(entry.parents.is_empty());
    }

    #[test]
    fn test_api_gateway_translation() {
        let translator = translator();
        let mut resources = ResourceMap::new(translator.clone(), ReferenceValidator::default());
        resources.reference_count_certificate(&SecretView { key: ResourceKey::secret("infra", "cert"), ..Default::default() });
        let gateway = GatewayView {
            key: ResourceKey::gateway("infra", "gateway"),
            spec: crate::common::GatewaySpecView {
                listeners: vec![ListenerView {
                    name: "https".to_owned(),
                    hostname: None,
                    port: 443,
                    protocol: "HTTPS".to_owned(),
                    tls: Some(ListenerTls {
                        certificate_refs: vec![
                            ObjectRef { group: String::new(), kind: "Secret".to_owned(), namespace: None, name: "cert".to_owned() },
                            ObjectRef { group: String::new(), kind: "Secret".to_owned(), namespace: Some("other".to_owned()), name: "cert".to_owned() },
                        ],
                        options: BTreeMap::from([(TLS_CIPHER_SUITES_OPTION.to_owned(), "A, B".to_owned())]),
                        ..Default::default()
                    }),
                    allowed_routes: None,
                }],
                ..Default::default()
            },
            ..Default::default()
        };
        let config = GatewayClassConfigSpec { map_privileged_container_ports: 2000, ..Default::default() };
        let entry = translator.to_api_gateway(&gateway, &config, &resources);
        let listener = &entry.listeners[0];
        assert_eq!(listener.port, 2443);
        assert_eq!(listener.protocol, "http");
        assert_eq!(listener.tls.certificates.len(), 1);
        assert_eq!(listener.tls.certificates[0].name, "cert");
        assert_eq!(listener.tls.cipher_suites, vec!["A".to_owned(), "B".to_owned()]);
    }

    #[test]
    fn test_file_system_certificate() {
        let certificate = translator().to_file_system_certificate(&ResourceKey::secret("infra", "cert"));
        assert_eq!(certificate.certificate, "/meshgate/gateway-certificates/infra_cert_tls.crt");
        assert_eq!(certificate.private_key, "/meshgate/gateway-certificates/infra_cert_tls.key");
        assert_eq!(certificate.header.namespace, "mesh");
    }

    #[test]
    fn test_pod_registration() {
        let gateway = GatewayView { key: ResourceKey::gateway("infra", "gateway"), ..Default::default() };
        let pod = PodView {
            key: ResourceKey::new(&crate::common::GroupKind::new("", "Pod"), "infra", "gateway-abc"),
            pod_ip: Some("10.0.0.5".to_owned()),
            host_ip: Some("192.168.0.2".to_owned()),
            ready: true,
            ..Default::default()
        };
        let registration = translator().to_registration(&gateway, &pod);
        assert_eq!(registration.node, GATEWAY_NODE_NAME);
        assert_eq!(registration.address, "192.168.0.2");
        assert_eq!(registration.service.id, "gateway-abc");
        assert_eq!(registration.service.service, "gateway");
        assert_eq!(registration.service.address, "10.0.0.5");
        assert_eq!(registration.service.namespace, "mesh");
        assert_eq!(registration.check.map(|c| c.status), Some(HEALTH_PASSING.to_owned()));
    }
}
