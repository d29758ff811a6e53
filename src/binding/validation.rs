use std::collections::{BTreeMap, BTreeSet};

use kube_core::{Selector, SelectorExt};
use rustls_pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer};
use tracing::debug;

use super::results::{
    AuthFilterError, AuthFilterValidation, BackendError, BackendValidation, BackendValidations, GatewayError, GatewayPolicyValidation, GatewayValidation,
    ListenerError, ListenerValidation, ListenerValidations, PolicyError,
};
use crate::{
    common::{
        crds::{GatewayClassConfigSpec, GatewayPolicy, JwtRequirement, RouteAuthFilter},
        none_or_equal,
        resource_map::{ExternalFilter, ResourceMap},
        translation::to_container_port,
        AllowedRoutes, BackendRef, GatewayView, GroupKind, HttpRouteView, ListenerTls, ListenerView, NamespacesFrom, PodView, ProtocolType, ResourceKey,
        RouteGroupKind, SecretView, TlsMode, CORE_GROUP, GATEWAY_API_GROUP, KIND_HTTP_ROUTE, KIND_MESH_SERVICE, KIND_ROUTE_AUTH_FILTER,
        KIND_ROUTE_RETRY_FILTER, KIND_ROUTE_TIMEOUT_FILTER, KIND_SERVICE, KIND_TCP_ROUTE, MESHGATE_GROUP, NAMESPACE_NAME_LABEL,
    },
    mesh::entries::ApiGatewayEntry,
};

/// Port the gateway's admin interface listens on.
const ADMIN_PORT: i32 = 20000;

/// Route kinds a listener of the given protocol can bind.
pub fn supported_kinds(listener: &ListenerView) -> Vec<RouteGroupKind> {
    let kind = match listener.protocol_type() {
        Some(ProtocolType::Http | ProtocolType::Https) => KIND_HTTP_ROUTE,
        Some(ProtocolType::Tcp) => KIND_TCP_ROUTE,
        None => return vec![],
    };
    vec![RouteGroupKind { group: Some(GATEWAY_API_GROUP.to_owned()), kind: kind.to_owned() }]
}

pub fn validate_gateway(gateway: &GatewayView, pods: &[PodView], mesh_gateway: Option<&ApiGatewayEntry>) -> GatewayValidation {
    GatewayValidation {
        accepted_error: (gateway.spec.requested_addresses > 0).then_some(GatewayError::UnsupportedAddress),
        programmed_error: if pods.is_empty() {
            Some(GatewayError::PendingPods)
        } else if mesh_gateway.is_none() {
            Some(GatewayError::PendingMesh)
        } else {
            None
        },
    }
}

fn validate_certificate_data(secret: &SecretView) -> Option<ListenerError> {
    let (Some(certificate), Some(private_key)) = (secret.certificate(), secret.private_key()) else {
        return Some(ListenerError::CertificateInvalidData);
    };
    match (CertificateDer::from_pem_slice(certificate), PrivateKeyDer::from_pem_slice(private_key)) {
        (Ok(_), Ok(_)) => None,
        (Err(e), _) | (_, Err(e)) => {
            debug!("Secret {} does not hold a usable certificate {e}", secret.key);
            Some(ListenerError::CertificateInvalidData)
        },
    }
}

/// Returns the error that stops the listener from being accepted and the first certificate
/// reference error.
fn validate_tls(gateway: &GatewayView, tls: Option<&ListenerTls>, resources: &ResourceMap) -> (Option<ListenerError>, Option<ListenerError>) {
    let Some(tls) = tls else {
        return (None, None);
    };

    let mut ref_error = None;
    for certificate in &tls.certificate_refs {
        if !certificate.is_secret() {
            ref_error = Some(ListenerError::CertificateNotSupported);
            break;
        }
        if !resources.gateway_can_reference_secret(gateway, certificate) {
            ref_error = Some(ListenerError::RefNotPermitted);
            break;
        }
        let key = ResourceKey::secret(certificate.namespace_or(&gateway.key.namespace), &certificate.name);
        let Some(secret) = resources.certificate(&key) else {
            ref_error = Some(ListenerError::CertificateNotFound);
            break;
        };
        ref_error = validate_certificate_data(secret);
    }

    let accepted_error = (tls.mode == TlsMode::Passthrough).then_some(ListenerError::NoTlsPassthrough);
    (accepted_error, ref_error)
}

fn validate_allowed_route_kinds(allowed_routes: Option<&AllowedRoutes>) -> Option<ListenerError> {
    let kinds = allowed_routes.and_then(|a| a.kinds.as_ref())?;
    kinds
        .iter()
        .any(|k| !(k.kind == KIND_HTTP_ROUTE || k.kind == KIND_TCP_ROUTE) || !none_or_equal(k.group.as_deref(), GATEWAY_API_GROUP))
        .then_some(ListenerError::InvalidRouteKinds)
}

fn missing_jwt_providers<'a>(requirement: Option<&'a JwtRequirement>, resources: &ResourceMap) -> Vec<&'a str> {
    requirement
        .into_iter()
        .flat_map(|jwt| jwt.providers.iter())
        .map(|p| p.name.as_str())
        .filter(|name| !resources.jwt_provider_exists(name))
        .collect()
}

fn policy_missing_jwt_providers(policy: &GatewayPolicy, resources: &ResourceMap) -> bool {
    let configs = [policy.spec.r#override.as_ref(), policy.spec.default.as_ref()];
    configs.into_iter().flatten().any(|config| !missing_jwt_providers(config.jwt.as_ref(), resources).is_empty())
}

/// Validates every listener on its own and against the other listeners sharing its port.
pub fn validate_listeners(gateway: &GatewayView, class_config: &GatewayClassConfigSpec, resources: &ResourceMap) -> ListenerValidations {
    let listeners = &gateway.spec.listeners;
    let mut by_port: BTreeMap<i32, Vec<(usize, &ListenerView)>> = BTreeMap::new();
    for (index, listener) in listeners.iter().enumerate() {
        by_port.entry(listener.port).or_default().push((index, listener));
    }
    let mapping = class_config.map_privileged_container_ports;

    let validations = listeners
        .iter()
        .enumerate()
        .map(|(index, listener)| {
            let mut result = ListenerValidation::default();
            let (accepted_error, ref_error) = validate_tls(gateway, listener.tls.as_ref(), resources);
            result.ref_errors.extend(ref_error);

            if accepted_error.is_some() {
                result.accepted_error = accepted_error;
            } else {
                let container_port = to_container_port(listener.port, mapping);
                let mapped_collision = listeners
                    .iter()
                    .any(|other| other.port != listener.port && to_container_port(other.port, mapping) == container_port);
                result.accepted_error = if listener.protocol_type().is_none() {
                    Some(ListenerError::UnsupportedProtocol)
                } else if listener.port == ADMIN_PORT {
                    Some(ListenerError::PortUnavailable)
                } else if mapped_collision {
                    Some(ListenerError::MappedToPrivilegedPort)
                } else {
                    None
                };
                result.route_kind_error = validate_allowed_route_kinds(listener.allowed_routes.as_ref());
            }

            if resources
                .gateway_policy_for_listener(&gateway.key, &listener.name)
                .is_some_and(|policy| policy_missing_jwt_providers(policy, resources))
            {
                result.ref_errors.push(ListenerError::JwtProviderNotFound);
            }

            let sharing_port = by_port.get(&listener.port).map(Vec::as_slice).unwrap_or_default();
            let protocol = listener.protocol_type();
            result.conflicted_error = if sharing_port.iter().any(|(_, other)| other.protocol_type() != protocol) {
                Some(ListenerError::ProtocolConflict)
            } else if sharing_port.iter().any(|(i, other)| *i != index && other.hostname == listener.hostname) {
                Some(ListenerError::HostnameConflict)
            } else {
                None
            };
            result
        })
        .collect();
    ListenerValidations(validations)
}

/// Checks each backend for a supported kind, existence and permission, in that order.
pub fn validate_backend_refs<'a>(
    route_namespace: &str,
    backends: impl Iterator<Item = &'a BackendRef>,
    can_reference: impl Fn(&BackendRef) -> bool,
    resources: &ResourceMap,
) -> BackendValidations {
    BackendValidations(
        backends
            .map(|backend| {
                let namespace = backend.namespace_or(route_namespace);
                let group_kind = backend.group_kind();
                let key = ResourceKey::new(&group_kind, namespace, &backend.name);
                let error = if group_kind == GroupKind::new(CORE_GROUP, KIND_SERVICE) {
                    (!resources.has_service(&key)).then_some(BackendError::NotFound)
                } else if group_kind == GroupKind::new(MESHGATE_GROUP, KIND_MESH_SERVICE) {
                    (!resources.has_mesh_service(&key)).then_some(BackendError::NotFound)
                } else {
                    Some(BackendError::InvalidKind)
                }
                .or_else(|| (!can_reference(backend)).then_some(BackendError::RefNotPermitted));
                BackendValidation { namespace: namespace.to_owned(), backend: backend.clone(), error }
            })
            .collect(),
    )
}

/// Listeners addressed by a parent reference: the named one, or all of them without a section.
pub fn listeners_for<'a>(gateway: &'a GatewayView, section_name: Option<&str>) -> Vec<&'a ListenerView> {
    gateway.spec.listeners.iter().filter(|l| section_name.is_none_or(|name| l.name == name)).collect()
}

pub fn route_kind_allowed(kinds: &[RouteGroupKind], route: &GroupKind) -> bool {
    kinds.iter().any(|k| k.kind == route.kind && none_or_equal(k.group.as_deref(), &route.group))
}

/// Route kind allowed by the listener protocol and by the kinds listed on the listener, if any.
pub fn route_kind_allowed_for_listener(listener: &ListenerView, route: &GroupKind) -> bool {
    route_kind_allowed(&supported_kinds(listener), route)
        && listener
            .allowed_routes
            .as_ref()
            .and_then(|a| a.kinds.as_deref())
            .is_none_or(|kinds| route_kind_allowed(kinds, route))
}

/// Applies the listener's namespace policy to a route living in `namespace`. `labels` holds the
/// labels of that namespace when it is known.
pub fn route_allowed_for_listener_namespaces(gateway_namespace: &str, listener: &ListenerView, namespace: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    match listener.namespaces_from() {
        NamespacesFrom::All => true,
        NamespacesFrom::Same => gateway_namespace == namespace,
        NamespacesFrom::Selector => {
            let Some(selector) = listener.allowed_routes.as_ref().and_then(|a| a.namespaces.selector.clone()) else {
                return false;
            };
            let mut labels = labels.cloned().unwrap_or_default();
            labels.entry(NAMESPACE_NAME_LABEL.to_owned()).or_insert_with(|| namespace.to_owned());
            match Selector::try_from(selector) {
                Ok(selector) => selector.matches(&labels),
                Err(e) => {
                    debug!("Listener {} has an invalid namespace selector {e}", listener.name);
                    false
                },
            }
        },
    }
}

fn hostnames_match(a: &str, b: &str) -> bool {
    if a.is_empty() || a == "*" || b.is_empty() || b == "*" {
        return true;
    }
    if a.starts_with("*.") || b.starts_with("*.") {
        let a_labels: Vec<_> = a.split('.').collect();
        let b_labels: Vec<_> = b.split('.').collect();
        return a_labels.len() == b_labels.len() && a_labels.iter().zip(&b_labels).skip(1).all(|(a, b)| a.eq_ignore_ascii_case(b));
    }
    a == b
}

pub fn route_allowed_for_listener_hostname(hostname: Option<&str>, route_hostnames: &[String]) -> bool {
    let Some(hostname) = hostname else {
        return true;
    };
    route_hostnames.is_empty() || route_hostnames.iter().any(|name| hostnames_match(name, hostname))
}

pub fn external_refs_all_exist(route: &HttpRouteView, resources: &ResourceMap) -> bool {
    route.extension_refs().all(|r| resources.external_filter(r, &route.key.namespace).is_some())
}

pub fn external_ref_kinds_allowed(route: &HttpRouteView) -> bool {
    route.extension_refs().all(|r| {
        r.group == MESHGATE_GROUP && [KIND_ROUTE_RETRY_FILTER, KIND_ROUTE_TIMEOUT_FILTER, KIND_ROUTE_AUTH_FILTER].contains(&r.kind.as_str())
    })
}

/// Names of the auth filters on the route that require unknown JWT providers.
pub fn auth_filters_missing_jwt_providers(route: &HttpRouteView, resources: &ResourceMap) -> Vec<String> {
    let names: BTreeSet<_> = route
        .extension_refs()
        .filter(|r| match resources.external_filter(r, &route.key.namespace) {
            Some(ExternalFilter::Auth(filter)) => !missing_jwt_providers(filter.spec.jwt.as_ref(), resources).is_empty(),
            _ => false,
        })
        .map(|r| r.name.clone())
        .collect();
    names.into_iter().collect()
}

pub fn validate_gateway_policy(policy: &GatewayPolicy, gateway: &GatewayView, resources: &ResourceMap) -> GatewayPolicyValidation {
    let mut result = GatewayPolicyValidation::default();
    if let Some(section) = &policy.spec.target_ref.section_name {
        if gateway.listener(section).is_none() {
            result.resolved_refs_errors.push(PolicyError::ListenerReferenceDoesNotExist);
        }
    }
    if policy_missing_jwt_providers(policy, resources) {
        result.resolved_refs_errors.push(PolicyError::JwtProvidersReferenceDoesNotExist);
    }
    if !result.resolved_refs_errors.is_empty() {
        result.accepted_error = Some(PolicyError::NotAcceptedDueToInvalidRefs);
    }
    result
}

pub fn validate_auth_filter(filter: &RouteAuthFilter, resources: &ResourceMap) -> AuthFilterValidation {
    if missing_jwt_providers(filter.spec.jwt.as_ref(), resources).is_empty() {
        AuthFilterValidation::default()
    } else {
        AuthFilterValidation {
            accepted_error: Some(AuthFilterError::NotAcceptedDueToInvalidRefs),
            resolved_refs_error: Some(AuthFilterError::JwtProvidersReferenceDoesNotExist),
        }
    }
}
