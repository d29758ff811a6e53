use std::collections::BTreeMap;

use tracing::debug;

use super::{
    resource_key::{CORE_GROUP, KIND_GATEWAY},
    BackendRef, GatewayView, GrantFrom, GrantTo, GroupKind, HttpRouteView, ObjectRef, ParentRef, ReferenceGrantView, ResourceKey, TcpRouteView, GATEWAY_API_GROUP,
};

const CORE_GROUP_ALIAS: &str = "core";

fn same_group(a: &str, b: &str) -> bool {
    let normalize = |g: &str| if g == CORE_GROUP_ALIAS { CORE_GROUP.to_owned() } else { g.to_owned() };
    normalize(a) == normalize(b)
}

impl GrantFrom {
    fn matches(&self, from: &GroupKind, from_namespace: &str) -> bool {
        same_group(&self.group, &from.group) && self.kind == from.kind && self.namespace == from_namespace
    }
}

impl GrantTo {
    fn matches(&self, to: &GroupKind, to_name: &str) -> bool {
        same_group(&self.group, &to.group) && self.kind == to.kind && self.name.as_deref().is_none_or(|name| name.is_empty() || name == to_name)
    }
}

/// Answers whether a cross-namespace reference is permitted by the ReferenceGrants of the
/// target namespace.
#[derive(Debug, Clone, Default)]
pub struct ReferenceValidator {
    grants: BTreeMap<String, Vec<ReferenceGrantView>>,
}

impl ReferenceValidator {
    pub fn new(grants: impl IntoIterator<Item = ReferenceGrantView>) -> Self {
        let mut by_namespace: BTreeMap<String, Vec<ReferenceGrantView>> = BTreeMap::new();
        for grant in grants {
            by_namespace.entry(grant.namespace.clone()).or_default().push(grant);
        }
        Self { grants: by_namespace }
    }

    pub fn reference_allowed(&self, from: &GroupKind, from_namespace: &str, to: &GroupKind, to_namespace: &str, to_name: &str) -> bool {
        if to_namespace.is_empty() || to_namespace == from_namespace {
            return true;
        }
        let allowed = self
            .grants
            .get(to_namespace)
            .into_iter()
            .flatten()
            .any(|grant| grant.from.iter().any(|f| f.matches(from, from_namespace)) && grant.to.iter().any(|t| t.matches(to, to_name)));
        debug!("Reference {from} {from_namespace} -> {to} {to_namespace}/{to_name} allowed {allowed}");
        allowed
    }

    pub fn gateway_can_reference_secret(&self, gateway: &GatewayView, secret: &ObjectRef) -> bool {
        self.reference_allowed(
            &GroupKind::gateway(),
            &gateway.key.namespace,
            &GroupKind::new(&secret.group, &secret.kind),
            secret.namespace.as_deref().unwrap_or_default(),
            &secret.name,
        )
    }

    pub fn http_route_can_reference_backend(&self, route: &HttpRouteView, backend: &BackendRef) -> bool {
        self.route_can_reference_backend(&route.key, backend)
    }

    pub fn tcp_route_can_reference_backend(&self, route: &TcpRouteView, backend: &BackendRef) -> bool {
        self.route_can_reference_backend(&route.key, backend)
    }

    pub fn route_can_reference_gateway(&self, route: &ResourceKey, parent: &ParentRef) -> bool {
        let to = GroupKind::new(parent.group.as_deref().unwrap_or(GATEWAY_API_GROUP), parent.kind.as_deref().unwrap_or(KIND_GATEWAY));
        self.reference_allowed(&route.group_kind(), &route.namespace, &to, parent.namespace.as_deref().unwrap_or_default(), &parent.name)
    }

    fn route_can_reference_backend(&self, route: &ResourceKey, backend: &BackendRef) -> bool {
        self.reference_allowed(&route.group_kind(), &route.namespace, &backend.group_kind(), backend.namespace.as_deref().unwrap_or_default(), &backend.name)
    }
}
