use std::fmt::Display;

use kube::{Resource, ResourceExt};

pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";
pub const MESHGATE_GROUP: &str = "meshgate.io";
pub const DEFAULT_NAMESPACE_NAME: &str = "default";
pub const CORE_GROUP: &str = "";

pub const KIND_GATEWAY: &str = "Gateway";
pub const KIND_GATEWAY_CLASS: &str = "GatewayClass";
pub const KIND_HTTP_ROUTE: &str = "HTTPRoute";
pub const KIND_TCP_ROUTE: &str = "TCPRoute";
pub const KIND_SECRET: &str = "Secret";
pub const KIND_SERVICE: &str = "Service";
pub const KIND_MESH_SERVICE: &str = "MeshService";
pub const KIND_GATEWAY_CLASS_CONFIG: &str = "GatewayClassConfig";
pub const KIND_ROUTE_RETRY_FILTER: &str = "RouteRetryFilter";
pub const KIND_ROUTE_TIMEOUT_FILTER: &str = "RouteTimeoutFilter";
pub const KIND_ROUTE_AUTH_FILTER: &str = "RouteAuthFilter";

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: &str, kind: &str) -> Self {
        Self { group: group.to_owned(), kind: kind.to_owned() }
    }

    pub fn gateway() -> Self {
        Self::new(GATEWAY_API_GROUP, KIND_GATEWAY)
    }

    pub fn http_route() -> Self {
        Self::new(GATEWAY_API_GROUP, KIND_HTTP_ROUTE)
    }

    pub fn tcp_route() -> Self {
        Self::new(GATEWAY_API_GROUP, KIND_TCP_ROUTE)
    }

    pub fn secret() -> Self {
        Self::new(CORE_GROUP, KIND_SECRET)
    }

    pub fn service() -> Self {
        Self::new(CORE_GROUP, KIND_SERVICE)
    }
}

impl Display for GroupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}

/// Identity of a Kubernetes object. Namespace is empty for cluster scoped objects.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ResourceKey {
    pub group: String,
    pub namespace: String,
    pub name: String,
    pub kind: String,
}

impl ResourceKey {
    pub fn new(group_kind: &GroupKind, namespace: &str, name: &str) -> Self {
        Self {
            group: group_kind.group.clone(),
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            kind: group_kind.kind.clone(),
        }
    }

    pub fn gateway(namespace: &str, name: &str) -> Self {
        Self::new(&GroupKind::gateway(), namespace, name)
    }

    pub fn http_route(namespace: &str, name: &str) -> Self {
        Self::new(&GroupKind::http_route(), namespace, name)
    }

    pub fn tcp_route(namespace: &str, name: &str) -> Self {
        Self::new(&GroupKind::tcp_route(), namespace, name)
    }

    pub fn secret(namespace: &str, name: &str) -> Self {
        Self::new(&GroupKind::secret(), namespace, name)
    }

    pub fn service(namespace: &str, name: &str) -> Self {
        Self::new(&GroupKind::service(), namespace, name)
    }

    pub fn from_resource<R>(resource: &R) -> Self
    where
        R: Resource<DynamicType = ()>,
    {
        let namespace = resource.meta().namespace.clone().unwrap_or_default();
        Self {
            group: R::group(&()).into_owned(),
            namespace,
            name: resource.name_any(),
            kind: R::kind(&()).into_owned(),
        }
    }

    pub fn group_kind(&self) -> GroupKind {
        GroupKind { group: self.group.clone(), kind: self.kind.clone() }
    }

    /// Same object regardless of group/kind.
    pub fn same_name(&self, other: &ResourceKey) -> bool {
        self.namespace == other.namespace && self.name == other.name
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}
