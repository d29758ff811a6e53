pub mod conditions;
pub mod crds;
mod gateway;
mod objects;
pub mod references;
pub mod resource_map;
mod resource_key;
mod route;
pub mod translation;

use std::collections::BTreeMap;

pub use gateway::{
    AllowedRoutes, GatewayAddress, GatewaySpecView, GatewayStatusView, GatewayView, ListenerStatus, ListenerTls, ListenerView, NamespacesFrom, ObjectRef, ProtocolType,
    RouteGroupKind, RouteNamespaces, TlsMode,
};
pub use objects::{GatewayClassView, GrantFrom, GrantTo, ParametersRef, PodView, ReferenceGrantView, SecretView, ServiceType, ServiceView, SECRET_TYPE_TLS};
pub use resource_key::{
    GroupKind, ResourceKey, CORE_GROUP, DEFAULT_NAMESPACE_NAME, GATEWAY_API_GROUP, KIND_GATEWAY, KIND_GATEWAY_CLASS, KIND_GATEWAY_CLASS_CONFIG, KIND_HTTP_ROUTE,
    KIND_MESH_SERVICE, KIND_ROUTE_AUTH_FILTER, KIND_ROUTE_RETRY_FILTER, KIND_ROUTE_TIMEOUT_FILTER, KIND_SECRET, KIND_SERVICE, KIND_TCP_ROUTE, MESHGATE_GROUP,
};
pub use route::{
    BackendRef, HeaderModifier, HttpBackendRef, HttpRouteFilter, HttpRouteMatch, HttpRouteRule, HttpRouteView, LocalObjectRef, ParentRef, PathMatch, PathMatchType,
    PathModifier, RouteParentStatus, RouteStatusView, TcpRouteRule, TcpRouteView, ValueMatch, ValueMatchType,
};
use thiserror::Error;

use self::crds::GatewayClassConfigSpec;

pub const GATEWAY_FINALIZER: &str = "gateway-finalizer.meshgate.io";
pub const GATEWAY_CLASS_FINALIZER: &str = "gateway-exists-finalizer.meshgate.io";
pub const GATEWAY_CLASS_CONFIG_ANNOTATION: &str = "meshgate.io/gateway-class-config";
pub const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";
/// Label carried by gateway pods naming the Gateway they serve.
pub const GATEWAY_NAME_LABEL: &str = "meshgate.io/gateway-name";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConversionError {
    #[error("object {0} has no namespace")]
    MissingNamespace(String),
    #[error("protocol {0} is not supported")]
    UnsupportedProtocol(String),
}

#[derive(Error, Debug)]
pub enum GatewayClassConfigError {
    #[error("gateway class config annotation is unreadable: {0}")]
    Unreadable(#[from] serde_json::Error),
}

/// Adds the finalizer when missing. Returns true when the list changed.
pub fn ensure_finalizer(finalizers: &mut Vec<String>, name: &str) -> bool {
    if finalizers.iter().any(|f| f == name) {
        false
    } else {
        finalizers.push(name.to_owned());
        true
    }
}

/// Removes every occurrence of the finalizer. Returns true when the list changed.
pub fn remove_finalizer(finalizers: &mut Vec<String>, name: &str) -> bool {
    let before = finalizers.len();
    finalizers.retain(|f| f != name);
    before != finalizers.len()
}

/// Pins the class config a gateway was first reconciled with. A readable annotation wins over
/// `config`, so editing a GatewayClassConfig leaves existing gateways untouched. Returns the
/// effective config and whether the annotation was written.
pub fn serialize_gateway_class_config(
    annotations: &mut BTreeMap<String, String>,
    config: GatewayClassConfigSpec,
) -> Result<(GatewayClassConfigSpec, bool), GatewayClassConfigError> {
    if let Ok(Some(pinned)) = deserialize_gateway_class_config(annotations) {
        return Ok((pinned, false));
    }
    let serialized = serde_json::to_string(&config)?;
    annotations.insert(GATEWAY_CLASS_CONFIG_ANNOTATION.to_owned(), serialized);
    Ok((config, true))
}

pub fn deserialize_gateway_class_config(annotations: &BTreeMap<String, String>) -> Result<Option<GatewayClassConfigSpec>, GatewayClassConfigError> {
    annotations
        .get(GATEWAY_CLASS_CONFIG_ANNOTATION)
        .map(|value| serde_json::from_str(value))
        .transpose()
        .map_err(GatewayClassConfigError::from)
}

/// Value equal to `expected` when set; unset counts as a match.
pub fn none_or_equal(value: Option<&str>, expected: &str) -> bool {
    value.is_none_or(|v| v == expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalizers() {
        let mut finalizers = vec![];
        assert!(ensure_finalizer(&mut finalizers, GATEWAY_FINALIZER));
        assert!(!ensure_finalizer(&mut finalizers, GATEWAY_FINALIZER));
        assert!(remove_finalizer(&mut finalizers, GATEWAY_FINALIZER));
        assert!(!remove_finalizer(&mut finalizers, GATEWAY_FINALIZER));
    }

    #[test]
    fn test_gateway_class_config_annotation() {
        let mut annotations = BTreeMap::new();
        let config = GatewayClassConfigSpec {
            map_privileged_container_ports: 2000,
            ..Default::default()
        };
        assert_eq!(serialize_gateway_class_config(&mut annotations, config.clone()).unwrap(), (config.clone(), true));
        assert_eq!(deserialize_gateway_class_config(&annotations).unwrap(), Some(config.clone()));

        let edited = GatewayClassConfigSpec { service_type: Some("NodePort".to_owned()), ..Default::default() };
        assert_eq!(serialize_gateway_class_config(&mut annotations, edited.clone()).unwrap(), (config, false));

        annotations.insert(GATEWAY_CLASS_CONFIG_ANNOTATION.to_owned(), "{not json".to_owned());
        assert!(matches!(deserialize_gateway_class_config(&annotations), Err(GatewayClassConfigError::Unreadable(_))));
        assert_eq!(serialize_gateway_class_config(&mut annotations, edited.clone()).unwrap(), (edited, true));
    }
}
