use std::{collections::BTreeMap, fmt::Display};

use gateway_api::apis::standard::gateways::{
    Gateway, GatewayListeners, GatewayListenersAllowedRoutes, GatewayListenersAllowedRoutesNamespacesFrom, GatewayListenersTls, GatewayListenersTlsMode, GatewayStatus,
    GatewayStatusAddresses, GatewayStatusListeners, GatewayStatusListenersSupportedKinds,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, LabelSelector, LabelSelectorRequirement};
use kube::ResourceExt;

use super::{
    resource_key::{CORE_GROUP, KIND_SECRET},
    ConversionError, ResourceKey,
};

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Hash, Eq)]
pub enum ProtocolType {
    Http,
    Https,
    Tcp,
}

impl TryFrom<&str> for ProtocolType {
    type Error = ConversionError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ok(match value.to_uppercase().as_str() {
            "HTTP" => Self::Http,
            "HTTPS" => Self::Https,
            "TCP" => Self::Tcp,
            _ => {
                return Err(ConversionError::UnsupportedProtocol(value.to_owned()));
            },
        })
    }
}

impl Display for ProtocolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut e = format! {"{self:?}"};
        e.make_ascii_uppercase();
        write!(f, "{e}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    #[default]
    Terminate,
    Passthrough,
}

/// Reference from a listener to a certificate holder. Group and kind are kept as written so
/// unsupported kinds can be reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub group: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn is_secret(&self) -> bool {
        self.group == CORE_GROUP && self.kind == KIND_SECRET
    }

    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.namespace.as_deref().filter(|n| !n.is_empty()).unwrap_or(default)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListenerTls {
    pub mode: TlsMode,
    pub mode_set: bool,
    pub certificate_refs: Vec<ObjectRef>,
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamespacesFrom {
    All,
    #[default]
    Same,
    Selector,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RouteNamespaces {
    pub from: NamespacesFrom,
    pub selector: Option<LabelSelector>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteGroupKind {
    pub group: Option<String>,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AllowedRoutes {
    pub namespaces: RouteNamespaces,
    pub kinds: Option<Vec<RouteGroupKind>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListenerView {
    pub name: String,
    pub hostname: Option<String>,
    pub port: i32,
    pub protocol: String,
    pub tls: Option<ListenerTls>,
    pub allowed_routes: Option<AllowedRoutes>,
}

impl ListenerView {
    pub fn protocol_type(&self) -> Option<ProtocolType> {
        ProtocolType::try_from(self.protocol.as_str()).ok()
    }

    pub fn namespaces_from(&self) -> NamespacesFrom {
        self.allowed_routes.as_ref().map(|a| a.namespaces.from).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GatewaySpecView {
    pub gateway_class_name: String,
    pub requested_addresses: usize,
    pub listeners: Vec<ListenerView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GatewayAddress {
    pub type_: Option<String>,
    pub value: String,
}

impl GatewayAddress {
    pub fn ip(value: &str) -> Self {
        Self { type_: Some("IPAddress".to_owned()), value: value.to_owned() }
    }

    pub fn hostname(value: &str) -> Self {
        Self { type_: Some("Hostname".to_owned()), value: value.to_owned() }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListenerStatus {
    pub name: String,
    pub supported_kinds: Vec<RouteGroupKind>,
    pub attached_routes: i32,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GatewayStatusView {
    pub addresses: Vec<GatewayAddress>,
    pub conditions: Vec<Condition>,
    pub listeners: Vec<ListenerStatus>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GatewayView {
    pub key: ResourceKey,
    pub generation: Option<i64>,
    pub deletion_requested: bool,
    pub finalizers: Vec<String>,
    pub annotations: BTreeMap<String, String>,
    pub spec: GatewaySpecView,
    pub status: GatewayStatusView,
}

impl GatewayView {
    pub fn listener(&self, name: &str) -> Option<&ListenerView> {
        self.spec.listeners.iter().find(|l| l.name == name)
    }
}

impl From<&GatewayListenersTls> for ListenerTls {
    fn from(tls: &GatewayListenersTls) -> Self {
        Self {
            mode: match tls.mode {
                Some(GatewayListenersTlsMode::Passthrough) => TlsMode::Passthrough,
                Some(GatewayListenersTlsMode::Terminate) | None => TlsMode::Terminate,
            },
            mode_set: tls.mode.is_some(),
            certificate_refs: tls
                .certificate_refs
                .iter()
                .flatten()
                .map(|r| ObjectRef {
                    group: r.group.clone().unwrap_or_default(),
                    kind: r.kind.clone().unwrap_or_else(|| KIND_SECRET.to_owned()),
                    namespace: r.namespace.clone(),
                    name: r.name.clone(),
                })
                .collect(),
            options: tls.options.clone().unwrap_or_default(),
        }
    }
}

impl From<&GatewayListenersAllowedRoutes> for AllowedRoutes {
    fn from(allowed_routes: &GatewayListenersAllowedRoutes) -> Self {
        let namespaces = allowed_routes
            .namespaces
            .as_ref()
            .map(|namespaces| RouteNamespaces {
                from: match namespaces.from {
                    Some(GatewayListenersAllowedRoutesNamespacesFrom::All) => NamespacesFrom::All,
                    Some(GatewayListenersAllowedRoutesNamespacesFrom::Selector) => NamespacesFrom::Selector,
                    Some(GatewayListenersAllowedRoutesNamespacesFrom::Same) | None => NamespacesFrom::Same,
                },
                selector: namespaces.selector.as_ref().map(|selector| LabelSelector {
                    match_labels: selector.match_labels.clone(),
                    match_expressions: selector.match_expressions.as_ref().map(|expressions| {
                        expressions
                            .iter()
                            .map(|e| LabelSelectorRequirement {
                                key: e.key.clone(),
                                operator: e.operator.clone(),
                                values: e.values.clone(),
                            })
                            .collect()
                    }),
                }),
            })
            .unwrap_or_default();

        Self {
            namespaces,
            kinds: allowed_routes
                .kinds
                .as_ref()
                .map(|kinds| kinds.iter().map(|k| RouteGroupKind { group: k.group.clone(), kind: k.kind.clone() }).collect()),
        }
    }
}

impl From<&GatewayListeners> for ListenerView {
    fn from(listener: &GatewayListeners) -> Self {
        Self {
            name: listener.name.clone(),
            hostname: listener.hostname.clone(),
            port: listener.port,
            protocol: listener.protocol.clone(),
            tls: listener.tls.as_ref().map(ListenerTls::from),
            allowed_routes: listener.allowed_routes.as_ref().map(AllowedRoutes::from),
        }
    }
}

impl From<&GatewayStatus> for GatewayStatusView {
    fn from(status: &GatewayStatus) -> Self {
        Self {
            addresses: status
                .addresses
                .iter()
                .flatten()
                .map(|a| GatewayAddress { type_: a.r#type.clone(), value: a.value.clone() })
                .collect(),
            conditions: status.conditions.clone().unwrap_or_default(),
            listeners: status
                .listeners
                .iter()
                .flatten()
                .map(|l| ListenerStatus {
                    name: l.name.clone(),
                    supported_kinds: l.supported_kinds.iter().map(|k| RouteGroupKind { group: k.group.clone(), kind: k.kind.clone() }).collect(),
                    attached_routes: l.attached_routes,
                    conditions: l.conditions.clone(),
                })
                .collect(),
        }
    }
}

impl From<&GatewayStatusView> for GatewayStatus {
    fn from(status: &GatewayStatusView) -> Self {
        Self {
            addresses: Some(status.addresses.iter().map(|a| GatewayStatusAddresses { r#type: a.type_.clone(), value: a.value.clone() }).collect()),
            conditions: Some(status.conditions.clone()),
            listeners: Some(
                status
                    .listeners
                    .iter()
                    .map(|l| GatewayStatusListeners {
                        name: l.name.clone(),
                        supported_kinds: l.supported_kinds.iter().map(|k| GatewayStatusListenersSupportedKinds { group: k.group.clone(), kind: k.kind.clone() }).collect(),
                        attached_routes: l.attached_routes,
                        conditions: l.conditions.clone(),
                    })
                    .collect(),
            ),
        }
    }
}

impl TryFrom<&Gateway> for GatewayView {
    type Error = ConversionError;

    fn try_from(gateway: &Gateway) -> Result<Self, Self::Error> {
        let Some(namespace) = gateway.metadata.namespace.clone() else {
            return Err(ConversionError::MissingNamespace(gateway.name_any()));
        };

        Ok(Self {
            key: ResourceKey::gateway(&namespace, &gateway.name_any()),
            generation: gateway.metadata.generation,
            deletion_requested: gateway.metadata.deletion_timestamp.is_some(),
            finalizers: gateway.finalizers().to_vec(),
            annotations: gateway.annotations().clone(),
            spec: GatewaySpecView {
                gateway_class_name: gateway.spec.gateway_class_name.clone(),
                requested_addresses: gateway.spec.addresses.as_ref().map(Vec::len).unwrap_or_default(),
                listeners: gateway.spec.listeners.iter().map(ListenerView::from).collect(),
            },
            status: gateway.status.as_ref().map(GatewayStatusView::from).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GATEWAY: &str = r"
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: gateway
  namespace: infra
  generation: 3
  finalizers:
    - gateway-finalizer.meshgate.io
spec:
  gatewayClassName: meshgate
  listeners:
    - name: http
      port: 80
      protocol: HTTP
      allowedRoutes:
        namespaces:
          from: Selector
          selector:
            matchLabels:
              team: a
    - name: https
      port: 443
      protocol: https
      hostname: '*.example.com'
      tls:
        certificateRefs:
          - name: cert
            namespace: certs
";

    #[test]
    fn test_gateway_view() {
        let gateway: Gateway = serde_yaml::from_str(GATEWAY).unwrap();
        let view = GatewayView::try_from(&gateway).unwrap();
        assert_eq!(view.key, ResourceKey::gateway("infra", "gateway"));
        assert_eq!(view.generation, Some(3));
        assert_eq!(view.finalizers, vec!["gateway-finalizer.meshgate.io".to_owned()]);
        assert_eq!(view.spec.listeners.len(), 2);

        let http = view.listener("http").unwrap();
        assert_eq!(http.namespaces_from(), NamespacesFrom::Selector);
        assert_eq!(http.protocol_type(), Some(ProtocolType::Http));

        let https = view.listener("https").unwrap();
        assert_eq!(https.protocol_type(), Some(ProtocolType::Https));
        assert_eq!(https.namespaces_from(), NamespacesFrom::Same);
        let tls = https.tls.as_ref().unwrap();
        assert_eq!(tls.mode, TlsMode::Terminate);
        assert!(!tls.mode_set);
        assert!(tls.certificate_refs[0].is_secret());
        assert_eq!(tls.certificate_refs[0].namespace_or("infra"), "certs");
    }

    #[test]
    fn test_protocol_type() {
        assert_eq!(ProtocolType::try_from("tcp").unwrap(), ProtocolType::Tcp);
        assert_eq!(ProtocolType::Https.to_string(), "HTTPS");
        assert!(ProtocolType::try_from("UDP").is_err());
    }
}
