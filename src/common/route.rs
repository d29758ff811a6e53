use std::collections::BTreeMap;

use gateway_api::apis::{
    experimental::tcproutes::{TCPRoute, TCPRouteParentRefs, TCPRouteRulesBackendRefs, TCPRouteStatus, TCPRouteStatusParents, TCPRouteStatusParentsParentRef},
    standard::httproutes::{
        HTTPRoute, HTTPRouteParentRefs, HTTPRouteRules, HTTPRouteRulesBackendRefs, HTTPRouteRulesFilters, HTTPRouteRulesFiltersRequestHeaderModifier,
        HTTPRouteRulesFiltersResponseHeaderModifier, HTTPRouteRulesMatches, HTTPRouteStatus, HTTPRouteStatusParents, HTTPRouteStatusParentsParentRef,
    },
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::ResourceExt;
use serde::Serialize;

use super::{
    resource_key::{CORE_GROUP, GATEWAY_API_GROUP, KIND_GATEWAY, KIND_SERVICE},
    ConversionError, GroupKind, ResourceKey,
};

/// Reference from a route to its parent. Group, kind and namespace are kept optional so that
/// status entries round trip exactly as written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ParentRef {
    pub group: Option<String>,
    pub kind: Option<String>,
    pub namespace: Option<String>,
    pub name: String,
    pub section_name: Option<String>,
    pub port: Option<i32>,
}

impl ParentRef {
    /// Does this reference name the given gateway when written on a route in `route_namespace`.
    pub fn refers_to_gateway(&self, gateway: &ResourceKey, route_namespace: &str) -> bool {
        self.group.as_deref().is_none_or(|g| g == GATEWAY_API_GROUP)
            && self.kind.as_deref().is_none_or(|k| k == KIND_GATEWAY)
            && gateway.namespace == self.namespace.as_deref().unwrap_or(route_namespace)
            && gateway.name == self.name
    }

    pub fn gateway_key(&self, route_namespace: &str) -> Option<ResourceKey> {
        let is_gateway = self.group.as_deref().is_none_or(|g| g == GATEWAY_API_GROUP) && self.kind.as_deref().is_none_or(|k| k == KIND_GATEWAY);
        is_gateway.then(|| ResourceKey::gateway(self.namespace.as_deref().unwrap_or(route_namespace), &self.name))
    }

    pub fn section(&self) -> &str {
        self.section_name.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BackendRef {
    pub group: Option<String>,
    pub kind: Option<String>,
    pub namespace: Option<String>,
    pub name: String,
    pub port: Option<i32>,
    pub weight: Option<i32>,
}

impl BackendRef {
    pub fn group_kind(&self) -> GroupKind {
        GroupKind::new(self.group.as_deref().unwrap_or(CORE_GROUP), self.kind.as_deref().unwrap_or(KIND_SERVICE))
    }

    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.namespace.as_deref().filter(|n| !n.is_empty()).unwrap_or(default)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RouteParentStatus {
    pub parent_ref: ParentRef,
    pub controller_name: String,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RouteStatusView {
    pub parents: Vec<RouteParentStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathMatchType {
    Exact,
    #[default]
    PathPrefix,
    RegularExpression,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathMatch {
    pub type_: PathMatchType,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueMatchType {
    #[default]
    Exact,
    RegularExpression,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueMatch {
    pub type_: ValueMatchType,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpRouteMatch {
    pub path: Option<PathMatch>,
    pub headers: Vec<ValueMatch>,
    pub query_params: Vec<ValueMatch>,
    pub method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderModifier {
    pub add: BTreeMap<String, String>,
    pub set: BTreeMap<String, String>,
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathModifier {
    ReplaceFullPath(String),
    ReplacePrefixMatch(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalObjectRef {
    pub group: String,
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpRouteFilter {
    RequestHeaderModifier(HeaderModifier),
    ResponseHeaderModifier(HeaderModifier),
    UrlRewrite { hostname: Option<String>, path: Option<PathModifier> },
    ExtensionRef(LocalObjectRef),
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpBackendRef {
    pub backend: BackendRef,
    pub filters: Vec<HttpRouteFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpRouteRule {
    pub matches: Vec<HttpRouteMatch>,
    pub filters: Vec<HttpRouteFilter>,
    pub backend_refs: Vec<HttpBackendRef>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpRouteView {
    pub key: ResourceKey,
    pub generation: Option<i64>,
    pub deletion_requested: bool,
    pub finalizers: Vec<String>,
    pub parent_refs: Vec<ParentRef>,
    pub hostnames: Vec<String>,
    pub rules: Vec<HttpRouteRule>,
    pub status: RouteStatusView,
}

impl HttpRouteView {
    pub fn backend_refs(&self) -> impl Iterator<Item = &BackendRef> {
        self.rules.iter().flat_map(|r| r.backend_refs.iter().map(|b| &b.backend))
    }

    /// Every filter on the route, rule level and backend level.
    pub fn filters(&self) -> impl Iterator<Item = &HttpRouteFilter> {
        self.rules.iter().flat_map(|r| r.filters.iter().chain(r.backend_refs.iter().flat_map(|b| b.filters.iter())))
    }

    pub fn extension_refs(&self) -> impl Iterator<Item = &LocalObjectRef> {
        self.filters().filter_map(|f| match f {
            HttpRouteFilter::ExtensionRef(r) => Some(r),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TcpRouteRule {
    pub backend_refs: Vec<BackendRef>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TcpRouteView {
    pub key: ResourceKey,
    pub generation: Option<i64>,
    pub deletion_requested: bool,
    pub finalizers: Vec<String>,
    pub parent_refs: Vec<ParentRef>,
    pub rules: Vec<TcpRouteRule>,
    pub status: RouteStatusView,
}

impl TcpRouteView {
    pub fn backend_refs(&self) -> impl Iterator<Item = &BackendRef> {
        self.rules.iter().flat_map(|r| r.backend_refs.iter())
    }
}

fn wire_name<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value).ok().and_then(|v| v.as_str().map(str::to_owned)).unwrap_or_default()
}

macro_rules! parent_ref_from {
    ($source:ty) => {
        impl From<&$source> for ParentRef {
            fn from(r: &$source) -> Self {
                Self {
                    group: r.group.clone(),
                    kind: r.kind.clone(),
                    namespace: r.namespace.clone(),
                    name: r.name.clone(),
                    section_name: r.section_name.clone(),
                    port: r.port,
                }
            }
        }
    };
}

parent_ref_from!(HTTPRouteParentRefs);
parent_ref_from!(TCPRouteParentRefs);
parent_ref_from!(HTTPRouteStatusParentsParentRef);
parent_ref_from!(TCPRouteStatusParentsParentRef);

macro_rules! backend_ref_from {
    ($source:ty) => {
        impl From<&$source> for BackendRef {
            fn from(r: &$source) -> Self {
                Self {
                    group: r.group.clone(),
                    kind: r.kind.clone(),
                    namespace: r.namespace.clone(),
                    name: r.name.clone(),
                    port: r.port,
                    weight: r.weight,
                }
            }
        }
    };
}

backend_ref_from!(HTTPRouteRulesBackendRefs);
backend_ref_from!(TCPRouteRulesBackendRefs);

fn header_modifier<A, S>(add: Option<&Vec<A>>, set: Option<&Vec<S>>, remove: Option<&Vec<String>>, name_value: impl Fn(&A) -> (String, String), set_name_value: impl Fn(&S) -> (String, String)) -> HeaderModifier {
    HeaderModifier {
        add: add.into_iter().flatten().map(name_value).collect(),
        set: set.into_iter().flatten().map(set_name_value).collect(),
        remove: remove.cloned().unwrap_or_default(),
    }
}

impl From<&HTTPRouteRulesFiltersRequestHeaderModifier> for HeaderModifier {
    fn from(m: &HTTPRouteRulesFiltersRequestHeaderModifier) -> Self {
        header_modifier(m.add.as_ref(), m.set.as_ref(), m.remove.as_ref(), |h| (h.name.clone(), h.value.clone()), |h| (h.name.clone(), h.value.clone()))
    }
}

impl From<&HTTPRouteRulesFiltersResponseHeaderModifier> for HeaderModifier {
    fn from(m: &HTTPRouteRulesFiltersResponseHeaderModifier) -> Self {
        header_modifier(m.add.as_ref(), m.set.as_ref(), m.remove.as_ref(), |h| (h.name.clone(), h.value.clone()), |h| (h.name.clone(), h.value.clone()))
    }
}

impl From<&HTTPRouteRulesFilters> for HttpRouteFilter {
    fn from(filter: &HTTPRouteRulesFilters) -> Self {
        let filter_type = wire_name(&filter.r#type);
        match filter_type.as_str() {
            "RequestHeaderModifier" => filter
                .request_header_modifier
                .as_ref()
                .map_or(HttpRouteFilter::Unsupported(filter_type.clone()), |m| HttpRouteFilter::RequestHeaderModifier(m.into())),
            "ResponseHeaderModifier" => filter
                .response_header_modifier
                .as_ref()
                .map_or(HttpRouteFilter::Unsupported(filter_type.clone()), |m| HttpRouteFilter::ResponseHeaderModifier(m.into())),
            "URLRewrite" => filter.url_rewrite.as_ref().map_or(HttpRouteFilter::Unsupported(filter_type.clone()), |rewrite| HttpRouteFilter::UrlRewrite {
                hostname: rewrite.hostname.clone(),
                path: rewrite.path.as_ref().and_then(|path| match wire_name(&path.r#type).as_str() {
                    "ReplaceFullPath" => path.replace_full_path.clone().map(PathModifier::ReplaceFullPath),
                    "ReplacePrefixMatch" => path.replace_prefix_match.clone().map(PathModifier::ReplacePrefixMatch),
                    _ => None,
                }),
            }),
            "ExtensionRef" => filter.extension_ref.as_ref().map_or(HttpRouteFilter::Unsupported(filter_type.clone()), |r| {
                HttpRouteFilter::ExtensionRef(LocalObjectRef {
                    group: r.group.clone(),
                    kind: r.kind.clone(),
                    name: r.name.clone(),
                })
            }),
            _ => HttpRouteFilter::Unsupported(filter_type),
        }
    }
}

impl From<&HTTPRouteRulesMatches> for HttpRouteMatch {
    fn from(m: &HTTPRouteRulesMatches) -> Self {
        Self {
            path: m.path.as_ref().map(|p| PathMatch {
                type_: match p.r#type.as_ref().map(wire_name).as_deref() {
                    Some("Exact") => PathMatchType::Exact,
                    Some("RegularExpression") => PathMatchType::RegularExpression,
                    _ => PathMatchType::PathPrefix,
                },
                value: p.value.clone().unwrap_or_else(|| "/".to_owned()),
            }),
            headers: m
                .headers
                .iter()
                .flatten()
                .map(|h| ValueMatch {
                    type_: value_match_type(h.r#type.as_ref().map(wire_name).as_deref()),
                    name: h.name.clone(),
                    value: h.value.clone(),
                })
                .collect(),
            query_params: m
                .query_params
                .iter()
                .flatten()
                .map(|q| ValueMatch {
                    type_: value_match_type(q.r#type.as_ref().map(wire_name).as_deref()),
                    name: q.name.clone(),
                    value: q.value.clone(),
                })
                .collect(),
            method: m.method.as_ref().map(wire_name),
        }
    }
}

fn value_match_type(value: Option<&str>) -> ValueMatchType {
    match value {
        Some("RegularExpression") => ValueMatchType::RegularExpression,
        _ => ValueMatchType::Exact,
    }
}

impl From<&HTTPRouteRules> for HttpRouteRule {
    fn from(rule: &HTTPRouteRules) -> Self {
        Self {
            matches: rule.matches.iter().flatten().map(HttpRouteMatch::from).collect(),
            filters: rule.filters.iter().flatten().map(HttpRouteFilter::from).collect(),
            backend_refs: rule
                .backend_refs
                .iter()
                .flatten()
                .map(|b| HttpBackendRef {
                    backend: BackendRef::from(b),
                    // backend filters share the rule filter schema
                    filters: b
                        .filters
                        .iter()
                        .flatten()
                        .filter_map(|f| serde_json::to_value(f).ok().and_then(|v| serde_json::from_value::<HTTPRouteRulesFilters>(v).ok()))
                        .map(|f| HttpRouteFilter::from(&f))
                        .collect(),
                })
                .collect(),
        }
    }
}

impl From<&HTTPRouteStatus> for RouteStatusView {
    fn from(status: &HTTPRouteStatus) -> Self {
        Self {
            parents: status
                .parents
                .iter()
                .map(|p| RouteParentStatus {
                    parent_ref: ParentRef::from(&p.parent_ref),
                    controller_name: p.controller_name.clone(),
                    conditions: p.conditions.clone().unwrap_or_default(),
                })
                .collect(),
        }
    }
}

impl From<&TCPRouteStatus> for RouteStatusView {
    fn from(status: &TCPRouteStatus) -> Self {
        Self {
            parents: status
                .parents
                .iter()
                .map(|p| RouteParentStatus {
                    parent_ref: ParentRef::from(&p.parent_ref),
                    controller_name: p.controller_name.clone(),
                    conditions: p.conditions.clone().unwrap_or_default(),
                })
                .collect(),
        }
    }
}

impl From<&RouteStatusView> for HTTPRouteStatus {
    fn from(status: &RouteStatusView) -> Self {
        Self {
            parents: status
                .parents
                .iter()
                .map(|p| HTTPRouteStatusParents {
                    parent_ref: HTTPRouteStatusParentsParentRef {
                        group: p.parent_ref.group.clone(),
                        kind: p.parent_ref.kind.clone(),
                        namespace: p.parent_ref.namespace.clone(),
                        name: p.parent_ref.name.clone(),
                        section_name: p.parent_ref.section_name.clone(),
                        port: p.parent_ref.port,
                    },
                    controller_name: p.controller_name.clone(),
                    conditions: Some(p.conditions.clone()),
                })
                .collect(),
        }
    }
}

impl From<&RouteStatusView> for TCPRouteStatus {
    fn from(status: &RouteStatusView) -> Self {
        Self {
            parents: status
                .parents
                .iter()
                .map(|p| TCPRouteStatusParents {
                    parent_ref: TCPRouteStatusParentsParentRef {
                        group: p.parent_ref.group.clone(),
                        kind: p.parent_ref.kind.clone(),
                        namespace: p.parent_ref.namespace.clone(),
                        name: p.parent_ref.name.clone(),
                        section_name: p.parent_ref.section_name.clone(),
                        port: p.parent_ref.port,
                    },
                    controller_name: p.controller_name.clone(),
                    conditions: Some(p.conditions.clone()),
                })
                .collect(),
        }
    }
}

impl TryFrom<&HTTPRoute> for HttpRouteView {
    type Error = ConversionError;

    fn try_from(route: &HTTPRoute) -> Result<Self, Self::Error> {
        let Some(namespace) = route.metadata.namespace.clone() else {
            return Err(ConversionError::MissingNamespace(route.name_any()));
        };
        Ok(Self {
            key: ResourceKey::http_route(&namespace, &route.name_any()),
            generation: route.metadata.generation,
            deletion_requested: route.metadata.deletion_timestamp.is_some(),
            finalizers: route.finalizers().to_vec(),
            parent_refs: route.spec.parent_refs.iter().flatten().map(ParentRef::from).collect(),
            hostnames: route.spec.hostnames.clone().unwrap_or_default(),
            rules: route.spec.rules.iter().flatten().map(HttpRouteRule::from).collect(),
            status: route.status.as_ref().map(RouteStatusView::from).unwrap_or_default(),
        })
    }
}

impl TryFrom<&TCPRoute> for TcpRouteView {
    type Error = ConversionError;

    fn try_from(route: &TCPRoute) -> Result<Self, Self::Error> {
        let Some(namespace) = route.metadata.namespace.clone() else {
            return Err(ConversionError::MissingNamespace(route.name_any()));
        };
        Ok(Self {
            key: ResourceKey::tcp_route(&namespace, &route.name_any()),
            generation: route.metadata.generation,
            deletion_requested: route.metadata.deletion_timestamp.is_some(),
            finalizers: route.finalizers().to_vec(),
            parent_refs: route.spec.parent_refs.iter().flatten().map(ParentRef::from).collect(),
            rules: route
                .spec
                .rules
                .iter()
                .map(|r| TcpRouteRule { backend_refs: r.backend_refs.iter().flatten().map(BackendRef::from).collect() })
                .collect(),
            status: route.status.as_ref().map(RouteStatusView::from).unwrap_or_default(),
        })
    }
}
