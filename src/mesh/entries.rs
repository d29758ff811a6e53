use std::{collections::BTreeMap, fmt::Display};

use serde::{Deserialize, Serialize};

pub const META_KEY_KUBE_NAME: &str = "k8s-name";
pub const META_KEY_KUBE_NAMESPACE: &str = "k8s-namespace";
pub const META_KEY_DATACENTER: &str = "datacenter";
pub const META_KEY_MANAGED_BY: &str = "managed-by";
pub const MANAGED_BY_VALUE: &str = "meshgate";

pub const DEFAULT_MESH_NAMESPACE: &str = "default";
pub const DEFAULT_MESH_PARTITION: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntryKind {
    #[serde(rename = "api-gateway")]
    ApiGateway,
    #[serde(rename = "http-route")]
    HttpRoute,
    #[serde(rename = "tcp-route")]
    TcpRoute,
    #[serde(rename = "inline-certificate")]
    InlineCertificate,
    #[serde(rename = "file-system-certificate")]
    FileSystemCertificate,
    #[serde(rename = "jwt-provider")]
    JwtProvider,
}

impl EntryKind {
    pub const ALL: [EntryKind; 6] = [
        EntryKind::ApiGateway,
        EntryKind::HttpRoute,
        EntryKind::TcpRoute,
        EntryKind::InlineCertificate,
        EntryKind::FileSystemCertificate,
        EntryKind::JwtProvider,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::ApiGateway => "api-gateway",
            EntryKind::HttpRoute => "http-route",
            EntryKind::TcpRoute => "tcp-route",
            EntryKind::InlineCertificate => "inline-certificate",
            EntryKind::FileSystemCertificate => "file-system-certificate",
            EntryKind::JwtProvider => "jwt-provider",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str().eq_ignore_ascii_case(value))
    }
}

impl Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn or_default(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_owned()
    } else {
        value.to_owned()
    }
}

/// Identity of a config entry in the mesh store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigEntryRef {
    pub kind: EntryKind,
    pub name: String,
    pub namespace: String,
    pub partition: String,
    pub section_name: String,
}

impl ConfigEntryRef {
    pub fn new(kind: EntryKind, name: &str, namespace: &str, partition: &str) -> Self {
        Self {
            kind,
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            partition: partition.to_owned(),
            section_name: String::new(),
        }
    }

    /// Form used as a lookup key: empty namespace and partition read as `default`, no section.
    pub fn normalized(&self) -> Self {
        Self {
            kind: self.kind,
            name: self.name.clone(),
            namespace: or_default(&self.namespace, DEFAULT_MESH_NAMESPACE),
            partition: or_default(&self.partition, DEFAULT_MESH_PARTITION),
            section_name: String::new(),
        }
    }

    pub fn to_resource_reference(&self) -> ResourceReference {
        ResourceReference {
            kind: self.kind.as_str().to_owned(),
            name: self.name.clone(),
            section_name: self.section_name.clone(),
            namespace: self.namespace.clone(),
            partition: self.partition.clone(),
        }
    }
}

impl Display for ConfigEntryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, or_default(&self.namespace, DEFAULT_MESH_NAMESPACE), self.name)
    }
}

/// Reference as written inside entries, for example route parents. An empty kind means an API gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceReference {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub section_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub partition: String,
}

impl ResourceReference {
    pub fn is_api_gateway(&self) -> bool {
        self.kind.is_empty() || EntryKind::parse(&self.kind) == Some(EntryKind::ApiGateway)
    }

    /// Gateway identity without the section, namespace defaulting to the owner's.
    pub fn sectionless(&self, default_namespace: &str) -> ConfigEntryRef {
        ConfigEntryRef::new(
            EntryKind::parse(&self.kind).unwrap_or(EntryKind::ApiGateway),
            &self.name,
            if self.namespace.is_empty() { default_namespace } else { &self.namespace },
            &self.partition,
        )
        .normalized()
    }

    fn normalized(&self) -> Self {
        Self {
            kind: if self.is_api_gateway() { EntryKind::ApiGateway.as_str().to_owned() } else { self.kind.to_lowercase() },
            name: self.name.clone(),
            section_name: self.section_name.clone(),
            namespace: or_default(&self.namespace, DEFAULT_MESH_NAMESPACE),
            partition: or_default(&self.partition, DEFAULT_MESH_PARTITION),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EntryCondition {
    #[serde(rename = "Type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EntryStatus {
    #[serde(default)]
    pub conditions: Vec<EntryCondition>,
}

impl EntryStatus {
    pub fn condition(&self, type_: &str) -> Option<&EntryCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

/// Fields shared by every entry kind.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EntryHeader {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub partition: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
    #[serde(default)]
    pub status: EntryStatus,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl EntryHeader {
    pub fn new(name: &str, namespace: &str, partition: &str, meta: BTreeMap<String, String>) -> Self {
        Self {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            partition: partition.to_owned(),
            meta,
            ..Default::default()
        }
    }

    fn normalize(&mut self) {
        self.namespace = or_default(&self.namespace, DEFAULT_MESH_NAMESPACE);
        self.partition = or_default(&self.partition, DEFAULT_MESH_PARTITION);
        self.status = EntryStatus::default();
        self.create_index = 0;
        self.modify_index = 0;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JwtClaim {
    #[serde(default)]
    pub path: Vec<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JwtProviderRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verify_claims: Vec<JwtClaim>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JwtRequirement {
    #[serde(default)]
    pub providers: Vec<JwtProviderRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListenerPolicy {
    #[serde(rename = "JWT", default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<JwtRequirement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListenerTlsConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certificates: Vec<ResourceReference>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub min_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cipher_suites: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApiGatewayListener {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    pub port: i32,
    pub protocol: String,
    #[serde(rename = "TLS", default)]
    pub tls: ListenerTlsConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ListenerPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#override: Option<ListenerPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApiGatewayEntry {
    #[serde(flatten)]
    pub header: EntryHeader,
    #[serde(default)]
    pub listeners: Vec<ApiGatewayListener>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HeaderFilter {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UrlRewrite {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RetryFilter {
    #[serde(default)]
    pub num_retries: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_on_status_codes: Vec<u32>,
    #[serde(default)]
    pub retry_on_connect_failure: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TimeoutFilter {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_timeout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub idle_timeout: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HttpFilters {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderFilter>,
    #[serde(rename = "URLRewrite", default, skip_serializing_if = "Option::is_none")]
    pub url_rewrite: Option<UrlRewrite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_filter: Option<RetryFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_filter: Option<TimeoutFilter>,
    #[serde(rename = "JWT", default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<JwtRequirement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HttpResponseFilters {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HttpPathMatch {
    #[serde(rename = "Match", default, skip_serializing_if = "String::is_empty")]
    pub match_type: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HttpValueMatch {
    #[serde(rename = "Match", default)]
    pub match_type: String,
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HttpMatch {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HttpValueMatch>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(default)]
    pub path: HttpPathMatch,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query: Vec<HttpValueMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HttpService {
    pub name: String,
    #[serde(default)]
    pub weight: i32,
    #[serde(default)]
    pub filters: HttpFilters,
    #[serde(default)]
    pub response_filters: HttpResponseFilters,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub partition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HttpRouteRule {
    #[serde(default)]
    pub filters: HttpFilters,
    #[serde(default)]
    pub response_filters: HttpResponseFilters,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<HttpMatch>,
    #[serde(default)]
    pub services: Vec<HttpService>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HttpRouteEntry {
    #[serde(flatten)]
    pub header: EntryHeader,
    #[serde(default)]
    pub parents: Vec<ResourceReference>,
    #[serde(default)]
    pub rules: Vec<HttpRouteRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hostnames: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TcpService {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub partition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TcpRouteEntry {
    #[serde(flatten)]
    pub header: EntryHeader,
    #[serde(default)]
    pub parents: Vec<ResourceReference>,
    #[serde(default)]
    pub services: Vec<TcpService>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InlineCertificateEntry {
    #[serde(flatten)]
    pub header: EntryHeader,
    #[serde(default)]
    pub certificate: String,
    #[serde(default)]
    pub private_key: String,
}

/// Certificate read by the gateway from files mounted next to it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileSystemCertificateEntry {
    #[serde(flatten)]
    pub header: EntryHeader,
    pub certificate: String,
    pub private_key: String,
}

/// JWT providers are created by operators directly in the mesh; this controller only reads them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JwtProviderEntry {
    #[serde(flatten)]
    pub header: EntryHeader,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issuer: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audiences: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Kind")]
pub enum ConfigEntry {
    #[serde(rename = "api-gateway")]
    ApiGateway(ApiGatewayEntry),
    #[serde(rename = "http-route")]
    HttpRoute(HttpRouteEntry),
    #[serde(rename = "tcp-route")]
    TcpRoute(TcpRouteEntry),
    #[serde(rename = "inline-certificate")]
    InlineCertificate(InlineCertificateEntry),
    #[serde(rename = "file-system-certificate")]
    FileSystemCertificate(FileSystemCertificateEntry),
    #[serde(rename = "jwt-provider")]
    JwtProvider(JwtProviderEntry),
}

impl ConfigEntry {
    pub fn kind(&self) -> EntryKind {
        match self {
            ConfigEntry::ApiGateway(_) => EntryKind::ApiGateway,
            ConfigEntry::HttpRoute(_) => EntryKind::HttpRoute,
            ConfigEntry::TcpRoute(_) => EntryKind::TcpRoute,
            ConfigEntry::InlineCertificate(_) => EntryKind::InlineCertificate,
            ConfigEntry::FileSystemCertificate(_) => EntryKind::FileSystemCertificate,
            ConfigEntry::JwtProvider(_) => EntryKind::JwtProvider,
        }
    }

    pub fn header(&self) -> &EntryHeader {
        match self {
            ConfigEntry::ApiGateway(e) => &e.header,
            ConfigEntry::HttpRoute(e) => &e.header,
            ConfigEntry::TcpRoute(e) => &e.header,
            ConfigEntry::InlineCertificate(e) => &e.header,
            ConfigEntry::FileSystemCertificate(e) => &e.header,
            ConfigEntry::JwtProvider(e) => &e.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut EntryHeader {
        match self {
            ConfigEntry::ApiGateway(e) => &mut e.header,
            ConfigEntry::HttpRoute(e) => &mut e.header,
            ConfigEntry::TcpRoute(e) => &mut e.header,
            ConfigEntry::InlineCertificate(e) => &mut e.header,
            ConfigEntry::FileSystemCertificate(e) => &mut e.header,
            ConfigEntry::JwtProvider(e) => &mut e.header,
        }
    }

    pub fn name(&self) -> &str {
        &self.header().name
    }

    pub fn meta(&self) -> &BTreeMap<String, String> {
        &self.header().meta
    }

    pub fn status(&self) -> &EntryStatus {
        &self.header().status
    }

    pub fn reference(&self) -> ConfigEntryRef {
        let header = self.header();
        ConfigEntryRef::new(self.kind(), &header.name, &header.namespace, &header.partition)
    }

    /// Parents of a route entry, empty for every other kind.
    pub fn parents(&self) -> &[ResourceReference] {
        match self {
            ConfigEntry::HttpRoute(e) => &e.parents,
            ConfigEntry::TcpRoute(e) => &e.parents,
            _ => &[],
        }
    }

    /// Copy with store managed fields cleared and defaults made explicit.
    pub fn normalized(&self) -> ConfigEntry {
        let mut entry = self.clone();
        entry.header_mut().normalize();
        match &mut entry {
            ConfigEntry::ApiGateway(gateway) => {
                for listener in &mut gateway.listeners {
                    listener.protocol = listener.protocol.to_lowercase();
                    for certificate in &mut listener.tls.certificates {
                        *certificate = certificate.normalized();
                    }
                }
            },
            ConfigEntry::HttpRoute(route) => {
                for parent in &mut route.parents {
                    *parent = parent.normalized();
                }
                route.parents.sort();
                for service in route.rules.iter_mut().flat_map(|r| r.services.iter_mut()) {
                    if service.weight == 0 {
                        service.weight = 1;
                    }
                    service.namespace = or_default(&service.namespace, DEFAULT_MESH_NAMESPACE);
                    service.partition = or_default(&service.partition, DEFAULT_MESH_PARTITION);
                }
            },
            ConfigEntry::TcpRoute(route) => {
                for parent in &mut route.parents {
                    *parent = parent.normalized();
                }
                route.parents.sort();
                for service in &mut route.services {
                    service.namespace = or_default(&service.namespace, DEFAULT_MESH_NAMESPACE);
                    service.partition = or_default(&service.partition, DEFAULT_MESH_PARTITION);
                }
            },
            ConfigEntry::InlineCertificate(_) | ConfigEntry::FileSystemCertificate(_) | ConfigEntry::JwtProvider(_) => {},
        }
        entry
    }

    /// Equal as far as the mesh store is concerned.
    pub fn equivalent(&self, other: &ConfigEntry) -> bool {
        self.normalized() == other.normalized()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegisteredService {
    #[serde(rename = "ID")]
    pub id: String,
    pub service: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: i32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub partition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthCheck {
    pub name: String,
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CatalogRegistration {
    pub node: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_meta: BTreeMap<String, String>,
    pub service: RegisteredService,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<HealthCheck>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub partition: String,
    #[serde(default)]
    pub skip_node_update: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CatalogDeregistration {
    pub node: String,
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CatalogService {
    pub node: String,
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    pub service_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub address: String,
}

impl From<&CatalogService> for CatalogDeregistration {
    fn from(service: &CatalogService) -> Self {
        Self {
            node: service.node.clone(),
            service_id: service.service_id.clone(),
            namespace: service.namespace.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_wire_format() {
        let entry: ConfigEntry = serde_json::from_str(
            r#"{
                "Kind": "http-route",
                "Name": "route",
                "Namespace": "apps",
                "Meta": {"k8s-name": "route", "k8s-namespace": "apps"},
                "Parents": [{"Kind": "api-gateway", "Name": "gateway", "SectionName": "http"}],
                "Rules": [{"Services": [{"Name": "api", "Weight": 0}], "Filters": {"URLRewrite": {"Path": "/v2"}}}],
                "Status": {"Conditions": [{"Type": "Accepted", "Status": "True", "Reason": "Accepted", "Message": "route is valid"}]},
                "CreateIndex": 10,
                "ModifyIndex": 12
            }"#,
        )
        .unwrap();
        assert_eq!(entry.kind(), EntryKind::HttpRoute);
        assert_eq!(entry.reference(), ConfigEntryRef::new(EntryKind::HttpRoute, "route", "apps", ""));
        assert_eq!(entry.header().modify_index, 12);
        assert_eq!(entry.status().condition("Accepted").map(|c| c.status.as_str()), Some("True"));
        assert!(entry.parents()[0].is_api_gateway());

        let ConfigEntry::HttpRoute(route) = &entry else { panic!("unexpected kind") };
        assert_eq!(route.rules[0].filters.url_rewrite, Some(UrlRewrite { path: "/v2".to_owned() }));

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["Kind"], "http-route");
        assert_eq!(json["Rules"][0]["Filters"]["URLRewrite"]["Path"], "/v2");
    }

    #[test]
    fn test_equivalence_ignores_casing_and_defaults() {
        let header = EntryHeader::new("gateway", "", "", BTreeMap::new());
        let listener = ApiGatewayListener {
            name: "http".to_owned(),
            port: 8080,
            protocol: "HTTP".to_owned(),
            ..Default::default()
        };
        let written = ConfigEntry::ApiGateway(ApiGatewayEntry { header: header.clone(), listeners: vec![listener.clone()] });
        let mut stored_header = header;
        stored_header.namespace = "default".to_owned();
        stored_header.modify_index = 42;
        let stored = ConfigEntry::ApiGateway(ApiGatewayEntry {
            header: stored_header,
            listeners: vec![ApiGatewayListener { protocol: "http".to_owned(), ..listener }],
        });
        assert!(written.equivalent(&stored));

        let route = |weight| {
            ConfigEntry::HttpRoute(HttpRouteEntry {
                header: EntryHeader::new("route", "apps", "", BTreeMap::new()),
                parents: vec![ResourceReference { name: "gateway".to_owned(), ..Default::default() }],
                rules: vec![HttpRouteRule {
                    services: vec![HttpService { name: "api".to_owned(), weight, ..Default::default() }],
                    ..Default::default()
                }],
                hostnames: vec![],
            })
        };
        assert!(route(0).equivalent(&route(1)));
        assert!(!route(2).equivalent(&route(1)));
    }

    #[test]
    fn test_reference_normalization() {
        let parent = ResourceReference {
            name: "gateway".to_owned(),
            section_name: "http".to_owned(),
            ..Default::default()
        };
        assert_eq!(parent.sectionless("apps"), ConfigEntryRef::new(EntryKind::ApiGateway, "gateway", "apps", "default"));
        assert_eq!(EntryKind::parse("FILE-SYSTEM-CERTIFICATE"), Some(EntryKind::FileSystemCertificate));
    }
}
