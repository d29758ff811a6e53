use std::collections::BTreeMap;

use gateway_api::apis::standard::{gatewayclasses::GatewayClass, referencegrants::ReferenceGrant};
use k8s_openapi::{
    api::core::v1::{Pod, Secret, Service},
    apimachinery::pkg::apis::meta::v1::Condition,
};
use kube::ResourceExt;

use super::{ConversionError, ResourceKey};

pub const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParametersRef {
    pub group: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GatewayClassView {
    pub name: String,
    pub controller_name: String,
    pub parameters_ref: Option<ParametersRef>,
    pub deletion_requested: bool,
    pub finalizers: Vec<String>,
    pub conditions: Vec<Condition>,
    pub generation: Option<i64>,
}

impl From<&GatewayClass> for GatewayClassView {
    fn from(class: &GatewayClass) -> Self {
        Self {
            name: class.name_any(),
            controller_name: class.spec.controller_name.clone(),
            parameters_ref: class.spec.parameters_ref.as_ref().map(|p| ParametersRef {
                group: p.group.clone(),
                kind: p.kind.clone(),
                name: p.name.clone(),
                namespace: p.namespace.clone(),
            }),
            deletion_requested: class.metadata.deletion_timestamp.is_some(),
            finalizers: class.finalizers().to_vec(),
            conditions: class.status.as_ref().and_then(|s| s.conditions.clone()).unwrap_or_default(),
            generation: class.metadata.generation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SecretView {
    pub key: ResourceKey,
    pub type_: Option<String>,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl SecretView {
    pub fn certificate(&self) -> Option<&[u8]> {
        self.data.get(TLS_CERT_KEY).map(Vec::as_slice)
    }

    pub fn private_key(&self) -> Option<&[u8]> {
        self.data.get(TLS_PRIVATE_KEY_KEY).map(Vec::as_slice)
    }
}

impl TryFrom<&Secret> for SecretView {
    type Error = ConversionError;

    fn try_from(secret: &Secret) -> Result<Self, Self::Error> {
        let Some(namespace) = secret.metadata.namespace.clone() else {
            return Err(ConversionError::MissingNamespace(secret.name_any()));
        };
        Ok(Self {
            key: ResourceKey::secret(&namespace, &secret.name_any()),
            type_: secret.type_.clone(),
            data: secret.data.iter().flatten().map(|(k, v)| (k.clone(), v.0.clone())).collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PodView {
    pub key: ResourceKey,
    pub deleting: bool,
    pub pod_ip: Option<String>,
    pub host_ip: Option<String>,
    pub phase: Option<String>,
    pub ready: bool,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl TryFrom<&Pod> for PodView {
    type Error = ConversionError;

    fn try_from(pod: &Pod) -> Result<Self, Self::Error> {
        let Some(namespace) = pod.metadata.namespace.clone() else {
            return Err(ConversionError::MissingNamespace(pod.name_any()));
        };
        let status = pod.status.as_ref();
        Ok(Self {
            key: ResourceKey::new(&super::GroupKind::new("", "Pod"), &namespace, &pod.name_any()),
            deleting: pod.metadata.deletion_timestamp.is_some(),
            pod_ip: status.and_then(|s| s.pod_ip.clone()),
            host_ip: status.and_then(|s| s.host_ip.clone()),
            phase: status.and_then(|s| s.phase.clone()),
            ready: status
                .and_then(|s| s.conditions.as_ref())
                .is_some_and(|conditions| conditions.iter().any(|c| c.type_ == "Ready" && c.status == "True")),
            labels: pod.labels().clone(),
            annotations: pod.annotations().clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceType {
    #[default]
    ClusterIp,
    NodePort,
    LoadBalancer,
    ExternalName,
}

impl From<&str> for ServiceType {
    fn from(value: &str) -> Self {
        match value {
            "NodePort" => Self::NodePort,
            "LoadBalancer" => Self::LoadBalancer,
            "ExternalName" => Self::ExternalName,
            _ => Self::ClusterIp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceView {
    pub key: ResourceKey,
    pub service_type: ServiceType,
    pub cluster_ip: Option<String>,
    pub load_balancer_ips: Vec<String>,
    pub load_balancer_hostnames: Vec<String>,
}

impl TryFrom<&Service> for ServiceView {
    type Error = ConversionError;

    fn try_from(service: &Service) -> Result<Self, Self::Error> {
        let Some(namespace) = service.metadata.namespace.clone() else {
            return Err(ConversionError::MissingNamespace(service.name_any()));
        };
        let spec = service.spec.as_ref();
        let ingress: Vec<_> = service
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.clone())
            .unwrap_or_default();
        Ok(Self {
            key: ResourceKey::service(&namespace, &service.name_any()),
            service_type: spec.and_then(|s| s.type_.as_deref()).map(ServiceType::from).unwrap_or_default(),
            cluster_ip: spec.and_then(|s| s.cluster_ip.clone()),
            load_balancer_ips: ingress.iter().filter_map(|i| i.ip.clone()).collect(),
            load_balancer_hostnames: ingress.iter().filter_map(|i| i.hostname.clone()).collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GrantFrom {
    pub group: String,
    pub kind: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GrantTo {
    pub group: String,
    pub kind: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReferenceGrantView {
    pub namespace: String,
    pub from: Vec<GrantFrom>,
    pub to: Vec<GrantTo>,
}

impl From<&ReferenceGrant> for ReferenceGrantView {
    fn from(grant: &ReferenceGrant) -> Self {
        Self {
            namespace: grant.metadata.namespace.clone().unwrap_or_default(),
            from: grant
                .spec
                .from
                .iter()
                .map(|f| GrantFrom {
                    group: f.group.clone(),
                    kind: f.kind.clone(),
                    namespace: f.namespace.clone(),
                })
                .collect(),
            to: grant
                .spec
                .to
                .iter()
                .map(|t| GrantTo {
                    group: t.group.clone(),
                    kind: t.kind.clone(),
                    name: t.name.clone(),
                })
                .collect(),
        }
    }
}
