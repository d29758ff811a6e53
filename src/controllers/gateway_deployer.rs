//! Deployment and Service running the data plane of one gateway.
//!
//! Both objects are named after the gateway, labelled as managed by this controller and owned by
//! the Gateway so Kubernetes collects them if the Gateway disappears without a reconcile.

use std::collections::BTreeMap;

use gateway_api::apis::standard::gateways::Gateway;
use itertools::Itertools;
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            Affinity, Container, ContainerPort, PodAffinityTerm, PodAntiAffinity, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
            WeightedPodAffinityTerm,
        },
    },
    apimachinery::pkg::{
        apis::meta::v1::{LabelSelector, ObjectMeta},
        util::intstr::IntOrString,
    },
};
use kube::{
    api::{DeleteParams, Patch, PatchParams},
    Api, Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::common::{crds::GatewayClassConfigSpec, translation::to_container_port, GATEWAY_NAME_LABEL};

pub const GATEWAY_NAMESPACE_LABEL: &str = "meshgate.io/gateway-namespace";
pub const GATEWAY_MANAGED_LABEL: &str = "meshgate.io/managed";
const COMPONENT_LABEL: &str = "component";
const COMPONENT: &str = "api-gateway";
const CONTAINER_NAME: &str = "gateway";

pub fn gateway_labels(gateway: &Gateway) -> BTreeMap<String, String> {
    BTreeMap::from([
        (COMPONENT_LABEL.to_owned(), COMPONENT.to_owned()),
        (GATEWAY_NAME_LABEL.to_owned(), gateway.name_any()),
        (GATEWAY_NAMESPACE_LABEL.to_owned(), gateway.namespace().unwrap_or_default()),
        (GATEWAY_MANAGED_LABEL.to_owned(), "true".to_owned()),
    ])
}

fn object_meta(gateway: &Gateway, annotations: Option<BTreeMap<String, String>>) -> ObjectMeta {
    ObjectMeta {
        name: Some(gateway.name_any()),
        namespace: gateway.namespace(),
        labels: Some(gateway_labels(gateway)),
        annotations,
        owner_references: gateway.controller_owner_ref(&()).map(|owner| vec![owner]),
        ..Default::default()
    }
}

/// Listener ports and the container ports they map to, one entry per distinct listener port.
fn listener_ports(gateway: &Gateway, config: &GatewayClassConfigSpec) -> Vec<(String, i32, i32)> {
    gateway
        .spec
        .listeners
        .iter()
        .unique_by(|listener| listener.port)
        .map(|listener| (listener.name.clone(), listener.port, to_container_port(listener.port, config.map_privileged_container_ports)))
        .collect()
}

pub fn create_deployment(gateway: &Gateway, config: &GatewayClassConfigSpec, default_image: &str) -> Deployment {
    let labels = gateway_labels(gateway);
    let ports = listener_ports(gateway, config)
        .into_iter()
        .map(|(_, _, container_port)| ContainerPort { container_port, protocol: Some("TCP".to_owned()), ..Default::default() })
        .collect();

    let pod_spec = PodSpec {
        containers: vec![Container {
            name: CONTAINER_NAME.to_owned(),
            image: Some(config.deployment.image.clone().unwrap_or_else(|| default_image.to_owned())),
            ports: Some(ports),
            ..Default::default()
        }],
        affinity: Some(Affinity {
            pod_anti_affinity: Some(PodAntiAffinity {
                preferred_during_scheduling_ignored_during_execution: Some(vec![WeightedPodAffinityTerm {
                    weight: 1,
                    pod_affinity_term: PodAffinityTerm {
                        label_selector: Some(LabelSelector { match_labels: Some(labels.clone()), match_expressions: None }),
                        topology_key: "kubernetes.io/hostname".to_owned(),
                        ..Default::default()
                    },
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        node_selector: (!config.node_selector.is_empty()).then(|| config.node_selector.clone()),
        tolerations: (!config.tolerations.is_empty()).then(|| config.tolerations.clone()),
        ..Default::default()
    };

    Deployment {
        metadata: object_meta(gateway, None),
        spec: Some(DeploymentSpec {
            replicas: Some(config.deployment.replicas()),
            selector: LabelSelector { match_labels: Some(labels.clone()), match_expressions: None },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels), ..Default::default() }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Service exposing the listeners, or nothing when the class config names no service type.
pub fn create_service(gateway: &Gateway, config: &GatewayClassConfigSpec) -> Option<Service> {
    let service_type = config.service_type.clone()?;
    let ports = listener_ports(gateway, config)
        .into_iter()
        .map(|(name, port, container_port)| ServicePort {
            name: Some(name),
            port,
            protocol: Some("TCP".to_owned()),
            target_port: Some(IntOrString::Int(container_port)),
            ..Default::default()
        })
        .collect();
    let copied: BTreeMap<String, String> = config
        .copy_annotations
        .service
        .iter()
        .filter_map(|key| gateway.annotations().get(key).map(|value| (key.clone(), value.clone())))
        .collect();

    Some(Service {
        metadata: object_meta(gateway, (!copied.is_empty()).then_some(copied)),
        spec: Some(ServiceSpec {
            selector: Some(gateway_labels(gateway)),
            ports: Some(ports),
            type_: Some(service_type),
            ..Default::default()
        }),
        status: None,
    })
}

fn is_managed<K: Resource>(object: &K) -> bool {
    object.meta().labels.as_ref().and_then(|labels| labels.get(GATEWAY_MANAGED_LABEL)).is_some_and(|value| value == "true")
}

/// Deletes the named object if this controller created it.
async fn delete_managed<K>(api: &Api<K>, name: &str) -> Result<(), kube::Error>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    match api.get_opt(name).await? {
        Some(object) if is_managed(&object) => {
            api.delete(name, &DeleteParams::default()).await?;
            info!("Deleted {} {name}", std::any::type_name::<K>());
            Ok(())
        },
        Some(_) => {
            debug!("{} {name} is not managed by this controller", std::any::type_name::<K>());
            Ok(())
        },
        None => Ok(()),
    }
}

async fn apply<K>(api: &Api<K>, name: &str, controller_name: &str, object: &K) -> Result<(), kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Serialize + std::fmt::Debug,
{
    api.patch(name, &PatchParams::apply(controller_name).force(), &Patch::Apply(object)).await?;
    debug!("Applied {} {name}", std::any::type_name::<K>());
    Ok(())
}

pub struct GatewayDeployer<'a> {
    pub client: &'a Client,
    pub controller_name: &'a str,
    pub default_image: &'a str,
}

impl GatewayDeployer<'_> {
    pub async fn deploy(&self, gateway: &Gateway, config: &GatewayClassConfigSpec) -> Result<(), kube::Error> {
        let name = gateway.name_any();
        let namespace = gateway.namespace().unwrap_or_default();
        let deployment_api = Api::<Deployment>::namespaced(self.client.clone(), &namespace);
        let service_api = Api::<Service>::namespaced(self.client.clone(), &namespace);

        apply(&deployment_api, &name, self.controller_name, &create_deployment(gateway, config, self.default_image)).await?;
        match create_service(gateway, config) {
            Some(service) => apply(&service_api, &name, self.controller_name, &service).await,
            None => delete_managed(&service_api, &name).await,
        }
    }

    pub async fn delete(&self, gateway: &Gateway) -> Result<(), kube::Error> {
        let name = gateway.name_any();
        let namespace = gateway.namespace().unwrap_or_default();
        delete_managed(&Api::<Deployment>::namespaced(self.client.clone(), &namespace), &name).await?;
        delete_managed(&Api::<Service>::namespaced(self.client.clone(), &namespace), &name).await
    }
}
