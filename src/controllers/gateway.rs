use std::sync::Arc;

use futures::{future::BoxFuture, stream, FutureExt, Stream, StreamExt};
use gateway_api::apis::{
    experimental::tcproutes::TCPRoute,
    standard::{gatewayclasses::GatewayClass, gateways::Gateway, httproutes::HTTPRoute, referencegrants::ReferenceGrant},
};
use itertools::Itertools;
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Pod, Secret, Service},
};
use kube::{
    runtime::{controller::Action, reflector::ObjectRef, watcher::Config, Controller},
    Api, Client, ResourceExt,
};
use tracing::{debug, info, span, Instrument, Level};

use super::{
    applier::SnapshotApplier,
    error_policy,
    fetcher::GatewayFetcher,
    ControllerError, RECONCILE_LONG_WAIT,
};
use crate::{
    binding::Binder,
    cache::{ResourceCache, Subscription},
    common::{
        crds::{GatewayPolicy, MeshService},
        resource_map::policy_targets_gateway,
        translation::Translator,
        GatewayView, HttpRouteView, ParentRef, ResourceKey, TcpRouteView, GATEWAY_NAME_LABEL,
    },
    configuration::Configuration,
};

type Result<T, E = ControllerError> = std::result::Result<T, E>;

struct Context {
    client: Client,
    cache: ResourceCache,
    translator: Translator,
    configuration: Arc<Configuration>,
}

pub struct GatewayController {
    client: Client,
    cache: ResourceCache,
    configuration: Arc<Configuration>,
}

fn gateway_ref(key: &ResourceKey) -> ObjectRef<Gateway> {
    ObjectRef::new(&key.name).within(&key.namespace)
}

fn parent_gateways<'a>(parents: impl Iterator<Item = &'a ParentRef>, route_namespace: &str) -> Vec<ObjectRef<Gateway>> {
    parents.filter_map(|parent| parent.gateway_key(route_namespace)).unique().map(|key| gateway_ref(&key)).collect()
}

/// Gateways named by the route, in its spec or its status, so detached gateways also hear about it.
fn http_route_gateways(route: &HTTPRoute) -> Vec<ObjectRef<Gateway>> {
    HttpRouteView::try_from(route)
        .map(|view| parent_gateways(view.parent_refs.iter().chain(view.status.parents.iter().map(|p| &p.parent_ref)), &view.key.namespace))
        .unwrap_or_default()
}

fn tcp_route_gateways(route: &TCPRoute) -> Vec<ObjectRef<Gateway>> {
    TcpRouteView::try_from(route)
        .map(|view| parent_gateways(view.parent_refs.iter().chain(view.status.parents.iter().map(|p| &p.parent_ref)), &view.key.namespace))
        .unwrap_or_default()
}

fn secret_gateways(secret: &Secret, gateways: &[Arc<Gateway>]) -> Vec<ObjectRef<Gateway>> {
    let Some(namespace) = secret.metadata.namespace.as_deref() else {
        return vec![];
    };
    let name = secret.name_any();
    gateways
        .iter()
        .filter_map(|gateway| GatewayView::try_from(&**gateway).ok())
        .filter(|view| {
            view.spec
                .listeners
                .iter()
                .filter_map(|listener| listener.tls.as_ref())
                .flat_map(|tls| tls.certificate_refs.iter())
                .any(|reference| reference.is_secret() && reference.name == name && reference.namespace_or(&view.key.namespace) == namespace)
        })
        .map(|view| gateway_ref(&view.key))
        .collect()
}

fn policy_gateways(policy: &GatewayPolicy, gateways: &[Arc<Gateway>]) -> Vec<ObjectRef<Gateway>> {
    gateways
        .iter()
        .map(|gateway| ResourceKey::from_resource(&**gateway))
        .filter(|key| policy_targets_gateway(policy, key))
        .map(|key| gateway_ref(&key))
        .collect()
}

fn pod_gateway(pod: &Pod) -> Option<ObjectRef<Gateway>> {
    let name = pod.labels().get(GATEWAY_NAME_LABEL)?;
    Some(ObjectRef::new(name).within(pod.metadata.namespace.as_deref()?))
}

fn all_gateways(gateways: &[Arc<Gateway>]) -> Vec<ObjectRef<Gateway>> {
    gateways.iter().map(|gateway| ObjectRef::from_obj(&**gateway)).collect()
}

/// Gateway keys published by the mesh cache subscriptions, merged into one trigger stream.
fn mesh_triggers(subscriptions: Vec<Subscription>) -> impl Stream<Item = ObjectRef<Gateway>> + Send + 'static {
    stream::select_all(subscriptions.into_iter().map(|subscription| {
        stream::unfold(subscription, |mut subscription| async move { subscription.recv().await.map(|key| (key, subscription)) }).boxed()
    }))
    .map(|key| gateway_ref(&key))
}

impl GatewayController {
    pub fn new(configuration: Arc<Configuration>, client: &Client, cache: ResourceCache) -> Self {
        Self { client: client.clone(), cache, configuration }
    }

    pub fn get_controller(&self, subscriptions: Vec<Subscription>) -> BoxFuture<'static, ()> {
        let context = Arc::new(Context {
            client: self.client.clone(),
            cache: self.cache.clone(),
            translator: Translator::from(&*self.configuration),
            configuration: Arc::clone(&self.configuration),
        });
        let client = &self.client;
        let controller = Controller::new(Api::<Gateway>::all(client.clone()), Config::default());
        let store = controller.store();
        let (classes, secrets, grants, mesh_services, policies, services) = (store.clone(), store.clone(), store.clone(), store.clone(), store.clone(), store);

        controller
            .watches(Api::<GatewayClass>::all(client.clone()), Config::default(), move |class| {
                let name = class.name_any();
                classes.state().into_iter().filter(|gateway| gateway.spec.gateway_class_name == name).map(|gateway| ObjectRef::from_obj(&*gateway)).collect::<Vec<_>>()
            })
            .watches(Api::<HTTPRoute>::all(client.clone()), Config::default(), |route| http_route_gateways(&route))
            .watches(Api::<TCPRoute>::all(client.clone()), Config::default(), |route| tcp_route_gateways(&route))
            .watches(Api::<Secret>::all(client.clone()), Config::default(), move |secret| secret_gateways(&secret, &secrets.state()))
            .watches(Api::<ReferenceGrant>::all(client.clone()), Config::default(), move |_| all_gateways(&grants.state()))
            .watches(Api::<MeshService>::all(client.clone()), Config::default(), move |_| all_gateways(&mesh_services.state()))
            .watches(Api::<GatewayPolicy>::all(client.clone()), Config::default(), move |policy| policy_gateways(&policy, &policies.state()))
            .watches(Api::<Pod>::all(client.clone()), Config::default().labels(GATEWAY_NAME_LABEL), |pod| pod_gateway(&pod))
            .watches(Api::<Service>::all(client.clone()), Config::default(), move |service| {
                let gateway = ObjectRef::new(&service.name_any()).within(service.metadata.namespace.as_deref().unwrap_or_default());
                services.get(&gateway).map(|_| gateway)
            })
            .owns(Api::<Deployment>::all(client.clone()), Config::default())
            .reconcile_on(mesh_triggers(subscriptions))
            .run(Self::reconcile_gateway, error_policy, context)
            .for_each(|_| futures::future::ready(()))
            .boxed()
    }

    async fn reconcile_gateway(gateway: Arc<Gateway>, ctx: Arc<Context>) -> Result<Action> {
        let key = ResourceKey::from_resource(&*gateway);
        let span = span!(Level::INFO, "GatewayController", gateway = %key);
        Self::reconcile(&gateway, &key, &ctx).instrument(span).await
    }

    async fn reconcile(gateway: &Gateway, key: &ResourceKey, ctx: &Context) -> Result<Action> {
        if !ctx.configuration.namespace_allowed(&key.namespace) {
            debug!("Namespace is not watched");
            return Ok(Action::await_change());
        }
        if !ctx.cache.is_synced() {
            return Err(ControllerError::CacheNotSynced);
        }

        let fetcher = GatewayFetcher {
            client: &ctx.client,
            cache: &ctx.cache,
            translator: &ctx.translator,
            controller_name: &ctx.configuration.controller_name,
        };
        let (config, fetched) = fetcher.fetch(gateway).await?;
        let snapshot = Binder::new(config).snapshot();
        if snapshot.is_noop() {
            debug!("Gateway is up to date");
        }

        let applier = SnapshotApplier {
            client: &ctx.client,
            cache: &ctx.cache,
            controller_name: &ctx.configuration.controller_name,
            gateway_image: ctx.configuration.gateway_image(),
            gateway,
            fetched: &fetched,
        };
        applier.apply(key, snapshot).await?;
        info!("Gateway reconciled");
        Ok(Action::requeue(RECONCILE_LONG_WAIT))
    }
}

#[cfg(test)]
mod tests {
    use http::{Request, Response};
    use kube::client::Body;
    use tower_test::mock;

    use super::*;
    use crate::{
        configuration::{CacheConfiguration, MeshConfiguration},
        mesh::memory::InMemoryMeshClient,
    };

    fn gateway(namespace: &str, name: &str) -> Arc<Gateway> {
        Arc::new(
            serde_yaml::from_str(&format!(
                r"
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: {name}
  namespace: {namespace}
spec:
  gatewayClassName: meshgate
  listeners:
  - name: https
    port: 443
    protocol: HTTPS
    tls:
      mode: Terminate
      certificateRefs:
      - name: edge-cert
        namespace: certs
"
            ))
            .unwrap(),
        )
    }

    fn context(client: Client, deny: &[&str]) -> Context {
        let configuration = Configuration::builder()
            .controller_name("meshgate.io/gateway-controller".to_owned())
            .mesh(MeshConfiguration::builder().address("http://127.0.0.1:8500".to_owned()).datacenter("dc1".to_owned()).build())
            .deny_namespaces(deny.iter().map(|n| (*n).to_owned()).collect())
            .build();
        let cache = ResourceCache::new(Arc::new(InMemoryMeshClient::default()), "dc1", CacheConfiguration::default());
        Context {
            client,
            cache,
            translator: Translator::from(&configuration),
            configuration: Arc::new(configuration),
        }
    }

    #[test]
    fn test_routes_map_to_spec_and_status_parents() {
        let route: HTTPRoute = serde_yaml::from_str(
            r"
apiVersion: gateway.networking.k8s.io/v1
kind: HTTPRoute
metadata:
  name: web
  namespace: apps
spec:
  parentRefs:
  - name: edge
    namespace: infra
    sectionName: https
  - name: edge
    namespace: infra
    sectionName: http
  - name: web-svc
    kind: Service
    group: ''
status:
  parents:
  - parentRef:
      name: old
    controllerName: meshgate.io/gateway-controller
    conditions: []
",
        )
        .unwrap();
        let gateways = http_route_gateways(&route);
        assert_eq!(gateways, vec![ObjectRef::new("edge").within("infra"), ObjectRef::new("old").within("apps")]);
    }

    #[test]
    fn test_secrets_map_to_referencing_gateways() {
        let gateways = vec![gateway("infra", "edge"), gateway("certs", "internal")];
        let secret: Secret = serde_yaml::from_str(
            r"
apiVersion: v1
kind: Secret
metadata:
  name: edge-cert
  namespace: certs
",
        )
        .unwrap();
        assert_eq!(
            secret_gateways(&secret, &gateways),
            vec![ObjectRef::new("edge").within("infra"), ObjectRef::new("internal").within("certs")]
        );

        let mut other = secret.clone();
        other.metadata.namespace = Some("infra".to_owned());
        assert!(secret_gateways(&other, &gateways).is_empty());
    }

    #[test]
    fn test_policies_and_pods_map_to_their_gateway() {
        let gateways = vec![gateway("infra", "edge"), gateway("infra", "internal")];
        let policy: GatewayPolicy = serde_yaml::from_str(
            r"
apiVersion: meshgate.io/v1alpha1
kind: GatewayPolicy
metadata:
  name: jwt
  namespace: infra
spec:
  targetRef:
    group: gateway.networking.k8s.io
    kind: Gateway
    name: internal
",
        )
        .unwrap();
        assert_eq!(policy_gateways(&policy, &gateways), vec![ObjectRef::new("internal").within("infra")]);

        let pod: Pod = serde_yaml::from_str(
            r"
apiVersion: v1
kind: Pod
metadata:
  name: edge-5d8f
  namespace: infra
  labels:
    meshgate.io/gateway-name: edge
",
        )
        .unwrap();
        assert_eq!(pod_gateway(&pod), Some(ObjectRef::new("edge").within("infra")));
    }

    #[tokio::test]
    async fn test_denied_namespaces_are_not_reconciled() {
        let (mock_service, _handle) = mock::pair::<Request<Body>, Response<Body>>();
        let ctx = context(Client::new(mock_service, "default"), &["kube-system"]);
        let gateway = gateway("kube-system", "edge");
        let key = ResourceKey::from_resource(&*gateway);
        let action = GatewayController::reconcile(&gateway, &key, &ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_reconcile_waits_for_the_mesh_mirror() {
        let (mock_service, _handle) = mock::pair::<Request<Body>, Response<Body>>();
        let ctx = context(Client::new(mock_service, "default"), &[]);
        let gateway = gateway("infra", "edge");
        let key = ResourceKey::from_resource(&*gateway);
        let error = GatewayController::reconcile(&gateway, &key, &ctx).await.unwrap_err();
        assert_eq!(error, ControllerError::CacheNotSynced);
    }
}
