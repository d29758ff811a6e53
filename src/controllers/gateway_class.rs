use std::sync::Arc;

use futures::{future::BoxFuture, FutureExt, StreamExt};
use gateway_api::apis::standard::{gatewayclasses::GatewayClass, gateways::Gateway};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::{
    api::ListParams,
    runtime::{controller::Action, reflector::ObjectRef, watcher::Config, Controller},
    Api, Client,
};
use tracing::{debug, info, span, Instrument, Level};

use super::{error_policy, ControllerError, FinalizerPatcher, StatusPatcher, GATEWAY_CLASS_IN_USE_WAIT, RECONCILE_LONG_WAIT};
use crate::common::{
    conditions::{new_condition, set_condition},
    crds::GatewayClassConfig,
    GatewayClassView, ParametersRef, GATEWAY_CLASS_FINALIZER, KIND_GATEWAY_CLASS_CONFIG, MESHGATE_GROUP,
};

type Result<T, E = ControllerError> = std::result::Result<T, E>;

const CONDITION_ACCEPTED: &str = "Accepted";
const REASON_ACCEPTED: &str = "Accepted";
const REASON_INVALID_PARAMETERS: &str = "InvalidParameters";

struct Context {
    client: Client,
    controller_name: String,
}

pub struct GatewayClassController {
    controller_name: String,
    client: Client,
}

fn is_class_config(parameters: &ParametersRef) -> bool {
    parameters.group == MESHGATE_GROUP && parameters.kind == KIND_GATEWAY_CLASS_CONFIG
}

/// Accepted condition for the class given whether its parameters resolved.
fn accepted_condition(class: &GatewayClassView, config_found: bool) -> Condition {
    match &class.parameters_ref {
        Some(parameters) if !is_class_config(parameters) => new_condition(
            CONDITION_ACCEPTED,
            false,
            REASON_INVALID_PARAMETERS,
            &format!("Incorrect type for parametersRef. Expected GatewayClassConfig, got \"{}\".", parameters.kind),
            class.generation,
        ),
        Some(parameters) if !config_found => new_condition(
            CONDITION_ACCEPTED,
            false,
            REASON_INVALID_PARAMETERS,
            &format!("GatewayClassConfig not found \"{}\".", parameters.name),
            class.generation,
        ),
        _ => new_condition(CONDITION_ACCEPTED, true, REASON_ACCEPTED, "GatewayClass Accepted", class.generation),
    }
}

impl GatewayClassController {
    pub fn new(controller_name: String, client: &Client) -> Self {
        Self { controller_name, client: client.clone() }
    }

    pub fn get_controller(&self) -> BoxFuture<'static, ()> {
        let context = Arc::new(Context {
            client: self.client.clone(),
            controller_name: self.controller_name.clone(),
        });
        let controller = Controller::new(Api::<GatewayClass>::all(self.client.clone()), Config::default());
        let classes = controller.store();

        controller
            .watches(Api::<Gateway>::all(self.client.clone()), Config::default(), |gateway| {
                Some(ObjectRef::new(&gateway.spec.gateway_class_name))
            })
            .watches(Api::<GatewayClassConfig>::all(self.client.clone()), Config::default(), move |config| {
                let name = config.metadata.name.clone().unwrap_or_default();
                classes
                    .state()
                    .into_iter()
                    .filter(|class| class.spec.parameters_ref.as_ref().is_some_and(|p| p.name == name))
                    .map(|class| ObjectRef::from_obj(&*class))
                    .collect::<Vec<_>>()
            })
            .run(Self::reconcile_gateway_class, error_policy, context)
            .for_each(|_| futures::future::ready(()))
            .boxed()
    }

    async fn reconcile_gateway_class(gateway_class: Arc<GatewayClass>, ctx: Arc<Context>) -> Result<Action> {
        let class = GatewayClassView::from(&*gateway_class);
        let span = span!(Level::INFO, "GatewayClassController", name = %class.name);
        Self::reconcile(gateway_class, class, &ctx).instrument(span).await
    }

    async fn reconcile(gateway_class: Arc<GatewayClass>, class: GatewayClassView, ctx: &Context) -> Result<Action> {
        let client = &ctx.client;
        let controller_name = &ctx.controller_name;
        let api = Api::<GatewayClass>::all(client.clone());

        if class.controller_name != *controller_name {
            debug!("Class belongs to {}", class.controller_name);
            if class.finalizers.iter().any(|f| f == GATEWAY_CLASS_FINALIZER) {
                FinalizerPatcher::remove_finalizer(&api, &class.name, controller_name, GATEWAY_CLASS_FINALIZER).await?;
            }
            return Ok(Action::await_change());
        }

        if class.deletion_requested {
            let gateways = Api::<Gateway>::all(client.clone()).list(&ListParams::default()).await?;
            if gateways.items.iter().any(|gateway| gateway.spec.gateway_class_name == class.name) {
                info!("Class is still used by gateways");
                return Ok(Action::requeue(GATEWAY_CLASS_IN_USE_WAIT));
            }
            FinalizerPatcher::remove_finalizer(&api, &class.name, controller_name, GATEWAY_CLASS_FINALIZER).await?;
            info!("Class released");
            return Ok(Action::await_change());
        }

        if FinalizerPatcher::ensure_finalizer(&api, &class.name, controller_name, GATEWAY_CLASS_FINALIZER).await? {
            debug!("Finalizer added");
            return Ok(Action::await_change());
        }

        let config_found = match &class.parameters_ref {
            Some(parameters) if is_class_config(parameters) => {
                Api::<GatewayClassConfig>::all(client.clone()).get_opt(&parameters.name).await?.is_some()
            },
            _ => false,
        };

        let mut conditions = class.conditions.clone();
        if set_condition(&mut conditions, accepted_condition(&class, config_found)) {
            let mut updated = (*gateway_class).clone();
            let mut status = updated.status.take().unwrap_or_default();
            status.conditions = Some(conditions);
            updated.status = Some(status);
            StatusPatcher::patch_status(&api, controller_name, updated).await?;
            info!("Status updated");
        }
        Ok(Action::requeue(RECONCILE_LONG_WAIT))
    }
}
