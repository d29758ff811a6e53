use std::{sync::Arc, time::Duration};

use kube::runtime::controller::Action;
use tracing::warn;

mod applier;
mod fetcher;
pub mod gateway;
pub mod gateway_class;
mod gateway_deployer;
mod utils;

pub use utils::{FinalizerPatcher, StatusPatcher};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ControllerError {
    Conflict,
    PatchFailed(String),
    FetchFailed(String),
    MeshSyncFailed(String),
    InvalidPayload(String),
    CacheNotSynced,
}

const RECONCILE_LONG_WAIT: Duration = Duration::from_secs(3600);
const RECONCILE_ERROR_WAIT: Duration = Duration::from_secs(100);
const RECONCILE_CONFLICT_WAIT: Duration = Duration::from_secs(1);
const GATEWAY_CLASS_IN_USE_WAIT: Duration = Duration::from_secs(10);

impl std::fmt::Display for ControllerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<kube::Error> for ControllerError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(response) if response.code == 409 => ControllerError::Conflict,
            other => ControllerError::FetchFailed(other.to_string()),
        }
    }
}

#[allow(clippy::needless_pass_by_value)]
pub(crate) fn error_policy<T, C>(_object: Arc<T>, err: &ControllerError, _ctx: Arc<C>) -> Action {
    match err {
        ControllerError::Conflict => Action::requeue(RECONCILE_CONFLICT_WAIT),
        ControllerError::PatchFailed(_)
        | ControllerError::FetchFailed(_)
        | ControllerError::MeshSyncFailed(_)
        | ControllerError::InvalidPayload(_)
        | ControllerError::CacheNotSynced => {
            warn!("Reconcile failed {err}");
            Action::requeue(RECONCILE_ERROR_WAIT)
        },
    }
}
