use std::collections::BTreeMap;

use kube::{
    api::{Patch, PatchParams},
    Api, Resource, ResourceExt,
};
use kube_core::{PartialObjectMeta, PartialObjectMetaExt};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::ControllerError;

pub struct FinalizerPatcher {}

impl FinalizerPatcher {
    /// Replaces the object's finalizers and merges in the annotations.
    pub async fn patch_metadata<T>(
        api: &Api<T>,
        resource_name: &str,
        controller_name: &str,
        finalizers: &[String],
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ControllerError>
    where
        T: DeserializeOwned + Clone + std::fmt::Debug,
        T: Resource<DynamicType = ()>,
    {
        let type_name = std::any::type_name::<T>();
        debug!("patch_metadata {type_name} {resource_name} {controller_name}");
        let Some(mut meta) = api.get_metadata_opt(resource_name).await? else {
            debug!("patch_metadata {type_name} {resource_name} is gone");
            return Ok(());
        };

        *meta.finalizers_mut() = finalizers.to_vec();
        meta.annotations_mut().extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        let mut object_meta = meta.meta().clone();
        object_meta.managed_fields = None;
        object_meta.resource_version = None;
        let meta: PartialObjectMeta<T> = object_meta.into_request_partial::<_>();

        match api.patch_metadata(resource_name, &PatchParams::apply(controller_name).force(), &Patch::Apply(&meta)).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("patch_metadata: {type_name} {controller_name} {resource_name} patch failed {e:?}");
                Err(patch_error(e))
            },
        }
    }

    pub async fn remove_finalizer<T>(api: &Api<T>, resource_name: &str, controller_name: &str, finalizer_name: &str) -> Result<(), ControllerError>
    where
        T: DeserializeOwned + Clone + std::fmt::Debug,
        T: Resource<DynamicType = ()>,
    {
        let Some(meta) = api.get_metadata_opt(resource_name).await? else {
            return Ok(());
        };
        let mut finalizers = meta.finalizers().to_vec();
        if crate::common::remove_finalizer(&mut finalizers, finalizer_name) {
            Self::patch_metadata(api, resource_name, controller_name, &finalizers, &BTreeMap::new()).await
        } else {
            Ok(())
        }
    }

    pub async fn ensure_finalizer<T>(api: &Api<T>, resource_name: &str, controller_name: &str, finalizer_name: &str) -> Result<bool, ControllerError>
    where
        T: DeserializeOwned + Clone + std::fmt::Debug,
        T: Resource<DynamicType = ()>,
    {
        let Some(meta) = api.get_metadata_opt(resource_name).await? else {
            return Ok(false);
        };
        let mut finalizers = meta.finalizers().to_vec();
        if crate::common::ensure_finalizer(&mut finalizers, finalizer_name) {
            Self::patch_metadata(api, resource_name, controller_name, &finalizers, &BTreeMap::new()).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

pub struct StatusPatcher {}

impl StatusPatcher {
    /// Applies the object's status, taking ownership of the status fields.
    pub async fn patch_status<T>(api: &Api<T>, controller_name: &str, mut resource: T) -> Result<T, ControllerError>
    where
        T: DeserializeOwned + Clone + std::fmt::Debug + Serialize,
        T: Resource<DynamicType = ()>,
    {
        let name = resource.name_any();
        resource.meta_mut().managed_fields = None;
        resource.meta_mut().resource_version = None;
        let patch_params = PatchParams::apply(controller_name).force();
        api.patch_status(&name, &patch_params, &Patch::Apply(resource)).await.map_err(|e| {
            warn!("patch status failed {} {name} {e:?}", std::any::type_name::<T>());
            patch_error(e)
        })
    }
}

fn patch_error(error: kube::Error) -> ControllerError {
    match ControllerError::from(error) {
        ControllerError::FetchFailed(message) => ControllerError::PatchFailed(message),
        other => other,
    }
}
