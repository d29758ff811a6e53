//! Binding of HTTP and TCP routes to the listeners of one gateway.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use super::{
    results::{BackendValidations, BindResult, BindResults, ParentBindResult, ParentBindResults, RouteError, CONDITION_ACCEPTED, CONDITION_MESH_ACCEPTED, CONDITION_SYNCED},
    snapshot::{KubernetesSnapshot, KubernetesStatusUpdate, KubernetesUpdate, MetadataUpdate, UpdateCallback},
    status_setter::StatusSetter,
    validation::{
        auth_filters_missing_jwt_providers, external_ref_kinds_allowed, external_refs_all_exist, listeners_for, route_allowed_for_listener_hostname,
        route_allowed_for_listener_namespaces, route_kind_allowed_for_listener, validate_backend_refs,
    },
};
use crate::{
    common::{
        conditions::{new_condition, CONDITION_TRUE},
        ensure_finalizer, remove_finalizer,
        resource_map::ResourceMap,
        GatewayView, GroupKind, HttpRouteView, ParentRef, ResourceKey, RouteStatusView, TcpRouteView, GATEWAY_FINALIZER,
    },
    mesh::{
        entries::{ConfigEntryRef, EntryKind, EntryStatus, HttpRouteEntry, ResourceReference, TcpRouteEntry},
        MeshError,
    },
};

/// What the binder needs from a route regardless of its kind.
pub(super) trait BindableRoute: Clone {
    fn key(&self) -> &ResourceKey;
    fn generation(&self) -> Option<i64>;
    fn deletion_requested(&self) -> bool;
    fn finalizers_mut(&mut self) -> &mut Vec<String>;
    fn parent_refs(&self) -> &[ParentRef];
    fn status(&self) -> &RouteStatusView;
    fn status_mut(&mut self) -> &mut RouteStatusView;
    fn hostnames(&self) -> &[String];
    fn entry_kind(&self) -> EntryKind;

    /// Problems with the route as a whole that prevent binding to any parent.
    fn route_errors(&self, resources: &ResourceMap) -> Vec<RouteError>;
    fn validate_backends(&self, resources: &ResourceMap) -> BackendValidations;
    fn can_gc_on_unbind(&self, resources: &ResourceMap) -> bool;
    fn metadata_update(&self) -> KubernetesUpdate;
    fn status_update(key: ResourceKey, status: RouteStatusView) -> KubernetesStatusUpdate;

    /// Removes the gateway from the parents of the mirrored mesh route.
    fn unbind(&self, resources: &mut ResourceMap, gateway: &ConfigEntryRef, on_update: UpdateCallback);
    /// Translates the route and queues it with the gateway bound to `sections`.
    fn bind(&self, resources: &mut ResourceMap, gateway: &ConfigEntryRef, sections: &BTreeSet<String>, on_update: UpdateCallback);
}

fn metadata(key: &ResourceKey, finalizers: &[String]) -> MetadataUpdate {
    MetadataUpdate { key: key.clone(), finalizers: finalizers.to_vec(), annotations: BTreeMap::new() }
}

fn is_gateway_parent(parent: &ResourceReference, owner_namespace: &str, gateway: &ConfigEntryRef) -> bool {
    parent.is_api_gateway() && parent.sectionless(owner_namespace) == *gateway
}

fn without_gateway(parents: &mut Vec<ResourceReference>, owner_namespace: &str, gateway: &ConfigEntryRef) {
    parents.retain(|p| !is_gateway_parent(p, owner_namespace, gateway));
}

/// Parents of the mirrored route belonging to other gateways, plus one parent per bound section.
fn bound_parents(existing: &[ResourceReference], owner_namespace: &str, gateway: &ConfigEntryRef, sections: &BTreeSet<String>) -> Vec<ResourceReference> {
    let mut parents = existing.to_vec();
    without_gateway(&mut parents, owner_namespace, gateway);
    parents.extend(sections.iter().map(|section| ResourceReference { section_name: section.clone(), ..gateway.to_resource_reference() }));
    parents.sort();
    parents
}

impl BindableRoute for HttpRouteView {
    fn key(&self) -> &ResourceKey {
        &self.key
    }

    fn generation(&self) -> Option<i64> {
        self.generation
    }

    fn deletion_requested(&self) -> bool {
        self.deletion_requested
    }

    fn finalizers_mut(&mut self) -> &mut Vec<String> {
        &mut self.finalizers
    }

    fn parent_refs(&self) -> &[ParentRef] {
        &self.parent_refs
    }

    fn status(&self) -> &RouteStatusView {
        &self.status
    }

    fn status_mut(&mut self) -> &mut RouteStatusView {
        &mut self.status
    }

    fn hostnames(&self) -> &[String] {
        &self.hostnames
    }

    fn entry_kind(&self) -> EntryKind {
        EntryKind::HttpRoute
    }

    fn route_errors(&self, resources: &ResourceMap) -> Vec<RouteError> {
        let mut errors = vec![];
        if !external_ref_kinds_allowed(self) {
            errors.push(RouteError::InvalidExternalRefKind);
        }
        if !external_refs_all_exist(self, resources) {
            errors.push(RouteError::ExternalRefNotFound);
        }
        let missing_providers = auth_filters_missing_jwt_providers(self, resources);
        if !missing_providers.is_empty() {
            errors.push(RouteError::FilterInvalid(format!("{} reference missing JWT providers", missing_providers.join(", "))));
        }
        errors
    }

    fn validate_backends(&self, resources: &ResourceMap) -> BackendValidations {
        validate_backend_refs(&self.key.namespace, self.backend_refs(), |backend| resources.http_route_can_reference_backend(self, backend), resources)
    }

    fn can_gc_on_unbind(&self, resources: &ResourceMap) -> bool {
        resources.can_gc_http_route_on_unbind(&self.key)
    }

    fn metadata_update(&self) -> KubernetesUpdate {
        KubernetesUpdate::HttpRoute(metadata(&self.key, &self.finalizers))
    }

    fn status_update(key: ResourceKey, status: RouteStatusView) -> KubernetesStatusUpdate {
        KubernetesStatusUpdate::HttpRoute(key, status)
    }

    fn unbind(&self, resources: &mut ResourceMap, gateway: &ConfigEntryRef, on_update: UpdateCallback) {
        resources.mutate_http_route(&self.key, on_update, |mut entry: HttpRouteEntry| {
            without_gateway(&mut entry.parents, &entry.header.namespace, gateway);
            entry
        });
    }

    fn bind(&self, resources: &mut ResourceMap, gateway: &ConfigEntryRef, sections: &BTreeSet<String>, on_update: UpdateCallback) {
        resources.translate_and_mutate_http_route(self, on_update, |existing, mut translated| {
            let existing_parents = existing.map(|e| e.parents.as_slice()).unwrap_or_default();
            translated.parents = bound_parents(existing_parents, &translated.header.namespace, gateway, sections);
            if let Some(existing) = existing {
                translated.header.status = existing.header.status.clone();
            }
            translated
        });
    }
}

impl BindableRoute for TcpRouteView {
    fn key(&self) -> &ResourceKey {
        &self.key
    }

    fn generation(&self) -> Option<i64> {
        self.generation
    }

    fn deletion_requested(&self) -> bool {
        self.deletion_requested
    }

    fn finalizers_mut(&mut self) -> &mut Vec<String> {
        &mut self.finalizers
    }

    fn parent_refs(&self) -> &[ParentRef] {
        &self.parent_refs
    }

    fn status(&self) -> &RouteStatusView {
        &self.status
    }

    fn status_mut(&mut self) -> &mut RouteStatusView {
        &mut self.status
    }

    fn hostnames(&self) -> &[String] {
        &[]
    }

    fn entry_kind(&self) -> EntryKind {
        EntryKind::TcpRoute
    }

    fn route_errors(&self, _: &ResourceMap) -> Vec<RouteError> {
        vec![]
    }

    fn validate_backends(&self, resources: &ResourceMap) -> BackendValidations {
        validate_backend_refs(&self.key.namespace, self.backend_refs(), |backend| resources.tcp_route_can_reference_backend(self, backend), resources)
    }

    fn can_gc_on_unbind(&self, resources: &ResourceMap) -> bool {
        resources.can_gc_tcp_route_on_unbind(&self.key)
    }

    fn metadata_update(&self) -> KubernetesUpdate {
        KubernetesUpdate::TcpRoute(metadata(&self.key, &self.finalizers))
    }

    fn status_update(key: ResourceKey, status: RouteStatusView) -> KubernetesStatusUpdate {
        KubernetesStatusUpdate::TcpRoute(key, status)
    }

    fn unbind(&self, resources: &mut ResourceMap, gateway: &ConfigEntryRef, on_update: UpdateCallback) {
        resources.mutate_tcp_route(&self.key, on_update, |mut entry: TcpRouteEntry| {
            without_gateway(&mut entry.parents, &entry.header.namespace, gateway);
            entry
        });
    }

    fn bind(&self, resources: &mut ResourceMap, gateway: &ConfigEntryRef, sections: &BTreeSet<String>, on_update: UpdateCallback) {
        resources.translate_and_mutate_tcp_route(self, on_update, |existing, mut translated| {
            let existing_parents = existing.map(|e| e.parents.as_slice()).unwrap_or_default();
            translated.parents = bound_parents(existing_parents, &translated.header.namespace, gateway, sections);
            if let Some(existing) = existing {
                translated.header.status = existing.header.status.clone();
            }
            translated
        });
    }
}

/// Callback for a mesh route write. It reports the write outcome and the mesh's own acceptance
/// of the route on the given parents.
fn sync_callback<R: BindableRoute>(
    setter: StatusSetter,
    key: ResourceKey,
    generation: Option<i64>,
    current_status: RouteStatusView,
    parents: Vec<ParentRef>,
    mesh_status: Option<EntryStatus>,
) -> UpdateCallback {
    Box::new(move |error: Option<&MeshError>, snapshot: &mut KubernetesSnapshot| {
        if let Some(error) = error {
            warn!("Unable to sync route {key} to the mesh {error}");
        }
        if parents.is_empty() {
            return;
        }
        let synced = match error {
            None => new_condition(CONDITION_SYNCED, true, "Synced", "route synced to the mesh", generation),
            Some(error) => new_condition(CONDITION_SYNCED, false, "SyncError", &error.to_string(), generation),
        };
        let mesh_accepted = mesh_status
            .as_ref()
            .and_then(|status| {
                status
                    .conditions
                    .iter()
                    .find(|c| c.type_ == CONDITION_ACCEPTED && c.resource.as_ref().is_none_or(|r| r.name.is_empty()))
            })
            .map(|c| new_condition(CONDITION_MESH_ACCEPTED, c.status == CONDITION_TRUE, &c.reason, &c.message, generation));

        let apply = |status: &mut RouteStatusView| {
            let mut changed = false;
            for parent in &parents {
                changed |= setter.set_route_condition(status, parent, synced.clone());
                if let Some(mesh_accepted) = &mesh_accepted {
                    changed |= setter.set_route_condition(status, parent, mesh_accepted.clone());
                }
            }
            changed
        };

        if let Some(pending) = snapshot.route_status_mut(&key) {
            apply(pending);
        } else {
            let mut status = current_status;
            if apply(&mut status) {
                snapshot.add_status_update(R::status_update(key, status));
            }
        }
    })
}

/// Route binding state for one gateway reconcile.
pub(super) struct RouteBinder<'a> {
    pub gateway: &'a GatewayView,
    pub gateway_deleted: bool,
    pub namespaces: &'a BTreeMap<String, BTreeMap<String, String>>,
    pub setter: &'a StatusSetter,
    pub controller_name: &'a str,
    pub resources: &'a mut ResourceMap,
    pub snapshot: &'a mut KubernetesSnapshot,
    pub bound_counts: &'a mut BTreeMap<String, i32>,
}

impl RouteBinder<'_> {
    pub fn bind_http_route(&mut self, route: &HttpRouteView) {
        self.bind_route(route, &GroupKind::http_route());
    }

    pub fn bind_tcp_route(&mut self, route: &TcpRouteView) {
        self.bind_route(route, &GroupKind::tcp_route());
    }

    fn logging_callback(key: &ResourceKey) -> UpdateCallback {
        let key = key.clone();
        Box::new(move |error: Option<&MeshError>, _: &mut KubernetesSnapshot| {
            if let Some(error) = error {
                warn!("Unable to unbind route {key} in the mesh {error}");
            }
        })
    }

    fn bind_route<R: BindableRoute>(&mut self, original: &R, group_kind: &GroupKind) {
        let key = original.key().clone();
        let gateway_reference = self.resources.gateway_reference(&self.gateway.key);

        let spec_parents: Vec<ParentRef> =
            original.parent_refs().iter().filter(|p| p.refers_to_gateway(&self.gateway.key, &key.namespace)).cloned().collect();
        let status_parents: Vec<ParentRef> = original
            .status()
            .parents
            .iter()
            .filter(|p| p.controller_name == self.controller_name && p.parent_ref.refers_to_gateway(&self.gateway.key, &key.namespace))
            .map(|p| p.parent_ref.clone())
            .collect();

        let mut route = original.clone();

        if route.deletion_requested() {
            debug!("Route {key} is being deleted");
            if remove_finalizer(route.finalizers_mut(), GATEWAY_FINALIZER) {
                self.snapshot.add_update(route.metadata_update());
            }
            route.unbind(self.resources, &gateway_reference, Self::logging_callback(&key));
            return;
        }

        if self.gateway_deleted || spec_parents.is_empty() {
            debug!("Unbinding route {key} from gateway {}", self.gateway.key);
            if route.can_gc_on_unbind(self.resources) {
                if remove_finalizer(route.finalizers_mut(), GATEWAY_FINALIZER) {
                    self.snapshot.add_update(route.metadata_update());
                }
            } else {
                route.unbind(self.resources, &gateway_reference, Self::logging_callback(&key));
            }
            let stale: Vec<_> = status_parents.iter().chain(&spec_parents).cloned().collect();
            if self.setter.remove_route_references(route.status_mut(), &stale) {
                self.snapshot.add_status_update(R::status_update(key, route.status().clone()));
            }
            return;
        }

        if ensure_finalizer(route.finalizers_mut(), GATEWAY_FINALIZER) {
            self.snapshot.add_update(route.metadata_update());
            return;
        }

        let generation = route.generation();
        let mut changed = false;

        let resolved_refs = route.validate_backends(self.resources).condition(generation);
        for parent in &spec_parents {
            changed |= self.setter.set_route_condition(route.status_mut(), parent, resolved_refs.clone());
        }

        let route_errors = route.route_errors(self.resources);
        let mut results = ParentBindResults::default();
        for parent in &spec_parents {
            let bind_results = if route_errors.is_empty() {
                self.bind_parent(&route, parent, group_kind)
            } else {
                BindResults(route_errors.iter().map(|e| BindResult::failed("", e.clone())).collect())
            };
            changed |= self.setter.set_route_condition(route.status_mut(), parent, bind_results.condition(generation));
            results.0.push(ParentBindResult { parent: parent.clone(), results: bind_results });
        }

        let stale: Vec<_> = status_parents.into_iter().filter(|p| !spec_parents.contains(p)).collect();
        changed |= self.setter.remove_route_references(route.status_mut(), &stale);

        if changed {
            self.snapshot.add_status_update(R::status_update(key.clone(), route.status().clone()));
        }

        let sections = results.bound_sections();
        let mesh_reference = self.resources.translator().reference(route.entry_kind(), &key);
        let mesh_status = self.resources.mirrored(&mesh_reference).map(|entry| entry.status().clone());
        if sections.is_empty() {
            debug!("Route {key} did not bind to gateway {}", self.gateway.key);
            route.unbind(self.resources, &gateway_reference, Self::logging_callback(&key));
        } else {
            debug!("Route {key} bound to gateway {} sections {sections:?}", self.gateway.key);
            let bound: Vec<_> = results.0.iter().filter(|r| r.results.did_bind()).map(|r| r.parent.clone()).collect();
            let on_update = sync_callback::<R>(self.setter.clone(), key, generation, route.status().clone(), bound, mesh_status);
            route.bind(self.resources, &gateway_reference, &sections, on_update);
        }
    }

    fn bind_parent<R: BindableRoute>(&mut self, route: &R, parent: &ParentRef, group_kind: &GroupKind) -> BindResults {
        let listeners = listeners_for(self.gateway, parent.section_name.as_deref());
        if listeners.is_empty() {
            return BindResults(vec![BindResult::failed(parent.section(), RouteError::NoMatchingParent)]);
        }

        let route_namespace = &route.key().namespace;
        let labels = self.namespaces.get(route_namespace);
        let results = listeners
            .into_iter()
            .map(|listener| {
                let error = if !route_kind_allowed_for_listener(listener, group_kind) {
                    Some(RouteError::NotAllowedByListenersProtocol)
                } else if !route_allowed_for_listener_namespaces(&self.gateway.key.namespace, listener, route_namespace, labels) {
                    Some(RouteError::NotAllowedByListenersNamespace)
                } else if !route_allowed_for_listener_hostname(listener.hostname.as_deref(), route.hostnames()) {
                    Some(RouteError::NoMatchingListenerHostname)
                } else if !self.resources.validator().route_can_reference_gateway(route.key(), parent) {
                    Some(RouteError::RefNotPermitted)
                } else {
                    None
                };
                match error {
                    Some(error) => BindResult::failed(&listener.name, error),
                    None => {
                        *self.bound_counts.entry(listener.name.clone()).or_default() += 1;
                        BindResult::bound(&listener.name)
                    },
                }
            })
            .collect();
        BindResults(results)
    }
}
