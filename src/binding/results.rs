//! Outcomes of validating and binding, and the status conditions they turn into.

use std::collections::BTreeSet;

use itertools::Itertools;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use thiserror::Error;

use crate::common::{conditions::new_condition, BackendRef, ParentRef};

pub const CONDITION_ACCEPTED: &str = "Accepted";
pub const CONDITION_PROGRAMMED: &str = "Programmed";
pub const CONDITION_CONFLICTED: &str = "Conflicted";
pub const CONDITION_RESOLVED_REFS: &str = "ResolvedRefs";
pub const CONDITION_SYNCED: &str = "Synced";
pub const CONDITION_MESH_ACCEPTED: &str = "MeshAccepted";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("listener does not allow binding routes from the given namespace")]
    NotAllowedByListenersNamespace,
    #[error("listener does not support route protocol")]
    NotAllowedByListenersProtocol,
    #[error("listener cannot bind route with a non-aligned hostname")]
    NoMatchingListenerHostname,
    #[error("no matching parent")]
    NoMatchingParent,
    #[error("reference not permitted due to lack of ReferenceGrant")]
    RefNotPermitted,
    #[error("ref not found")]
    ExternalRefNotFound,
    #[error("filter invalid: {0}")]
    FilterInvalid(String),
    #[error("invalid externalref filter kind")]
    InvalidExternalRefKind,
}

impl RouteError {
    fn reason(&self) -> &'static str {
        match self {
            RouteError::NoMatchingListenerHostname => "NoMatchingListenerHostname",
            RouteError::RefNotPermitted => "RefNotPermitted",
            RouteError::NoMatchingParent => "NoMatchingParent",
            RouteError::ExternalRefNotFound => "FilterNotFound",
            RouteError::FilterInvalid(_) => "JWTProviderNotFound",
            RouteError::InvalidExternalRefKind => "UnsupportedValue",
            RouteError::NotAllowedByListenersNamespace | RouteError::NotAllowedByListenersProtocol => "NotAllowedByListeners",
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendError {
    #[error("invalid backend kind")]
    InvalidKind,
    #[error("backend not found")]
    NotFound,
    #[error("reference not permitted due to lack of ReferenceGrant")]
    RefNotPermitted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendValidation {
    pub namespace: String,
    pub backend: BackendRef,
    pub error: Option<BackendError>,
}

/// Validation of every backend a route references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendValidations(pub Vec<BackendValidation>);

impl BackendValidations {
    /// ResolvedRefs condition shared by every parent of the route. Only the first failing backend
    /// is reported.
    pub fn condition(&self, generation: Option<i64>) -> Condition {
        let Some((validation, error)) = self.0.iter().find_map(|v| v.error.map(|e| (v, e))) else {
            return new_condition(CONDITION_RESOLVED_REFS, true, "ResolvedRefs", "resolved backend references", generation);
        };
        let reference = format!("{}/{}", validation.namespace, validation.backend.name);
        match error {
            BackendError::InvalidKind => new_condition(
                CONDITION_RESOLVED_REFS,
                false,
                "InvalidKind",
                &format!("{reference} [{}]: {error}", validation.backend.group_kind()),
                generation,
            ),
            BackendError::NotFound => new_condition(CONDITION_RESOLVED_REFS, false, "BackendNotFound", &format!("{reference}: {error}"), generation),
            BackendError::RefNotPermitted => new_condition(CONDITION_RESOLVED_REFS, false, "RefNotPermitted", &format!("{reference}: {error}"), generation),
        }
    }
}

/// Attempt to bind a route to one listener. No error means the route is bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindResult {
    pub section: String,
    pub error: Option<RouteError>,
}

impl BindResult {
    pub fn bound(section: &str) -> Self {
        Self { section: section.to_owned(), error: None }
    }

    pub fn failed(section: &str, error: RouteError) -> Self {
        Self { section: section.to_owned(), error: Some(error) }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindResults(pub Vec<BindResult>);

impl BindResults {
    pub fn did_bind(&self) -> bool {
        self.0.iter().any(|r| r.error.is_none())
    }

    fn message(&self) -> String {
        self.0
            .iter()
            .filter_map(|r| {
                r.error.as_ref().map(|e| if r.section.is_empty() { e.to_string() } else { format!("{}: {e}", r.section) })
            })
            .sorted()
            .join("; ")
    }

    /// Accepted condition for the parent these results were computed for.
    pub fn condition(&self, generation: Option<i64>) -> Condition {
        if self.did_bind() {
            return new_condition(CONDITION_ACCEPTED, true, "Accepted", "route accepted", generation);
        }
        let reason = match self.0.as_slice() {
            [BindResult { error: Some(error), .. }] => error.reason(),
            _ => "NotAllowedByListeners",
        };
        new_condition(CONDITION_ACCEPTED, false, reason, &self.message(), generation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentBindResult {
    pub parent: ParentRef,
    pub results: BindResults,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentBindResults(pub Vec<ParentBindResult>);

impl ParentBindResults {
    pub fn bound_sections(&self) -> BTreeSet<String> {
        self.0
            .iter()
            .flat_map(|p| p.results.0.iter())
            .filter(|r| r.error.is_none())
            .map(|r| r.section.clone())
            .collect()
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerError {
    #[error("listener protocol is unsupported")]
    UnsupportedProtocol,
    #[error("listener port is unavailable")]
    PortUnavailable,
    #[error("listener conflicts with privileged port mapped by GatewayClassConfig privileged port mapping setting")]
    MappedToPrivilegedPort,
    #[error("TLS passthrough is not supported")]
    NoTlsPassthrough,
    #[error("listener hostname conflicts with another listener")]
    HostnameConflict,
    #[error("listener protocol conflicts with another listener")]
    ProtocolConflict,
    #[error("certificate not found")]
    CertificateNotFound,
    #[error("certificate type is not supported")]
    CertificateNotSupported,
    #[error("certificate is invalid or does not contain a supported server name")]
    CertificateInvalidData,
    #[error("policy referencing this listener references unknown JWT provider")]
    JwtProviderNotFound,
    #[error("reference not permitted due to lack of ReferenceGrant")]
    RefNotPermitted,
    #[error("allowed route kind is invalid")]
    InvalidRouteKinds,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerValidation {
    pub accepted_error: Option<ListenerError>,
    pub conflicted_error: Option<ListenerError>,
    pub ref_errors: Vec<ListenerError>,
    pub route_kind_error: Option<ListenerError>,
}

impl ListenerValidation {
    fn is_valid(&self) -> bool {
        self.accepted_error.is_none() && self.conflicted_error.is_none() && self.ref_errors.is_empty() && self.route_kind_error.is_none()
    }

    fn accepted_condition(&self, generation: Option<i64>) -> Condition {
        match self.accepted_error {
            None => new_condition(CONDITION_ACCEPTED, true, "Accepted", "listener accepted", generation),
            Some(error @ (ListenerError::PortUnavailable | ListenerError::MappedToPrivilegedPort)) => {
                new_condition(CONDITION_ACCEPTED, false, "PortUnavailable", &error.to_string(), generation)
            },
            Some(error @ ListenerError::UnsupportedProtocol) => new_condition(CONDITION_ACCEPTED, false, "UnsupportedProtocol", &error.to_string(), generation),
            Some(error) => new_condition(CONDITION_ACCEPTED, false, "Invalid", &error.to_string(), generation),
        }
    }

    fn programmed_condition(&self, generation: Option<i64>) -> Condition {
        if self.is_valid() {
            new_condition(CONDITION_PROGRAMMED, true, "Programmed", "listener programmed", generation)
        } else {
            new_condition(CONDITION_PROGRAMMED, false, "Invalid", "listener cannot be programmed because it is invalid", generation)
        }
    }

    fn conflicted_condition(&self, generation: Option<i64>) -> Condition {
        match self.conflicted_error {
            Some(error @ ListenerError::ProtocolConflict) => new_condition(CONDITION_CONFLICTED, true, "ProtocolConflict", &error.to_string(), generation),
            Some(error @ ListenerError::HostnameConflict) => new_condition(CONDITION_CONFLICTED, true, "HostnameConflict", &error.to_string(), generation),
            _ => new_condition(CONDITION_CONFLICTED, false, "NoConflicts", "listener has no conflicts", generation),
        }
    }

    fn resolved_refs_conditions(&self, generation: Option<i64>) -> Vec<Condition> {
        if let Some(error) = self.route_kind_error {
            return vec![new_condition(CONDITION_RESOLVED_REFS, false, "InvalidRouteKinds", &error.to_string(), generation)];
        }
        let conditions: Vec<_> = self
            .ref_errors
            .iter()
            .filter_map(|error| {
                let reason = match error {
                    ListenerError::CertificateNotFound | ListenerError::CertificateNotSupported | ListenerError::CertificateInvalidData => "InvalidCertificateRef",
                    ListenerError::JwtProviderNotFound => "InvalidJWTProviderRef",
                    ListenerError::RefNotPermitted => "RefNotPermitted",
                    _ => return None,
                };
                Some(new_condition(CONDITION_RESOLVED_REFS, false, reason, &error.to_string(), generation))
            })
            .collect();
        if conditions.is_empty() {
            vec![new_condition(CONDITION_RESOLVED_REFS, true, "ResolvedRefs", "resolved references", generation)]
        } else {
            conditions
        }
    }

    pub fn conditions(&self, generation: Option<i64>) -> Vec<Condition> {
        let mut conditions = vec![self.accepted_condition(generation), self.programmed_condition(generation), self.conflicted_condition(generation)];
        conditions.extend(self.resolved_refs_conditions(generation));
        conditions
    }
}

/// Results indexed like the gateway's listeners.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerValidations(pub Vec<ListenerValidation>);

impl ListenerValidations {
    /// True when any listener is not accepted.
    pub fn invalid(&self) -> bool {
        self.0.iter().any(|l| l.accepted_error.is_some())
    }

    pub fn conditions(&self, generation: Option<i64>, index: usize) -> Vec<Condition> {
        self.0.get(index).map(|l| l.conditions(generation)).unwrap_or_default()
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway does not support specifying addresses")]
    UnsupportedAddress,
    #[error("one or more listeners are invalid")]
    ListenersNotValid,
    #[error("gateway pods are still being scheduled")]
    PendingPods,
    #[error("gateway configuration is not yet synced to the mesh")]
    PendingMesh,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayValidation {
    pub accepted_error: Option<GatewayError>,
    pub programmed_error: Option<GatewayError>,
}

impl GatewayValidation {
    pub fn conditions(&self, generation: Option<i64>, listeners_invalid: bool) -> Vec<Condition> {
        let accepted = match self.accepted_error {
            None if listeners_invalid => {
                new_condition(CONDITION_ACCEPTED, false, "ListenersNotValid", &GatewayError::ListenersNotValid.to_string(), generation)
            },
            None => new_condition(CONDITION_ACCEPTED, true, "Accepted", "gateway accepted", generation),
            Some(error @ GatewayError::UnsupportedAddress) => new_condition(CONDITION_ACCEPTED, false, "UnsupportedAddress", &error.to_string(), generation),
            Some(error) => new_condition(CONDITION_ACCEPTED, false, "Invalid", &error.to_string(), generation),
        };
        let programmed = match self.programmed_error {
            None => new_condition(CONDITION_PROGRAMMED, true, "Programmed", "gateway programmed", generation),
            Some(error) => new_condition(CONDITION_PROGRAMMED, false, "Pending", &error.to_string(), generation),
        };
        vec![accepted, programmed]
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyError {
    #[error("gateway policy references a listener that does not exist")]
    ListenerReferenceDoesNotExist,
    #[error("gateway policy references one or more jwt providers that do not exist")]
    JwtProvidersReferenceDoesNotExist,
    #[error("policy is not accepted due to errors with references")]
    NotAcceptedDueToInvalidRefs,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayPolicyValidation {
    pub accepted_error: Option<PolicyError>,
    pub resolved_refs_errors: Vec<PolicyError>,
}

impl GatewayPolicyValidation {
    pub fn conditions(&self, generation: Option<i64>) -> Vec<Condition> {
        let mut conditions = vec![match self.accepted_error {
            Some(error) => new_condition(CONDITION_ACCEPTED, false, "ReferencesNotValid", &error.to_string(), generation),
            None => new_condition(CONDITION_ACCEPTED, true, "Accepted", "gateway policy accepted", generation),
        }];
        if self.resolved_refs_errors.is_empty() {
            conditions.push(new_condition(CONDITION_RESOLVED_REFS, true, "ResolvedRefs", "resolved references", generation));
        }
        for error in &self.resolved_refs_errors {
            let reason = match error {
                PolicyError::ListenerReferenceDoesNotExist => "MissingListenerReference",
                PolicyError::JwtProvidersReferenceDoesNotExist => "MissingJWTProviderReference",
                PolicyError::NotAcceptedDueToInvalidRefs => continue,
            };
            conditions.push(new_condition(CONDITION_RESOLVED_REFS, false, reason, &error.to_string(), generation));
        }
        conditions
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFilterError {
    #[error("route filter references one or more jwt providers that do not exist")]
    JwtProvidersReferenceDoesNotExist,
    #[error("route filter is not accepted due to errors with references")]
    NotAcceptedDueToInvalidRefs,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthFilterValidation {
    pub accepted_error: Option<AuthFilterError>,
    pub resolved_refs_error: Option<AuthFilterError>,
}

impl AuthFilterValidation {
    pub fn conditions(&self, generation: Option<i64>) -> Vec<Condition> {
        vec![
            match self.accepted_error {
                Some(error) => new_condition(CONDITION_ACCEPTED, false, "ReferencesNotValid", &error.to_string(), generation),
                None => new_condition(CONDITION_ACCEPTED, true, "Accepted", "route auth filter accepted", generation),
            },
            match self.resolved_refs_error {
                Some(error) => new_condition(CONDITION_RESOLVED_REFS, false, "MissingJWTProviderReference", &error.to_string(), generation),
                None => new_condition(CONDITION_RESOLVED_REFS, true, "ResolvedRefs", "resolved references", generation),
            },
        ]
    }
}
