//! Maps mesh entries back to the Kubernetes gateways that own or use them.

use itertools::Itertools;

use crate::{
    common::ResourceKey,
    mesh::entries::{ApiGatewayListener, ConfigEntry, ConfigEntryRef, META_KEY_KUBE_NAME, META_KEY_KUBE_NAMESPACE},
};

/// Gateway recorded in the entry's Kubernetes meta keys.
pub fn gateway_key(entry: &ConfigEntry) -> Option<ResourceKey> {
    let meta = entry.meta();
    let name = meta.get(META_KEY_KUBE_NAME).filter(|n| !n.is_empty())?;
    let namespace = meta.get(META_KEY_KUBE_NAMESPACE).map_or("", String::as_str);
    Some(ResourceKey::gateway(namespace, name))
}

pub fn api_gateway(entry: &ConfigEntry) -> Vec<ResourceKey> {
    match entry {
        ConfigEntry::ApiGateway(_) => gateway_key(entry).into_iter().collect(),
        _ => vec![],
    }
}

/// Gateways a route entry is attached to, resolved through the mirrored API gateways.
pub fn route_parents<F>(entry: &ConfigEntry, lookup: F) -> Vec<ResourceKey>
where
    F: Fn(&ConfigEntryRef) -> Option<ConfigEntry>,
{
    let namespace = &entry.header().namespace;
    entry
        .parents()
        .iter()
        .filter(|parent| parent.is_api_gateway())
        .map(|parent| parent.sectionless(namespace))
        .unique()
        .filter_map(|reference| lookup(&reference))
        .filter_map(|gateway| gateway_key(&gateway))
        .sorted()
        .dedup()
        .collect()
}

/// Gateways with a listener terminating TLS with this certificate.
pub fn certificate_gateways(entry: &ConfigEntry, gateways: &[ConfigEntry]) -> Vec<ResourceKey> {
    let certificate = entry.reference().normalized();
    gateways_with_listener(gateways, |listener| {
        listener.tls.certificates.iter().any(|reference| reference.sectionless(&certificate.namespace) == certificate)
    })
}

/// Gateways with a listener policy naming this provider.
pub fn jwt_provider_gateways(entry: &ConfigEntry, gateways: &[ConfigEntry]) -> Vec<ResourceKey> {
    let provider = entry.name();
    gateways_with_listener(gateways, |listener| {
        [&listener.default, &listener.r#override]
            .into_iter()
            .flatten()
            .filter_map(|policy| policy.jwt.as_ref())
            .flat_map(|jwt| &jwt.providers)
            .any(|p| p.name == provider)
    })
}

fn gateways_with_listener<F>(gateways: &[ConfigEntry], matches: F) -> Vec<ResourceKey>
where
    F: Fn(&ApiGatewayListener) -> bool,
{
    gateways
        .iter()
        .filter(|gateway| match gateway {
            ConfigEntry::ApiGateway(g) => g.listeners.iter().any(&matches),
            _ => false,
        })
        .filter_map(gateway_key)
        .sorted()
        .dedup()
        .collect()
}
