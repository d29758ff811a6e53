use std::sync::Arc;

use futures::{future, FutureExt};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub mod binding;
pub mod cache;
pub mod common;
pub mod configuration;
mod controllers;
pub mod mesh;

use cache::{translators, ResourceCache, Subscription};
use configuration::Configuration;
use controllers::{gateway::GatewayController, gateway_class::GatewayClassController};
use mesh::{
    entries::{ConfigEntry, EntryKind},
    HttpMeshClient,
};

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

/// Subscribes the gateway controller to every mirrored entry kind.
fn subscribe(cache: &ResourceCache) -> Vec<Subscription> {
    let route_lookup = |cache: ResourceCache| move |entry: &ConfigEntry| translators::route_parents(entry, |reference| cache.get(reference));
    let certificate_lookup = |cache: ResourceCache| move |entry: &ConfigEntry| translators::certificate_gateways(entry, &cache.list(EntryKind::ApiGateway));
    let jwt_lookup = cache.clone();

    vec![
        cache.subscribe(EntryKind::ApiGateway, translators::api_gateway),
        cache.subscribe(EntryKind::HttpRoute, route_lookup(cache.clone())),
        cache.subscribe(EntryKind::TcpRoute, route_lookup(cache.clone())),
        cache.subscribe(EntryKind::InlineCertificate, certificate_lookup(cache.clone())),
        cache.subscribe(EntryKind::FileSystemCertificate, certificate_lookup(cache.clone())),
        cache.subscribe(EntryKind::JwtProvider, move |entry| translators::jwt_provider_gateways(entry, &jwt_lookup.list(EntryKind::ApiGateway))),
    ]
}

pub async fn start(configuration: Configuration) -> Result<()> {
    let client = Client::try_default().await?;
    let configuration = Arc::new(configuration);
    let mesh_client = HttpMeshClient::new(&configuration.mesh, configuration.cache.watch_timeout());
    let cache = ResourceCache::new(Arc::new(mesh_client), &configuration.mesh.datacenter, configuration.cache.clone());

    let token = CancellationToken::new();
    let cache_task = tokio::spawn({
        let cache = cache.clone();
        let token = token.clone();
        async move { cache.run(token).await }
    });

    info!(address = %configuration.mesh.address, "Waiting for the mesh mirror");
    cache.wait_synced(&token).await?;
    let subscriptions = subscribe(&cache);

    let gateway_class_controller = GatewayClassController::new(configuration.controller_name.clone(), &client);
    let gateway_controller = GatewayController::new(Arc::clone(&configuration), &client, cache);
    let controllers = future::join_all(vec![gateway_class_controller.get_controller(), gateway_controller.get_controller(subscriptions)]).boxed();

    tokio::select! {
        _ = controllers => info!("Controllers stopped"),
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    token.cancel();
    cache_task.await?;
    Ok(())
}
