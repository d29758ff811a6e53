pub mod translators;

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, span, warn, Instrument, Level};

use crate::{
    common::ResourceKey,
    configuration::CacheConfiguration,
    mesh::{
        entries::{CatalogDeregistration, CatalogRegistration, CatalogService, ConfigEntry, ConfigEntryRef, EntryKind, META_KEY_DATACENTER, META_KEY_KUBE_NAME},
        MeshClient, MeshError,
    },
};

const SUBSCRIPTION_BUFFER: usize = 1024;
const MIN_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cancelled before the mesh mirror synced")]
    Cancelled,
}

type Translator = Box<dyn Fn(&ConfigEntry) -> Vec<ResourceKey> + Send + Sync>;
type Mirror = BTreeMap<EntryKind, BTreeMap<ConfigEntryRef, ConfigEntry>>;

struct Subscriber {
    kind: EntryKind,
    translate: Translator,
    sender: mpsc::Sender<ResourceKey>,
    token: CancellationToken,
}

/// Stream of gateway keys affected by changes to one entry kind. Dropping it unsubscribes.
pub struct Subscription {
    receiver: mpsc::Receiver<ResourceKey>,
    token: CancellationToken,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ResourceKey> {
        self.receiver.recv().await
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct Inner {
    client: Arc<dyn MeshClient>,
    datacenter: String,
    configuration: CacheConfiguration,
    mirror: Mutex<Mirror>,
    subscribers: Mutex<Vec<Subscriber>>,
    synced: watch::Sender<usize>,
}

/// Local mirror of the config entries this controller owns, refreshed by long polling the mesh store.
#[derive(Clone)]
pub struct ResourceCache {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ResourceCache {
    pub fn new(client: Arc<dyn MeshClient>, datacenter: &str, configuration: CacheConfiguration) -> Self {
        let (synced, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                client,
                datacenter: datacenter.to_owned(),
                configuration,
                mirror: Mutex::new(BTreeMap::new()),
                subscribers: Mutex::new(vec![]),
                synced,
            }),
        }
    }

    pub fn get(&self, reference: &ConfigEntryRef) -> Option<ConfigEntry> {
        lock(&self.inner.mirror).get(&reference.kind).and_then(|entries| entries.get(&reference.normalized())).cloned()
    }

    pub fn list(&self, kind: EntryKind) -> Vec<ConfigEntry> {
        lock(&self.inner.mirror).get(&kind).map(|entries| entries.values().cloned().collect()).unwrap_or_default()
    }

    pub async fn write(&self, entry: &ConfigEntry) -> Result<(), MeshError> {
        let reference = entry.reference();
        if self.get(&reference).is_some_and(|cached| cached.equivalent(entry)) {
            debug!(entry = %reference, "Entry unchanged, skipping write");
            return Ok(());
        }
        self.inner.client.write(entry).await?;
        lock(&self.inner.mirror).entry(reference.kind).or_default().insert(reference.normalized(), entry.clone());
        self.notify(entry);
        Ok(())
    }

    pub async fn delete(&self, reference: &ConfigEntryRef) -> Result<(), MeshError> {
        let Some(cached) = self.get(reference) else {
            debug!(entry = %reference, "Entry not mirrored, nothing to delete");
            return Ok(());
        };
        self.inner.client.delete(reference).await?;
        if let Some(entries) = lock(&self.inner.mirror).get_mut(&reference.kind) {
            entries.remove(&reference.normalized());
        }
        self.notify(&cached);
        Ok(())
    }

    pub async fn register(&self, registration: &CatalogRegistration) -> Result<(), MeshError> {
        self.inner.client.register(registration).await
    }

    pub async fn deregister(&self, deregistration: &CatalogDeregistration) -> Result<(), MeshError> {
        self.inner.client.deregister(deregistration).await
    }

    /// Catalog instances registered for the gateway.
    pub async fn services_for(&self, gateway: &ConfigEntryRef) -> Result<Vec<CatalogService>, MeshError> {
        self.inner.client.services(&gateway.name, &gateway.namespace).await
    }

    pub fn subscribe<F>(&self, kind: EntryKind, translate: F) -> Subscription
    where
        F: Fn(&ConfigEntry) -> Vec<ResourceKey> + Send + Sync + 'static,
    {
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let token = CancellationToken::new();
        lock(&self.inner.subscribers).push(Subscriber {
            kind,
            translate: Box::new(translate),
            sender,
            token: token.clone(),
        });
        Subscription { receiver, token }
    }

    /// Polls every entry kind until cancelled, then closes all subscriptions.
    pub async fn run(&self, token: CancellationToken) {
        let watchers = EntryKind::ALL.into_iter().map(|kind| {
            let span = span!(Level::INFO, "ResourceCache", kind = %kind);
            self.watch_kind(kind, token.clone()).instrument(span)
        });
        futures::future::join_all(watchers).await;
        lock(&self.inner.subscribers).clear();
        info!("Mesh cache stopped");
    }

    /// Resolves once every kind has been listed at least once.
    pub async fn wait_synced(&self, token: &CancellationToken) -> Result<(), CacheError> {
        let mut synced = self.inner.synced.subscribe();
        let all = EntryKind::ALL.len();
        tokio::select! {
            () = token.cancelled() => Err(CacheError::Cancelled),
            result = synced.wait_for(|count| *count >= all) => result.map(|_| ()).map_err(|_| CacheError::Cancelled),
        }
    }

    pub fn is_synced(&self) -> bool {
        *self.inner.synced.borrow() >= EntryKind::ALL.len()
    }

    async fn watch_kind(&self, kind: EntryKind, token: CancellationToken) {
        let poll_interval = self.inner.configuration.poll_interval().max(MIN_BACKOFF);
        let mut backoff = poll_interval;
        let mut index = 0;
        let mut synced = false;

        loop {
            let result = tokio::select! {
                () = token.cancelled() => break,
                result = self.inner.client.watch(kind, index) => result,
            };

            match result {
                Ok(result) => {
                    backoff = poll_interval;
                    // the store index can go backwards after a restore
                    index = if result.index < index { 0 } else { result.index };
                    let changed = self.replace(kind, result.entries);
                    if !synced {
                        synced = true;
                        info!("Initial sync complete");
                        self.inner.synced.send_modify(|count| *count += 1);
                    }
                    for entry in &changed {
                        self.notify(entry);
                    }
                },
                Err(e) => {
                    if e.is_transient() {
                        debug!("Watch failed {e}");
                    } else {
                        warn!("Watch failed {e}");
                    }
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = tokio::time::sleep(backoff) => {},
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                },
            }
        }
    }

    fn owned(&self, entry: &ConfigEntry) -> bool {
        if entry.kind() == EntryKind::JwtProvider {
            return true;
        }
        let meta = entry.meta();
        meta.get(META_KEY_KUBE_NAME).is_some_and(|name| !name.is_empty()) && meta.get(META_KEY_DATACENTER) == Some(&self.inner.datacenter)
    }

    /// Swaps in the listed entries and returns the ones added, modified or removed.
    fn replace(&self, kind: EntryKind, entries: Vec<ConfigEntry>) -> Vec<ConfigEntry> {
        let fresh: BTreeMap<ConfigEntryRef, ConfigEntry> =
            entries.into_iter().filter(|entry| self.owned(entry)).map(|entry| (entry.reference().normalized(), entry)).collect();

        let mut mirror = lock(&self.inner.mirror);
        let previous = mirror.insert(kind, fresh.clone()).unwrap_or_default();
        drop(mirror);

        let mut changed: Vec<ConfigEntry> = fresh
            .iter()
            .filter(|(reference, entry)| previous.get(*reference).map_or(true, |old| old.header().modify_index != entry.header().modify_index))
            .map(|(_, entry)| entry.clone())
            .collect();
        changed.extend(previous.into_iter().filter(|(reference, _)| !fresh.contains_key(reference)).map(|(_, entry)| entry));
        changed
    }

    fn notify(&self, entry: &ConfigEntry) {
        let kind = entry.kind();
        let mut subscribers = lock(&self.inner.subscribers);
        subscribers.retain(|subscriber| !subscriber.token.is_cancelled() && !subscriber.sender.is_closed());
        for subscriber in subscribers.iter().filter(|s| s.kind == kind) {
            for key in (subscriber.translate)(entry) {
                // Never blocks a mirror update. The newest key is dropped; the queued keys and the
                // controller's periodic requeue still bring every gateway back to the store's state.
                if let Err(mpsc::error::TrySendError::Full(key)) = subscriber.sender.try_send(key) {
                    warn!(gateway = %key, entry = %entry.reference(), "Subscriber is full, dropping notification");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::mesh::{
        entries::{ApiGatewayEntry, EntryHeader, InlineCertificateEntry, META_KEY_KUBE_NAMESPACE},
        memory::InMemoryMeshClient,
    };

    fn owned_gateway(name: &str, datacenter: &str) -> ConfigEntry {
        let meta = BTreeMap::from([
            (META_KEY_KUBE_NAME.to_owned(), name.to_owned()),
            (META_KEY_KUBE_NAMESPACE.to_owned(), "apps".to_owned()),
            (META_KEY_DATACENTER.to_owned(), datacenter.to_owned()),
        ]);
        ConfigEntry::ApiGateway(ApiGatewayEntry { header: EntryHeader::new(name, "", "", meta), listeners: vec![] })
    }

    fn cache(client: &InMemoryMeshClient) -> ResourceCache {
        ResourceCache::new(Arc::new(client.clone()), "dc1", CacheConfiguration::builder().poll_interval_secs(0).build())
    }

    #[tokio::test]
    async fn test_mirror_follows_the_store() {
        let client = InMemoryMeshClient::default();
        client.insert(owned_gateway("edge", "dc1")).await;
        client.insert(owned_gateway("remote", "dc2")).await;
        client
            .insert(ConfigEntry::InlineCertificate(InlineCertificateEntry { header: EntryHeader::new("manual", "", "", BTreeMap::new()), ..Default::default() }))
            .await;

        let cache = cache(&client);
        let mut subscription = cache.subscribe(EntryKind::ApiGateway, translators::api_gateway);
        let token = CancellationToken::new();
        let runner = tokio::spawn({
            let cache = cache.clone();
            let token = token.clone();
            async move { cache.run(token).await }
        });

        cache.wait_synced(&token).await.unwrap();
        assert_eq!(cache.list(EntryKind::ApiGateway).len(), 1);
        assert!(cache.list(EntryKind::InlineCertificate).is_empty());
        assert_eq!(subscription.recv().await, Some(ResourceKey::gateway("apps", "edge")));

        client.insert(owned_gateway("second", "dc1")).await;
        assert_eq!(subscription.recv().await, Some(ResourceKey::gateway("apps", "second")));

        token.cancel();
        runner.await.unwrap();
        assert_eq!(subscription.recv().await, None);
    }

    #[tokio::test]
    async fn test_equivalent_writes_are_skipped() {
        let client = InMemoryMeshClient::default();
        let cache = cache(&client);
        let mut subscription = cache.subscribe(EntryKind::ApiGateway, translators::api_gateway);

        let gateway = owned_gateway("edge", "dc1");
        cache.write(&gateway).await.unwrap();
        assert_eq!(client.writes().await, 1);
        assert_eq!(subscription.recv().await, Some(ResourceKey::gateway("apps", "edge")));

        let mut same = gateway.clone();
        same.header_mut().namespace = "default".to_owned();
        cache.write(&same).await.unwrap();
        assert_eq!(client.writes().await, 1);

        cache.delete(&gateway.reference()).await.unwrap();
        assert!(cache.get(&gateway.reference()).is_none());
        assert_eq!(subscription.recv().await, Some(ResourceKey::gateway("apps", "edge")));
        cache.delete(&gateway.reference()).await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_store_keeps_stale_data() {
        let client = InMemoryMeshClient::default();
        client.insert(owned_gateway("edge", "dc1")).await;
        let cache = cache(&client);
        let token = CancellationToken::new();
        let runner = tokio::spawn({
            let cache = cache.clone();
            let token = token.clone();
            async move { cache.run(token).await }
        });
        cache.wait_synced(&token).await.unwrap();

        client.set_unreachable(true).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.list(EntryKind::ApiGateway).len(), 1);

        token.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_subscriber_does_not_block_writes() {
        let client = InMemoryMeshClient::default();
        let cache = cache(&client);
        let mut subscription = cache.subscribe(EntryKind::ApiGateway, translators::api_gateway);

        let writes = async {
            for i in 0..=SUBSCRIPTION_BUFFER {
                cache.write(&owned_gateway(&format!("edge-{i}"), "dc1")).await.unwrap();
            }
        };
        tokio::time::timeout(Duration::from_secs(10), writes).await.unwrap();
        assert_eq!(cache.list(EntryKind::ApiGateway).len(), SUBSCRIPTION_BUFFER + 1);

        assert_eq!(subscription.recv().await, Some(ResourceKey::gateway("apps", "edge-0")));
        let mut queued = 1;
        while subscription.receiver.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, SUBSCRIPTION_BUFFER);
    }

    #[tokio::test]
    async fn test_cancelled_subscription_stops_receiving() {
        let client = InMemoryMeshClient::default();
        let cache = cache(&client);
        let subscription = cache.subscribe(EntryKind::ApiGateway, translators::api_gateway);
        subscription.cancel();
        cache.write(&owned_gateway("edge", "dc1")).await.unwrap();
        assert!(lock(&cache.inner.subscribers).is_empty());
    }
}
