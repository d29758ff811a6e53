use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header::CONTENT_TYPE, Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{self, connect::HttpConnector},
    rt::TokioExecutor,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;
use url::form_urlencoded;

use super::{
    client::{MeshClient, MeshError, WatchResult},
    entries::{CatalogDeregistration, CatalogRegistration, CatalogService, ConfigEntry, ConfigEntryRef, EntryKind},
};
use crate::configuration::MeshConfiguration;

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";
const NAMESPACE_WILDCARD: &str = "*";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type HttpClient = legacy::Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Mesh store client speaking the catalog and config-entry HTTP API.
#[derive(Clone)]
pub struct HttpMeshClient {
    client: HttpClient,
    base_url: String,
    token: Option<String>,
    datacenter: String,
    watch_timeout: Duration,
}

struct Response {
    status: StatusCode,
    index: Option<u64>,
    body: Bytes,
}

impl HttpMeshClient {
    /// Builds a client for `http://` and `https://` store addresses, trusting the Mozilla root set.
    pub fn new(configuration: &MeshConfiguration, watch_timeout: Duration) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.set_connect_timeout(Some(Duration::from_secs(5)));
        http_connector.enforce_http(false);
        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);
        Self {
            client: legacy::Client::builder(TokioExecutor::new()).build(connector),
            base_url: configuration.address.trim_end_matches('/').to_owned(),
            token: configuration.token.clone(),
            datacenter: configuration.datacenter.clone(),
            watch_timeout,
        }
    }

    fn uri(&self, path: &str, query: &[(&str, String)]) -> Result<Uri, MeshError> {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        serializer.append_pair("dc", &self.datacenter);
        for (key, value) in query.iter().filter(|(_, v)| !v.is_empty()) {
            serializer.append_pair(key, value);
        }
        format!("{}{path}?{}", self.base_url, serializer.finish())
            .parse::<Uri>()
            .map_err(|e| MeshError::InvalidRequest(e.to_string()))
    }

    async fn send<B: Serialize>(&self, method: Method, uri: Uri, body: Option<&B>, timeout: Duration) -> Result<Response, MeshError> {
        let body = match body {
            Some(body) => Bytes::from(serde_json::to_vec(body)?),
            None => Bytes::new(),
        };
        let mut builder = Request::builder().method(method.clone()).uri(uri.clone()).header(CONTENT_TYPE, "application/json");
        if let Some(token) = &self.token {
            builder = builder.header(TOKEN_HEADER, token);
        }
        let request = builder.body(Full::new(body)).map_err(|e| MeshError::InvalidRequest(e.to_string()))?;

        debug!("{method} {uri}");
        let response = tokio::time::timeout(timeout, self.client.request(request))
            .await
            .map_err(|_| MeshError::Timeout)?
            .map_err(|e| MeshError::Unreachable(e.to_string()))?;
        let status = response.status();
        let index = response.headers().get(INDEX_HEADER).and_then(|v| v.to_str().ok()).and_then(|v| v.parse().ok());
        let body = response.into_body().collect().await.map_err(|e| MeshError::Unreachable(e.to_string()))?.to_bytes();
        Ok(Response { status, index, body })
    }

    fn check(response: &Response) -> Result<(), MeshError> {
        if response.status.is_success() {
            Ok(())
        } else {
            Err(MeshError::Rejected {
                status: response.status.as_u16(),
                message: String::from_utf8_lossy(&response.body).into_owned(),
            })
        }
    }

    fn decode<T: DeserializeOwned>(response: &Response) -> Result<T, MeshError> {
        Self::check(response)?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    fn scope(reference: &ConfigEntryRef) -> [(&'static str, String); 2] {
        [("ns", reference.namespace.clone()), ("partition", reference.partition.clone())]
    }
}

#[async_trait]
impl MeshClient for HttpMeshClient {
    async fn get(&self, reference: &ConfigEntryRef) -> Result<Option<ConfigEntry>, MeshError> {
        let uri = self.uri(&format!("/v1/config/{}/{}", reference.kind, reference.name), &Self::scope(reference))?;
        let response = self.send::<()>(Method::GET, uri, None, REQUEST_TIMEOUT).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::decode(&response).map(Some)
    }

    async fn list(&self, kind: EntryKind) -> Result<Vec<ConfigEntry>, MeshError> {
        let uri = self.uri(&format!("/v1/config/{kind}"), &[("ns", NAMESPACE_WILDCARD.to_owned())])?;
        let response = self.send::<()>(Method::GET, uri, None, REQUEST_TIMEOUT).await?;
        Self::decode(&response)
    }

    async fn watch(&self, kind: EntryKind, index: u64) -> Result<WatchResult, MeshError> {
        let uri = self.uri(
            &format!("/v1/config/{kind}"),
            &[
                ("ns", NAMESPACE_WILDCARD.to_owned()),
                ("index", index.to_string()),
                ("wait", format!("{}s", self.watch_timeout.as_secs())),
            ],
        )?;
        // the store may hold the request up to the wait time plus a small jitter
        let response = self.send::<()>(Method::GET, uri, None, self.watch_timeout + REQUEST_TIMEOUT).await?;
        let entries = Self::decode(&response)?;
        Ok(WatchResult { entries, index: response.index.unwrap_or(index) })
    }

    async fn write(&self, entry: &ConfigEntry) -> Result<(), MeshError> {
        let uri = self.uri("/v1/config", &Self::scope(&entry.reference()))?;
        let response = self.send(Method::PUT, uri, Some(entry), REQUEST_TIMEOUT).await?;
        Self::check(&response)
    }

    async fn delete(&self, reference: &ConfigEntryRef) -> Result<(), MeshError> {
        let uri = self.uri(&format!("/v1/config/{}/{}", reference.kind, reference.name), &Self::scope(reference))?;
        let response = self.send::<()>(Method::DELETE, uri, None, REQUEST_TIMEOUT).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(&response)
    }

    async fn services(&self, service_name: &str, namespace: &str) -> Result<Vec<CatalogService>, MeshError> {
        let uri = self.uri(&format!("/v1/catalog/service/{service_name}"), &[("ns", namespace.to_owned())])?;
        let response = self.send::<()>(Method::GET, uri, None, REQUEST_TIMEOUT).await?;
        Self::decode(&response)
    }

    async fn register(&self, registration: &CatalogRegistration) -> Result<(), MeshError> {
        let uri = self.uri("/v1/catalog/register", &[])?;
        let response = self.send(Method::PUT, uri, Some(registration), REQUEST_TIMEOUT).await?;
        Self::check(&response)
    }

    async fn deregister(&self, deregistration: &CatalogDeregistration) -> Result<(), MeshError> {
        let uri = self.uri("/v1/catalog/deregister", &[])?;
        let response = self.send(Method::PUT, uri, Some(deregistration), REQUEST_TIMEOUT).await?;
        Self::check(&response)
    }
}
