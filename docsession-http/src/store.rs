//! HTTP client backend for a remote document store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::{debug, trace};

use docsession_core::{
    attachment::{Attachment, AttachmentMetadata},
    backend::{
        BatchCommand, BatchResult, IdentityRange, LoadResult, QueryResult, StoreBackend,
        StoreBackendBuilder,
    },
    document::Version,
    error::{DocumentStoreError, DocumentStoreResult},
    index::{IndexDefinition, IndexRegistration},
    patch::PatchOperation,
    query::Query,
};

use crate::wire::{
    BulkRequest, BulkResponse, CollectionParams, ErrorResponse, FetchRequest, IdParams,
    IndexesRequest, IndexesResponse, KeyParams, LAST_MODIFIED_HEADER, METADATA_HEADER,
    PatchRequest, PatchResponse, decode_metadata, encode_metadata,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A [`StoreBackend`] that talks to a document store over HTTP.
///
/// Every backend call is exactly one request. The underlying `reqwest::Client` keeps a
/// connection pool, so clones of an `HttpStore` share connections.
#[derive(Clone, Debug)]
pub struct HttpStore {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpStore {
    /// Creates a builder for a store at `url`.
    pub fn builder(url: impl Into<String>) -> HttpStoreBuilder {
        HttpStoreBuilder::new(url)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> DocumentStoreResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| DocumentStoreError::Configuration(format!("invalid endpoint {path}: {e}")))
    }

    fn request(&self, method: Method, path: &str) -> DocumentStoreResult<RequestBuilder> {
        let url = self.endpoint(path)?;
        trace!(%method, %url, "sending request");

        Ok(self.client.request(method, url))
    }

    async fn send(&self, request: RequestBuilder) -> DocumentStoreResult<Response> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        debug!(%status, "request failed");
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        Err(match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(error) => error.into_error(),
            Err(_) => DocumentStoreError::Backend(format!("{status}: {body}")),
        })
    }

    async fn call<Req, Res>(&self, method: Method, path: &str, body: &Req) -> DocumentStoreResult<Res>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let response = self.send(self.request(method, path)?.json(body)).await?;

        response.json::<Res>().await.map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, err: reqwest::Error) -> DocumentStoreError {
        if err.is_timeout() {
            DocumentStoreError::Timeout(format!("no answer within {:?}", self.timeout))
        } else if err.is_decode() {
            DocumentStoreError::Serialization(err.to_string())
        } else {
            DocumentStoreError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl StoreBackend for HttpStore {
    async fn get_documents(
        &self,
        ids: Vec<String>,
        includes: Vec<String>,
    ) -> DocumentStoreResult<LoadResult> {
        self.call(Method::POST, "docs/fetch", &FetchRequest { ids, includes })
            .await
    }

    async fn query_documents(&self, query: Query) -> DocumentStoreResult<QueryResult> {
        self.call(Method::POST, "queries", &query).await
    }

    async fn commit_batch(
        &self,
        commands: Vec<BatchCommand>,
    ) -> DocumentStoreResult<Vec<BatchResult>> {
        let response: BulkResponse = self
            .call(Method::POST, "bulk_docs", &BulkRequest { commands })
            .await?;

        Ok(response.results)
    }

    async fn put_attachment(
        &self,
        key: &str,
        data: Vec<u8>,
        metadata: AttachmentMetadata,
    ) -> DocumentStoreResult<()> {
        let request = self
            .request(Method::PUT, "attachments")?
            .query(&KeyParams { key: key.to_string() })
            .header(METADATA_HEADER, encode_metadata(&metadata)?)
            .body(data);

        self.send(request).await?;

        Ok(())
    }

    async fn get_attachment(&self, key: &str) -> DocumentStoreResult<Option<Attachment>> {
        let request = self
            .request(Method::GET, "attachments")?
            .query(&KeyParams { key: key.to_string() });
        let response = request.send().await.map_err(|e| self.transport_error(e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(DocumentStoreError::Backend(format!(
                "{}: attachment {key} could not be read",
                response.status()
            )));
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let metadata = decode_metadata(header(METADATA_HEADER).as_deref())?;
        let last_modified = header(LAST_MODIFIED_HEADER)
            .and_then(|value| DateTime::parse_from_rfc3339(&value).ok())
            .map(|value| value.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let data = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?
            .to_vec();

        Ok(Some(Attachment {
            key: key.to_string(),
            size: data.len(),
            data,
            metadata,
            last_modified,
        }))
    }

    async fn delete_attachment(&self, key: &str) -> DocumentStoreResult<()> {
        let request = self
            .request(Method::DELETE, "attachments")?
            .query(&KeyParams { key: key.to_string() });

        self.send(request).await?;

        Ok(())
    }

    async fn patch_document(
        &self,
        id: &str,
        operations: Vec<PatchOperation>,
    ) -> DocumentStoreResult<Version> {
        let request = self
            .request(Method::PATCH, "docs")?
            .query(&IdParams { id: id.to_string() })
            .json(&PatchRequest { operations });
        let response = self.send(request).await?;

        let body: PatchResponse = response.json().await.map_err(|e| self.transport_error(e))?;

        Ok(body.version)
    }

    async fn put_indexes(
        &self,
        definitions: Vec<IndexDefinition>,
    ) -> DocumentStoreResult<Vec<IndexRegistration>> {
        let response: IndexesResponse = self
            .call(Method::PUT, "indexes", &IndexesRequest { definitions })
            .await?;

        Ok(response.registrations)
    }

    async fn next_identity_range(&self, collection: &str) -> DocumentStoreResult<IdentityRange> {
        let request = self
            .request(Method::GET, "hilo/next")?
            .query(&CollectionParams { collection: collection.to_string() });
        let response = self.send(request).await?;

        response.json().await.map_err(|e| self.transport_error(e))
    }
}

/// Builder for constructing [`HttpStore`] instances.
///
/// # Example
///
/// ```ignore
/// use docsession_http::HttpStore;
/// use docsession::backend::StoreBackendBuilder;
/// use std::time::Duration;
///
/// let backend = HttpStore::builder("http://localhost:8080/")
///     .with_timeout(Duration::from_secs(5))
///     .build()
///     .await?;
/// ```
#[derive(Debug)]
pub struct HttpStoreBuilder {
    url: String,
    timeout: Duration,
    pool_max_idle_per_host: Option<usize>,
}

impl HttpStoreBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: DEFAULT_TIMEOUT,
            pool_max_idle_per_host: None,
        }
    }

    /// Sets the per-request timeout. Defaults to 30 seconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = Some(max);
        self
    }

    fn base_url(&self) -> DocumentStoreResult<Url> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| DocumentStoreError::Configuration(format!("invalid url {}: {e}", self.url)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(DocumentStoreError::Configuration(format!(
                "unsupported scheme {} in {}",
                url.scheme(),
                self.url
            )));
        }

        // endpoints are joined onto the base, which needs a trailing slash
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        Ok(url)
    }
}

#[async_trait]
impl StoreBackendBuilder for HttpStoreBuilder {
    type Backend = HttpStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        let base_url = self.base_url()?;

        let mut client = Client::builder().timeout(self.timeout);
        if let Some(max) = self.pool_max_idle_per_host {
            client = client.pool_max_idle_per_host(max);
        }
        let client = client
            .build()
            .map_err(|e| DocumentStoreError::Configuration(e.to_string()))?;

        debug!(url = %base_url, "connected http store");

        Ok(HttpStore {
            client,
            base_url,
            timeout: self.timeout,
        })
    }
}
