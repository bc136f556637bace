//! HTTP backend integration tests.
//!
//! Serves an in-memory store through axum and drives it with the HTTP backend.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query as Params, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use bson::doc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use docsession_core::{
    backend::{
        BatchCommand, IdentityRange, LoadResult, QueryResult, StoreBackend, StoreBackendBuilder,
        VersionCheck,
    },
    document::Document,
    error::DocumentStoreError,
    patch::PatchOperation,
    query::{Filter, Query},
    store::DocumentStore,
};
use docsession_http::{
    HttpStore,
    wire::{
        BulkRequest, BulkResponse, CollectionParams, ErrorResponse, FetchRequest, IdParams,
        IndexesRequest, IndexesResponse, KeyParams, LAST_MODIFIED_HEADER, METADATA_HEADER,
        PatchRequest, PatchResponse, decode_metadata,
    },
};
use docsession_memory::{InMemoryStore, IndexingMode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Character {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    level: i32,
}

impl Document for Character {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    fn collection_name() -> &'static str {
        "Characters"
    }
}

fn character(name: &str, level: i32) -> Character {
    Character { id: None, name: name.to_string(), level }
}

struct ApiError(DocumentStoreError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from(&self.0);
        let status =
            StatusCode::from_u16(body.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        (status, Json(body)).into_response()
    }
}

impl From<DocumentStoreError> for ApiError {
    fn from(err: DocumentStoreError) -> Self {
        Self(err)
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn fetch(State(store): State<InMemoryStore>, Json(body): Json<FetchRequest>) -> ApiResult<LoadResult> {
    Ok(Json(store.get_documents(body.ids, body.includes).await?))
}

async fn query(State(store): State<InMemoryStore>, Json(query): Json<Query>) -> ApiResult<QueryResult> {
    Ok(Json(store.query_documents(query).await?))
}

async fn bulk(State(store): State<InMemoryStore>, Json(body): Json<BulkRequest>) -> ApiResult<BulkResponse> {
    let results = store.commit_batch(body.commands).await?;
    Ok(Json(BulkResponse { results }))
}

async fn patch(
    State(store): State<InMemoryStore>,
    Params(params): Params<IdParams>,
    Json(body): Json<PatchRequest>,
) -> ApiResult<PatchResponse> {
    let version = store.patch_document(&params.id, body.operations).await?;
    Ok(Json(PatchResponse { version }))
}

async fn indexes(
    State(store): State<InMemoryStore>,
    Json(body): Json<IndexesRequest>,
) -> ApiResult<IndexesResponse> {
    let registrations = store.put_indexes(body.definitions).await?;
    Ok(Json(IndexesResponse { registrations }))
}

async fn hilo(
    State(store): State<InMemoryStore>,
    Params(params): Params<CollectionParams>,
) -> ApiResult<IdentityRange> {
    Ok(Json(store.next_identity_range(&params.collection).await?))
}

async fn put_attachment(
    State(store): State<InMemoryStore>,
    Params(params): Params<KeyParams>,
    headers: HeaderMap,
    data: Bytes,
) -> Result<StatusCode, ApiError> {
    let header = headers.get(METADATA_HEADER).and_then(|value| value.to_str().ok());
    let metadata = decode_metadata(header).map_err(DocumentStoreError::from)?;

    store.put_attachment(&params.key, data.to_vec(), metadata).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_attachment(
    State(store): State<InMemoryStore>,
    Params(params): Params<KeyParams>,
) -> Result<Response, ApiError> {
    let Some(attachment) = store.get_attachment(&params.key).await? else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    let metadata = serde_json::to_string(&attachment.metadata).map_err(DocumentStoreError::from)?;

    Ok((
        [
            (METADATA_HEADER, metadata),
            (LAST_MODIFIED_HEADER, attachment.last_modified.to_rfc3339()),
        ],
        attachment.data,
    )
        .into_response())
}

async fn delete_attachment(
    State(store): State<InMemoryStore>,
    Params(params): Params<KeyParams>,
) -> Result<StatusCode, ApiError> {
    store.delete_attachment(&params.key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Bind to port 0 and return the base url of the server.
async fn start_server(store: InMemoryStore) -> String {
    let app = Router::new()
        .route("/docs/fetch", post(fetch))
        .route("/docs", axum::routing::patch(patch))
        .route("/queries", post(query))
        .route("/bulk_docs", post(bulk))
        .route("/indexes", put(indexes))
        .route("/hilo/next", get(hilo))
        .route(
            "/attachments",
            put(put_attachment).get(get_attachment).delete(delete_attachment),
        )
        .with_state(store);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}/")
}

async fn connect() -> (DocumentStore<HttpStore>, InMemoryStore) {
    let memory = InMemoryStore::builder()
        .with_indexing_mode(IndexingMode::Manual)
        .build()
        .await
        .unwrap();
    let base = start_server(memory.clone()).await;

    let backend = HttpStore::builder(base)
        .with_timeout(Duration::from_secs(5))
        .build()
        .await
        .unwrap();

    (DocumentStore::new(backend), memory)
}

#[tokio::test]
async fn sessions_round_trip_over_http() {
    let (store, _) = connect().await;

    let mut session = store.open_session().unwrap();
    let mike = session.store(character("Mike Keenan", 1)).await.unwrap();
    session.save_changes().await.unwrap();

    let id = mike.read().id.clone().unwrap();
    assert_eq!(id, "Characters/1");

    let mut session = store.open_session().unwrap();
    let loaded = session.load::<Character>(&id).await.unwrap().unwrap();
    assert_eq!(loaded.snapshot(), mike.snapshot());
    assert_eq!(session.number_of_requests(), 1);
}

#[tokio::test]
async fn queries_wait_for_non_stale_results() {
    let (store, _) = connect().await;

    let mut session = store.open_session().unwrap();
    for (name, level) in [("Mike", 3), ("Ann", 7), ("Bob", 9)] {
        session.store(character(name, level)).await.unwrap();
    }
    session.save_changes().await.unwrap();

    let mut session = store.open_session().unwrap();
    let results = session
        .query::<Character>()
        .filter(Filter::gt("Level", 5))
        .sort("Name", docsession_core::query::SortDirection::Asc)
        .wait_for_non_stale_results(Duration::from_secs(5))
        .execute()
        .await
        .unwrap();

    assert!(!results.is_stale());
    let names = results
        .into_iter()
        .map(|tracked| tracked.read().name.clone())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["Ann", "Bob"]);
}

#[tokio::test]
async fn conflicts_surface_with_both_versions() {
    let (store, _) = connect().await;

    let mut session = store.open_session().unwrap();
    session.store(character("Mike", 1)).await.unwrap();
    session.save_changes().await.unwrap();

    let mut first = store.open_session().unwrap();
    let mut second = store.open_session().unwrap();
    let a = first.load::<Character>("Characters/1").await.unwrap().unwrap();
    let b = second.load::<Character>("Characters/1").await.unwrap().unwrap();

    a.write().level = 2;
    first.save_changes().await.unwrap();

    b.write().level = 3;
    let err = second.save_changes().await.unwrap_err();

    assert!(matches!(
        err,
        DocumentStoreError::ConcurrencyConflict { ref id, expected: Some(_), actual: Some(_) }
            if id == "Characters/1"
    ));
}

#[tokio::test]
async fn patches_and_missing_documents() {
    let (store, memory) = connect().await;

    memory
        .commit_batch(vec![BatchCommand::Put {
            id: "Characters/1".to_string(),
            collection: "Characters".to_string(),
            document: doc! { "Name": "Mike", "Level": 1, "Inventory": [] },
            expected: VersionCheck::Missing,
            provisional: false,
        }])
        .await
        .unwrap();

    store
        .patch(
            "Characters/1",
            vec![PatchOperation::add("Inventory", "Old Boot"), PatchOperation::inc("Level", 1)],
        )
        .await
        .unwrap();

    let loaded = memory
        .get_documents(vec!["Characters/1".to_string()], Vec::new())
        .await
        .unwrap();
    let body = &loaded.results[0].as_ref().unwrap().body;
    assert_eq!(body.get_array("Inventory").unwrap().len(), 1);
    assert_eq!(body.get("Level").and_then(bson::Bson::as_i32), Some(2));

    let err = store
        .patch("Characters/404", vec![PatchOperation::set("Level", 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::DocumentNotFound(id) if id == "Characters/404"));

    let err = store
        .patch("Characters/1", vec![PatchOperation::add("Name", "x")])
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::InvalidPatch(_)));
}

#[tokio::test]
async fn attachments_carry_metadata() {
    let (store, _) = connect().await;

    let metadata = [("Description".to_string(), "Hat".to_string())].into();
    store
        .put_attachment("images/1", b"GIF89a".to_vec(), metadata)
        .await
        .unwrap();

    let attachment = store.get_attachment("images/1").await.unwrap().unwrap();
    assert_eq!(attachment.data, b"GIF89a");
    assert_eq!(attachment.metadata_value("Description"), Some("Hat"));

    store.delete_attachment("images/1").await.unwrap();
    assert!(store.get_attachment("images/1").await.unwrap().is_none());
}

#[tokio::test]
async fn unreachable_servers_are_transport_errors() {
    let backend = HttpStore::builder("http://127.0.0.1:9/")
        .with_timeout(Duration::from_secs(2))
        .build()
        .await
        .unwrap();

    let err = backend
        .get_documents(vec!["Characters/1".to_string()], Vec::new())
        .await
        .unwrap_err();

    assert!(err.is_transient());
}

#[tokio::test]
async fn slow_answers_are_timeouts() {
    async fn stall() -> StatusCode {
        tokio::time::sleep(Duration::from_secs(2)).await;
        StatusCode::NO_CONTENT
    }

    let app = Router::new().route("/docs/fetch", post(stall));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let backend = HttpStore::builder(format!("http://{addr}/"))
        .with_timeout(Duration::from_millis(50))
        .build()
        .await
        .unwrap();

    let err = backend
        .get_documents(vec!["Characters/1".to_string()], Vec::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DocumentStoreError::Timeout(_)));
}
