//! In-memory mock of the catalogue's action API, used by integration tests
//! and runnable standalone.
//!
//! Every endpoint speaks the `{success, result, error}` envelope, except
//! the upload endpoints, which return a bare HTML fault page when the
//! target package id is `gateway-crash` — mirroring the gateway-level
//! failures the real service produces on uploads. Mutating actions require
//! an `Authorization` header; reads do not. Datastore writes can be
//! scripted to fail a number of times before succeeding, which is how the
//! client's retry policy is exercised.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{FromRequest, Multipart, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    response::{Html, IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// Package id that makes the upload endpoints answer with an HTML fault
/// page instead of an envelope.
pub const GATEWAY_CRASH_PACKAGE: &str = "gateway-crash";

const HTML_FAULT_PAGE: &str = "<html><body><h1>Bad Gateway</h1></body></html>";
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub package_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub mimetype: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Server state. Seed `groups` or `datastore_failures` before handing the
/// state to [`app_with`] when a test needs preconditions.
#[derive(Debug, Default)]
pub struct MockState {
    pub datasets: HashMap<String, Dataset>,
    pub groups: HashMap<String, Group>,
    pub tables: HashMap<String, Vec<Value>>,
    /// Remaining datastore writes to fail before succeeding.
    pub datastore_failures: u32,
}

pub type Db = Arc<RwLock<MockState>>;

pub fn app() -> Router {
    app_with(MockState::default())
}

pub fn app_with(state: MockState) -> Router {
    let db: Db = Arc::new(RwLock::new(state));
    Router::new()
        .route("/api/action/package_show", post(package_show))
        .route("/api/action/package_create", post(package_create))
        .route("/api/action/package_delete", post(package_delete))
        .route("/api/action/package_search", post(package_search))
        .route("/api/action/resource_create", post(resource_create))
        .route("/api/action/resource_update", post(resource_update))
        .route("/api/action/group_show", post(group_show))
        .route("/api/action/group_delete", post(group_delete))
        .route("/api/action/datastore_create", post(datastore_create))
        .route("/api/action/datastore_upsert", post(datastore_upsert))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// Serve with pre-seeded state; used by tests that need preconditions.
pub async fn run_with(listener: TcpListener, state: MockState) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(state)).await
}

fn success(result: Value) -> Json<Value> {
    Json(json!({"success": true, "result": result}))
}

fn failure(error: Value) -> Json<Value> {
    Json(json!({"success": false, "error": error}))
}

fn not_found(kind: &str) -> Json<Value> {
    failure(json!({"__type": "Not Found Error", "message": format!("Not found: {kind}")}))
}

fn denied() -> Json<Value> {
    failure(json!({"__type": "Authorization Error", "message": "Access denied"}))
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| !value.is_empty())
}

fn requested_id(body: &Value) -> &str {
    body.get("id").and_then(Value::as_str).unwrap_or_default()
}

async fn package_show(State(db): State<Db>, Json(body): Json<Value>) -> Json<Value> {
    let state = db.read().await;
    let wanted = requested_id(&body);
    match state
        .datasets
        .values()
        .find(|d| d.name == wanted || d.id.as_deref() == Some(wanted))
    {
        Some(dataset) => success(serde_json::to_value(dataset).unwrap()),
        None => not_found("Dataset"),
    }
}

async fn package_create(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    if !authorized(&headers) {
        return denied();
    }
    let mut dataset: Dataset = match serde_json::from_value(body) {
        Ok(dataset) => dataset,
        Err(_) => return failure(json!({"message": "Invalid payload"})),
    };
    if dataset.name.is_empty() {
        return failure(json!({"__type": "Validation Error", "name": "Missing value"}));
    }
    dataset.id = Some(Uuid::new_v4().to_string());
    let reply = success(serde_json::to_value(&dataset).unwrap());
    db.write().await.datasets.insert(dataset.name.clone(), dataset);
    reply
}

async fn package_delete(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    if !authorized(&headers) {
        return denied();
    }
    let mut state = db.write().await;
    let wanted = requested_id(&body);
    let key = state
        .datasets
        .values()
        .find(|d| d.name == wanted || d.id.as_deref() == Some(wanted))
        .map(|d| d.name.clone());
    match key {
        Some(key) => {
            state.datasets.remove(&key);
            success(Value::Null)
        }
        None => not_found("Dataset"),
    }
}

async fn package_search(State(db): State<Db>, Json(body): Json<Value>) -> Json<Value> {
    let query = body.get("q").and_then(Value::as_str).unwrap_or_default().to_lowercase();
    let state = db.read().await;
    let hits: Vec<&Dataset> = state
        .datasets
        .values()
        .filter(|d| {
            d.name.to_lowercase().contains(&query)
                || d.title.to_lowercase().contains(&query)
                || d.notes.to_lowercase().contains(&query)
        })
        .collect();
    success(json!({"count": hits.len(), "results": hits}))
}

async fn resource_create(
    State(db): State<Db>,
    headers: HeaderMap,
    request: Request,
) -> Response {
    resource_write(db, headers, request).await
}

async fn resource_update(
    State(db): State<Db>,
    headers: HeaderMap,
    request: Request,
) -> Response {
    resource_write(db, headers, request).await
}

/// Shared by create and update: accepts either a JSON body (url flow) or a
/// multipart form (upload flow).
async fn resource_write(db: Db, headers: HeaderMap, request: Request) -> Response {
    if !authorized(&headers) {
        return denied().into_response();
    }
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let (mut resource, uploaded) = if content_type.starts_with("multipart/") {
        let multipart = match Multipart::from_request(request, &()).await {
            Ok(multipart) => multipart,
            Err(_) => return failure(json!({"message": "Invalid multipart body"})).into_response(),
        };
        match resource_from_multipart(multipart).await {
            Ok(parsed) => parsed,
            Err(response) => return response,
        }
    } else {
        let bytes = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(_) => return failure(json!({"message": "Body too large"})).into_response(),
        };
        match serde_json::from_slice::<Resource>(&bytes) {
            Ok(resource) => (resource, false),
            Err(_) => return failure(json!({"message": "Invalid payload"})).into_response(),
        }
    };

    if resource.package_id == GATEWAY_CRASH_PACKAGE && uploaded {
        return Html(HTML_FAULT_PAGE).into_response();
    }
    if resource.package_id.is_empty() {
        return failure(json!({"__type": "Validation Error", "package_id": "Missing value"}))
            .into_response();
    }
    if resource.id.as_deref().map_or(true, str::is_empty) {
        resource.id = Some(Uuid::new_v4().to_string());
    }
    let reply = success(serde_json::to_value(&resource).unwrap()).into_response();
    if let Some(dataset) = db.write().await.datasets.get_mut(&resource.package_id) {
        dataset.resources.push(resource);
    }
    reply
}

/// Read the upload form; returns the resource plus whether a file part was
/// actually present.
async fn resource_from_multipart(mut multipart: Multipart) -> Result<(Resource, bool), Response> {
    let mut resource = Resource::default();
    let mut uploaded = false;
    while let Some(field) = multipart.next_field().await.map_err(|_| {
        failure(json!({"message": "Invalid multipart body"})).into_response()
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "upload" => {
                let bytes = field.bytes().await.unwrap_or_default();
                uploaded = !bytes.is_empty();
            }
            _ => {
                let text = field.text().await.unwrap_or_default();
                match name.as_str() {
                    "package_id" => resource.package_id = text,
                    "name" => resource.name = text,
                    "description" => resource.description = text,
                    "format" => resource.format = text,
                    "mimetype" => resource.mimetype = text,
                    "url" => resource.url = Some(text),
                    "id" => resource.id = Some(text),
                    _ => {}
                }
            }
        }
    }
    Ok((resource, uploaded))
}

async fn group_show(State(db): State<Db>, Json(body): Json<Value>) -> Json<Value> {
    let state = db.read().await;
    let wanted = requested_id(&body);
    match state
        .groups
        .values()
        .find(|g| g.name == wanted || g.id.as_deref() == Some(wanted))
    {
        Some(group) => success(serde_json::to_value(group).unwrap()),
        None => not_found("Group"),
    }
}

async fn group_delete(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    if !authorized(&headers) {
        return denied();
    }
    let mut state = db.write().await;
    let wanted = requested_id(&body);
    let key = state
        .groups
        .values()
        .find(|g| g.name == wanted || g.id.as_deref() == Some(wanted))
        .map(|g| g.name.clone());
    match key {
        Some(key) => {
            state.groups.remove(&key);
            success(Value::Null)
        }
        None => not_found("Group"),
    }
}

async fn datastore_create(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    datastore_write(db, headers, body, false).await
}

async fn datastore_upsert(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    datastore_write(db, headers, body, true).await
}

async fn datastore_write(db: Db, headers: HeaderMap, body: Value, upsert: bool) -> Json<Value> {
    if !authorized(&headers) {
        return denied();
    }
    let mut state = db.write().await;
    if state.datastore_failures > 0 {
        state.datastore_failures -= 1;
        return failure(
            json!({"__type": "Validation Error", "resource_id": "Resource temporarily unavailable"}),
        );
    }
    let resource_id = body
        .get("resource_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if resource_id.is_empty() {
        return failure(json!({"__type": "Validation Error", "resource_id": "Missing value"}));
    }
    if upsert && !state.tables.contains_key(&resource_id) {
        return failure(json!({"__type": "Validation Error", "resource_id": "Not found: Resource"}));
    }
    let rows = body
        .get("records")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    state.tables.entry(resource_id).or_default().extend(rows);
    success(body)
}
