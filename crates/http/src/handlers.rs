//! Route handlers (spec.md §6.2). Each returns `Result<_, ApiError>` so a
//! `ServiceError` maps to its status code uniformly via [`crate::error`].

use std::path::PathBuf;

use axum::extract::{Multipart, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use imagefinder_core::{Filters, Orientation, SearchHit, ServiceError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiError;
use crate::AppContext;

fn default_topk() -> usize {
    20
}

#[derive(Deserialize, Default)]
pub struct FilterQuery {
    folder: Option<String>,
    orientation: Option<String>,
    root: Option<PathBuf>,
}

impl FilterQuery {
    fn into_filters(self) -> Filters {
        Filters {
            orientation: self.orientation.as_deref().and_then(Orientation::parse),
            folder: self.folder,
            root: self.root,
        }
    }
}

#[derive(Serialize)]
pub struct SearchResponse {
    items: Vec<SearchHit>,
}

pub async fn ready(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(ctx.service.ready_info())
}

#[derive(Deserialize)]
pub struct SearchTextBody {
    q: String,
    #[serde(default = "default_topk")]
    topk: usize,
    #[serde(default)]
    filters: Option<FilterQuery>,
}

pub async fn search_text(
    State(ctx): State<AppContext>,
    Json(body): Json<SearchTextBody>,
) -> Result<Json<SearchResponse>, ApiError> {
    let filters = body.filters.unwrap_or_default().into_filters();
    let items = ctx.service.search_text(&body.q, body.topk, &filters)?;
    Ok(Json(SearchResponse { items }))
}

/// `multipart/form-data`: an `image` field (the query blob), an optional
/// `topk` field (defaults like `/search_text`), and an optional `filters`
/// field holding a JSON-encoded [`FilterQuery`].
pub async fn search_image(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<Json<SearchResponse>, ApiError> {
    let mut image: Option<Vec<u8>> = None;
    let mut topk = default_topk();
    let mut filters = Filters::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(ServiceError::BadRequest(e.to_string())))?
    {
        match field.name().unwrap_or("") {
            "image" => {
                let bytes = field.bytes().await.map_err(|e| ApiError(ServiceError::BadRequest(e.to_string())))?;
                image = Some(bytes.to_vec());
            }
            "topk" => {
                let text = field.text().await.map_err(|e| ApiError(ServiceError::BadRequest(e.to_string())))?;
                if let Ok(parsed) = text.trim().parse() {
                    topk = parsed;
                }
            }
            "filters" => {
                let text = field.text().await.map_err(|e| ApiError(ServiceError::BadRequest(e.to_string())))?;
                let parsed: FilterQuery = serde_json::from_str(&text)
                    .map_err(|e| ApiError(ServiceError::BadRequest(e.to_string())))?;
                filters = parsed.into_filters();
            }
            _ => {}
        }
    }

    let image = image.ok_or_else(|| ApiError(ServiceError::BadRequest("missing \"image\" field".into())))?;
    let items = ctx.service.search_image(&image, topk, &filters)?;
    Ok(Json(SearchResponse { items }))
}

pub async fn folders(State(ctx): State<AppContext>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(ctx.service.folders()?))
}

pub async fn roots(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(json!({ "roots": ctx.service.roots() }))
}

#[derive(Deserialize)]
pub struct RootsRequest {
    roots: Vec<PathBuf>,
}

fn default_merge() -> bool {
    true
}

#[derive(Deserialize)]
pub struct ReindexRequest {
    roots: Vec<PathBuf>,
    #[serde(default = "default_merge")]
    merge: bool,
}

pub async fn reindex(
    State(ctx): State<AppContext>,
    Json(body): Json<ReindexRequest>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.service.reindex(body.roots, body.merge)?;
    let record = ctx.service.reindex_status()?;
    Ok(Json(record))
}

#[derive(Deserialize, Default)]
pub struct JobIdQuery {
    job_id: Option<Uuid>,
}

pub async fn reindex_status(
    State(ctx): State<AppContext>,
    Query(q): Query<JobIdQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let record = ctx.service.reindex_status()?;
    if let Some(job_id) = q.job_id {
        if job_id != record.job_id {
            return Err(ApiError(ServiceError::JobIdMismatch));
        }
    }
    let progress_pct = record.progress_pct();
    let mut value = serde_json::to_value(&record).expect("JobRecord always serializes");
    if let Some(obj) = value.as_object_mut() {
        obj.insert("progress_pct".to_string(), json!(progress_pct));
    }
    Ok(Json(value))
}

#[derive(Deserialize)]
pub struct JobIdBody {
    job_id: Uuid,
}

pub async fn cancel_index(
    State(ctx): State<AppContext>,
    Json(body): Json<JobIdBody>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.service.cancel_index(body.job_id)?;
    Ok(Json(json!({ "status": "cancel requested", "job_id": body.job_id })))
}

pub async fn remove_roots(
    State(ctx): State<AppContext>,
    Json(body): Json<RootsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = ctx.service.remove_roots(&body.roots)?;
    Ok(Json(outcome))
}

#[derive(Deserialize, Default)]
pub struct NukeAllBody {
    confirm: Option<String>,
}

pub async fn nuke_all(
    State(ctx): State<AppContext>,
    body: Option<Json<NukeAllBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let confirm = body.and_then(|Json(b)| b.confirm);
    ctx.service.nuke_all(confirm.as_deref())?;
    Ok(Json(json!({ "ok": true, "roots": Vec::<PathBuf>::new(), "indexed": 0 })))
}

#[derive(Deserialize)]
pub struct PathQuery {
    path: PathBuf,
}

pub async fn thumb(
    State(ctx): State<AppContext>,
    Query(q): Query<PathQuery>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.service.meta_for(&q.path)?;
    let bytes = ctx.thumbnails.thumbnail(&q.path).map_err(|e| ApiError(ServiceError::Io(e)))?;
    Ok(([("content-type", "image/jpeg")], bytes))
}

#[derive(Deserialize)]
pub struct OpenPathBody {
    path: PathBuf,
}

/// Directories must be under an indexed root (403 otherwise); files must
/// already be indexed (404 otherwise) — spec.md §6.2, grounded on the
/// original server's `open_path` folder/file distinction.
pub async fn open_path(
    State(ctx): State<AppContext>,
    Json(body): Json<OpenPathBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.path.is_dir() {
        let normalized = imagefinder_core::RootSet::normalize(&body.path).map_err(ServiceError::from)?;
        let under_root = ctx.service.roots().iter().any(|r| &normalized == r || normalized.starts_with(r));
        if !under_root {
            return Err(ApiError(ServiceError::PathNotUnderRoot(body.path.clone())));
        }
    } else {
        ctx.service.meta_for(&body.path)?;
    }
    ctx.reveal.reveal(&body.path).map_err(|e| ApiError(ServiceError::Io(e)))?;
    Ok(Json(json!({ "ok": true })))
}
