//! Transfer handlers: chunked uploads, text pastes, the item list and files

use crate::error::ApiError;
use crate::extractors::AuthUser;
use crate::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, Request, State},
    http::StatusCode,
    response::Response,
    Json,
};
use hearth_core::TransferError;
use hearth_types::{
    InitUploadRequest, InitUploadResponse, ListFilter, SubmitTextRequest, TransferItem,
    UploadStatusResponse,
};
use serde::{Deserialize, Serialize};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, info};

pub async fn init_upload(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<InitUploadRequest>,
) -> Result<Json<InitUploadResponse>, ApiError> {
    info!(
        "Upload init from {}: name={}, size={}",
        user.username, req.file_name, req.size
    );
    let resp = state.transfer.upload_init(&user.username, req).await?;
    Ok(Json(resp))
}

pub async fn put_chunk(
    State(state): State<AppState>,
    _user: AuthUser,
    Path((upload_id, index)): Path<(String, u64)>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    state.transfer.put_chunk(&upload_id, index, body).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn upload_status(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(upload_id): Path<String>,
) -> Result<Json<UploadStatusResponse>, ApiError> {
    Ok(Json(state.transfer.upload_status(&upload_id).await?))
}

pub async fn complete_upload(
    State(state): State<AppState>,
    user: AuthUser,
    Path(upload_id): Path<String>,
) -> Result<Json<TransferItem>, ApiError> {
    let item = state.transfer.upload_complete(&upload_id).await?;
    info!("Upload {} completed by {}", upload_id, user.username);
    Ok(Json(item))
}

pub async fn abandon_upload(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(upload_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.transfer.abandon_upload(&upload_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn submit_text(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<SubmitTextRequest>,
) -> Result<Json<TransferItem>, ApiError> {
    let item = state.transfer.submit_text(&user.username, &req.text).await?;
    Ok(Json(item))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ItemsResponse {
    items: Vec<TransferItem>,
}

pub async fn list_items(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<ItemsResponse>, ApiError> {
    let filter: ListFilter = query
        .kind
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|e: hearth_types::ParseFilterError| TransferError::Validation(e.to_string()))?;

    let items = state.transfer.list(filter, query.limit).await?;
    Ok(Json(ItemsResponse { items }))
}

pub async fn delete_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.transfer.delete_item(&id).await?.is_none() {
        debug!("Delete of unknown item {} by {}", id, user.username);
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn serve_file(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(file_name): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let path = state.transfer.resolve_file(&file_name).await?;
    let response = ServeFile::new(path)
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {});
    Ok(response.map(Body::new))
}
