//! Read path for crawlers.
//!
//! Leaf and index files are served exactly as stored: gzip bytes with
//! `Content-Encoding: gzip`. A file is only served once its metadata row
//! exists, so half-written objects from a crashed assembler stay hidden.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::{CACHE_CONTROL, CONTENT_ENCODING, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use sitemaps_core::EntityKind;
use sitemaps_core::naming::{ROBOTS_FILE, storage_key};

const XML_CONTENT_TYPE: &str = "application/xml";
const ROBOTS_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const CACHE_POLICY: &str = "public, max-age=300";

/// GET /sitemaps/sitemap/{file}
pub async fn get_sitemap_file(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> ApiResult<Response> {
    let file = state
        .metadata
        .get_sitemap_file(&file_name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("sitemap file not found: {file_name}")))?;
    let kind = file.entity_kind()?;
    serve_gzip_xml(&state, kind, &file.file_name).await
}

/// GET /sitemaps/index/{file}
pub async fn get_index_file(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> ApiResult<Response> {
    let file = state
        .metadata
        .get_index_file(&file_name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("index file not found: {file_name}")))?;
    let kind = file.entity_kind()?;
    serve_gzip_xml(&state, kind, &file.file_name).await
}

async fn serve_gzip_xml(state: &AppState, kind: EntityKind, file_name: &str) -> ApiResult<Response> {
    let body = fetch(state, &storage_key(kind, file_name)).await?;
    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, XML_CONTENT_TYPE),
            (CONTENT_ENCODING, "gzip"),
            (CACHE_CONTROL, CACHE_POLICY),
        ],
        body,
    )
        .into_response())
}

/// GET /robots.txt
pub async fn get_robots(State(state): State<AppState>) -> ApiResult<Response> {
    let body = fetch(&state, ROBOTS_FILE).await?;
    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, ROBOTS_CONTENT_TYPE), (CACHE_CONTROL, CACHE_POLICY)],
        body,
    )
        .into_response())
}

async fn fetch(state: &AppState, key: &str) -> ApiResult<Bytes> {
    state.storage.get(key).await.map_err(|e| {
        if e.is_not_found() {
            ApiError::NotFound(format!("object not found: {key}"))
        } else {
            ApiError::Storage(e)
        }
    })
}
