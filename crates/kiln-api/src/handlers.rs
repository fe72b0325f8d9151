use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use kiln_bus::STREAM_COMPLETE;
use kiln_domain::{
    Condition, FieldSelector, ImageBuild, ImageBuildSpec, ImageExport, ImageExportSpec,
    ListParams, Metadata, OrgId, OwnerRef, ResourceKind,
};
use kiln_engine::LogFetch;
use kiln_store::{GetOptions, StatusPatch};

use crate::error::ApiError;
use crate::state::AppState;

// ── Wire payloads ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NewResourceMeta {
    pub name: String,
    #[serde(default)]
    pub owner: Option<OwnerRef>,
}

impl NewResourceMeta {
    fn into_metadata(self) -> Metadata {
        let mut metadata = Metadata::new(self.name, Utc::now());
        metadata.owner = self.owner;
        metadata
    }
}

#[derive(Debug, Deserialize)]
pub struct NewImageBuild {
    pub metadata: NewResourceMeta,
    pub spec: ImageBuildSpec,
}

impl NewImageBuild {
    fn into_resource(self) -> ImageBuild {
        ImageBuild {
            metadata: self.metadata.into_metadata(),
            spec: self.spec,
            status: Default::default(),
            exports: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NewImageExport {
    pub metadata: NewResourceMeta,
    pub spec: ImageExportSpec,
}

impl NewImageExport {
    fn into_resource(self) -> ImageExport {
        ImageExport {
            metadata: self.metadata.into_metadata(),
            spec: self.spec,
            status: Default::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewImagePipeline {
    pub image_build: NewImageBuild,
    #[serde(default)]
    pub image_export: Option<NewImageExport>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPatchBody {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub log_tail: Option<String>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl StatusPatchBody {
    fn into_patch(self) -> StatusPatch {
        StatusPatch {
            conditions: self.conditions,
            log_tail: self.log_tail,
            last_seen: self.last_seen,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub limit: Option<usize>,
    #[serde(rename = "continue")]
    pub continue_token: Option<String>,
    pub field_selector: Option<String>,
}

impl ListQuery {
    fn into_params(self) -> Result<ListParams, ApiError> {
        let selector = self
            .field_selector
            .as_deref()
            .map(FieldSelector::parse)
            .transpose()
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        Ok(ListParams { limit: self.limit, continue_token: self.continue_token, selector })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBuildQuery {
    #[serde(default)]
    pub with_exports: bool,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub follow: bool,
}

fn org_id(org: Uuid) -> OrgId {
    OrgId::new(org)
}

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn ready(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state
        .service
        .list_builds(&OrgId::nil(), ListParams { limit: Some(1), ..Default::default() })
        .await?;
    Ok(StatusCode::OK)
}

// ── ImageBuilds ───────────────────────────────────────────────────────────────

pub async fn create_build(
    State(state): State<AppState>,
    Path(org): Path<Uuid>,
    Json(body): Json<NewImageBuild>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.service.create_build(&org_id(org), body.into_resource()).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_builds(
    State(state): State<AppState>,
    Path(org): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let params = query.into_params()?;
    let list = state.service.list_builds(&org_id(org), params).await?;
    Ok(Json(list))
}

pub async fn get_build(
    State(state): State<AppState>,
    Path((org, name)): Path<(Uuid, String)>,
    Query(query): Query<GetBuildQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let opts = GetOptions { with_exports: query.with_exports };
    let build = state.service.get_build(&org_id(org), &name, opts).await?;
    Ok(Json(build))
}

pub async fn replace_build(
    State(state): State<AppState>,
    Path((org, name)): Path<(Uuid, String)>,
    Json(body): Json<NewImageBuild>,
) -> Result<impl IntoResponse, ApiError> {
    if body.metadata.name != name {
        return Err(ApiError::bad_request("metadata.name does not match the path"));
    }
    let updated = state.service.replace_build(&org_id(org), body.into_resource()).await?;
    Ok(Json(updated))
}

pub async fn patch_build_status(
    State(state): State<AppState>,
    Path((org, name)): Path<(Uuid, String)>,
    Json(body): Json<StatusPatchBody>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state
        .service
        .update_build_status(&org_id(org), &name, body.into_patch())
        .await?;
    Ok(Json(updated))
}

pub async fn delete_build(
    State(state): State<AppState>,
    Path((org, name)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let prior = state.service.delete_build(&org_id(org), &name).await?;
    if prior.is_some() {
        info!(org_id = %org, name = %name, "deleted image build (cascading to owned exports)");
    }
    Ok(Json(json!({ "deleted": prior.is_some() })))
}

pub async fn get_build_logs(
    State(state): State<AppState>,
    Path((org, name)): Path<(Uuid, String)>,
    Query(query): Query<LogsQuery>,
) -> Result<Response, ApiError> {
    let fetch = state
        .service
        .fetch_logs(&org_id(org), ResourceKind::ImageBuild, &name, query.follow)
        .await?;
    Ok(logs_response(fetch, query.follow))
}

// ── ImageExports ──────────────────────────────────────────────────────────────

pub async fn create_export(
    State(state): State<AppState>,
    Path(org): Path<Uuid>,
    Json(body): Json<NewImageExport>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.service.create_export(&org_id(org), body.into_resource()).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_exports(
    State(state): State<AppState>,
    Path(org): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let params = query.into_params()?;
    let list = state.service.list_exports(&org_id(org), params).await?;
    Ok(Json(list))
}

pub async fn get_export(
    State(state): State<AppState>,
    Path((org, name)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let export = state.service.get_export(&org_id(org), &name).await?;
    Ok(Json(export))
}

pub async fn replace_export(
    State(state): State<AppState>,
    Path((org, name)): Path<(Uuid, String)>,
    Json(body): Json<NewImageExport>,
) -> Result<impl IntoResponse, ApiError> {
    if body.metadata.name != name {
        return Err(ApiError::bad_request("metadata.name does not match the path"));
    }
    let updated = state.service.replace_export(&org_id(org), body.into_resource()).await?;
    Ok(Json(updated))
}

pub async fn patch_export_status(
    State(state): State<AppState>,
    Path((org, name)): Path<(Uuid, String)>,
    Json(body): Json<StatusPatchBody>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state
        .service
        .update_export_status(&org_id(org), &name, body.into_patch())
        .await?;
    Ok(Json(updated))
}

pub async fn delete_export(
    State(state): State<AppState>,
    Path((org, name)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let prior = state.service.delete_export(&org_id(org), &name).await?;
    Ok(Json(json!({ "deleted": prior.is_some() })))
}

pub async fn get_export_logs(
    State(state): State<AppState>,
    Path((org, name)): Path<(Uuid, String)>,
    Query(query): Query<LogsQuery>,
) -> Result<Response, ApiError> {
    let fetch = state
        .service
        .fetch_logs(&org_id(org), ResourceKind::ImageExport, &name, query.follow)
        .await?;
    Ok(logs_response(fetch, query.follow))
}

// ── Pipelines ─────────────────────────────────────────────────────────────────

pub async fn create_pipeline(
    State(state): State<AppState>,
    Path(org): Path<Uuid>,
    Json(body): Json<NewImagePipeline>,
) -> Result<impl IntoResponse, ApiError> {
    let build = body.image_build.into_resource();
    let export = body.image_export.map(NewImageExport::into_resource);
    let (build, export) = state.service.create_pipeline(&org_id(org), build, export).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "imageBuild": build, "imageExport": export })),
    ))
}

// ── Log body assembly ─────────────────────────────────────────────────────────

/// Archived tail first, then the stream backlog, then (in follow mode) live
/// chunks until the stream-complete sentinel. The tail and the backlog may
/// overlap; readers accept that instead of deduplicating by offset.
fn logs_response(fetch: LogFetch, follow: bool) -> Response {
    if !follow {
        let mut body = fetch.archived_tail.unwrap_or_default().into_bytes();
        for chunk in fetch.backlog {
            body.extend_from_slice(&chunk);
        }
        return (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response();
    }

    let LogFetch { archived_tail, backlog, live } = fetch;
    let stream = async_stream::stream! {
        let mut complete = false;
        if let Some(tail) = archived_tail {
            yield Ok::<Bytes, std::convert::Infallible>(Bytes::from(tail));
        }
        for chunk in backlog {
            complete |= is_stream_complete(&chunk);
            yield Ok(Bytes::from(chunk));
            if complete {
                break;
            }
        }
        if !complete {
            if let Some(mut rx) = live {
                loop {
                    match rx.recv().await {
                        Ok(chunk) => {
                            let done = is_stream_complete(&chunk);
                            yield Ok(Bytes::from(chunk));
                            if done {
                                break;
                            }
                        }
                        // Lagged readers just skip ahead.
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    };
    Response::builder()
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn is_stream_complete(chunk: &[u8]) -> bool {
    String::from_utf8_lossy(chunk).contains(STREAM_COMPLETE)
}
