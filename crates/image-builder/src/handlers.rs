//! API handlers for the image builder service

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequestParts, MatchedPath, Path, Query, Request, State,
    },
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use image_builder_common::{Error, Identity, IdentityError, IDENTITY_HEADER};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::compose::ComposeService;
use crate::models::{
    BlueprintRequest, BlueprintsResponse, ClonesResponse, ComposeBlueprintRequest,
    ComposeRequest, ComposesResponse, CloneRequest, Links, ListMeta,
};
use crate::storage::{BlueprintFilter, Page};

/// Prefix used in pagination links.
pub const API_PREFIX: &str = "/api/image-builder/v1";

const DEFAULT_LIMIT: i64 = 100;

/// Shared application state
pub struct AppState {
    pub service: ComposeService,
}

/// API Error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message
        });

        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status =
            StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        match &err {
            Error::Downstream { detail, .. } if status.is_server_error() => {
                error!(status = status.as_u16(), detail = %detail, "Request failed: {}", err)
            }
            _ if status.is_server_error() => error!("Request failed: {:?}", err),
            _ => debug!(status = status.as_u16(), "Request rejected: {}", err),
        }

        ApiError {
            status,
            message: err.public_message(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        let status = match err {
            IdentityError::Associate => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNAUTHORIZED,
        };
        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

/// Identity of the caller, decoded from the identity header.
pub struct Caller(pub Identity);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(IDENTITY_HEADER)
            .ok_or(IdentityError::Missing)?
            .to_str()
            .map_err(|e| IdentityError::Malformed(e.to_string()))?;

        Ok(Caller(Identity::from_header(value)?))
    }
}

fn parse_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::bad_request(format!("Invalid id: {}", id)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListParams {
    fn page(&self) -> Result<Page, ApiError> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        let offset = self.offset.unwrap_or(0);
        if limit < 0 || offset < 0 {
            return Err(ApiError::bad_request("limit and offset must not be negative"));
        }
        Ok(Page { limit, offset })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BlueprintListParams {
    pub name: Option<String>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BlueprintParams {
    pub version: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BlueprintComposesParams {
    pub version: Option<i32>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn links(path: &str, page: Page, count: i64) -> Links {
    let last_offset = (count - 1).max(0);
    Links {
        first: format!("{}{}?offset=0&limit={}", API_PREFIX, path, page.limit),
        last: format!("{}{}?offset={}&limit={}", API_PREFIX, path, last_offset, page.limit),
    }
}

/// Health check
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "image-builder"
    }))
}

/// Prometheus text exposition
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let text = state.service.metrics.render().map_err(Error::Other)?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response())
}

/// Record request durations by route.
pub async fn track_duration(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let start = Instant::now();
    let response = next.run(request).await;
    state
        .service
        .metrics
        .observe_request(&path, start.elapsed().as_secs_f64());

    response
}

pub async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "version": "1.0" }))
}

pub async fn ready_handler(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    state.service.ready().await?;
    Ok(Json(serde_json::json!({ "readiness": "ready" })))
}

pub async fn distributions_handler(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
) -> impl IntoResponse {
    Json(state.service.distributions(&identity))
}

pub async fn architectures_handler(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(distribution): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.architectures(&identity, &distribution)?))
}

/// Submit a compose
pub async fn compose_handler(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    payload: Result<Json<ComposeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    info!(org_id = %identity.org_id, distribution = %request.distribution, "Compose requested");

    let response = state.service.compose(&identity, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn composes_handler(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params?;
    let page = params.page()?;

    let (data, count) = state.service.composes(&identity, page).await?;
    Ok(Json(ComposesResponse {
        meta: ListMeta { count },
        links: links("/composes", page, count),
        data,
    }))
}

pub async fn compose_status_handler(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.service.compose_status(&identity, id).await?))
}

pub async fn delete_compose_handler(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    state.service.delete_compose(&identity, id).await?;
    Ok(StatusCode::OK)
}

pub async fn compose_metadata_handler(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.service.compose_metadata(&identity, id).await?))
}

pub async fn clone_compose_handler(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(id): Path<String>,
    payload: Result<Json<CloneRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let Json(request) = payload?;

    let response = state.service.clone_compose(&identity, id, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn compose_clones_handler(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(id): Path<String>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let Query(params) = params?;
    let page = params.page()?;

    let (data, count) = state.service.clones(&identity, id, page).await?;
    Ok(Json(ClonesResponse {
        meta: ListMeta { count },
        links: links(&format!("/composes/{}/clones", id), page, count),
        data,
    }))
}

pub async fn clone_status_handler(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.service.clone_status(&identity, id).await?))
}

pub async fn create_blueprint_handler(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    payload: Result<Json<BlueprintRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    let response = state.service.create_blueprint(&identity, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn blueprints_handler(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    params: Result<Query<BlueprintListParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params?;
    let page = ListParams {
        limit: params.limit,
        offset: params.offset,
    }
    .page()?;
    let filter = BlueprintFilter {
        name: params.name,
        search: params.search,
    };

    let (data, count) = state.service.blueprints(&identity, &filter, page).await?;
    Ok(Json(BlueprintsResponse {
        meta: ListMeta { count },
        links: links("/blueprints", page, count),
        data,
    }))
}

pub async fn get_blueprint_handler(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(id): Path<String>,
    params: Result<Query<BlueprintParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let Query(params) = params?;
    Ok(Json(
        state
            .service
            .get_blueprint(&identity, id, params.version)
            .await?,
    ))
}

pub async fn export_blueprint_handler(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.service.export_blueprint(&identity, id).await?))
}

pub async fn update_blueprint_handler(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(id): Path<String>,
    payload: Result<Json<BlueprintRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let Json(request) = payload?;
    Ok(Json(state.service.update_blueprint(&identity, id, request).await?))
}

pub async fn delete_blueprint_handler(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    state.service.delete_blueprint(&identity, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Compose a blueprint. The body is optional.
pub async fn compose_blueprint_handler(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(id): Path<String>,
    payload: Option<Json<ComposeBlueprintRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let request = payload.map(|Json(r)| r).unwrap_or_default();

    let composes = state.service.compose_blueprint(&identity, id, request).await?;
    Ok((StatusCode::CREATED, Json(composes)))
}

pub async fn blueprint_composes_handler(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(id): Path<String>,
    params: Result<Query<BlueprintComposesParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let Query(params) = params?;
    let page = ListParams {
        limit: params.limit,
        offset: params.offset,
    }
    .page()?;

    let (data, count) = state
        .service
        .blueprint_composes(&identity, id, params.version, page)
        .await?;
    Ok(Json(ComposesResponse {
        meta: ListMeta { count },
        links: links(&format!("/blueprints/{}/composes", id), page, count),
        data,
    }))
}
