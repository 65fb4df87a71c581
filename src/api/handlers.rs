//! API handlers
//!
//! Every provider route dispatches on the `serve` query parameter: the
//! HTTP method picks the handler family (read, upload, action, delete)
//! and `serve` picks the operation within it.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::AppState;
use crate::item::Item;
use crate::provider::{
    copy_item, make_provider, move_item, parse_range_header, zip_folder, ConflictPolicy,
    StorageProvider, TransferOptions,
};
use crate::streams::{
    into_body, BoxByteStream, ByteStream, MeteredStreamReader, RequestStreamReader,
};
use crate::{Error, Result};

/// Query parameters shared by all provider routes.
#[derive(Debug, Default, Deserialize)]
pub struct ServeParams {
    pub serve: Option<String>,
    pub new_name: Option<String>,
    pub conflict: Option<String>,
    /// Destination identifier for copy/move.
    pub to: Option<String>,
    pub destination_provider: Option<String>,
    pub version: Option<String>,
}

impl ServeParams {
    fn conflict_policy(&self) -> Result<ConflictPolicy> {
        match &self.conflict {
            Some(raw) => raw.parse(),
            None => Ok(ConflictPolicy::default()),
        }
    }

    fn required_new_name(&self) -> Result<&str> {
        self.new_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::InvalidRequest("'new_name' is required".to_string()))
    }
}

/// Taxonomy-to-HTTP adapter. Internal failures are logged and masked.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
            "Internal server error".to_string()
        } else {
            self.0.to_string()
        };
        (
            status,
            Json(json!({ "code": status.as_u16(), "message": message })),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Health check.
pub async fn status() -> Json<Value> {
    Json(json!({ "status": "up", "version": env!("CARGO_PKG_VERSION") }))
}

/// Path params for both the provider-root route and the wildcard route.
#[derive(Debug, Deserialize)]
pub struct ProviderPath {
    provider: String,
    #[serde(default)]
    path: Option<String>,
}

impl ProviderPath {
    fn identifier(&self) -> String {
        match &self.path {
            Some(path) => format!("/{path}"),
            None => "/".to_string(),
        }
    }
}

async fn resolve(
    state: &AppState,
    route: &ProviderPath,
) -> Result<(Arc<dyn StorageProvider>, Item)> {
    let provider = make_provider(&route.provider, &state.config)?;
    let item = provider.validate_item(&route.identifier()).await?;
    Ok((provider, item))
}

/// GET: metadata (default), listings, content streams, and — so the
/// hypermedia action links are directly followable — the mutating
/// actions as well.
pub async fn handle_get(
    State(state): State<AppState>,
    Path(route): Path<ProviderPath>,
    Query(params): Query<ServeParams>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let (provider, item) = resolve(&state, &route).await?;
    let domain = &state.config.server.domain;

    match params.serve.as_deref().unwrap_or("meta") {
        "meta" => {
            let item = provider.metadata(&item, params.version.as_deref()).await?;
            Ok(document(&item, domain).into_response())
        }
        "children" => {
            let children = provider.children(&item).await?;
            Ok(listing(&children, domain).into_response())
        }
        "parent" => {
            let parent = provider.parent(&item).await?;
            Ok(document(&parent, domain).into_response())
        }
        "versions" => {
            let versions = provider.versions(&item).await?;
            Ok(listing(&versions, domain).into_response())
        }
        "download" => {
            let range = headers
                .get(header::RANGE)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_range_header);
            let stream = provider
                .download(&item, range, params.version.as_deref())
                .await?;
            let metered = MeteredStreamReader::download(stream, item.path.as_str());
            Ok(content_response(&item, Box::new(metered))?)
        }
        "download_as_zip" => {
            if !item.is_folder() {
                return Err(Error::invalid_path("only folders can be zipped").into());
            }
            let archive_name = if item.is_root() {
                format!("{}-archive", item.provider)
            } else {
                item.name()
            };
            let stream = zip_folder(provider, &item);
            let response = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/zip")
                .header(
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{archive_name}.zip\""),
                )
                .body(into_body(Box::new(stream)))
                .map_err(|err| Error::internal(err.to_string()))?;
            Ok(response)
        }
        action => perform_action(&state, &route, provider, &item, action, &params).await,
    }
}

/// PUT: upload a file into a folder. Returns 201 with the new item.
pub async fn handle_upload(
    State(state): State<AppState>,
    Path(route): Path<ProviderPath>,
    Query(params): Query<ServeParams>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Response> {
    let (provider, item) = resolve(&state, &route).await?;
    let new_name = params.required_new_name()?;
    let conflict = params.conflict_policy()?;

    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok());
    let stream: BoxByteStream = Box::new(RequestStreamReader::new(body, content_length));

    let uploaded = provider.upload(&item, stream, new_name, conflict).await?;
    Ok((
        StatusCode::CREATED,
        document(&uploaded, &state.config.server.domain),
    )
        .into_response())
}

/// POST: mutating actions dispatched on `serve`.
pub async fn handle_action(
    State(state): State<AppState>,
    Path(route): Path<ProviderPath>,
    Query(params): Query<ServeParams>,
) -> ApiResult<Response> {
    let (provider, item) = resolve(&state, &route).await?;
    let Some(action) = params.serve.as_deref() else {
        return Err(Error::InvalidRequest("'serve' is required".to_string()).into());
    };
    perform_action(&state, &route, provider, &item, action, &params).await
}

/// The mutating-action dispatch shared by GET and POST routes.
async fn perform_action(
    state: &AppState,
    route: &ProviderPath,
    provider: Arc<dyn StorageProvider>,
    item: &Item,
    action: &str,
    params: &ServeParams,
) -> ApiResult<Response> {
    let domain = &state.config.server.domain;

    match action {
        "delete" => {
            provider.delete(item).await?;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        "rename" => {
            let renamed = provider.rename(item, params.required_new_name()?).await?;
            Ok(document(&renamed, domain).into_response())
        }
        "create_folder" => {
            let created = provider
                .create_folder(item, params.required_new_name()?)
                .await?;
            Ok((StatusCode::CREATED, document(&created, domain)).into_response())
        }
        "copy" | "move" => {
            let Some(to) = params.to.as_deref() else {
                return Err(Error::InvalidRequest("'to' is required".to_string()).into());
            };
            let dest_name = params
                .destination_provider
                .as_deref()
                .unwrap_or(&route.provider);
            let dest = make_provider(dest_name, &state.config)?;
            let dest_folder = dest.validate_item(to).await?;
            if !dest_folder.is_folder() {
                return Err(Error::invalid_path("destination must be a folder").into());
            }
            let options = TransferOptions {
                concurrent_ops: state.config.transfer.concurrent_ops,
                conflict: params.conflict_policy()?,
            };
            let result = if action == "copy" {
                copy_item(provider.as_ref(), item, dest.as_ref(), &dest_folder, options).await?
            } else {
                move_item(provider.as_ref(), item, dest.as_ref(), &dest_folder, options).await?
            };
            Ok((StatusCode::CREATED, document(&result, domain)).into_response())
        }
        other => Err(Error::InvalidRequest(format!("unknown action '{other}'")).into()),
    }
}

/// DELETE: remove a file or folder subtree. Returns 204.
pub async fn handle_delete(
    State(state): State<AppState>,
    Path(route): Path<ProviderPath>,
) -> ApiResult<StatusCode> {
    let (provider, item) = resolve(&state, &route).await?;
    provider.delete(&item).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn document(item: &Item, domain: &str) -> Json<Value> {
    Json(json!({ "data": item.json_api_serialized(domain) }))
}

fn listing(items: &[Item], domain: &str) -> Json<Value> {
    let data: Vec<Value> = items
        .iter()
        .map(|item| item.json_api_serialized(domain))
        .collect();
    Json(json!({ "data": data }))
}

/// Stream file content back to the client, honoring partial reads.
fn content_response(item: &Item, stream: BoxByteStream) -> Result<Response> {
    let status = if stream.partial() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let content_type = stream
        .content_type()
        .or_else(|| item.mimetype().map(str::to_string))
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", item.name()),
        );
    if let Some(size) = stream.size() {
        builder = builder.header(header::CONTENT_LENGTH, size);
    }
    if let Some(content_range) = stream.content_range() {
        builder = builder.header(header::CONTENT_RANGE, content_range);
    }
    builder
        .body(into_body(stream))
        .map_err(|err| Error::internal(err.to_string()))
}
