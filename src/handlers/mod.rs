pub(crate) mod blobs;
pub(crate) mod manifests;

use std::collections::HashMap;
use std::io;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::TryStreamExt;

use crate::error::RegistryError;
use crate::state::AppState;
use crate::storage::ByteStream;

/// Request classification by the trailing path segments. The repository
/// name is variadic, so the resource keyword is found from the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RegistryRoute {
    Blob { repo: String, digest: String },
    UploadStart { repo: String },
    Upload { repo: String, id: String },
    Manifest { repo: String, target: String },
    Tags { repo: String },
    Catalog,
}

pub(crate) fn classify(path: &str) -> Option<RegistryRoute> {
    let path = path.strip_prefix('/').unwrap_or(path);

    let mut segments: Vec<&str> = path.split('/').collect();
    // A trailing slash leaves one empty segment behind.
    if segments.last() == Some(&"") {
        segments.pop();
    }
    if segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    let n = segments.len();

    if n == 1 && segments[0] == "_catalog" {
        return Some(RegistryRoute::Catalog);
    }

    // The resource keyword sits in a fixed position from the end; only
    // the segments before it belong to the repository. A repo segment
    // that happens to be named "blobs" or "manifests" is just a repo
    // segment.
    if n >= 4 && segments[n - 3] == "blobs" && segments[n - 2] == "uploads" {
        return Some(RegistryRoute::Upload {
            repo: segments[..n - 3].join("/"),
            id: segments[n - 1].to_string(),
        });
    }

    if n >= 3 && segments[n - 2] == "blobs" && segments[n - 1] == "uploads" {
        return Some(RegistryRoute::UploadStart {
            repo: segments[..n - 2].join("/"),
        });
    }

    if n >= 3 && segments[n - 2] == "blobs" {
        return Some(RegistryRoute::Blob {
            repo: segments[..n - 2].join("/"),
            digest: segments[n - 1].to_string(),
        });
    }

    if n >= 3 && segments[n - 2] == "manifests" {
        return Some(RegistryRoute::Manifest {
            repo: segments[..n - 2].join("/"),
            target: segments[n - 1].to_string(),
        });
    }

    if n >= 3 && segments[n - 2] == "tags" && segments[n - 1] == "list" {
        return Some(RegistryRoute::Tags {
            repo: segments[..n - 2].join("/"),
        });
    }

    None
}

/// The API version probe answers every method.
pub(crate) async fn api_version() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Docker-Distribution-API-Version", "registry/2.0")],
        "",
    )
}

pub(crate) async fn dispatch(
    method: Method,
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let request_path = format!("{}/v2/{path}", state.base_path);
    let access_log = state.access_log;

    let outcome = route(method.clone(), state, &path, params, headers, body).await;
    match outcome {
        Ok(response) => {
            if access_log {
                log::info!("{method} {request_path} {}", response.status());
            }
            response
        }
        Err(error) => {
            if error.status().is_server_error() {
                log::error!(
                    "{method} {request_path} {} {} {}",
                    error.status(),
                    error.code().as_str(),
                    error.message()
                );
            } else if access_log {
                log::info!(
                    "{method} {request_path} {} {} {}",
                    error.status(),
                    error.code().as_str(),
                    error.message()
                );
            }
            error.into_response()
        }
    }
}

async fn route(
    method: Method,
    state: AppState,
    path: &str,
    params: HashMap<String, String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, RegistryError> {
    let route = classify(path).ok_or_else(RegistryError::route_unknown)?;

    match route {
        RegistryRoute::Blob { repo, digest } => match method {
            Method::HEAD => blobs::head(state, repo, digest).await,
            Method::GET => blobs::get(state, repo, digest).await,
            _ => Err(RegistryError::method_unknown()),
        },
        RegistryRoute::UploadStart { repo } => match method {
            Method::POST => blobs::start_upload(state, repo, params, headers, body).await,
            _ => Err(RegistryError::method_unknown()),
        },
        RegistryRoute::Upload { repo, id } => match method {
            Method::GET => blobs::upload_status(state, repo, id).await,
            Method::PATCH => blobs::patch_upload(state, repo, id, headers, body).await,
            Method::PUT => blobs::put_upload(state, repo, id, params, body).await,
            Method::DELETE => blobs::abort_upload(state, id).await,
            _ => Err(RegistryError::method_unknown()),
        },
        RegistryRoute::Manifest { repo, target } => match method {
            Method::GET | Method::HEAD => {
                manifests::get(method, state, repo, target).await
            }
            Method::PUT => manifests::put(state, repo, target, headers, body).await,
            Method::DELETE => manifests::delete(state, repo, target).await,
            _ => Err(RegistryError::method_unknown()),
        },
        RegistryRoute::Tags { repo } => match method {
            Method::GET => manifests::tags(state, repo, params).await,
            _ => Err(RegistryError::method_unknown()),
        },
        RegistryRoute::Catalog => match method {
            Method::GET => manifests::catalog(state, params).await,
            _ => Err(RegistryError::method_unknown()),
        },
    }
}

pub(crate) fn insert_header(
    headers: &mut HeaderMap,
    name: &'static str,
    value: &str,
) -> Result<(), RegistryError> {
    let header_name = header::HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| RegistryError::internal(format!("invalid header name {name}: {e}")))?;
    let header_value = header::HeaderValue::from_str(value)
        .map_err(|e| RegistryError::internal(format!("invalid header value for {name}: {e}")))?;
    headers.insert(header_name, header_value);
    Ok(())
}

/// The request body as the engines' stream type.
pub(crate) fn body_stream(body: Body) -> ByteStream {
    Box::pin(
        body.into_data_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
    )
}

/// `Content-Length` as declared by the client, when present and sane.
pub(crate) fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}
