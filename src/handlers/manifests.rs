//! Manifest reads and writes, tag listing, and the repository catalog.

use std::collections::HashMap;

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::digest::{is_digest_reference, Digest};
use crate::error::RegistryError;
use crate::handlers::insert_header;
use crate::mediatypes;
use crate::state::AppState;
use crate::storage::{Manifest, StorageError};

const MAX_MANIFEST_BYTES: usize = 32 * 1024 * 1024;

const DEFAULT_TAG_LIMIT: usize = 1000;
const DEFAULT_CATALOG_LIMIT: usize = 10_000;

/// The slice of an index manifest the registry inspects: child descriptors
/// by media type and digest.
#[derive(Deserialize)]
struct ImageIndex {
    #[serde(default)]
    manifests: Vec<IndexDescriptor>,
}

#[derive(Deserialize)]
struct IndexDescriptor {
    #[serde(rename = "mediaType", default)]
    media_type: String,
    #[serde(default)]
    digest: String,
}

#[derive(Serialize)]
struct TagList<'a> {
    name: &'a str,
    tags: Vec<String>,
}

#[derive(Serialize)]
struct Catalog {
    repositories: Vec<String>,
}

fn manifest_unknown_error(err: StorageError) -> RegistryError {
    match err {
        StorageError::NotFound => RegistryError::manifest_unknown("unknown manifest"),
        err => RegistryError::internal(err),
    }
}

async fn resolve(
    state: &AppState,
    repo: &str,
    target: &str,
) -> Result<Manifest, RegistryError> {
    if is_digest_reference(target) {
        return state
            .backend
            .manifests
            .get_manifest_by_digest(repo, target)
            .await
            .map_err(manifest_unknown_error);
    }
    let Some(by_tag) = &state.backend.manifest_tags else {
        return Err(RegistryError::unsupported());
    };
    by_tag
        .get_manifest_by_tag(repo, target)
        .await
        .map_err(manifest_unknown_error)
}

pub(crate) async fn get(
    method: Method,
    state: AppState,
    repo: String,
    target: String,
) -> Result<Response, RegistryError> {
    let manifest = resolve(&state, &repo, &target).await?;
    let digest = Digest::of_bytes(&manifest.bytes);

    let mut headers = HeaderMap::new();
    insert_header(&mut headers, "Docker-Content-Digest", &digest.to_string())?;
    insert_header(&mut headers, "Content-Type", &manifest.content_type)?;
    insert_header(
        &mut headers,
        "Content-Length",
        &manifest.bytes.len().to_string(),
    )?;

    if method == Method::HEAD {
        return Ok((StatusCode::OK, headers, Body::empty()).into_response());
    }
    Ok((StatusCode::OK, headers, Body::from(manifest.bytes)).into_response())
}

/// An index only goes in once every child that is itself a manifest is
/// present in the same repository. Blob-typed children are noted but not
/// checked against blob storage.
async fn check_index_children(
    state: &AppState,
    repo: &str,
    bytes: &[u8],
) -> Result<(), RegistryError> {
    let index: ImageIndex = serde_json::from_slice(bytes)
        .map_err(|e| RegistryError::manifest_invalid(e.to_string()))?;

    for descriptor in &index.manifests {
        if !mediatypes::is_distributable(&descriptor.media_type) {
            continue;
        }
        if mediatypes::is_index(&descriptor.media_type)
            || mediatypes::is_image(&descriptor.media_type)
        {
            match state
                .backend
                .manifests
                .get_manifest_by_digest(repo, &descriptor.digest)
                .await
            {
                Ok(_) => {}
                Err(StorageError::NotFound) => {
                    return Err(RegistryError::manifest_unknown(format!(
                        "sub-manifest {} not found",
                        descriptor.digest
                    )));
                }
                Err(err) => return Err(RegistryError::internal(err)),
            }
        } else {
            log::debug!("not checking blob existence for {}", descriptor.digest);
        }
    }
    Ok(())
}

pub(crate) async fn put(
    state: AppState,
    repo: String,
    target: String,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, RegistryError> {
    let Some(writer) = state.backend.manifest_put.clone() else {
        return Err(RegistryError::unsupported());
    };

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let bytes = axum::body::to_bytes(body, MAX_MANIFEST_BYTES)
        .await
        .map_err(|e| RegistryError::manifest_invalid(format!("failed to read manifest: {e}")))?;

    let digest = Digest::of_bytes(&bytes);
    let digest_key = digest.to_string();

    // Pushing by digest pins the key to the content.
    if is_digest_reference(&target) && target != digest_key {
        return Err(RegistryError::digest_invalid(
            "digest does not match contents",
        ));
    }

    writer
        .put_manifest(
            &repo,
            &digest_key,
            Manifest {
                content_type: content_type.clone(),
                bytes: bytes.clone(),
            },
        )
        .await
        .map_err(manifest_unknown_error)?;

    if mediatypes::is_index(&content_type) {
        check_index_children(&state, &repo, &bytes).await?;
    }

    // Alias the digest under the tag so later pulls work by either key.
    if !is_digest_reference(&target) {
        if let Some(tagger) = &state.backend.manifest_tag {
            tagger
                .tag_manifest(&repo, &digest_key, &target)
                .await
                .map_err(manifest_unknown_error)?;
        }
    }

    let mut response_headers = HeaderMap::new();
    insert_header(&mut response_headers, "Docker-Content-Digest", &digest_key)?;
    insert_header(
        &mut response_headers,
        "Location",
        &state.manifest_location(&repo, &digest_key),
    )?;
    insert_header(&mut response_headers, "Content-Length", "0")?;
    Ok((StatusCode::CREATED, response_headers, Body::empty()).into_response())
}

pub(crate) async fn delete(
    state: AppState,
    repo: String,
    target: String,
) -> Result<Response, RegistryError> {
    if is_digest_reference(&target) {
        let Some(deleter) = state.backend.manifest_delete.clone() else {
            return Err(RegistryError::unsupported());
        };
        deleter
            .delete_manifest(&repo, &target)
            .await
            .map_err(manifest_unknown_error)?;
    } else {
        let Some(deleter) = state.backend.manifest_tag_delete.clone() else {
            return Err(RegistryError::unsupported());
        };
        deleter
            .delete_manifest_by_tag(&repo, &target)
            .await
            .map_err(manifest_unknown_error)?;
    }
    Ok((StatusCode::ACCEPTED, Body::empty()).into_response())
}

fn limit_param(params: &HashMap<String, String>, default: usize) -> usize {
    params
        .get("n")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn json_response(body: String) -> Result<Response, RegistryError> {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, "Content-Type", "application/json")?;
    insert_header(&mut headers, "Content-Length", &body.len().to_string())?;
    Ok((StatusCode::OK, headers, body).into_response())
}

pub(crate) async fn tags(
    state: AppState,
    repo: String,
    params: HashMap<String, String>,
) -> Result<Response, RegistryError> {
    let Some(lister) = state.backend.tags.clone() else {
        return Err(RegistryError::unsupported());
    };
    let limit = limit_param(&params, DEFAULT_TAG_LIMIT);

    let tags = match lister.list_tags(&repo, limit).await {
        Ok(tags) => tags,
        Err(StorageError::NotFound) => return Err(RegistryError::name_unknown()),
        Err(err) => return Err(RegistryError::internal(err)),
    };

    let body = serde_json::to_string(&TagList { name: &repo, tags })
        .map_err(RegistryError::internal)?;
    json_response(body)
}

pub(crate) async fn catalog(
    state: AppState,
    params: HashMap<String, String>,
) -> Result<Response, RegistryError> {
    let Some(lister) = state.backend.catalog.clone() else {
        return Err(RegistryError::unsupported());
    };
    let limit = limit_param(&params, DEFAULT_CATALOG_LIMIT);

    let repositories = lister.catalog(limit).await.map_err(RegistryError::internal)?;
    let body =
        serde_json::to_string(&Catalog { repositories }).map_err(RegistryError::internal)?;
    json_response(body)
}
