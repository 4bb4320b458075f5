//! Blob reads and the upload state machine.
//!
//! Reads prefer a stat fast path and honor backend redirects. Writes go
//! through `POST /blobs/uploads/`: monolithic when a `digest` query is
//! present, otherwise a session of `PATCH` appends closed by a `PUT`.
//! Every byte headed for blob storage passes a verifying stream first.

use std::collections::HashMap;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::TryStreamExt;
use uuid::Uuid;

use crate::digest::Digest;
use crate::error::RegistryError;
use crate::handlers::{body_stream, content_length, insert_header};
use crate::state::AppState;
use crate::storage::{ByteStream, StorageError};
use crate::verify::VerifyingStream;

const MISMATCH_MESSAGE: &str = "digest does not match contents";

fn parse_digest(raw: &str) -> Result<Digest, RegistryError> {
    raw.parse()
        .map_err(|_| RegistryError::name_invalid("invalid digest"))
}

fn redirect_response(location: &str, code: u16) -> Result<Response, RegistryError> {
    let status = StatusCode::from_u16(code)
        .map_err(|_| RegistryError::internal(format!("backend returned bad redirect code {code}")))?;
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, "Location", location)?;
    Ok((status, headers, Body::empty()).into_response())
}

/// Successful blob reads either produce a value or a redirect the client
/// must follow; everything else is an error.
enum BlobRead<T> {
    Found(T),
    Redirect(Response),
}

fn classify_read<T>(result: Result<T, StorageError>) -> Result<BlobRead<T>, RegistryError> {
    match result {
        Ok(value) => Ok(BlobRead::Found(value)),
        Err(StorageError::NotFound) => Err(RegistryError::blob_unknown()),
        Err(StorageError::Redirect { location, code }) => {
            Ok(BlobRead::Redirect(redirect_response(&location, code)?))
        }
        Err(err) => Err(RegistryError::internal(err)),
    }
}

async fn measure(mut stream: ByteStream) -> Result<u64, RegistryError> {
    let mut size = 0u64;
    while let Some(chunk) = stream
        .try_next()
        .await
        .map_err(RegistryError::internal)?
    {
        size += chunk.len() as u64;
    }
    Ok(size)
}

/// Blob size via the stat capability, or by draining a `Get` when the
/// backend cannot report size without reading.
async fn resolve_size(
    state: &AppState,
    repo: &str,
    digest: &Digest,
) -> Result<BlobRead<u64>, RegistryError> {
    if let Some(statter) = &state.backend.blob_stat {
        return classify_read(statter.stat_blob(repo, digest).await);
    }
    match classify_read(state.backend.blobs.get_blob(repo, digest).await)? {
        BlobRead::Found(stream) => Ok(BlobRead::Found(measure(stream).await?)),
        BlobRead::Redirect(response) => Ok(BlobRead::Redirect(response)),
    }
}

fn blob_headers(digest: &Digest, size: u64) -> Result<HeaderMap, RegistryError> {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, "Content-Length", &size.to_string())?;
    insert_header(&mut headers, "Docker-Content-Digest", &digest.to_string())?;
    Ok(headers)
}

pub(crate) async fn head(
    state: AppState,
    repo: String,
    target: String,
) -> Result<Response, RegistryError> {
    let digest = parse_digest(&target)?;
    let size = match resolve_size(&state, &repo, &digest).await? {
        BlobRead::Found(size) => size,
        BlobRead::Redirect(response) => return Ok(response),
    };
    let headers = blob_headers(&digest, size)?;
    Ok((StatusCode::OK, headers, Body::empty()).into_response())
}

pub(crate) async fn get(
    state: AppState,
    repo: String,
    target: String,
) -> Result<Response, RegistryError> {
    let digest = parse_digest(&target)?;

    if state.backend.blob_stat.is_some() {
        let size = match resolve_size(&state, &repo, &digest).await? {
            BlobRead::Found(size) => size,
            BlobRead::Redirect(response) => return Ok(response),
        };
        let stream = match classify_read(state.backend.blobs.get_blob(&repo, &digest).await)? {
            BlobRead::Found(stream) => stream,
            BlobRead::Redirect(response) => return Ok(response),
        };
        let headers = blob_headers(&digest, size)?;
        return Ok((StatusCode::OK, headers, Body::from_stream(stream)).into_response());
    }

    // No stat capability: buffer to learn the size.
    let mut stream = match classify_read(state.backend.blobs.get_blob(&repo, &digest).await)? {
        BlobRead::Found(stream) => stream,
        BlobRead::Redirect(response) => return Ok(response),
    };
    let mut buf = Vec::new();
    while let Some(chunk) = stream
        .try_next()
        .await
        .map_err(RegistryError::internal)?
    {
        buf.extend_from_slice(&chunk);
    }
    let headers = blob_headers(&digest, buf.len() as u64)?;
    Ok((StatusCode::OK, headers, Body::from(buf)).into_response())
}

/// Verification failures are the client's fault; anything else from a
/// blob write is ours.
fn put_error(err: StorageError) -> RegistryError {
    if let Some(failure) = err.verification_failure() {
        log::info!("rejected blob write: {failure}");
        return RegistryError::digest_invalid(MISMATCH_MESSAGE);
    }
    RegistryError::internal(err)
}

fn upload_error(err: StorageError) -> RegistryError {
    match err {
        StorageError::NotFound => RegistryError::blob_upload_unknown("unknown upload"),
        err => RegistryError::internal(err),
    }
}

fn upload_headers(
    state: &AppState,
    repo: &str,
    id: &str,
    size: u64,
) -> Result<HeaderMap, RegistryError> {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, "Location", &state.upload_location(repo, id))?;
    insert_header(&mut headers, "Range", &format!("0-{}", size.saturating_sub(1)))?;
    insert_header(&mut headers, "Docker-Upload-UUID", id)?;
    insert_header(&mut headers, "Content-Length", "0")?;
    Ok(headers)
}

pub(crate) async fn start_upload(
    state: AppState,
    repo: String,
    params: HashMap<String, String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, RegistryError> {
    let Some(writer) = state.backend.blob_put.clone() else {
        return Err(RegistryError::unsupported());
    };

    // Mount hint: if the blob is already here, skip the upload entirely.
    // A miss falls through to a regular session start.
    if let Some(mount) = params.get("mount") {
        let digest: Digest = mount.parse().map_err(|_| {
            RegistryError::digest_invalid(format!("unsupported mount digest format: {mount}"))
        })?;
        if let Some(statter) = &state.backend.blob_stat {
            if statter.stat_blob(&repo, &digest).await.is_ok() {
                let mut response_headers = HeaderMap::new();
                insert_header(
                    &mut response_headers,
                    "Location",
                    &state.blob_location(&repo, &digest.to_string()),
                )?;
                insert_header(
                    &mut response_headers,
                    "Docker-Content-Digest",
                    &digest.to_string(),
                )?;
                insert_header(&mut response_headers, "Content-Length", "0")?;
                return Ok((StatusCode::CREATED, response_headers, Body::empty()).into_response());
            }
        }
    }

    if let Some(raw_digest) = params.get("digest") {
        let digest = parse_digest(raw_digest)?;
        let verified = VerifyingStream::new(
            body_stream(body),
            digest.clone(),
            content_length(&headers),
        );
        writer
            .put_blob(&repo, &digest, Box::pin(verified))
            .await
            .map_err(put_error)?;

        let mut response_headers = HeaderMap::new();
        insert_header(
            &mut response_headers,
            "Docker-Content-Digest",
            &digest.to_string(),
        )?;
        insert_header(&mut response_headers, "Content-Length", "0")?;
        return Ok((StatusCode::CREATED, response_headers, Body::empty()).into_response());
    }

    let Some(uploads) = state.backend.uploads.clone() else {
        // Only monolithic blob writes without session state.
        return Err(RegistryError::unsupported());
    };

    let id = Uuid::new_v4().to_string();
    uploads
        .create_upload(&id)
        .await
        .map_err(RegistryError::internal)?;

    let response_headers = upload_headers(&state, &repo, &id, 0)?;
    Ok((StatusCode::ACCEPTED, response_headers, Body::empty()).into_response())
}

pub(crate) async fn upload_status(
    state: AppState,
    repo: String,
    id: String,
) -> Result<Response, RegistryError> {
    let Some(uploads) = state.backend.uploads.clone() else {
        return Err(RegistryError::unsupported());
    };
    let size = uploads.stat_upload(&id).await.map_err(upload_error)?;
    let response_headers = upload_headers(&state, &repo, &id, size)?;
    Ok((StatusCode::NO_CONTENT, response_headers, Body::empty()).into_response())
}

/// `Content-Range: <start>-<end>`, both required.
fn parse_content_range(raw: &str) -> Option<(u64, u64)> {
    let (start, end) = raw.trim().split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}

pub(crate) async fn patch_upload(
    state: AppState,
    repo: String,
    id: String,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, RegistryError> {
    let Some(uploads) = state.backend.uploads.clone() else {
        return Err(RegistryError::unsupported());
    };

    let size = uploads.stat_upload(&id).await.map_err(upload_error)?;

    match headers.get("Content-Range").and_then(|v| v.to_str().ok()) {
        Some(raw) => {
            let (start, _end) = parse_content_range(raw).ok_or_else(|| {
                RegistryError::blob_upload_unknown("could not parse content range")
            })?;
            if start != size {
                return Err(RegistryError::blob_upload_unknown(format!(
                    "range start {start} does not match current upload size {size}"
                )));
            }
        }
        None => {
            if size != 0 {
                return Err(RegistryError::blob_upload_invalid(
                    "stream uploads after the first write are not allowed",
                ));
            }
        }
    }

    let new_size = uploads
        .append_upload(&id, body_stream(body))
        .await
        .map_err(upload_error)?;

    let response_headers = upload_headers(&state, &repo, &id, new_size)?;
    Ok((StatusCode::NO_CONTENT, response_headers, Body::empty()).into_response())
}

pub(crate) async fn put_upload(
    state: AppState,
    repo: String,
    id: String,
    params: HashMap<String, String>,
    body: Body,
) -> Result<Response, RegistryError> {
    let Some(uploads) = state.backend.uploads.clone() else {
        return Err(RegistryError::unsupported());
    };
    let raw_digest = params
        .get("digest")
        .ok_or_else(|| RegistryError::digest_invalid("digest not specified"))?;
    let digest = parse_digest(raw_digest)?;

    if let Some(finalizer) = state.backend.upload_finalize.clone() {
        // One verifying pass over the total stream, inside the backend.
        match finalizer
            .finalize_upload(&repo, &id, body_stream(body), &digest)
            .await
        {
            Ok(()) => {}
            Err(StorageError::NotFound) => {
                return Err(RegistryError::blob_upload_unknown("unknown upload"))
            }
            Err(err) => return Err(put_error(err)),
        }
    } else {
        let Some(writer) = state.backend.blob_put.clone() else {
            return Err(RegistryError::unsupported());
        };
        let (content, size) = uploads
            .finish_upload(&id, body_stream(body))
            .await
            .map_err(upload_error)?;
        let verified = VerifyingStream::new(content, digest.clone(), Some(size));
        writer
            .put_blob(&repo, &digest, Box::pin(verified))
            .await
            .map_err(put_error)?;
    }

    let mut response_headers = HeaderMap::new();
    insert_header(
        &mut response_headers,
        "Location",
        &state.blob_location(&repo, &digest.to_string()),
    )?;
    insert_header(
        &mut response_headers,
        "Docker-Content-Digest",
        &digest.to_string(),
    )?;
    insert_header(&mut response_headers, "Content-Length", "0")?;
    Ok((StatusCode::CREATED, response_headers, Body::empty()).into_response())
}

pub(crate) async fn abort_upload(state: AppState, id: String) -> Result<Response, RegistryError> {
    let Some(uploads) = state.backend.uploads.clone() else {
        return Err(RegistryError::unsupported());
    };
    uploads.abort_upload(&id).await.map_err(upload_error)?;

    let mut response_headers = HeaderMap::new();
    insert_header(&mut response_headers, "Content-Length", "0")?;
    Ok((StatusCode::NO_CONTENT, response_headers, Body::empty()).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_range_parses_plain_ranges() {
        assert_eq!(parse_content_range("0-4"), Some((0, 4)));
        assert_eq!(parse_content_range(" 5-9 "), Some((5, 9)));
    }

    #[test]
    fn content_range_rejects_partial_input() {
        assert_eq!(parse_content_range("5"), None);
        assert_eq!(parse_content_range("-5"), None);
        assert_eq!(parse_content_range("a-b"), None);
        assert_eq!(parse_content_range(""), None);
    }
}
