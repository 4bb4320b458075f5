//! Reference backend. Everything lives in process memory behind one lock,
//! which makes every operation linearizable; content is collected off the
//! wire before the lock is taken so a blob is never observable until its
//! verification has passed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, TryStreamExt};

use crate::digest::Digest;
use crate::storage::{
    BlobGetter, BlobStatter, BlobWriter, ByteStream, CatalogLister, Manifest, ManifestDeleter,
    ManifestGetter, ManifestTagDeleter, ManifestTagGetter, ManifestTagger, ManifestWriter,
    StorageBackend, StorageError, TagLister, UploadFinalizer, UploadStore,
};
use crate::verify::VerifyingStream;

#[derive(Default)]
struct MemState {
    blobs: HashMap<String, Bytes>,
    uploads: HashMap<String, Vec<u8>>,
    manifests: HashMap<String, HashMap<String, Manifest>>,
}

#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<MemState>,
}

impl InMemoryBackend {
    /// A descriptor advertising every capability this backend has, which
    /// is all of them.
    pub fn into_backend(self) -> StorageBackend {
        let shared = Arc::new(self);
        StorageBackend {
            blobs: shared.clone(),
            blob_stat: Some(shared.clone()),
            blob_put: Some(shared.clone()),
            uploads: Some(shared.clone()),
            upload_finalize: Some(shared.clone()),
            manifests: shared.clone(),
            manifest_tags: Some(shared.clone()),
            manifest_put: Some(shared.clone()),
            manifest_tag: Some(shared.clone()),
            manifest_delete: Some(shared.clone()),
            manifest_tag_delete: Some(shared.clone()),
            tags: Some(shared.clone()),
            catalog: Some(shared),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn collect(mut stream: ByteStream) -> Result<Vec<u8>, StorageError> {
    let mut buf = Vec::new();
    while let Some(chunk) = stream.try_next().await? {
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

fn bytes_stream(bytes: Bytes) -> ByteStream {
    Box::pin(stream::iter([Ok::<_, std::io::Error>(bytes)]))
}

#[async_trait]
impl BlobGetter for InMemoryBackend {
    async fn get_blob(&self, _repo: &str, digest: &Digest) -> Result<ByteStream, StorageError> {
        let state = self.lock();
        let bytes = state
            .blobs
            .get(&digest.to_string())
            .cloned()
            .ok_or(StorageError::NotFound)?;
        Ok(bytes_stream(bytes))
    }
}

#[async_trait]
impl BlobStatter for InMemoryBackend {
    async fn stat_blob(&self, _repo: &str, digest: &Digest) -> Result<u64, StorageError> {
        let state = self.lock();
        let bytes = state
            .blobs
            .get(&digest.to_string())
            .ok_or(StorageError::NotFound)?;
        Ok(bytes.len() as u64)
    }
}

#[async_trait]
impl BlobWriter for InMemoryBackend {
    async fn put_blob(
        &self,
        _repo: &str,
        digest: &Digest,
        content: ByteStream,
    ) -> Result<(), StorageError> {
        let all = collect(content).await?;
        self.lock().blobs.insert(digest.to_string(), Bytes::from(all));
        Ok(())
    }
}

#[async_trait]
impl UploadStore for InMemoryBackend {
    async fn create_upload(&self, upload_id: &str) -> Result<(), StorageError> {
        self.lock().uploads.insert(upload_id.to_string(), Vec::new());
        Ok(())
    }

    async fn stat_upload(&self, upload_id: &str) -> Result<u64, StorageError> {
        let state = self.lock();
        let have = state.uploads.get(upload_id).ok_or(StorageError::NotFound)?;
        Ok(have.len() as u64)
    }

    async fn append_upload(
        &self,
        upload_id: &str,
        chunk: ByteStream,
    ) -> Result<u64, StorageError> {
        if !self.lock().uploads.contains_key(upload_id) {
            return Err(StorageError::NotFound);
        }
        let next = collect(chunk).await?;
        let mut state = self.lock();
        let have = state
            .uploads
            .get_mut(upload_id)
            .ok_or(StorageError::NotFound)?;
        have.extend_from_slice(&next);
        Ok(have.len() as u64)
    }

    async fn finish_upload(
        &self,
        upload_id: &str,
        trailer: ByteStream,
    ) -> Result<(ByteStream, u64), StorageError> {
        if !self.lock().uploads.contains_key(upload_id) {
            return Err(StorageError::NotFound);
        }
        let last = collect(trailer).await?;
        let mut all = self
            .lock()
            .uploads
            .remove(upload_id)
            .ok_or(StorageError::NotFound)?;
        all.extend_from_slice(&last);
        let size = all.len() as u64;
        Ok((bytes_stream(Bytes::from(all)), size))
    }

    async fn abort_upload(&self, upload_id: &str) -> Result<(), StorageError> {
        self.lock()
            .uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }
}

#[async_trait]
impl UploadFinalizer for InMemoryBackend {
    async fn finalize_upload(
        &self,
        _repo: &str,
        upload_id: &str,
        trailer: ByteStream,
        digest: &Digest,
    ) -> Result<(), StorageError> {
        if !self.lock().uploads.contains_key(upload_id) {
            return Err(StorageError::NotFound);
        }
        let last = collect(trailer).await?;
        // The session terminates here whether or not verification passes.
        let mut all = self
            .lock()
            .uploads
            .remove(upload_id)
            .ok_or(StorageError::NotFound)?;
        all.extend_from_slice(&last);

        let size = all.len() as u64;
        let verified = VerifyingStream::new(
            stream::iter([Ok::<_, std::io::Error>(Bytes::from(all))]),
            digest.clone(),
            Some(size),
        );
        let all = collect(Box::pin(verified)).await?;
        self.lock().blobs.insert(digest.to_string(), Bytes::from(all));
        Ok(())
    }
}

#[async_trait]
impl ManifestGetter for InMemoryBackend {
    async fn get_manifest_by_digest(
        &self,
        repo: &str,
        digest: &str,
    ) -> Result<Manifest, StorageError> {
        let state = self.lock();
        state
            .manifests
            .get(repo)
            .and_then(|repo| repo.get(digest))
            .cloned()
            .ok_or(StorageError::NotFound)
    }
}

#[async_trait]
impl ManifestTagGetter for InMemoryBackend {
    async fn get_manifest_by_tag(&self, repo: &str, tag: &str) -> Result<Manifest, StorageError> {
        self.get_manifest_by_digest(repo, tag).await
    }
}

#[async_trait]
impl ManifestWriter for InMemoryBackend {
    async fn put_manifest(
        &self,
        repo: &str,
        digest: &str,
        manifest: Manifest,
    ) -> Result<(), StorageError> {
        let mut state = self.lock();
        state
            .manifests
            .entry(repo.to_string())
            .or_default()
            .insert(digest.to_string(), manifest);
        Ok(())
    }
}

#[async_trait]
impl ManifestTagger for InMemoryBackend {
    async fn tag_manifest(
        &self,
        repo: &str,
        digest: &str,
        tag: &str,
    ) -> Result<(), StorageError> {
        let mut state = self.lock();
        let repo_manifests = state.manifests.get_mut(repo).ok_or(StorageError::NotFound)?;
        let manifest = repo_manifests
            .get(digest)
            .cloned()
            .ok_or(StorageError::NotFound)?;
        repo_manifests.insert(tag.to_string(), manifest);
        Ok(())
    }
}

#[async_trait]
impl ManifestDeleter for InMemoryBackend {
    async fn delete_manifest(&self, repo: &str, digest: &str) -> Result<(), StorageError> {
        let mut state = self.lock();
        state
            .manifests
            .get_mut(repo)
            .and_then(|repo| repo.remove(digest))
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }
}

#[async_trait]
impl ManifestTagDeleter for InMemoryBackend {
    async fn delete_manifest_by_tag(&self, repo: &str, tag: &str) -> Result<(), StorageError> {
        self.delete_manifest(repo, tag).await
    }
}

#[async_trait]
impl TagLister for InMemoryBackend {
    async fn list_tags(&self, repo: &str, limit: usize) -> Result<Vec<String>, StorageError> {
        let state = self.lock();
        let repo_manifests = state.manifests.get(repo).ok_or(StorageError::NotFound)?;
        let mut tags: Vec<String> = repo_manifests
            .keys()
            .filter(|key| !key.contains("sha256:"))
            .cloned()
            .collect();
        tags.sort();
        tags.truncate(limit);
        Ok(tags)
    }
}

#[async_trait]
impl CatalogLister for InMemoryBackend {
    async fn catalog(&self, limit: usize) -> Result<Vec<String>, StorageError> {
        let state = self.lock();
        let mut repos: Vec<String> = state.manifests.keys().cloned().collect();
        repos.sort();
        repos.truncate(limit);
        Ok(repos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::VerifyError;

    fn chunk(data: &[u8]) -> ByteStream {
        bytes_stream(Bytes::copy_from_slice(data))
    }

    #[tokio::test]
    async fn blob_put_then_get() {
        let backend = InMemoryBackend::default();
        let digest = Digest::of_bytes(b"content");
        backend.put_blob("r", &digest, chunk(b"content")).await.unwrap();

        assert_eq!(backend.stat_blob("r", &digest).await.unwrap(), 7);
        let got = collect(backend.get_blob("r", &digest).await.unwrap())
            .await
            .unwrap();
        assert_eq!(got, b"content");
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let backend = InMemoryBackend::default();
        let digest = Digest::of_bytes(b"nope");
        assert!(matches!(
            backend.get_blob("r", &digest).await,
            Err(StorageError::NotFound)
        ));
        assert!(matches!(
            backend.stat_blob("r", &digest).await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn upload_lifecycle() {
        let backend = InMemoryBackend::default();
        backend.create_upload("u1").await.unwrap();
        assert_eq!(backend.stat_upload("u1").await.unwrap(), 0);

        assert_eq!(backend.append_upload("u1", chunk(b"hel")).await.unwrap(), 3);
        assert_eq!(backend.append_upload("u1", chunk(b"lo")).await.unwrap(), 5);

        let (content, size) = backend.finish_upload("u1", chunk(b"!")).await.unwrap();
        assert_eq!(size, 6);
        assert_eq!(collect(content).await.unwrap(), b"hello!");

        // Finished ids are gone.
        assert!(matches!(
            backend.stat_upload("u1").await,
            Err(StorageError::NotFound)
        ));
        assert!(matches!(
            backend.append_upload("u1", chunk(b"x")).await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn abort_terminates_session() {
        let backend = InMemoryBackend::default();
        backend.create_upload("u1").await.unwrap();
        backend.abort_upload("u1").await.unwrap();
        assert!(matches!(
            backend.abort_upload("u1").await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn finalize_verifies_and_promotes() {
        let backend = InMemoryBackend::default();
        backend.create_upload("u1").await.unwrap();
        backend.append_upload("u1", chunk(b"hel")).await.unwrap();

        let digest = Digest::of_bytes(b"hello");
        backend
            .finalize_upload("r", "u1", chunk(b"lo"), &digest)
            .await
            .unwrap();
        assert_eq!(backend.stat_blob("r", &digest).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn finalize_mismatch_leaves_no_blob() {
        let backend = InMemoryBackend::default();
        backend.create_upload("u1").await.unwrap();

        let digest = Digest::of_bytes(b"expected");
        let err = backend
            .finalize_upload("r", "u1", chunk(b"actual"), &digest)
            .await
            .unwrap_err();
        assert!(matches!(
            err.verification_failure(),
            Some(VerifyError::DigestMismatch { .. })
        ));
        assert!(matches!(
            backend.stat_blob("r", &digest).await,
            Err(StorageError::NotFound)
        ));
        // The session terminated regardless.
        assert!(matches!(
            backend.stat_upload("u1").await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn tagging_aliases_stored_bytes() {
        let backend = InMemoryBackend::default();
        let manifest = Manifest {
            content_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
            bytes: Bytes::from_static(b"{}"),
        };
        backend.put_manifest("r", "sha256:abc", manifest).await.unwrap();
        backend.tag_manifest("r", "sha256:abc", "latest").await.unwrap();

        let by_tag = backend.get_manifest_by_tag("r", "latest").await.unwrap();
        let by_digest = backend
            .get_manifest_by_digest("r", "sha256:abc")
            .await
            .unwrap();
        assert_eq!(by_tag.bytes, by_digest.bytes);

        assert!(matches!(
            backend.tag_manifest("r", "sha256:missing", "t").await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn tags_are_sorted_capped_and_exclude_digest_keys() {
        let backend = InMemoryBackend::default();
        let manifest = Manifest {
            content_type: String::new(),
            bytes: Bytes::from_static(b"{}"),
        };
        for key in ["zeta", "alpha", "mid", "sha256:abc"] {
            backend.put_manifest("r", key, manifest.clone()).await.unwrap();
        }

        assert_eq!(
            backend.list_tags("r", 10).await.unwrap(),
            vec!["alpha", "mid", "zeta"]
        );
        assert_eq!(
            backend.list_tags("r", 2).await.unwrap(),
            vec!["alpha", "mid"]
        );
        assert!(matches!(
            backend.list_tags("missing", 10).await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn catalog_is_sorted_and_capped() {
        let backend = InMemoryBackend::default();
        let manifest = Manifest {
            content_type: String::new(),
            bytes: Bytes::from_static(b"{}"),
        };
        for repo in ["z", "a", "m"] {
            backend.put_manifest(repo, "latest", manifest.clone()).await.unwrap();
        }

        assert_eq!(backend.catalog(10).await.unwrap(), vec!["a", "m", "z"]);
        assert_eq!(backend.catalog(2).await.unwrap(), vec!["a", "m"]);
    }
}
