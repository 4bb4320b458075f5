//! The storage seam the engines are written against.
//!
//! A backend advertises what it can do by filling in a
//! [`StorageBackend`] descriptor: the two getters every registry needs,
//! plus an optional trait object per extra capability. The engines branch
//! on presence once per request and answer `UNSUPPORTED` for anything the
//! descriptor leaves out.

pub mod memory;

use std::io;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use thiserror::Error;

use crate::digest::Digest;
use crate::verify::VerifyError;

/// Blob and upload content flows through the engines as a fallible byte
/// stream; backends never see whole blobs unless they buffer themselves.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send + 'static>>;

/// A stored manifest: the bytes exactly as pushed, plus the content type
/// they were pushed with.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Error)]
pub enum StorageError {
    /// The blob, upload session, or manifest does not exist.
    #[error("not found")]
    NotFound,

    /// The backend wants clients to fetch the content elsewhere.
    #[error("redirecting ({code}) to {location}")]
    Redirect { location: String, code: u16 },

    /// An I/O failure while moving content. May wrap a [`VerifyError`]
    /// raised by a verifying stream the engine handed in.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Anything else the backend could not cope with.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StorageError {
    /// The digest-verification failure behind this error, if that is what
    /// it is. Those are the client's fault, not the backend's.
    pub fn verification_failure(&self) -> Option<&VerifyError> {
        match self {
            StorageError::Io(err) => crate::verify::verification_failure(err),
            _ => None,
        }
    }
}

#[async_trait]
pub trait BlobGetter: Send + Sync {
    /// Stream the blob contents, or `NotFound`, or `Redirect`.
    async fn get_blob(&self, repo: &str, digest: &Digest) -> Result<ByteStream, StorageError>;
}

#[async_trait]
pub trait BlobStatter: Send + Sync {
    /// Size of the blob without opening its contents.
    async fn stat_blob(&self, repo: &str, digest: &Digest) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait BlobWriter: Send + Sync {
    /// Store the streamed contents under `digest`. The stream the engine
    /// hands in verifies digest and size as it is drained; its final error
    /// must be propagated unchanged so the engine can classify it.
    async fn put_blob(
        &self,
        repo: &str,
        digest: &Digest,
        content: ByteStream,
    ) -> Result<(), StorageError>;
}

/// Streamed upload sessions. All operations on an id that was never
/// registered, or that has already been finished or aborted, fail with
/// `NotFound`.
#[async_trait]
pub trait UploadStore: Send + Sync {
    /// Register a freshly minted session id with zero accumulated bytes.
    async fn create_upload(&self, upload_id: &str) -> Result<(), StorageError>;

    /// Current accumulated size of the session.
    async fn stat_upload(&self, upload_id: &str) -> Result<u64, StorageError>;

    /// Append a chunk, returning the new total size.
    async fn append_upload(&self, upload_id: &str, chunk: ByteStream)
        -> Result<u64, StorageError>;

    /// Append the trailing bytes, terminate the session, and return the
    /// full contents with their size for the engine to verify and store.
    async fn finish_upload(
        &self,
        upload_id: &str,
        trailer: ByteStream,
    ) -> Result<(ByteStream, u64), StorageError>;

    /// Terminate the session without storing anything.
    async fn abort_upload(&self, upload_id: &str) -> Result<(), StorageError>;
}

#[async_trait]
pub trait UploadFinalizer: Send + Sync {
    /// Append the trailing bytes, verify the total contents against
    /// `digest`, and promote them into blob storage in one pass.
    /// Implementors are responsible for the verification.
    async fn finalize_upload(
        &self,
        repo: &str,
        upload_id: &str,
        trailer: ByteStream,
        digest: &Digest,
    ) -> Result<(), StorageError>;
}

/// Manifest keys are either tags or `sha256:…` strings; backends store
/// both in the same per-repository namespace.
#[async_trait]
pub trait ManifestGetter: Send + Sync {
    async fn get_manifest_by_digest(
        &self,
        repo: &str,
        digest: &str,
    ) -> Result<Manifest, StorageError>;
}

#[async_trait]
pub trait ManifestTagGetter: Send + Sync {
    async fn get_manifest_by_tag(&self, repo: &str, tag: &str) -> Result<Manifest, StorageError>;
}

#[async_trait]
pub trait ManifestWriter: Send + Sync {
    async fn put_manifest(
        &self,
        repo: &str,
        digest: &str,
        manifest: Manifest,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait ManifestTagger: Send + Sync {
    /// Alias an already-stored digest under a tag, atomically with respect
    /// to readers of either key.
    async fn tag_manifest(&self, repo: &str, digest: &str, tag: &str)
        -> Result<(), StorageError>;
}

#[async_trait]
pub trait ManifestDeleter: Send + Sync {
    async fn delete_manifest(&self, repo: &str, digest: &str) -> Result<(), StorageError>;
}

#[async_trait]
pub trait ManifestTagDeleter: Send + Sync {
    async fn delete_manifest_by_tag(&self, repo: &str, tag: &str) -> Result<(), StorageError>;
}

#[async_trait]
pub trait TagLister: Send + Sync {
    /// Tags in the repository, lexicographically sorted, at most `limit`.
    async fn list_tags(&self, repo: &str, limit: usize) -> Result<Vec<String>, StorageError>;
}

#[async_trait]
pub trait CatalogLister: Send + Sync {
    /// Repository names, lexicographically sorted, at most `limit`.
    async fn catalog(&self, limit: usize) -> Result<Vec<String>, StorageError>;
}

/// Capability descriptor a backend registers with the registry. `blobs`
/// and `manifests` are the floor; every `None` surfaces as `UNSUPPORTED`
/// on the wire.
#[derive(Clone)]
pub struct StorageBackend {
    pub blobs: Arc<dyn BlobGetter>,
    pub blob_stat: Option<Arc<dyn BlobStatter>>,
    pub blob_put: Option<Arc<dyn BlobWriter>>,
    pub uploads: Option<Arc<dyn UploadStore>>,
    pub upload_finalize: Option<Arc<dyn UploadFinalizer>>,
    pub manifests: Arc<dyn ManifestGetter>,
    pub manifest_tags: Option<Arc<dyn ManifestTagGetter>>,
    pub manifest_put: Option<Arc<dyn ManifestWriter>>,
    pub manifest_tag: Option<Arc<dyn ManifestTagger>>,
    pub manifest_delete: Option<Arc<dyn ManifestDeleter>>,
    pub manifest_tag_delete: Option<Arc<dyn ManifestTagDeleter>>,
    pub tags: Option<Arc<dyn TagLister>>,
    pub catalog: Option<Arc<dyn CatalogLister>>,
}

impl StorageBackend {
    /// A descriptor with only the required getters; every optional
    /// capability is absent. Useful for pull-through or test backends.
    pub fn read_only(blobs: Arc<dyn BlobGetter>, manifests: Arc<dyn ManifestGetter>) -> Self {
        StorageBackend {
            blobs,
            blob_stat: None,
            blob_put: None,
            uploads: None,
            upload_finalize: None,
            manifests,
            manifest_tags: None,
            manifest_put: None,
            manifest_tag: None,
            manifest_delete: None,
            manifest_tag_delete: None,
            tags: None,
            catalog: None,
        }
    }

    /// The reference backend with every capability present.
    pub fn in_memory() -> Self {
        memory::InMemoryBackend::default().into_backend()
    }
}
