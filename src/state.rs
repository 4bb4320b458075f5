use crate::storage::StorageBackend;

/// Everything a request handler needs: the negotiated backend descriptor
/// and the serving configuration. Engines keep no state of their own.
#[derive(Clone)]
pub(crate) struct AppState {
    pub backend: StorageBackend,
    /// Prefix the registry is mounted under, without a trailing slash.
    /// Baked into every generated `Location` so clients can follow them.
    pub base_path: String,
    pub access_log: bool,
}

impl AppState {
    pub(crate) fn upload_location(&self, repo: &str, id: &str) -> String {
        format!("{}/v2/{}/blobs/uploads/{}", self.base_path, repo, id)
    }

    pub(crate) fn blob_location(&self, repo: &str, digest: &str) -> String {
        format!("{}/v2/{}/blobs/{}", self.base_path, repo, digest)
    }

    pub(crate) fn manifest_location(&self, repo: &str, target: &str) -> String {
        format!("{}/v2/{}/manifests/{}", self.base_path, repo, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(base_path: &str) -> AppState {
        AppState {
            backend: StorageBackend::in_memory(),
            base_path: base_path.to_string(),
            access_log: false,
        }
    }

    #[test]
    fn locations_without_base_path() {
        let s = state("");
        assert_eq!(
            s.upload_location("library/busybox", "abc"),
            "/v2/library/busybox/blobs/uploads/abc"
        );
        assert_eq!(s.blob_location("r", "sha256:aa"), "/v2/r/blobs/sha256:aa");
        assert_eq!(
            s.manifest_location("r", "latest"),
            "/v2/r/manifests/latest"
        );
    }

    #[test]
    fn locations_include_base_path() {
        let s = state("/registry");
        assert_eq!(
            s.upload_location("r", "abc"),
            "/registry/v2/r/blobs/uploads/abc"
        );
        assert_eq!(
            s.blob_location("r", "sha256:aa"),
            "/registry/v2/r/blobs/sha256:aa"
        );
    }
}
