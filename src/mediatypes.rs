//! Media types for manifests, indexes, and layers.

/// OCI image manifest.
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index (multi-platform).
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// OCI image configuration object.
pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
/// OCI layer, gzip-compressed tar.
pub const OCI_LAYER: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
/// OCI layer that must not be pushed to other registries.
pub const OCI_RESTRICTED_LAYER: &str =
    "application/vnd.oci.image.layer.nondistributable.v1.tar+gzip";

/// Docker manifest, schema 2.
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker manifest list (the "fat manifest").
pub const DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
/// Docker container configuration object.
pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
/// Docker layer, gzip-compressed tar.
pub const DOCKER_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
/// Docker layer served from a foreign URL, never pushed.
pub const DOCKER_FOREIGN_LAYER: &str =
    "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip";

/// Whether the media type names an index whose children are other manifests.
pub fn is_index(media_type: &str) -> bool {
    matches!(media_type, OCI_INDEX | DOCKER_MANIFEST_LIST)
}

/// Whether the media type names a single-image manifest.
pub fn is_image(media_type: &str) -> bool {
    matches!(media_type, OCI_MANIFEST | DOCKER_MANIFEST)
}

/// Foreign and non-distributable layers live outside the registry and are
/// exempt from existence checks.
pub fn is_distributable(media_type: &str) -> bool {
    media_type != DOCKER_FOREIGN_LAYER
        && !media_type.starts_with("application/vnd.oci.image.layer.nondistributable.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_types() {
        assert!(is_index(OCI_INDEX));
        assert!(is_index(DOCKER_MANIFEST_LIST));
        assert!(!is_index(OCI_MANIFEST));
        assert!(!is_index(DOCKER_MANIFEST));
        assert!(!is_index("application/octet-stream"));
    }

    #[test]
    fn image_types() {
        assert!(is_image(OCI_MANIFEST));
        assert!(is_image(DOCKER_MANIFEST));
        assert!(!is_image(OCI_INDEX));
        assert!(!is_image(OCI_LAYER));
    }

    #[test]
    fn distributable_types() {
        assert!(is_distributable(OCI_LAYER));
        assert!(is_distributable(DOCKER_LAYER));
        assert!(is_distributable(OCI_MANIFEST));
        assert!(!is_distributable(DOCKER_FOREIGN_LAYER));
        assert!(!is_distributable(OCI_RESTRICTED_LAYER));
    }
}
