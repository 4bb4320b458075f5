use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Error codes defined by the distribution specification. The serialized
/// form is the exact wire string clients match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NameInvalid,
    NameUnknown,
    BlobUnknown,
    BlobUploadUnknown,
    BlobUploadInvalid,
    DigestInvalid,
    ManifestUnknown,
    ManifestInvalid,
    MethodUnknown,
    Unsupported,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NameInvalid => "NAME_INVALID",
            ErrorCode::NameUnknown => "NAME_UNKNOWN",
            ErrorCode::BlobUnknown => "BLOB_UNKNOWN",
            ErrorCode::BlobUploadUnknown => "BLOB_UPLOAD_UNKNOWN",
            ErrorCode::BlobUploadInvalid => "BLOB_UPLOAD_INVALID",
            ErrorCode::DigestInvalid => "DIGEST_INVALID",
            ErrorCode::ManifestUnknown => "MANIFEST_UNKNOWN",
            ErrorCode::ManifestInvalid => "MANIFEST_INVALID",
            ErrorCode::MethodUnknown => "METHOD_UNKNOWN",
            ErrorCode::Unsupported => "UNSUPPORTED",
            ErrorCode::Internal => "INTERNAL_ERROR",
        }
    }
}

/// A failed registry request: the HTTP status to answer with, the
/// distribution-spec code, and a human-readable message. Rendered as
/// the standard `{"errors":[…]}` envelope.
#[derive(Debug)]
pub struct RegistryError {
    status: StatusCode,
    code: ErrorCode,
    message: String,
}

impl RegistryError {
    pub fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        RegistryError {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn blob_unknown() -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorCode::BlobUnknown, "unknown blob")
    }

    pub fn blob_upload_unknown(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::RANGE_NOT_SATISFIABLE,
            ErrorCode::BlobUploadUnknown,
            message,
        )
    }

    pub fn blob_upload_invalid(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::BlobUploadInvalid, message)
    }

    pub fn digest_invalid(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::DigestInvalid, message)
    }

    pub fn name_invalid(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::NameInvalid, message)
    }

    pub fn name_unknown() -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorCode::NameUnknown, "unknown name")
    }

    pub fn manifest_unknown(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorCode::ManifestUnknown, message)
    }

    pub fn manifest_invalid(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::ManifestInvalid, message)
    }

    /// A known resource keyword reached with a method we do not serve.
    pub fn method_unknown() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ErrorCode::MethodUnknown,
            "unrecognized method or url",
        )
    }

    /// A path under the base that classifies as no resource at all.
    pub fn route_unknown() -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            ErrorCode::MethodUnknown,
            "unrecognized method or url",
        )
    }

    pub fn unsupported() -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            ErrorCode::Unsupported,
            "this operation is unsupported",
        )
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Internal,
            err.to_string(),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Serialize)]
struct ErrorEntry<'a> {
    code: &'static str,
    message: &'a str,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    errors: Vec<ErrorEntry<'a>>,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let envelope = ErrorEnvelope {
            errors: vec![ErrorEntry {
                code: self.code.as_str(),
                message: &self.message,
            }],
        };
        let body = serde_json::to_string(&envelope).unwrap_or_default();
        (
            self.status,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_to_spec_strings() {
        assert_eq!(ErrorCode::BlobUploadUnknown.as_str(), "BLOB_UPLOAD_UNKNOWN");
        assert_eq!(ErrorCode::DigestInvalid.as_str(), "DIGEST_INVALID");
        assert_eq!(ErrorCode::Internal.as_str(), "INTERNAL_ERROR");
        assert_eq!(ErrorCode::MethodUnknown.as_str(), "METHOD_UNKNOWN");
    }

    #[test]
    fn canned_errors_use_spec_statuses() {
        assert_eq!(RegistryError::blob_unknown().status(), StatusCode::NOT_FOUND);
        assert_eq!(
            RegistryError::blob_upload_unknown("x").status(),
            StatusCode::RANGE_NOT_SATISFIABLE
        );
        assert_eq!(
            RegistryError::digest_invalid("x").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(RegistryError::unsupported().status(), StatusCode::NOT_FOUND);
        assert_eq!(
            RegistryError::method_unknown().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(RegistryError::route_unknown().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn envelope_shape() {
        let response = RegistryError::manifest_unknown("unknown manifest").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
