use crate::services::{
    converter_service::ConvertError, document_service::DocumentError,
    identity_service::IdentityError, storage_service::StorageError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 401 when a handler needs a signed-in user.
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "sign in required")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), "{}", self.message);
        }

        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<minijinja::Error> for AppError {
    fn from(err: minijinja::Error) -> Self {
        AppError::internal(format!("rendering view: {}", err))
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let status = match &err {
            StorageError::ObjectNotFound { .. } | StorageError::BucketNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            StorageError::InvalidName(_) => StatusCode::BAD_REQUEST,
            StorageError::NameCollision { .. } | StorageError::BucketAlreadyExists(_) => {
                StatusCode::CONFLICT
            }
            StorageError::Http(_) => StatusCode::BAD_GATEWAY,
            StorageError::Api { .. } | StorageError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        let status = match &err {
            IdentityError::Rejected { .. } | IdentityError::MissingUser => StatusCode::UNAUTHORIZED,
            IdentityError::Http(_) => StatusCode::BAD_GATEWAY,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<ConvertError> for AppError {
    fn from(err: ConvertError) -> Self {
        let status = match &err {
            ConvertError::UnsupportedInput { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ConvertError::Spawn { .. } | ConvertError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<DocumentError> for AppError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::Storage(inner) => inner.into(),
            DocumentError::Convert(inner) => inner.into(),
            DocumentError::CollisionRetriesExhausted { .. } => {
                AppError::new(StatusCode::CONFLICT, err.to_string())
            }
            DocumentError::NotText(_) => {
                AppError::new(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
            }
            DocumentError::Io(_) => AppError::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_http_statuses() {
        let missing: AppError = StorageError::ObjectNotFound {
            bucket: "u1".into(),
            name: "a.org".into(),
        }
        .into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let invalid: AppError = StorageError::InvalidName("..".into()).into();
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn exhausted_collision_retries_are_a_conflict() {
        let err: AppError = DocumentError::CollisionRetriesExhausted {
            name: "report.org".into(),
            attempts: 3,
        }
        .into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert!(err.message.contains("report.org"));
    }

    #[test]
    fn unsupported_conversion_input_is_415() {
        let err: AppError = DocumentError::Convert(ConvertError::UnsupportedInput {
            path: "x.png".into(),
            reason: "unknown extension".into(),
        })
        .into();
        assert_eq!(err.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
